//! Normalization of correlated variables against a Cholesky factor.

use anyhow::ensure;

use pulldag::error::{PhaseError, TypeFunctionError};
use pulldag::infer::{check_input_square_or_diag, MatrixForm};
use pulldag::{
    DType, EvalCtx, Graph, InputDecl, NodeFunction, NodeInit, NodeRef, OutputDecl, TypeCtx,
};

/// Maps correlated values to uncorrelated z-scores: `z = L⁻¹ (x - μ)`.
///
/// `value` holds one vector of n variables, or an n-row matrix treated as
/// one vector per column. `matrix` is the lower-triangular Cholesky factor
/// of the covariance (or its diagonal as a 1-d array of sigmas), `central`
/// the vector of expected values μ.
///
/// The result is written into a scratch buffer the node owns and exposes as
/// its `normvalue` output, with the buffer identity pinned across closes.
pub struct NormalizeCorrelatedVars;

impl NormalizeCorrelatedVars {
    pub fn build<'g>(graph: &'g Graph, name: &str) -> Result<NodeRef<'g>, PhaseError> {
        graph.add_node(
            NodeInit::new(name, Box::new(NormalizeBehavior { mode: None }))
                .input(InputDecl::positional("value"))
                .input(InputDecl::named("matrix"))
                .input(InputDecl::named("central"))
                .output(OutputDecl::unallocated("normvalue").pinned())
                .input(InputDecl::scratch("work", "normvalue")),
        )
    }
}

#[derive(Clone, Copy)]
struct NormalizeMode {
    form: MatrixForm,
    cols: usize,
}

struct NormalizeBehavior {
    mode: Option<NormalizeMode>,
}

impl NodeFunction for NormalizeBehavior {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        let form = check_input_square_or_diag(ctx, "matrix")?;
        let n = form.n();
        for key in ["value", "matrix", "central"] {
            let dd = ctx.input_dd(key)?;
            if dd.dtype != DType::F64 {
                return Err(TypeFunctionError::Dtype {
                    node: ctx.node_name(),
                    input: ctx.input_name(key),
                    expected: DType::F64,
                    actual: dd.dtype,
                });
            }
        }
        let cdd = ctx.input_dd("central")?;
        if cdd.shape.dims() != [n] {
            return Err(TypeFunctionError::ShapeMismatch {
                node: ctx.node_name(),
                input: ctx.input_name("central"),
                expected: vec![n],
                actual: cdd.shape.dims().to_vec(),
            });
        }
        let vdd = ctx.input_dd("value")?;
        let cols = match *vdd.shape.dims() {
            [rows] if rows == n => 1,
            [rows, cols] if rows == n => cols,
            _ => {
                return Err(TypeFunctionError::NotMultiplicable {
                    node: ctx.node_name(),
                    left: ctx.input_name("matrix"),
                    left_shape: ctx.input_dd("matrix")?.shape.dims().to_vec(),
                    right: ctx.input_name("value"),
                    right_shape: vdd.shape.dims().to_vec(),
                });
            }
        };
        self.mode = Some(NormalizeMode { form, cols });
        ctx.set_output_dd("normvalue", vdd);
        Ok(())
    }

    fn compute(&mut self, ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        let mode = self.mode.expect("variant selected during inference");
        let value = ctx.input("value")?;
        let matrix = ctx.input("matrix")?;
        let central = ctx.input("central")?;
        let out = ctx.output("normvalue")?;
        let x = value.f64();
        let l = matrix.f64();
        let mu = central.f64();
        let mut z = out.f64_mut();
        let n = mode.form.n();
        let m = mode.cols;
        match mode.form {
            MatrixForm::Diagonal { .. } => {
                for i in 0..n {
                    ensure!(l[i] != 0.0, "zero sigma at index {i}");
                    for col in 0..m {
                        z[i * m + col] = (x[i * m + col] - mu[i]) / l[i];
                    }
                }
            }
            MatrixForm::Square { .. } => {
                // Forward substitution, one column at a time.
                for col in 0..m {
                    for i in 0..n {
                        let mut acc = x[i * m + col] - mu[i];
                        for k in 0..i {
                            acc -= l[i * n + k] * z[k * m + col];
                        }
                        ensure!(l[i * n + i] != 0.0, "zero pivot at row {i}");
                        z[i * m + col] = acc / l[i * n + i];
                    }
                }
            }
        }
        Ok(())
    }
}
