//! Cholesky decomposition of a covariance matrix or its diagonal.

use anyhow::bail;

use pulldag::error::{PhaseError, TypeFunctionError};
use pulldag::infer::{check_input_square_or_diag, copy_from_input_to_output, MatrixForm};
use pulldag::{
    DType, EvalCtx, Graph, InputDecl, NodeFunction, NodeInit, NodeRef, OutputDecl, TypeCtx,
};

/// Lower-triangular Cholesky factor `L` with `L Lᵀ = V`.
///
/// Accepts either a full square matrix or a 1-d diagonal; the variant is
/// selected during type inference and the output mirrors the input's shape
/// (square root of the elements in the diagonal case).
pub struct Cholesky;

impl Cholesky {
    pub fn build<'g>(graph: &'g Graph, name: &str) -> Result<NodeRef<'g>, PhaseError> {
        graph.add_node(
            NodeInit::new(name, Box::new(CholeskyBehavior { form: None }))
                .input(InputDecl::positional("matrix"))
                .output(OutputDecl::new("L")),
        )
    }
}

struct CholeskyBehavior {
    form: Option<MatrixForm>,
}

impl NodeFunction for CholeskyBehavior {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        let form = check_input_square_or_diag(ctx, "matrix")?;
        let dd = ctx.input_dd("matrix")?;
        if dd.dtype != DType::F64 {
            return Err(TypeFunctionError::Dtype {
                node: ctx.node_name(),
                input: ctx.input_name("matrix"),
                expected: DType::F64,
                actual: dd.dtype,
            });
        }
        self.form = Some(form);
        copy_from_input_to_output(ctx, "matrix", 0)
    }

    fn compute(&mut self, ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        let src = ctx.input("matrix")?;
        let out = ctx.output(0)?;
        let form = self.form.expect("variant selected during inference");
        match form {
            MatrixForm::Diagonal { .. } => {
                let v = src.f64();
                let mut l = out.f64_mut();
                for (li, &vi) in l.iter_mut().zip(v.iter()) {
                    if vi <= 0.0 {
                        bail!("diagonal element {vi} is not positive");
                    }
                    *li = vi.sqrt();
                }
            }
            MatrixForm::Square { n } => {
                let v = src.f64();
                let mut l = out.f64_mut();
                cholesky_banachiewicz(&v, &mut l, n)?;
            }
        }
        Ok(())
    }
}

/// Row-by-row factorization; fails on a non-positive pivot, which means the
/// input is not positive definite.
fn cholesky_banachiewicz(v: &[f64], l: &mut [f64], n: usize) -> anyhow::Result<()> {
    l.fill(0.0);
    for i in 0..n {
        for j in 0..=i {
            let mut acc = v[i * n + j];
            for k in 0..j {
                acc -= l[i * n + k] * l[j * n + k];
            }
            if i == j {
                if acc <= 0.0 {
                    bail!("matrix is not positive definite (pivot {acc} at row {i})");
                }
                l[i * n + j] = acc.sqrt();
            } else {
                l[i * n + j] = acc / l[j * n + j];
            }
        }
    }
    Ok(())
}
