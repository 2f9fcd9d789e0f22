//! Pseudo-experiment generation with frozen samples.

use std::cell::RefCell;
use std::f64::consts::TAU;
use std::rc::Rc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::debug;

use pulldag::error::{EvalError, PhaseError, TypeFunctionError};
use pulldag::infer::{check_inputs_multiplicity, check_inputs_same_dtype, MatrixForm};
use pulldag::{
    ConnectionPolicy, DType, EvalCtx, Graph, Grouping, NodeFunction, NodeId, NodeInit, NodeRef,
    TypeCtx,
};

/// Sampling mode of a [`MonteCarlo`] node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum McMode {
    /// Deterministic: every sample equals the central values.
    Asimov,
    /// Each element drawn from a normal around its central value.
    Normal,
}

/// Draws pseudo-experiments from pairs of (central, spread) inputs, one
/// output per pair. The spread is either a 1-d array of sigmas or the
/// lower-triangular Cholesky factor of a covariance matrix, in which case
/// the draw is `mu + L z` with iid standard-normal `z`.
///
/// A sample freezes its node after generation: downstream pulls keep seeing
/// the same draw while upstream taint is latched. [`MonteCarloHandle`]
/// advances to the next sample or resets to the central values.
pub struct MonteCarlo;

impl MonteCarlo {
    pub fn build<'g>(
        graph: &'g Graph,
        name: &str,
        mode: McMode,
        seed: u64,
    ) -> Result<(NodeRef<'g>, MonteCarloHandle), PhaseError> {
        let state = Rc::new(RefCell::new(McState {
            mode,
            rng: StdRng::seed_from_u64(seed),
            force_asimov: false,
        }));
        let node = graph.add_node(
            NodeInit::new(
                name,
                Box::new(McBehavior {
                    state: Rc::clone(&state),
                    forms: Vec::new(),
                }),
            )
            .policy(ConnectionPolicy::AddInputOutputPair)
            .grouping(Grouping::BlockToOne { block: 2 }),
        )?;
        let handle = MonteCarloHandle {
            state,
            node: node.id(),
        };
        Ok((node, handle))
    }
}

/// Control handle for one MonteCarlo node.
pub struct MonteCarloHandle {
    state: Rc<RefCell<McState>>,
    node: NodeId,
}

impl MonteCarloHandle {
    /// Discards the frozen sample and generates a fresh one.
    pub fn next_sample(&self, graph: &Graph) -> Result<(), EvalError> {
        let node = graph.node(self.node);
        node.taint();
        node.touch()
    }

    /// Makes the next sample equal the central values, then generates it.
    /// Subsequent samples draw randomly again.
    pub fn reset(&self, graph: &Graph) -> Result<(), EvalError> {
        self.state.borrow_mut().force_asimov = true;
        self.next_sample(graph)
    }
}

struct McState {
    mode: McMode,
    rng: StdRng,
    force_asimov: bool,
}

struct McBehavior {
    state: Rc<RefCell<McState>>,
    /// One spread classification per block, selected at inference.
    forms: Vec<MatrixForm>,
}

impl NodeFunction for McBehavior {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        check_inputs_multiplicity(ctx, 2)?;
        check_inputs_same_dtype(ctx)?;
        let first = ctx.input_dd(0)?;
        if first.dtype != DType::F64 {
            return Err(TypeFunctionError::Dtype {
                node: ctx.node_name(),
                input: ctx.input_name(0),
                expected: DType::F64,
                actual: first.dtype,
            });
        }
        self.forms.clear();
        for block in 0..ctx.num_inputs() / 2 {
            let central = ctx.input_dd(2 * block)?;
            let spread = ctx.input_dd(2 * block + 1)?;
            let n = central.shape.num_elements();
            let form = match *spread.shape.dims() {
                [len] if len == n => MatrixForm::Diagonal { n },
                [r, c] if r == c && r == n => MatrixForm::Square { n },
                _ => {
                    return Err(TypeFunctionError::ShapeMismatch {
                        node: ctx.node_name(),
                        input: ctx.input_name(2 * block + 1),
                        expected: central.shape.dims().to_vec(),
                        actual: spread.shape.dims().to_vec(),
                    });
                }
            };
            self.forms.push(form);
            ctx.set_output_dd(block, central);
        }
        Ok(())
    }

    fn compute(&mut self, ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        let mut state = self.state.borrow_mut();
        let asimov = state.mode == McMode::Asimov || state.force_asimov;
        state.force_asimov = false;
        for block in 0..ctx.num_inputs() / 2 {
            let central = ctx.input(2 * block)?;
            let spread = ctx.input(2 * block + 1)?;
            let out = ctx.output(block)?;
            let mu = central.f64();
            let sg = spread.f64();
            let mut sample = out.f64_mut();
            if asimov {
                sample.copy_from_slice(&mu);
                continue;
            }
            match self.forms[block] {
                MatrixForm::Diagonal { n } => {
                    for i in 0..n {
                        sample[i] = mu[i] + sg[i] * standard_normal(&mut state.rng);
                    }
                }
                MatrixForm::Square { n } => {
                    // mu + L z, accumulated row by row over the lower triangle.
                    let z: Vec<f64> =
                        (0..n).map(|_| standard_normal(&mut state.rng)).collect();
                    for i in 0..n {
                        let mut acc = mu[i];
                        for k in 0..=i {
                            acc += sg[i * n + k] * z[k];
                        }
                        sample[i] = acc;
                    }
                }
            }
        }
        debug!(node = %ctx.node_name(), asimov, "sample generated");
        // Pin this draw until the handle asks for the next one.
        ctx.freeze_self();
        Ok(())
    }
}

/// Box-Muller transform over the half-open unit square.
fn standard_normal(rng: &mut StdRng) -> f64 {
    loop {
        let u: f64 = rng.gen();
        if u > f64::EPSILON {
            let v: f64 = rng.gen();
            return (-2.0 * u.ln()).sqrt() * (TAU * v).cos();
        }
    }
}
