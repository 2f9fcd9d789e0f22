//! Elementwise variadic reducers.
//!
//! Both nodes grow one positional input per connection and share a single
//! `result` output created on first wiring; all inputs must be fully
//! equivalent (dtype, shape and axis references).

use pulldag::error::{PhaseError, TypeFunctionError};
use pulldag::infer::{check_inputs_equivalence, copy_from_input_to_output};
use pulldag::{
    ConnectionPolicy, DType, EvalCtx, Graph, Grouping, NodeFunction, NodeInit, NodeRef, TypeCtx,
};

/// Elementwise sum of any number of equivalent inputs.
pub struct Sum;

impl Sum {
    pub fn build<'g>(graph: &'g Graph, name: &str) -> Result<NodeRef<'g>, PhaseError> {
        graph.add_node(
            NodeInit::new(name, Box::new(SumBehavior { dtype: DType::F64 }))
                .policy(ConnectionPolicy::AddInputKeepOutput)
                .grouping(Grouping::ManyToOne),
        )
    }
}

/// Elementwise product of any number of equivalent inputs.
pub struct Product;

impl Product {
    pub fn build<'g>(graph: &'g Graph, name: &str) -> Result<NodeRef<'g>, PhaseError> {
        graph.add_node(
            NodeInit::new(name, Box::new(ProductBehavior { dtype: DType::F64 }))
                .policy(ConnectionPolicy::AddInputKeepOutput)
                .grouping(Grouping::ManyToOne),
        )
    }
}

struct SumBehavior {
    dtype: DType,
}

impl NodeFunction for SumBehavior {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        check_inputs_equivalence(ctx)?;
        self.dtype = ctx.input_dd(0)?.dtype;
        copy_from_input_to_output(ctx, 0, 0)
    }

    fn compute(&mut self, ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        let out = ctx.output(0)?;
        match self.dtype {
            DType::F64 => {
                let mut acc = out.f64_mut();
                acc.fill(0.0);
                for idx in 0..ctx.num_inputs() {
                    let src = ctx.input(idx)?;
                    for (a, x) in acc.iter_mut().zip(src.f64().iter()) {
                        *a += x;
                    }
                }
            }
            DType::F32 => {
                let mut acc = out.f32_mut();
                acc.fill(0.0);
                for idx in 0..ctx.num_inputs() {
                    let src = ctx.input(idx)?;
                    for (a, x) in acc.iter_mut().zip(src.f32().iter()) {
                        *a += x;
                    }
                }
            }
            DType::I32 => {
                let mut acc = out.i32_mut();
                acc.fill(0);
                for idx in 0..ctx.num_inputs() {
                    let src = ctx.input(idx)?;
                    for (a, x) in acc.iter_mut().zip(src.i32().iter()) {
                        *a += x;
                    }
                }
            }
        }
        Ok(())
    }
}

struct ProductBehavior {
    dtype: DType,
}

impl NodeFunction for ProductBehavior {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        check_inputs_equivalence(ctx)?;
        self.dtype = ctx.input_dd(0)?.dtype;
        copy_from_input_to_output(ctx, 0, 0)
    }

    fn compute(&mut self, ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        let out = ctx.output(0)?;
        match self.dtype {
            DType::F64 => {
                let mut acc = out.f64_mut();
                acc.fill(1.0);
                for idx in 0..ctx.num_inputs() {
                    let src = ctx.input(idx)?;
                    for (a, x) in acc.iter_mut().zip(src.f64().iter()) {
                        *a *= x;
                    }
                }
            }
            DType::F32 => {
                let mut acc = out.f32_mut();
                acc.fill(1.0);
                for idx in 0..ctx.num_inputs() {
                    let src = ctx.input(idx)?;
                    for (a, x) in acc.iter_mut().zip(src.f32().iter()) {
                        *a *= x;
                    }
                }
            }
            DType::I32 => {
                let mut acc = out.i32_mut();
                acc.fill(1);
                for idx in 0..ctx.num_inputs() {
                    let src = ctx.input(idx)?;
                    for (a, x) in acc.iter_mut().zip(src.i32().iter()) {
                        *a *= x;
                    }
                }
            }
        }
        Ok(())
    }
}
