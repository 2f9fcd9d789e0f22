//! Concatenation of 1-d arrays into one flat output.

use std::cell::RefCell;
use std::rc::Rc;

use pulldag::error::{PhaseError, TypeFunctionError};
use pulldag::infer::{check_input_dimension, check_inputs_same_dtype};
use pulldag::{
    ConnectionPolicy, DType, DataDescriptor, EvalCtx, Graph, Grouping, NodeFunction, NodeInit,
    NodeRef, Shape, TypeCtx,
};

/// Concatenates any number of 1-d inputs of one dtype, in connection order.
///
/// The per-input start offsets are recomputed by every close and exposed
/// through a shared [`OffsetsHandle`], so downstream code can slice the flat
/// result back apart.
pub struct Concatenation;

impl Concatenation {
    pub fn build<'g>(
        graph: &'g Graph,
        name: &str,
    ) -> Result<(NodeRef<'g>, OffsetsHandle), PhaseError> {
        let offsets = Rc::new(RefCell::new(Vec::new()));
        let node = graph.add_node(
            NodeInit::new(
                name,
                Box::new(ConcatBehavior {
                    offsets: Rc::clone(&offsets),
                    dtype: DType::F64,
                }),
            )
            .policy(ConnectionPolicy::AddInputKeepOutput)
            .grouping(Grouping::ManyToOne),
        )?;
        Ok((node, OffsetsHandle { offsets }))
    }
}

/// Read-only view of the start offset of each concatenated input.
pub struct OffsetsHandle {
    offsets: Rc<RefCell<Vec<usize>>>,
}

impl OffsetsHandle {
    /// Offsets as of the last successful close, one per input.
    pub fn get(&self) -> Vec<usize> {
        self.offsets.borrow().clone()
    }
}

struct ConcatBehavior {
    offsets: Rc<RefCell<Vec<usize>>>,
    dtype: DType,
}

impl NodeFunction for ConcatBehavior {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        check_inputs_same_dtype(ctx)?;
        let mut offsets = Vec::with_capacity(ctx.num_inputs());
        let mut total = 0usize;
        for idx in 0..ctx.num_inputs() {
            check_input_dimension(ctx, idx, 1)?;
            offsets.push(total);
            total += ctx.input_dd(idx)?.shape.num_elements();
        }
        self.dtype = ctx.input_dd(0)?.dtype;
        *self.offsets.borrow_mut() = offsets;
        ctx.set_output_dd(0, DataDescriptor::new(self.dtype, Shape::new([total])));
        Ok(())
    }

    fn compute(&mut self, ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        let out = ctx.output(0)?;
        let offsets = self.offsets.borrow();
        match self.dtype {
            DType::F64 => {
                let mut dst = out.f64_mut();
                for idx in 0..ctx.num_inputs() {
                    let src = ctx.input(idx)?;
                    let src = src.f64();
                    dst[offsets[idx]..offsets[idx] + src.len()].copy_from_slice(&src);
                }
            }
            DType::F32 => {
                let mut dst = out.f32_mut();
                for idx in 0..ctx.num_inputs() {
                    let src = ctx.input(idx)?;
                    let src = src.f32();
                    dst[offsets[idx]..offsets[idx] + src.len()].copy_from_slice(&src);
                }
            }
            DType::I32 => {
                let mut dst = out.i32_mut();
                for idx in 0..ctx.num_inputs() {
                    let src = ctx.input(idx)?;
                    let src = src.i32();
                    dst[offsets[idx]..offsets[idx] + src.len()].copy_from_slice(&src);
                }
            }
        }
        Ok(())
    }
}
