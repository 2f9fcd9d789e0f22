//! Zero-copy pass-through node.

use pulldag::error::{PhaseError, TypeFunctionError};
use pulldag::infer::check_inputs_number;
use pulldag::{EvalCtx, Graph, InputDecl, NodeFunction, NodeInit, NodeRef, OutputDecl, TypeCtx};

/// Exposes its single input's buffer as its own output without copying.
///
/// The allocation pass binds the output to the upstream buffer, so the view
/// and its source always agree; pulling the view still refreshes the stale
/// upstream chain first.
pub struct View;

impl View {
    pub fn build<'g>(graph: &'g Graph, name: &str) -> Result<NodeRef<'g>, PhaseError> {
        graph.add_node(
            NodeInit::new(name, Box::new(ViewBehavior))
                .input(InputDecl::positional("input"))
                .output(OutputDecl::unallocated("view")),
        )
    }
}

struct ViewBehavior;

impl NodeFunction for ViewBehavior {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        check_inputs_number(ctx, 1)?;
        ctx.alias_output_to_input(0, 0)
    }

    fn compute(&mut self, _ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        // The shared buffer was refreshed by the upstream touch.
        Ok(())
    }
}
