//! Source nodes exposing externally stored arrays.

use std::cell::RefCell;
use std::rc::Rc;

use pulldag::error::{PhaseError, TypeFunctionError};
use pulldag::infer::{check_edges_length, check_mesh_length};
use pulldag::{
    DType, DataDescriptor, EvalCtx, Graph, InputDecl, NodeFunction, NodeId, NodeInit, NodeRef,
    OutputDecl, Shape, TypeCtx,
};

/// A source node carrying a user-provided vector.
///
/// The values live behind a shared handle; replacing them taints the node so
/// downstream consumers recompute on the next pull. Optional `edges` and
/// `meshes` inputs attach histogram axis references to the output's
/// descriptor.
pub struct Array;

impl Array {
    /// Registers an `f64` array node, returning the node and a handle to
    /// the stored values.
    pub fn build<'g>(
        graph: &'g Graph,
        name: &str,
        values: Vec<f64>,
    ) -> Result<(NodeRef<'g>, ArrayHandle), PhaseError> {
        Self::build_shaped(graph, name, values, None)
    }

    /// Registers an `f64` array node carrying data of the given shape; the
    /// values are stored flat in row-major order.
    pub fn build_matrix<'g>(
        graph: &'g Graph,
        name: &str,
        values: Vec<f64>,
        dims: &[usize],
    ) -> Result<(NodeRef<'g>, ArrayHandle), PhaseError> {
        Self::build_shaped(graph, name, values, Some(dims.to_vec()))
    }

    fn build_shaped<'g>(
        graph: &'g Graph,
        name: &str,
        values: Vec<f64>,
        dims: Option<Vec<usize>>,
    ) -> Result<(NodeRef<'g>, ArrayHandle), PhaseError> {
        if let Some(dims) = &dims {
            let wanted: usize = dims.iter().product();
            assert_eq!(
                values.len(),
                wanted,
                "shape {dims:?} does not fit {} values",
                values.len()
            );
        }
        let values = Rc::new(RefCell::new(values));
        let node = graph.add_node(
            NodeInit::new(
                name,
                Box::new(ArrayBehavior {
                    values: Rc::clone(&values),
                    dims,
                }),
            )
            .input(InputDecl::named("edges"))
            .input(InputDecl::named("meshes"))
            .output(OutputDecl::new("array")),
        )?;
        let handle = ArrayHandle {
            values,
            node: node.id(),
        };
        Ok((node, handle))
    }

    /// Registers an `i32` array node.
    pub fn build_i32<'g>(
        graph: &'g Graph,
        name: &str,
        values: Vec<i32>,
    ) -> Result<(NodeRef<'g>, ArrayI32Handle), PhaseError> {
        let values = Rc::new(RefCell::new(values));
        let node = graph.add_node(
            NodeInit::new(
                name,
                Box::new(ArrayI32Behavior {
                    values: Rc::clone(&values),
                }),
            )
            .output(OutputDecl::new("array")),
        )?;
        let handle = ArrayI32Handle {
            values,
            node: node.id(),
        };
        Ok((node, handle))
    }
}

/// Control handle for an `f64` array node.
pub struct ArrayHandle {
    values: Rc<RefCell<Vec<f64>>>,
    node: NodeId,
}

impl ArrayHandle {
    /// Replaces the stored values and taints the node. Changing the length
    /// only takes effect after the graph is reopened and closed again.
    pub fn set(&self, graph: &Graph, values: &[f64]) {
        {
            let mut stored = self.values.borrow_mut();
            if stored.len() == values.len() {
                stored.copy_from_slice(values);
            } else {
                *stored = values.to_vec();
            }
        }
        graph.node(self.node).taint();
    }
}

/// Control handle for an `i32` array node.
pub struct ArrayI32Handle {
    values: Rc<RefCell<Vec<i32>>>,
    node: NodeId,
}

impl ArrayI32Handle {
    /// Replaces the stored values and taints the node.
    pub fn set(&self, graph: &Graph, values: &[i32]) {
        {
            let mut stored = self.values.borrow_mut();
            if stored.len() == values.len() {
                stored.copy_from_slice(values);
            } else {
                *stored = values.to_vec();
            }
        }
        graph.node(self.node).taint();
    }
}

struct ArrayBehavior {
    values: Rc<RefCell<Vec<f64>>>,
    dims: Option<Vec<usize>>,
}

impl NodeFunction for ArrayBehavior {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        let n = self.values.borrow().len();
        let shape = match &self.dims {
            Some(dims) => Shape::new(dims.clone()),
            None => Shape::new([n]),
        };
        let mut dd = DataDescriptor::new(DType::F64, shape);
        if ctx.input_connected("edges") {
            let edges_dd = ctx.input_dd("edges")?;
            check_edges_length(ctx, "array", n, &edges_dd)?;
            dd = dd.with_edges(vec![ctx.input_source("edges")?]);
        }
        if ctx.input_connected("meshes") {
            let mesh_dd = ctx.input_dd("meshes")?;
            check_mesh_length(ctx, "array", n, &mesh_dd)?;
            dd = dd.with_meshes(vec![ctx.input_source("meshes")?]);
        }
        ctx.set_output_dd(0, dd);
        Ok(())
    }

    fn compute(&mut self, ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        let out = ctx.output(0)?;
        out.f64_mut().copy_from_slice(&self.values.borrow());
        Ok(())
    }
}

struct ArrayI32Behavior {
    values: Rc<RefCell<Vec<i32>>>,
}

impl NodeFunction for ArrayI32Behavior {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        let n = self.values.borrow().len();
        ctx.set_output_dd(0, DataDescriptor::new(DType::I32, Shape::new([n])));
        Ok(())
    }

    fn compute(&mut self, ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        let out = ctx.output(0)?;
        out.i32_mut().copy_from_slice(&self.values.borrow());
        Ok(())
    }
}
