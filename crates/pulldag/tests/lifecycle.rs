//! Open/close lifecycle: wiring policies, inference failures, allocation
//! reuse and cycle detection.

use std::cell::RefCell;
use std::rc::Rc;

use pulldag::error::{
    AllocationError, CloseError, EvalError, PhaseError, TypeFunctionError, WiringError,
};
use pulldag::{
    BufferHandle, ConnectionPolicy, DType, DataDescriptor, EvalCtx, Graph, InputDecl, NodeFunction,
    NodeInit, NodeRef, OutputDecl, Shape, TypeCtx,
};

/// Source stub whose output shape can be changed between closes.
struct Reshapable {
    dims: Rc<RefCell<Vec<usize>>>,
}

impl NodeFunction for Reshapable {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        let dims = self.dims.borrow().clone();
        ctx.set_output_dd(0, DataDescriptor::new(DType::F64, Shape::new(dims)));
        Ok(())
    }

    fn compute(&mut self, ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        ctx.output(0)?.f64_mut().fill(1.0);
        Ok(())
    }
}

fn reshapable<'g>(
    graph: &'g Graph,
    name: &str,
    dims: &[usize],
    pinned: bool,
) -> (NodeRef<'g>, Rc<RefCell<Vec<usize>>>) {
    let dims = Rc::new(RefCell::new(dims.to_vec()));
    let decl = if pinned {
        OutputDecl::new("result").pinned()
    } else {
        OutputDecl::new("result")
    };
    let node = graph
        .add_node(
            NodeInit::new(
                name,
                Box::new(Reshapable {
                    dims: Rc::clone(&dims),
                }),
            )
            .output(decl),
        )
        .unwrap();
    (node, dims)
}

/// Pass-through stub used for wiring topology.
struct PassThrough;

impl NodeFunction for PassThrough {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        let dd = if ctx.num_inputs() > 0 {
            ctx.input_dd(0)?
        } else {
            DataDescriptor::new(DType::F64, Shape::new([1]))
        };
        ctx.set_output_dd(0, dd);
        Ok(())
    }

    fn compute(&mut self, ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        let out = ctx.output(0)?;
        if ctx.num_inputs() > 0 {
            let src = ctx.input(0)?;
            out.f64_mut().copy_from_slice(&src.f64());
        } else {
            out.f64_mut().fill(0.0);
        }
        Ok(())
    }
}

fn pass_through<'g>(graph: &'g Graph, name: &str, arity: usize) -> NodeRef<'g> {
    let mut init = NodeInit::new(name, Box::new(PassThrough)).output(OutputDecl::new("result"));
    for idx in 0..arity {
        init = init.input(InputDecl::positional(&format!("in_{idx}")));
    }
    graph.add_node(init).unwrap()
}

/// Stub whose inference always fails.
struct Rejecting;

impl NodeFunction for Rejecting {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
        Err(TypeFunctionError::NoInputs {
            node: ctx.node_name(),
        })
    }

    fn compute(&mut self, _ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
        Ok(())
    }
}

#[test]
fn evaluating_an_open_graph_fails() {
    let graph = Graph::new("open");
    let (source, _) = reshapable(&graph, "source", &[2], false);
    let err = source.touch().unwrap_err();
    assert!(matches!(err, EvalError::Phase(PhaseError::Open { .. })));
}

#[test]
fn wiring_a_closed_graph_fails() {
    let graph = Graph::new("closed");
    let (source, _) = reshapable(&graph, "source", &[2], false);
    let sink = pass_through(&graph, "sink", 1);
    source.output(0) >> sink;
    graph.close().unwrap();

    let err = graph
        .connect(source.output(0).id(), sink.id())
        .unwrap_err();
    assert!(matches!(err, WiringError::Phase(PhaseError::Closed { .. })));
    assert!(graph
        .add_node(NodeInit::new("late", Box::new(PassThrough)))
        .is_err());
}

#[test]
fn failed_inference_leaves_the_graph_open() {
    let graph = Graph::new("rejected");
    graph
        .add_node(NodeInit::new("bad", Box::new(Rejecting)).output(OutputDecl::new("result")))
        .unwrap();
    let err = graph.close().unwrap_err();
    assert!(matches!(
        err,
        CloseError::Type(TypeFunctionError::NoInputs { .. })
    ));
    assert!(!graph.is_closed());
    // Still open: topology changes are accepted.
    let (_, _) = reshapable(&graph, "late", &[1], false);
}

#[test]
fn unset_descriptor_is_rejected() {
    struct Silent;
    impl NodeFunction for Silent {
        fn infer(&mut self, _ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError> {
            Ok(())
        }
        fn compute(&mut self, _ctx: &mut EvalCtx<'_>) -> anyhow::Result<()> {
            Ok(())
        }
    }
    let graph = Graph::new("silent");
    graph
        .add_node(NodeInit::new("silent", Box::new(Silent)).output(OutputDecl::new("result")))
        .unwrap();
    let err = graph.close().unwrap_err();
    assert!(matches!(
        err,
        CloseError::Type(TypeFunctionError::MissingDescriptor { .. })
    ));
}

#[test]
fn zero_sized_outputs_are_rejected() {
    let graph = Graph::new("zero");
    let (_, _) = reshapable(&graph, "source", &[3, 0], false);
    let err = graph.close().unwrap_err();
    assert!(matches!(
        err,
        CloseError::Alloc(AllocationError::ZeroSized { .. })
    ));
    assert!(!graph.is_closed());
}

#[test]
fn reopen_reuses_matching_buffers() {
    let graph = Graph::new("reuse");
    let (source, _) = reshapable(&graph, "source", &[4], false);
    graph.close().unwrap();
    let first = source.output(0).data().unwrap();

    graph.open();
    assert!(!graph.is_closed());
    graph.close().unwrap();
    let second = source.output(0).data().unwrap();
    assert!(BufferHandle::same_buffer(&first, &second));
}

#[test]
fn pinned_output_refuses_reallocation() {
    let graph = Graph::new("pinned");
    let (source, dims) = reshapable(&graph, "source", &[4], true);
    graph.close().unwrap();
    let first = source.output(0).data().unwrap();

    // Same descriptor: the identity survives the reopen.
    graph.open();
    graph.close().unwrap();
    let second = source.output(0).data().unwrap();
    assert!(BufferHandle::same_buffer(&first, &second));

    // Changed descriptor: the close fails instead of moving the buffer.
    *dims.borrow_mut() = vec![8];
    graph.open();
    let err = graph.close().unwrap_err();
    assert!(matches!(
        err,
        CloseError::Alloc(AllocationError::ForbiddenReallocation { .. })
    ));
}

#[test]
fn add_input_policy_grows_on_demand() {
    let graph = Graph::new("grow");
    let (a, _) = reshapable(&graph, "a", &[2], false);
    let (b, _) = reshapable(&graph, "b", &[2], false);
    let (c, _) = reshapable(&graph, "c", &[2], false);
    let sink = graph
        .add_node(
            NodeInit::new("sink", Box::new(PassThrough))
                .output(OutputDecl::new("result"))
                .policy(ConnectionPolicy::AddInput),
        )
        .unwrap();
    assert_eq!(sink.num_inputs(), 0);
    let first = a.output(0) >> sink;
    b.output(0) >> sink;
    c.output(0) >> sink;
    assert_eq!(sink.num_inputs(), 3);
    assert_eq!(first.name(), "input_00");
    assert_eq!(sink.input(2).name(), "input_02");

    // A fourth producer after a close: reopen, grow, close again.
    graph.close().unwrap();
    graph.open();
    let (d, _) = reshapable(&graph, "d", &[2], false);
    d.output(0) >> sink;
    assert_eq!(sink.num_inputs(), 4);
    graph.close().unwrap();
    sink.output(0).data().unwrap();
}

#[test]
fn fixed_arity_rejects_extra_connections() {
    let graph = Graph::new("fixed");
    let (a, _) = reshapable(&graph, "a", &[2], false);
    let (b, _) = reshapable(&graph, "b", &[2], false);
    let sink = pass_through(&graph, "sink", 1);
    a.output(0) >> sink;
    let err = graph.connect(b.output(0).id(), sink.id()).unwrap_err();
    assert!(matches!(err, WiringError::Saturated { .. }));
}

#[test]
fn named_wiring_validates_the_port() {
    let graph = Graph::new("named");
    let (a, _) = reshapable(&graph, "a", &[2], false);
    let sink = graph
        .add_node(
            NodeInit::new("sink", Box::new(PassThrough))
                .input(InputDecl::named("weights"))
                .output(OutputDecl::new("result")),
        )
        .unwrap();
    let err = graph
        .connect_named(a.output(0).id(), sink.id(), "nope")
        .unwrap_err();
    assert!(matches!(err, WiringError::NoSuchInput { .. }));

    graph
        .connect_named(a.output(0).id(), sink.id(), "weights")
        .unwrap();
    let err = graph
        .connect_named(a.output(0).id(), sink.id(), "weights")
        .unwrap_err();
    assert!(matches!(err, WiringError::AlreadyConnected { .. }));
}

#[test]
fn cycles_are_reported_at_close() {
    let graph = Graph::new("cycle");
    let a = pass_through(&graph, "a", 1);
    let b = pass_through(&graph, "b", 1);
    a.output(0) >> b;
    b.output(0) >> a;
    let err = graph.close().unwrap_err();
    assert!(matches!(err, CloseError::Cycle { .. }));
    assert!(!graph.is_closed());
}

#[test]
fn close_is_idempotent() {
    let graph = Graph::new("idempotent");
    let (_, _) = reshapable(&graph, "source", &[2], false);
    graph.close().unwrap();
    graph.close().unwrap();
    assert!(graph.is_closed());
}
