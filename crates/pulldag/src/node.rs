//! The computational unit: port declarations, behavior trait and the taint
//! state machine flags.

use std::cell::{Cell, RefCell};

use smallvec::SmallVec;

use crate::error::TypeFunctionError;
use crate::graph::{EvalCtx, TypeCtx};
use crate::port::{InputId, OutputId};
use crate::strategy::{ConnectionPolicy, Grouping};

/// Behavior supplied by a concrete node: a type-inference function and a
/// compute function. Library nodes implement this and nothing else; graph
/// mechanics stay in the runtime.
///
/// `infer` runs once per closing attempt, in topological order, after every
/// upstream node's `infer` has completed. It must validate the inputs and
/// set a descriptor on every output; it may also select which compute
/// variant the node will use, based on the inferred shapes.
///
/// `compute` runs with all upstream nodes already evaluated. Failures are
/// wrapped into [`crate::error::EvalError::Compute`] by the runtime.
pub trait NodeFunction {
    fn infer(&mut self, ctx: &mut TypeCtx<'_>) -> Result<(), TypeFunctionError>;
    fn compute(&mut self, ctx: &mut EvalCtx<'_>) -> anyhow::Result<()>;
}

/// Declares one input port at node construction.
#[derive(Debug, Clone)]
pub struct InputDecl {
    pub name: String,
    pub positional: bool,
    pub allocatable: bool,
    /// Name of a sibling output that shares this input's scratch buffer
    /// (explicit aliasing instead of a copy).
    pub shares_output: Option<String>,
}

impl InputDecl {
    /// A positional input, filled in order by the connection operator.
    pub fn positional(name: &str) -> Self {
        InputDecl {
            name: name.to_string(),
            positional: true,
            allocatable: false,
            shares_output: None,
        }
    }

    /// A named input, reachable only through `connect_named`.
    pub fn named(name: &str) -> Self {
        InputDecl {
            name: name.to_string(),
            positional: false,
            allocatable: false,
            shares_output: None,
        }
    }

    /// A non-connectable scratch input whose private buffer is exposed as
    /// the given sibling output.
    pub fn scratch(name: &str, shares_output: &str) -> Self {
        InputDecl {
            name: name.to_string(),
            positional: false,
            allocatable: true,
            shares_output: Some(shares_output.to_string()),
        }
    }
}

/// Declares one output port at node construction.
#[derive(Debug, Clone)]
pub struct OutputDecl {
    pub name: String,
    pub allocatable: bool,
    pub forbid_reallocation: bool,
}

impl OutputDecl {
    /// An ordinary output: the allocation pass gives it a zeroed buffer.
    pub fn new(name: &str) -> Self {
        OutputDecl {
            name: name.to_string(),
            allocatable: true,
            forbid_reallocation: false,
        }
    }

    /// An output that exposes storage owned elsewhere (a view, or a scratch
    /// sibling); the allocation pass must not give it a buffer of its own.
    pub fn unallocated(name: &str) -> Self {
        OutputDecl {
            name: name.to_string(),
            allocatable: false,
            forbid_reallocation: false,
        }
    }

    /// Pins the buffer identity across allocation passes; the node's
    /// compute function writes into that exact array in place.
    pub fn pinned(mut self) -> Self {
        self.forbid_reallocation = true;
        self
    }
}

/// Everything needed to register a node with an open graph.
pub struct NodeInit {
    pub name: String,
    pub inputs: Vec<InputDecl>,
    pub outputs: Vec<OutputDecl>,
    pub policy: ConnectionPolicy,
    pub grouping: Grouping,
    pub behavior: Box<dyn NodeFunction>,
}

impl NodeInit {
    /// A fixed-arity node with the given ports.
    pub fn new(name: &str, behavior: Box<dyn NodeFunction>) -> Self {
        NodeInit {
            name: name.to_string(),
            inputs: Vec::new(),
            outputs: Vec::new(),
            policy: ConnectionPolicy::Fail,
            grouping: Grouping::Single,
            behavior,
        }
    }

    pub fn input(mut self, decl: InputDecl) -> Self {
        self.inputs.push(decl);
        self
    }

    pub fn output(mut self, decl: OutputDecl) -> Self {
        self.outputs.push(decl);
        self
    }

    pub fn policy(mut self, policy: ConnectionPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn grouping(mut self, grouping: Grouping) -> Self {
        self.grouping = grouping;
        self
    }
}

/// Tri-state liveness of a node.
///
/// `tainted` marks the cached outputs stale; `frozen` pins the node so that
/// upstream taint is absorbed rather than propagated; `frozen_tainted`
/// latches an absorbed taint so it can be replayed on unfreeze.
#[derive(Debug, Default)]
pub(crate) struct NodeFlags {
    pub tainted: Cell<bool>,
    pub frozen: Cell<bool>,
    pub frozen_tainted: Cell<bool>,
}

/// A node as stored in the graph arena.
pub(crate) struct NodeEntry {
    pub name: String,
    /// Positional inputs, in connection order.
    pub inputs: SmallVec<[InputId; 4]>,
    /// Named (non-positional) inputs, including scratch inputs.
    pub named: SmallVec<[InputId; 2]>,
    pub outputs: SmallVec<[OutputId; 2]>,
    pub flags: NodeFlags,
    pub policy: ConnectionPolicy,
    pub grouping: Grouping,
    pub behavior: RefCell<Box<dyn NodeFunction>>,
}
