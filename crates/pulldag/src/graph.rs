//! Graph arenas, the open/closed lifecycle and the taint-driven evaluator.
//!
//! A [`Graph`] owns every node, port and buffer in index-addressed arenas and
//! hands out cheap `Copy` handles borrowing the graph. All mutation goes
//! through interior mutability so that recursive walks (taint propagation,
//! pull evaluation) can run against `&Graph` without aliasing conflicts; every
//! internal borrow is dropped before recursing.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::ops::Shr;
use std::rc::Rc;

use anyhow::anyhow;
use smallvec::SmallVec;
use tracing::{debug, trace};

use crate::buffer::{Buffer, BufferHandle};
use crate::descriptor::DataDescriptor;
use crate::error::{
    AllocationError, CloseError, EvalError, PhaseError, TypeFunctionError, WiringError,
};
use crate::node::{NodeEntry, NodeInit, OutputDecl};
use crate::port::{BufferId, InputId, InputPort, NodeId, OutputId, OutputPort, PortKey};
use crate::strategy::ConnectionPolicy;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Open,
    Closed,
}

/// A directed computation graph evaluated lazily on demand.
///
/// While open, nodes are added and wired; `close` runs type inference and
/// buffer allocation in topological order and switches the graph into its
/// evaluatable phase. `open` switches back, retaining descriptors and
/// buffers so a subsequent close can reuse allocations.
pub struct Graph {
    name: String,
    nodes: RefCell<Vec<NodeEntry>>,
    inputs: RefCell<Vec<InputPort>>,
    outputs: RefCell<Vec<OutputPort>>,
    buffers: RefCell<Vec<Rc<RefCell<Buffer>>>>,
    phase: Cell<Phase>,
}

impl Graph {
    /// Creates an empty open graph.
    pub fn new(name: &str) -> Self {
        Graph {
            name: name.to_string(),
            nodes: RefCell::new(Vec::new()),
            inputs: RefCell::new(Vec::new()),
            outputs: RefCell::new(Vec::new()),
            buffers: RefCell::new(Vec::new()),
            phase: Cell::new(Phase::Open),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.phase.get() == Phase::Closed
    }

    pub fn num_nodes(&self) -> usize {
        self.nodes.borrow().len()
    }

    fn ensure_open(&self) -> Result<(), PhaseError> {
        match self.phase.get() {
            Phase::Open => Ok(()),
            Phase::Closed => Err(PhaseError::Closed {
                graph: self.name.clone(),
            }),
        }
    }

    fn ensure_closed(&self) -> Result<(), PhaseError> {
        match self.phase.get() {
            Phase::Closed => Ok(()),
            Phase::Open => Err(PhaseError::Open {
                graph: self.name.clone(),
            }),
        }
    }

    /// Registers a node with the open graph and returns its handle.
    pub fn add_node(&self, init: NodeInit) -> Result<NodeRef<'_>, PhaseError> {
        self.ensure_open()?;
        let id = NodeId(self.nodes.borrow().len());
        self.nodes.borrow_mut().push(NodeEntry {
            name: init.name.clone(),
            inputs: SmallVec::new(),
            named: SmallVec::new(),
            outputs: SmallVec::new(),
            flags: Default::default(),
            policy: init.policy,
            grouping: init.grouping,
            behavior: RefCell::new(init.behavior),
        });
        // Outputs first so scratch inputs can resolve their sibling by name.
        for decl in &init.outputs {
            self.insert_output(id, decl.clone());
        }
        for decl in &init.inputs {
            let sibling = decl.shares_output.as_deref().map(|oname| {
                self.find_output(id, oname)
                    .unwrap_or_else(|| panic!("node '{}' declares no output '{oname}'", init.name))
            });
            self.insert_input(id, &decl.name, decl.positional, decl.allocatable, sibling);
        }
        debug!(node = %init.name, id = id.0, "node registered");
        Ok(NodeRef { graph: self, id })
    }

    /// Handle for an already-registered node.
    pub fn node(&self, id: NodeId) -> NodeRef<'_> {
        NodeRef { graph: self, id }
    }

    fn insert_input(
        &self,
        node: NodeId,
        name: &str,
        positional: bool,
        allocatable: bool,
        sibling: Option<OutputId>,
    ) -> InputId {
        let id = InputId(self.inputs.borrow().len());
        self.inputs.borrow_mut().push(InputPort {
            name: name.to_string(),
            node,
            positional,
            source: None,
            allocatable,
            buffer: None,
            sibling,
        });
        let mut nodes = self.nodes.borrow_mut();
        if positional {
            nodes[node.0].inputs.push(id);
        } else {
            nodes[node.0].named.push(id);
        }
        id
    }

    fn insert_output(&self, node: NodeId, decl: OutputDecl) -> OutputId {
        let id = OutputId(self.outputs.borrow().len());
        self.outputs.borrow_mut().push(OutputPort {
            name: decl.name,
            node,
            consumers: Vec::new(),
            dd: None,
            buffer: None,
            allocatable: decl.allocatable,
            owns_buffer: false,
            forbid_reallocation: decl.forbid_reallocation,
            alias_of_input: None,
        });
        self.nodes.borrow_mut()[node.0].outputs.push(id);
        id
    }

    fn find_output(&self, node: NodeId, name: &str) -> Option<OutputId> {
        let nodes = self.nodes.borrow();
        let outputs = self.outputs.borrow();
        nodes[node.0]
            .outputs
            .iter()
            .copied()
            .find(|oid| outputs[oid.0].name == name)
    }

    fn find_input(&self, node: NodeId, name: &str) -> Option<InputId> {
        let nodes = self.nodes.borrow();
        let inputs = self.inputs.borrow();
        let entry = &nodes[node.0];
        entry
            .inputs
            .iter()
            .chain(entry.named.iter())
            .copied()
            .find(|iid| inputs[iid.0].name == name)
    }

    fn node_name(&self, id: NodeId) -> String {
        self.nodes.borrow()[id.0].name.clone()
    }

    /// Wires `from` into the next free positional input of `to`, growing the
    /// port lists according to the target's connection policy.
    pub fn connect(&self, from: OutputId, to: NodeId) -> Result<InputRef<'_>, WiringError> {
        self.ensure_open()?;
        let free = {
            let nodes = self.nodes.borrow();
            let inputs = self.inputs.borrow();
            nodes[to.0]
                .inputs
                .iter()
                .copied()
                .find(|iid| inputs[iid.0].source.is_none())
        };
        let id = match free {
            Some(id) => id,
            None => self.grow_for_connection(to)?,
        };
        self.bind(from, id);
        Ok(InputRef { graph: self, id })
    }

    /// Wires `from` into the named input of `to`.
    pub fn connect_named(
        &self,
        from: OutputId,
        to: NodeId,
        name: &str,
    ) -> Result<InputRef<'_>, WiringError> {
        self.ensure_open()?;
        let id = self
            .find_input(to, name)
            .ok_or_else(|| WiringError::NoSuchInput {
                node: self.node_name(to),
                input: name.to_string(),
            })?;
        self.connect_input(from, id)
    }

    /// Wires `from` into one specific input port.
    pub fn connect_input(&self, from: OutputId, to: InputId) -> Result<InputRef<'_>, WiringError> {
        self.ensure_open()?;
        if self.inputs.borrow()[to.0].source.is_some() {
            let (node, input) = {
                let inputs = self.inputs.borrow();
                (self.node_name(inputs[to.0].node), inputs[to.0].name.clone())
            };
            return Err(WiringError::AlreadyConnected { node, input });
        }
        self.bind(from, to);
        Ok(InputRef { graph: self, id: to })
    }

    fn bind(&self, from: OutputId, to: InputId) {
        self.inputs.borrow_mut()[to.0].source = Some(from);
        self.outputs.borrow_mut()[from.0].consumers.push(to);
        trace!(output = from.0, input = to.0, "edge registered");
    }

    fn grow_for_connection(&self, to: NodeId) -> Result<InputId, WiringError> {
        let (policy, block, n_in, n_out) = {
            let nodes = self.nodes.borrow();
            let entry = &nodes[to.0];
            (
                entry.policy,
                entry.grouping.block(),
                entry.inputs.len(),
                entry.outputs.len(),
            )
        };
        match policy {
            ConnectionPolicy::Fail => Err(WiringError::Saturated {
                node: self.node_name(to),
            }),
            ConnectionPolicy::AddInput => {
                Ok(self.insert_input(to, &format!("input_{n_in:02}"), true, false, None))
            }
            ConnectionPolicy::AddInputKeepOutput => {
                if n_out == 0 {
                    self.insert_output(to, OutputDecl::new("result"));
                }
                Ok(self.insert_input(to, &format!("input_{n_in:02}"), true, false, None))
            }
            ConnectionPolicy::AddInputOutputPair => {
                if n_in % block == 0 {
                    self.insert_output(to, OutputDecl::new(&format!("output_{n_out:02}")));
                }
                Ok(self.insert_input(to, &format!("input_{n_in:02}"), true, false, None))
            }
        }
    }

    /// Freezes the topology: topological sort, type inference, allocation.
    ///
    /// Any failure aborts the close and leaves the graph open with its
    /// existing descriptors and buffers intact. Closing a closed graph is a
    /// no-op.
    pub fn close(&self) -> Result<(), CloseError> {
        if self.is_closed() {
            return Ok(());
        }
        let order = self.topo_order()?;
        debug!(graph = %self.name, "type-inference pass");
        for &id in &order {
            self.infer_node(id)?;
        }
        debug!(graph = %self.name, "allocation pass");
        for &id in &order {
            self.allocate_node(id)?;
        }
        self.phase.set(Phase::Closed);
        let nodes = self.nodes.borrow();
        for entry in nodes.iter() {
            entry.flags.tainted.set(true);
            entry.flags.frozen.set(false);
            entry.flags.frozen_tainted.set(false);
        }
        debug!(graph = %self.name, nodes = order.len(), "graph closed");
        Ok(())
    }

    /// Reopens a closed graph for topology changes. Descriptors and buffers
    /// are kept so the next close can reuse matching allocations.
    pub fn open(&self) {
        if self.phase.get() == Phase::Open {
            return;
        }
        self.phase.set(Phase::Open);
        debug!(graph = %self.name, "graph reopened");
    }

    /// Kahn's algorithm over the wired edges, in node-insertion order.
    fn topo_order(&self) -> Result<Vec<NodeId>, CloseError> {
        let nodes = self.nodes.borrow();
        let inputs = self.inputs.borrow();
        let outputs = self.outputs.borrow();
        let n = nodes.len();
        let mut indegree = vec![0usize; n];
        for port in inputs.iter() {
            if port.source.is_some() {
                indegree[port.node.0] += 1;
            }
        }
        let mut queue: VecDeque<usize> = (0..n).filter(|&i| indegree[i] == 0).collect();
        let mut order = Vec::with_capacity(n);
        let mut seen = vec![false; n];
        while let Some(i) = queue.pop_front() {
            order.push(NodeId(i));
            seen[i] = true;
            for &oid in &nodes[i].outputs {
                for &cons in &outputs[oid.0].consumers {
                    let consumer = inputs[cons.0].node;
                    indegree[consumer.0] -= 1;
                    if indegree[consumer.0] == 0 {
                        queue.push_back(consumer.0);
                    }
                }
            }
        }
        if order.len() < n {
            let stuck = (0..n).find(|&i| !seen[i]).unwrap_or(0);
            return Err(CloseError::Cycle {
                node: nodes[stuck].name.clone(),
            });
        }
        Ok(order)
    }

    fn infer_node(&self, id: NodeId) -> Result<(), TypeFunctionError> {
        trace!(node = %self.node_name(id), "running type function");
        {
            let nodes = self.nodes.borrow();
            let mut behavior = nodes[id.0].behavior.borrow_mut();
            let mut ctx = TypeCtx { graph: self, node: id };
            behavior.infer(&mut ctx)?;
        }
        // Every output must leave inference with a descriptor.
        let missing = {
            let nodes = self.nodes.borrow();
            let outputs = self.outputs.borrow();
            nodes[id.0]
                .outputs
                .iter()
                .copied()
                .find(|oid| outputs[oid.0].dd.is_none())
                .map(|oid| outputs[oid.0].name.clone())
        };
        if let Some(output) = missing {
            return Err(TypeFunctionError::MissingDescriptor {
                node: self.node_name(id),
                output,
            });
        }
        Ok(())
    }

    fn allocate_node(&self, id: NodeId) -> Result<(), AllocationError> {
        let node_name = self.node_name(id);
        let (out_ids, in_ids): (Vec<OutputId>, Vec<InputId>) = {
            let nodes = self.nodes.borrow();
            let entry = &nodes[id.0];
            (
                entry.outputs.to_vec(),
                entry.inputs.iter().chain(entry.named.iter()).copied().collect(),
            )
        };
        for &oid in &out_ids {
            let (dd, allocatable, forbid, alias, existing, out_name) = {
                let outputs = self.outputs.borrow();
                let port = &outputs[oid.0];
                (
                    port.dd.clone().expect("descriptor checked after inference"),
                    port.allocatable,
                    port.forbid_reallocation,
                    port.alias_of_input,
                    port.buffer,
                    port.name.clone(),
                )
            };
            if dd.shape.has_zero_dim() {
                return Err(AllocationError::ZeroSized {
                    node: node_name.clone(),
                    output: out_name,
                    shape: dd.shape.dims().to_vec(),
                });
            }
            if let Some(pos) = alias {
                // View aliasing: expose the source buffer of one input.
                let upstream = {
                    let nodes = self.nodes.borrow();
                    let inputs = self.inputs.borrow();
                    let outputs = self.outputs.borrow();
                    nodes[id.0]
                        .inputs
                        .get(pos)
                        .and_then(|iid| inputs[iid.0].source)
                        .and_then(|src| outputs[src.0].buffer)
                };
                let Some(bid) = upstream else {
                    return Err(AllocationError::NoStorage {
                        node: node_name.clone(),
                        output: out_name,
                    });
                };
                let mut outputs = self.outputs.borrow_mut();
                outputs[oid.0].buffer = Some(bid);
                outputs[oid.0].owns_buffer = false;
                continue;
            }
            let sibling = {
                let inputs = self.inputs.borrow();
                in_ids
                    .iter()
                    .copied()
                    .find(|iid| inputs[iid.0].sibling == Some(oid))
            };
            if let Some(iid) = sibling {
                // One allocation backs both the scratch input and the result
                // output that exposes it.
                let bid = self.obtain_buffer(existing, &dd, forbid, &node_name, &out_name)?;
                let mut outputs = self.outputs.borrow_mut();
                outputs[oid.0].buffer = Some(bid);
                outputs[oid.0].owns_buffer = false;
                drop(outputs);
                self.inputs.borrow_mut()[iid.0].buffer = Some(bid);
                continue;
            }
            if !allocatable {
                return Err(AllocationError::NoStorage {
                    node: node_name.clone(),
                    output: out_name,
                });
            }
            let bid = self.obtain_buffer(existing, &dd, forbid, &node_name, &out_name)?;
            let mut outputs = self.outputs.borrow_mut();
            outputs[oid.0].buffer = Some(bid);
            outputs[oid.0].owns_buffer = true;
        }
        // Private scratch inputs without a sibling output take their size
        // from the connected source's descriptor.
        for &iid in &in_ids {
            let (allocatable, sibling, existing, source, in_name) = {
                let inputs = self.inputs.borrow();
                let port = &inputs[iid.0];
                (
                    port.allocatable,
                    port.sibling,
                    port.buffer,
                    port.source,
                    port.name.clone(),
                )
            };
            if !allocatable || sibling.is_some() {
                continue;
            }
            let dd = source.and_then(|src| self.outputs.borrow()[src.0].dd.clone());
            let Some(dd) = dd else {
                return Err(AllocationError::UnsizedScratch {
                    node: node_name.clone(),
                    input: in_name,
                });
            };
            let bid = self.obtain_buffer(existing, &dd, false, &node_name, &in_name)?;
            self.inputs.borrow_mut()[iid.0].buffer = Some(bid);
        }
        Ok(())
    }

    /// Reuses a previous allocation when dtype and size still match;
    /// otherwise allocates, unless the port pins its buffer identity.
    fn obtain_buffer(
        &self,
        existing: Option<BufferId>,
        dd: &DataDescriptor,
        forbid: bool,
        node: &str,
        port: &str,
    ) -> Result<BufferId, AllocationError> {
        let wanted = dd.shape.num_elements();
        if let Some(bid) = existing {
            let fits = {
                let buffers = self.buffers.borrow();
                let buf = buffers[bid.0].borrow();
                buf.dtype() == dd.dtype && buf.len() == wanted
            };
            if fits {
                trace!(node, port, "buffer reused");
                return Ok(bid);
            }
            if forbid {
                return Err(AllocationError::ForbiddenReallocation {
                    node: node.to_string(),
                    output: port.to_string(),
                });
            }
            self.buffers.borrow_mut()[bid.0] =
                Rc::new(RefCell::new(Buffer::zeros(dd.dtype, wanted)));
            return Ok(bid);
        }
        let bid = BufferId(self.buffers.borrow().len());
        self.buffers
            .borrow_mut()
            .push(Rc::new(RefCell::new(Buffer::zeros(dd.dtype, wanted))));
        trace!(node, port, len = wanted, "buffer allocated");
        Ok(bid)
    }

    fn handle(&self, bid: BufferId) -> BufferHandle {
        BufferHandle::new(Rc::clone(&self.buffers.borrow()[bid.0]))
    }

    /// Marks a node stale and propagates downstream.
    ///
    /// A direct taint (user mutation) overrides the node's own freeze; a
    /// propagated taint is absorbed by frozen nodes and latched for replay.
    pub(crate) fn taint_node(&self, id: NodeId, direct: bool) {
        {
            let nodes = self.nodes.borrow();
            let flags = &nodes[id.0].flags;
            if direct {
                flags.frozen.set(false);
                flags.frozen_tainted.set(false);
            } else {
                if flags.frozen.get() {
                    flags.frozen_tainted.set(true);
                    trace!(node = %nodes[id.0].name, "taint absorbed by frozen node");
                    return;
                }
                if flags.tainted.get() {
                    return;
                }
            }
            flags.tainted.set(true);
            trace!(node = %nodes[id.0].name, "tainted");
        }
        let consumers: Vec<NodeId> = {
            let nodes = self.nodes.borrow();
            let inputs = self.inputs.borrow();
            let outputs = self.outputs.borrow();
            nodes[id.0]
                .outputs
                .iter()
                .flat_map(|oid| outputs[oid.0].consumers.iter())
                .map(|iid| inputs[iid.0].node)
                .collect()
        };
        for consumer in consumers {
            self.taint_node(consumer, false);
        }
    }

    /// Pull evaluation: recomputes the stale upstream chain of `id`, then
    /// `id` itself, clearing taint on the way. Clean and frozen nodes are
    /// left untouched, so repeated pulls are cheap.
    pub(crate) fn touch_node(&self, id: NodeId) -> Result<(), EvalError> {
        self.ensure_closed()?;
        {
            let nodes = self.nodes.borrow();
            let flags = &nodes[id.0].flags;
            if flags.frozen.get() || !flags.tainted.get() {
                return Ok(());
            }
        }
        let upstream: Vec<NodeId> = {
            let nodes = self.nodes.borrow();
            let inputs = self.inputs.borrow();
            let outputs = self.outputs.borrow();
            let entry = &nodes[id.0];
            entry
                .inputs
                .iter()
                .chain(entry.named.iter())
                .filter_map(|iid| inputs[iid.0].source)
                .map(|src| outputs[src.0].node)
                .collect()
        };
        for dep in upstream {
            self.touch_node(dep)?;
        }
        let name = self.node_name(id);
        trace!(node = %name, "computing");
        {
            let nodes = self.nodes.borrow();
            let mut behavior = nodes[id.0].behavior.borrow_mut();
            let mut ctx = EvalCtx { graph: self, node: id };
            behavior
                .compute(&mut ctx)
                .map_err(|source| EvalError::Compute {
                    node: name.clone(),
                    source,
                })?;
        }
        self.nodes.borrow()[id.0].flags.tainted.set(false);
        Ok(())
    }

    pub(crate) fn freeze_node(&self, id: NodeId) -> Result<(), EvalError> {
        let nodes = self.nodes.borrow();
        let flags = &nodes[id.0].flags;
        if flags.frozen.get() {
            return Ok(());
        }
        if flags.tainted.get() {
            return Err(EvalError::FreezeTainted {
                node: nodes[id.0].name.clone(),
            });
        }
        flags.frozen.set(true);
        flags.frozen_tainted.set(false);
        trace!(node = %nodes[id.0].name, "frozen");
        Ok(())
    }

    pub(crate) fn unfreeze_node(&self, id: NodeId) {
        let replay = {
            let nodes = self.nodes.borrow();
            let flags = &nodes[id.0].flags;
            if !flags.frozen.get() {
                return;
            }
            flags.frozen.set(false);
            let latched = flags.frozen_tainted.get();
            flags.frozen_tainted.set(false);
            latched
        };
        if replay {
            self.taint_node(id, true);
        }
    }

    fn resolve_input(&self, node: NodeId, key: PortKey<'_>) -> Option<InputId> {
        match key {
            PortKey::Index(idx) => self.nodes.borrow()[node.0].inputs.get(idx).copied(),
            PortKey::Name(name) => self.find_input(node, name),
        }
    }

    fn resolve_output(&self, node: NodeId, key: PortKey<'_>) -> Option<OutputId> {
        match key {
            PortKey::Index(idx) => self.nodes.borrow()[node.0].outputs.get(idx).copied(),
            PortKey::Name(name) => self.find_output(node, name),
        }
    }
}

/// Cheap copyable handle to one node of a graph.
#[derive(Clone, Copy)]
pub struct NodeRef<'g> {
    pub(crate) graph: &'g Graph,
    pub(crate) id: NodeId,
}

impl<'g> NodeRef<'g> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> String {
        self.graph.node_name(self.id)
    }

    /// Number of positional inputs currently declared.
    pub fn num_inputs(&self) -> usize {
        self.graph.nodes.borrow()[self.id.0].inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.graph.nodes.borrow()[self.id.0].outputs.len()
    }

    /// Handle to the `idx`-th output, panicking when out of range.
    pub fn output(&self, idx: usize) -> OutputRef<'g> {
        let id = self
            .graph
            .resolve_output(self.id, PortKey::Index(idx))
            .unwrap_or_else(|| panic!("node '{}' has no output {idx}", self.name()));
        OutputRef {
            graph: self.graph,
            id,
        }
    }

    pub fn output_by_name(&self, name: &str) -> Option<OutputRef<'g>> {
        self.graph
            .find_output(self.id, name)
            .map(|id| OutputRef {
                graph: self.graph,
                id,
            })
    }

    /// Handle to the `idx`-th positional input, panicking when out of range.
    pub fn input(&self, idx: usize) -> InputRef<'g> {
        let id = self
            .graph
            .resolve_input(self.id, PortKey::Index(idx))
            .unwrap_or_else(|| panic!("node '{}' has no input {idx}", self.name()));
        InputRef {
            graph: self.graph,
            id,
        }
    }

    pub fn input_by_name(&self, name: &str) -> Option<InputRef<'g>> {
        self.graph.find_input(self.id, name).map(|id| InputRef {
            graph: self.graph,
            id,
        })
    }

    pub fn is_tainted(&self) -> bool {
        self.graph.nodes.borrow()[self.id.0].flags.tainted.get()
    }

    pub fn is_frozen(&self) -> bool {
        self.graph.nodes.borrow()[self.id.0].flags.frozen.get()
    }

    /// Marks this node stale, clearing any freeze, and propagates downstream.
    pub fn taint(&self) {
        self.graph.taint_node(self.id, true);
    }

    /// Evaluates the stale upstream chain and then this node.
    pub fn touch(&self) -> Result<(), EvalError> {
        self.graph.touch_node(self.id)
    }

    /// Pins the node's current results; upstream taint is absorbed until
    /// [`NodeRef::unfreeze`]. Freezing a stale node is refused.
    pub fn freeze(&self) -> Result<(), EvalError> {
        self.graph.freeze_node(self.id)
    }

    /// Lifts a freeze; any taint absorbed while frozen is replayed.
    pub fn unfreeze(&self) {
        self.graph.unfreeze_node(self.id);
    }
}

/// Cheap copyable handle to one output port.
#[derive(Clone, Copy)]
pub struct OutputRef<'g> {
    pub(crate) graph: &'g Graph,
    pub(crate) id: OutputId,
}

impl<'g> OutputRef<'g> {
    pub fn id(&self) -> OutputId {
        self.id
    }

    pub fn name(&self) -> String {
        self.graph.outputs.borrow()[self.id.0].name.clone()
    }

    pub fn node(&self) -> NodeRef<'g> {
        NodeRef {
            graph: self.graph,
            id: self.graph.outputs.borrow()[self.id.0].node,
        }
    }

    /// The descriptor set by the last successful close.
    pub fn dd(&self) -> Result<DataDescriptor, PhaseError> {
        self.graph.outputs.borrow()[self.id.0]
            .dd
            .clone()
            .ok_or_else(|| PhaseError::Open {
                graph: self.graph.name.clone(),
            })
    }

    /// Pulls fresh data: evaluates the stale upstream chain, then returns a
    /// handle to this output's buffer.
    pub fn data(&self) -> Result<BufferHandle, EvalError> {
        let owner = self.graph.outputs.borrow()[self.id.0].node;
        self.graph.touch_node(owner)?;
        Ok(self.buffer().expect("closed graph has allocated buffers"))
    }

    /// The output's buffer as-is, without evaluating anything.
    pub fn buffer(&self) -> Option<BufferHandle> {
        self.graph.outputs.borrow()[self.id.0]
            .buffer
            .map(|bid| self.graph.handle(bid))
    }
}

/// Cheap copyable handle to one input port.
#[derive(Clone, Copy)]
pub struct InputRef<'g> {
    pub(crate) graph: &'g Graph,
    pub(crate) id: InputId,
}

impl std::fmt::Debug for InputRef<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InputRef").field("id", &self.id).finish()
    }
}

impl<'g> InputRef<'g> {
    pub fn id(&self) -> InputId {
        self.id
    }

    pub fn name(&self) -> String {
        self.graph.inputs.borrow()[self.id.0].name.clone()
    }

    pub fn node(&self) -> NodeRef<'g> {
        NodeRef {
            graph: self.graph,
            id: self.graph.inputs.borrow()[self.id.0].node,
        }
    }

    /// The producing output, once connected.
    pub fn source(&self) -> Option<OutputRef<'g>> {
        self.graph.inputs.borrow()[self.id.0].source.map(|id| OutputRef {
            graph: self.graph,
            id,
        })
    }
}

/// `output >> node` wires the output into the node's next free positional
/// input, panicking on wiring errors; use [`Graph::connect`] for the
/// fallible form.
impl<'g> Shr<NodeRef<'g>> for OutputRef<'g> {
    type Output = InputRef<'g>;

    fn shr(self, rhs: NodeRef<'g>) -> InputRef<'g> {
        self.graph
            .connect(self.id, rhs.id)
            .unwrap_or_else(|err| panic!("wiring failed: {err}"))
    }
}

/// `output >> input` wires the output into one specific input port.
impl<'g> Shr<InputRef<'g>> for OutputRef<'g> {
    type Output = InputRef<'g>;

    fn shr(self, rhs: InputRef<'g>) -> InputRef<'g> {
        self.graph
            .connect_input(self.id, rhs.id)
            .unwrap_or_else(|err| panic!("wiring failed: {err}"))
    }
}

/// `(a, b) >> node` wires each output in order.
impl<'g> Shr<NodeRef<'g>> for (OutputRef<'g>, OutputRef<'g>) {
    type Output = NodeRef<'g>;

    fn shr(self, rhs: NodeRef<'g>) -> NodeRef<'g> {
        self.0 >> rhs;
        self.1 >> rhs;
        rhs
    }
}

/// `(a, b, c) >> node` wires each output in order.
impl<'g> Shr<NodeRef<'g>> for (OutputRef<'g>, OutputRef<'g>, OutputRef<'g>) {
    type Output = NodeRef<'g>;

    fn shr(self, rhs: NodeRef<'g>) -> NodeRef<'g> {
        self.0 >> rhs;
        self.1 >> rhs;
        self.2 >> rhs;
        rhs
    }
}

/// Node-facing view of the graph during the type-inference pass.
///
/// Type functions read the descriptors of connected inputs and must set a
/// descriptor on every output; they may instead alias an output to one of
/// the inputs, turning the output into a view.
pub struct TypeCtx<'g> {
    graph: &'g Graph,
    node: NodeId,
}

impl<'g> TypeCtx<'g> {
    pub fn node_name(&self) -> String {
        self.graph.node_name(self.node)
    }

    /// Number of positional inputs.
    pub fn num_inputs(&self) -> usize {
        self.graph.nodes.borrow()[self.node.0].inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.graph.nodes.borrow()[self.node.0].outputs.len()
    }

    /// Block size of the node's input grouping.
    pub fn block(&self) -> usize {
        self.graph.nodes.borrow()[self.node.0].grouping.block()
    }

    /// Name of the addressed input, for error messages.
    pub fn input_name<'k>(&self, key: impl Into<PortKey<'k>>) -> String {
        let key = key.into();
        match self.graph.resolve_input(self.node, key) {
            Some(id) => self.graph.inputs.borrow()[id.0].name.clone(),
            None => format!("{key:?}"),
        }
    }

    /// Whether the addressed input exists and has a source, for optional
    /// named inputs.
    pub fn input_connected<'k>(&self, key: impl Into<PortKey<'k>>) -> bool {
        self.graph
            .resolve_input(self.node, key.into())
            .map(|id| self.graph.inputs.borrow()[id.0].source.is_some())
            .unwrap_or(false)
    }

    /// Descriptor of the addressed input's source output.
    pub fn input_dd<'k>(
        &self,
        key: impl Into<PortKey<'k>>,
    ) -> Result<DataDescriptor, TypeFunctionError> {
        let key = key.into();
        let id = self
            .graph
            .resolve_input(self.node, key)
            .ok_or_else(|| TypeFunctionError::Unconnected {
                node: self.node_name(),
                input: format!("{key:?}"),
            })?;
        let source = self.graph.inputs.borrow()[id.0].source;
        let source = source.ok_or_else(|| TypeFunctionError::Unconnected {
            node: self.node_name(),
            input: self.graph.inputs.borrow()[id.0].name.clone(),
        })?;
        self.graph.outputs.borrow()[source.0]
            .dd
            .clone()
            .ok_or_else(|| TypeFunctionError::Unconnected {
                node: self.node_name(),
                input: self.graph.inputs.borrow()[id.0].name.clone(),
            })
    }

    /// Id of the addressed input's source output, for axis identity refs.
    pub fn input_source<'k>(
        &self,
        key: impl Into<PortKey<'k>>,
    ) -> Result<OutputId, TypeFunctionError> {
        let key = key.into();
        let id = self
            .graph
            .resolve_input(self.node, key)
            .ok_or_else(|| TypeFunctionError::Unconnected {
                node: self.node_name(),
                input: format!("{key:?}"),
            })?;
        self.graph.inputs.borrow()[id.0]
            .source
            .ok_or_else(|| TypeFunctionError::Unconnected {
                node: self.node_name(),
                input: self.graph.inputs.borrow()[id.0].name.clone(),
            })
    }

    /// Sets the descriptor of the addressed output.
    pub fn set_output_dd<'k>(&mut self, key: impl Into<PortKey<'k>>, dd: DataDescriptor) {
        let key = key.into();
        let id = self
            .graph
            .resolve_output(self.node, key)
            .unwrap_or_else(|| panic!("node '{}' has no output {key:?}", self.node_name()));
        self.graph.outputs.borrow_mut()[id.0].dd = Some(dd);
    }

    /// Turns output `out` into a view of positional input `input`: the
    /// descriptor is copied and the allocation pass binds the output to the
    /// input's source buffer.
    pub fn alias_output_to_input(
        &mut self,
        out: usize,
        input: usize,
    ) -> Result<(), TypeFunctionError> {
        let dd = self.input_dd(input)?;
        let id = self
            .graph
            .resolve_output(self.node, PortKey::Index(out))
            .unwrap_or_else(|| panic!("node '{}' has no output {out}", self.node_name()));
        let mut outputs = self.graph.outputs.borrow_mut();
        outputs[id.0].dd = Some(dd);
        outputs[id.0].alias_of_input = Some(input);
        Ok(())
    }
}

/// Node-facing view of the graph during evaluation.
///
/// All upstream nodes are already computed when a compute function runs;
/// the context resolves port keys to buffer handles.
pub struct EvalCtx<'g> {
    graph: &'g Graph,
    node: NodeId,
}

impl<'g> EvalCtx<'g> {
    pub fn node_name(&self) -> String {
        self.graph.node_name(self.node)
    }

    /// Number of positional inputs.
    pub fn num_inputs(&self) -> usize {
        self.graph.nodes.borrow()[self.node.0].inputs.len()
    }

    pub fn num_outputs(&self) -> usize {
        self.graph.nodes.borrow()[self.node.0].outputs.len()
    }

    /// Buffer of the addressed input: the connected source's buffer, or the
    /// input's private scratch buffer when it has one and no source.
    pub fn input<'k>(&self, key: impl Into<PortKey<'k>>) -> anyhow::Result<BufferHandle> {
        let key = key.into();
        let id = self
            .graph
            .resolve_input(self.node, key)
            .ok_or_else(|| anyhow!("node '{}' has no input {key:?}", self.node_name()))?;
        let (source, scratch, name) = {
            let inputs = self.graph.inputs.borrow();
            let port = &inputs[id.0];
            (port.source, port.buffer, port.name.clone())
        };
        if let Some(src) = source {
            let bid = self.graph.outputs.borrow()[src.0]
                .buffer
                .ok_or_else(|| anyhow!("source of input '{name}' has no buffer"))?;
            return Ok(self.graph.handle(bid));
        }
        scratch
            .map(|bid| self.graph.handle(bid))
            .ok_or_else(|| anyhow!("input '{name}' of node '{}' has no data", self.node_name()))
    }

    /// Buffer of the addressed output.
    pub fn output<'k>(&self, key: impl Into<PortKey<'k>>) -> anyhow::Result<BufferHandle> {
        let key = key.into();
        let id = self
            .graph
            .resolve_output(self.node, key)
            .ok_or_else(|| anyhow!("node '{}' has no output {key:?}", self.node_name()))?;
        self.graph.outputs.borrow()[id.0]
            .buffer
            .map(|bid| self.graph.handle(bid))
            .ok_or_else(|| {
                anyhow!("output {key:?} of node '{}' has no buffer", self.node_name())
            })
    }

    /// Freezes this node as a post-condition of the current computation.
    /// The pending taint is cleared by the runtime right after compute
    /// returns, so the freeze takes effect on a clean node.
    pub fn freeze_self(&self) {
        let nodes = self.graph.nodes.borrow();
        let flags = &nodes[self.node.0].flags;
        flags.frozen.set(true);
        flags.frozen_tainted.set(false);
    }
}
