//! Connection endpoints and the ids used to address them.
//!
//! All graph entities live in arenas owned by [`crate::graph::Graph`] and are
//! addressed by plain index ids. Ports never own their storage directly; they
//! hold a [`BufferId`] into the graph's buffer arena, which keeps aliasing
//! (a view output exposing an upstream buffer, or an input and output of one
//! node sharing a scratch array) free of ownership ambiguity.

use crate::descriptor::DataDescriptor;

/// Addresses a port of one node either positionally or by name.
///
/// Positional indices resolve against the ordered positional input (or
/// output) list; names resolve against every port of the node, including
/// the non-positional ones.
#[derive(Debug, Clone, Copy)]
pub enum PortKey<'a> {
    Index(usize),
    Name(&'a str),
}

impl From<usize> for PortKey<'static> {
    fn from(idx: usize) -> Self {
        PortKey::Index(idx)
    }
}

impl<'a> From<&'a str> for PortKey<'a> {
    fn from(name: &'a str) -> Self {
        PortKey::Name(name)
    }
}

/// Identifies a node within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) usize);

/// Identifies an input port within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InputId(pub(crate) usize);

/// Identifies an output port within its graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct OutputId(pub(crate) usize);

/// Identifies a buffer slot in the graph's buffer arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferId(pub(crate) usize);

/// Consumer side of an edge. Connects to exactly one producer output.
#[derive(Debug)]
pub(crate) struct InputPort {
    pub name: String,
    pub node: NodeId,
    /// Positional inputs are filled in order by the connection operator;
    /// named inputs are only reachable through `connect_named`.
    pub positional: bool,
    pub source: Option<OutputId>,
    /// An allocatable input owns a private scratch buffer instead of (or in
    /// addition to) referencing an upstream output.
    pub allocatable: bool,
    pub buffer: Option<BufferId>,
    /// Sibling output sharing the scratch buffer: the node exposes its
    /// working array as a readable result without copying.
    pub sibling: Option<OutputId>,
}

/// Producer side of an edge. Fans out to any number of inputs.
#[derive(Debug)]
pub(crate) struct OutputPort {
    pub name: String,
    pub node: NodeId,
    pub consumers: Vec<InputId>,
    /// Set by the type-inference pass; absent while the graph never closed.
    pub dd: Option<DataDescriptor>,
    pub buffer: Option<BufferId>,
    pub allocatable: bool,
    /// Whether the allocation pass created this buffer for the output, as
    /// opposed to the output exposing somebody else's storage.
    pub owns_buffer: bool,
    /// Once set, the allocation pass must keep the buffer identity stable
    /// across passes; the owning node writes into that exact array in place.
    pub forbid_reallocation: bool,
    /// View-style aliasing: expose the buffer of the given positional input's
    /// source instead of allocating.
    pub alias_of_input: Option<usize>,
}
