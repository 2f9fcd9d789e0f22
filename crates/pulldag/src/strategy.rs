//! Policies governing how a node's port lists grow when over-connected.
//!
//! Both policies are plain capability values attached at node construction;
//! the connection operator consults them when an output is wired to a node
//! with no remaining free positional input.

/// What to do when a node runs out of free positional inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPolicy {
    /// Fixed arity: over-connection is a wiring error.
    Fail,
    /// Append exactly one new positional input.
    AddInput,
    /// Append a new input; create the single shared `result` output on
    /// first use (variadic reducers).
    AddInputKeepOutput,
    /// Append a new input and, at each block boundary, a paired output
    /// (one result per connected group).
    AddInputOutputPair,
}

/// How a node interprets its positional inputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Grouping {
    /// Each input stands on its own.
    Single,
    /// All positional inputs form one unordered group feeding one result.
    ManyToOne,
    /// Positional inputs form fixed-size tuples, one result per tuple.
    BlockToOne { block: usize },
}

impl Grouping {
    /// Block size used when pairing outputs to input groups.
    pub fn block(&self) -> usize {
        match self {
            Grouping::BlockToOne { block } => *block,
            _ => 1,
        }
    }
}
