//! Error kinds surfaced by the graph lifecycle.
//!
//! All of these are fail-fast: they abort the current lifecycle phase and
//! carry enough context (node name, port name, expected vs actual) to
//! diagnose without re-running. The runtime never retries on its own.

use thiserror::Error;

use crate::dtype::DType;

/// Raised when an operation is attempted in the wrong graph phase.
#[derive(Debug, Error)]
pub enum PhaseError {
    #[error("graph '{graph}' is closed; topology can no longer change")]
    Closed { graph: String },
    #[error("graph '{graph}' is open; close it before evaluating")]
    Open { graph: String },
}

/// Raised while registering an edge between an output and an input.
#[derive(Debug, Error)]
pub enum WiringError {
    #[error(transparent)]
    Phase(#[from] PhaseError),
    #[error("node '{node}' has no free positional input and does not grow on demand")]
    Saturated { node: String },
    #[error("node '{node}' has no input named '{input}'")]
    NoSuchInput { node: String, input: String },
    #[error("input '{input}' of node '{node}' is already connected")]
    AlreadyConnected { node: String, input: String },
}

/// Raised by the type-inference pass; names the node and the violated
/// constraint. A failing inference aborts the close and leaves the graph
/// open.
#[derive(Debug, Error)]
pub enum TypeFunctionError {
    #[error("node '{node}' must have at least one positional input")]
    NoInputs { node: String },
    #[error("node '{node}' expects {expected} inputs, got {actual}")]
    InputCount {
        node: String,
        expected: usize,
        actual: usize,
    },
    #[error("node '{node}' expects {expected} outputs, got {actual}")]
    OutputCount {
        node: String,
        expected: usize,
        actual: usize,
    },
    #[error("input '{input}' of node '{node}' is not connected")]
    Unconnected { node: String, input: String },
    #[error("input '{input}' of node '{node}' must be {expected}-d, got shape {actual:?}")]
    Dimension {
        node: String,
        input: String,
        expected: usize,
        actual: Vec<usize>,
    },
    #[error("input '{input}' of node '{node}' has dtype {actual}, expected {expected}")]
    Dtype {
        node: String,
        input: String,
        expected: DType,
        actual: DType,
    },
    #[error("input '{input}' of node '{node}' has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        node: String,
        input: String,
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
    #[error("input '{input}' of node '{node}' must be a square matrix or a diagonal, got shape {shape:?}")]
    NotSquareOrDiag {
        node: String,
        input: String,
        shape: Vec<usize>,
    },
    #[error(
        "inputs '{left}' ({left_shape:?}) and '{right}' ({right_shape:?}) of node '{node}' \
         are not multiplicable"
    )]
    NotMultiplicable {
        node: String,
        left: String,
        left_shape: Vec<usize>,
        right: String,
        right_shape: Vec<usize>,
    },
    #[error("node '{node}' takes inputs in blocks of {block}, got {count}")]
    BlockArity {
        node: String,
        block: usize,
        count: usize,
    },
    #[error("output '{output}' of node '{node}' was left without a descriptor")]
    MissingDescriptor { node: String, output: String },
    #[error("edges of output '{output}' of node '{node}' are inconsistent: {reason}")]
    BadEdges {
        node: String,
        output: String,
        reason: String,
    },
}

/// Raised by the allocation pass.
#[derive(Debug, Error)]
pub enum AllocationError {
    #[error("output '{output}' of node '{node}' has a zero-sized dimension: {shape:?}")]
    ZeroSized {
        node: String,
        output: String,
        shape: Vec<usize>,
    },
    #[error("output '{output}' of node '{node}' forbids reallocation but its descriptor changed")]
    ForbiddenReallocation { node: String, output: String },
    #[error("output '{output}' of node '{node}' is not allocatable and received no buffer")]
    NoStorage { node: String, output: String },
    #[error("scratch input '{input}' of node '{node}' has no descriptor to size its buffer")]
    UnsizedScratch { node: String, input: String },
}

/// Raised by `Graph::close`. On error the graph remains open.
#[derive(Debug, Error)]
pub enum CloseError {
    #[error("dependency cycle through node '{node}'")]
    Cycle { node: String },
    #[error(transparent)]
    Type(#[from] TypeFunctionError),
    #[error(transparent)]
    Alloc(#[from] AllocationError),
}

/// Raised during evaluation (`touch`/`data`) or liveness transitions.
#[derive(Debug, Error)]
pub enum EvalError {
    #[error(transparent)]
    Phase(#[from] PhaseError),
    #[error("node '{node}' failed to evaluate")]
    Compute {
        node: String,
        #[source]
        source: anyhow::Error,
    },
    #[error("cannot freeze node '{node}' while it is tainted")]
    FreezeTainted { node: String },
}
