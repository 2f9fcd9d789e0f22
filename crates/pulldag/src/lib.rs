//! Lazy, pull-based computation graphs with taint propagation.
//!
//! Nodes with typed, multi-port inputs and outputs are wired into a directed
//! graph while it is open; closing the graph runs a topological
//! type-inference pass followed by buffer allocation, after which requesting
//! an output's data evaluates exactly the stale part of its upstream chain.

pub mod buffer;
pub mod descriptor;
pub mod dtype;
pub mod error;
pub mod graph;
pub mod infer;
pub mod node;
pub mod port;
pub mod shape;
pub mod strategy;

pub use buffer::{Buffer, BufferHandle};
pub use descriptor::DataDescriptor;
pub use dtype::DType;
pub use graph::{EvalCtx, Graph, InputRef, NodeRef, OutputRef, TypeCtx};
pub use node::{InputDecl, NodeFunction, NodeInit, OutputDecl};
pub use port::{BufferId, InputId, NodeId, OutputId, PortKey};
pub use shape::Shape;
pub use strategy::{ConnectionPolicy, Grouping};
