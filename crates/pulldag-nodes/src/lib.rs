//! Library nodes for the pulldag runtime.
//!
//! Each node implements [`pulldag::NodeFunction`] and nothing else; graph
//! mechanics (wiring, taint, allocation) stay in the runtime crate. Builders
//! return the node handle plus, where the node has out-of-band state (stored
//! values, concatenation offsets, a random generator), a control handle
//! sharing that state.

pub mod arithmetic;
pub mod array;
pub mod cholesky;
pub mod concat;
pub mod montecarlo;
pub mod normalize;
pub mod view;

pub use arithmetic::{Product, Sum};
pub use array::{Array, ArrayHandle, ArrayI32Handle};
pub use cholesky::Cholesky;
pub use concat::{Concatenation, OffsetsHandle};
pub use montecarlo::{McMode, MonteCarlo, MonteCarloHandle};
pub use normalize::NormalizeCorrelatedVars;
pub use view::View;
