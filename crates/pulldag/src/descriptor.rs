//! Per-port metadata: element type, shape and optional axis references.

use crate::dtype::DType;
use crate::port::OutputId;
use crate::shape::Shape;

/// Describes the data carried by a port: dtype, shape and, for
/// histogram-like data, the outputs holding the axis edges and meshes.
///
/// Edges and meshes are compared by the identity of the referenced output,
/// never by value; two descriptors sharing an edges array must point at the
/// same producing output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataDescriptor {
    pub dtype: DType,
    pub shape: Shape,
    pub axes_edges: Vec<OutputId>,
    pub axes_meshes: Vec<OutputId>,
}

impl DataDescriptor {
    /// Constructs a descriptor without axis metadata.
    pub fn new(dtype: DType, shape: Shape) -> Self {
        DataDescriptor {
            dtype,
            shape,
            axes_edges: Vec::new(),
            axes_meshes: Vec::new(),
        }
    }

    /// Attaches axis-edge references (one per dimension).
    pub fn with_edges(mut self, edges: Vec<OutputId>) -> Self {
        self.axes_edges = edges;
        self
    }

    /// Attaches axis-mesh references (one per dimension).
    pub fn with_meshes(mut self, meshes: Vec<OutputId>) -> Self {
        self.axes_meshes = meshes;
        self
    }

    /// Two descriptors are compatible when dtype and shape match exactly.
    pub fn compatible(&self, other: &DataDescriptor) -> bool {
        self.dtype == other.dtype && self.shape == other.shape
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compatibility_ignores_axes() {
        let a = DataDescriptor::new(DType::F64, Shape::new([4]));
        let b = DataDescriptor::new(DType::F64, Shape::new([4])).with_edges(vec![OutputId(7)]);
        let c = DataDescriptor::new(DType::I32, Shape::new([4]));
        assert!(a.compatible(&b));
        assert!(!a.compatible(&c));
        assert_ne!(a, b);
    }
}
