//! Lightweight wrapper for port shapes and dimension bookkeeping.

/// Stores the logical dimensions of a port's data.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Shape {
    dims: Vec<usize>,
}

impl Shape {
    /// Constructs a new shape from the provided dimensions.
    pub fn new<D: Into<Vec<usize>>>(dims: D) -> Self {
        Shape { dims: dims.into() }
    }

    /// Borrow the raw dimension slice for downstream calculations.
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Returns the rank (number of axes) of the shape.
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Computes the total number of elements implied by the shape.
    pub fn num_elements(&self) -> usize {
        self.dims.iter().product()
    }

    /// Reports whether any dimension is zero-sized.
    pub fn has_zero_dim(&self) -> bool {
        self.dims.iter().any(|&d| d == 0)
    }

    /// Reports whether the shape describes a square matrix.
    pub fn is_square(&self) -> bool {
        self.rank() == 2 && self.dims[0] == self.dims[1]
    }
}

impl From<Shape> for Vec<usize> {
    fn from(shape: Shape) -> Self {
        shape.dims
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn element_count_follows_dims() {
        assert_eq!(Shape::new([3, 5]).num_elements(), 15);
        assert_eq!(Shape::new([4]).rank(), 1);
        assert!(Shape::new([2, 2]).is_square());
        assert!(!Shape::new([2, 3]).is_square());
        assert!(Shape::new([3, 0]).has_zero_dim());
    }
}
