//! Reusable validation helpers for type functions.
//!
//! Library nodes compose these inside [`crate::node::NodeFunction::infer`]
//! instead of hand-writing the same arity, dtype and shape checks. Every
//! helper names the offending node and port in its error so a failed close
//! is diagnosable without re-running.

use crate::descriptor::DataDescriptor;
use crate::error::TypeFunctionError;
use crate::graph::TypeCtx;
use crate::port::PortKey;
use crate::shape::Shape;

/// Classification of a covariance-style input: either a full square matrix
/// or its diagonal stored as a vector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatrixForm {
    Diagonal { n: usize },
    Square { n: usize },
}

impl MatrixForm {
    pub fn n(&self) -> usize {
        match self {
            MatrixForm::Diagonal { n } | MatrixForm::Square { n } => *n,
        }
    }
}

/// The node must have at least one positional input.
pub fn check_has_inputs(ctx: &TypeCtx<'_>) -> Result<(), TypeFunctionError> {
    if ctx.num_inputs() == 0 {
        return Err(TypeFunctionError::NoInputs {
            node: ctx.node_name(),
        });
    }
    Ok(())
}

/// The node must have exactly `expected` positional inputs.
pub fn check_inputs_number(ctx: &TypeCtx<'_>, expected: usize) -> Result<(), TypeFunctionError> {
    let actual = ctx.num_inputs();
    if actual != expected {
        return Err(TypeFunctionError::InputCount {
            node: ctx.node_name(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// The node must have exactly `expected` outputs.
pub fn check_outputs_number(ctx: &TypeCtx<'_>, expected: usize) -> Result<(), TypeFunctionError> {
    let actual = ctx.num_outputs();
    if actual != expected {
        return Err(TypeFunctionError::OutputCount {
            node: ctx.node_name(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// The positional input count must be a whole number of `multiple`-sized
/// blocks (and non-zero).
pub fn check_inputs_multiplicity(
    ctx: &TypeCtx<'_>,
    multiple: usize,
) -> Result<(), TypeFunctionError> {
    let count = ctx.num_inputs();
    if count == 0 || count % multiple != 0 {
        return Err(TypeFunctionError::BlockArity {
            node: ctx.node_name(),
            block: multiple,
            count,
        });
    }
    Ok(())
}

/// The addressed input must carry data of the given rank.
pub fn check_input_dimension<'k>(
    ctx: &TypeCtx<'_>,
    key: impl Into<PortKey<'k>> + Copy,
    rank: usize,
) -> Result<(), TypeFunctionError> {
    let dd = ctx.input_dd(key)?;
    if dd.shape.rank() != rank {
        return Err(TypeFunctionError::Dimension {
            node: ctx.node_name(),
            input: ctx.input_name(key),
            expected: rank,
            actual: dd.shape.dims().to_vec(),
        });
    }
    Ok(())
}

/// All positional inputs must share one dtype.
pub fn check_inputs_same_dtype(ctx: &TypeCtx<'_>) -> Result<(), TypeFunctionError> {
    check_has_inputs(ctx)?;
    let first = ctx.input_dd(0)?;
    for idx in 1..ctx.num_inputs() {
        let dd = ctx.input_dd(idx)?;
        if dd.dtype != first.dtype {
            return Err(TypeFunctionError::Dtype {
                node: ctx.node_name(),
                input: ctx.input_name(idx),
                expected: first.dtype,
                actual: dd.dtype,
            });
        }
    }
    Ok(())
}

/// All positional inputs must share one shape.
pub fn check_inputs_same_shape(ctx: &TypeCtx<'_>) -> Result<(), TypeFunctionError> {
    check_has_inputs(ctx)?;
    let first = ctx.input_dd(0)?;
    for idx in 1..ctx.num_inputs() {
        let dd = ctx.input_dd(idx)?;
        if dd.shape != first.shape {
            return Err(TypeFunctionError::ShapeMismatch {
                node: ctx.node_name(),
                input: ctx.input_name(idx),
                expected: first.shape.dims().to_vec(),
                actual: dd.shape.dims().to_vec(),
            });
        }
    }
    Ok(())
}

/// All positional inputs must be fully equivalent: same dtype, same shape
/// and the same axis references (compared by output identity).
pub fn check_inputs_equivalence(ctx: &TypeCtx<'_>) -> Result<(), TypeFunctionError> {
    check_inputs_same_dtype(ctx)?;
    check_inputs_same_shape(ctx)?;
    let first = ctx.input_dd(0)?;
    for idx in 1..ctx.num_inputs() {
        let dd = ctx.input_dd(idx)?;
        if dd.axes_edges != first.axes_edges || dd.axes_meshes != first.axes_meshes {
            return Err(TypeFunctionError::BadEdges {
                node: ctx.node_name(),
                output: ctx.input_name(idx),
                reason: "axis references differ between inputs".to_string(),
            });
        }
    }
    Ok(())
}

/// The addressed input must be a square matrix or a 1-d diagonal; reports
/// which of the two it is along with the dimension.
pub fn check_input_square_or_diag<'k>(
    ctx: &TypeCtx<'_>,
    key: impl Into<PortKey<'k>> + Copy,
) -> Result<MatrixForm, TypeFunctionError> {
    let dd = ctx.input_dd(key)?;
    match *dd.shape.dims() {
        [n] => Ok(MatrixForm::Diagonal { n }),
        [r, c] if r == c => Ok(MatrixForm::Square { n: r }),
        _ => Err(TypeFunctionError::NotSquareOrDiag {
            node: ctx.node_name(),
            input: ctx.input_name(key),
            shape: dd.shape.dims().to_vec(),
        }),
    }
}

/// The left input (a matrix or a diagonal) must be multiplicable with the
/// right input (a vector or a matrix); returns the product's shape.
pub fn check_inputs_multiplicable<'a, 'b>(
    ctx: &TypeCtx<'_>,
    left: impl Into<PortKey<'a>> + Copy,
    right: impl Into<PortKey<'b>> + Copy,
) -> Result<Shape, TypeFunctionError> {
    let ldd = ctx.input_dd(left)?;
    let rdd = ctx.input_dd(right)?;
    let mismatch = || TypeFunctionError::NotMultiplicable {
        node: ctx.node_name(),
        left: ctx.input_name(left),
        left_shape: ldd.shape.dims().to_vec(),
        right: ctx.input_name(right),
        right_shape: rdd.shape.dims().to_vec(),
    };
    match (ldd.shape.dims(), rdd.shape.dims()) {
        // Diagonal times anything with a matching leading dimension keeps
        // the right operand's shape.
        ([n], rdims) if rdims.first() == Some(n) => Ok(Shape::new(rdims.to_vec())),
        ([r, c], [m]) if c == m => Ok(Shape::new([*r])),
        ([r, c], [m, k]) if c == m => Ok(Shape::new([*r, *k])),
        _ => Err(mismatch()),
    }
}

/// Copies the source descriptor of `input` onto `output` unchanged.
pub fn copy_from_input_to_output<'a, 'b>(
    ctx: &mut TypeCtx<'_>,
    input: impl Into<PortKey<'a>> + Copy,
    output: impl Into<PortKey<'b>> + Copy,
) -> Result<(), TypeFunctionError> {
    let dd = ctx.input_dd(input)?;
    ctx.set_output_dd(output, dd);
    Ok(())
}

/// Mesh arrays carry one sample point per bin: the mesh must be 1-d with
/// exactly `data_len` points.
pub fn check_mesh_length(
    ctx: &TypeCtx<'_>,
    output: &str,
    data_len: usize,
    mesh_dd: &DataDescriptor,
) -> Result<(), TypeFunctionError> {
    if mesh_dd.shape.rank() != 1 || mesh_dd.shape.num_elements() != data_len {
        return Err(TypeFunctionError::BadEdges {
            node: ctx.node_name(),
            output: output.to_string(),
            reason: format!(
                "expected a 1-d mesh of {} points, got shape {:?}",
                data_len,
                mesh_dd.shape.dims()
            ),
        });
    }
    Ok(())
}

/// Histogram edge arrays bracket the bins: for `data_len` bins the edges
/// array must hold `data_len + 1` points.
pub fn check_edges_length(
    ctx: &TypeCtx<'_>,
    output: &str,
    data_len: usize,
    edges_dd: &DataDescriptor,
) -> Result<(), TypeFunctionError> {
    if edges_dd.shape.rank() != 1 || edges_dd.shape.num_elements() != data_len + 1 {
        return Err(TypeFunctionError::BadEdges {
            node: ctx.node_name(),
            output: output.to_string(),
            reason: format!(
                "expected a 1-d edges array of {} points, got shape {:?}",
                data_len + 1,
                edges_dd.shape.dims()
            ),
        });
    }
    Ok(())
}
