//! Enumerates the scalar element types supported by port buffers.

use std::fmt;

/// Logical dtype identifier shared between descriptors and buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DType {
    /// 64-bit floating point, the working dtype of the numeric nodes.
    F64,
    /// 32-bit floating point.
    F32,
    /// 32-bit signed integer, primarily for index-like data.
    I32,
}

impl DType {
    /// Returns the number of bytes required per scalar element.
    pub fn size_in_bytes(self) -> usize {
        match self {
            DType::F64 => 8,
            DType::F32 | DType::I32 => 4,
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DType::F64 => "f64",
            DType::F32 => "f32",
            DType::I32 => "i32",
        };
        f.write_str(name)
    }
}
