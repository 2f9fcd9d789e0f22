//! Flat, byte-backed data buffers with typed views.
//!
//! Buffers are allocated once during the graph's allocation pass and live in
//! an arena of reference-counted cells; buffer identity is the allocation
//! itself, which is what the reallocation discipline is checked against.

use std::cell::{Ref, RefCell, RefMut};
use std::mem::{size_of, ManuallyDrop};
use std::rc::Rc;

use crate::dtype::DType;

/// A flat, zero-initialized array of scalars of one dtype.
#[derive(Debug)]
pub struct Buffer {
    dtype: DType,
    len: usize,
    data: Vec<u8>,
}

impl Buffer {
    /// Allocates a zeroed buffer of `len` elements.
    pub fn zeros(dtype: DType, len: usize) -> Self {
        let data = match dtype {
            DType::F64 => vec_into_bytes(vec![0.0f64; len]),
            DType::F32 => vec_into_bytes(vec![0.0f32; len]),
            DType::I32 => vec_into_bytes(vec![0i32; len]),
        };
        Buffer { dtype, len, data }
    }

    /// Returns the scalar dtype of the stored elements.
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Returns the number of stored elements.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Reports whether the buffer holds zero elements.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Borrows the elements as `f64`, panicking if the dtype differs.
    pub fn as_f64(&self) -> &[f64] {
        match self.dtype {
            DType::F64 => bytes_as_slice::<f64>(&self.data),
            other => panic!("buffer holds {other}, not f64"),
        }
    }

    /// Mutably borrows the elements as `f64`, panicking if the dtype differs.
    pub fn as_f64_mut(&mut self) -> &mut [f64] {
        match self.dtype {
            DType::F64 => bytes_as_slice_mut::<f64>(&mut self.data),
            other => panic!("buffer holds {other}, not f64"),
        }
    }

    /// Borrows the elements as `f32`, panicking if the dtype differs.
    pub fn as_f32(&self) -> &[f32] {
        match self.dtype {
            DType::F32 => bytes_as_slice::<f32>(&self.data),
            other => panic!("buffer holds {other}, not f32"),
        }
    }

    /// Mutably borrows the elements as `f32`, panicking if the dtype differs.
    pub fn as_f32_mut(&mut self) -> &mut [f32] {
        match self.dtype {
            DType::F32 => bytes_as_slice_mut::<f32>(&mut self.data),
            other => panic!("buffer holds {other}, not f32"),
        }
    }

    /// Borrows the elements as `i32`, panicking if the dtype differs.
    pub fn as_i32(&self) -> &[i32] {
        match self.dtype {
            DType::I32 => bytes_as_slice::<i32>(&self.data),
            other => panic!("buffer holds {other}, not i32"),
        }
    }

    /// Mutably borrows the elements as `i32`, panicking if the dtype differs.
    pub fn as_i32_mut(&mut self) -> &mut [i32] {
        match self.dtype {
            DType::I32 => bytes_as_slice_mut::<i32>(&mut self.data),
            other => panic!("buffer holds {other}, not i32"),
        }
    }
}

/// Shared handle to one buffer slot in the graph's arena.
///
/// Holding a handle keeps the allocation alive but does not borrow it; the
/// typed views borrow on demand, so a handle can be kept across evaluations.
#[derive(Debug, Clone)]
pub struct BufferHandle {
    cell: Rc<RefCell<Buffer>>,
}

impl BufferHandle {
    pub(crate) fn new(cell: Rc<RefCell<Buffer>>) -> Self {
        BufferHandle { cell }
    }

    /// Borrows the contents as `f64`.
    pub fn f64(&self) -> Ref<'_, [f64]> {
        Ref::map(self.cell.borrow(), Buffer::as_f64)
    }

    /// Mutably borrows the contents as `f64`.
    pub fn f64_mut(&self) -> RefMut<'_, [f64]> {
        RefMut::map(self.cell.borrow_mut(), Buffer::as_f64_mut)
    }

    /// Borrows the contents as `f32`.
    pub fn f32(&self) -> Ref<'_, [f32]> {
        Ref::map(self.cell.borrow(), Buffer::as_f32)
    }

    /// Mutably borrows the contents as `f32`.
    pub fn f32_mut(&self) -> RefMut<'_, [f32]> {
        RefMut::map(self.cell.borrow_mut(), Buffer::as_f32_mut)
    }

    /// Borrows the contents as `i32`.
    pub fn i32(&self) -> Ref<'_, [i32]> {
        Ref::map(self.cell.borrow(), Buffer::as_i32)
    }

    /// Mutably borrows the contents as `i32`.
    pub fn i32_mut(&self) -> RefMut<'_, [i32]> {
        RefMut::map(self.cell.borrow_mut(), Buffer::as_i32_mut)
    }

    /// Copies the contents out as an owned `Vec<f64>`.
    pub fn to_f64_vec(&self) -> Vec<f64> {
        self.f64().to_vec()
    }

    /// Reports whether two handles point at the same allocation.
    pub fn same_buffer(a: &BufferHandle, b: &BufferHandle) -> bool {
        Rc::ptr_eq(&a.cell, &b.cell)
    }
}

/// Converts an owned vector into a raw byte buffer without copying.
fn vec_into_bytes<T>(data: Vec<T>) -> Vec<u8> {
    let mut data = ManuallyDrop::new(data);
    let ptr = data.as_mut_ptr() as *mut u8;
    let len = data.len() * size_of::<T>();
    let cap = data.capacity() * size_of::<T>();
    unsafe { Vec::from_raw_parts(ptr, len, cap) }
}

/// Views a byte slice as a typed slice, asserting that the layout matches.
fn bytes_as_slice<T>(bytes: &[u8]) -> &[T] {
    assert_eq!(
        bytes.len() % size_of::<T>(),
        0,
        "byte length {} is not a multiple of element size {}",
        bytes.len(),
        size_of::<T>()
    );
    unsafe { std::slice::from_raw_parts(bytes.as_ptr() as *const T, bytes.len() / size_of::<T>()) }
}

/// Views a mutable byte slice as a typed mutable slice, asserting the layout.
fn bytes_as_slice_mut<T>(bytes: &mut [u8]) -> &mut [T] {
    assert_eq!(
        bytes.len() % size_of::<T>(),
        0,
        "byte length {} is not a multiple of element size {}",
        bytes.len(),
        size_of::<T>()
    );
    unsafe {
        std::slice::from_raw_parts_mut(bytes.as_mut_ptr() as *mut T, bytes.len() / size_of::<T>())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zeroed_views_round_trip() {
        let mut buf = Buffer::zeros(DType::F64, 3);
        assert_eq!(buf.as_f64(), &[0.0, 0.0, 0.0]);
        buf.as_f64_mut()[1] = 2.5;
        assert_eq!(buf.as_f64()[1], 2.5);
    }

    #[test]
    fn handle_identity_tracks_allocation() {
        let a = BufferHandle::new(Rc::new(RefCell::new(Buffer::zeros(DType::F64, 2))));
        let b = a.clone();
        let c = BufferHandle::new(Rc::new(RefCell::new(Buffer::zeros(DType::F64, 2))));
        assert!(BufferHandle::same_buffer(&a, &b));
        assert!(!BufferHandle::same_buffer(&a, &c));
    }
}
