//! Shared element-wise reduction primitives used by collective algorithms
//! and the CPU device adapter.

use crate::error::{Result, TesseraError};
use crate::types::{DataType, ReduceOp};

#[derive(Debug, Clone, Copy)]
enum Builtin {
    Sum,
    Prod,
    Min,
    Max,
}

/// Trait for types that support the four built-in reduction operations.
trait Reducible: Copy + 'static {
    fn reduce(a: Self, b: Self, op: Builtin) -> Self;
}

macro_rules! impl_reducible {
    (int: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: Builtin) -> Self {
                    match op {
                        Builtin::Sum => a.wrapping_add(b),
                        Builtin::Prod => a.wrapping_mul(b),
                        Builtin::Min => a.min(b),
                        Builtin::Max => a.max(b),
                    }
                }
            }
        )*
    };
    (float: $($ty:ty),*) => {
        $(
            impl Reducible for $ty {
                #[inline]
                fn reduce(a: Self, b: Self, op: Builtin) -> Self {
                    match op {
                        Builtin::Sum => a + b,
                        Builtin::Prod => a * b,
                        Builtin::Min => a.min(b),
                        Builtin::Max => a.max(b),
                    }
                }
            }
        )*
    };
}

impl_reducible!(int: i8, i32, i64, u8, u32, u64);
impl_reducible!(float: f32, f64);

/// Little-endian element codec (alignment-safe).
trait LeBytes: Sized {
    fn read_le(bytes: &[u8]) -> Self;
    fn write_le(self, bytes: &mut [u8]);
}

macro_rules! impl_le_bytes {
    ($($ty:ty),*) => {
        $(
            impl LeBytes for $ty {
                #[inline]
                fn read_le(bytes: &[u8]) -> Self {
                    let mut raw = [0u8; std::mem::size_of::<$ty>()];
                    raw.copy_from_slice(bytes);
                    Self::from_le_bytes(raw)
                }
                #[inline]
                fn write_le(self, bytes: &mut [u8]) {
                    bytes.copy_from_slice(&self.to_le_bytes());
                }
            }
        )*
    };
}

impl_le_bytes!(i8, i32, i64, u8, u32, u64, f32, f64);

/// Element-wise reduce on byte slices interpreted as `dtype` elements:
/// `dst[i] = op(dst[i], src[i])`.
///
/// Both slices must hold at least `count * dtype.size_in_bytes()` bytes.
/// `dst` is always the left operand, which matters for non-commutative
/// custom operators.
pub fn reduce_slice(
    dst: &mut [u8],
    src: &[u8],
    count: usize,
    dtype: DataType,
    op: ReduceOp,
) -> Result<()> {
    let bytes = count * dtype.size_in_bytes();
    if dst.len() < bytes || src.len() < bytes {
        return Err(TesseraError::BufferSizeMismatch {
            expected: bytes,
            actual: dst.len().min(src.len()),
        });
    }
    let (dst, src) = (&mut dst[..bytes], &src[..bytes]);

    let builtin = match op {
        ReduceOp::Sum => Builtin::Sum,
        ReduceOp::Prod => Builtin::Prod,
        ReduceOp::Min => Builtin::Min,
        ReduceOp::Max => Builtin::Max,
        ReduceOp::Custom(user) => return user.apply(dst, src, count, dtype),
    };

    match dtype {
        DataType::F32 => reduce_slice_typed::<f32>(dst, src, count, builtin),
        DataType::F64 => reduce_slice_typed::<f64>(dst, src, count, builtin),
        DataType::I32 => reduce_slice_typed::<i32>(dst, src, count, builtin),
        DataType::I64 => reduce_slice_typed::<i64>(dst, src, count, builtin),
        DataType::U32 => reduce_slice_typed::<u32>(dst, src, count, builtin),
        DataType::U64 => reduce_slice_typed::<u64>(dst, src, count, builtin),
        DataType::I8 => reduce_slice_typed::<i8>(dst, src, count, builtin),
        DataType::U8 => reduce_slice_typed::<u8>(dst, src, count, builtin),
    }
    Ok(())
}

fn reduce_slice_typed<T: Reducible + LeBytes>(
    dst: &mut [u8],
    src: &[u8],
    count: usize,
    op: Builtin,
) {
    let t_size = std::mem::size_of::<T>();
    for i in 0..count {
        let off = i * t_size;
        let a = T::read_le(&dst[off..off + t_size]);
        let b = T::read_le(&src[off..off + t_size]);
        T::reduce(a, b, op).write_le(&mut dst[off..off + t_size]);
    }
}
