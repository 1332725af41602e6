//! Element-wise kernels over little-endian byte buffers.

use crate::types::DataType;

use super::element::{Combine, Element, with_element};

/// `dst[i] = combine(dst[i], src[i])` for every element.
///
/// Both slices must hold the same number of `dtype` elements.
pub(crate) fn combine_into(dst: &mut [u8], src: &[u8], dtype: DataType, how: Combine) {
    with_element!(dtype, T => combine_typed::<T>(dst, src, how))
}

fn combine_typed<T: Element>(dst: &mut [u8], src: &[u8], how: Combine) {
    let t_size = T::DTYPE.size_in_bytes();
    for (d, s) in dst.chunks_exact_mut(t_size).zip(src.chunks_exact(t_size)) {
        let r = T::combine(T::read_le(d), T::read_le(s), how);
        r.write_le(d);
    }
}

/// Multiply every element by `factor`, rounding for integer types.
pub(crate) fn scale_in_place(buf: &mut [u8], dtype: DataType, factor: f64) {
    if factor == 1.0 {
        return;
    }
    with_element!(dtype, T => scale_typed::<T>(buf, factor))
}

fn scale_typed<T: Element>(buf: &mut [u8], factor: f64) {
    let t_size = T::DTYPE.size_in_bytes();
    for chunk in buf.chunks_exact_mut(t_size) {
        T::from_f64(T::read_le(chunk).to_f64() * factor).write_le(chunk);
    }
}

/// Widen every element to f64.
pub(crate) fn to_f64_vec(bytes: &[u8], dtype: DataType) -> Vec<f64> {
    with_element!(dtype, T => {
        bytes
            .chunks_exact(T::DTYPE.size_in_bytes())
            .map(|c| T::read_le(c).to_f64())
            .collect()
    })
}

/// Narrow f64 values into a `dtype` byte buffer.
pub(crate) fn from_f64_slice(values: &[f64], dtype: DataType) -> Vec<u8> {
    with_element!(dtype, T => {
        let t_size = T::DTYPE.size_in_bytes();
        let mut out = vec![0u8; values.len() * t_size];
        for (chunk, &v) in out.chunks_exact_mut(t_size).zip(values) {
            T::from_f64(v).write_le(chunk);
        }
        out
    })
}

/// Convert a buffer between element types.
pub(crate) fn cast(bytes: &[u8], from: DataType, to: DataType) -> Vec<u8> {
    if from == to {
        return bytes.to_vec();
    }
    from_f64_slice(&to_f64_vec(bytes, from), to)
}

/// Copy a strided view into a fresh row-major buffer.
///
/// `strides` are in elements.
pub(crate) fn gather_strided(
    bytes: &[u8],
    shape: &[usize],
    strides: &[usize],
    elem_size: usize,
) -> Vec<u8> {
    let numel: usize = shape.iter().product();
    let mut out = Vec::with_capacity(numel * elem_size);
    if numel == 0 {
        return out;
    }
    let mut index = vec![0usize; shape.len()];
    for _ in 0..numel {
        let src: usize = index.iter().zip(strides).map(|(i, s)| i * s).sum();
        let off = src * elem_size;
        out.extend_from_slice(&bytes[off..off + elem_size]);
        // Advance the multi-index, last axis fastest.
        for axis in (0..shape.len()).rev() {
            index[axis] += 1;
            if index[axis] < shape[axis] {
                break;
            }
            index[axis] = 0;
        }
    }
    out
}

/// Row-major strides for `shape`, in elements.
pub(crate) fn contiguous_strides(shape: &[usize]) -> Vec<usize> {
    let mut strides = vec![1usize; shape.len()];
    for axis in (0..shape.len().saturating_sub(1)).rev() {
        strides[axis] = strides[axis + 1] * shape[axis + 1].max(1);
    }
    strides
}
