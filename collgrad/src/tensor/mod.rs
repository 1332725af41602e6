//! The tensor boundary consumed by the collective layer.
//!
//! A [`Tensor`] is a cheap, clonable reference to shared storage: cloning it
//! hands out another owner of the same buffer, which is what the handle table
//! relies on to keep operands alive while an engine works on them
//! asynchronously. Operations that produce new data (`narrow`, `to_dtype`,
//! `deep_clone`, ...) allocate fresh storage.

mod element;
pub(crate) mod kernels;

pub use element::{Bf16, Combine, Element, F16};

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::{CollError, Result};
use crate::types::{DataType, Device};

#[derive(Debug, Clone)]
struct Storage {
    data: Vec<u8>,
    shape: Vec<usize>,
    /// Element strides. Row-major unless produced by a layout-changing view.
    strides: Vec<usize>,
    dtype: DataType,
    device: Device,
}

impl Storage {
    fn is_contiguous(&self) -> bool {
        if self.shape.iter().product::<usize>() <= 1 {
            return true;
        }
        self.shape
            .iter()
            .zip(&self.strides)
            .zip(kernels::contiguous_strides(&self.shape))
            .all(|((&dim, &s), expected)| dim <= 1 || s == expected)
    }

    fn contiguous_bytes(&self) -> Vec<u8> {
        if self.is_contiguous() {
            self.data.clone()
        } else {
            kernels::gather_strided(
                &self.data,
                &self.shape,
                &self.strides,
                self.dtype.size_in_bytes(),
            )
        }
    }
}

/// Stable identity of a tensor's storage, used to key gradients.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TensorId(usize);

/// Shared-storage n-dimensional tensor.
#[derive(Clone)]
pub struct Tensor {
    inner: Arc<RwLock<Storage>>,
}

impl std::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.inner.read() {
            Ok(s) => f
                .debug_struct("Tensor")
                .field("shape", &s.shape)
                .field("dtype", &s.dtype)
                .field("device", &s.device)
                .finish(),
            Err(_) => f.write_str("Tensor(<poisoned>)"),
        }
    }
}

impl Tensor {
    fn from_storage(storage: Storage) -> Self {
        Self {
            inner: Arc::new(RwLock::new(storage)),
        }
    }

    fn from_bytes(data: Vec<u8>, shape: Vec<usize>, dtype: DataType, device: Device) -> Self {
        let strides = kernels::contiguous_strides(&shape);
        Self::from_storage(Storage {
            data,
            shape,
            strides,
            dtype,
            device,
        })
    }

    /// Build a host tensor from row-major values.
    pub fn from_slice<T: Element>(values: &[T], shape: &[usize]) -> Result<Self> {
        let numel: usize = shape.iter().product();
        if numel != values.len() {
            return Err(CollError::ShapeMismatch {
                operation: "from_slice",
                expected: shape.to_vec(),
                actual: vec![values.len()],
            });
        }
        let t_size = T::DTYPE.size_in_bytes();
        let mut data = vec![0u8; numel * t_size];
        for (chunk, &v) in data.chunks_exact_mut(t_size).zip(values) {
            v.write_le(chunk);
        }
        Ok(Self::from_bytes(data, shape.to_vec(), T::DTYPE, Device::Cpu))
    }

    /// One-dimensional host tensor.
    pub fn vector<T: Element>(values: &[T]) -> Self {
        let t_size = T::DTYPE.size_in_bytes();
        let mut data = vec![0u8; values.len() * t_size];
        for (chunk, &v) in data.chunks_exact_mut(t_size).zip(values) {
            v.write_le(chunk);
        }
        Self::from_bytes(data, vec![values.len()], T::DTYPE, Device::Cpu)
    }

    pub fn zeros(shape: &[usize], dtype: DataType, device: Device) -> Self {
        let numel: usize = shape.iter().product();
        Self::from_bytes(
            vec![0u8; numel * dtype.size_in_bytes()],
            shape.to_vec(),
            dtype,
            device,
        )
    }

    /// Tensor with every element set to `value` (rounded for integer types).
    #[cfg(test)]
    pub(crate) fn full(shape: &[usize], value: f64, dtype: DataType, device: Device) -> Self {
        let numel: usize = shape.iter().product();
        let data = kernels::from_f64_slice(&vec![value; numel], dtype);
        Self::from_bytes(data, shape.to_vec(), dtype, device)
    }

    /// Zero-filled tensor with this tensor's shape, type and device.
    pub fn zeros_like(&self) -> Result<Self> {
        let s = self.read()?;
        Ok(Self::zeros(&s.shape, s.dtype, s.device))
    }

    /// Empty (zero-row) tensor of this type and device, for outputs the
    /// engine resizes itself.
    pub fn new_empty(&self) -> Result<Self> {
        let s = self.read()?;
        Ok(Self::zeros(&[0], s.dtype, s.device))
    }

    pub fn shape(&self) -> Result<Vec<usize>> {
        Ok(self.read()?.shape.clone())
    }

    pub fn dtype(&self) -> Result<DataType> {
        Ok(self.read()?.dtype)
    }

    pub fn device(&self) -> Result<Device> {
        Ok(self.read()?.device)
    }

    #[cfg(test)]
    pub(crate) fn numel(&self) -> Result<usize> {
        Ok(self.read()?.shape.iter().product())
    }

    /// Extent of axis 0 (1 for scalars).
    pub fn dim0(&self) -> Result<usize> {
        Ok(self.read()?.shape.first().copied().unwrap_or(1))
    }

    pub fn is_contiguous(&self) -> Result<bool> {
        Ok(self.read()?.is_contiguous())
    }

    pub fn id(&self) -> TensorId {
        TensorId(Arc::as_ptr(&self.inner) as *const () as usize)
    }

    /// True if both tensors reference the same buffer.
    pub fn same_storage(&self, other: &Tensor) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Copy the values out as `T`, which must match the tensor's type.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        let s = self.read()?;
        if s.dtype != T::DTYPE {
            return Err(CollError::DTypeMismatch {
                operation: "to_vec",
                expected: s.dtype,
                actual: T::DTYPE,
            });
        }
        let bytes = s.contiguous_bytes();
        Ok(bytes
            .chunks_exact(T::DTYPE.size_in_bytes())
            .map(T::read_le)
            .collect())
    }

    /// Copy the values out widened to f64, whatever the element type.
    pub fn to_f64_vec(&self) -> Result<Vec<f64>> {
        let s = self.read()?;
        Ok(kernels::to_f64_vec(&s.contiguous_bytes(), s.dtype))
    }

    /// Independent copy with its own storage.
    pub fn deep_clone(&self) -> Result<Self> {
        Ok(Self::from_storage(self.read()?.clone()))
    }

    /// Copy placed on `device`.
    pub fn to_device(&self, device: Device) -> Result<Self> {
        let mut s = self.read()?.clone();
        s.device = device;
        Ok(Self::from_storage(s))
    }

    /// Copy converted to `dtype`, always contiguous.
    pub fn to_dtype(&self, dtype: DataType) -> Result<Self> {
        let s = self.read()?;
        let data = kernels::cast(&s.contiguous_bytes(), s.dtype, dtype);
        Ok(Self::from_bytes(data, s.shape.clone(), dtype, s.device))
    }

    /// Transposed copy of a 2-D tensor that keeps the source element order,
    /// i.e. a non-contiguous layout.
    pub fn transpose(&self) -> Result<Self> {
        let s = self.read()?;
        if s.shape.len() != 2 {
            return Err(CollError::ShapeMismatch {
                operation: "transpose",
                expected: vec![0, 0],
                actual: s.shape.clone(),
            });
        }
        let mut t = s.clone();
        t.shape.swap(0, 1);
        t.strides.swap(0, 1);
        Ok(Self::from_storage(t))
    }

    /// Row-major copy (or a cheap reference if already contiguous).
    pub fn contiguous(&self) -> Result<Self> {
        let s = self.read()?;
        if s.is_contiguous() {
            return Ok(self.clone());
        }
        Ok(Self::from_bytes(
            s.contiguous_bytes(),
            s.shape.clone(),
            s.dtype,
            s.device,
        ))
    }

    /// Copy of rows `[start, start + len)` along axis 0.
    pub fn narrow(&self, start: usize, len: usize) -> Result<Self> {
        let s = self.read()?;
        let rows = s.shape.first().copied().unwrap_or(0);
        if start + len > rows {
            return Err(CollError::ShapeMismatch {
                operation: "narrow",
                expected: vec![start + len],
                actual: s.shape.clone(),
            });
        }
        let row_bytes = row_elems(&s.shape) * s.dtype.size_in_bytes();
        let bytes = s.contiguous_bytes();
        let data = bytes[start * row_bytes..(start + len) * row_bytes].to_vec();
        let mut shape = s.shape.clone();
        shape[0] = len;
        Ok(Self::from_bytes(data, shape, s.dtype, s.device))
    }

    /// Concatenate along axis 0. All parts must agree on type, device and
    /// trailing dimensions.
    pub fn cat(parts: &[Tensor]) -> Result<Self> {
        let first = parts.first().ok_or(CollError::EmptyGroup { operation: "cat" })?;
        let (dtype, device, trailing) = {
            let s = first.read()?;
            (s.dtype, s.device, s.shape.get(1..).unwrap_or(&[]).to_vec())
        };
        let mut rows = 0;
        let mut data = Vec::new();
        for part in parts {
            let s = part.read()?;
            if s.dtype != dtype {
                return Err(CollError::DTypeMismatch {
                    operation: "cat",
                    expected: dtype,
                    actual: s.dtype,
                });
            }
            if s.shape.get(1..).unwrap_or(&[]) != trailing.as_slice() {
                return Err(CollError::ShapeMismatch {
                    operation: "cat",
                    expected: trailing.clone(),
                    actual: s.shape.get(1..).unwrap_or(&[]).to_vec(),
                });
            }
            rows += s.shape.first().copied().unwrap_or(1);
            data.extend_from_slice(&s.contiguous_bytes());
        }
        let mut shape = vec![rows];
        shape.extend_from_slice(&trailing);
        Ok(Self::from_bytes(data, shape, dtype, device))
    }

    /// In-place element-wise `self += other`.
    pub fn add_(&self, other: &Tensor) -> Result<()> {
        let (src, src_shape, src_dtype) = {
            let o = other.read()?;
            (o.contiguous_bytes(), o.shape.clone(), o.dtype)
        };
        let mut s = self.write()?;
        if s.shape != src_shape {
            return Err(CollError::ShapeMismatch {
                operation: "add_",
                expected: s.shape.clone(),
                actual: src_shape,
            });
        }
        if s.dtype != src_dtype {
            return Err(CollError::DTypeMismatch {
                operation: "add_",
                expected: s.dtype,
                actual: src_dtype,
            });
        }
        make_contiguous(&mut s);
        let dtype = s.dtype;
        kernels::combine_into(&mut s.data, &src, dtype, Combine::Sum);
        Ok(())
    }

    /// In-place multiply by a scalar.
    pub fn scale_(&self, factor: f64) -> Result<()> {
        let mut s = self.write()?;
        let dtype = s.dtype;
        kernels::scale_in_place(&mut s.data, dtype, factor);
        Ok(())
    }

    /// In-place zero fill.
    pub fn zero_(&self) -> Result<()> {
        let mut s = self.write()?;
        s.data.iter_mut().for_each(|b| *b = 0);
        Ok(())
    }

    // ── crate-internal access used by engines and the autograd layer ──

    /// Row-major bytes, element type and shape in one consistent read.
    pub(crate) fn snapshot(&self) -> Result<(Vec<u8>, DataType, Vec<usize>)> {
        let s = self.read()?;
        Ok((s.contiguous_bytes(), s.dtype, s.shape.clone()))
    }

    /// Replace contents and shape (the output may be resized). Element type
    /// and device are kept.
    pub(crate) fn store(&self, data: Vec<u8>, shape: Vec<usize>) -> Result<()> {
        let mut s = self.write()?;
        s.strides = kernels::contiguous_strides(&shape);
        s.data = data;
        s.shape = shape;
        Ok(())
    }

    fn read(&self) -> Result<RwLockReadGuard<'_, Storage>> {
        self.inner
            .read()
            .map_err(|_| CollError::LockPoisoned("tensor storage"))
    }

    fn write(&self) -> Result<RwLockWriteGuard<'_, Storage>> {
        self.inner
            .write()
            .map_err(|_| CollError::LockPoisoned("tensor storage"))
    }
}

/// Number of elements in one axis-0 row.
pub(crate) fn row_elems(shape: &[usize]) -> usize {
    shape.get(1..).map_or(1, |t| t.iter().product())
}

fn make_contiguous(s: &mut Storage) {
    if !s.is_contiguous() {
        s.data = s.contiguous_bytes();
        s.strides = kernels::contiguous_strides(&s.shape);
    }
}
