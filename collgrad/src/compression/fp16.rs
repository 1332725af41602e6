//! Half-precision compressor: floating tensors travel as f16.

use crate::error::Result;
use crate::tensor::Tensor;
use crate::types::DataType;

use super::traits::{CompressionContext, Compressor};

/// Casts floating-point tensors to f16 for the collective and back to their
/// original type afterwards. Other tensors pass through.
#[derive(Debug, Clone, Copy, Default)]
pub struct Fp16Compressor;

impl Compressor for Fp16Compressor {
    fn compress(&self, tensor: &Tensor) -> Result<(Tensor, CompressionContext)> {
        let dtype = tensor.dtype()?;
        if !dtype.is_float() || dtype == DataType::F16 {
            return Ok((tensor.clone(), CompressionContext::default()));
        }
        let ctx = CompressionContext {
            original_dtype: Some(dtype),
        };
        Ok((tensor.to_dtype(DataType::F16)?, ctx))
    }

    fn decompress(&self, tensor: &Tensor, ctx: &CompressionContext) -> Result<Tensor> {
        match ctx.original_dtype {
            Some(dtype) => tensor.to_dtype(dtype),
            None => Ok(tensor.clone()),
        }
    }
}
