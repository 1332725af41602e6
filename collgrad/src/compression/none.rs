//! Identity (no-op) compressor. Passes tensors through unmodified.

use crate::error::Result;
use crate::tensor::Tensor;

use super::traits::{CompressionContext, Compressor};

/// No-op compressor. The default for every differentiable collective.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoCompression;

impl Compressor for NoCompression {
    fn compress(&self, tensor: &Tensor) -> Result<(Tensor, CompressionContext)> {
        Ok((tensor.clone(), CompressionContext::default()))
    }

    fn decompress(&self, tensor: &Tensor, _ctx: &CompressionContext) -> Result<Tensor> {
        Ok(tensor.clone())
    }
}
