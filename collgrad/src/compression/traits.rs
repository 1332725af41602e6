//! Compression hook around collective calls.

use crate::error::Result;
use crate::tensor::Tensor;
use crate::types::DataType;

/// State a compressor needs to undo its own `compress`.
///
/// Lives for one forward/backward pair and is never persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionContext {
    /// Element type before compression, if it was changed.
    pub original_dtype: Option<DataType>,
}

/// Trait for tensor compressors applied before dispatch and undone after
/// synchronization.
pub trait Compressor: Send + Sync {
    /// Compress `tensor` into a new tensor plus the context to restore it.
    fn compress(&self, tensor: &Tensor) -> Result<(Tensor, CompressionContext)>;

    /// Restore a tensor produced by a collective over compressed inputs.
    fn decompress(&self, tensor: &Tensor, ctx: &CompressionContext) -> Result<Tensor>;
}
