use std::sync::Arc;

use crate::client::CollectiveClient;
use crate::compression::{CompressionContext, Compressor};
use crate::error::Result;
use crate::tensor::Tensor;

/// A collective paired with its reverse-mode rule.
///
/// `forward` maps inputs to outputs and may keep whatever it needs for the
/// backward pass. `backward` maps one cotangent per output to one cotangent
/// per input. Both sides issue their communication through `client`, so
/// every rank must run the same sequence of forward and backward calls.
pub trait CollectiveFunction: Send + Sync {
    fn op_name(&self) -> &'static str;

    fn forward(&mut self, client: &CollectiveClient, inputs: &[Tensor]) -> Result<Vec<Tensor>>;

    fn backward(&self, client: &CollectiveClient, grad_outputs: &[Tensor]) -> Result<Vec<Tensor>>;
}

/// Runs `inner` on compressed tensors.
///
/// Forward compresses the inputs and decompresses the outputs; backward
/// does the same to the cotangents, so gradients come back in the input's
/// original element type.
pub struct Compressed<F> {
    inner: F,
    compressor: Arc<dyn Compressor>,
}

impl<F: CollectiveFunction> Compressed<F> {
    pub fn new(inner: F, compressor: Arc<dyn Compressor>) -> Self {
        Self { inner, compressor }
    }

    fn compress_all(&self, tensors: &[Tensor]) -> Result<(Vec<Tensor>, Vec<CompressionContext>)> {
        let mut compressed = Vec::with_capacity(tensors.len());
        let mut contexts = Vec::with_capacity(tensors.len());
        for t in tensors {
            let (c, ctx) = self.compressor.compress(t)?;
            compressed.push(c);
            contexts.push(ctx);
        }
        Ok((compressed, contexts))
    }

    /// Output `i` is restored with context `i`, or the last one when a
    /// single input fans out.
    fn decompress_all(&self, tensors: &[Tensor], contexts: &[CompressionContext]) -> Result<Vec<Tensor>> {
        tensors
            .iter()
            .enumerate()
            .map(|(i, t)| {
                let ctx = contexts.get(i).or(contexts.last()).copied().unwrap_or_default();
                self.compressor.decompress(t, &ctx)
            })
            .collect()
    }
}

impl<F: CollectiveFunction> CollectiveFunction for Compressed<F> {
    fn op_name(&self) -> &'static str {
        self.inner.op_name()
    }

    fn forward(&mut self, client: &CollectiveClient, inputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let (compressed, contexts) = self.compress_all(inputs)?;
        let outputs = self.inner.forward(client, &compressed)?;
        self.decompress_all(&outputs, &contexts)
    }

    fn backward(&self, client: &CollectiveClient, grad_outputs: &[Tensor]) -> Result<Vec<Tensor>> {
        let (compressed, contexts) = self.compress_all(grad_outputs)?;
        let grads = self.inner.backward(client, &compressed)?;
        self.decompress_all(&grads, &contexts)
    }
}
