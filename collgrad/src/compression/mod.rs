pub mod fp16;
pub mod none;
pub mod traits;

pub use fp16::Fp16Compressor;
pub use none::NoCompression;
pub use traits::{CompressionContext, Compressor};
