//! Text-to-speech adapter contract.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// One streamed block of synthesized audio: PCM at 16 kHz mono, 16-bit
/// little-endian. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SynthChunk {
    /// Raw PCM bytes.
    pub pcm: Bytes,
}

/// Streaming speech synthesis vendor.
#[async_trait]
pub trait TtsAdapter: Send + Sync {
    /// Synthesize one piece of text.
    ///
    /// The returned stream yields non-empty audio chunks in production
    /// order and terminates by closing. Implementations must honor
    /// `cancel` between chunks.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be started at all;
    /// mid-stream failures surface as `Err` items on the stream.
    async fn synthesize(
        &self,
        text: &str,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<SynthChunk>>>;
}
