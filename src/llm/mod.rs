//! Language model adapter contract.
//!
//! The orchestrator treats generation as an async iterator of text chunks;
//! vendor specifics (protocol, auth, thread hops for blocking SDKs) live
//! behind this trait.

pub mod fallback;

use crate::error::Result;
use async_trait::async_trait;
use futures_util::stream::BoxStream;
use tokio_util::sync::CancellationToken;

/// One streamed fragment of LLM output. Always non-empty UTF-8.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChunk {
    /// The decoded text fragment.
    pub text: String,
}

/// Streaming language model vendor.
#[async_trait]
pub trait LlmAdapter: Send + Sync {
    /// Generate a reply for the user utterance.
    ///
    /// The returned stream yields non-empty text chunks and terminates by
    /// closing. Implementations must honor `cancel` between chunks; a
    /// fired token ends the stream promptly.
    ///
    /// # Errors
    ///
    /// Returns an error when the request cannot be started at all;
    /// mid-stream failures surface as `Err` items on the stream.
    async fn generate(
        &self,
        prompt: &str,
        cancel: CancellationToken,
    ) -> Result<BoxStream<'static, Result<TextChunk>>>;
}
