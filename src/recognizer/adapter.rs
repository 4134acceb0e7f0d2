//! Recognizer vendor adapter contract.
//!
//! Vendor SDKs deliver results via callbacks on their own threads; adapter
//! implementations pay the thread hop at this boundary (`spawn_blocking`
//! or a dedicated worker) and expose a plain async surface. New vendors
//! only need to implement this trait.

use crate::error::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// A partial hypothesis from the vendor. May be empty while the vendor
/// has audio but no words yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorPartial {
    /// Hypothesis text, possibly empty.
    pub text: String,
    /// Vendor-side sequence number; the session manager drops
    /// out-of-order values.
    pub sequence: u64,
}

/// A committed result returned by draining the session. Never empty.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VendorFinal {
    /// Committed text.
    pub text: String,
    /// Vendor-side sequence number.
    pub sequence: u64,
}

/// Streaming recognition vendor.
#[async_trait]
pub trait RecognizerAdapter: Send + Sync {
    /// Establish the upstream connection. Returns once the upstream has
    /// acknowledged readiness.
    async fn start_session(&self) -> Result<()>;

    /// Feed one chunk of PCM audio; may yield a new partial hypothesis.
    async fn send_chunk(&self, pcm: Bytes) -> Result<Option<VendorPartial>>;

    /// Request a drain. Yields the last committed result if the vendor
    /// produces one.
    async fn end_session(&self) -> Result<Option<VendorFinal>>;

    /// Drain sentences the vendor has committed since the last poll.
    /// Finals are never empty.
    async fn poll_complete_sentences(&self) -> Vec<String>;

    /// Discard any committed-but-unpolled sentences (session boundary).
    async fn clear_sentence_buffer(&self);
}
