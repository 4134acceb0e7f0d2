//! Playback egress: the length-prefixed PCM stream toward the client.
//!
//! Wire format: 4-byte little-endian length, then that many bytes of PCM.
//! A zero-length message marks end-of-reply. The stream is unidirectional
//! (engine → client). This writer is the last point a reply chunk can be
//! dropped: the orchestrator checks the reply's cancel token immediately
//! before every [`PlaybackSink::send_chunk`] call.

use crate::error::{DialogueError, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::sync::Arc;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;

/// Sink for synthesized reply audio.
#[async_trait]
pub trait PlaybackSink: Send + Sync {
    /// Forward one non-empty PCM chunk.
    async fn send_chunk(&self, pcm: Bytes) -> Result<()>;

    /// Mark the current reply as complete (zero-length frame).
    async fn end_reply(&self) -> Result<()>;

    /// Discard anything queued but unplayed and truncate the current reply.
    async fn drop_buffered(&self) -> Result<()>;
}

struct Inner<W> {
    writer: W,
    mid_reply: bool,
}

/// [`PlaybackSink`] writing the length-prefixed wire format to any
/// `AsyncWrite` transport.
pub struct FramedPlaybackEgress<W> {
    inner: Arc<Mutex<Inner<W>>>,
}

impl<W> FramedPlaybackEgress<W>
where
    W: AsyncWrite + Unpin + Send,
{
    /// Wrap a transport writer.
    pub fn new(writer: W) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Inner {
                writer,
                mid_reply: false,
            })),
        }
    }

    async fn write_frame(inner: &mut Inner<W>, payload: &[u8]) -> Result<()> {
        let len = u32::try_from(payload.len())
            .map_err(|_| DialogueError::Internal("playback chunk exceeds u32 length".into()))?;
        inner.writer.write_all(&len.to_le_bytes()).await?;
        if !payload.is_empty() {
            inner.writer.write_all(payload).await?;
        }
        inner.writer.flush().await?;
        Ok(())
    }
}

impl<W> Clone for FramedPlaybackEgress<W> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

#[async_trait]
impl<W> PlaybackSink for FramedPlaybackEgress<W>
where
    W: AsyncWrite + Unpin + Send,
{
    async fn send_chunk(&self, pcm: Bytes) -> Result<()> {
        if pcm.is_empty() {
            return Err(DialogueError::Internal(
                "empty playback chunk would read as end-of-reply".into(),
            ));
        }
        let mut inner = self.inner.lock().await;
        Self::write_frame(&mut inner, &pcm).await?;
        inner.mid_reply = true;
        Ok(())
    }

    async fn end_reply(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        Self::write_frame(&mut inner, &[]).await?;
        inner.mid_reply = false;
        Ok(())
    }

    async fn drop_buffered(&self) -> Result<()> {
        let mut inner = self.inner.lock().await;
        // Chunks are flushed as they arrive, so there is nothing queued on
        // this side; truncate the reply so the client discards its buffer.
        if inner.mid_reply {
            Self::write_frame(&mut inner, &[]).await?;
            inner.mid_reply = false;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]

    use super::*;

    /// Split a captured egress byte stream back into messages.
    fn decode(mut bytes: &[u8]) -> Vec<Vec<u8>> {
        let mut messages = Vec::new();
        while bytes.len() >= 4 {
            let len = u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
            messages.push(bytes[4..4 + len].to_vec());
            bytes = &bytes[4 + len..];
        }
        assert!(bytes.is_empty(), "trailing garbage on egress stream");
        messages
    }

    #[tokio::test]
    async fn frames_chunks_with_length_prefix() {
        let buffer = Vec::new();
        let egress = FramedPlaybackEgress::new(buffer);
        egress.send_chunk(Bytes::from_static(&[1, 2, 3])).await.unwrap();
        egress.send_chunk(Bytes::from_static(&[4])).await.unwrap();
        egress.end_reply().await.unwrap();

        let inner = egress.inner.lock().await;
        let messages = decode(&inner.writer);
        assert_eq!(messages, vec![vec![1, 2, 3], vec![4], vec![]]);
    }

    #[tokio::test]
    async fn rejects_empty_chunk() {
        let egress = FramedPlaybackEgress::new(Vec::new());
        let err = egress.send_chunk(Bytes::new()).await.unwrap_err();
        assert!(matches!(err, DialogueError::Internal(_)));
    }

    #[tokio::test]
    async fn drop_buffered_truncates_only_mid_reply() {
        let egress = FramedPlaybackEgress::new(Vec::new());
        // Idle: no marker written.
        egress.drop_buffered().await.unwrap();
        {
            let inner = egress.inner.lock().await;
            assert!(inner.writer.is_empty());
        }

        egress.send_chunk(Bytes::from_static(&[9])).await.unwrap();
        egress.drop_buffered().await.unwrap();
        egress.drop_buffered().await.unwrap();

        let inner = egress.inner.lock().await;
        let messages = decode(&inner.writer);
        // One chunk, one terminator; the second drop is a no-op.
        assert_eq!(messages, vec![vec![9], vec![]]);
    }
}
