//! Lumina: real-time voice dialogue turn-taking engine.
//!
//! A user speaks, an upstream recognizer streams partial and final
//! transcripts, a language model generates a reply, and a TTS service
//! renders it as audio. This crate is the core that coordinates those
//! streams: it decides whether the user is speaking, pausing, or being
//! replied to; which frames to forward for recognition; when a completed
//! utterance triggers inference and synthesis; and how to cancel an
//! in-flight reply when the user barges in.
//!
//! # Architecture
//!
//! The engine is built from independent stages connected by async
//! channels and an in-process event bus:
//! - **Frame classification**: Voice/Silence tagging with a running
//!   silence counter
//! - **Turn state machine**: the single authority on conversational phase
//! - **Recognition session**: streaming vendor session with bounded
//!   reconnection
//! - **Sentence aggregation**: consume-once queue of finalized sentences
//! - **Reply orchestration**: LLM → TTS → playback with per-reply cancel
//!   tokens
//! - **Barge-in coordination**: reply cancellation the moment the user
//!   takes the floor
//!
//! Vendors plug in behind adapter traits; the engine holds no global
//! state beyond its configuration.

pub mod audio;
pub mod barge_in;
pub mod bus;
pub mod config;
pub mod control;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod recognizer;
pub mod reply;
pub mod sentence;
pub mod telemetry;
pub mod tts;
pub mod turn;

pub use bus::{EngineEvent, EventBus};
pub use config::DialogueConfig;
pub use error::{DialogueError, Result};
pub use pipeline::coordinator::DialogueEngine;
pub use turn::TurnPhase;
