//! Inbound message pipeline.
//!
//! Every webhook message flows through:
//! 1. `InboundMessage::from_webhook()`: sender normalisation
//! 2. `ConversationTracker::record_inbound()`: upsert and append
//! 3. `KeywordClassifier`: deterministic urgency rules, LLM fallback optional
//! 4. Auto-response, when enabled in the AI config

pub mod processor;
pub mod rules;
pub mod transcribe;
pub mod types;

pub use processor::InboundProcessor;
pub use rules::KeywordClassifier;
pub use transcribe::{Transcriber, WhisperConfig, WhisperTranscriber};
pub use types::{InboundMessage, IncomingResult, WebhookPayload};
