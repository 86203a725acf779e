//! Contacts, conversations, messages and their classification.

pub mod classify;
pub mod model;
pub mod tracker;

pub use classify::ConversationClassifier;
pub use model::{Button, ButtonResponse, ColorCode, Contact, Conversation, Message, MessageType};
pub use tracker::ConversationTracker;
