//! Clinic Flows: conversation automation for a dental clinic.

pub mod api;
pub mod channels;
pub mod config;
pub mod conversations;
pub mod error;
pub mod flows;
pub mod llm;
pub mod outcome;
pub mod pipeline;
pub mod reminders;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;
