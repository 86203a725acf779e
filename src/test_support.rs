//! Test doubles shared by unit tests.

use std::sync::Mutex;

use async_trait::async_trait;

use crate::channels::{SendReceipt, Transport};
use crate::conversations::model::Button;
use crate::error::ChannelError;

/// A message captured by [`RecordingTransport`].
#[derive(Debug, Clone, PartialEq)]
pub struct Sent {
    pub phone: String,
    pub message: String,
    pub buttons: Vec<String>,
}

/// Transport that records sends and can be told to fail.
#[derive(Default)]
pub struct RecordingTransport {
    sent: Mutex<Vec<Sent>>,
    /// Sends whose text contains this fragment fail with HTTP 500.
    fail_on: Mutex<Option<String>>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_on(fragment: &str) -> Self {
        let t = Self::default();
        *t.fail_on.lock().unwrap() = Some(fragment.to_string());
        t
    }

    pub fn sent(&self) -> Vec<Sent> {
        self.sent.lock().unwrap().clone()
    }

    pub fn texts(&self) -> Vec<String> {
        self.sent().into_iter().map(|s| s.message).collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    fn name(&self) -> &str {
        "recording"
    }

    async fn send(
        &self,
        phone: &str,
        message: &str,
        buttons: Option<&[Button]>,
    ) -> Result<SendReceipt, ChannelError> {
        let fail = self
            .fail_on
            .lock()
            .unwrap()
            .as_deref()
            .is_some_and(|f| message.contains(f));
        if fail {
            return Err(ChannelError::Http {
                status: 500,
                body: "gateway down".into(),
            });
        }
        self.sent.lock().unwrap().push(Sent {
            phone: phone.to_string(),
            message: message.to_string(),
            buttons: buttons
                .unwrap_or_default()
                .iter()
                .map(|b| b.id.clone())
                .collect(),
        });
        Ok(SendReceipt {
            status_code: 200,
            body: "{}".into(),
        })
    }
}
