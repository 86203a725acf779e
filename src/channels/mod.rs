//! Outbound messaging transport.
//!
//! The engine only needs one capability from the messaging gateway: send a
//! text (optionally with buttons) to a phone number.

pub mod gateway;

pub use gateway::GatewayTransport;

use async_trait::async_trait;
use serde::Serialize;

use crate::conversations::model::Button;
use crate::error::ChannelError;

/// What the gateway answered to an accepted send.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SendReceipt {
    pub status_code: u16,
    pub body: String,
}

/// Send-message capability of an external messaging gateway.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Channel name for logs and errors.
    fn name(&self) -> &str;

    /// Send `message` to `phone`. Non-success answers are errors.
    async fn send(
        &self,
        phone: &str,
        message: &str,
        buttons: Option<&[Button]>,
    ) -> Result<SendReceipt, ChannelError>;
}
