//! WhatsApp gateway transport: JSON POST to `{base_url}/send-message`.

use async_trait::async_trait;
use serde::Serialize;

use crate::channels::{SendReceipt, Transport};
use crate::config::GatewayConfig;
use crate::conversations::model::Button;
use crate::error::ChannelError;

const CHANNEL_NAME: &str = "whatsapp";

#[derive(Serialize)]
struct WireButton<'a> {
    id: &'a str,
    text: &'a str,
}

#[derive(Serialize)]
struct SendBody<'a> {
    number: &'a str,
    message: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    buttons: Option<Vec<WireButton<'a>>>,
}

/// HTTP transport for the WhatsApp gateway service.
pub struct GatewayTransport {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl GatewayTransport {
    pub fn new(config: GatewayConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn send_url(&self) -> String {
        format!("{}/send-message", self.config.base_url)
    }
}

#[async_trait]
impl Transport for GatewayTransport {
    fn name(&self) -> &str {
        CHANNEL_NAME
    }

    async fn send(
        &self,
        phone: &str,
        message: &str,
        buttons: Option<&[Button]>,
    ) -> Result<SendReceipt, ChannelError> {
        if phone.trim().is_empty() {
            return Err(ChannelError::InvalidMessage("empty recipient phone".into()));
        }

        // Button actions stay server-side; the gateway only renders id + text.
        let body = SendBody {
            number: phone,
            message,
            buttons: buttons.map(|bs| {
                bs.iter()
                    .map(|b| WireButton {
                        id: &b.id,
                        text: &b.text,
                    })
                    .collect()
            }),
        };

        let resp = self
            .client
            .post(self.send_url())
            .timeout(self.config.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ChannelError::Timeout {
                        name: CHANNEL_NAME.into(),
                        timeout: self.config.timeout,
                    }
                } else {
                    ChannelError::SendFailed {
                        name: CHANNEL_NAME.into(),
                        reason: e.to_string(),
                    }
                }
            })?;

        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        if !status.is_success() {
            tracing::warn!(phone = %phone, status = status.as_u16(), "Gateway rejected message");
            return Err(ChannelError::Http {
                status: status.as_u16(),
                body: text,
            });
        }

        tracing::debug!(phone = %phone, status = status.as_u16(), "Message sent via gateway");
        Ok(SendReceipt {
            status_code: status.as_u16(),
            body: text,
        })
    }
}
