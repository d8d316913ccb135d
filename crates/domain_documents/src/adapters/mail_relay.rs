//! Mail relay adapter
//!
//! Posts outgoing mail as multipart form data to an HTTP relay that owns the
//! actual SMTP transport.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use tracing::{debug, instrument};

use core_kernel::{DomainPort, PortError};

use crate::adapters::accounting_http::map_status;
use crate::ports::{MailMessage, MailSender};

#[derive(Debug, Clone)]
pub struct MailRelayConfig {
    pub relay_url: String,
    pub from: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
}

/// `MailSender` backed by an HTTP relay
#[derive(Debug, Clone)]
pub struct HttpMailRelay {
    config: MailRelayConfig,
    client: reqwest::Client,
}

impl HttpMailRelay {
    pub fn new(config: MailRelayConfig) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PortError::Internal {
                message: "failed to build HTTP client".to_string(),
                source: Some(Box::new(e)),
            })?;
        Ok(Self { config, client })
    }

    fn form(&self, message: &MailMessage) -> Result<Form, PortError> {
        let attachment = Part::bytes(message.attachment.bytes.clone())
            .file_name(message.attachment.file_name.clone())
            .mime_str(&message.attachment.mime)
            .map_err(|e| PortError::validation_field(e.to_string(), "mime"))?;

        Ok(Form::new()
            .text("from", self.config.from.clone())
            .text("to", message.to.join(","))
            .text("subject", message.subject.clone())
            .text("text", message.body.clone())
            .part("attachment", attachment))
    }
}

impl DomainPort for HttpMailRelay {}

#[async_trait]
impl MailSender for HttpMailRelay {
    #[instrument(skip(self, message), fields(recipients = message.to.len()))]
    async fn send(&self, message: &MailMessage) -> Result<(), PortError> {
        let mut request = self.client.post(&self.config.relay_url).multipart(self.form(message)?);
        if let Some(key) = &self.config.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                PortError::Timeout {
                    operation: "send_mail".to_string(),
                    duration_ms: self.config.timeout_secs * 1000,
                }
            } else {
                PortError::Connection {
                    message: format!("mail relay unreachable: {}", e),
                    source: Some(Box::new(e)),
                }
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(map_status(status, None, "send_mail", &body));
        }
        debug!("Mail handed to relay");
        Ok(())
    }
}
