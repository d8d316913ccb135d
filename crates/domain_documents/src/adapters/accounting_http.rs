//! HTTP Accounting Gateway
//!
//! reqwest client for the external accounting system. Invoices are created
//! with a JSON POST, files go to the archive as multipart, and an archived
//! file is then attached to an invoice.
//!
//! # Error Handling
//!
//! Responses are mapped to `PortError` variants:
//! - 404 -> `PortError::NotFound`
//! - 401/403 -> `PortError::Unauthorized`
//! - 429 -> `PortError::RateLimited`
//! - 5xx -> `PortError::ServiceUnavailable`
//! - Timeouts -> `PortError::Timeout`
//! - Other -> `PortError::Internal`
//!
//! The worker's attempt counter owns retries, so the adapter never retries.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::multipart::{Form, Part};
use reqwest::{Response, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, instrument};

use core_kernel::{AdapterHealth, DomainPort, HealthCheckResult, HealthCheckable, PortError};

use crate::ports::{AccountingGateway, InvoiceDraft};

/// Configuration for the accounting gateway
#[derive(Debug, Clone)]
pub struct AccountingHttpConfig {
    /// Base URL of the accounting API, without trailing slash
    pub base_url: String,
    /// Static bearer token
    pub access_token: String,
    pub timeout_secs: u64,
}

impl Default for AccountingHttpConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            access_token: String::new(),
            timeout_secs: 30,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct AttachRequest<'a> {
    file_id: &'a str,
    include_on_send: bool,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CreatedInvoice {
    document_number: String,
}

#[derive(Debug, Deserialize)]
struct ArchivedFile {
    id: String,
}

/// Accounting gateway over HTTP
#[derive(Debug, Clone)]
pub struct HttpAccountingGateway {
    config: AccountingHttpConfig,
    client: reqwest::Client,
}

impl HttpAccountingGateway {
    pub fn new(config: AccountingHttpConfig) -> Result<Self, PortError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| PortError::Internal {
                message: "failed to build HTTP client".to_string(),
                source: Some(Box::new(e)),
            })?;
        Ok(Self { config, client })
    }

    pub fn base_url(&self) -> &str {
        &self.config.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        operation: &str,
    ) -> Result<Response, PortError> {
        let response = request
            .bearer_auth(&self.config.access_token)
            .send()
            .await
            .map_err(|e| map_transport_error(e, operation, self.config.timeout_secs))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = retry_after_secs(response.headers());
        let body = response.text().await.unwrap_or_default();
        Err(map_status(status, retry_after, operation, &body))
    }

    async fn json<R: DeserializeOwned>(response: Response, operation: &str) -> Result<R, PortError> {
        response.json::<R>().await.map_err(|e| PortError::Transformation {
            message: format!("{}: unexpected response body: {}", operation, e),
        })
    }
}

/// Maps a non-success status to a port error
pub fn map_status(status: StatusCode, retry_after: Option<u64>, operation: &str, body: &str) -> PortError {
    match status {
        StatusCode::NOT_FOUND => PortError::not_found("AccountingResource", operation),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => PortError::Unauthorized {
            message: format!("{} rejected with {}", operation, status),
        },
        StatusCode::TOO_MANY_REQUESTS => PortError::RateLimited {
            retry_after_secs: retry_after.unwrap_or(60),
        },
        s if s.is_server_error() => PortError::ServiceUnavailable {
            service: format!("accounting ({} returned {})", operation, s),
        },
        s if s.is_client_error() => PortError::validation(format!("{} rejected with {}: {}", operation, s, body)),
        s => PortError::internal(format!("{} returned unexpected status {}", operation, s)),
    }
}

fn map_transport_error(error: reqwest::Error, operation: &str, timeout_secs: u64) -> PortError {
    if error.is_timeout() {
        return PortError::Timeout {
            operation: operation.to_string(),
            duration_ms: timeout_secs * 1000,
        };
    }
    PortError::Connection {
        message: format!("{} failed: {}", operation, error),
        source: Some(Box::new(error)),
    }
}

fn retry_after_secs(headers: &HeaderMap) -> Option<u64> {
    headers
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

impl DomainPort for HttpAccountingGateway {}

#[async_trait]
impl HealthCheckable for HttpAccountingGateway {
    async fn health_check(&self) -> HealthCheckResult {
        let start = Instant::now();
        let result = self.client.get(self.url("health")).send().await;
        let latency_ms = start.elapsed().as_millis() as u64;

        let (status, message) = match result {
            Ok(r) if r.status().is_success() => (AdapterHealth::Healthy, None),
            Ok(r) => (AdapterHealth::Degraded, Some(format!("health returned {}", r.status()))),
            Err(e) => (AdapterHealth::Unhealthy, Some(e.to_string())),
        };
        HealthCheckResult {
            adapter_id: "http-accounting-gateway".to_string(),
            status,
            latency_ms,
            message,
            checked_at: Utc::now(),
        }
    }
}

#[async_trait]
impl AccountingGateway for HttpAccountingGateway {
    #[instrument(skip(self, draft), fields(customer = %draft.customer_number, lines = draft.lines.len()))]
    async fn create_invoice(&self, draft: &InvoiceDraft) -> Result<String, PortError> {
        let request = self.client.post(self.url("invoices")).json(draft);
        let response = self.send(request, "create_invoice").await?;
        let created: CreatedInvoice = Self::json(response, "create_invoice").await?;
        debug!(document_number = %created.document_number, "Invoice created");
        Ok(created.document_number)
    }

    #[instrument(skip(self, bytes), fields(size = bytes.len()))]
    async fn upload_document(
        &self,
        bytes: Vec<u8>,
        file_name: &str,
        mime: &str,
    ) -> Result<String, PortError> {
        let part = Part::bytes(bytes)
            .file_name(file_name.to_string())
            .mime_str(mime)
            .map_err(|e| PortError::validation_field(e.to_string(), "mime"))?;
        let form = Form::new().part("file", part);

        let request = self.client.post(self.url("archive")).multipart(form);
        let response = self.send(request, "upload_document").await?;
        let archived: ArchivedFile = Self::json(response, "upload_document").await?;
        Ok(archived.id)
    }

    #[instrument(skip(self))]
    async fn attach_document(
        &self,
        archive_id: &str,
        document_number: &str,
        include_on_send: bool,
    ) -> Result<(), PortError> {
        let request = self
            .client
            .post(self.url(&format!("invoices/{}/attachments", document_number)))
            .json(&AttachRequest {
                file_id: archive_id,
                include_on_send,
            });
        self.send(request, "attach_document").await?;
        Ok(())
    }
}
