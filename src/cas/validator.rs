//! Service ticket validation against the CAS server.

use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::config::CasConfig;
use super::error::CasError;

/// Outbound transport for the validation GET.
#[async_trait]
pub trait ValidationTransport: Send + Sync {
    /// Fetch `url` and return the whole response body, decoded as UTF-8.
    ///
    /// Non-success HTTP statuses are not errors; their body is returned.
    async fn get(&self, url: &str) -> Result<String, CasError>;
}

/// Largest validation response body accepted from the CAS server.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// reqwest-backed transport.
pub struct HttpTransport {
    http_client: reqwest::Client,
    timeout: Duration,
    max_body_bytes: usize,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, CasError> {
        let http_client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| CasError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            http_client,
            timeout,
            max_body_bytes: MAX_BODY_BYTES,
        })
    }

    /// Override the response body cap.
    pub fn with_max_body_bytes(mut self, max_body_bytes: usize) -> Self {
        self.max_body_bytes = max_body_bytes;
        self
    }

    fn request_error(&self, e: reqwest::Error) -> CasError {
        if e.is_timeout() {
            CasError::Timeout(self.timeout)
        } else {
            CasError::Network(e.to_string())
        }
    }

    fn body_too_large(&self) -> CasError {
        CasError::MalformedResponse(format!(
            "validation response exceeds {} bytes",
            self.max_body_bytes
        ))
    }
}

#[async_trait]
impl ValidationTransport for HttpTransport {
    async fn get(&self, url: &str) -> Result<String, CasError> {
        let mut response = self
            .http_client
            .get(url)
            .header(reqwest::header::ACCEPT, "application/xml, text/xml")
            .send()
            .await
            .map_err(|e| self.request_error(e))?;

        let status = response.status();
        debug!(
            status = %status,
            headers = ?response.headers(),
            "CAS validation response received"
        );

        if response
            .content_length()
            .is_some_and(|len| len > self.max_body_bytes as u64)
        {
            return Err(self.body_too_large());
        }

        let mut body = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| self.request_error(e))? {
            if body.len() + chunk.len() > self.max_body_bytes {
                return Err(self.body_too_large());
            }
            body.extend_from_slice(&chunk);
        }
        let body = String::from_utf8_lossy(&body).into_owned();

        if !status.is_success() {
            warn!(
                status = %status,
                "CAS validation endpoint returned non-success status, interpreting body anyway"
            );
        }

        Ok(body)
    }
}

/// Build the validation URL:
/// `{base}{endpoint}?service=<service>&ticket=<ticket>`, both values
/// percent-encoded.
pub fn validation_url(
    sso_base_url: &str,
    validate_endpoint: &str,
    service_url: &str,
    ticket: &str,
) -> Result<String, CasError> {
    let url = format!(
        "{}{}?service={}&ticket={}",
        sso_base_url.trim_end_matches('/'),
        validate_endpoint,
        urlencoding::encode(service_url),
        urlencoding::encode(ticket)
    );

    url::Url::parse(&url)
        .map_err(|e| CasError::Url(format!("invalid validation URL '{}': {}", url, e)))?;

    Ok(url)
}

/// Performs the single validation call for a ticket.
pub struct TicketValidator {
    config: Arc<CasConfig>,
    transport: Arc<dyn ValidationTransport>,
    timeout: Duration,
}

impl TicketValidator {
    /// Create a validator using the HTTP transport.
    pub fn new(config: Arc<CasConfig>) -> Result<Self, CasError> {
        let transport = HttpTransport::new(config.validate_timeout())?;
        Ok(Self::with_transport(config, Arc::new(transport)))
    }

    /// Create a validator over a custom transport.
    pub fn with_transport(config: Arc<CasConfig>, transport: Arc<dyn ValidationTransport>) -> Self {
        let timeout = config.validate_timeout();
        Self {
            config,
            transport,
            timeout,
        }
    }

    /// Validate `ticket` for `service_url` and return the raw response body.
    ///
    /// One attempt, no retry. The call is abandoned once the configured
    /// timeout elapses.
    pub async fn validate(&self, ticket: &str, service_url: &str) -> Result<String, CasError> {
        let url = validation_url(
            &self.config.sso_base_url,
            &self.config.validate_endpoint,
            service_url,
            ticket,
        )?;

        debug!(url = %url, "Validating CAS service ticket");

        let body = tokio::time::timeout(self.timeout, self.transport.get(&url))
            .await
            .map_err(|_| CasError::Timeout(self.timeout))??;

        trace!(body = %body, "CAS validation response body");

        Ok(body)
    }
}
