//! CAS strategy configuration.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// CAS 2.0 strategy configuration.
///
/// Built once at startup and shared read-only between requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CasConfig {
    /// CAS server origin.
    /// Example: "https://sso.example.com"
    #[serde(default)]
    pub sso_base_url: String,

    /// Full CAS login endpoint users are redirected to.
    /// Example: "https://sso.example.com/cas/login"
    #[serde(default)]
    pub sso_login_url: String,

    /// Validation path appended to `sso_base_url`.
    #[serde(default = "default_validate_endpoint")]
    pub validate_endpoint: String,

    /// This application's registered service URL. Sent verbatim on both
    /// the login redirect and the validation call.
    #[serde(default)]
    pub app_service_url: String,

    /// Hand the incoming request to the verify function as well.
    #[serde(default)]
    pub pass_request_to_verify: bool,

    /// Upper bound for the validation call, in seconds.
    #[serde(default = "default_validate_timeout")]
    pub validate_timeout_secs: u64,
}

fn default_validate_endpoint() -> String {
    "/cas/serviceValidate".to_string()
}

fn default_validate_timeout() -> u64 {
    10
}

impl Default for CasConfig {
    fn default() -> Self {
        Self {
            sso_base_url: String::new(),
            sso_login_url: String::new(),
            validate_endpoint: default_validate_endpoint(),
            app_service_url: String::new(),
            pass_request_to_verify: false,
            validate_timeout_secs: default_validate_timeout(),
        }
    }
}

impl CasConfig {
    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        require_http_url("sso_base_url", &self.sso_base_url)?;
        require_http_url("sso_login_url", &self.sso_login_url)?;
        require_http_url("app_service_url", &self.app_service_url)?;

        if !self.validate_endpoint.starts_with('/') {
            return Err("CAS validate_endpoint must start with '/'".to_string());
        }

        if self.validate_timeout_secs == 0 {
            return Err("CAS validate_timeout_secs must be greater than zero".to_string());
        }

        Ok(())
    }

    /// Timeout applied to the validation call.
    pub fn validate_timeout(&self) -> Duration {
        Duration::from_secs(self.validate_timeout_secs)
    }
}

fn require_http_url(field: &str, value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err(format!("CAS {} is required", field));
    }

    if !value.starts_with("https://") && !value.starts_with("http://") {
        return Err(format!("CAS {} must be a valid HTTP(S) URL", field));
    }

    Ok(())
}

/// JSON configuration, merged over an existing [`CasConfig`].
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub struct CasConfigJson {
    pub sso_base_url: Option<String>,
    pub sso_login_url: Option<String>,
    pub validate_endpoint: Option<String>,
    pub app_service_url: Option<String>,
    pub pass_request_to_verify: Option<bool>,
    pub validate_timeout_secs: Option<u64>,
}

impl CasConfigJson {
    /// Apply JSON config to existing config.
    pub fn apply_to(&self, config: &mut CasConfig) {
        if let Some(ref url) = self.sso_base_url {
            config.sso_base_url = url.clone();
        }
        if let Some(ref url) = self.sso_login_url {
            config.sso_login_url = url.clone();
        }
        if let Some(ref endpoint) = self.validate_endpoint {
            config.validate_endpoint = endpoint.clone();
        }
        if let Some(ref url) = self.app_service_url {
            config.app_service_url = url.clone();
        }
        if let Some(pass) = self.pass_request_to_verify {
            config.pass_request_to_verify = pass;
        }
        if let Some(timeout) = self.validate_timeout_secs {
            config.validate_timeout_secs = timeout;
        }
    }
}
