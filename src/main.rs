//! Sentinel CAS Authentication Agent
//!
//! Runs one CAS 2.0 authentication attempt for a callback URI and prints the
//! outcome as JSON: the login redirect when no ticket is present, otherwise
//! the result of validating the ticket against the CAS server.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

use sentinel_cas_auth::{
    AttributeVerifier, AuthOutcome, AuthenticateOptions, CasConfig, CasConfigJson, CasRequest,
    CasStrategy, Strategy,
};

/// Command line arguments
#[derive(Parser, Debug)]
#[command(name = "sentinel-cas-auth")]
#[command(about = "CAS 2.0 authentication for Sentinel reverse proxy")]
struct Args {
    /// JSON configuration file (kebab-case keys)
    #[arg(long, env = "CAS_CONFIG")]
    config: Option<PathBuf>,

    /// CAS server origin
    #[arg(long, env = "CAS_SSO_BASE_URL")]
    sso_base_url: Option<String>,

    /// CAS login endpoint
    #[arg(long, env = "CAS_SSO_LOGIN_URL")]
    sso_login_url: Option<String>,

    /// Validation path appended to the CAS server origin
    #[arg(long, env = "CAS_VALIDATE_ENDPOINT")]
    validate_endpoint: Option<String>,

    /// Registered service URL of this application
    #[arg(long, env = "CAS_APP_SERVICE_URL")]
    app_service_url: Option<String>,

    /// Timeout for the validation call in seconds
    #[arg(long, env = "CAS_VALIDATE_TIMEOUT_SECS")]
    validate_timeout_secs: Option<u64>,

    /// CAS attribute holding the user ID
    #[arg(long, default_value = "uid", env = "CAS_USER_ATTRIBUTE")]
    user_attribute: String,

    /// Callback request URI, e.g. "/cas?ticket=ST-1"
    #[arg(long, default_value = "/", env = "CAS_REQUEST_URI")]
    request_uri: String,

    /// Enable verbose logging
    #[arg(short, long, env = "CAS_VERBOSE")]
    verbose: bool,
}

impl Args {
    /// Command line values as a config overlay.
    fn overrides(&self) -> CasConfigJson {
        CasConfigJson {
            sso_base_url: self.sso_base_url.clone(),
            sso_login_url: self.sso_login_url.clone(),
            validate_endpoint: self.validate_endpoint.clone(),
            app_service_url: self.app_service_url.clone(),
            pass_request_to_verify: None,
            validate_timeout_secs: self.validate_timeout_secs,
        }
    }
}

/// Defaults, then the config file, then command line flags.
fn load_config(args: &Args) -> Result<CasConfig> {
    let mut config = CasConfig::default();

    if let Some(path) = &args.config {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read CAS config: {:?}", path))?;
        let json: CasConfigJson = serde_json::from_str(&raw)
            .with_context(|| format!("Failed to parse CAS config: {:?}", path))?;
        json.apply_to(&mut config);
    }

    args.overrides().apply_to(&mut config);

    config
        .validate()
        .map_err(|e| anyhow!("CAS config validation failed: {}", e))?;

    Ok(config)
}

fn outcome_json(outcome: &AuthOutcome<String>) -> serde_json::Value {
    match outcome {
        AuthOutcome::Redirect { url } => json!({
            "outcome": "redirect",
            "status": outcome.status_code(),
            "location": url,
        }),
        AuthOutcome::Success { user, info } => json!({
            "outcome": "success",
            "status": outcome.status_code(),
            "user": user,
            "info": info,
        }),
        AuthOutcome::Fail { info, status } => json!({
            "outcome": "fail",
            "status": status,
            "info": info,
        }),
        AuthOutcome::Error(e) => json!({
            "outcome": "error",
            "status": outcome.status_code(),
            "kind": e.kind(),
            "error": e.to_string(),
        }),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr, the outcome to stdout.
    let log_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(format!("{}={}", env!("CARGO_CRATE_NAME"), log_level))
        .with_writer(std::io::stderr)
        .json()
        .init();

    let config = load_config(&args)?;

    info!(
        sso_base_url = %config.sso_base_url,
        app_service_url = %config.app_service_url,
        validate_timeout_secs = config.validate_timeout_secs,
        "Configuration loaded"
    );

    let strategy = CasStrategy::new(config, AttributeVerifier::new(args.user_attribute.clone()))
        .context("Failed to create CAS strategy")?;

    let request = CasRequest::from_uri(&args.request_uri);
    let outcome = strategy
        .authenticate(&request, &AuthenticateOptions::default())
        .await;

    info!(
        success = outcome.is_success(),
        status = outcome.status_code(),
        "Authentication attempt finished"
    );

    println!("{}", outcome_json(&outcome));

    Ok(())
}
