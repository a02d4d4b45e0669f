//! CAS 2.0 strategy: redirect to the login page, or validate the returned
//! ticket and resolve the caller.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

use super::config::CasConfig;
use super::error::CasError;
use super::request::CasRequest;
use super::response;
use super::validator::{TicketValidator, ValidationTransport};
use super::verify::{AuthInfo, Verify, VerifyAdapter};

/// Strategy name reported to the host.
pub const STRATEGY_NAME: &str = "cas2";

/// Terminal result of one authentication attempt.
#[derive(Debug)]
pub enum AuthOutcome<U> {
    /// Send the caller to the CAS login page.
    Redirect { url: String },
    /// The caller is authenticated as `user`.
    Success { user: U, info: AuthInfo },
    /// The caller could not be authenticated.
    Fail { info: AuthInfo, status: u16 },
    /// The attempt could not be completed.
    Error(CasError),
}

impl<U> AuthOutcome<U> {
    /// HTTP status the host would typically answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            AuthOutcome::Redirect { .. } => 302,
            AuthOutcome::Success { .. } => 200,
            AuthOutcome::Fail { status, .. } => *status,
            AuthOutcome::Error(_) => 500,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, AuthOutcome::Success { .. })
    }
}

/// Per-call options from the host. The CAS flow reads none of them.
#[derive(Debug, Clone, Default)]
#[non_exhaustive]
pub struct AuthenticateOptions {}

/// Pluggable authentication strategy as consumed by the host.
#[async_trait]
pub trait Strategy: Send + Sync {
    type User: Send;

    fn name(&self) -> &str;

    async fn authenticate(
        &self,
        request: &CasRequest,
        options: &AuthenticateOptions,
    ) -> AuthOutcome<Self::User>;
}

/// Build the login redirect: `sso_login_url` with `service` set to the
/// application service URL. Other query parameters on the login URL are kept.
pub fn login_url(sso_login_url: &str, service_url: &str) -> Result<String, CasError> {
    let mut url = url::Url::parse(sso_login_url)
        .map_err(|e| CasError::Url(format!("invalid login URL '{}': {}", sso_login_url, e)))?;

    let mut query: Vec<String> = url
        .query()
        .unwrap_or_default()
        .split('&')
        .filter(|pair| !pair.is_empty())
        .filter(|pair| {
            let key = pair.split('=').next().unwrap_or_default();
            urlencoding::decode(key).map_or(true, |key| key != "service")
        })
        .map(String::from)
        .collect();
    query.push(format!("service={}", urlencoding::encode(service_url)));

    url.set_query(Some(&query.join("&")));
    Ok(url.into())
}

/// CAS 2.0 service-ticket strategy.
pub struct CasStrategy<U> {
    config: Arc<CasConfig>,
    validator: TicketValidator,
    verify: Arc<dyn Verify<U>>,
}

impl<U: Send + 'static> CasStrategy<U> {
    /// Create a strategy that validates tickets over HTTPS.
    pub fn new(config: CasConfig, verify: impl Verify<U> + 'static) -> Result<Self, CasError> {
        config.validate().map_err(CasError::Config)?;

        let config = Arc::new(config);
        let validator = TicketValidator::new(Arc::clone(&config))?;

        Ok(Self {
            config,
            validator,
            verify: Arc::new(verify),
        })
    }

    /// Create a strategy over a custom validation transport.
    pub fn with_transport(
        config: CasConfig,
        verify: impl Verify<U> + 'static,
        transport: Arc<dyn ValidationTransport>,
    ) -> Result<Self, CasError> {
        config.validate().map_err(CasError::Config)?;

        let config = Arc::new(config);
        let validator = TicketValidator::with_transport(Arc::clone(&config), transport);

        Ok(Self {
            config,
            validator,
            verify: Arc::new(verify),
        })
    }

    pub fn config(&self) -> &CasConfig {
        &self.config
    }

    /// The CAS login URL for this application.
    pub fn login_url(&self) -> Result<String, CasError> {
        login_url(&self.config.sso_login_url, &self.config.app_service_url)
    }

    async fn validate_ticket(&self, request: &CasRequest, ticket: &str) -> AuthOutcome<U> {
        let body = match self
            .validator
            .validate(ticket, &self.config.app_service_url)
            .await
        {
            Ok(body) => body,
            Err(e) => {
                warn!(error = %e, kind = e.kind(), "CAS ticket validation failed");
                return AuthOutcome::Error(e);
            }
        };

        let outcome = response::parse(&body);

        let request = self.config.pass_request_to_verify.then_some(request);
        let adapter = VerifyAdapter::new(self.verify.as_ref(), request);
        adapter.resolve(outcome).await
    }
}

#[async_trait]
impl<U: Send + 'static> Strategy for CasStrategy<U> {
    type User = U;

    fn name(&self) -> &str {
        STRATEGY_NAME
    }

    async fn authenticate(
        &self,
        request: &CasRequest,
        _options: &AuthenticateOptions,
    ) -> AuthOutcome<U> {
        let Some(ticket) = request.ticket() else {
            return match self.login_url() {
                Ok(url) => {
                    debug!(path = %request.path, url = %url, "No CAS ticket, redirecting to login");
                    AuthOutcome::Redirect { url }
                }
                Err(e) => AuthOutcome::Error(e),
            };
        };

        let outcome = self.validate_ticket(request, ticket).await;

        match &outcome {
            AuthOutcome::Success { .. } => info!(path = %request.path, "CAS authentication successful"),
            AuthOutcome::Fail { info, status } => info!(
                path = %request.path,
                status = status,
                message = ?info.message,
                "CAS authentication failed"
            ),
            AuthOutcome::Error(e) => warn!(path = %request.path, error = %e, "CAS authentication error"),
            AuthOutcome::Redirect { .. } => {}
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cas::verify::{verify_fn, AttributeVerifier, Completion};
    use crate::cas::CasProfile;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const SUCCESS_XML: &str = r#"<cas:serviceResponse xmlns:cas="http://www.yale.edu/tp/cas">
        <cas:authenticationSuccess>
            <cas:user>alice</cas:user>
            <cas:attributes><cas:uid>alice</cas:uid></cas:attributes>
        </cas:authenticationSuccess>
    </cas:serviceResponse>"#;

    /// Transport returning a canned body and recording requested URLs.
    struct CannedTransport {
        body: String,
        urls: Mutex<Vec<String>>,
    }

    impl CannedTransport {
        fn new(body: &str) -> Arc<Self> {
            Arc::new(Self {
                body: body.to_string(),
                urls: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> Vec<String> {
            self.urls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ValidationTransport for CannedTransport {
        async fn get(&self, url: &str) -> Result<String, CasError> {
            self.urls.lock().unwrap().push(url.to_string());
            Ok(self.body.clone())
        }
    }

    struct FailingTransport;

    #[async_trait]
    impl ValidationTransport for FailingTransport {
        async fn get(&self, _url: &str) -> Result<String, CasError> {
            Err(CasError::Network("connection refused".to_string()))
        }
    }

    struct HangingTransport;

    #[async_trait]
    impl ValidationTransport for HangingTransport {
        async fn get(&self, _url: &str) -> Result<String, CasError> {
            std::future::pending::<()>().await;
            unreachable!()
        }
    }

    fn test_config() -> CasConfig {
        CasConfig {
            sso_base_url: "https://sso.example.com".to_string(),
            sso_login_url: "https://sso.example.com/cas/login".to_string(),
            validate_endpoint: "/cas/serviceValidate".to_string(),
            app_service_url: "https://app.example.com/cas".to_string(),
            ..CasConfig::default()
        }
    }

    fn strategy(transport: Arc<dyn ValidationTransport>) -> CasStrategy<String> {
        CasStrategy::<String>::with_transport(test_config(), AttributeVerifier::new("uid"), transport).unwrap()
    }

    #[test]
    fn test_login_url() {
        assert_eq!(
            login_url("https://sso.example.com/cas/login", "https://app.example.com/cas").unwrap(),
            "https://sso.example.com/cas/login?service=https%3A%2F%2Fapp.example.com%2Fcas"
        );
    }

    #[test]
    fn test_login_url_keeps_other_params_and_replaces_service() {
        let url = login_url(
            "https://sso.example.com/cas/login?locale=en&service=stale",
            "https://app.example.com/cas",
        )
        .unwrap();
        assert_eq!(
            url,
            "https://sso.example.com/cas/login?locale=en&service=https%3A%2F%2Fapp.example.com%2Fcas"
        );
    }

    #[test]
    fn test_login_url_replaces_encoded_service_key() {
        let url = login_url(
            "https://sso.example.com/cas/login?serv%69ce=stale&locale=en",
            "https://app.example.com/cas",
        )
        .unwrap();
        assert_eq!(
            url,
            "https://sso.example.com/cas/login?locale=en&service=https%3A%2F%2Fapp.example.com%2Fcas"
        );
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let mut config = test_config();
        config.sso_base_url = String::new();

        let result = CasStrategy::<String>::with_transport(
            config,
            AttributeVerifier::new("uid"),
            CannedTransport::new(""),
        );
        assert!(matches!(result, Err(CasError::Config(_))));
    }

    #[tokio::test]
    async fn test_missing_ticket_redirects_without_network() {
        let transport = CannedTransport::new(SUCCESS_XML);
        let strategy = strategy(transport.clone());

        for uri in ["/cas", "/cas?ticket=", "/cas?other=1"] {
            let outcome = strategy
                .authenticate(&CasRequest::from_uri(uri), &AuthenticateOptions::default())
                .await;

            match outcome {
                AuthOutcome::Redirect { url } => {
                    let parsed = url::Url::parse(&url).unwrap();
                    let service = parsed
                        .query_pairs()
                        .find(|(k, _)| k == "service")
                        .map(|(_, v)| v.into_owned());
                    assert_eq!(service.as_deref(), Some("https://app.example.com/cas"));
                }
                other => panic!("expected redirect for {}, got {:?}", uri, other),
            }
        }

        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_ticket_validation_success() {
        let transport = CannedTransport::new(SUCCESS_XML);
        let strategy = strategy(transport.clone());

        let outcome = strategy
            .authenticate(
                &CasRequest::from_uri("/cas?ticket=ST-123"),
                &AuthenticateOptions::default(),
            )
            .await;

        assert!(outcome.is_success());
        match outcome {
            AuthOutcome::Success { user, .. } => assert_eq!(user, "alice"),
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(
            transport.calls(),
            vec![
                "https://sso.example.com/cas/serviceValidate?service=https%3A%2F%2Fapp.example.com%2Fcas&ticket=ST-123"
            ]
        );
    }

    #[tokio::test]
    async fn test_service_matches_between_redirect_and_validation() {
        let transport = CannedTransport::new(SUCCESS_XML);
        let strategy = strategy(transport.clone());

        let redirect = match strategy
            .authenticate(&CasRequest::from_uri("/cas"), &AuthenticateOptions::default())
            .await
        {
            AuthOutcome::Redirect { url } => url,
            other => panic!("expected redirect, got {:?}", other),
        };
        strategy
            .authenticate(&CasRequest::from_uri("/cas?ticket=ST-9"), &AuthenticateOptions::default())
            .await;

        let service_of = |url: &str| -> String {
            url.split(['?', '&'])
                .find_map(|p| p.strip_prefix("service="))
                .unwrap()
                .to_string()
        };
        assert_eq!(service_of(&redirect), service_of(&transport.calls()[0]));
    }

    #[tokio::test]
    async fn test_invalid_ticket_fails_with_timeout_message() {
        let transport = CannedTransport::new(
            r#"<cas:serviceResponse><cas:authenticationFailure code="INVALID_TICKET">Ticket expired</cas:authenticationFailure></cas:serviceResponse>"#,
        );
        let strategy = strategy(transport);

        let outcome = strategy
            .authenticate(&CasRequest::from_uri("/cas?ticket=ST-1"), &AuthenticateOptions::default())
            .await;

        assert_eq!(outcome.status_code(), 401);
        assert!(!outcome.is_success());
        match outcome {
            AuthOutcome::Fail { info, status } => {
                assert_eq!(status, 401);
                assert_eq!(info.message.as_deref(), Some("Authentication timed out"));
            }
            other => panic!("expected fail, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_malformed_body_is_error() {
        let strategy = strategy(CannedTransport::new("<html>Service Unavailable</html>"));

        let outcome = strategy
            .authenticate(&CasRequest::from_uri("/cas?ticket=ST-1"), &AuthenticateOptions::default())
            .await;

        assert_eq!(outcome.status_code(), 500);
        assert!(matches!(outcome, AuthOutcome::Error(CasError::MalformedResponse(_))));
    }

    #[tokio::test]
    async fn test_network_error_is_error() {
        let strategy = strategy(Arc::new(FailingTransport));

        let outcome = strategy
            .authenticate(&CasRequest::from_uri("/cas?ticket=ST-1"), &AuthenticateOptions::default())
            .await;

        assert!(matches!(outcome, AuthOutcome::Error(CasError::Network(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unresponsive_server_times_out() {
        let mut config = test_config();
        config.validate_timeout_secs = 5;
        let strategy = CasStrategy::<String>::with_transport(
            config,
            AttributeVerifier::new("uid"),
            Arc::new(HangingTransport),
        )
        .unwrap();

        let outcome = strategy
            .authenticate(&CasRequest::from_uri("/cas?ticket=ST-1"), &AuthenticateOptions::default())
            .await;

        assert!(matches!(
            outcome,
            AuthOutcome::Error(CasError::Timeout(d)) if d == Duration::from_secs(5)
        ));
    }

    #[tokio::test]
    async fn test_url_build_failure_is_error() {
        // Passes validate() but cannot be parsed as a URL.
        let mut config = test_config();
        config.sso_base_url = "https://exa mple.com".to_string();
        let transport = CannedTransport::new(SUCCESS_XML);
        let strategy =
            CasStrategy::<String>::with_transport(config, AttributeVerifier::new("uid"), transport.clone())
                .unwrap();

        let outcome = strategy
            .authenticate(&CasRequest::from_uri("/cas?ticket=ST-1"), &AuthenticateOptions::default())
            .await;

        assert!(matches!(outcome, AuthOutcome::Error(CasError::Url(_))));
        assert!(transport.calls().is_empty());
    }

    #[tokio::test]
    async fn test_verify_runs_exactly_once_per_attempt() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let verify = verify_fn(move |_req: Option<&CasRequest>, _profile: &CasProfile, done: Completion<String>| {
            counter.fetch_add(1, Ordering::SeqCst);
            let _ = done.success("alice".to_string(), AuthInfo::default());
            let _ = done.success("again".to_string(), AuthInfo::default());
        });
        let strategy =
            CasStrategy::<String>::with_transport(test_config(), verify, CannedTransport::new(SUCCESS_XML))
                .unwrap();

        let outcome = strategy
            .authenticate(&CasRequest::from_uri("/cas?ticket=ST-1"), &AuthenticateOptions::default())
            .await;

        match outcome {
            AuthOutcome::Success { user, .. } => assert_eq!(user, "alice"),
            other => panic!("expected success, got {:?}", other),
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_pass_request_to_verify() {
        let verify = verify_fn(|req: Option<&CasRequest>, _profile: &CasProfile, done: Completion<String>| {
            let forwarded = req.and_then(|r| r.header("x-request-id")).unwrap_or("none");
            let _ = done.success(forwarded.to_string(), AuthInfo::default());
        });

        let mut config = test_config();
        config.pass_request_to_verify = true;
        let strategy =
            CasStrategy::<String>::with_transport(config, verify, CannedTransport::new(SUCCESS_XML)).unwrap();

        let request = CasRequest::from_uri("/cas?ticket=ST-1").with_header("X-Request-Id", "req-7");
        match strategy.authenticate(&request, &AuthenticateOptions::default()).await {
            AuthOutcome::Success { user, .. } => assert_eq!(user, "req-7"),
            other => panic!("expected success, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_concurrent_attempts_are_independent() {
        let strategy = Arc::new(strategy(CannedTransport::new(SUCCESS_XML)));

        let mut handles = Vec::new();
        for i in 0..8 {
            let strategy = Arc::clone(&strategy);
            handles.push(tokio::spawn(async move {
                let uri = if i % 2 == 0 {
                    format!("/cas?ticket=ST-{}", i)
                } else {
                    "/cas".to_string()
                };
                strategy
                    .authenticate(&CasRequest::from_uri(&uri), &AuthenticateOptions::default())
                    .await
                    .status_code()
            }));
        }

        for (i, handle) in handles.into_iter().enumerate() {
            let status = handle.await.unwrap();
            assert_eq!(status, if i % 2 == 0 { 200 } else { 302 });
        }
    }

    #[test]
    fn test_strategy_name() {
        let strategy = strategy(CannedTransport::new(""));
        assert_eq!(strategy.name(), "cas2");
    }
}
