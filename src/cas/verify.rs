//! Application verify hook and the adapter that turns a validation outcome
//! into the host's terminal result.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use super::error::{BoxError, CasError};
use super::request::CasRequest;
use super::response::{CasProfile, ValidationOutcome};
use super::strategy::AuthOutcome;

/// Status reported with every `Fail` outcome.
pub const UNAUTHORIZED: u16 = 401;

/// Extra information passed back to the host with `Success` and `Fail`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthInfo {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl AuthInfo {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: Some(message.into()),
        }
    }
}

/// What the verify function decided.
#[derive(Debug)]
pub enum Verified<U> {
    User { user: U, info: AuthInfo },
    Rejected { info: AuthInfo },
    Error(BoxError),
}

/// Returned when a completion handle is resolved a second time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("authentication attempt already resolved")]
pub struct AlreadyResolved;

/// One-shot completion handle given to the verify function.
///
/// Clones share the same slot: the first resolution is delivered, any later
/// one is dropped and reported as [`AlreadyResolved`].
pub struct Completion<U> {
    slot: Arc<Mutex<Option<oneshot::Sender<Verified<U>>>>>,
}

impl<U> Clone for Completion<U> {
    fn clone(&self) -> Self {
        Self {
            slot: Arc::clone(&self.slot),
        }
    }
}

impl<U> Completion<U> {
    fn channel() -> (Self, oneshot::Receiver<Verified<U>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                slot: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Accept the attempt with the resolved application user.
    pub fn success(&self, user: U, info: AuthInfo) -> Result<(), AlreadyResolved> {
        self.resolve(Verified::User { user, info })
    }

    /// Reject the attempt; the host answers 401.
    pub fn reject(&self, info: AuthInfo) -> Result<(), AlreadyResolved> {
        self.resolve(Verified::Rejected { info })
    }

    /// Abort the attempt with an error; the host answers 5xx.
    pub fn error(&self, err: impl Into<BoxError>) -> Result<(), AlreadyResolved> {
        self.resolve(Verified::Error(err.into()))
    }

    /// Whether this attempt has already been resolved.
    pub fn is_resolved(&self) -> bool {
        match self.slot.lock() {
            Ok(guard) => guard.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    fn resolve(&self, verified: Verified<U>) -> Result<(), AlreadyResolved> {
        let sender = match self.slot.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };

        match sender {
            // The receiver only goes away if the host dropped the request.
            Some(tx) => {
                let _ = tx.send(verified);
                Ok(())
            }
            None => {
                warn!("Verify callback resolved the authentication attempt more than once, ignoring");
                Err(AlreadyResolved)
            }
        }
    }
}

/// Application hook that maps a validated CAS profile to a domain user.
///
/// `request` is only provided when `pass_request_to_verify` is configured.
#[async_trait]
pub trait Verify<U>: Send + Sync {
    async fn verify(&self, request: Option<&CasRequest>, profile: &CasProfile, done: Completion<U>);
}

/// Adapter for plain closures, see [`verify_fn`].
pub struct FnVerify<F>(F);

/// Wrap a closure as a [`Verify`] implementation.
pub fn verify_fn<U, F>(f: F) -> FnVerify<F>
where
    F: Fn(Option<&CasRequest>, &CasProfile, Completion<U>) + Send + Sync,
{
    FnVerify(f)
}

#[async_trait]
impl<U, F> Verify<U> for FnVerify<F>
where
    U: Send + 'static,
    F: Fn(Option<&CasRequest>, &CasProfile, Completion<U>) + Send + Sync,
{
    async fn verify(&self, request: Option<&CasRequest>, profile: &CasProfile, done: Completion<U>) {
        (self.0)(request, profile, done)
    }
}

/// Resolves users from a named CAS attribute, falling back to the
/// `<cas:user>` element. Rejects the attempt if neither is present.
#[derive(Debug, Clone)]
pub struct AttributeVerifier {
    attribute: String,
}

impl AttributeVerifier {
    pub fn new(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
        }
    }
}

#[async_trait]
impl Verify<String> for AttributeVerifier {
    async fn verify(&self, _request: Option<&CasRequest>, profile: &CasProfile, done: Completion<String>) {
        let user = profile
            .attribute(&self.attribute)
            .and_then(|v| v.first())
            .filter(|u| !u.is_empty())
            .or_else(|| profile.user.as_deref().filter(|u| !u.is_empty()))
            .map(String::from);

        let _ = match user {
            Some(user) => done.success(user, AuthInfo::default()),
            None => done.reject(AuthInfo::message(format!(
                "CAS response carries no '{}' attribute",
                self.attribute
            ))),
        };
    }
}

/// Per-request context that drives a [`ValidationOutcome`] to exactly one
/// [`AuthOutcome`].
pub struct VerifyAdapter<'a, U> {
    verify: &'a dyn Verify<U>,
    request: Option<&'a CasRequest>,
}

impl<'a, U: Send + 'static> VerifyAdapter<'a, U> {
    pub fn new(verify: &'a dyn Verify<U>, request: Option<&'a CasRequest>) -> Self {
        Self { verify, request }
    }

    pub async fn resolve(&self, outcome: ValidationOutcome) -> AuthOutcome<U> {
        match outcome {
            ValidationOutcome::Success(profile) => self.run_verify(&profile).await,
            ValidationOutcome::Failure { code, raw_message } => {
                debug!(
                    code = %code.as_str(),
                    cas_message = %raw_message,
                    "CAS ticket rejected"
                );
                AuthOutcome::Fail {
                    info: AuthInfo::message(code.message()),
                    status: UNAUTHORIZED,
                }
            }
            ValidationOutcome::Malformed { detail } => {
                AuthOutcome::Error(CasError::MalformedResponse(detail))
            }
        }
    }

    async fn run_verify(&self, profile: &CasProfile) -> AuthOutcome<U> {
        let (done, rx) = Completion::channel();

        self.verify.verify(self.request, profile, done).await;

        match rx.await {
            Ok(Verified::User { user, info }) => AuthOutcome::Success { user, info },
            Ok(Verified::Rejected { info }) => AuthOutcome::Fail {
                info,
                status: UNAUTHORIZED,
            },
            Ok(Verified::Error(err)) => AuthOutcome::Error(CasError::Verify(err)),
            Err(_) => AuthOutcome::Error(CasError::Unresolved),
        }
    }
}
