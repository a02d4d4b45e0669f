//! CAS 2.0 service-ticket authentication.
//!
//! Redirects unauthenticated callers to the CAS login page, validates the
//! returned service ticket against `serviceValidate` and resolves the caller
//! through an application-supplied verify function.

pub mod config;
pub mod error;
pub mod request;
pub mod response;
pub mod strategy;
pub mod validator;
pub mod verify;

pub use config::{CasConfig, CasConfigJson};
pub use error::{BoxError, CasError};
pub use request::CasRequest;
pub use response::{parse, AttributeValue, Attributes, CasProfile, FailureCode, ValidationOutcome};
pub use strategy::{login_url, AuthOutcome, AuthenticateOptions, CasStrategy, Strategy};
pub use validator::{validation_url, HttpTransport, TicketValidator, ValidationTransport, MAX_BODY_BYTES};
pub use verify::{
    verify_fn, AlreadyResolved, AttributeVerifier, AuthInfo, Completion, Verify, VerifyAdapter,
};
