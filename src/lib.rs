//! Sentinel CAS Authentication
//!
//! CAS 2.0 authentication strategy for the Sentinel auth agent. The
//! strategy answers every request with one terminal [`AuthOutcome`]:
//! a redirect to the CAS login page, an authenticated user, a 401 failure,
//! or an error.
//!
//! ```rust,ignore
//! use sentinel_cas_auth::{AttributeVerifier, CasConfig, CasRequest, CasStrategy, Strategy};
//!
//! let strategy = CasStrategy::new(config, AttributeVerifier::new("uid"))?;
//! let outcome = strategy
//!     .authenticate(&CasRequest::from_uri("/cas?ticket=ST-1"), &Default::default())
//!     .await;
//! ```

pub mod cas;

pub use cas::*;
