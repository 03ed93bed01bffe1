//! OIDC gateway core library: typed claim access and claim policy.
//!
//! Nothing in this crate performs I/O. It receives the claim set of an
//! already-verified token and decides whether the caller may proceed.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod claims;
pub mod policy;

pub use claims::{ClaimError, Claims};
pub use policy::{AuthorizationDecision, ClaimRule, DenyCause, PolicyEngine};
