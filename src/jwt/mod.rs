//! Pluggable JWT signing methods
//!
//! Token-processing code resolves the `alg` header through a
//! [`SigningMethodRegistry`] owned by the application and calls the resolved
//! [`SigningMethod`] without knowing whether a TPM is involved.

mod registry;
mod rsa_method;
mod signing_method;
mod tpm_method;

pub use registry::SigningMethodRegistry;
pub use rsa_method::RsaPkcs1Method;
pub use signing_method::{KeyArg, SigningMethod};
pub use tpm_method::{TpmSigningMethod, TPM_RS256};
