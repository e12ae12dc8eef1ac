//! JWT signing with RSA keys that never leave a TPM 2.0
//!
//! A [`TpmConfig`] names the TPM device and the key template. [`materialize`]
//! derives the key once, caches its public half and returns a [`Context`]
//! carrying the configuration. A [`TpmSigningMethod`] registered in a
//! [`SigningMethodRegistry`] then signs token input through a fresh TPM
//! session per call and verifies in software with the cached key.
//!
//! ```no_run
//! use tpm_jwt::{api, Context, KeyArg, SigningMethodRegistry, SimulatedTpm, TpmConfig};
//!
//! let registry = SigningMethodRegistry::with_defaults();
//! let method = api::install(&registry, SimulatedTpm::new());
//! let ctx = api::new_tpm_context(&method, &Context::background(), TpmConfig::default())?;
//!
//! let signer = registry.get("TPMRS256").expect("registered above");
//! let signature = signer.sign("header.claims", KeyArg::Context(&ctx))?;
//! signer.verify("header.claims", &signature, KeyArg::Context(&ctx))?;
//! # Ok::<(), tpm_jwt::TpmJwtError>(())
//! ```

pub mod adapters;
pub mod api;
mod context;
pub mod domain;
pub mod error;
pub mod jwt;
mod logic;
pub mod model;
pub mod ports;
pub mod use_cases;

// Re-export commonly used types
pub use adapters::SimulatedTpm;
#[cfg(feature = "tpm")]
pub use adapters::TssDevice;
pub use context::Context;
pub use error::{TpmJwtError, TpmJwtResult};
pub use jwt::{KeyArg, RsaPkcs1Method, SigningMethod, SigningMethodRegistry, TpmSigningMethod, TPM_RS256};
pub use model::{FlushScope, KeyTemplate, TpmConfig, DEFAULT_TPM_DEVICE};
pub use use_cases::{materialize, tpm_from_context, verification_key};
