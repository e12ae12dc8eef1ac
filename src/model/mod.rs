mod config;
mod handle;
mod template;

pub use config::{TpmConfig, DEFAULT_TPM_DEVICE};
pub use handle::{FlushScope, HandleClass, TpmHandle};
pub use template::{HashAlgorithm, KeyAlgorithm, KeyTemplate, ObjectAttributes, SignatureScheme};
