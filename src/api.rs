//! Entry points for applications wiring the TPM signer into their token code

use std::sync::Arc;

use tracing::info;

use crate::context::Context;
use crate::error::TpmJwtResult;
use crate::jwt::{SigningMethod, SigningMethodRegistry, TpmSigningMethod};
use crate::ports::TpmDevice;
use crate::use_cases::materialize;

pub use crate::model::*;

/// Register the default `TPMRS256` method backed by `device`
///
/// Any method previously registered under the same name is replaced.
pub fn install<D: TpmDevice + 'static>(
    registry: &SigningMethodRegistry,
    device: D,
) -> Arc<TpmSigningMethod<D>> {
    let method = Arc::new(TpmSigningMethod::rs256(Arc::new(device)));
    registry.register(method.clone());
    info!("Registered {} signing method", method.alg());
    method
}

/// Materialize `config` against the method's device and return a context
/// carrying it
pub fn new_tpm_context<D: TpmDevice + 'static>(
    method: &TpmSigningMethod<D>,
    parent: &Context,
    config: TpmConfig,
) -> TpmJwtResult<Context> {
    materialize(method.device().as_ref(), parent, config)
}

#[cfg(feature = "tpm")]
/// Register `TPMRS256` against the kernel TPM
pub fn install_tpm(registry: &SigningMethodRegistry) -> Arc<TpmSigningMethod<crate::adapters::TssDevice>> {
    install(registry, crate::adapters::TssDevice)
}
