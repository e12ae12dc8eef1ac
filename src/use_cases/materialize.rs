//! Materialize use case
//!
//! Reads the public key of the configured TPM key once and attaches the
//! completed configuration to a request context.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::context::Context;
use crate::domain::{DeviceSession, KeyObject};
use crate::error::{TokenError, TpmJwtResult};
use crate::model::{HashAlgorithm, SignatureScheme, TpmConfig};
use crate::ports::TpmDevice;
use rsa::RsaPublicKey;

/// Context entry holding a materialized configuration
struct Materialized(Arc<TpmConfig>);

/// Load the configured key once, cache its public key and attach the
/// configuration to a child of `parent`
///
/// The session used here is closed before returning; signing opens its own.
/// A configuration that already carries a public key for its current device
/// and template is attached as is; a stale one is loaded again.
///
/// # Errors
///
/// Returns errors if:
/// - The TPM cannot be opened
/// - The key cannot be created or loaded
pub fn materialize<D: TpmDevice>(
    device: &D,
    parent: &Context,
    mut config: TpmConfig,
) -> TpmJwtResult<Context> {
    if config.is_materialized() {
        debug!("Configuration for {} already materialized", config.tpm_device);
        return Ok(parent.with_value(Materialized(Arc::new(config))));
    }
    if config.is_stale() {
        info!(
            "Cached key no longer matches the template for {}, reloading",
            config.tpm_device
        );
    }

    if config.key_template.scheme != SignatureScheme::RsaSsa(HashAlgorithm::Sha256) {
        warn!(
            "Key template uses {:?} but verification always checks RSASSA-PKCS1-v1_5 SHA-256",
            config.key_template.scheme
        );
    }

    let mut session = DeviceSession::open(device, &config.tpm_device)?;
    let key = KeyObject::load_or_create(&mut session, &config.key_template)?;
    let public_key = key.public_key().clone();
    let name = key.name();
    if let Err(e) = key.close() {
        warn!("{}", e);
    }
    if let Err(e) = session.close() {
        warn!("{}", e);
    }

    info!("Materialized key {} on {}", name, config.tpm_device);
    config.cache_key(public_key, name);
    Ok(parent.with_value(Materialized(Arc::new(config))))
}

/// Materialized configuration carried by `ctx`, if any
pub fn tpm_from_context(ctx: &Context) -> Option<Arc<TpmConfig>> {
    ctx.value::<Materialized>()
        .map(|materialized| Arc::clone(&materialized.0))
}

/// Key to verify tokens signed with `config`; never touches the TPM
///
/// # Errors
///
/// Returns `TokenError::MissingConfiguration` if `config` was never materialized
pub fn verification_key(config: &TpmConfig) -> TpmJwtResult<RsaPublicKey> {
    config
        .public_key()
        .cloned()
        .ok_or_else(|| TokenError::MissingConfiguration.into())
}
