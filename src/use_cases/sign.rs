//! Sign use case
//!
//! Every call opens a fresh connection and reloads the key: TPM handles are
//! not assumed to survive between independent calls.

use tracing::warn;

use crate::domain::{DeviceSession, KeyObject};
use crate::error::TpmJwtResult;
use crate::model::TpmConfig;
use crate::ports::TpmDevice;

/// Sign `message` with the key described by `config`
///
/// The key is flushed before the connection is closed, on success and on
/// every error path. Release failures are logged and do not change the result.
pub fn sign_with_tpm<D: TpmDevice>(
    device: &D,
    config: &TpmConfig,
    message: &[u8],
) -> TpmJwtResult<Vec<u8>> {
    let mut session = DeviceSession::open(device, &config.tpm_device)?;

    let signature = {
        let mut key = KeyObject::load_or_create(&mut session, &config.key_template)?;
        if let Some(expected) = config.key_name() {
            if expected != key.name() {
                warn!(
                    "Key {} on {} differs from materialized key {}",
                    key.name(),
                    config.tpm_device,
                    expected
                );
            }
        }
        let signature = key.sign(message);
        if let Err(e) = key.close() {
            warn!("{}", e);
        }
        signature?
    };

    if let Err(e) = session.close() {
        warn!("{}", e);
    }
    Ok(signature)
}
