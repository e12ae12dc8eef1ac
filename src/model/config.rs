//! Deployment configuration for a TPM-resident signing key

use rsa::RsaPublicKey;
use serde::{Deserialize, Serialize};

use super::KeyTemplate;

pub const DEFAULT_TPM_DEVICE: &str = "/dev/tpmrm0";

/// Describes which TPM and which key template to sign with
///
/// The public key is filled in by [`crate::materialize`] and cannot be set
/// any other way. Deserialized configurations always start without it. The
/// cached key only counts while `tpm_device` and `key_template` still match
/// what it was read for.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TpmConfig {
    pub tpm_device: String,
    /// Optional key id, usually published as the JWT `kid`
    #[serde(default)]
    pub key_id: Option<String>,
    #[serde(default)]
    pub key_template: KeyTemplate,
    #[serde(skip)]
    cached: Option<CachedKey>,
}

#[derive(Debug, Clone)]
struct CachedKey {
    public_key: RsaPublicKey,
    name: String,
    tpm_device: String,
    template_digest: [u8; 32],
}

impl TpmConfig {
    pub fn new(tpm_device: impl Into<String>, key_template: KeyTemplate) -> Self {
        Self {
            tpm_device: tpm_device.into(),
            key_id: None,
            key_template,
            cached: None,
        }
    }

    pub fn with_key_id(mut self, key_id: impl Into<String>) -> Self {
        self.key_id = Some(key_id.into());
        self
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Public key read from the TPM, `None` until materialized
    pub fn public_key(&self) -> Option<&RsaPublicKey> {
        self.cached().map(|cached| &cached.public_key)
    }

    /// Hex name digest of the TPM key, `None` until materialized
    pub fn key_name(&self) -> Option<&str> {
        self.cached().map(|cached| cached.name.as_str())
    }

    pub fn is_materialized(&self) -> bool {
        self.cached().is_some()
    }

    /// A key was cached but the device or template changed since
    pub fn is_stale(&self) -> bool {
        self.cached.is_some() && self.cached().is_none()
    }

    fn cached(&self) -> Option<&CachedKey> {
        self.cached.as_ref().filter(|cached| {
            cached.tpm_device == self.tpm_device
                && cached.template_digest == self.key_template.digest()
        })
    }

    /// Record what the TPM reported for the current device and template
    ///
    /// A key that still matches is never replaced; a stale one is.
    pub(crate) fn cache_key(&mut self, public_key: RsaPublicKey, key_name: String) -> bool {
        if self.is_materialized() {
            return false;
        }
        self.cached = Some(CachedKey {
            public_key,
            name: key_name,
            tpm_device: self.tpm_device.clone(),
            template_digest: self.key_template.digest(),
        });
        true
    }
}

impl Default for TpmConfig {
    fn default() -> Self {
        Self::new(DEFAULT_TPM_DEVICE, KeyTemplate::default())
    }
}
