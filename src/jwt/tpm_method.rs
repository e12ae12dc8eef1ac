//! TPM-backed RS256 signing method

use std::fmt;
use std::sync::Arc;

use tracing::{debug, info};

use super::{KeyArg, RsaPkcs1Method, SigningMethod, SigningMethodRegistry};
use crate::error::{TokenError, TpmJwtResult};
use crate::logic::encode_segment;
use crate::model::HashAlgorithm;
use crate::ports::TpmDevice;
use crate::use_cases::{sign_with_tpm, tpm_from_context, verification_key};

/// Algorithm name the TPM method registers under by default
pub const TPM_RS256: &str = "TPMRS256";

/// Signs with a TPM-resident key and verifies in software
///
/// `sign` needs a [`KeyArg::Context`] produced by [`crate::materialize`].
/// `verify` takes the cached public key (or the context holding it) and is
/// delegated to the software fallback, so it works while the TPM is unavailable. The fallback is always
/// RSASSA-PKCS1-v1_5, whatever scheme the key template names.
pub struct TpmSigningMethod<D: TpmDevice> {
    alg: String,
    hash: HashAlgorithm,
    fallback: Arc<dyn SigningMethod>,
    device: Arc<D>,
}

impl<D: TpmDevice + 'static> TpmSigningMethod<D> {
    /// `TPMRS256`: RSASSA-PKCS1-v1_5 with SHA-256, verified as RS256
    pub fn rs256(device: Arc<D>) -> Self {
        Self {
            alg: TPM_RS256.to_string(),
            hash: HashAlgorithm::Sha256,
            fallback: Arc::new(RsaPkcs1Method::rs256()),
            device,
        }
    }

    /// The software method used for verification
    pub fn fallback(&self) -> &Arc<dyn SigningMethod> {
        &self.fallback
    }

    pub fn device(&self) -> &Arc<D> {
        &self.device
    }

    /// Take over the fallback's standard `alg` slot in `registry`
    ///
    /// Later lookups of that name (e.g. `RS256`) through `registry` resolve
    /// to the TPM-backed method.
    pub fn override_standard(&self, registry: &SigningMethodRegistry) -> Arc<Self> {
        let method = Arc::new(Self {
            alg: self.fallback.alg().to_string(),
            hash: self.hash,
            fallback: Arc::clone(&self.fallback),
            device: Arc::clone(&self.device),
        });
        registry.register(method.clone());
        info!("{} now signs with the TPM", method.alg);
        method
    }
}

impl<D: TpmDevice + 'static> SigningMethod for TpmSigningMethod<D> {
    fn alg(&self) -> &str {
        &self.alg
    }

    fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    fn sign(&self, signing_input: &str, key: KeyArg<'_>) -> TpmJwtResult<String> {
        let KeyArg::Context(ctx) = key else {
            return Err(TokenError::InvalidKeyType {
                expected: "context carrying a TPM configuration",
            }
            .into());
        };
        let config = tpm_from_context(ctx).ok_or(TokenError::MissingConfiguration)?;

        let signature = sign_with_tpm(self.device.as_ref(), &config, signing_input.as_bytes())?;
        debug!("{} signed {} bytes", self.alg, signing_input.len());
        Ok(encode_segment(&signature))
    }

    fn verify(&self, signing_input: &str, signature: &str, key: KeyArg<'_>) -> TpmJwtResult<()> {
        // a materialized context stands in for its cached public key
        if let KeyArg::Context(ctx) = key {
            let config = tpm_from_context(ctx).ok_or(TokenError::MissingConfiguration)?;
            let public_key = verification_key(&config)?;
            return self
                .fallback
                .verify(signing_input, signature, KeyArg::RsaPublic(&public_key));
        }
        self.fallback.verify(signing_input, signature, key)
    }
}

impl<D: TpmDevice> fmt::Debug for TpmSigningMethod<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TpmSigningMethod")
            .field("alg", &self.alg)
            .field("hash", &self.hash)
            .field("fallback", &self.fallback.alg())
            .finish()
    }
}
