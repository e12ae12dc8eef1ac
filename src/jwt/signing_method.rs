use rsa::{RsaPrivateKey, RsaPublicKey};

use crate::context::Context;
use crate::error::TpmJwtResult;
use crate::model::HashAlgorithm;

/// Key material handed to a signing method
#[derive(Debug, Clone, Copy)]
pub enum KeyArg<'a> {
    /// Request context carrying a materialized TPM configuration
    Context(&'a Context),
    RsaPrivate(&'a RsaPrivateKey),
    RsaPublic(&'a RsaPublicKey),
}

impl<'a> From<&'a Context> for KeyArg<'a> {
    fn from(ctx: &'a Context) -> Self {
        KeyArg::Context(ctx)
    }
}

impl<'a> From<&'a RsaPrivateKey> for KeyArg<'a> {
    fn from(key: &'a RsaPrivateKey) -> Self {
        KeyArg::RsaPrivate(key)
    }
}

impl<'a> From<&'a RsaPublicKey> for KeyArg<'a> {
    fn from(key: &'a RsaPublicKey) -> Self {
        KeyArg::RsaPublic(key)
    }
}

/// Signing capability for one JWT `alg` value
pub trait SigningMethod: Send + Sync {
    /// JWT header algorithm identifier
    fn alg(&self) -> &str;

    fn hash(&self) -> HashAlgorithm;

    /// Sign the JWT signing input, returning the unpadded base64url signature segment
    ///
    /// # Errors
    ///
    /// Returns `TokenError::InvalidKeyType` if `key` is not the kind this method needs
    fn sign(&self, signing_input: &str, key: KeyArg<'_>) -> TpmJwtResult<String>;

    /// Verify a base64url signature segment against the signing input
    fn verify(&self, signing_input: &str, signature: &str, key: KeyArg<'_>) -> TpmJwtResult<()>;
}
