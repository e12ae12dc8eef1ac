//! Error types for tpm-jwt
//!
//! This module defines the error hierarchy for all tpm-jwt operations.
//! Errors are grouped by the layer that raised them and use thiserror.

use thiserror::Error;

use crate::model::HandleClass;

/// Result type alias for tpm-jwt operations
pub type TpmJwtResult<T> = Result<T, TpmJwtError>;

/// Top-level error type for all tpm-jwt operations
#[derive(Error, Debug)]
pub enum TpmJwtError {
    /// TPM device and handle management errors
    #[error("TPM device error: {0}")]
    Device(#[from] DeviceError),

    /// Errors from key objects inside the TPM
    #[error("TPM key error: {0}")]
    Key(#[from] KeyError),

    /// Signing-method contract errors
    #[error("Token signing error: {0}")]
    Token(#[from] TokenError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Device-level errors
#[derive(Error, Debug)]
pub enum DeviceError {
    /// The device could not be opened
    #[error("can't open TPM {device:?}: {reason}")]
    Unavailable { device: String, reason: String },

    /// Listing the handles of a class failed
    #[error("getting {class} handles: {reason}")]
    HandleEnumerationFailed { class: HandleClass, reason: String },

    /// Releasing a handle failed
    #[error("error flushing handle 0x{handle:08x}: {reason}")]
    HandleFlushFailed { handle: u32, reason: String },

    /// Releasing the connection failed
    #[error("error closing TPM {device:?}: {reason}")]
    CloseFailed { device: String, reason: String },
}

/// Key object errors
#[derive(Error, Debug)]
pub enum KeyError {
    /// create-primary was rejected by the TPM
    #[error("failed to create key: {reason}")]
    CreationFailed { reason: String },

    /// The key's public area could not be read or used
    #[error("failed to load key: {reason}")]
    LoadFailed { reason: String },

    /// The TPM refused to sign
    #[error("failed to sign data: {reason}")]
    SignOperationFailed { reason: String },

    /// The template cannot be used for signing
    #[error("unsupported key template: {reason}")]
    UnsupportedTemplate { reason: String },
}

/// Errors raised by the signing-method contract
#[derive(Error, Debug)]
pub enum TokenError {
    /// The context carried no materialized configuration
    #[error("missing TPM configuration in provided context")]
    MissingConfiguration,

    /// The key argument had the wrong kind
    #[error("invalid key type: expected {expected}")]
    InvalidKeyType { expected: &'static str },

    /// The signature segment is not unpadded base64url
    #[error("invalid signature encoding: {reason}")]
    InvalidSignatureEncoding { reason: String },

    /// The signature does not match the signing input
    #[error("signature verification failed: {reason}")]
    VerificationFailed { reason: String },
}

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Unrecognised flush scope name
    #[error("unknown flush scope {scope:?} (expected all, loaded, saved, transient or none)")]
    UnknownFlushScope { scope: String },
}

impl From<base64::DecodeError> for TpmJwtError {
    fn from(err: base64::DecodeError) -> Self {
        TpmJwtError::Token(TokenError::InvalidSignatureEncoding {
            reason: err.to_string(),
        })
    }
}

impl From<rsa::Error> for TpmJwtError {
    fn from(err: rsa::Error) -> Self {
        TpmJwtError::Token(TokenError::VerificationFailed {
            reason: err.to_string(),
        })
    }
}
