//! TpmDevice / TpmSession traits - the TPM command layer

use rsa::{BigUint, RsaPublicKey};
use thiserror::Error;

use crate::model::{HandleClass, KeyTemplate, TpmHandle};

/// Failure reported by the TPM command layer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct CommandError {
    /// TPM_RC value, when the failure came from the TPM itself
    pub response_code: Option<u32>,
    pub message: String,
}

impl CommandError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            response_code: None,
            message: message.into(),
        }
    }

    pub fn with_code(response_code: u32, message: impl Into<String>) -> Self {
        Self {
            response_code: Some(response_code),
            message: message.into(),
        }
    }
}

pub type CommandResult<T> = Result<T, CommandError>;

/// Public area of an RSA object as reported by the TPM
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublicArea {
    /// Big-endian modulus (the TPMT_PUBLIC unique field)
    pub modulus: Vec<u8>,
    pub exponent: u32,
    /// TPM2B_NAME: name algorithm id followed by the digest of the public area
    pub name: Vec<u8>,
}

impl PublicArea {
    /// Name without its two-byte algorithm prefix
    pub fn name_digest(&self) -> &[u8] {
        self.name.get(2..).unwrap_or_default()
    }

    pub fn to_rsa_public_key(&self) -> Result<RsaPublicKey, rsa::Error> {
        let exponent = if self.exponent == 0 {
            65537
        } else {
            self.exponent
        };
        RsaPublicKey::new(
            BigUint::from_bytes_be(&self.modulus),
            BigUint::from_bytes_be(&exponent.to_be_bytes()),
        )
    }
}

/// Capability to open a connection to a TPM
///
/// Implementations must be shareable across threads: a single device value
/// backs every concurrent `sign()` call.
pub trait TpmDevice: Send + Sync {
    /// The type of connection returned
    type Session: TpmSession;

    /// Open the TPM at `path`
    fn open(&self, path: &str) -> CommandResult<Self::Session>;
}

/// Commands issued over an open TPM connection
pub trait TpmSession {
    /// List the handles currently present in `class`
    fn get_handles(&mut self, class: HandleClass) -> CommandResult<Vec<TpmHandle>>;

    /// Release a transient object or session handle
    fn flush_context(&mut self, handle: TpmHandle) -> CommandResult<()>;

    /// Create (or re-derive) a primary key under the owner hierarchy
    ///
    /// # Returns
    ///
    /// The transient handle of the loaded key and its public area
    fn create_primary(&mut self, template: &KeyTemplate) -> CommandResult<(TpmHandle, PublicArea)>;

    /// Read back the public area of a loaded object
    fn read_public(&mut self, handle: TpmHandle) -> CommandResult<PublicArea>;

    /// Sign `message` with the key at `handle` using the scheme in `template`
    ///
    /// The implementation is responsible for digesting the message; restricted
    /// keys need the digest to be computed by the TPM.
    fn sign(
        &mut self,
        handle: TpmHandle,
        message: &[u8],
        template: &KeyTemplate,
    ) -> CommandResult<Vec<u8>>;

    /// Close the connection
    fn close(&mut self) -> CommandResult<()>;
}
