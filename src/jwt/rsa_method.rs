//! Software RSASSA-PKCS1-v1_5 methods (RS256, RS384, RS512)

use tracing::debug;

use super::{KeyArg, SigningMethod};
use crate::error::{KeyError, TokenError, TpmJwtResult};
use crate::logic::{decode_segment, encode_segment, pkcs1v15_padding, verify_rsa_signature};
use crate::model::{HashAlgorithm, SignatureScheme};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RsaPkcs1Method {
    alg: &'static str,
    hash: HashAlgorithm,
}

impl RsaPkcs1Method {
    pub const fn rs256() -> Self {
        Self {
            alg: "RS256",
            hash: HashAlgorithm::Sha256,
        }
    }

    pub const fn rs384() -> Self {
        Self {
            alg: "RS384",
            hash: HashAlgorithm::Sha384,
        }
    }

    pub const fn rs512() -> Self {
        Self {
            alg: "RS512",
            hash: HashAlgorithm::Sha512,
        }
    }
}

impl SigningMethod for RsaPkcs1Method {
    fn alg(&self) -> &str {
        self.alg
    }

    fn hash(&self) -> HashAlgorithm {
        self.hash
    }

    fn sign(&self, signing_input: &str, key: KeyArg<'_>) -> TpmJwtResult<String> {
        let KeyArg::RsaPrivate(key) = key else {
            return Err(TokenError::InvalidKeyType {
                expected: "RSA private key",
            }
            .into());
        };

        let digest = self.hash.digest(signing_input.as_bytes());
        let signature = key
            .sign(pkcs1v15_padding(self.hash), &digest)
            .map_err(|e| KeyError::SignOperationFailed {
                reason: e.to_string(),
            })?;
        Ok(encode_segment(&signature))
    }

    fn verify(&self, signing_input: &str, signature: &str, key: KeyArg<'_>) -> TpmJwtResult<()> {
        let KeyArg::RsaPublic(key) = key else {
            return Err(TokenError::InvalidKeyType {
                expected: "RSA public key",
            }
            .into());
        };

        let signature = decode_segment(signature)?;
        verify_rsa_signature(
            key,
            SignatureScheme::RsaSsa(self.hash),
            signing_input.as_bytes(),
            &signature,
        )?;
        debug!("{} signature verified", self.alg);
        Ok(())
    }
}
