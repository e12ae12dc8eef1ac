//! Key templates describing the RSA keys created inside the TPM
//!
//! A template plays the role of the TPM2B_PUBLIC area handed to
//! create-primary. The TPM derives a primary key deterministically from the
//! owner hierarchy seed and this template, so two create-primary calls with
//! the same template yield the same key.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::error::KeyError;

/// Hash algorithms usable as name algorithm or signing digest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashAlgorithm {
    Sha256,
    Sha384,
    Sha512,
}

impl HashAlgorithm {
    /// TPM_ALG_ID of the hash
    pub fn tpm_alg_id(self) -> u16 {
        match self {
            HashAlgorithm::Sha256 => 0x000B,
            HashAlgorithm::Sha384 => 0x000C,
            HashAlgorithm::Sha512 => 0x000D,
        }
    }

    pub fn digest(self, data: &[u8]) -> Vec<u8> {
        match self {
            HashAlgorithm::Sha256 => Sha256::digest(data).to_vec(),
            HashAlgorithm::Sha384 => Sha384::digest(data).to_vec(),
            HashAlgorithm::Sha512 => Sha512::digest(data).to_vec(),
        }
    }

    /// Length in bytes of a digest
    pub fn output_len(self) -> usize {
        match self {
            HashAlgorithm::Sha256 => 32,
            HashAlgorithm::Sha384 => 48,
            HashAlgorithm::Sha512 => 64,
        }
    }
}

impl fmt::Display for HashAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HashAlgorithm::Sha256 => f.write_str("SHA256"),
            HashAlgorithm::Sha384 => f.write_str("SHA384"),
            HashAlgorithm::Sha512 => f.write_str("SHA512"),
        }
    }
}

/// Asymmetric algorithm family of a key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyAlgorithm {
    Rsa,
}

impl KeyAlgorithm {
    pub fn tpm_alg_id(self) -> u16 {
        match self {
            KeyAlgorithm::Rsa => 0x0001,
        }
    }
}

/// Signing scheme bound to the key at creation time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "scheme", content = "hash", rename_all = "lowercase")]
pub enum SignatureScheme {
    /// RSASSA-PKCS1-v1_5
    RsaSsa(HashAlgorithm),
    /// RSASSA-PSS
    RsaPss(HashAlgorithm),
}

impl SignatureScheme {
    pub fn tpm_alg_id(self) -> u16 {
        match self {
            SignatureScheme::RsaSsa(_) => 0x0014,
            SignatureScheme::RsaPss(_) => 0x0016,
        }
    }

    pub fn hash(self) -> HashAlgorithm {
        match self {
            SignatureScheme::RsaSsa(hash) | SignatureScheme::RsaPss(hash) => hash,
        }
    }
}

bitflags! {
    /// TPMA_OBJECT bit set
    ///
    /// Serialized as the raw `u32` register value; unknown bits are retained.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ObjectAttributes: u32 {
        const FIXED_TPM = 1 << 1;
        const ST_CLEAR = 1 << 2;
        const FIXED_PARENT = 1 << 4;
        const SENSITIVE_DATA_ORIGIN = 1 << 5;
        const USER_WITH_AUTH = 1 << 6;
        const ADMIN_WITH_POLICY = 1 << 7;
        const NO_DA = 1 << 10;
        const ENCRYPTED_DUPLICATION = 1 << 11;
        const RESTRICTED = 1 << 16;
        const DECRYPT = 1 << 17;
        const SIGN = 1 << 18;
    }
}

impl Serialize for ObjectAttributes {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.bits().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ObjectAttributes {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        u32::deserialize(deserializer).map(Self::from_bits_retain)
    }
}

/// Parameters of a key created under the owner hierarchy
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyTemplate {
    pub algorithm: KeyAlgorithm,
    pub name_alg: HashAlgorithm,
    pub attributes: ObjectAttributes,
    pub scheme: SignatureScheme,
    pub key_bits: u16,
    /// Public exponent, 0 selects the TPM default of 65537
    #[serde(default)]
    pub exponent: u32,
    #[serde(default, with = "hex_bytes")]
    pub auth_policy: Vec<u8>,
}

impl KeyTemplate {
    /// Attestation key: restricted RSA-2048 signing key, RSASSA + SHA-256
    pub fn attestation_rsa2048() -> Self {
        Self {
            algorithm: KeyAlgorithm::Rsa,
            name_alg: HashAlgorithm::Sha256,
            attributes: ObjectAttributes::SIGN
                | ObjectAttributes::RESTRICTED
                | ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
                | ObjectAttributes::SENSITIVE_DATA_ORIGIN
                | ObjectAttributes::USER_WITH_AUTH,
            scheme: SignatureScheme::RsaSsa(HashAlgorithm::Sha256),
            key_bits: 2048,
            exponent: 0,
            auth_policy: Vec::new(),
        }
    }

    /// General purpose unrestricted RSA-2048 signing key, RSASSA + SHA-256
    pub fn unrestricted_rsa2048() -> Self {
        Self {
            algorithm: KeyAlgorithm::Rsa,
            name_alg: HashAlgorithm::Sha256,
            attributes: ObjectAttributes::FIXED_TPM
                | ObjectAttributes::FIXED_PARENT
                | ObjectAttributes::SENSITIVE_DATA_ORIGIN
                | ObjectAttributes::USER_WITH_AUTH
                | ObjectAttributes::SIGN,
            scheme: SignatureScheme::RsaSsa(HashAlgorithm::Sha256),
            key_bits: 2048,
            exponent: 0,
            auth_policy: Vec::new(),
        }
    }

    pub fn is_restricted(&self) -> bool {
        self.attributes.contains(ObjectAttributes::RESTRICTED)
    }

    pub fn effective_exponent(&self) -> u32 {
        if self.exponent == 0 {
            65537
        } else {
            self.exponent
        }
    }

    /// Check that the template describes a key this crate can sign with
    pub fn validate(&self) -> Result<(), KeyError> {
        if !self.attributes.contains(ObjectAttributes::SIGN) {
            return Err(KeyError::UnsupportedTemplate {
                reason: "template lacks the sign attribute".to_string(),
            });
        }
        if self.is_restricted() && self.attributes.contains(ObjectAttributes::DECRYPT) {
            return Err(KeyError::UnsupportedTemplate {
                reason: "restricted keys cannot be both sign and decrypt".to_string(),
            });
        }
        if !self.auth_policy.is_empty() && self.auth_policy.len() != self.name_alg.output_len() {
            return Err(KeyError::UnsupportedTemplate {
                reason: format!(
                    "auth policy is {} bytes, {} digests are {}",
                    self.auth_policy.len(),
                    self.name_alg,
                    self.name_alg.output_len()
                ),
            });
        }
        if !matches!(self.key_bits, 1024 | 2048 | 3072 | 4096) {
            return Err(KeyError::UnsupportedTemplate {
                reason: format!("unsupported RSA key size {}", self.key_bits),
            });
        }
        Ok(())
    }

    /// SHA-256 over the template in TPMT_PUBLIC field order, unique field omitted
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update(self.algorithm.tpm_alg_id().to_be_bytes());
        hasher.update(self.name_alg.tpm_alg_id().to_be_bytes());
        hasher.update(self.attributes.bits().to_be_bytes());
        // validate() bounds the policy to one digest
        let policy_len = u16::try_from(self.auth_policy.len()).unwrap_or(u16::MAX);
        hasher.update(policy_len.to_be_bytes());
        hasher.update(&self.auth_policy);
        hasher.update(self.scheme.tpm_alg_id().to_be_bytes());
        hasher.update(self.scheme.hash().tpm_alg_id().to_be_bytes());
        hasher.update(self.key_bits.to_be_bytes());
        hasher.update(self.exponent.to_be_bytes());
        hasher.finalize().into()
    }
}

impl Default for KeyTemplate {
    fn default() -> Self {
        Self::unrestricted_rsa2048()
    }
}

mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(deserializer)?;
        hex::decode(s).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalog_templates_are_sign_capable() {
        for template in [
            KeyTemplate::attestation_rsa2048(),
            KeyTemplate::unrestricted_rsa2048(),
        ] {
            assert!(template.attributes.contains(ObjectAttributes::SIGN));
            assert!(template.validate().is_ok());
            assert_eq!(template.key_bits, 2048);
            assert_eq!(
                template.scheme,
                SignatureScheme::RsaSsa(HashAlgorithm::Sha256)
            );
        }
    }

    #[test]
    fn test_only_attestation_template_is_restricted() {
        assert!(KeyTemplate::attestation_rsa2048().is_restricted());
        assert!(!KeyTemplate::unrestricted_rsa2048().is_restricted());
    }

    #[test]
    fn test_validate_rejects_non_signing_template() {
        let mut template = KeyTemplate::unrestricted_rsa2048();
        template.attributes = ObjectAttributes::FIXED_TPM | ObjectAttributes::DECRYPT;

        assert!(matches!(
            template.validate(),
            Err(KeyError::UnsupportedTemplate { .. })
        ));
    }

    #[test]
    fn test_validate_rejects_odd_key_size() {
        let mut template = KeyTemplate::unrestricted_rsa2048();
        template.key_bits = 1000;
        assert!(template.validate().is_err());
    }

    #[test]
    fn test_validate_rejects_policy_of_wrong_size() {
        let mut template = KeyTemplate::unrestricted_rsa2048();
        template.auth_policy = vec![0xAA; 32];
        assert!(template.validate().is_ok());

        for len in [20, 33, 70_000] {
            template.auth_policy = vec![0xAA; len];
            assert!(matches!(
                template.validate(),
                Err(KeyError::UnsupportedTemplate { .. })
            ));
        }
    }

    #[test]
    fn test_attributes_keep_raw_register_form() {
        let attributes = KeyTemplate::unrestricted_rsa2048().attributes;
        assert_eq!(attributes.bits(), 0x0004_0072);

        let json = serde_json::to_string(&attributes).unwrap();
        assert_eq!(json, "262258");
        let parsed: ObjectAttributes = serde_json::from_str("2147745906").unwrap();
        assert!(parsed.contains(ObjectAttributes::SIGN));
        assert_eq!(parsed.bits(), 0x8004_0072);
    }

    #[test]
    fn test_digest_distinguishes_templates() {
        let restricted = KeyTemplate::attestation_rsa2048();
        let unrestricted = KeyTemplate::unrestricted_rsa2048();

        assert_eq!(restricted.digest(), restricted.clone().digest());
        assert_ne!(restricted.digest(), unrestricted.digest());

        let mut with_policy = unrestricted.clone();
        with_policy.auth_policy = vec![0xAA; 32];
        assert_ne!(with_policy.digest(), unrestricted.digest());
    }

    #[test]
    fn test_effective_exponent() {
        let mut template = KeyTemplate::default();
        assert_eq!(template.effective_exponent(), 65537);
        template.exponent = 3;
        assert_eq!(template.effective_exponent(), 3);
    }

    #[test]
    fn test_hash_output_len_matches_digest() {
        for hash in [
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            assert_eq!(hash.digest(b"abc").len(), hash.output_len());
        }
    }
}
