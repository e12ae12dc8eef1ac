//! RSA signature padding selection shared by the TPM simulator and the
//! software verifier

use rsa::{Pkcs1v15Sign, Pss, RsaPublicKey};
use sha2::{Sha256, Sha384, Sha512};

use crate::model::{HashAlgorithm, SignatureScheme};

pub fn pkcs1v15_padding(hash: HashAlgorithm) -> Pkcs1v15Sign {
    match hash {
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        HashAlgorithm::Sha384 => Pkcs1v15Sign::new::<Sha384>(),
        HashAlgorithm::Sha512 => Pkcs1v15Sign::new::<Sha512>(),
    }
}

pub fn pss_padding(hash: HashAlgorithm) -> Pss {
    match hash {
        HashAlgorithm::Sha256 => Pss::new::<Sha256>(),
        HashAlgorithm::Sha384 => Pss::new::<Sha384>(),
        HashAlgorithm::Sha512 => Pss::new::<Sha512>(),
    }
}

/// Verify `signature` over `message` (not its digest) under `scheme`
pub fn verify_rsa_signature(
    key: &RsaPublicKey,
    scheme: SignatureScheme,
    message: &[u8],
    signature: &[u8],
) -> Result<(), rsa::Error> {
    let digest = scheme.hash().digest(message);
    match scheme {
        SignatureScheme::RsaSsa(hash) => key.verify(pkcs1v15_padding(hash), &digest, signature),
        SignatureScheme::RsaPss(hash) => key.verify(pss_padding(hash), &digest, signature),
    }
}
