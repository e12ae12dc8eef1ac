mod padding;
mod signature_encoding;

pub use padding::{pkcs1v15_padding, pss_padding, verify_rsa_signature};
pub use signature_encoding::{decode_segment, encode_segment};
