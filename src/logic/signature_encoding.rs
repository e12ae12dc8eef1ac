use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};

use crate::error::TpmJwtResult;

/// Encode a JWT segment as unpadded base64url
pub fn encode_segment(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Decode a JWT segment, tolerating trailing padding
pub fn decode_segment(segment: &str) -> TpmJwtResult<Vec<u8>> {
    Ok(URL_SAFE_NO_PAD.decode(segment.trim_end_matches('='))?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{TokenError, TpmJwtError};

    #[test]
    fn test_encode_has_no_padding_or_std_alphabet() {
        let encoded = encode_segment(&[0xfb, 0xff, 0xfe, 0x01]);
        assert_eq!(encoded, "-__-AQ");
        assert!(!encoded.contains('='));
    }

    #[test]
    fn test_decode_accepts_padded_input() {
        assert_eq!(decode_segment("-__-AQ==").unwrap(), vec![0xfb, 0xff, 0xfe, 0x01]);
        assert_eq!(decode_segment("-__-AQ").unwrap(), vec![0xfb, 0xff, 0xfe, 0x01]);
    }

    #[test]
    fn test_decode_rejects_std_alphabet() {
        let result = decode_segment("+//+AQ");
        assert!(matches!(
            result,
            Err(TpmJwtError::Token(TokenError::InvalidSignatureEncoding { .. }))
        ));
    }
}
