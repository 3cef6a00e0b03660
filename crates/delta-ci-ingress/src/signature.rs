//! HMAC verification of inbound webhook bodies (spec §4.2, invariant P2).

use hmac::{Hmac, Mac};
use sha1::Sha1;
use sha2::Sha256;

use crate::error::{IngressError, IngressResult};

type HmacSha1 = Hmac<Sha1>;
type HmacSha256 = Hmac<Sha256>;

/// Verifies `header` (e.g. `sha256=<hex>` or `sha1=<hex>`) against `body`
/// under `secret`. The digest algorithm is selected by the header's
/// prefix; comparison is constant-time via [`Mac::verify_slice`].
pub fn verify_signature(secret: &[u8], body: &[u8], header: &str) -> IngressResult<()> {
    let (algo, hex_digest) = header
        .split_once('=')
        .ok_or_else(|| IngressError::Unauthorized("missing signature prefix".to_string()))?;

    let expected = hex::decode(hex_digest)
        .map_err(|_| IngressError::Unauthorized("signature is not valid hex".to_string()))?;

    match algo {
        "sha256" => {
            let mut mac = HmacSha256::new_from_slice(secret)
                .map_err(|_| IngressError::Unauthorized("invalid hmac key".to_string()))?;
            mac.update(body);
            mac.verify_slice(&expected)
                .map_err(|_| IngressError::Unauthorized("signature mismatch".to_string()))
        }
        "sha1" => {
            let mut mac = HmacSha1::new_from_slice(secret)
                .map_err(|_| IngressError::Unauthorized("invalid hmac key".to_string()))?;
            mac.update(body);
            mac.verify_slice(&expected)
                .map_err(|_| IngressError::Unauthorized("signature mismatch".to_string()))
        }
        other => Err(IngressError::Unauthorized(format!(
            "unsupported signature algorithm: {other}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hmac::Mac;

    fn sign_sha256(secret: &[u8], body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    #[test]
    fn valid_sha256_signature_is_accepted() {
        let secret = b"wh-secret";
        let body = b"payload bytes";
        let header = sign_sha256(secret, body);
        assert!(verify_signature(secret, body, &header).is_ok());
    }

    #[test]
    fn tampered_body_is_rejected() {
        let secret = b"wh-secret";
        let header = sign_sha256(secret, b"payload bytes");
        let err = verify_signature(secret, b"payload BYTES", &header)
            .expect_err("tampered body must fail verification");
        assert!(matches!(err, IngressError::Unauthorized(_)));
    }

    #[test]
    fn unknown_algorithm_prefix_is_rejected() {
        let err = verify_signature(b"secret", b"body", "md5=deadbeef")
            .expect_err("unsupported algorithm must be rejected");
        assert!(matches!(err, IngressError::Unauthorized(_)));
    }

    #[test]
    fn malformed_header_without_prefix_is_rejected() {
        let err = verify_signature(b"secret", b"body", "deadbeef")
            .expect_err("missing prefix must be rejected");
        assert!(matches!(err, IngressError::Unauthorized(_)));
    }
}
