use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use hmac::{Hmac, Mac};
use sha2::Sha256;

pub const SIGNATURE_HEADER: &str = "x-line-signature";

type HmacSha256 = Hmac<Sha256>;

/// Checks `signature_b64` against HMAC-SHA256 of the exact request bytes.
///
/// Must run before the body is decoded: re-serialized JSON is not
/// byte-identical to what the platform signed.
pub fn verify_signature(raw_body: &[u8], signature_b64: &str, channel_secret: &str) -> bool {
    let Ok(expected) = STANDARD.decode(signature_b64.trim()) else {
        return false;
    };
    let Ok(mut mac) = HmacSha256::new_from_slice(channel_secret.as_bytes()) else {
        return false;
    };
    mac.update(raw_body);

    mac.verify_slice(&expected).is_ok()
}

/// Header value the platform would send for `raw_body`.
pub fn sign_body(raw_body: &[u8], channel_secret: &str) -> String {
    // HMAC accepts keys of any length, so this never takes the error path.
    let mut mac = match HmacSha256::new_from_slice(channel_secret.as_bytes()) {
        Ok(mac) => mac,
        Err(_) => return String::new(),
    };
    mac.update(raw_body);
    STANDARD.encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;

    use super::{sign_body, verify_signature};

    const SECRET: &str = "channel-secret";
    const BODY: &[u8] = br#"{"destination":"Uxxx","events":[]}"#;

    #[test]
    fn signature_round_trips() {
        let signature = sign_body(BODY, SECRET);
        assert!(verify_signature(BODY, &signature, SECRET));
    }

    #[test]
    fn known_vector_matches() {
        // printf '%s' 'hello' | openssl dgst -sha256 -hmac 'key' -binary | base64
        assert_eq!(sign_body(b"hello", "key"), "kwezuRXvtRcf8U2MtV+8x5jGwO8UVtZt7RpqpyOli3s=");
    }

    #[test]
    fn any_single_byte_mutation_of_body_fails() {
        let signature = sign_body(BODY, SECRET);
        for index in 0..BODY.len() {
            let mut mutated = BODY.to_vec();
            mutated[index] ^= 0x01;
            assert!(!verify_signature(&mutated, &signature, SECRET), "byte {index} mutated");
        }
    }

    #[test]
    fn any_single_byte_mutation_of_signature_fails() {
        let raw = STANDARD.decode(sign_body(BODY, SECRET)).expect("decode");
        for index in 0..raw.len() {
            let mut mutated = raw.clone();
            mutated[index] ^= 0x80;
            assert!(!verify_signature(BODY, &STANDARD.encode(&mutated), SECRET));
        }
    }

    #[test]
    fn wrong_secret_or_garbage_header_fails() {
        let signature = sign_body(BODY, SECRET);
        assert!(!verify_signature(BODY, &signature, "other-secret"));
        assert!(!verify_signature(BODY, "not base64 !!", SECRET));
        assert!(!verify_signature(BODY, "", SECRET));
    }
}
