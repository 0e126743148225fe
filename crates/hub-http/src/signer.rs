//! HMAC signing over sha1/256/384/512.

use hmac::{Hmac, Mac};
use hub_common::entities::HashAlgorithm;
use sha1::Sha1;
use sha2::{Sha256, Sha384, Sha512};

use crate::error::Error;

/// Computes `alg=hex(HMAC(secret, body))`, ready to use as the value of
/// an `X-Hub-Signature` header.
pub fn sign(algorithm: HashAlgorithm, secret: &str, body: &[u8]) -> Result<String, Error> {
    let digest = hmac_hex(algorithm, secret.as_bytes(), body)?;
    Ok(format!("{algorithm}={digest}"))
}

fn hmac_hex(algorithm: HashAlgorithm, key: &[u8], body: &[u8]) -> Result<String, Error> {
    macro_rules! run {
        ($digest:ty) => {{
            let mut mac =
                Hmac::<$digest>::new_from_slice(key).map_err(|_| Error::InvalidKeyLength)?;
            mac.update(body);
            hex::encode(mac.finalize().into_bytes())
        }};
    }

    Ok(match algorithm {
        HashAlgorithm::Sha1 => run!(Sha1),
        HashAlgorithm::Sha256 => run!(Sha256),
        HashAlgorithm::Sha384 => run!(Sha384),
        HashAlgorithm::Sha512 => run!(Sha512),
    })
}

/// Generates a random challenge string , 32 bytes, base64url without
/// padding.
pub fn generate_challenge() -> String {
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;
    use base64::Engine;
    use rand::RngCore;

    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signs_with_each_algorithm() {
        for algorithm in [
            HashAlgorithm::Sha1,
            HashAlgorithm::Sha256,
            HashAlgorithm::Sha384,
            HashAlgorithm::Sha512,
        ] {
            let signature = sign(algorithm, "s3cret", b"hello world").expect("signs");
            assert!(signature.starts_with(&format!("{algorithm}=")));
        }
    }

    #[test]
    fn signature_is_deterministic() {
        let a = sign(HashAlgorithm::Sha256, "secret", b"payload").expect("signs");
        let b = sign(HashAlgorithm::Sha256, "secret", b"payload").expect("signs");
        assert_eq!(a, b);
    }

    #[test]
    fn challenge_is_reasonably_long_and_url_safe() {
        let challenge = generate_challenge();
        assert!(challenge.len() >= 16);
        assert!(!challenge.contains('+') && !challenge.contains('/'));
    }
}
