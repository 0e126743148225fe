//! Content hashing keyed by a [`Topic`]'s configured `contentHashAlgorithm`.

use hub_common::entities::HashAlgorithm;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};

pub fn hash(algorithm: HashAlgorithm, content: &[u8]) -> String {
    match algorithm {
        HashAlgorithm::Sha1 => hex::encode(Sha1::digest(content)),
        HashAlgorithm::Sha256 => hex::encode(Sha256::digest(content)),
        HashAlgorithm::Sha384 => hex::encode(Sha384::digest(content)),
        HashAlgorithm::Sha512 => hex::encode(Sha512::digest(content)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_content_same_hash() {
        let a = hash(HashAlgorithm::Sha256, b"hello");
        let b = hash(HashAlgorithm::Sha256, b"hello");
        assert_eq!(a, b);
    }

    #[test]
    fn different_algorithms_differ() {
        let a = hash(HashAlgorithm::Sha256, b"hello");
        let b = hash(HashAlgorithm::Sha512, b"hello");
        assert_ne!(a, b);
    }
}
