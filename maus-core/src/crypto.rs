//! Thin wrapper over the crypto primitives the format needs (FORMATNOTE, section 4.2):
//! PBKDF2 key derivation, AES-CBC, HMAC, plain hashing, RSA-OAEP key
//! wrapping, and a CSPRNG for salts/IVs.
//!
//! Everything here is narrow by design: the container/entry layer decides
//! *when* to call these, this module only knows *how*.

use aes::{Aes128, Aes192, Aes256};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use hmac::{Hmac, Mac};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::{Digest, Sha256, Sha384, Sha512};
use sha3::{Sha3_256, Sha3_384, Sha3_512};
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::error::{CryptoError, Error};
use crate::parse::options::{AesKeySize, HashAlgorithm};

/// Base PBKDF2 cycle count added to the stored cycle-count field
/// (FORMATNOTE, sections 4.2 and 6).
pub const PBKDF2_BASE_CYCLES: i64 = 9001;

/// AES block size in bytes (FORMATNOTE, section 6).
pub const AES_BLOCK_SIZE: usize = 16;

/// Derives a symmetric key from a password using PBKDF2-HMAC-SHA256.
///
/// The salt is always `key_len` bytes (FORMATNOTE, section 4.2). The hash used internally
/// by PBKDF2 is fixed at SHA-256 regardless of the container's selected
/// `HashAlgorithm` (the latter governs the integrity tag, not the KDF; see
/// `DESIGN.md`, "PBKDF2 inner hash").
pub fn derive_key(password: &[u8], salt: &[u8], cycles: i64, key_len: usize) -> Zeroizing<Vec<u8>> {
    let mut key = Zeroizing::new(vec![0u8; key_len]);
    let cycles = cycles.max(1) as u32;
    tracing::trace!(cycles, key_len, "crypto: deriving key via PBKDF2-HMAC-SHA256");
    pbkdf2_hmac::<Sha256>(password, salt, cycles, &mut key);
    key
}

/// Converts a stored `pbkdf2_cycles` field into the real iteration count
/// (FORMATNOTE, section 6: `cycle_count_field = cycles - 9001`).
pub fn cycles_from_field(field: i64) -> i64 {
    field + PBKDF2_BASE_CYCLES
}

/// Converts a real iteration count back into the stored field, rejecting
/// values outside `[0, i32::MAX - 9001]` (FORMATNOTE, section 4.2).
pub fn field_from_cycles(cycles: i64) -> Result<i64, Error> {
    let field = cycles - PBKDF2_BASE_CYCLES;
    if field < 0 || field > (i32::MAX as i64 - PBKDF2_BASE_CYCLES) {
        return Err(Error::Crypto(CryptoError::RsaWrap));
    }
    Ok(field)
}

/// AES-CBC encrypts `plaintext` under `key`/`iv`, with PKCS#7 padding.
pub fn aes_cbc_encrypt(size: AesKeySize, key: &[u8], iv: &[u8], plaintext: &[u8]) -> Vec<u8> {
    macro_rules! encrypt {
        ($cipher:ty) => {{
            let enc = <cbc::Encryptor<$cipher>>::new_from_slices(key, iv)
                .expect("key/iv length validated by caller");
            enc.encrypt_padded_vec_mut::<Pkcs7>(plaintext)
        }};
    }
    match size {
        AesKeySize::Bits128 => encrypt!(Aes128),
        AesKeySize::Bits192 => encrypt!(Aes192),
        AesKeySize::Bits256 => encrypt!(Aes256),
    }
}

/// AES-CBC decrypts `ciphertext` under `key`/`iv`, stripping PKCS#7 padding.
pub fn aes_cbc_decrypt(
    size: AesKeySize,
    key: &[u8],
    iv: &[u8],
    ciphertext: &[u8],
) -> Result<Vec<u8>, Error> {
    macro_rules! decrypt {
        ($cipher:ty) => {{
            let dec = <cbc::Decryptor<$cipher>>::new_from_slices(key, iv)
                .expect("key/iv length validated by caller");
            dec.decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
                .map_err(|_| Error::BadKey)
        }};
    }
    match size {
        AesKeySize::Bits128 => decrypt!(Aes128),
        AesKeySize::Bits192 => decrypt!(Aes192),
        AesKeySize::Bits256 => decrypt!(Aes256),
    }
}

/// Computes a plain hash digest over `bytes` with the given algorithm.
pub fn hash(alg: HashAlgorithm, bytes: &[u8]) -> Vec<u8> {
    match alg {
        HashAlgorithm::Sha256 => Sha256::digest(bytes).to_vec(),
        HashAlgorithm::Sha384 => Sha384::digest(bytes).to_vec(),
        HashAlgorithm::Sha512 => Sha512::digest(bytes).to_vec(),
        HashAlgorithm::Sha3_256 => Sha3_256::digest(bytes).to_vec(),
        HashAlgorithm::Sha3_384 => Sha3_384::digest(bytes).to_vec(),
        HashAlgorithm::Sha3_512 => Sha3_512::digest(bytes).to_vec(),
        HashAlgorithm::Whirlpool => {
            use whirlpool::Whirlpool;
            Whirlpool::digest(bytes).to_vec()
        }
    }
}

/// Computes an HMAC tag over `bytes`, keyed by `key`, using the given hash
/// as the inner hash function.
pub fn hmac(alg: HashAlgorithm, key: &[u8], bytes: &[u8]) -> Vec<u8> {
    macro_rules! mac {
        ($hash:ty) => {{
            let mut mac =
                <Hmac<$hash>>::new_from_slice(key).expect("HMAC accepts any key length");
            mac.update(bytes);
            mac.finalize().into_bytes().to_vec()
        }};
    }
    match alg {
        HashAlgorithm::Sha256 => mac!(Sha256),
        HashAlgorithm::Sha384 => mac!(Sha384),
        HashAlgorithm::Sha512 => mac!(Sha512),
        HashAlgorithm::Sha3_256 => mac!(Sha3_256),
        HashAlgorithm::Sha3_384 => mac!(Sha3_384),
        HashAlgorithm::Sha3_512 => mac!(Sha3_512),
        HashAlgorithm::Whirlpool => {
            use whirlpool::Whirlpool;
            mac!(Whirlpool)
        }
    }
}

/// Constant-time comparison of two tags (FORMATNOTE, section 4.5 step 7: "constant-time
/// compare against tag").
pub fn tags_match(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

/// Fills `out` with cryptographically-strong random bytes.
pub fn random_bytes(out: &mut [u8]) {
    rand::thread_rng().fill_bytes(out);
}

/// Wraps `content_key` under an RSA-OAEP public key.
pub fn rsa_oaep_wrap(public_key: &RsaPublicKey, content_key: &[u8]) -> Result<Vec<u8>, Error> {
    let mut rng = rand::thread_rng();
    public_key
        .encrypt(&mut rng, Oaep::new::<Sha256>(), content_key)
        .map_err(|_| CryptoError::RsaWrap.into())
}

/// Unwraps an RSA-OAEP-wrapped content key using a private key.
///
/// Failure here (wrong key, corrupted blob) is the `Crypto` error surface
/// called out in FORMATNOTE, section 7, recoverable by supplying the correct key.
pub fn rsa_oaep_unwrap(private_key: &RsaPrivateKey, blob: &[u8]) -> Result<Zeroizing<Vec<u8>>, Error> {
    private_key
        .decrypt(Oaep::new::<Sha256>(), blob)
        .map(Zeroizing::new)
        .map_err(|_| CryptoError::RsaUnwrap.into())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn aes_roundtrip() {
        let key = [0x11u8; 32];
        let iv = [0x22u8; 16];
        let plaintext = b"the quick brown fox jumps over the lazy dog";
        let ct = aes_cbc_encrypt(AesKeySize::Bits256, &key, &iv, plaintext);
        let pt = aes_cbc_decrypt(AesKeySize::Bits256, &key, &iv, &ct).unwrap();
        assert_eq!(pt, plaintext);
    }

    #[test]
    fn wrong_key_fails_padding_or_content() {
        let key = [0x11u8; 16];
        let other_key = [0x33u8; 16];
        let iv = [0x22u8; 16];
        let ct = aes_cbc_encrypt(AesKeySize::Bits128, &key, &iv, b"0123456789abcdef");
        let result = aes_cbc_decrypt(AesKeySize::Bits128, &other_key, &iv, &ct);
        assert!(result.is_err() || result.unwrap() != b"0123456789abcdef");
    }

    #[test]
    fn hmac_tags_match_constant_time() {
        let tag_a = hmac(HashAlgorithm::Sha256, b"key", b"data");
        let tag_b = hmac(HashAlgorithm::Sha256, b"key", b"data");
        assert!(tags_match(&tag_a, &tag_b));
        let tag_c = hmac(HashAlgorithm::Sha256, b"key", b"other");
        assert!(!tags_match(&tag_a, &tag_c));
    }

    #[test]
    fn pbkdf2_cycle_field_roundtrip() {
        let field = field_from_cycles(9001 + 5000).unwrap();
        assert_eq!(field, 5000);
        assert_eq!(cycles_from_field(field), 9001 + 5000);
    }

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key(b"password", b"salt1234salt1234", 1000, 32);
        let b = derive_key(b"password", b"salt1234salt1234", 1000, 32);
        assert_eq!(*a, *b);
    }
}
