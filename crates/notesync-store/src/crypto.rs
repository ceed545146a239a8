//! Symmetric encryption of chunk payloads and path text.
//!
//! AES-256-GCM under a PBKDF2-SHA256 key. Every encryption draws a fresh
//! salt and nonce, and the fixed application salt constant is always bound
//! into the derivation, so envelopes from unrelated deployments never
//! decrypt into each other. The envelope is `base64(salt || nonce ||
//! ciphertext+tag)`.
//!
//! Two iteration modes exist: the fixed legacy count (V1, and the default
//! for current stores) and a dynamic count derived from the passphrase
//! itself when the store opts in.

use aes_gcm::{
    Aes256Gcm, Key, Nonce,
    aead::{Aead, KeyInit},
};
use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use thiserror::Error;
use xxhash_rust::xxh32::xxh32;
use zeroize::Zeroizing;

use crate::types::SALT_OF_PASSPHRASE;

const SALT_LEN: usize = 16;
const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

/// Iteration count for the fixed (legacy / non-dynamic) mode.
const STATIC_ITERATIONS: u32 = 100_000;
/// Spread of the dynamic iteration count above the fixed base.
const DYNAMIC_ITERATION_RANGE: u32 = 100_000;

/// Errors from the symmetric encryption layer.
#[derive(Error, Debug)]
pub enum CryptoError {
    /// The value is not a well-formed envelope (bad base64 or truncated).
    #[error("ciphertext envelope is malformed")]
    Malformed,

    /// Authentication failed: wrong passphrase or tampered ciphertext.
    /// Cryptographically the two are indistinguishable.
    #[error("decryption failed - wrong passphrase or corrupt ciphertext")]
    Decrypt,

    #[error("encryption failed")]
    Encrypt,

    /// An encrypted chunk was encountered but no passphrase is configured.
    #[error("encrypted payload but no passphrase configured")]
    MissingPassphrase,
}

/// KDF iteration count for a passphrase.
///
/// In dynamic mode the count is a pure function of the passphrase, so both
/// ends derive the same count without coordination.
pub fn iteration_count(passphrase: &str, dynamic: bool) -> u32 {
    if dynamic {
        STATIC_ITERATIONS + xxh32(passphrase.as_bytes(), 0) % DYNAMIC_ITERATION_RANGE
    } else {
        STATIC_ITERATIONS
    }
}

fn derive_key(passphrase: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; 32]> {
    let mut salted = Vec::with_capacity(SALT_OF_PASSPHRASE.len() + salt.len());
    salted.extend_from_slice(SALT_OF_PASSPHRASE.as_bytes());
    salted.extend_from_slice(salt);
    let mut key = Zeroizing::new([0u8; 32]);
    pbkdf2_hmac::<Sha256>(passphrase.as_bytes(), &salted, iterations, &mut *key);
    key
}

/// Encrypt `plain` under `passphrase`.
pub fn encrypt(
    plain: &str,
    passphrase: &SecretString,
    dynamic_iterations: bool,
) -> Result<String, CryptoError> {
    let pass = passphrase.expose_secret();
    let iterations = iteration_count(pass, dynamic_iterations);

    let mut salt = [0u8; SALT_LEN];
    rand::rng().fill_bytes(&mut salt);
    let mut nonce = [0u8; NONCE_LEN];
    rand::rng().fill_bytes(&mut nonce);

    let key = derive_key(pass, &salt, iterations);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    let sealed = cipher
        .encrypt(Nonce::from_slice(&nonce), plain.as_bytes())
        .map_err(|_| CryptoError::Encrypt)?;

    let mut envelope = Vec::with_capacity(SALT_LEN + NONCE_LEN + sealed.len());
    envelope.extend_from_slice(&salt);
    envelope.extend_from_slice(&nonce);
    envelope.extend_from_slice(&sealed);
    Ok(BASE64.encode(envelope))
}

/// Decrypt an envelope produced by [`encrypt`].
///
/// Fails with [`CryptoError::Decrypt`] when the passphrase does not match or
/// the ciphertext was tampered with; the caller must abort the enclosing
/// operation.
pub fn decrypt(
    envelope: &str,
    passphrase: &SecretString,
    dynamic_iterations: bool,
) -> Result<String, CryptoError> {
    let raw = BASE64.decode(envelope).map_err(|_| CryptoError::Malformed)?;
    if raw.len() < SALT_LEN + NONCE_LEN + TAG_LEN {
        return Err(CryptoError::Malformed);
    }
    let (salt, rest) = raw.split_at(SALT_LEN);
    let (nonce, sealed) = rest.split_at(NONCE_LEN);

    let pass = passphrase.expose_secret();
    let iterations = iteration_count(pass, dynamic_iterations);
    let key = derive_key(pass, salt, iterations);
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_slice()));
    let plain = cipher
        .decrypt(Nonce::from_slice(nonce), sealed)
        .map_err(|_| CryptoError::Decrypt)?;
    String::from_utf8(plain).map_err(|_| CryptoError::Decrypt)
}
