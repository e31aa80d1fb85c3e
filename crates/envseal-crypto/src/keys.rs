//! Symmetric keys, random key generation, and RSA key pairs

use std::fmt;

use envseal_core::{EnvsealError, EnvsealResult};
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use rand::Rng;
use rsa::pkcs1::{DecodeRsaPrivateKey, DecodeRsaPublicKey};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{RsaPrivateKey, RsaPublicKey};
use secrecy::{ExposeSecret, SecretSlice, SecretString};
use zeroize::Zeroizing;

use crate::KEY_SIZE;

/// Length range of a freshly minted default key
pub const DEFAULT_KEY_LEN: (usize, usize) = (32, 64);

/// Length range of the per-message key in a hybrid envelope
pub const HYBRID_KEY_LEN: (usize, usize) = (100, 200);

/// RSA modulus size for generated key pairs
pub const RSA_BITS: usize = 2048;

/// Opaque symmetric key material of any length. Zeroized on drop.
///
/// AES needs exactly [`KEY_SIZE`] bytes; [`Key::cipher_key`] truncates or
/// zero-pads, which is how every historical envelope was written.
pub struct Key {
    bytes: SecretSlice<u8>,
}

impl Key {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            bytes: SecretSlice::from(bytes.into()),
        }
    }

    /// Random key of `min..=max` characters drawn from `[A-Za-z0-9]`.
    pub fn generate(min: usize, max: usize) -> Self {
        let (lo, hi) = if min <= max { (min, max) } else { (max, min) };
        let len = OsRng.gen_range(lo..=hi);
        let bytes: Vec<u8> = OsRng.sample_iter(&Alphanumeric).take(len).collect();
        Self::from_bytes(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes.expose_secret()
    }

    pub fn len(&self) -> usize {
        self.as_bytes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.as_bytes().is_empty()
    }

    /// The 32-byte AES key: the first 32 bytes, right-padded with zeros.
    pub fn cipher_key(&self) -> Zeroizing<[u8; KEY_SIZE]> {
        let mut out = Zeroizing::new([0u8; KEY_SIZE]);
        let src = self.as_bytes();
        let n = src.len().min(KEY_SIZE);
        out[..n].copy_from_slice(&src[..n]);
        out
    }
}

impl Clone for Key {
    fn clone(&self) -> Self {
        Self::from_bytes(self.as_bytes().to_vec())
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.as_bytes() == other.as_bytes()
    }
}

impl Eq for Key {}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Key")
            .field("len", &self.len())
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A PEM-encoded RSA key pair: PKCS#8 private key, SPKI public key.
pub struct KeyPair {
    private_key: SecretString,
    public_key: String,
}

impl KeyPair {
    pub fn private_key_pem(&self) -> &SecretString {
        &self.private_key
    }

    pub fn public_key_pem(&self) -> &str {
        &self.public_key
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("private_key", &"[REDACTED]")
            .field("public_key", &self.public_key)
            .finish()
    }
}

/// Generate a fresh 2048-bit RSA key pair. Nothing is cached.
pub fn generate_key_pair() -> EnvsealResult<KeyPair> {
    let private = RsaPrivateKey::new(&mut OsRng, RSA_BITS)
        .map_err(|e| EnvsealError::KeyGeneration(format!("RSA key generation failed: {e}")))?;
    let public = RsaPublicKey::from(&private);

    let private_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| EnvsealError::KeyGeneration(format!("encoding private key: {e}")))?;
    let public_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| EnvsealError::KeyGeneration(format!("encoding public key: {e}")))?;

    tracing::debug!(bits = RSA_BITS, "generated RSA key pair");

    Ok(KeyPair {
        private_key: SecretString::from(private_pem.as_str()),
        public_key: public_pem,
    })
}

/// Parse an SPKI (`BEGIN PUBLIC KEY`) or PKCS#1 (`BEGIN RSA PUBLIC KEY`) PEM.
pub fn parse_public_key(pem: &str) -> EnvsealResult<RsaPublicKey> {
    RsaPublicKey::from_public_key_pem(pem)
        .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
        .map_err(|e| EnvsealError::KeyWrap(format!("invalid RSA public key: {e}")))
}

/// Parse a PKCS#8 (`BEGIN PRIVATE KEY`) or PKCS#1 (`BEGIN RSA PRIVATE KEY`) PEM.
pub fn parse_private_key(pem: &str) -> EnvsealResult<RsaPrivateKey> {
    RsaPrivateKey::from_pkcs8_pem(pem)
        .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
        .map_err(|e| EnvsealError::KeyUnwrap(format!("invalid RSA private key: {e}")))
}
