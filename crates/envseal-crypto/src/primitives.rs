//! Stateless cipher operations: AES-256-GCM, legacy AES-256-CBC, RSA key wrap
//!
//! Everything here works on raw bytes. Envelope framing, base64 bodies and
//! key normalisation live one layer up.

use aes_gcm::aead::{AeadInPlace, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce, Tag};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, KeyIvInit};
use envseal_core::{EnvsealError, EnvsealResult};
use rand::rngs::OsRng;
use rand::RngCore;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey, RsaPublicKey};

use crate::keys::Key;
use crate::{CBC_IV_SIZE, GCM_IV_SIZE, KEY_SIZE, TAG_SIZE};

type Aes256CbcDec = cbc::Decryptor<aes::Aes256>;

/// A fresh random GCM IV from the OS CSPRNG.
pub fn random_iv() -> [u8; GCM_IV_SIZE] {
    let mut iv = [0u8; GCM_IV_SIZE];
    OsRng.fill_bytes(&mut iv);
    iv
}

/// AES-256-GCM bound to one key, reused across the chunks of a stream.
pub struct AeadCipher {
    cipher: Aes256Gcm,
}

impl AeadCipher {
    pub fn new(key: &[u8]) -> EnvsealResult<Self> {
        if key.len() != KEY_SIZE {
            return Err(EnvsealError::Cipher(format!(
                "AES-256-GCM key must be {KEY_SIZE} bytes, got {}",
                key.len()
            )));
        }
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| EnvsealError::Cipher(format!("creating AES-256-GCM cipher: {e}")))?;
        Ok(Self { cipher })
    }

    /// Encrypt `buf` in place and return the detached tag.
    pub fn encrypt_in_place(&self, iv: &[u8], buf: &mut [u8]) -> EnvsealResult<[u8; TAG_SIZE]> {
        check_gcm_iv(iv)?;
        let tag = self
            .cipher
            .encrypt_in_place_detached(Nonce::from_slice(iv), b"", buf)
            .map_err(|e| EnvsealError::Cipher(format!("AES-256-GCM encryption failed: {e}")))?;
        let mut out = [0u8; TAG_SIZE];
        out.copy_from_slice(&tag);
        Ok(out)
    }

    /// Decrypt `buf` in place. On tag mismatch `buf` is left unspecified and
    /// `Authentication` is returned.
    pub fn decrypt_in_place(&self, iv: &[u8], buf: &mut [u8], tag: &[u8]) -> EnvsealResult<()> {
        check_gcm_iv(iv)?;
        if tag.len() != TAG_SIZE {
            return Err(EnvsealError::MalformedEnvelope(format!(
                "tag must be {TAG_SIZE} bytes, got {}",
                tag.len()
            )));
        }
        self.cipher
            .decrypt_in_place_detached(Nonce::from_slice(iv), b"", buf, Tag::from_slice(tag))
            .map_err(|_| EnvsealError::Authentication)
    }
}

fn check_gcm_iv(iv: &[u8]) -> EnvsealResult<()> {
    if iv.len() != GCM_IV_SIZE {
        return Err(EnvsealError::Cipher(format!(
            "AES-256-GCM IV must be {GCM_IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    Ok(())
}

/// Authenticated encryption; returns `(ciphertext, tag)`.
pub fn aead_encrypt(
    plaintext: &[u8],
    key: &[u8],
    iv: &[u8],
) -> EnvsealResult<(Vec<u8>, [u8; TAG_SIZE])> {
    let cipher = AeadCipher::new(key)?;
    let mut buf = plaintext.to_vec();
    let tag = cipher.encrypt_in_place(iv, &mut buf)?;
    Ok((buf, tag))
}

/// Authenticated decryption. A tag that does not verify is `Authentication`;
/// no partial plaintext is returned.
pub fn aead_decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8], tag: &[u8]) -> EnvsealResult<Vec<u8>> {
    let cipher = AeadCipher::new(key)?;
    let mut buf = ciphertext.to_vec();
    cipher.decrypt_in_place(iv, &mut buf, tag)?;
    Ok(buf)
}

/// AES-256-CBC with PKCS#7 padding. Read path of the legacy format only.
///
/// There is no integrity check: a wrong key is only noticed when the
/// padding fails to verify, which is reported as `Authentication`.
pub fn legacy_decrypt(ciphertext: &[u8], key: &[u8], iv: &[u8]) -> EnvsealResult<Vec<u8>> {
    if iv.len() != CBC_IV_SIZE {
        return Err(EnvsealError::Cipher(format!(
            "AES-256-CBC IV must be {CBC_IV_SIZE} bytes, got {}",
            iv.len()
        )));
    }
    let decryptor = Aes256CbcDec::new_from_slices(key, iv).map_err(|_| {
        EnvsealError::Cipher(format!(
            "AES-256-CBC key must be {KEY_SIZE} bytes, got {}",
            key.len()
        ))
    })?;
    decryptor
        .decrypt_padded_vec_mut::<Pkcs7>(ciphertext)
        .map_err(|_| EnvsealError::Authentication)
}

/// RSA PKCS#1 v1.5 encryption of a short symmetric key.
pub fn rsa_wrap_key(key: &Key, public_key: &RsaPublicKey) -> EnvsealResult<Vec<u8>> {
    public_key
        .encrypt(&mut OsRng, Pkcs1v15Encrypt, key.as_bytes())
        .map_err(|e| EnvsealError::KeyWrap(format!("RSA key wrap failed: {e}")))
}

/// Inverse of [`rsa_wrap_key`].
pub fn rsa_unwrap_key(wrapped: &[u8], private_key: &RsaPrivateKey) -> EnvsealResult<Key> {
    private_key
        .decrypt(Pkcs1v15Encrypt, wrapped)
        .map(Key::from_bytes)
        .map_err(|e| EnvsealError::KeyUnwrap(format!("RSA key unwrap failed: {e}")))
}
