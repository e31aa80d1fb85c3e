//! Hybrid envelopes: a random symmetric key wrapped with RSA, prepended to
//! a symmetric envelope produced under that key.
//!
//! The wrapped key is base64 text, which never contains `[`, so the first
//! `[` in a hybrid blob is always where the symmetric envelope begins.

use std::io::{Cursor, Read, Write};

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use envseal_core::{EnvsealError, EnvsealResult, SchemaVersion};

use crate::envelope::{open, seal};
use crate::keys::{parse_private_key, parse_public_key, Key, HYBRID_KEY_LEN};
use crate::primitives::{rsa_unwrap_key, rsa_wrap_key};
use crate::stream::{decrypt_stream, encrypt_stream, StreamStats};
use crate::{HEADER_LOOKAHEAD, HEADER_OPEN};

/// Longest accepted wrapped-key prefix (base64 of a 16384-bit RSA block)
pub const MAX_PREFIX_LEN: usize = 2732;

/// A fresh message key and its RSA-wrapped, base64-encoded form.
pub fn wrap_new_key(public_key_pem: &str) -> EnvsealResult<(Key, String)> {
    let public_key = parse_public_key(public_key_pem)?;
    let key = Key::generate(HYBRID_KEY_LEN.0, HYBRID_KEY_LEN.1);
    let wrapped = rsa_wrap_key(&key, &public_key)?;
    Ok((key, B64.encode(wrapped)))
}

/// Recover the message key from a base64 wrapped-key prefix.
pub fn unwrap_prefix(prefix: &[u8], private_key_pem: &str) -> EnvsealResult<Key> {
    let private_key = parse_private_key(private_key_pem)?;
    let wrapped = B64
        .decode(prefix)
        .map_err(|e| EnvsealError::KeyUnwrap(format!("wrapped key is not base64: {e}")))?;
    rsa_unwrap_key(&wrapped, &private_key)
}

/// Split a hybrid blob at its first `[` into (wrapped key, envelope).
pub fn split(blob: &[u8]) -> Option<(&[u8], &[u8])> {
    let at = blob.iter().position(|&b| b == HEADER_OPEN)?;
    Some(blob.split_at(at))
}

/// `base64(wrapped key) ++ v2 envelope of value`.
pub fn seal_with_public_key(value: &[u8], public_key_pem: &str) -> EnvsealResult<Vec<u8>> {
    let (key, prefix) = wrap_new_key(public_key_pem)?;
    let envelope = seal(value, &key, SchemaVersion::V2)?;
    let mut out = prefix.into_bytes();
    out.extend_from_slice(&envelope);
    Ok(out)
}

/// Inverse of [`seal_with_public_key`], with the failure kind preserved.
pub fn open_with_private_key(blob: &[u8], private_key_pem: &str) -> EnvsealResult<Vec<u8>> {
    let (prefix, envelope) = split(blob)
        .ok_or_else(|| EnvsealError::MalformedEnvelope("hybrid blob has no envelope".into()))?;
    let key = unwrap_prefix(prefix, private_key_pem)?;
    open(envelope, &key)
}

/// Encrypt a stream under a fresh key, carrying the wrapped key as prefix.
pub fn encrypt_stream_with_public_key<R: Read, W: Write>(
    source: R,
    destination: W,
    public_key_pem: &str,
) -> EnvsealResult<StreamStats> {
    let (key, prefix) = wrap_new_key(public_key_pem)?;
    encrypt_stream(source, destination, &key, prefix.as_bytes())
}

/// Decrypt a stream written by [`encrypt_stream_with_public_key`].
///
/// Unlike the value variant, a key that fails to unwrap is an error here.
pub fn decrypt_stream_with_private_key<R: Read, W: Write>(
    mut source: R,
    destination: W,
    private_key_pem: &str,
) -> EnvsealResult<StreamStats> {
    let (prefix, lookahead) = read_prefix(&mut source)?;
    let key = unwrap_prefix(&prefix, private_key_pem)?;
    decrypt_stream(Cursor::new(lookahead).chain(source), destination, &key, 0)
}

/// Read the wrapped-key prefix from the front of `source`.
///
/// Returns the prefix and the bytes already read past it (starting at `[`).
pub fn read_prefix<R: Read>(source: &mut R) -> EnvsealResult<(Vec<u8>, Vec<u8>)> {
    let limit = (MAX_PREFIX_LEN + HEADER_LOOKAHEAD) as u64;
    let mut window = Vec::new();
    source.take(limit).read_to_end(&mut window)?;
    let at = window
        .iter()
        .position(|&b| b == HEADER_OPEN)
        .filter(|&at| at <= MAX_PREFIX_LEN)
        .ok_or_else(|| {
            EnvsealError::MalformedEnvelope("no envelope header after wrapped key".into())
        })?;
    let rest = window.split_off(at);
    Ok((window, rest))
}
