//! envseal-crypto: self-describing envelope encryption
//!
//! Wire formats (first byte `[` opens a JSON header, raw body follows it):
//! ```text
//! legacy  [16-byte IV][base64(AES-256-CBC ciphertext)]
//! v1      [1,"<b64 iv>","<b64 tag>"][base64(AES-256-GCM ciphertext)]
//! v2      [2,"<b64 iv>","<b64 tag>"][AES-256-GCM ciphertext]
//! v3      [3,"<b64 iv>"]{[chunk ciphertext][16-byte tag]}*
//! hybrid  base64(RSA-PKCS1v1.5(symmetric key)) followed by a v2 or v3 envelope
//! ```
//!
//! Version 3 splits the plaintext into `GCM_IV_SIZE * CHUNK_IV_MULTIPLE`
//! byte chunks. Chunk `n + 1` is encrypted under the first `GCM_IV_SIZE`
//! bytes of chunk `n`'s ciphertext, so only the initial IV is stored.

pub mod default_key;
pub mod engine;
pub mod envelope;
pub mod hybrid;
pub mod keys;
pub mod primitives;
pub mod stream;

pub use default_key::DefaultKeyProvider;
pub use engine::EnvelopeEngine;
pub use envelope::{decode, encode, open, seal, Envelope, Header};
pub use keys::{generate_key_pair, Key, KeyPair};
pub use stream::{decrypt_stream, encrypt_stream, StreamStats};

pub use envseal_core::{EnvsealError, EnvsealResult, SchemaVersion};

/// Size of an AES-256 key in bytes
pub const KEY_SIZE: usize = 32;

/// Size of an AES-GCM IV (96-bit)
pub const GCM_IV_SIZE: usize = 12;

/// Size of an AES-CBC IV, used by the legacy format
pub const CBC_IV_SIZE: usize = 16;

/// Size of a GCM authentication tag
pub const TAG_SIZE: usize = 16;

/// Plaintext chunk size of the v3 format, as a multiple of the IV length
pub const CHUNK_IV_MULTIPLE: usize = 100_000;

/// Plaintext bytes per v3 chunk (the final chunk may be shorter)
pub const CHUNK_SIZE: usize = GCM_IV_SIZE * CHUNK_IV_MULTIPLE;

/// Upper bound on the length of a structured header, closing `]` included
pub const HEADER_LOOKAHEAD: usize = 256;

/// First byte of every structured header
pub const HEADER_OPEN: u8 = b'[';

/// Last byte of every structured header
pub const HEADER_CLOSE: u8 = b']';
