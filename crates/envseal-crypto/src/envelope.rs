//! Versioned envelope format for in-memory values
//!
//! A structured envelope starts with a JSON array header whose first element
//! is the schema version. The header ends at its first `]`; the body follows
//! with no separator. Anything else is the headerless legacy format.

use base64::{engine::general_purpose::STANDARD as B64, Engine};
use envseal_core::{EnvsealError, EnvsealResult, SchemaVersion};
use serde_json::Value;

use crate::keys::Key;
use crate::primitives::{aead_decrypt, aead_encrypt, legacy_decrypt, random_iv, AeadCipher};
use crate::stream::decrypt_chunks;
use crate::{CBC_IV_SIZE, GCM_IV_SIZE, HEADER_CLOSE, HEADER_LOOKAHEAD, HEADER_OPEN, TAG_SIZE};

/// A parsed structured header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Header {
    V1 {
        iv: [u8; GCM_IV_SIZE],
        tag: [u8; TAG_SIZE],
    },
    V2 {
        iv: [u8; GCM_IV_SIZE],
        tag: [u8; TAG_SIZE],
    },
    /// Chunked stream; only the initial IV is stored
    V3 { iv: [u8; GCM_IV_SIZE] },
    /// Well-formed header with a version this build does not know
    Unknown { version: u64 },
}

impl Header {
    pub fn version(&self) -> Option<SchemaVersion> {
        match self {
            Header::V1 { .. } => Some(SchemaVersion::V1),
            Header::V2 { .. } => Some(SchemaVersion::V2),
            Header::V3 { .. } => Some(SchemaVersion::V3),
            Header::Unknown { .. } => None,
        }
    }

    /// Serialize as `[version,"<b64 iv>"(,"<b64 tag>")]`.
    pub fn to_bytes(&self) -> EnvsealResult<Vec<u8>> {
        let encoded = match self {
            Header::V1 { iv, tag } => serde_json::to_vec(&(1u64, B64.encode(iv), B64.encode(tag))),
            Header::V2 { iv, tag } => serde_json::to_vec(&(2u64, B64.encode(iv), B64.encode(tag))),
            Header::V3 { iv } => serde_json::to_vec(&(3u64, B64.encode(iv))),
            Header::Unknown { version } => return Err(EnvsealError::UnsupportedVersion(*version)),
        };
        encoded.map_err(|e| EnvsealError::MalformedEnvelope(format!("header serialization: {e}")))
    }
}

/// Parse the structured header at the start of `bytes`.
///
/// Returns `Ok(None)` when `bytes` does not start with `[`, otherwise the
/// header and its length in bytes.
pub fn parse_header(bytes: &[u8]) -> EnvsealResult<Option<(Header, usize)>> {
    if bytes.first() != Some(&HEADER_OPEN) {
        return Ok(None);
    }

    let window = &bytes[..bytes.len().min(HEADER_LOOKAHEAD)];
    let end = window
        .iter()
        .position(|&b| b == HEADER_CLOSE)
        .ok_or_else(|| EnvsealError::MalformedEnvelope("unterminated header".into()))?;

    let fields: Vec<Value> = serde_json::from_slice(&window[..=end])
        .map_err(|e| EnvsealError::MalformedEnvelope(format!("header is not a JSON array: {e}")))?;

    let version = fields
        .first()
        .and_then(Value::as_u64)
        .ok_or_else(|| EnvsealError::MalformedEnvelope("header has no schema version".into()))?;

    let header = match version {
        1 => Header::V1 {
            iv: field_bytes(&fields, 1, "iv")?,
            tag: field_bytes(&fields, 2, "tag")?,
        },
        2 => Header::V2 {
            iv: field_bytes(&fields, 1, "iv")?,
            tag: field_bytes(&fields, 2, "tag")?,
        },
        3 => Header::V3 {
            iv: field_bytes(&fields, 1, "iv")?,
        },
        other => Header::Unknown { version: other },
    };

    Ok(Some((header, end + 1)))
}

/// Base64 string at `fields[index]`, decoded to exactly `N` bytes.
fn field_bytes<const N: usize>(fields: &[Value], index: usize, name: &str) -> EnvsealResult<[u8; N]> {
    let text = fields
        .get(index)
        .and_then(Value::as_str)
        .ok_or_else(|| EnvsealError::MalformedEnvelope(format!("header is missing {name}")))?;
    let decoded = B64
        .decode(text)
        .map_err(|e| EnvsealError::MalformedEnvelope(format!("base64 decode {name}: {e}")))?;
    decoded.as_slice().try_into().map_err(|_| {
        EnvsealError::MalformedEnvelope(format!(
            "{name} must be {N} bytes, got {}",
            decoded.len()
        ))
    })
}

/// A decoded envelope borrowing its body from the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Envelope<'a> {
    /// AES-256-CBC; `body` is the base64 text of the ciphertext
    Legacy { iv: &'a [u8], body: &'a [u8] },
    /// AES-256-GCM; `body` is the base64 text of the ciphertext
    V1 {
        iv: [u8; GCM_IV_SIZE],
        tag: [u8; TAG_SIZE],
        body: &'a [u8],
    },
    V2 {
        iv: [u8; GCM_IV_SIZE],
        tag: [u8; TAG_SIZE],
        ciphertext: &'a [u8],
    },
    V3 {
        iv: [u8; GCM_IV_SIZE],
        chunks: &'a [u8],
    },
    Unknown { version: u64 },
}

impl Envelope<'_> {
    /// Short format name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Envelope::Legacy { .. } => "legacy",
            Envelope::V1 { .. } => "v1",
            Envelope::V2 { .. } => "v2",
            Envelope::V3 { .. } => "v3",
            Envelope::Unknown { .. } => "unknown",
        }
    }
}

/// Decode a serialized envelope.
///
/// A blob starting with `[` whose header does not parse is retried as
/// legacy, since a legacy IV is random and may itself start with `[`.
pub fn decode(bytes: &[u8]) -> EnvsealResult<Envelope<'_>> {
    match parse_header(bytes) {
        Ok(Some((header, len))) => {
            let body = &bytes[len..];
            Ok(match header {
                Header::V1 { iv, tag } => Envelope::V1 { iv, tag, body },
                Header::V2 { iv, tag } => Envelope::V2 {
                    iv,
                    tag,
                    ciphertext: body,
                },
                Header::V3 { iv } => Envelope::V3 { iv, chunks: body },
                Header::Unknown { version } => Envelope::Unknown { version },
            })
        }
        Ok(None) => decode_legacy(bytes),
        Err(header_err) => decode_legacy(bytes).map_err(|_| header_err),
    }
}

fn decode_legacy(bytes: &[u8]) -> EnvsealResult<Envelope<'_>> {
    if bytes.len() < CBC_IV_SIZE {
        return Err(EnvsealError::MalformedEnvelope(format!(
            "{} bytes is shorter than the legacy IV",
            bytes.len()
        )));
    }
    let (iv, body) = bytes.split_at(CBC_IV_SIZE);
    Ok(Envelope::Legacy { iv, body })
}

/// Serialize a v1 or v2 value envelope from its parts.
///
/// `ciphertext` is raw; v1 stores its base64 text, v2 stores it verbatim.
pub fn encode(
    version: SchemaVersion,
    iv: [u8; GCM_IV_SIZE],
    tag: [u8; TAG_SIZE],
    ciphertext: &[u8],
) -> EnvsealResult<Vec<u8>> {
    let (header, body) = match version {
        SchemaVersion::V1 => (Header::V1 { iv, tag }, B64.encode(ciphertext).into_bytes()),
        SchemaVersion::V2 => (Header::V2 { iv, tag }, ciphertext.to_vec()),
        SchemaVersion::V3 => {
            return Err(EnvsealError::Config(
                "schema version 3 is only written by the stream encoder".into(),
            ))
        }
    };
    let mut out = header.to_bytes()?;
    out.extend_from_slice(&body);
    Ok(out)
}

/// Encrypt `value` under `key` as a v1 or v2 envelope with a fresh IV.
pub fn seal(value: &[u8], key: &Key, version: SchemaVersion) -> EnvsealResult<Vec<u8>> {
    if !version.is_value_write_version() {
        return Err(EnvsealError::Config(format!(
            "{version} cannot be used for in-memory values"
        )));
    }
    let iv = random_iv();
    let (ciphertext, tag) = aead_encrypt(value, &key.cipher_key()[..], &iv)?;
    encode(version, iv, tag, &ciphertext)
}

/// Decrypt any supported envelope, reporting why it failed.
pub fn open(blob: &[u8], key: &Key) -> EnvsealResult<Vec<u8>> {
    let envelope = decode(blob)?;
    tracing::debug!(format = envelope.kind(), len = blob.len(), "opening envelope");
    let cipher_key = key.cipher_key();
    match envelope {
        Envelope::Legacy { iv, body } => {
            let ciphertext = decode_body(body)?;
            legacy_decrypt(&ciphertext, &cipher_key[..], iv)
        }
        Envelope::V1 { iv, tag, body } => {
            let ciphertext = decode_body(body)?;
            aead_decrypt(&ciphertext, &cipher_key[..], &iv, &tag)
        }
        Envelope::V2 {
            iv,
            tag,
            ciphertext,
        } => aead_decrypt(ciphertext, &cipher_key[..], &iv, &tag),
        Envelope::V3 { iv, chunks } => {
            let cipher = AeadCipher::new(&cipher_key[..])?;
            let mut out = Vec::with_capacity(chunks.len());
            decrypt_chunks(chunks, &mut out, &cipher, iv)?;
            Ok(out)
        }
        Envelope::Unknown { version } => Err(EnvsealError::UnsupportedVersion(version)),
    }
}

fn decode_body(body: &[u8]) -> EnvsealResult<Vec<u8>> {
    B64.decode(body)
        .map_err(|e| EnvsealError::MalformedEnvelope(format!("base64 decode body: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key() -> Key {
        Key::from_bytes(b"0123456789abcdef0123456789abcdef".to_vec())
    }

    #[test]
    fn test_seal_emits_v2_header() {
        let blob = seal(b"123", &key(), SchemaVersion::V2).unwrap();
        assert!(blob.starts_with(b"[2,\""));
        assert!(matches!(decode(&blob).unwrap(), Envelope::V2 { .. }));
        assert_eq!(open(&blob, &key()).unwrap(), b"123");
    }

    #[test]
    fn test_seal_v1_body_is_base64() {
        let blob = seal(b"hello", &key(), SchemaVersion::V1).unwrap();
        assert!(blob.starts_with(b"[1,\""));
        match decode(&blob).unwrap() {
            Envelope::V1 { body, .. } => assert!(B64.decode(body).is_ok()),
            other => panic!("expected v1, got {other:?}"),
        }
        assert_eq!(open(&blob, &key()).unwrap(), b"hello");
    }

    #[test]
    fn test_seal_rejects_v3() {
        assert!(matches!(
            seal(b"x", &key(), SchemaVersion::V3),
            Err(EnvsealError::Config(_))
        ));
    }

    #[test]
    fn test_fresh_iv_per_seal() {
        let a = seal(b"same", &key(), SchemaVersion::V2).unwrap();
        let b = seal(b"same", &key(), SchemaVersion::V2).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_header_layout() {
        let header = Header::V3 { iv: [0u8; GCM_IV_SIZE] };
        assert_eq!(header.to_bytes().unwrap(), b"[3,\"AAAAAAAAAAAAAAAA\"]");
        let (parsed, len) = parse_header(b"[3,\"AAAAAAAAAAAAAAAA\"]rest").unwrap().unwrap();
        assert_eq!(parsed, header);
        assert_eq!(len, 22);
    }

    #[test]
    fn test_header_accepts_escaped_slashes() {
        let iv = [0xFFu8; GCM_IV_SIZE];
        let tag = [0xFBu8; TAG_SIZE];
        let iv_b64 = B64.encode(iv).replace('/', "\\/");
        let tag_b64 = B64.encode(tag).replace('/', "\\/");
        assert!(iv_b64.contains("\\/"));
        let raw = format!("[2,\"{iv_b64}\",\"{tag_b64}\"]");
        let (parsed, len) = parse_header(raw.as_bytes()).unwrap().unwrap();
        assert_eq!(parsed, Header::V2 { iv, tag });
        assert_eq!(len, raw.len());
    }

    #[test]
    fn test_unknown_version_is_distinct() {
        let blob = b"[9,\"AAAAAAAAAAAAAAAA\"]payload";
        assert_eq!(decode(blob).unwrap(), Envelope::Unknown { version: 9 });
        assert!(matches!(
            open(blob, &key()),
            Err(EnvsealError::UnsupportedVersion(9))
        ));
    }

    #[test]
    fn test_short_garbage_is_malformed() {
        assert!(matches!(
            decode(b"123"),
            Err(EnvsealError::MalformedEnvelope(_))
        ));
        assert!(matches!(
            decode(b"[2,"),
            Err(EnvsealError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_bad_header_falls_back_to_legacy() {
        let blob = b"[not json at all, just a legacy IV that starts with a bracket";
        assert!(matches!(decode(blob).unwrap(), Envelope::Legacy { .. }));
        assert!(open(blob, &key()).is_err());
    }

    #[test]
    fn test_wrong_iv_length_in_header() {
        let raw = format!("[2,\"{}\",\"{}\"]", B64.encode([0u8; 16]), B64.encode([0u8; 16]));
        assert!(matches!(
            parse_header(raw.as_bytes()),
            Err(EnvsealError::MalformedEnvelope(_))
        ));
    }

    #[test]
    fn test_encode_matches_manual_layout() {
        let iv = [1u8; GCM_IV_SIZE];
        let (ct, tag) = aead_encrypt(b"abc", &key().cipher_key()[..], &iv).unwrap();
        let blob = encode(SchemaVersion::V2, iv, tag, &ct).unwrap();
        let expected_header = format!("[2,\"{}\",\"{}\"]", B64.encode(iv), B64.encode(tag));
        assert_eq!(&blob[..expected_header.len()], expected_header.as_bytes());
        assert_eq!(&blob[expected_header.len()..], ct.as_slice());
    }

    #[test]
    fn test_tampered_tag_fails() {
        let blob = seal(b"payload", &key(), SchemaVersion::V2).unwrap();
        let Envelope::V2 { iv, mut tag, ciphertext } = decode(&blob).unwrap() else {
            panic!("expected v2");
        };
        tag[5] ^= 0x80;
        let tampered = encode(SchemaVersion::V2, iv, tag, ciphertext).unwrap();
        assert!(matches!(
            open(&tampered, &key()),
            Err(EnvsealError::Authentication)
        ));
    }
}
