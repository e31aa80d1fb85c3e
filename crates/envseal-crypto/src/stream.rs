//! Chunked file encryption (schema v3) with chained IVs
//!
//! Stream layout:
//! ```text
//! [prefix][3,"<b64 initial iv>"]{[ciphertext <= CHUNK_SIZE][16-byte tag]}*
//! ```
//! Every chunk but the last holds exactly `CHUNK_SIZE` plaintext bytes. The
//! IV of chunk `n + 1` is the first `GCM_IV_SIZE` bytes of chunk `n`'s
//! ciphertext. Memory use is bounded by one chunk regardless of input size.
//!
//! There is no end marker: a stream cut exactly at a chunk boundary decrypts
//! without error to the plaintext of the chunks that remain.
//!
//! Source and destination are taken by value, so both are dropped (closed)
//! on every exit path. Pass `&mut` to keep using them afterwards.

use std::io::{self, Cursor, Read, Write};

use envseal_core::{EnvsealError, EnvsealResult};

use crate::envelope::{open, parse_header, Header};
use crate::keys::Key;
use crate::primitives::{random_iv, AeadCipher};
use crate::{CHUNK_SIZE, GCM_IV_SIZE, HEADER_LOOKAHEAD, TAG_SIZE};

/// Totals reported by a completed stream operation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StreamStats {
    /// Number of v3 chunks processed (0 for single-block v1/v2 streams)
    pub chunks: u64,
    /// Plaintext bytes read (encrypt) or written (decrypt)
    pub bytes: u64,
}

/// IV for the chunk following `ciphertext`.
pub fn next_iv(ciphertext: &[u8]) -> EnvsealResult<[u8; GCM_IV_SIZE]> {
    ciphertext
        .get(..GCM_IV_SIZE)
        .and_then(|prefix| prefix.try_into().ok())
        .ok_or_else(|| {
            EnvsealError::MalformedEnvelope(format!(
                "chunk of {} bytes is too short to seed the next IV",
                ciphertext.len()
            ))
        })
}

/// Encrypt `source` into `destination` as a v3 stream.
///
/// `prefix` is written verbatim before the header; the hybrid envelope uses
/// it to carry the wrapped key.
pub fn encrypt_stream<R: Read, W: Write>(
    mut source: R,
    mut destination: W,
    key: &Key,
    prefix: &[u8],
) -> EnvsealResult<StreamStats> {
    let cipher = AeadCipher::new(&key.cipher_key()[..])?;
    let mut iv = random_iv();

    destination.write_all(prefix)?;
    destination.write_all(&Header::V3 { iv }.to_bytes()?)?;

    let mut stats = StreamStats::default();
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = read_full(&mut source, &mut buf)?;
        if n == 0 {
            break;
        }
        let chunk = &mut buf[..n];
        let tag = cipher.encrypt_in_place(&iv, chunk)?;
        destination.write_all(chunk)?;
        destination.write_all(&tag)?;
        stats.chunks += 1;
        stats.bytes += n as u64;

        if n < CHUNK_SIZE {
            break;
        }
        iv = next_iv(chunk)?;
    }
    destination.flush()?;

    tracing::debug!(chunks = stats.chunks, bytes = stats.bytes, "encrypted stream");
    Ok(stats)
}

/// Decrypt a stream written by [`encrypt_stream`] (or a single v1/v2 envelope).
///
/// The first `bytes_to_skip` bytes of `source` are discarded unread. Any
/// header, version or tag failure is returned as an error; chunks decrypted
/// before the failure may already have been written to `destination`.
pub fn decrypt_stream<R: Read, W: Write>(
    mut source: R,
    mut destination: W,
    key: &Key,
    bytes_to_skip: u64,
) -> EnvsealResult<StreamStats> {
    if bytes_to_skip > 0 {
        let skipped = io::copy(&mut (&mut source).take(bytes_to_skip), &mut io::sink())?;
        if skipped < bytes_to_skip {
            return Err(EnvsealError::MalformedEnvelope(format!(
                "stream ended after {skipped} of {bytes_to_skip} prefix bytes"
            )));
        }
    }

    let mut window = vec![0u8; HEADER_LOOKAHEAD];
    let filled = read_full(&mut source, &mut window)?;
    window.truncate(filled);

    let (header, header_len) = parse_header(&window)?
        .ok_or_else(|| EnvsealError::MalformedEnvelope("stream has no envelope header".into()))?;
    let mut body = Cursor::new(&window[header_len..]).chain(source);

    let stats = match header {
        Header::V3 { iv } => {
            let cipher = AeadCipher::new(&key.cipher_key()[..])?;
            decrypt_chunks(&mut body, &mut destination, &cipher, iv)?
        }
        Header::V1 { .. } | Header::V2 { .. } => {
            // small files written before chunking: one envelope, read whole
            let mut blob = window[..header_len].to_vec();
            body.read_to_end(&mut blob)?;
            let plaintext = open(&blob, key)?;
            destination.write_all(&plaintext)?;
            StreamStats {
                chunks: 0,
                bytes: plaintext.len() as u64,
            }
        }
        Header::Unknown { version } => return Err(EnvsealError::UnsupportedVersion(version)),
    };
    destination.flush()?;

    tracing::debug!(chunks = stats.chunks, bytes = stats.bytes, "decrypted stream");
    Ok(stats)
}

/// Decrypt the v3 chunk sequence that follows the header.
pub(crate) fn decrypt_chunks<R: Read, W: Write>(
    mut reader: R,
    mut destination: W,
    cipher: &AeadCipher,
    initial_iv: [u8; GCM_IV_SIZE],
) -> EnvsealResult<StreamStats> {
    let mut iv = initial_iv;
    let mut stats = StreamStats::default();
    let mut buf = vec![0u8; CHUNK_SIZE + TAG_SIZE];
    loop {
        let n = read_full(&mut reader, &mut buf)?;
        if n == 0 {
            break;
        }
        if n < TAG_SIZE {
            return Err(EnvsealError::MalformedEnvelope(format!(
                "truncated chunk {}: {n} bytes",
                stats.chunks
            )));
        }
        let full = n == buf.len();
        let (ciphertext, tag) = buf[..n].split_at_mut(n - TAG_SIZE);

        // seed from ciphertext before it is overwritten in place
        let following = if full { Some(next_iv(ciphertext)?) } else { None };

        cipher.decrypt_in_place(&iv, ciphertext, tag)?;
        destination.write_all(ciphertext)?;
        stats.chunks += 1;
        stats.bytes += ciphertext.len() as u64;

        match following {
            Some(next) => iv = next,
            None => break,
        }
    }
    Ok(stats)
}

/// Read until `buf` is full or the source is exhausted.
fn read_full<R: Read>(source: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match source.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::envelope::seal;
    use envseal_core::SchemaVersion;

    fn key() -> Key {
        Key::from_bytes(b"stream-test-key".to_vec())
    }

    fn make_data(size: usize) -> Vec<u8> {
        (0..size)
            .map(|i| (i.wrapping_mul(7) ^ (i >> 3)) as u8)
            .collect()
    }

    fn roundtrip(data: &[u8]) -> (Vec<u8>, StreamStats) {
        let mut encrypted = Vec::new();
        let enc = encrypt_stream(data, &mut encrypted, &key(), b"").unwrap();
        let mut decrypted = Vec::new();
        let dec = decrypt_stream(encrypted.as_slice(), &mut decrypted, &key(), 0).unwrap();
        assert_eq!(enc, dec);
        (decrypted, dec)
    }

    #[test]
    fn test_empty_stream() {
        let (out, stats) = roundtrip(b"");
        assert!(out.is_empty());
        assert_eq!(stats.chunks, 0);
    }

    #[test]
    fn test_smaller_than_one_chunk() {
        let data = make_data(1000);
        let (out, stats) = roundtrip(&data);
        assert_eq!(out, data);
        assert_eq!(stats.chunks, 1);
    }

    #[test]
    fn test_exactly_one_chunk() {
        let data = make_data(CHUNK_SIZE);
        let (out, stats) = roundtrip(&data);
        assert_eq!(out, data);
        assert_eq!(stats.chunks, 1);
    }

    #[test]
    fn test_several_chunks_with_short_tail() {
        let data = make_data(CHUNK_SIZE * 2 + 5);
        let (out, stats) = roundtrip(&data);
        assert_eq!(out, data);
        assert_eq!(stats.chunks, 3);
    }

    #[test]
    fn test_encrypted_layout_and_iv_chaining() {
        let data = make_data(CHUNK_SIZE + 100);
        let mut encrypted = Vec::new();
        encrypt_stream(data.as_slice(), &mut encrypted, &key(), b"PREFIX").unwrap();

        assert!(encrypted.starts_with(b"PREFIX[3,\""));
        let (header, header_len) = parse_header(&encrypted[6..]).unwrap().unwrap();
        let Header::V3 { iv } = header else {
            panic!("expected v3 header");
        };
        let body = &encrypted[6 + header_len..];
        assert_eq!(body.len(), CHUNK_SIZE + TAG_SIZE + 100 + TAG_SIZE);

        // second chunk decrypts standalone under the first chunk's ciphertext prefix
        let cipher = AeadCipher::new(&key().cipher_key()[..]).unwrap();
        let first = &body[..CHUNK_SIZE];
        let mut second = body[CHUNK_SIZE + TAG_SIZE..body.len() - TAG_SIZE].to_vec();
        let tag = &body[body.len() - TAG_SIZE..];
        cipher
            .decrypt_in_place(&next_iv(first).unwrap(), &mut second, tag)
            .unwrap();
        assert_eq!(second, &data[CHUNK_SIZE..]);

        let mut first_plain = first.to_vec();
        cipher
            .decrypt_in_place(&iv, &mut first_plain, &body[CHUNK_SIZE..CHUNK_SIZE + TAG_SIZE])
            .unwrap();
        assert_eq!(first_plain, &data[..CHUNK_SIZE]);
    }

    #[test]
    fn test_skip_prefix() {
        let data = make_data(4096);
        let mut encrypted = Vec::new();
        encrypt_stream(data.as_slice(), &mut encrypted, &key(), b"wrapped-key-goes-here").unwrap();

        let mut out = Vec::new();
        decrypt_stream(encrypted.as_slice(), &mut out, &key(), 21).unwrap();
        assert_eq!(out, data);
    }

    #[test]
    fn test_skip_past_end() {
        let mut out = Vec::new();
        let err = decrypt_stream(&b"short"[..], &mut out, &key(), 100).unwrap_err();
        assert!(matches!(err, EnvsealError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_tampered_chunk_is_fatal() {
        let data = make_data(CHUNK_SIZE + 10);
        let mut encrypted = Vec::new();
        encrypt_stream(data.as_slice(), &mut encrypted, &key(), b"").unwrap();
        let last = encrypted.len() - 1;
        encrypted[last] ^= 0x01;

        let mut out = Vec::new();
        let err = decrypt_stream(encrypted.as_slice(), &mut out, &key(), 0).unwrap_err();
        assert!(matches!(err, EnvsealError::Authentication));
    }

    #[test]
    fn test_wrong_key_is_fatal() {
        let mut encrypted = Vec::new();
        encrypt_stream(&b"data"[..], &mut encrypted, &key(), b"").unwrap();
        let mut out = Vec::new();
        let other = Key::from_bytes(b"another-key".to_vec());
        assert!(matches!(
            decrypt_stream(encrypted.as_slice(), &mut out, &other, 0),
            Err(EnvsealError::Authentication)
        ));
    }

    #[test]
    fn test_truncated_tail_is_fatal() {
        let mut encrypted = Vec::new();
        encrypt_stream(&make_data(100)[..], &mut encrypted, &key(), b"").unwrap();
        encrypted.truncate(encrypted.len() - 110);
        let mut out = Vec::new();
        assert!(decrypt_stream(encrypted.as_slice(), &mut out, &key(), 0).is_err());
    }

    #[test]
    fn test_truncation_at_chunk_boundary_is_undetected() {
        let data = make_data(2 * CHUNK_SIZE + 10);
        let mut encrypted = Vec::new();
        encrypt_stream(data.as_slice(), &mut encrypted, &key(), b"").unwrap();
        let header_len = encrypted.iter().position(|&b| b == b']').unwrap() + 1;
        encrypted.truncate(header_len + CHUNK_SIZE + TAG_SIZE);

        let mut out = Vec::new();
        let stats = decrypt_stream(encrypted.as_slice(), &mut out, &key(), 0).unwrap();
        assert_eq!(stats.chunks, 1);
        assert_eq!(out, &data[..CHUNK_SIZE]);
    }

    #[test]
    fn test_missing_header_is_fatal() {
        let mut out = Vec::new();
        let err = decrypt_stream(&[0x41u8; 64][..], &mut out, &key(), 0).unwrap_err();
        assert!(matches!(err, EnvsealError::MalformedEnvelope(_)));
    }

    #[test]
    fn test_unknown_version_is_fatal() {
        let mut out = Vec::new();
        let err = decrypt_stream(&b"[4,\"AAAAAAAAAAAAAAAA\"]xxxx"[..], &mut out, &key(), 0)
            .unwrap_err();
        assert!(matches!(err, EnvsealError::UnsupportedVersion(4)));
    }

    #[test]
    fn test_single_envelope_stream() {
        let data = make_data(5000);
        for version in [SchemaVersion::V1, SchemaVersion::V2] {
            let blob = seal(&data, &key(), version).unwrap();
            let mut out = Vec::new();
            let stats = decrypt_stream(blob.as_slice(), &mut out, &key(), 0).unwrap();
            assert_eq!(out, data);
            assert_eq!(stats.chunks, 0);
        }
    }

    #[test]
    fn test_next_iv_requires_prefix() {
        assert!(next_iv(&[1u8; 11]).is_err());
        assert_eq!(next_iv(&[5u8; 40]).unwrap(), [5u8; GCM_IV_SIZE]);
    }
}
