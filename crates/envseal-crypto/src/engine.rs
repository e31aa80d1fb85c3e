//! The public face of envseal: value, stream, file and hybrid operations
//! bound to one engine configuration and one default key.
//!
//! Value decryption has two entry points. `try_decrypt` returns the typed
//! error; `decrypt` collapses every soft failure (bad key, tampering, junk
//! input) to `Ok(None)`. Stream and file operations have no such mode: every
//! failure is an error.

use std::fs::File;
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use envseal_core::config::EngineConfig;
use envseal_core::{EnvsealError, EnvsealResult, SchemaVersion};
use tempfile::NamedTempFile;

use crate::default_key::DefaultKeyProvider;
use crate::envelope::{open, seal};
use crate::hybrid;
use crate::keys::{self, Key, KeyPair};
use crate::stream::{self, StreamStats};

pub struct EnvelopeEngine {
    config: EngineConfig,
    default_key: DefaultKeyProvider,
}

impl EnvelopeEngine {
    pub fn new(config: EngineConfig, default_key: DefaultKeyProvider) -> EnvsealResult<Self> {
        config.validate()?;
        Ok(Self {
            config,
            default_key,
        })
    }

    /// Version written by [`encrypt`](Self::encrypt).
    pub fn write_version(&self) -> SchemaVersion {
        self.config.write_schema_version
    }

    pub fn default_key(&self) -> &DefaultKeyProvider {
        &self.default_key
    }

    fn resolve_key(&self, key: Option<&Key>) -> EnvsealResult<Key> {
        match key {
            Some(key) => Ok(key.clone()),
            None => self.default_key.get(),
        }
    }

    // ── values ───────────────────────────────────────────────────────────

    /// Seal `value` under `key` (or the default key) at the configured version.
    pub fn encrypt(&self, value: &[u8], key: Option<&Key>) -> EnvsealResult<Vec<u8>> {
        let key = self.resolve_key(key)?;
        seal(value, &key, self.config.write_schema_version)
    }

    /// Open any supported envelope, reporting why it failed.
    pub fn try_decrypt(&self, blob: &[u8], key: Option<&Key>) -> EnvsealResult<Vec<u8>> {
        let key = self.resolve_key(key)?;
        open(blob, &key)
    }

    /// Open any supported envelope; `None` when it cannot be opened.
    ///
    /// Only failures unrelated to the input (a broken key store) are errors.
    pub fn decrypt(&self, blob: &[u8], key: Option<&Key>) -> EnvsealResult<Option<Vec<u8>>> {
        soften(self.try_decrypt(blob, key))
    }

    // ── streams ──────────────────────────────────────────────────────────

    pub fn encrypt_stream<R: Read, W: Write>(
        &self,
        source: R,
        destination: W,
        key: Option<&Key>,
    ) -> EnvsealResult<StreamStats> {
        let key = self.resolve_key(key)?;
        stream::encrypt_stream(source, destination, &key, b"")
    }

    pub fn decrypt_stream<R: Read, W: Write>(
        &self,
        source: R,
        destination: W,
        key: Option<&Key>,
    ) -> EnvsealResult<StreamStats> {
        let key = self.resolve_key(key)?;
        stream::decrypt_stream(source, destination, &key, 0)
    }

    // ── files ────────────────────────────────────────────────────────────

    pub fn encrypt_file(
        &self,
        source: &Path,
        destination: &Path,
        key: Option<&Key>,
    ) -> EnvsealResult<StreamStats> {
        let key = self.resolve_key(key)?;
        write_file(source, destination, |reader, writer| {
            stream::encrypt_stream(reader, writer, &key, b"")
        })
    }

    /// Decrypt `source` into `destination`. Nothing is written to
    /// `destination` unless every chunk authenticates.
    pub fn decrypt_file(
        &self,
        source: &Path,
        destination: &Path,
        key: Option<&Key>,
    ) -> EnvsealResult<StreamStats> {
        let key = self.resolve_key(key)?;
        write_file(source, destination, |reader, writer| {
            stream::decrypt_stream(reader, writer, &key, 0)
        })
    }

    // ── hybrid ───────────────────────────────────────────────────────────

    /// Seal `value` under a fresh key wrapped for `public_key_pem`. Always v2.
    pub fn encrypt_with_public_key(
        &self,
        value: &[u8],
        public_key_pem: &str,
    ) -> EnvsealResult<Vec<u8>> {
        hybrid::seal_with_public_key(value, public_key_pem)
    }

    pub fn try_decrypt_with_private_key(
        &self,
        blob: &[u8],
        private_key_pem: &str,
    ) -> EnvsealResult<Vec<u8>> {
        hybrid::open_with_private_key(blob, private_key_pem)
    }

    /// Hybrid counterpart of [`decrypt`](Self::decrypt).
    pub fn decrypt_with_private_key(
        &self,
        blob: &[u8],
        private_key_pem: &str,
    ) -> EnvsealResult<Option<Vec<u8>>> {
        soften(self.try_decrypt_with_private_key(blob, private_key_pem))
    }

    pub fn encrypt_stream_with_public_key<R: Read, W: Write>(
        &self,
        source: R,
        destination: W,
        public_key_pem: &str,
    ) -> EnvsealResult<StreamStats> {
        hybrid::encrypt_stream_with_public_key(source, destination, public_key_pem)
    }

    pub fn decrypt_stream_with_private_key<R: Read, W: Write>(
        &self,
        source: R,
        destination: W,
        private_key_pem: &str,
    ) -> EnvsealResult<StreamStats> {
        hybrid::decrypt_stream_with_private_key(source, destination, private_key_pem)
    }

    pub fn encrypt_file_with_public_key(
        &self,
        source: &Path,
        destination: &Path,
        public_key_pem: &str,
    ) -> EnvsealResult<StreamStats> {
        write_file(source, destination, |reader, writer| {
            hybrid::encrypt_stream_with_public_key(reader, writer, public_key_pem)
        })
    }

    /// Decrypt a hybrid file. The wrapped key is read first, then the file
    /// is reopened and decrypted with the prefix skipped.
    pub fn decrypt_file_with_private_key(
        &self,
        source: &Path,
        destination: &Path,
        private_key_pem: &str,
    ) -> EnvsealResult<StreamStats> {
        let (prefix, _) = hybrid::read_prefix(&mut BufReader::new(File::open(source)?))?;
        let key = hybrid::unwrap_prefix(&prefix, private_key_pem)?;
        let skip = prefix.len() as u64;
        write_file(source, destination, |reader, writer| {
            stream::decrypt_stream(reader, writer, &key, skip)
        })
    }

    /// A fresh RSA-2048 key pair for the hybrid operations.
    pub fn generate_key_pair(&self) -> EnvsealResult<KeyPair> {
        keys::generate_key_pair()
    }
}

impl std::fmt::Debug for EnvelopeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnvelopeEngine")
            .field("write_schema_version", &self.config.write_schema_version)
            .field("default_key", &self.default_key)
            .finish()
    }
}

fn soften(result: EnvsealResult<Vec<u8>>) -> EnvsealResult<Option<Vec<u8>>> {
    match result {
        Ok(plaintext) => Ok(Some(plaintext)),
        Err(e) if e.is_soft() => {
            tracing::warn!(error = %e, "could not decrypt value");
            Ok(None)
        }
        Err(e) => Err(e),
    }
}

/// Run `op` from `source` into a temp file beside `destination`, which
/// replaces `destination` only once `op` has succeeded.
///
/// `source` is fully read before `destination` is touched, so the two may be
/// the same path. A failed run leaves any existing `destination` as it was.
fn write_file<F>(source: &Path, destination: &Path, op: F) -> EnvsealResult<StreamStats>
where
    F: FnOnce(&mut BufReader<File>, &mut BufWriter<&mut File>) -> EnvsealResult<StreamStats>,
{
    let mut reader = BufReader::new(File::open(source)?);
    let mut staged = NamedTempFile::new_in(staging_dir(destination))?;

    let result = (|| -> EnvsealResult<StreamStats> {
        let mut writer = BufWriter::new(staged.as_file_mut());
        let stats = op(&mut reader, &mut writer)?;
        writer.flush()?;
        drop(writer);
        staged.as_file().sync_all()?;
        Ok(stats)
    })();
    drop(reader);

    match result {
        Ok(stats) => {
            staged
                .persist(destination)
                .map_err(|e| EnvsealError::Io(e.error))?;
            Ok(stats)
        }
        Err(e) => {
            tracing::warn!(
                source = %source.display(),
                destination = %destination.display(),
                error = %e,
                "file operation failed, destination left untouched"
            );
            Err(e)
        }
    }
}

fn staging_dir(destination: &Path) -> &Path {
    match destination.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
