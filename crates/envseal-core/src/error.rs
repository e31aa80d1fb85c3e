use thiserror::Error;

pub type EnvsealResult<T> = Result<T, EnvsealError>;

#[derive(Debug, Error)]
pub enum EnvsealError {
    /// Primitive misuse (bad key or IV length) or a crypto provider failure
    #[error("cipher error: {0}")]
    Cipher(String),

    /// An AEAD tag (or legacy padding) did not verify
    #[error("decryption returned no value")]
    Authentication,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error("unsupported envelope schema version: {0}")]
    UnsupportedVersion(u64),

    #[error("key wrap failed: {0}")]
    KeyWrap(String),

    #[error("key unwrap failed: {0}")]
    KeyUnwrap(String),

    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    #[error("key store error: {0}")]
    Store(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl EnvsealError {
    /// Whether value-mode decryption reports this as an absent value rather
    /// than propagating it.
    ///
    /// Wrong keys, tampered data and unparseable blobs are all "no value";
    /// store and I/O failures are never soft.
    pub fn is_soft(&self) -> bool {
        matches!(
            self,
            EnvsealError::Cipher(_)
                | EnvsealError::Authentication
                | EnvsealError::MalformedEnvelope(_)
                | EnvsealError::UnsupportedVersion(_)
                | EnvsealError::KeyUnwrap(_)
        )
    }
}
