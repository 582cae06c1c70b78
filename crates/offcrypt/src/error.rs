use thiserror::Error;

/// Errors returned by this crate.
///
/// A wrong password is not an error: it is reported as
/// [`DecodeOutcome::AuthenticationFailed`](crate::DecodeOutcome::AuthenticationFailed).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OffcryptError {
    /// The compound file structure is inconsistent (bad header, broken sector chain, size
    /// mismatch, missing stream, ...).
    #[error("malformed container: {context}")]
    MalformedContainer { context: &'static str },
    /// The `EncryptionInfo` version does not select a known scheme.
    #[error("unsupported EncryptionInfo version {major}.{minor}")]
    UnsupportedScheme { major: u16, minor: u16 },
    /// A descriptor field is missing or outside its allowed range.
    #[error("invalid encryption descriptor: {context}")]
    InvalidDescriptor { context: &'static str },
    /// The input (or a size declared inside it) does not fit the 32-bit size bound.
    #[error("input size {size} exceeds the 4 GiB limit")]
    OversizedInput { size: u64 },
    /// The companion key file could not be used to recover a secret key.
    #[error("unusable key file: {0}")]
    KeyFile(String),
    /// The input is neither a compound file nor a ZIP package.
    #[error("unknown document format")]
    UnknownFormat,
    /// The input is a plain ZIP package where an encrypted container was expected.
    #[error("document is not encrypted")]
    NotEncrypted,
    /// Caller-supplied options are inconsistent with the selected scheme.
    #[error("invalid options: {0}")]
    InvalidOptions(String),
    /// The Agile `dataIntegrity` HMAC does not match the `EncryptedPackage` stream.
    #[error("integrity check failed")]
    IntegrityCheckFailed,
}

impl OffcryptError {
    pub(crate) fn malformed(context: &'static str) -> Self {
        Self::MalformedContainer { context }
    }

    pub(crate) fn descriptor(context: &'static str) -> Self {
        Self::InvalidDescriptor { context }
    }
}

pub type Result<T, E = OffcryptError> = std::result::Result<T, E>;
