//! Recover a package secret key from a companion key file.
//!
//! The key file is itself an encrypted container. Unlocking its password key encryptor yields the
//! package key, which can then be passed as a secret-key override to
//! [`decode`](crate::decode::decode) for any document encrypted under that key.

use zeroize::Zeroizing;

use crate::cfb::CfbReader;
use crate::encryption_info::EncryptionDescriptor;
use crate::error::{OffcryptError, Result};
use crate::format::{detect, Format};
use crate::kdf::{unlock, KeyMaterial};
use crate::password::Password;
use crate::ENCRYPTION_INFO_STREAM;

pub fn secret_key_from_key_file(key_file: &[u8], password: &Password) -> Result<Zeroizing<Vec<u8>>> {
    if detect(key_file) != Format::Cfb {
        return Err(OffcryptError::KeyFile(
            "key file is not an encrypted container".to_string(),
        ));
    }
    let reader = CfbReader::open(key_file).map_err(key_file_error)?;
    let info = reader
        .read_stream(ENCRYPTION_INFO_STREAM)
        .map_err(key_file_error)?;
    let descriptor = EncryptionDescriptor::parse(&info).map_err(key_file_error)?;

    let key = unlock(&descriptor, KeyMaterial::Password(password))
        .map_err(key_file_error)?
        .ok_or_else(|| OffcryptError::KeyFile("wrong password for key file".to_string()))?;
    log::debug!(
        "recovered {}-bit secret key from {} key file",
        key.len() * 8,
        descriptor.scheme()
    );
    Ok(key)
}

fn key_file_error(err: OffcryptError) -> OffcryptError {
    OffcryptError::KeyFile(err.to_string())
}
