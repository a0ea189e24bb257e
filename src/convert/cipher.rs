//! Body encryption.
//!
//! ECB models encrypt the toolpath directly with AES-256. CBC models first
//! wrap it in a single-entry zip archive, then encrypt with AES-128 and a zero
//! IV. Both pad with PKCS#7.
//!
//! Decryption takes the plaintext length the container header declares and
//! never inflates an archive entry past it.

use std::io::{Cursor, Read, Write};

use aes::cipher::block_padding::Pkcs7;
use aes::cipher::{BlockDecryptMut, BlockEncryptMut, KeyInit, KeyIvInit};
use aes::{Aes128, Aes256};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use super::profile::ConversionProfile;
use crate::error::ConversionError;
use crate::printer::Encryption;

/// Name of the toolpath entry inside CBC archives.
pub const ARCHIVE_ENTRY: &str = "model.gcode";

const AES_BLOCK: usize = 16;

fn bad_key(e: impl std::fmt::Display) -> ConversionError {
    ConversionError::Corrupt(format!("invalid key material: {e}"))
}

fn archive_error(e: impl std::fmt::Display) -> ConversionError {
    ConversionError::Archive(e.to_string())
}

pub fn encrypt(profile: &ConversionProfile, plaintext: &[u8]) -> Result<Vec<u8>, ConversionError> {
    match profile.encryption() {
        Encryption::Ecb256 => {
            let cipher = ecb::Encryptor::<Aes256>::new_from_slice(profile.key()).map_err(bad_key)?;
            Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(plaintext))
        }
        Encryption::CbcZip128 => {
            let archive = zip_body(plaintext)?;
            let iv = profile.iv().ok_or_else(|| bad_key("missing IV"))?;
            let cipher =
                cbc::Encryptor::<Aes128>::new_from_slices(profile.key(), iv).map_err(bad_key)?;
            Ok(cipher.encrypt_padded_vec_mut::<Pkcs7>(&archive))
        }
    }
}

/// Decrypt `body`. Plaintext longer than `limit` bytes is corrupt.
pub fn decrypt(
    profile: &ConversionProfile,
    body: &[u8],
    limit: usize,
) -> Result<Vec<u8>, ConversionError> {
    if body.is_empty() || body.len() % AES_BLOCK != 0 {
        return Err(ConversionError::Corrupt(format!(
            "body length {} is not a whole number of cipher blocks",
            body.len()
        )));
    }
    let bad_padding = |_| ConversionError::Corrupt("bad padding".to_string());
    match profile.encryption() {
        Encryption::Ecb256 => {
            let cipher = ecb::Decryptor::<Aes256>::new_from_slice(profile.key()).map_err(bad_key)?;
            cipher.decrypt_padded_vec_mut::<Pkcs7>(body).map_err(bad_padding)
        }
        Encryption::CbcZip128 => {
            let iv = profile.iv().ok_or_else(|| bad_key("missing IV"))?;
            let cipher =
                cbc::Decryptor::<Aes128>::new_from_slices(profile.key(), iv).map_err(bad_key)?;
            let archive = cipher.decrypt_padded_vec_mut::<Pkcs7>(body).map_err(bad_padding)?;
            unzip_body(&archive, limit)
        }
    }
}

fn zip_body(plaintext: &[u8]) -> Result<Vec<u8>, ConversionError> {
    let mut buffer = Cursor::new(Vec::new());
    let mut zip = ZipWriter::new(&mut buffer);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    zip.start_file(ARCHIVE_ENTRY, options).map_err(archive_error)?;
    zip.write_all(plaintext).map_err(archive_error)?;
    zip.finish().map_err(archive_error)?;
    Ok(buffer.into_inner())
}

fn unzip_body(archive: &[u8], limit: usize) -> Result<Vec<u8>, ConversionError> {
    let mut zip = ZipArchive::new(Cursor::new(archive)).map_err(archive_error)?;
    if zip.len() != 1 {
        return Err(ConversionError::Archive(format!(
            "expected one entry, found {}",
            zip.len()
        )));
    }
    let entry = zip.by_index(0).map_err(archive_error)?;
    let mut out = Vec::new();
    entry
        .take(limit as u64 + 1)
        .read_to_end(&mut out)
        .map_err(archive_error)?;
    if out.len() > limit {
        return Err(ConversionError::Corrupt(format!(
            "archive entry inflates past the declared {limit} bytes"
        )));
    }
    Ok(out)
}
