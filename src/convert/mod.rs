//! # Conversion Engine
//!
//! Turns a plaintext toolpath into the encrypted `.3w` container the firmware
//! accepts, and back.
//!
//! ```
//! use vinci::convert::{self, ConversionProfile};
//!
//! let profile = ConversionProfile::for_model("dv1MX0A000")?;
//! let toolpath = b"G28\nG1 X10 Y10 E1\n";
//!
//! let container = convert::convert(toolpath, &profile)?;
//! assert_eq!(convert::invert(container.as_bytes(), &profile)?, toolpath);
//! # Ok::<(), vinci::error::ConversionError>(())
//! ```
//!
//! Both directions are pure. `convert` stores the toolpath byte-for-byte;
//! firmware-specific rewriting lives in [`gcode::prepare`] and is applied by
//! the job controller before conversion.

pub mod cipher;
pub mod gcode;
pub mod header;
pub mod profile;

pub use gcode::PrintInfo;
pub use header::{HEADER_LEN, Header};
pub use profile::ConversionProfile;

use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::ConversionError;

/// An encrypted container: header followed by the encrypted body.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    header: Header,
    bytes: Vec<u8>,
}

impl Container {
    /// Wrap existing container bytes, validating the header.
    pub fn from_bytes(bytes: Vec<u8>) -> Result<Self, ConversionError> {
        let header = Header::parse(&bytes)?;
        Ok(Self { header, bytes })
    }

    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// Encrypt a toolpath into a container for `profile`'s model.
///
/// Print time and filament estimates are read from the toolpath's comments
/// and recorded in the header alongside a SHA-256 of the plaintext.
pub fn convert(toolpath: &[u8], profile: &ConversionProfile) -> Result<Container, ConversionError> {
    let plaintext_len =
        u32::try_from(toolpath.len()).map_err(|_| ConversionError::TooLarge(toolpath.len()))?;
    let info = gcode::extract_print_info(toolpath);
    let body = cipher::encrypt(profile, toolpath)?;
    let encrypted_len =
        u32::try_from(body.len()).map_err(|_| ConversionError::TooLarge(toolpath.len()))?;

    let mut header = profile.header_template();
    header.encrypted_len = encrypted_len;
    header.plaintext_len = plaintext_len;
    header.print_time_s = info.print_time_s;
    header.filament_mm = info.filament_mm as u32;
    header.checksum = Sha256::digest(toolpath).into();

    let mut bytes = header.to_bytes();
    bytes.extend_from_slice(&body);
    debug!(
        model = profile.model_id(),
        plaintext = toolpath.len(),
        encrypted = body.len(),
        total = bytes.len(),
        "container built"
    );
    Ok(Container { header, bytes })
}

/// Decrypt a container with `profile` and verify it.
///
/// Fails on a foreign model tag, inconsistent lengths, bad padding, or a
/// checksum mismatch.
pub fn invert(container: &[u8], profile: &ConversionProfile) -> Result<Vec<u8>, ConversionError> {
    let header = Header::parse(container)?;
    if header.model_id != profile.model_id() {
        return Err(ConversionError::ModelMismatch {
            expected: profile.model_id().to_string(),
            found: header.model_id,
        });
    }
    if header.encryption != profile.encryption() {
        return Err(ConversionError::Corrupt(format!(
            "header declares {:?}, model uses {:?}",
            header.encryption,
            profile.encryption()
        )));
    }

    let start = header.body_offset as usize;
    let end = start.saturating_add(header.encrypted_len as usize);
    if start < HEADER_LEN || end != container.len() {
        return Err(ConversionError::Corrupt(format!(
            "body {start}..{end} does not match container length {}",
            container.len()
        )));
    }

    let plaintext = cipher::decrypt(
        profile,
        &container[start..end],
        header.plaintext_len as usize,
    )?;
    if plaintext.len() != header.plaintext_len as usize {
        return Err(ConversionError::Corrupt(format!(
            "plaintext is {} bytes, header declares {}",
            plaintext.len(),
            header.plaintext_len
        )));
    }
    let digest: [u8; 32] = Sha256::digest(&plaintext).into();
    if digest != header.checksum {
        return Err(ConversionError::ChecksumMismatch);
    }
    Ok(plaintext)
}

/// Decrypt a container using the profile named by its own header.
pub fn decrypt(container: &[u8]) -> Result<(Header, Vec<u8>), ConversionError> {
    let header = Header::parse(container)?;
    let profile = ConversionProfile::for_model(&header.model_id)?;
    let plaintext = invert(container, &profile)?;
    Ok((header, plaintext))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::printer::models::MODELS;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    const TOOLPATH: &[u8] = b";TIME:600\n;Filament used: 2m\nG28\nG1 X10 Y10 E1.5\n";

    fn ecb() -> ConversionProfile {
        ConversionProfile::for_model("dv1MX0A000").unwrap()
    }

    fn cbc() -> ConversionProfile {
        ConversionProfile::for_model("dv1JP0A000").unwrap()
    }

    #[test]
    fn test_header_records_metadata() {
        let container = convert(TOOLPATH, &ecb()).unwrap();
        let header = container.header();
        assert_eq!(header.model_id, "dv1MX0A000");
        assert_eq!(header.plaintext_len as usize, TOOLPATH.len());
        assert_eq!(header.print_time_s, 600);
        assert_eq!(header.filament_mm, 2000);
        assert_eq!(container.len(), HEADER_LEN + header.encrypted_len as usize);
    }

    #[test]
    fn test_every_model_round_trips() {
        for model in MODELS {
            let profile = ConversionProfile::for_model(model.id).unwrap();
            let container = convert(TOOLPATH, &profile).unwrap();
            assert_eq!(invert(container.as_bytes(), &profile).unwrap(), TOOLPATH);
        }
    }

    #[test]
    fn test_model_mismatch() {
        let container = convert(TOOLPATH, &ecb()).unwrap();
        let other = ConversionProfile::for_model("dv1MW0A000").unwrap();
        assert_eq!(
            invert(container.as_bytes(), &other),
            Err(ConversionError::ModelMismatch {
                expected: "dv1MW0A000".to_string(),
                found: "dv1MX0A000".to_string(),
            })
        );
    }

    #[test]
    fn test_checksum_mismatch() {
        let mut bytes = convert(TOOLPATH, &cbc()).unwrap().into_bytes();
        bytes[112] ^= 0xFF;
        assert_eq!(invert(&bytes, &cbc()), Err(ConversionError::ChecksumMismatch));
    }

    #[test]
    fn test_truncated_body() {
        let bytes = convert(TOOLPATH, &ecb()).unwrap().into_bytes();
        assert!(matches!(
            invert(&bytes[..bytes.len() - 16], &ecb()),
            Err(ConversionError::Corrupt(_))
        ));
    }

    #[test]
    fn test_decrypt_uses_header_model() {
        let bytes = convert(TOOLPATH, &cbc()).unwrap().into_bytes();
        let (header, plaintext) = decrypt(&bytes).unwrap();
        assert_eq!(header.model_id, "dv1JP0A000");
        assert_eq!(plaintext, TOOLPATH);
    }

    #[test]
    fn test_from_bytes_rejects_garbage() {
        assert!(Container::from_bytes(vec![0; 10]).is_err());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_round_trip(toolpath in proptest::collection::vec(any::<u8>(), 0..4096), use_ecb in any::<bool>()) {
            let profile = if use_ecb { ecb() } else { cbc() };
            let container = convert(&toolpath, &profile).unwrap();
            prop_assert_eq!(invert(container.as_bytes(), &profile).unwrap(), toolpath);
        }
    }
}
