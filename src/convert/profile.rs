//! Per-model conversion profiles.

use crate::error::ConversionError;
use crate::printer::models::{self, Encryption, PrinterModel};

use super::header::{FORMAT_VERSION, HEADER_LEN, Header};

/// Key shared by every V3 model.
const KEY_128: &[u8; 16] = b"@xyzprinting.com";

/// The same key doubled for AES-256.
const KEY_256: [u8; 32] = doubled(KEY_128);

/// CBC models use an all-zero IV.
const ZERO_IV: [u8; 16] = [0; 16];

const fn doubled(key: &[u8; 16]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut i = 0;
    while i < 16 {
        out[i] = key[i];
        out[i + 16] = key[i];
        i += 1;
    }
    out
}

/// # Conversion Profile
///
/// Key material and header template for one printer model. Profiles exist
/// only for models in [`models::MODELS`]; there is no fallback key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionProfile {
    pub model: &'static PrinterModel,
}

impl ConversionProfile {
    /// Select the profile for a firmware model identifier.
    ///
    /// ```
    /// use vinci::convert::ConversionProfile;
    ///
    /// assert!(ConversionProfile::for_model("dv1MX0A000").is_ok());
    /// assert!(ConversionProfile::for_model("dv9ZZ0Z000").is_err());
    /// ```
    pub fn for_model(model_id: &str) -> Result<Self, ConversionError> {
        models::lookup(model_id)
            .map(|model| Self { model })
            .ok_or_else(|| ConversionError::UnsupportedModel(model_id.trim().to_string()))
    }

    pub fn model_id(&self) -> &'static str {
        self.model.id
    }

    pub fn encryption(&self) -> Encryption {
        self.model.encryption
    }

    /// Cipher key for this model's scheme.
    pub fn key(&self) -> &'static [u8] {
        match self.model.encryption {
            Encryption::CbcZip128 => KEY_128,
            Encryption::Ecb256 => &KEY_256,
        }
    }

    /// Initialization vector, for schemes that use one.
    pub fn iv(&self) -> Option<&'static [u8; 16]> {
        match self.model.encryption {
            Encryption::CbcZip128 => Some(&ZERO_IV),
            Encryption::Ecb256 => None,
        }
    }

    /// Header with the fixed fields filled in; lengths, metadata and checksum
    /// are left zero.
    pub fn header_template(&self) -> Header {
        Header {
            version: FORMAT_VERSION,
            model_id: self.model.id.to_string(),
            body_offset: HEADER_LEN as u32,
            encrypted_len: 0,
            plaintext_len: 0,
            print_time_s: 0,
            filament_mm: 0,
            encryption: self.model.encryption,
            checksum: [0; 32],
        }
    }
}
