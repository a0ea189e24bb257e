//! Container header layout.
//!
//! The header occupies a fixed 8192-byte region; integers are little-endian.
//!
//! | Offset | Size | Field |
//! |--------|------|-------|
//! | 0 | 16 | magic `3DPFNKG00000000\0` |
//! | 16 | 4 | format version (2) |
//! | 32 | 32 | model tag, NUL padded |
//! | 80 | 4 | body offset |
//! | 84 | 4 | encrypted body length |
//! | 88 | 4 | plaintext length |
//! | 96 | 4 | print time, seconds |
//! | 100 | 4 | filament, mm |
//! | 104 | 4 | encryption scheme (1 CBC+zip, 2 ECB) |
//! | 112 | 32 | SHA-256 of the plaintext |

use crate::error::ConversionError;
use crate::printer::Encryption;

pub const HEADER_LEN: usize = 8192;
pub const MAGIC: &[u8; 16] = b"3DPFNKG00000000\0";
pub const FORMAT_VERSION: u32 = 2;

const VERSION_AT: usize = 16;
const MODEL_AT: usize = 32;
const MODEL_LEN: usize = 32;
const BODY_OFFSET_AT: usize = 80;
const ENCRYPTED_LEN_AT: usize = 84;
const PLAINTEXT_LEN_AT: usize = 88;
const PRINT_TIME_AT: usize = 96;
const FILAMENT_AT: usize = 100;
const ENCRYPTION_AT: usize = 104;
const CHECKSUM_AT: usize = 112;

/// Decoded container header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub version: u32,
    pub model_id: String,
    pub body_offset: u32,
    pub encrypted_len: u32,
    pub plaintext_len: u32,
    pub print_time_s: u32,
    pub filament_mm: u32,
    pub encryption: Encryption,
    pub checksum: [u8; 32],
}

impl Header {
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];
        out[..MAGIC.len()].copy_from_slice(MAGIC);
        put_u32(&mut out, VERSION_AT, self.version);
        let model = self.model_id.as_bytes();
        let n = model.len().min(MODEL_LEN);
        out[MODEL_AT..MODEL_AT + n].copy_from_slice(&model[..n]);
        put_u32(&mut out, BODY_OFFSET_AT, self.body_offset);
        put_u32(&mut out, ENCRYPTED_LEN_AT, self.encrypted_len);
        put_u32(&mut out, PLAINTEXT_LEN_AT, self.plaintext_len);
        put_u32(&mut out, PRINT_TIME_AT, self.print_time_s);
        put_u32(&mut out, FILAMENT_AT, self.filament_mm);
        put_u32(&mut out, ENCRYPTION_AT, self.encryption.header_code());
        out[CHECKSUM_AT..CHECKSUM_AT + 32].copy_from_slice(&self.checksum);
        out
    }

    /// Parse and validate the fixed fields.
    pub fn parse(bytes: &[u8]) -> Result<Self, ConversionError> {
        if bytes.len() < HEADER_LEN {
            return Err(ConversionError::Corrupt(format!(
                "{} bytes is shorter than the {HEADER_LEN}-byte header",
                bytes.len()
            )));
        }
        if &bytes[..MAGIC.len()] != MAGIC {
            return Err(ConversionError::Corrupt("bad magic".to_string()));
        }
        let version = get_u32(bytes, VERSION_AT);
        if version != FORMAT_VERSION {
            return Err(ConversionError::Corrupt(format!(
                "unsupported format version {version}"
            )));
        }
        let tag = &bytes[MODEL_AT..MODEL_AT + MODEL_LEN];
        let end = tag.iter().position(|&b| b == 0).unwrap_or(MODEL_LEN);
        let model_id = std::str::from_utf8(&tag[..end])
            .map_err(|_| ConversionError::Corrupt("model tag is not text".to_string()))?
            .to_string();
        let code = get_u32(bytes, ENCRYPTION_AT);
        let encryption = Encryption::from_header_code(code).ok_or_else(|| {
            ConversionError::Corrupt(format!("unknown encryption scheme {code}"))
        })?;
        let mut checksum = [0u8; 32];
        checksum.copy_from_slice(&bytes[CHECKSUM_AT..CHECKSUM_AT + 32]);

        Ok(Self {
            version,
            model_id,
            body_offset: get_u32(bytes, BODY_OFFSET_AT),
            encrypted_len: get_u32(bytes, ENCRYPTED_LEN_AT),
            plaintext_len: get_u32(bytes, PLAINTEXT_LEN_AT),
            print_time_s: get_u32(bytes, PRINT_TIME_AT),
            filament_mm: get_u32(bytes, FILAMENT_AT),
            encryption,
            checksum,
        })
    }
}

fn put_u32(buf: &mut [u8], at: usize, value: u32) {
    buf[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

fn get_u32(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn sample() -> Header {
        Header {
            version: FORMAT_VERSION,
            model_id: "dv1MX0A000".to_string(),
            body_offset: HEADER_LEN as u32,
            encrypted_len: 32,
            plaintext_len: 20,
            print_time_s: 3723,
            filament_mm: 1500,
            encryption: Encryption::Ecb256,
            checksum: [0xAB; 32],
        }
    }

    #[test]
    fn test_layout() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), HEADER_LEN);
        assert_eq!(&bytes[..16], b"3DPFNKG00000000\0");
        assert_eq!(&bytes[16..20], &[2, 0, 0, 0]);
        assert_eq!(&bytes[32..42], b"dv1MX0A000");
        assert_eq!(&bytes[80..84], &[0x00, 0x20, 0, 0]);
        assert_eq!(&bytes[96..100], &3723u32.to_le_bytes());
        assert_eq!(&bytes[104..108], &[2, 0, 0, 0]);
    }

    #[test]
    fn test_parse_back() {
        let header = sample();
        assert_eq!(Header::parse(&header.to_bytes()).unwrap(), header);
    }

    #[test]
    fn test_bad_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            Header::parse(&bytes),
            Err(ConversionError::Corrupt(_))
        ));
    }

    #[test]
    fn test_short_input() {
        assert!(Header::parse(&[0; 100]).is_err());
    }

    #[test]
    fn test_unknown_scheme() {
        let mut bytes = sample().to_bytes();
        bytes[104] = 9;
        assert!(Header::parse(&bytes).is_err());
    }
}
