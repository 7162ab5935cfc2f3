//! On-disk format constants: segment signatures, the v1/v2 split, media
//! type/flags, and the `format=` identifiers.

/// EWF/EnCase 1-6 segment signature ("EVF\x09\x0d\x0a\xff\x00").
pub const SIGNATURE_EWF: [u8; 8] = [0x45, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00];
/// SMART / EWF-S01 signature, differs from [`SIGNATURE_EWF`] in one byte
/// (the vendor letter: 'M' instead of 'E').
pub const SIGNATURE_SMART: [u8; 8] = [0x4d, 0x56, 0x46, 0x09, 0x0d, 0x0a, 0xff, 0x00];
/// EnCase 7+ ("v2") signature ("EVF2\x0d\x0a\x81\x00").
pub const SIGNATURE_EWF2: [u8; 8] = [0x45, 0x56, 0x46, 0x32, 0x0d, 0x0a, 0x81, 0x00];

/// Which physical layout a segment uses: v1 descriptors trail the type
/// field and precede their payload; v2 descriptors trail the payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FormatVersion {
    V1,
    V2,
}

/// The acquisition/container format, selected by the `format` config key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Format {
    Ewf,
    Smart,
    Ftk,
    EnCase1,
    EnCase2,
    EnCase3,
    EnCase4,
    EnCase5,
    EnCase6,
    EnCase7,
    Linen5,
    Linen6,
    Ewfx,
    Lvf,
    Unknown,
}

impl Format {
    pub fn version(self) -> FormatVersion {
        match self {
            Format::EnCase7 => FormatVersion::V2,
            _ => FormatVersion::V1,
        }
    }

    pub fn signature(self) -> [u8; 8] {
        match self {
            Format::Smart => SIGNATURE_SMART,
            Format::EnCase7 => SIGNATURE_EWF2,
            _ => SIGNATURE_EWF,
        }
    }

    pub fn naming_schema(self) -> NamingSchema {
        match self {
            Format::Smart => NamingSchema::S01UpperCase,
            _ => NamingSchema::E01UpperCase,
        }
    }
}

impl Default for Format {
    fn default() -> Self {
        Format::EnCase6
    }
}

/// The `media_type` byte stored in the volume/disk section.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Removable,
    Fixed,
    Optical,
    Memory,
    SingleFiles,
}

impl MediaType {
    pub fn from_byte(b: u8) -> Self {
        match b {
            0x00 => MediaType::Removable,
            0x0e => MediaType::Optical,
            0x10 => MediaType::Memory,
            0x0f => MediaType::SingleFiles,
            _ => MediaType::Fixed,
        }
    }

    pub fn to_byte(self) -> u8 {
        match self {
            MediaType::Removable => 0x00,
            MediaType::Fixed => 0x01,
            MediaType::Optical => 0x0e,
            MediaType::SingleFiles => 0x0f,
            MediaType::Memory => 0x10,
        }
    }
}

/// The `media_flags` bitfield stored alongside `media_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MediaFlags(u8);

impl MediaFlags {
    pub const PHYSICAL: u8 = 0x01;
    pub const FASTBLOC: u8 = 0x02;
    pub const TABLEAU: u8 = 0x04;

    pub fn from_bits(bits: u8) -> Self {
        MediaFlags(bits)
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn contains(self, flag: u8) -> bool {
        self.0 & flag != 0
    }

    pub fn is_physical(self) -> bool {
        self.contains(Self::PHYSICAL)
    }
}

/// Segment extension naming scheme: upper/lower-case `E` for EWF or `S`
/// for SMART, chosen when the image is created and preserved thereafter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamingSchema {
    E01UpperCase,
    E01LowerCase,
    S01UpperCase,
    S01LowerCase,
}

impl NamingSchema {
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "E01" => Some(NamingSchema::E01UpperCase),
            "e01" => Some(NamingSchema::E01LowerCase),
            "S01" => Some(NamingSchema::S01UpperCase),
            "s01" => Some(NamingSchema::S01LowerCase),
            _ => None,
        }
    }

    fn first_char(self) -> u8 {
        match self {
            NamingSchema::E01UpperCase => b'E',
            NamingSchema::E01LowerCase => b'e',
            NamingSchema::S01UpperCase => b'S',
            NamingSchema::S01LowerCase => b's',
        }
    }

    fn base_char(self) -> u8 {
        match self {
            NamingSchema::E01UpperCase | NamingSchema::S01UpperCase => b'A',
            NamingSchema::E01LowerCase | NamingSchema::S01LowerCase => b'a',
        }
    }

    fn last_char(self) -> u8 {
        match self {
            NamingSchema::E01UpperCase | NamingSchema::S01UpperCase => b'Z',
            NamingSchema::E01LowerCase | NamingSchema::S01LowerCase => b'z',
        }
    }

    /// Builds the 3-character extension suffix (after the dot) for
    /// `segment_number` (1-indexed): `.E01`…`.E99`, then `.EAA`…`.EZZ`.
    pub fn extension(self, segment_number: u16) -> crate::error::Result<String> {
        use crate::error::{Error, ErrorKind};

        if segment_number == 0 {
            return Err(Error::new(
                ErrorKind::InvalidArgument,
                "segment numbers are 1-indexed",
            ));
        }
        let mut chars = [0u8; 3];
        if segment_number < 100 {
            chars[0] = self.first_char();
            chars[1] = b'0' + (segment_number / 10) as u8;
            chars[2] = b'0' + (segment_number % 10) as u8;
        } else {
            let base = self.base_char();
            let mut n = (segment_number - 100) as u32;
            chars[2] = base + (n % 26) as u8;
            n /= 26;
            chars[1] = base + (n % 26) as u8;
            n /= 26;
            let first = self.first_char() as u32 + n;
            if first > self.last_char() as u32 {
                return Err(Error::new(
                    ErrorKind::OutOfBounds,
                    format!("segment number {} exceeds naming schema range", segment_number),
                ));
            }
            chars[0] = first as u8;
        }
        Ok(String::from_utf8(chars.to_vec()).expect("ascii"))
    }
}

/// Compression policy selected for new chunks on write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompressionLevel {
    None,
    Fast,
    Best,
}

/// `compression_flags` bit 0: substitute a precomputed sentinel for
/// all-zero chunks instead of compressing them individually.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CompressionFlags {
    pub empty_block: bool,
}

/// Date rendering used when decoding `acquiry_date`/`system_date` header
/// values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateFormat {
    Ctime,
    Iso8601,
    DayMonth,
    MonthDay,
}

impl Default for DateFormat {
    fn default() -> Self {
        DateFormat::Iso8601
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extension_two_digit() {
        let s = NamingSchema::E01UpperCase;
        assert_eq!(s.extension(1).unwrap(), "E01");
        assert_eq!(s.extension(99).unwrap(), "E99");
    }

    #[test]
    fn extension_base26_rollover() {
        let s = NamingSchema::E01UpperCase;
        assert_eq!(s.extension(100).unwrap(), "EAA");
        assert_eq!(s.extension(101).unwrap(), "EAB");
        assert_eq!(s.extension(125).unwrap(), "EAZ");
        assert_eq!(s.extension(126).unwrap(), "EBA");
    }

    #[test]
    fn extension_lower_case() {
        let s = NamingSchema::S01LowerCase;
        assert_eq!(s.extension(1).unwrap(), "s01");
        assert_eq!(s.extension(100).unwrap(), "saa");
    }

    #[test]
    fn extension_zero_rejected() {
        assert!(NamingSchema::E01UpperCase.extension(0).is_err());
    }
}
