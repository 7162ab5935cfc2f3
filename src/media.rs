//! `volume`/`disk` section (media geometry).

use crate::checksum::adler32;
use crate::error::{Error, ErrorKind, Result};
use crate::format::{Format, MediaFlags, MediaType};

/// Minimum payload size accepted for a `volume`/`disk` section, body plus
/// trailing Adler-32 (at least 128 bytes, with an Adler-32 footer).
pub const MIN_PAYLOAD_LEN: usize = 128;
const BODY_LEN: usize = MIN_PAYLOAD_LEN - 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MediaValues {
    pub media_type: MediaType,
    pub media_flags: MediaFlags,
    pub bytes_per_sector: u32,
    pub number_of_sectors: u64,
    /// Derived as `bytes_per_sector * number_of_sectors` unless the
    /// section stores an explicit override.
    pub media_size: u64,
    pub guid: [u8; 16],
    pub format: Format,
    pub sectors_per_chunk: u32,
    pub error_granularity: u32,
}

impl MediaValues {
    pub fn from_geometry(bytes_per_sector: u32, number_of_sectors: u64, sectors_per_chunk: u32) -> Self {
        MediaValues {
            media_type: MediaType::Fixed,
            media_flags: MediaFlags::from_bits(MediaFlags::PHYSICAL),
            bytes_per_sector,
            number_of_sectors,
            media_size: bytes_per_sector as u64 * number_of_sectors,
            guid: [0u8; 16],
            format: Format::default(),
            sectors_per_chunk,
            error_granularity: 64,
        }
    }
}

/// Byte offsets within the fixed-layout `volume`/`disk` payload, chosen to
/// match the widely documented EnCase6 volume section: reserved media
/// type/flags at the front, geometry fields in the middle, GUID near the
/// end, all ahead of the trailing Adler-32 the section layer already
/// verified.
mod layout {
    pub const MEDIA_TYPE: usize = 0;
    pub const MEDIA_FLAGS: usize = 3;
    pub const SECTORS_PER_CHUNK: usize = 4;
    pub const BYTES_PER_SECTOR: usize = 8;
    pub const NUMBER_OF_SECTORS: usize = 12;
    pub const MEDIA_SIZE: usize = 20;
    pub const ERROR_GRANULARITY: usize = 28;
    pub const GUID: usize = 32;
}

pub fn read_media(payload: &[u8], format: Format) -> Result<MediaValues> {
    if payload.len() < MIN_PAYLOAD_LEN {
        log::error!(
            "volume/disk section payload is {} bytes, need at least {}",
            payload.len(),
            MIN_PAYLOAD_LEN
        );
        return Err(Error::new(
            ErrorKind::CorruptData,
            format!(
                "volume/disk section payload is {} bytes, need at least {}",
                payload.len(),
                MIN_PAYLOAD_LEN
            ),
        ));
    }

    let media_type = MediaType::from_byte(payload[layout::MEDIA_TYPE]);
    let media_flags = MediaFlags::from_bits(payload[layout::MEDIA_FLAGS]);
    let sectors_per_chunk = u32::from_le_bytes(
        payload[layout::SECTORS_PER_CHUNK..layout::SECTORS_PER_CHUNK + 4]
            .try_into()
            .unwrap(),
    );
    let bytes_per_sector = u32::from_le_bytes(
        payload[layout::BYTES_PER_SECTOR..layout::BYTES_PER_SECTOR + 4]
            .try_into()
            .unwrap(),
    );
    let number_of_sectors = u64::from_le_bytes(
        payload[layout::NUMBER_OF_SECTORS..layout::NUMBER_OF_SECTORS + 8]
            .try_into()
            .unwrap(),
    );
    let stored_media_size = u64::from_le_bytes(
        payload[layout::MEDIA_SIZE..layout::MEDIA_SIZE + 8]
            .try_into()
            .unwrap(),
    );
    let error_granularity = u32::from_le_bytes(
        payload[layout::ERROR_GRANULARITY..layout::ERROR_GRANULARITY + 4]
            .try_into()
            .unwrap(),
    );
    let mut guid = [0u8; 16];
    guid.copy_from_slice(&payload[layout::GUID..layout::GUID + 16]);

    let stored_checksum = u32::from_le_bytes(payload[BODY_LEN..BODY_LEN + 4].try_into().unwrap());
    let computed_checksum = adler32(&payload[..BODY_LEN]);
    if computed_checksum != stored_checksum {
        log::error!("volume/disk section failed its Adler-32 check");
        return Err(Error::new(
            ErrorKind::ChecksumMismatch,
            "volume/disk section failed its Adler-32 check",
        ));
    }

    let media_size = if stored_media_size != 0 {
        stored_media_size
    } else {
        bytes_per_sector as u64 * number_of_sectors
    };

    Ok(MediaValues {
        media_type,
        media_flags,
        bytes_per_sector,
        number_of_sectors,
        media_size,
        guid,
        format,
        sectors_per_chunk,
        error_granularity,
    })
}

pub fn write_media(values: &MediaValues) -> Vec<u8> {
    let mut payload = vec![0u8; MIN_PAYLOAD_LEN];
    payload[layout::MEDIA_TYPE] = values.media_type.to_byte();
    payload[layout::MEDIA_FLAGS] = values.media_flags.bits();
    payload[layout::SECTORS_PER_CHUNK..layout::SECTORS_PER_CHUNK + 4]
        .copy_from_slice(&values.sectors_per_chunk.to_le_bytes());
    payload[layout::BYTES_PER_SECTOR..layout::BYTES_PER_SECTOR + 4]
        .copy_from_slice(&values.bytes_per_sector.to_le_bytes());
    payload[layout::NUMBER_OF_SECTORS..layout::NUMBER_OF_SECTORS + 8]
        .copy_from_slice(&values.number_of_sectors.to_le_bytes());
    payload[layout::MEDIA_SIZE..layout::MEDIA_SIZE + 8].copy_from_slice(&values.media_size.to_le_bytes());
    payload[layout::ERROR_GRANULARITY..layout::ERROR_GRANULARITY + 4]
        .copy_from_slice(&values.error_granularity.to_le_bytes());
    payload[layout::GUID..layout::GUID + 16].copy_from_slice(&values.guid);
    let checksum = adler32(&payload[..BODY_LEN]);
    payload[BODY_LEN..BODY_LEN + 4].copy_from_slice(&checksum.to_le_bytes());
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn media_round_trips() {
        let values = MediaValues::from_geometry(512, 2048, 64);
        let payload = write_media(&values);
        let decoded = read_media(&payload, Format::EnCase6).unwrap();
        assert_eq!(decoded.bytes_per_sector, 512);
        assert_eq!(decoded.number_of_sectors, 2048);
        assert_eq!(decoded.media_size, 512 * 2048);
        assert_eq!(decoded.sectors_per_chunk, 64);
    }

    #[test]
    fn rejects_short_payload() {
        let payload = vec![0u8; 16];
        assert!(read_media(&payload, Format::EnCase6).is_err());
    }

    #[test]
    fn rejects_checksum_mismatch() {
        let values = MediaValues::from_geometry(512, 2048, 64);
        let mut payload = write_media(&values);
        payload[0] ^= 0xff;
        assert_eq!(
            read_media(&payload, Format::EnCase6).unwrap_err().kind(),
            crate::error::ErrorKind::ChecksumMismatch
        );
    }
}
