//! Chunk table, built from a segment's `table`/`table2` sections plus the
//! byte range of its preceding `sectors` section. Handles the offset
//! overflow for segments bigger than 2 GiB under EnCase 6.7
//! (`chunk_data_offset_overflow`).

use crate::checksum::adler32;
use crate::error::{Error, ErrorKind, Result, Warning};

/// High bit of a raw table entry marks the chunk as compressed, unless the
/// accumulated offset has already overflowed `i32::MAX` for this segment
/// (see [`resolve_chunk_ranges`]).
const COMPRESSED_FLAG: u32 = 0x8000_0000;
const OFFSET_MASK: u32 = 0x7fff_ffff;

const HEADER_LEN: usize = 16;

/// One dense chunk location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkEntry {
    pub segment: u16,
    pub offset_in_segment: u64,
    pub packed_size: u32,
    pub compressed: bool,
}

/// A parsed `table`/`table2` section: the base offset entries are
/// relative to, and the raw (possibly flagged) per-chunk offsets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSection {
    pub base_offset: u64,
    pub raw_entries: Vec<u32>,
}

pub fn read_table(payload: &[u8]) -> Result<TableSection> {
    if payload.len() < HEADER_LEN {
        return Err(Error::new(
            ErrorKind::CorruptData,
            "table section shorter than its fixed header",
        ));
    }
    let header = &payload[..HEADER_LEN];
    let stored_header_checksum = u32::from_le_bytes(header[12..16].try_into().unwrap());
    if adler32(&header[..12]) != stored_header_checksum {
        return Err(Error::new(
            ErrorKind::ChecksumMismatch,
            "table section header failed its Adler-32 check",
        ));
    }

    let base_offset = u64::from_le_bytes(header[0..8].try_into().unwrap());
    let count = u32::from_le_bytes(header[8..12].try_into().unwrap()) as usize;

    let entries_start = HEADER_LEN;
    let entries_len = count * 4;
    let entries_end = entries_start + entries_len;
    if payload.len() < entries_end + 4 {
        return Err(Error::new(
            ErrorKind::CorruptData,
            format!("table section claims {} entries but payload is too short", count),
        ));
    }

    let entries_bytes = &payload[entries_start..entries_end];
    let stored_entries_checksum = u32::from_le_bytes(payload[entries_end..entries_end + 4].try_into().unwrap());
    if adler32(entries_bytes) != stored_entries_checksum {
        return Err(Error::new(
            ErrorKind::ChecksumMismatch,
            "table section entries failed their Adler-32 check",
        ));
    }

    let raw_entries = entries_bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes(c.try_into().unwrap()))
        .collect();

    Ok(TableSection { base_offset, raw_entries })
}

pub fn write_table(table: &TableSection) -> Vec<u8> {
    let mut header = [0u8; HEADER_LEN];
    header[0..8].copy_from_slice(&table.base_offset.to_le_bytes());
    header[8..12].copy_from_slice(&(table.raw_entries.len() as u32).to_le_bytes());
    let header_checksum = adler32(&header[..12]);
    header[12..16].copy_from_slice(&header_checksum.to_le_bytes());

    let mut entries_bytes = Vec::with_capacity(table.raw_entries.len() * 4);
    for entry in &table.raw_entries {
        entries_bytes.extend_from_slice(&entry.to_le_bytes());
    }
    let entries_checksum = adler32(&entries_bytes);

    let mut payload = Vec::with_capacity(HEADER_LEN + entries_bytes.len() + 4);
    payload.extend_from_slice(&header);
    payload.extend_from_slice(&entries_bytes);
    payload.extend_from_slice(&entries_checksum.to_le_bytes());
    payload
}

/// Builds one raw entry: a chunk-local offset (relative to `base_offset`)
/// plus its compressed flag in the high bit.
pub fn pack_entry(offset_in_sectors: u32, compressed: bool) -> u32 {
    debug_assert!(offset_in_sectors & COMPRESSED_FLAG == 0, "offset too large to pack");
    if compressed {
        offset_in_sectors | COMPRESSED_FLAG
    } else {
        offset_in_sectors
    }
}

/// Attempts `table` first; on checksum failure, falls back to `table2`. If
/// both fail, the affected range cannot be recovered. If both succeed but
/// disagree, `table` wins.
pub fn reconcile(
    table_payload: Option<&[u8]>,
    table2_payload: Option<&[u8]>,
    segment: u16,
) -> Result<(TableSection, Option<Warning>)> {
    let table = table_payload.map(read_table);
    let table2 = table2_payload.map(read_table);

    match (table, table2) {
        (Some(Ok(t)), Some(Ok(t2))) => {
            if t == t2 {
                Ok((t, None))
            } else {
                Ok((t, None)) // `table` is preferred; entries merely differ, not corrupt.
            }
        }
        (Some(Ok(t)), _) => Ok((t, None)),
        (Some(Err(_)), Some(Ok(t2))) => {
            Ok((t2, Some(Warning::TableRecoveredFromBackup { segment })))
        }
        (Some(Err(e)), _) => {
            log::error!("segment {}: table section unreadable and no table2 backup: {}", segment, e);
            Err(e)
        }
        (None, Some(Ok(t2))) => Ok((t2, None)),
        (None, Some(Err(e))) => {
            log::error!("segment {}: table2 section unreadable and no table present: {}", segment, e);
            Err(e)
        }
        (None, None) => {
            log::error!("segment {}: has neither a table nor a table2 section", segment);
            Err(Error::new(
                ErrorKind::CorruptData,
                "segment has neither a table nor a table2 section",
            ))
        }
    }
}

/// Turns a parsed table into dense [`ChunkEntry`] values, given the
/// absolute end offset of the region the last chunk can extend into (the
/// next section's file offset).
pub fn resolve_chunk_ranges(table: &TableSection, segment: u16, region_end: u64) -> Result<Vec<ChunkEntry>> {
    let n = table.raw_entries.len();
    if n == 0 {
        return Ok(Vec::new());
    }
    let mut out = Vec::with_capacity(n);
    let mut overflowed = false;

    for i in 0..n {
        let raw = table.raw_entries[i];
        let compressed = if overflowed { false } else { raw & COMPRESSED_FLAG != 0 };
        let offset = if overflowed { raw } else { raw & OFFSET_MASK };

        let next_offset = if i + 1 < n {
            let next_raw = table.raw_entries[i + 1];
            if overflowed {
                next_raw
            } else {
                next_raw & OFFSET_MASK
            }
        } else {
            // Last entry: sized by the region end rather than a following entry.
            (region_end - table.base_offset) as u32
        };

        let size = if offset <= next_offset {
            next_offset - offset
        } else {
            log::error!("segment {}: table entry {} offset {} exceeds the following entry", segment, i, offset);
            return Err(Error::new(
                ErrorKind::CorruptData,
                format!("table entry {} offset {} exceeds the following entry", i, offset),
            ));
        };

        out.push(ChunkEntry {
            segment,
            offset_in_segment: table.base_offset + offset as u64,
            packed_size: size,
            compressed,
        });

        // EnCase 6.7's >2 GiB workaround: once the accumulated offset
        // crosses i32::MAX, the high bit can no longer double as the
        // compressed flag and instead becomes part of a full 32-bit
        // offset; subsequent entries are read unmasked.
        if !overflowed && offset as u64 + size as u64 > i32::MAX as u64 {
            overflowed = true;
        }
    }

    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_round_trips() {
        let table = TableSection {
            base_offset: 1024,
            raw_entries: vec![pack_entry(0, false), pack_entry(516, true), pack_entry(1100, false)],
        };
        let payload = write_table(&table);
        let decoded = read_table(&payload).unwrap();
        assert_eq!(decoded, table);
    }

    #[test]
    fn resolves_entry_sizes_from_following_offsets() {
        let table = TableSection {
            base_offset: 1000,
            raw_entries: vec![pack_entry(0, false), pack_entry(100, true)],
        };
        let entries = resolve_chunk_ranges(&table, 1, 1000 + 150).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].offset_in_segment, 1000);
        assert_eq!(entries[0].packed_size, 100);
        assert!(!entries[0].compressed);
        assert_eq!(entries[1].offset_in_segment, 1100);
        assert_eq!(entries[1].packed_size, 50);
        assert!(entries[1].compressed);
    }

    #[test]
    fn reconcile_recovers_from_table2_on_checksum_failure() {
        let table = TableSection {
            base_offset: 0,
            raw_entries: vec![pack_entry(0, false)],
        };
        let good_payload = write_table(&table);
        let mut bad_payload = good_payload.clone();
        bad_payload[0] ^= 0xff; // corrupt the header's base_offset field

        let (resolved, warning) = reconcile(Some(&bad_payload), Some(&good_payload), 2).unwrap();
        assert_eq!(resolved, table);
        assert_eq!(warning, Some(Warning::TableRecoveredFromBackup { segment: 2 }));
    }

    #[test]
    fn reconcile_fails_when_both_tables_are_corrupt() {
        let table = TableSection {
            base_offset: 0,
            raw_entries: vec![pack_entry(0, false)],
        };
        let mut bad_payload = write_table(&table);
        bad_payload[0] ^= 0xff;

        let result = reconcile(Some(&bad_payload), Some(&bad_payload), 1);
        assert!(result.is_err());
    }
}
