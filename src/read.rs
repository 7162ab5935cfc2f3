//! Read path and chunk cache: resolves a `(byte-offset, length)` request
//! into chunk fetches, decompresses, verifies per-chunk checksums, and
//! keeps a single decompressed chunk warm for locality.

use std::collections::HashMap;
use std::io::Read as _;

use flate2::read::ZlibDecoder;

use crate::checksum::adler32;
use crate::error::{Error, ErrorKind, Result, Warning};
use crate::error2::AcquisitionErrors;
use crate::pool::{FilePool, PoolEntryId};
use crate::table::ChunkEntry;

/// A single decompressed chunk, kept around for sequential-access
/// locality. Eviction is silent: installing a new chunk simply replaces
/// the old one; eviction is silent.
#[derive(Debug, Default)]
pub struct ChunkCache {
    index: Option<usize>,
    data: Vec<u8>,
}

impl ChunkCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, chunk_index: usize) -> Option<&[u8]> {
        if self.index == Some(chunk_index) {
            Some(&self.data)
        } else {
            None
        }
    }

    pub fn install(&mut self, chunk_index: usize, data: Vec<u8>) {
        self.index = Some(chunk_index);
        self.data = data;
    }

    pub fn invalidate(&mut self) {
        self.index = None;
        self.data.clear();
    }
}

/// Everything the read path needs beyond the chunk table itself: how to
/// reach each segment's open file, the geometry, and the wipe policy.
pub struct ReadEngine {
    pub chunk_bytes: u64,
    pub wipe_on_error: bool,
    pub wipe_pattern: u8,
    pub cache: ChunkCache,
}

impl ReadEngine {
    pub fn new(chunk_bytes: u64, wipe_on_error: bool, wipe_pattern: u8) -> Self {
        ReadEngine {
            chunk_bytes,
            wipe_on_error,
            wipe_pattern,
            cache: ChunkCache::new(),
        }
    }

    /// Reads up to `buf.len()` bytes starting at media offset `offset`.
    /// Returns the number of bytes actually copied (short at media end)
    /// and any recoverable warnings raised along the way.
    pub fn read(
        &mut self,
        pool: &mut FilePool,
        segment_pool_ids: &HashMap<u16, PoolEntryId>,
        chunk_entries: &[ChunkEntry],
        media_size: u64,
        offset: u64,
        buf: &mut [u8],
        errors: &mut AcquisitionErrors,
        error_granularity_sectors: u32,
        bytes_per_sector: u32,
    ) -> Result<(usize, Vec<Warning>)> {
        let mut warnings = Vec::new();
        let mut written = 0usize;
        let mut cursor = offset;

        while written < buf.len() && cursor < media_size {
            let chunk_index = (cursor / self.chunk_bytes) as usize;
            let in_chunk_offset = (cursor % self.chunk_bytes) as usize;

            let chunk_data = if let Some(cached) = self.cache.get(chunk_index) {
                cached
            } else {
                let entry = chunk_entries.get(chunk_index).ok_or_else(|| {
                    Error::new(ErrorKind::OutOfBounds, format!("no chunk entry at index {}", chunk_index))
                })?;
                let pool_id = *segment_pool_ids.get(&entry.segment).ok_or_else(|| Error::not_found(entry.segment))?;

                match self.fetch_chunk(pool, pool_id, entry) {
                    Ok(data) => {
                        self.cache.install(chunk_index, data);
                    }
                    Err(e) if e.kind() == ErrorKind::ChecksumMismatch && self.wipe_on_error => {
                        let wiped = vec![self.wipe_pattern; self.chunk_bytes as usize];
                        self.cache.install(chunk_index, wiped);
                        warnings.push(Warning::ChunkWiped { chunk_index });
                        record_error_range(errors, chunk_index, error_granularity_sectors, bytes_per_sector, self.chunk_bytes);
                        log::warn!("chunk {} failed checksum, wiped per configuration", chunk_index);
                    }
                    Err(e) => {
                        log::error!("chunk {} unreadable: {}", chunk_index, e);
                        return Err(e);
                    }
                }
                self.cache.get(chunk_index).expect("just installed")
            };

            let available_in_chunk = chunk_data.len().saturating_sub(in_chunk_offset);
            let remaining_in_request = buf.len() - written;
            let remaining_in_media = (media_size - cursor) as usize;
            let n = available_in_chunk.min(remaining_in_request).min(remaining_in_media);
            if n == 0 {
                break;
            }
            buf[written..written + n].copy_from_slice(&chunk_data[in_chunk_offset..in_chunk_offset + n]);
            written += n;
            cursor += n as u64;
        }

        Ok((written, warnings))
    }

    fn fetch_chunk(&self, pool: &mut FilePool, pool_id: PoolEntryId, entry: &ChunkEntry) -> Result<Vec<u8>> {
        let mut packed = vec![0u8; entry.packed_size as usize];
        pool.read_exact_at(pool_id, entry.offset_in_segment, &mut packed)?;

        if entry.packed_size < 4 {
            log::error!("chunk at segment {} offset {} too short to carry a checksum", entry.segment, entry.offset_in_segment);
            return Err(Error::new(ErrorKind::CorruptData, "chunk payload too short to carry a checksum"));
        }
        let (body, checksum_bytes) = packed.split_at(packed.len() - 4);
        let stored_checksum = u32::from_le_bytes(checksum_bytes.try_into().unwrap());
        let computed_checksum = adler32(body);
        if computed_checksum != stored_checksum {
            log::error!("chunk at segment {} offset {} failed its Adler-32 check", entry.segment, entry.offset_in_segment);
            return Err(Error::new(
                ErrorKind::ChecksumMismatch,
                format!("chunk at segment {} offset {} failed its Adler-32 check", entry.segment, entry.offset_in_segment),
            ));
        }

        if entry.compressed {
            let mut decoder = ZlibDecoder::new(body);
            let mut decompressed = Vec::with_capacity(self.chunk_bytes as usize);
            decoder
                .read_to_end(&mut decompressed)
                .map_err(|e| Error::with_source(ErrorKind::CorruptData, "chunk did not inflate", e))?;
            Ok(decompressed)
        } else {
            Ok(body.to_vec())
        }
    }
}

fn record_error_range(
    errors: &mut AcquisitionErrors,
    chunk_index: usize,
    error_granularity_sectors: u32,
    bytes_per_sector: u32,
    chunk_bytes: u64,
) {
    let sectors_per_chunk = (chunk_bytes / bytes_per_sector.max(1) as u64) as u32;
    let start_sector = chunk_index as u32 * sectors_per_chunk;
    let granularity = error_granularity_sectors.max(sectors_per_chunk);
    errors.push(start_sector, granularity);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::pack_entry;
    use std::io::Write as _;

    fn write_chunk(data: &[u8], compressed: bool) -> Vec<u8> {
        let body = if compressed {
            let mut encoder = flate2::write::ZlibEncoder::new(Vec::new(), flate2::Compression::default());
            encoder.write_all(data).unwrap();
            encoder.finish().unwrap()
        } else {
            data.to_vec()
        };
        let checksum = adler32(&body);
        let mut packed = body;
        packed.extend_from_slice(&checksum.to_le_bytes());
        packed
    }

    #[test]
    fn reads_single_uncompressed_chunk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg1");
        let packed = write_chunk(&[7u8; 32], false);
        std::fs::write(&path, &packed).unwrap();

        let mut pool = FilePool::new(4);
        let pool_id = pool.open(&path, false).unwrap();
        let mut ids = HashMap::new();
        ids.insert(1u16, pool_id);

        let entries = vec![crate::table::ChunkEntry {
            segment: 1,
            offset_in_segment: 0,
            packed_size: packed.len() as u32,
            compressed: false,
        }];
        let _ = pack_entry; // silence unused import in case of refactor

        let mut engine = ReadEngine::new(32, false, 0);
        let mut buf = [0u8; 32];
        let mut errors = AcquisitionErrors::new();
        let (n, warnings) = engine
            .read(&mut pool, &ids, &entries, 32, 0, &mut buf, &mut errors, 64, 512)
            .unwrap();
        assert_eq!(n, 32);
        assert!(warnings.is_empty());
        assert_eq!(buf, [7u8; 32]);
    }

    #[test]
    fn wipes_on_checksum_mismatch_when_configured() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg1");
        let mut packed = write_chunk(&[9u8; 16], false);
        let last = packed.len() - 1;
        packed[last] ^= 0xff;
        std::fs::write(&path, &packed).unwrap();

        let mut pool = FilePool::new(4);
        let pool_id = pool.open(&path, false).unwrap();
        let mut ids = HashMap::new();
        ids.insert(1u16, pool_id);

        let entries = vec![crate::table::ChunkEntry {
            segment: 1,
            offset_in_segment: 0,
            packed_size: packed.len() as u32,
            compressed: false,
        }];

        let mut engine = ReadEngine::new(16, true, 0xAA);
        let mut buf = [0u8; 16];
        let mut errors = AcquisitionErrors::new();
        let (n, warnings) = engine
            .read(&mut pool, &ids, &entries, 16, 0, &mut buf, &mut errors, 64, 512)
            .unwrap();
        assert_eq!(n, 16);
        assert_eq!(warnings.len(), 1);
        assert_eq!(buf, [0xAAu8; 16]);
        assert!(!errors.is_empty());
    }

    #[test]
    fn fails_without_wipe_on_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg1");
        let mut packed = write_chunk(&[9u8; 16], false);
        let last = packed.len() - 1;
        packed[last] ^= 0xff;
        std::fs::write(&path, &packed).unwrap();

        let mut pool = FilePool::new(4);
        let pool_id = pool.open(&path, false).unwrap();
        let mut ids = HashMap::new();
        ids.insert(1u16, pool_id);

        let entries = vec![crate::table::ChunkEntry {
            segment: 1,
            offset_in_segment: 0,
            packed_size: packed.len() as u32,
            compressed: false,
        }];

        let mut engine = ReadEngine::new(16, false, 0);
        let mut buf = [0u8; 16];
        let mut errors = AcquisitionErrors::new();
        let result = engine.read(&mut pool, &ids, &entries, 16, 0, &mut buf, &mut errors, 64, 512);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ChecksumMismatch);
    }
}
