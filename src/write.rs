//! Write path & segmentation planner: buffers incoming chunks, compresses
//! per policy, appends to the current segment's `sectors` accumulator,
//! and rolls segments over at the configured size ceiling.

use std::collections::HashMap;
use std::io::Write as _;
use std::path::PathBuf;

use flate2::write::ZlibEncoder;
use flate2::Compression;

use crate::checksum::adler32;
use crate::digest::{self, HashValues};
use crate::error::{Error, ErrorKind, Result};
use crate::error2::{self, AcquisitionErrors};
use crate::format::{CompressionFlags, CompressionLevel, FormatVersion, NamingSchema};
use crate::header::{self, HeaderValues};
use crate::ltree::{self, LogicalTree};
use crate::media::{self, MediaValues};
use crate::pool::{FilePool, PoolEntryId};
use crate::section::{SectionKind, SectionLayer};
use crate::session::{self, Sessions};
use crate::table::{self, ChunkEntry};

/// Table blocks are split into a fresh `table`/`table2` pair once they
/// reach this many entries, even mid-segment.
pub const MAX_TABLE_ENTRIES: usize = 65_534;

struct SegmentState {
    pool_id: PoolEntryId,
    path: PathBuf,
    /// Next free byte offset within this segment file.
    cursor: u64,
    /// Absolute offset where the current `sectors` accumulator began.
    sectors_start: u64,
    sectors_buf: Vec<u8>,
    table_entries: Vec<u32>,
    /// v2 only: absolute descriptor offset of the last section written in
    /// this segment, threaded into the next call as its `previous_offset`.
    previous_descriptor_offset: u64,
}

/// Drives the write side of one image: accepts chunk-sized buffers in
/// order and turns them into a sequence of segment files.
pub struct SegmentPlanner {
    version: FormatVersion,
    layer: SectionLayer,
    naming: NamingSchema,
    seed_path: PathBuf,
    segment_size_ceiling: u64,
    chunk_bytes: u64,
    compression_level: CompressionLevel,
    compression_flags: CompressionFlags,
    header_codepage: &'static encoding_rs::Encoding,

    segment_number: u16,
    current: Option<SegmentState>,
    segment_pool_ids: HashMap<u16, PoolEntryId>,
    chunk_entries: Vec<ChunkEntry>,

    header: HeaderValues,
    media: MediaValues,
    empty_block_sentinel: Option<Vec<u8>>,

    digest_state: Vec<u8>,
    hash: HashValues,
    errors: AcquisitionErrors,
    sessions: Sessions,
    ltree: Option<LogicalTree>,
}

/// Everything the caller needs after the last section has been emitted.
pub struct FinishedImage {
    pub segment_pool_ids: HashMap<u16, PoolEntryId>,
    pub chunk_entries: Vec<ChunkEntry>,
    pub hash: HashValues,
    pub digest: HashValues,
}

impl SegmentPlanner {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        version: FormatVersion,
        naming: NamingSchema,
        seed_path: impl Into<PathBuf>,
        segment_size_ceiling: u64,
        chunk_bytes: u64,
        compression_level: CompressionLevel,
        compression_flags: CompressionFlags,
        header_codepage: &'static encoding_rs::Encoding,
        header: HeaderValues,
        media: MediaValues,
    ) -> Self {
        SegmentPlanner {
            version,
            layer: SectionLayer::new(version),
            naming,
            seed_path: seed_path.into(),
            segment_size_ceiling,
            chunk_bytes,
            compression_level,
            compression_flags,
            header_codepage,
            segment_number: 0,
            current: None,
            segment_pool_ids: HashMap::new(),
            chunk_entries: Vec::new(),
            header,
            media,
            empty_block_sentinel: None,
            digest_state: Vec::new(),
            hash: HashValues::new(),
            errors: AcquisitionErrors::new(),
            sessions: Sessions::new(),
            ltree: None,
        }
    }

    pub fn set_sessions(&mut self, sessions: Sessions) {
        self.sessions = sessions;
    }

    pub fn set_ltree(&mut self, tree: LogicalTree) {
        self.ltree = Some(tree);
    }

    fn segment_path(&self, segment_number: u16) -> Result<PathBuf> {
        let ext = self.naming.extension(segment_number)?;
        let mut path = self.seed_path.clone();
        path.set_extension(ext);
        Ok(path)
    }

    fn signature(&self) -> [u8; 8] {
        match self.naming {
            NamingSchema::S01UpperCase | NamingSchema::S01LowerCase => crate::format::SIGNATURE_SMART,
            _ => match self.version {
                FormatVersion::V2 => crate::format::SIGNATURE_EWF2,
                FormatVersion::V1 => crate::format::SIGNATURE_EWF,
            },
        }
    }

    fn open_new_segment(&mut self, pool: &mut FilePool) -> Result<()> {
        self.segment_number += 1;
        let path = self.segment_path(self.segment_number)?;
        let pool_id = pool.open(&path, true)?;
        self.segment_pool_ids.insert(self.segment_number, pool_id);
        log::info!("opened segment {} at {:?}", self.segment_number, path);

        let mut preamble = Vec::new();
        preamble.extend_from_slice(&self.signature());
        preamble.push(0x01);
        preamble.extend_from_slice(&self.segment_number.to_le_bytes());
        preamble.push(0x00);
        pool.write_at(pool_id, 0, &preamble)?;
        let mut cursor = preamble.len() as u64;
        let mut previous = 0u64;

        if self.version == FormatVersion::V2 && self.segment_number > 1 {
            let device_information_payload = header::write_header2(&self.header);
            let (written, next) = self.layer.write_section(
                pool,
                pool_id,
                cursor,
                &SectionKind::DeviceInformation,
                &device_information_payload,
                false,
                previous,
            )?;
            cursor = next;
            previous = written.file_offset;
        } else {
            let header2_payload = header::write_header2(&self.header);
            let (written, next) =
                self.layer
                    .write_section(pool, pool_id, cursor, &SectionKind::Header2, &header2_payload, false, previous)?;
            cursor = next;
            previous = written.file_offset;

            let header_payload = header::write_header(&self.header, self.header_codepage);
            let (written, next) =
                self.layer
                    .write_section(pool, pool_id, cursor, &SectionKind::Header, &header_payload, false, previous)?;
            cursor = next;
            previous = written.file_offset;
        }

        if self.segment_number == 1 {
            let media_payload = media::write_media(&self.media);
            let kind = if self.media.format.version() == FormatVersion::V2 {
                SectionKind::Disk
            } else {
                SectionKind::Volume
            };
            let (written, next) =
                self.layer
                    .write_section(pool, pool_id, cursor, &kind, &media_payload, false, previous)?;
            cursor = next;
            previous = written.file_offset;
        }

        self.current = Some(SegmentState {
            pool_id,
            path,
            cursor,
            sectors_start: cursor,
            sectors_buf: Vec::new(),
            table_entries: Vec::new(),
            previous_descriptor_offset: previous,
        });
        Ok(())
    }

    fn empty_block(&mut self) -> &[u8] {
        if self.empty_block_sentinel.is_none() {
            let zeros = vec![0u8; self.chunk_bytes as usize];
            let mut encoder = ZlibEncoder::new(Vec::new(), Compression::best());
            encoder.write_all(&zeros).expect("writing to a Vec cannot fail");
            let mut packed = encoder.finish().expect("writing to a Vec cannot fail");
            let checksum = adler32(&packed);
            packed.extend_from_slice(&checksum.to_le_bytes());
            self.empty_block_sentinel = Some(packed);
        }
        self.empty_block_sentinel.as_deref().unwrap()
    }

    /// Appends one logical chunk (up to `chunk_bytes` long; shorter only
    /// for the final chunk of the media stream).
    pub fn write_chunk(&mut self, pool: &mut FilePool, chunk: &[u8]) -> Result<()> {
        if self.current.is_none() {
            self.open_new_segment(pool)?;
        }

        let packed = if self.compression_flags.empty_block && chunk.iter().all(|&b| b == 0) {
            self.empty_block().to_vec()
        } else if self.compression_level != CompressionLevel::None {
            let level = match self.compression_level {
                CompressionLevel::Fast => Compression::fast(),
                CompressionLevel::Best => Compression::best(),
                CompressionLevel::None => unreachable!(),
            };
            let mut encoder = ZlibEncoder::new(Vec::new(), level);
            encoder.write_all(chunk).expect("writing to a Vec cannot fail");
            let mut packed = encoder.finish().expect("writing to a Vec cannot fail");
            let checksum = adler32(&packed);
            packed.extend_from_slice(&checksum.to_le_bytes());
            packed
        } else {
            let mut packed = chunk.to_vec();
            let checksum = adler32(chunk);
            packed.extend_from_slice(&checksum.to_le_bytes());
            packed
        };
        let compressed = self.compression_level != CompressionLevel::None
            || (self.compression_flags.empty_block && chunk.iter().all(|&b| b == 0));

        self.digest_state.extend_from_slice(chunk);

        let state = self.current.as_mut().expect("segment opened above");
        let offset_in_sectors = state.sectors_buf.len() as u32;
        let chunk_entry = ChunkEntry {
            segment: self.segment_number,
            offset_in_segment: state.sectors_start + offset_in_sectors as u64,
            packed_size: packed.len() as u32,
            compressed,
        };
        state.table_entries.push(table::pack_entry(offset_in_sectors, compressed));
        state.sectors_buf.extend_from_slice(&packed);
        self.chunk_entries.push(chunk_entry);

        let projected_size = state.cursor + state.sectors_buf.len() as u64
            + self.layer.descriptor_size() * 2
            + estimate_table_payload_len(state.table_entries.len());

        if state.table_entries.len() >= MAX_TABLE_ENTRIES {
            self.flush_table_group(pool)?;
        } else if projected_size > self.segment_size_ceiling && !state.table_entries.is_empty() {
            self.flush_table_group(pool)?;
            self.close_segment(pool, true)?;
        }
        Ok(())
    }

    /// Emits `sectors`, `table`, `table2` for whatever has accumulated so
    /// far, without closing the segment file itself.
    fn flush_table_group(&mut self, pool: &mut FilePool) -> Result<()> {
        let state = self.current.as_mut().expect("segment opened");
        if state.table_entries.is_empty() {
            return Ok(());
        }
        let sectors_start = state.sectors_start;
        let mut previous = state.previous_descriptor_offset;
        let (written, next) = self.layer.write_section(
            pool,
            state.pool_id,
            state.cursor,
            &SectionKind::Sectors,
            &state.sectors_buf,
            false,
            previous,
        )?;
        previous = written.file_offset;
        let table = crate::table::TableSection {
            base_offset: sectors_start,
            raw_entries: std::mem::take(&mut state.table_entries),
        };
        let table_payload = table::write_table(&table);
        let (written, next) =
            self.layer
                .write_section(pool, state.pool_id, next, &SectionKind::Table, &table_payload, false, previous)?;
        previous = written.file_offset;
        let (written, next) =
            self.layer
                .write_section(pool, state.pool_id, next, &SectionKind::Table2, &table_payload, false, previous)?;
        previous = written.file_offset;

        state.cursor = next;
        state.sectors_start = next;
        state.sectors_buf.clear();
        state.previous_descriptor_offset = previous;
        Ok(())
    }

    /// Closes out the current segment with a `next` section (v1) or the
    /// next descriptor in the chain (v2), and, if `reopen`, starts the
    /// following segment.
    fn close_segment(&mut self, pool: &mut FilePool, reopen: bool) -> Result<()> {
        self.flush_table_group(pool)?;
        let state = self.current.take().expect("segment opened");
        self.layer.write_section(
            pool,
            state.pool_id,
            state.cursor,
            &SectionKind::Next,
            &[],
            true,
            state.previous_descriptor_offset,
        )?;
        log::debug!("closed segment {:?} at {} bytes", state.path, state.cursor);
        if reopen {
            self.open_new_segment(pool)?;
        }
        Ok(())
    }

    /// Finalizes the image: emits `digest`, `hash`, `error2`/`session`/
    /// `ltree` if present, then `done`.
    pub fn finish(mut self, pool: &mut FilePool) -> Result<FinishedImage> {
        if self.current.is_none() {
            self.open_new_segment(pool)?;
        }
        self.flush_table_group(pool)?;

        let digest_md5 = digest::md5(&self.digest_state);
        let digest_sha1 = digest::sha1(&self.digest_state);
        let mut digest_values = HashValues::new();
        digest_values.set_md5(digest_md5);
        digest_values.set_sha1(digest_sha1);
        self.hash.set_md5(digest_md5);

        let state = self.current.as_mut().expect("segment opened");
        let mut cursor = state.cursor;
        let mut previous = state.previous_descriptor_offset;

        let digest_payload = digest::write_digest(&digest_values);
        let (written, next) =
            self.layer
                .write_section(pool, state.pool_id, cursor, &SectionKind::Digest, &digest_payload, false, previous)?;
        cursor = next;
        previous = written.file_offset;

        let hash_payload = digest::write_hash(&self.hash);
        let (written, next) =
            self.layer
                .write_section(pool, state.pool_id, cursor, &SectionKind::Hash, &hash_payload, false, previous)?;
        cursor = next;
        previous = written.file_offset;

        if !self.errors.is_empty() {
            let payload = error2::write_error2(&self.errors);
            let (written, next) =
                self.layer
                    .write_section(pool, state.pool_id, cursor, &SectionKind::Error2, &payload, false, previous)?;
            cursor = next;
            previous = written.file_offset;
        }
        if !self.sessions.is_empty() {
            let payload = session::write_session(&self.sessions);
            let (written, next) =
                self.layer
                    .write_section(pool, state.pool_id, cursor, &SectionKind::Session, &payload, false, previous)?;
            cursor = next;
            previous = written.file_offset;
        }
        if let Some(tree) = &self.ltree {
            let payload = ltree::write_ltree(tree);
            let (written, next) =
                self.layer
                    .write_section(pool, state.pool_id, cursor, &SectionKind::Ltree, &payload, false, previous)?;
            cursor = next;
            previous = written.file_offset;
        }
        self.layer
            .write_section(pool, state.pool_id, cursor, &SectionKind::Done, &[], true, previous)?;

        log::info!(
            "wrote closing sections for segment {}, {} chunks total",
            self.segment_number,
            self.chunk_entries.len()
        );

        Ok(FinishedImage {
            segment_pool_ids: self.segment_pool_ids,
            chunk_entries: self.chunk_entries,
            hash: self.hash,
            digest: digest_values,
        })
    }
}

/// Rough upper bound on a table section's encoded length, used only to
/// decide whether appending one more chunk would overflow the segment
/// ceiling; actual encoding happens in [`table::write_table`].
fn estimate_table_payload_len(entry_count: usize) -> u64 {
    16 + entry_count as u64 * 4 + 4
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CompressionFlags, CompressionLevel, FormatVersion, NamingSchema};

    fn planner(dir: &std::path::Path, ceiling: u64, level: CompressionLevel) -> SegmentPlanner {
        let seed = dir.join("image.E01");
        let media = MediaValues::from_geometry(512, 4, 64);
        SegmentPlanner::new(
            FormatVersion::V1,
            NamingSchema::E01UpperCase,
            seed,
            ceiling,
            64 * 512,
            level,
            CompressionFlags::default(),
            encoding_rs::WINDOWS_1252,
            HeaderValues::new(),
            media,
        )
    }

    #[test]
    fn writes_single_segment_for_small_media() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = FilePool::new(8);
        let mut p = planner(dir.path(), 1024 * 1024, CompressionLevel::None);

        p.write_chunk(&mut pool, &[0u8; 64 * 512]).unwrap();
        let finished = p.finish(&mut pool).unwrap();

        assert_eq!(finished.chunk_entries.len(), 1);
        assert_eq!(finished.segment_pool_ids.len(), 1);
        assert!(finished.digest.md5_hex().is_some());
    }

    #[test]
    fn rolls_over_to_new_segment_when_ceiling_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let mut pool = FilePool::new(8);
        // A tiny ceiling forces a rollover after the very first chunk.
        let mut p = planner(dir.path(), 200, CompressionLevel::None);

        p.write_chunk(&mut pool, &[1u8; 64 * 512]).unwrap();
        p.write_chunk(&mut pool, &[2u8; 64 * 512]).unwrap();
        let finished = p.finish(&mut pool).unwrap();

        assert!(finished.segment_pool_ids.len() >= 2);
        let segments: std::collections::HashSet<_> =
            finished.chunk_entries.iter().map(|e| e.segment).collect();
        assert!(segments.len() >= 2);
    }
}
