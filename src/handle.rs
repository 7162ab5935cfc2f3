//! Handle façade: the top-level object driving one EWF image, either for
//! reading (segments discovered and parsed up front) or writing (a
//! [`SegmentPlanner`] accepting a logical media stream), generalized to
//! the full section set and to both on-disk versions.

use std::collections::HashMap;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::config::Config;
use crate::digest::{self, HashValues};
use crate::error::{Error, ErrorKind, Result, Warning};
use crate::error2::{self, AcquisitionErrors};
use crate::format::{Format, FormatVersion, NamingSchema};
use crate::glob_resolve;
use crate::header::{self, HeaderValues};
use crate::ltree::{self, LogicalTree};
use crate::media::{self, MediaValues};
use crate::pool::{FilePool, PoolEntryId};
use crate::read::ReadEngine;
use crate::section::{SectionDescriptor, SectionKind, SectionLayer};
use crate::session::{self, Sessions};
use crate::table::{self, ChunkEntry};
use crate::write::SegmentPlanner;

/// Bytes preceding the first section in every segment: 8-byte signature,
/// version byte, 2-byte segment number, one reserved byte.
const PREAMBLE_LEN: u64 = 12;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    OpenRead,
    OpenWrite,
    Closed,
}

struct ReadSide {
    segment_pool_ids: HashMap<u16, PoolEntryId>,
    chunk_entries: Vec<ChunkEntry>,
    engine: ReadEngine,
    errors: AcquisitionErrors,
    error_granularity: u32,
}

/// The root entity: owns the pool, segment/section state, media
/// geometry, the chunk table, a chunk cache, a read cursor, and the
/// configuration driving both sides.
pub struct Handle {
    pool: FilePool,
    state: HandleState,
    abort: bool,
    cursor: u64,
    config: Config,

    media: MediaValues,
    header: HeaderValues,
    hash: HashValues,
    digest: HashValues,
    sessions: Sessions,
    ltree: Option<LogicalTree>,
    warnings: Vec<Warning>,

    read: Option<ReadSide>,
    writer: Option<SegmentPlanner>,
    write_buffer: Vec<u8>,
}

fn default_format_for_version(version: FormatVersion) -> Format {
    match version {
        FormatVersion::V1 => Format::EnCase6,
        FormatVersion::V2 => Format::EnCase7,
    }
}

fn parse_preamble(buf: &[u8; PREAMBLE_LEN as usize]) -> Result<(FormatVersion, u16)> {
    let signature: [u8; 8] = buf[0..8].try_into().unwrap();
    let version = if signature == crate::format::SIGNATURE_EWF2 {
        FormatVersion::V2
    } else if signature == crate::format::SIGNATURE_EWF || signature == crate::format::SIGNATURE_SMART {
        FormatVersion::V1
    } else {
        log::error!("segment signature not recognized: {:?}", signature);
        return Err(Error::new(ErrorKind::CorruptData, "segment signature not recognized"));
    };
    let segment_number = u16::from_le_bytes(buf[9..11].try_into().unwrap());
    Ok((version, segment_number))
}

/// Reads every section descriptor in a segment, in on-disk order. v1
/// chains forward from the preamble; v2 can only be discovered by
/// starting at the trailing descriptor and walking `previous_offset`
/// backward to the first section.
fn read_section_list(
    pool: &mut FilePool,
    pool_id: PoolEntryId,
    layer: &SectionLayer,
    version: FormatVersion,
) -> Result<Vec<SectionDescriptor>> {
    match version {
        FormatVersion::V1 => {
            let mut descriptors = Vec::new();
            let mut offset = PREAMBLE_LEN;
            loop {
                let d = layer.read_descriptor(pool, pool_id, offset)?;
                let is_last = d.is_last_v1();
                let next = d.next_offset;
                descriptors.push(d);
                if is_last {
                    break;
                }
                offset = next;
            }
            Ok(descriptors)
        }
        FormatVersion::V2 => {
            let file_len = pool.file_len(pool_id)?;
            let descriptor_size = layer.descriptor_size();
            if file_len < PREAMBLE_LEN + descriptor_size {
                log::error!("segment is {} bytes, too short to hold a v2 descriptor", file_len);
                return Err(Error::new(ErrorKind::CorruptData, "segment too short to hold a v2 descriptor"));
            }
            let mut descriptors = Vec::new();
            let mut offset = file_len - descriptor_size;
            loop {
                let d = layer.read_descriptor(pool, pool_id, offset)?;
                let is_first = d.is_first_v2();
                let previous = d.previous_offset;
                descriptors.push(d);
                if is_first {
                    break;
                }
                offset = previous;
            }
            descriptors.reverse();
            Ok(descriptors)
        }
    }
}

impl Handle {
    /// Opens an image for reading, discovering sibling segments from
    /// `seed_path` the way [`glob_resolve::enumerate_from_seed`] does.
    pub fn open(seed_path: impl AsRef<Path>, config: Config) -> Result<Self> {
        let paths = glob_resolve::enumerate_from_seed(seed_path.as_ref())?;
        Self::open_files(&paths, config)
    }

    /// Opens an image for reading from an explicit, already-ordered list of
    /// segment paths.
    pub fn open_files(paths: &[PathBuf], config: Config) -> Result<Self> {
        if paths.is_empty() {
            return Err(Error::new(ErrorKind::InvalidArgument, "no segment paths supplied"));
        }

        let mut pool = FilePool::new(config.max_open_files);
        let mut segment_pool_ids = HashMap::new();
        let mut version: Option<FormatVersion> = None;

        let mut header_values: Option<HeaderValues> = None;
        let mut header2_values: Option<HeaderValues> = None;
        let mut xheader_values: Option<HeaderValues> = None;
        let mut media_values: Option<MediaValues> = None;
        let mut hash = HashValues::new();
        let mut digest_values = HashValues::new();
        let mut errors = AcquisitionErrors::new();
        let mut sessions = Sessions::new();
        let mut ltree_value = None;
        let mut chunk_entries = Vec::new();
        let mut warnings = Vec::new();
        let mut last_segment_number = 0u16;
        let mut last_segment_is_done = false;

        for path in paths {
            let result = Self::parse_segment(&mut pool, path, &config);
            let parsed = match result {
                Ok(p) => p,
                Err(e) => {
                    log::error!("failed to parse segment {:?}: {}", path, e);
                    for id in segment_pool_ids.values() {
                        pool.close(*id);
                    }
                    return Err(e);
                }
            };

            version.get_or_insert(parsed.version);
            segment_pool_ids.insert(parsed.segment_number, parsed.pool_id);
            last_segment_number = parsed.segment_number;
            last_segment_is_done = parsed.ends_in_done;
            chunk_entries.extend(parsed.chunk_entries);
            warnings.extend(parsed.warnings);
            if let Some(h) = parsed.header {
                header_values = Some(h);
            }
            if let Some(h) = parsed.header2 {
                header2_values = Some(h);
            }
            if let Some(h) = parsed.xheader {
                xheader_values = Some(h);
            }
            if let Some(m) = parsed.media {
                media_values = Some(m);
            }
            if let Some(h) = parsed.hash {
                hash = h;
            }
            if let Some(d) = parsed.digest {
                digest_values = d;
            }
            if !parsed.errors.is_empty() {
                errors = parsed.errors;
            }
            if !parsed.sessions.is_empty() {
                sessions = parsed.sessions;
            }
            if let Some(t) = parsed.ltree {
                ltree_value = Some(t);
            }
        }

        if !last_segment_is_done {
            log::error!(
                "image ends in a 'next' section after segment {}, expected segment {} is missing",
                last_segment_number,
                last_segment_number + 1
            );
            for id in segment_pool_ids.values() {
                pool.close(*id);
            }
            return Err(Error::not_found(last_segment_number + 1));
        }

        let version = version.expect("at least one segment parsed");

        // Precedence: xheader > header2 > header (our own documented
        // convention; see header.rs), independent of on-disk ordering.
        let mut header = header_values.unwrap_or_default();
        if let Some(h2) = header2_values {
            header.merge(h2);
        }
        if let Some(xh) = xheader_values {
            header.merge(xh);
        }

        let media = media_values.ok_or_else(|| {
            log::error!("image has no volume/disk section");
            Error::new(ErrorKind::CorruptData, "image has no volume/disk section")
        })?;

        let error_granularity = config.error_granularity;
        let chunk_bytes = media.sectors_per_chunk as u64 * media.bytes_per_sector as u64;
        let engine = ReadEngine::new(chunk_bytes, config.wipe_on_error, config.wipe_pattern);

        log::info!("opened image across {} segment(s), {} sectors", paths.len(), media.number_of_sectors);

        Ok(Handle {
            pool,
            state: HandleState::OpenRead,
            abort: false,
            cursor: 0,
            config,
            media,
            header,
            hash,
            digest: digest_values,
            sessions,
            ltree: ltree_value,
            warnings,
            read: Some(ReadSide {
                segment_pool_ids,
                chunk_entries,
                engine,
                errors,
                error_granularity,
            }),
            writer: None,
            write_buffer: Vec::new(),
        })
    }

    fn parse_segment(pool: &mut FilePool, path: &Path, config: &Config) -> Result<ParsedSegment> {
        let pool_id = pool.open(path, false)?;
        let mut preamble = [0u8; PREAMBLE_LEN as usize];
        pool.read_exact_at(pool_id, 0, &mut preamble)?;
        let (version, segment_number) = parse_preamble(&preamble)?;
        let layer = SectionLayer::new(version);

        let descriptors = read_section_list(pool, pool_id, &layer, version)?;

        let mut parsed = ParsedSegment {
            pool_id,
            segment_number,
            version,
            header: None,
            header2: None,
            xheader: None,
            media: None,
            hash: None,
            digest: None,
            errors: AcquisitionErrors::new(),
            sessions: Sessions::new(),
            ltree: None,
            chunk_entries: Vec::new(),
            warnings: Vec::new(),
            ends_in_done: false,
        };

        let mut last_sectors: Option<SectionDescriptor> = None;
        let mut pending_table: Option<Vec<u8>> = None;

        for d in &descriptors {
            match &d.kind {
                SectionKind::Header => {
                    let payload = layer.read_payload(pool, pool_id, d)?;
                    parsed.header = Some(header::read_header(&payload, config.header_codepage)?);
                }
                SectionKind::Header2 => {
                    let payload = layer.read_payload(pool, pool_id, d)?;
                    parsed.header2 = Some(header::read_header2(&payload)?);
                }
                SectionKind::Xheader => {
                    let payload = layer.read_payload(pool, pool_id, d)?;
                    parsed.xheader = Some(header::read_xheader(&payload)?);
                }
                SectionKind::Volume | SectionKind::Disk => {
                    let payload = layer.read_payload(pool, pool_id, d)?;
                    parsed.media = Some(media::read_media(&payload, default_format_for_version(version))?);
                }
                SectionKind::Sectors => {
                    last_sectors = Some(d.clone());
                }
                SectionKind::Table => {
                    pending_table = Some(layer.read_payload(pool, pool_id, d)?);
                }
                SectionKind::Table2 => {
                    let table2_payload = layer.read_payload(pool, pool_id, d)?;
                    let sectors = last_sectors.as_ref().ok_or_else(|| {
                        log::error!("segment {}: table section without a preceding sectors section", segment_number);
                        Error::new(ErrorKind::CorruptData, "table section without a preceding sectors section")
                    })?;
                    let region_end = sectors.payload_offset + sectors.payload_size;
                    let (resolved, warning) =
                        table::reconcile(pending_table.as_deref(), Some(&table2_payload), segment_number)?;
                    if let Some(w) = warning {
                        parsed.warnings.push(w);
                    }
                    parsed
                        .chunk_entries
                        .extend(table::resolve_chunk_ranges(&resolved, segment_number, region_end)?);
                    pending_table = None;
                }
                SectionKind::Digest => {
                    let payload = layer.read_payload(pool, pool_id, d)?;
                    parsed.digest = Some(digest::read_digest(&payload)?);
                }
                SectionKind::Hash => {
                    let payload = layer.read_payload(pool, pool_id, d)?;
                    parsed.hash = Some(digest::read_hash(&payload)?);
                }
                SectionKind::Error2 => {
                    let payload = layer.read_payload(pool, pool_id, d)?;
                    parsed.errors = error2::read_error2(&payload)?;
                }
                SectionKind::Session => {
                    let payload = layer.read_payload(pool, pool_id, d)?;
                    parsed.sessions = session::read_session(&payload)?;
                }
                SectionKind::Ltree => {
                    let payload = layer.read_payload(pool, pool_id, d)?;
                    parsed.ltree = Some(ltree::read_ltree(&payload)?);
                }
                SectionKind::Done => parsed.ends_in_done = true,
                SectionKind::Next => parsed.ends_in_done = false,
                SectionKind::DeviceInformation | SectionKind::Unknown(_) => {}
            }
        }

        Ok(parsed)
    }

    /// Creates a new image for writing, starting at `seed_path` (its
    /// extension selects the naming schema).
    pub fn create(
        seed_path: impl Into<PathBuf>,
        config: Config,
        header: HeaderValues,
        bytes_per_sector: u32,
        number_of_sectors: u64,
    ) -> Result<Self> {
        let seed_path = seed_path.into();
        let ext = seed_path
            .extension()
            .and_then(|e| e.to_str())
            .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, "seed path has no extension"))?;
        let naming = NamingSchema::from_extension(ext)
            .ok_or_else(|| Error::new(ErrorKind::InvalidArgument, format!("unrecognized segment extension: {}", ext)))?;

        log::info!("creating image at {:?} ({} sectors)", seed_path, number_of_sectors);

        let mut media = MediaValues::from_geometry(bytes_per_sector, number_of_sectors, config.sectors_per_chunk);
        media.format = config.format;
        media.error_granularity = config.error_granularity;

        let planner = SegmentPlanner::new(
            config.format.version(),
            naming,
            seed_path,
            config.segment_size,
            config.chunk_size(),
            config.compression_level,
            config.compression_flags,
            config.header_codepage,
            header.clone(),
            media.clone(),
        );

        let pool = FilePool::new(config.max_open_files);
        let chunk_bytes = config.chunk_size();

        Ok(Handle {
            pool,
            state: HandleState::OpenWrite,
            abort: false,
            cursor: 0,
            config,
            media,
            header,
            hash: HashValues::new(),
            digest: HashValues::new(),
            sessions: Sessions::new(),
            ltree: None,
            warnings: Vec::new(),
            read: None,
            writer: Some(planner),
            write_buffer: Vec::with_capacity(chunk_bytes as usize),
        })
    }

    pub fn set_sessions(&mut self, sessions: Sessions) {
        if let Some(writer) = self.writer.as_mut() {
            writer.set_sessions(sessions.clone());
        }
        self.sessions = sessions;
    }

    pub fn set_ltree(&mut self, tree: LogicalTree) {
        if let Some(writer) = self.writer.as_mut() {
            writer.set_ltree(tree.clone());
        }
        self.ltree = Some(tree);
    }

    /// Sets the abort flag; the current and any subsequent operation fails
    /// with `Aborted` at the next chunk boundary / section emit.
    pub fn abort(&mut self) {
        self.abort = true;
    }

    pub fn media(&self) -> &MediaValues {
        &self.media
    }

    pub fn header(&self) -> &HeaderValues {
        &self.header
    }

    pub fn hash(&self) -> &HashValues {
        &self.hash
    }

    pub fn digest(&self) -> &HashValues {
        &self.digest
    }

    pub fn sessions(&self) -> &Sessions {
        &self.sessions
    }

    pub fn ltree(&self) -> Option<&LogicalTree> {
        self.ltree.as_ref()
    }

    pub fn warnings(&self) -> &[Warning] {
        &self.warnings
    }

    fn chunk_bytes(&self) -> u64 {
        self.media.sectors_per_chunk as u64 * self.media.bytes_per_sector as u64
    }

    /// Flushes the write buffer's final, possibly-short chunk and emits the
    /// trailing sections, returning the accumulated acquisition errors.
    pub fn close(mut self) -> Result<()> {
        if self.abort {
            log::error!("close called on an aborted handle");
            return Err(Error::new(ErrorKind::Aborted, "handle was aborted before close"));
        }
        match self.state {
            HandleState::OpenRead => {
                if let Some(read) = self.read.take() {
                    for id in read.segment_pool_ids.values() {
                        self.pool.close(*id);
                    }
                }
            }
            HandleState::OpenWrite => {
                let mut writer = self.writer.take().expect("write handle always has a writer");
                if !self.write_buffer.is_empty() {
                    let buf = std::mem::take(&mut self.write_buffer);
                    writer.write_chunk(&mut self.pool, &buf)?;
                }
                let finished = writer.finish(&mut self.pool)?;
                log::info!("finalized image across {} segment(s)", finished.segment_pool_ids.len());
                self.hash = finished.hash;
                self.digest = finished.digest;
            }
            HandleState::Closed => {}
        }
        self.state = HandleState::Closed;
        Ok(())
    }
}

/// Per-segment parse result, folded into the `Handle` being assembled by
/// [`Handle::open_files`].
struct ParsedSegment {
    pool_id: PoolEntryId,
    segment_number: u16,
    version: FormatVersion,
    header: Option<HeaderValues>,
    header2: Option<HeaderValues>,
    xheader: Option<HeaderValues>,
    media: Option<MediaValues>,
    hash: Option<HashValues>,
    digest: Option<HashValues>,
    errors: AcquisitionErrors,
    sessions: Sessions,
    ltree: Option<LogicalTree>,
    chunk_entries: Vec<ChunkEntry>,
    warnings: Vec<Warning>,
    ends_in_done: bool,
}

impl Read for Handle {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self
            .read
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "handle is not open for reading"))?;

        let chunk_bytes = self.media.sectors_per_chunk as u64 * self.media.bytes_per_sector as u64;
        let mut total = 0usize;
        while total < buf.len() {
            if self.abort {
                return Err(Error::new(ErrorKind::Aborted, "read aborted").into());
            }
            let in_chunk_offset = self.cursor % chunk_bytes.max(1);
            let bound = chunk_bytes.saturating_sub(in_chunk_offset) as usize;
            let want = (buf.len() - total).min(bound.max(1));
            let (n, new_warnings) = read.engine.read(
                &mut self.pool,
                &read.segment_pool_ids,
                &read.chunk_entries,
                self.media.media_size,
                self.cursor,
                &mut buf[total..total + want],
                &mut read.errors,
                read.error_granularity,
                self.media.bytes_per_sector,
            )?;
            self.warnings.extend(new_warnings);
            total += n;
            self.cursor += n as u64;
            if n == 0 {
                break;
            }
        }
        Ok(total)
    }
}

impl Seek for Handle {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        let media_size = self.media.media_size as i64;
        let new_offset = match pos {
            SeekFrom::Start(o) => o as i64,
            SeekFrom::Current(o) => self.cursor as i64 + o,
            SeekFrom::End(o) => media_size + o,
        };
        if new_offset < 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "seek before start of image"));
        }
        self.cursor = new_offset as u64;
        Ok(self.cursor)
    }
}

impl Write for Handle {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let writer = self
            .writer
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::Other, "handle is not open for writing"))?;
        if self.abort {
            return Err(Error::new(ErrorKind::Aborted, "write aborted").into());
        }

        let chunk_bytes = self.chunk_bytes() as usize;
        let mut consumed = 0;
        self.write_buffer.extend_from_slice(buf);
        consumed += buf.len();

        while self.write_buffer.len() >= chunk_bytes {
            if self.abort {
                return Err(Error::new(ErrorKind::Aborted, "write aborted").into());
            }
            let chunk: Vec<u8> = self.write_buffer.drain(..chunk_bytes).collect();
            writer.write_chunk(&mut self.pool, &chunk)?;
        }
        Ok(consumed)
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{CompressionLevel, Format};

    fn test_config() -> Config {
        Config::new()
            .with_format(Format::EnCase6)
            .with_segment_size(1024 * 1024)
            .with_sectors_per_chunk(4)
            .with_bytes_per_sector(512)
            .with_compression_level(CompressionLevel::None)
    }

    #[test]
    fn write_then_read_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("image.E01");
        let pattern: Vec<u8> = (0..(4 * 512 * 3)).map(|i| (i % 251) as u8).collect();

        let mut header = HeaderValues::new();
        header.set(header::KEY_CASE_NUMBER, "case-1");

        let mut handle = Handle::create(&seed, test_config(), header, 512, (pattern.len() / 512) as u64).unwrap();
        handle.write_all(&pattern).unwrap();
        handle.close().unwrap();

        let mut reader = Handle::open(&seed, test_config()).unwrap();
        assert_eq!(reader.header().get(header::KEY_CASE_NUMBER), Some("case-1"));
        let mut out = vec![0u8; pattern.len()];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(out, pattern);
    }

    #[test]
    fn seek_from_end_matches_media_size() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("image.E01");
        let pattern = vec![7u8; 4 * 512 * 2];

        let mut handle = Handle::create(&seed, test_config(), HeaderValues::new(), 512, (pattern.len() / 512) as u64).unwrap();
        handle.write_all(&pattern).unwrap();
        handle.close().unwrap();

        let mut reader = Handle::open(&seed, test_config()).unwrap();
        let end = reader.seek(SeekFrom::End(0)).unwrap();
        assert_eq!(end, pattern.len() as u64);
        let one_before = reader.seek(SeekFrom::Start(end - 1)).unwrap();
        assert_eq!(one_before, end - 1);
        let mut buf = [0u8; 1];
        assert_eq!(reader.read(&mut buf).unwrap(), 1);
        let zero = reader.seek(SeekFrom::Start(end)).unwrap();
        assert_eq!(zero, end);
        assert_eq!(reader.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn rolls_over_across_segments_and_reads_back_whole() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("image.E01");
        let pattern: Vec<u8> = (0..(4 * 512 * 6)).map(|i| (i % 199) as u8).collect();
        let ceiling_config = test_config().with_segment_size(4 * 512 + 512);

        let mut handle = Handle::create(&seed, ceiling_config.clone(), HeaderValues::new(), 512, (pattern.len() / 512) as u64).unwrap();
        handle.write_all(&pattern).unwrap();
        handle.close().unwrap();

        assert!(dir.path().join("image.E02").exists());

        let mut reader = Handle::open(&seed, ceiling_config).unwrap();
        let mut out = vec![0u8; pattern.len()];
        reader.read_exact(&mut out).unwrap();
        assert_eq!(out, pattern);
    }

    #[test]
    fn open_missing_seed_segment_fails() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("image.E01");
        let result = Handle::open(&seed, test_config());
        assert!(result.is_err());
    }

    #[test]
    fn abort_fails_subsequent_write() {
        let dir = tempfile::tempdir().unwrap();
        let seed = dir.path().join("image.E01");
        let mut handle = Handle::create(&seed, test_config(), HeaderValues::new(), 512, 4).unwrap();
        handle.abort();
        let result = handle.write(&[0u8; 4 * 512]);
        assert!(result.is_err());
    }
}
