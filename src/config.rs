//! Write/read configuration.

use crate::format::{CompressionFlags, CompressionLevel, DateFormat, Format};

/// Tunables recognized by the core. Constructed with [`Config::new`] and
/// customized through the `with_*` methods: a plain struct plus setters
/// rather than a derive-based builder crate.
#[derive(Debug, Clone)]
pub struct Config {
    pub format: Format,
    /// Byte ceiling per segment file.
    pub segment_size: u64,
    pub sectors_per_chunk: u32,
    pub bytes_per_sector: u32,
    pub compression_level: CompressionLevel,
    pub compression_flags: CompressionFlags,
    /// Codepage used to decode the `header` section. `header2`/`xheader`
    /// are always UTF-16LE/UTF-8 regardless of this setting.
    pub header_codepage: &'static encoding_rs::Encoding,
    pub date_format: DateFormat,
    /// Sectors covered by one acquisition-error report.
    pub error_granularity: u32,
    /// When a chunk's checksum fails on read, fill it with
    /// [`Config::wipe_pattern`] instead of failing the read.
    pub wipe_on_error: bool,
    pub wipe_pattern: u8,
    /// Open-file budget enforced by the pool.
    pub max_open_files: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            format: Format::default(),
            segment_size: 1024 * 1024 * 1024 * 2, // ~2 GiB, a common EnCase6 ceiling
            sectors_per_chunk: 64,
            bytes_per_sector: 512,
            compression_level: CompressionLevel::None,
            compression_flags: CompressionFlags::default(),
            header_codepage: encoding_rs::WINDOWS_1252,
            date_format: DateFormat::default(),
            error_granularity: 64,
            wipe_on_error: false,
            wipe_pattern: 0x00,
            max_open_files: 16,
        }
    }
}

impl Config {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_format(mut self, format: Format) -> Self {
        self.format = format;
        self
    }

    pub fn with_segment_size(mut self, segment_size: u64) -> Self {
        self.segment_size = segment_size;
        self
    }

    pub fn with_sectors_per_chunk(mut self, sectors_per_chunk: u32) -> Self {
        self.sectors_per_chunk = sectors_per_chunk;
        self
    }

    pub fn with_bytes_per_sector(mut self, bytes_per_sector: u32) -> Self {
        self.bytes_per_sector = bytes_per_sector;
        self
    }

    pub fn with_compression_level(mut self, level: CompressionLevel) -> Self {
        self.compression_level = level;
        self
    }

    pub fn with_compression_flags(mut self, flags: CompressionFlags) -> Self {
        self.compression_flags = flags;
        self
    }

    pub fn with_header_codepage(mut self, codepage: &'static encoding_rs::Encoding) -> Self {
        self.header_codepage = codepage;
        self
    }

    pub fn with_date_format(mut self, date_format: DateFormat) -> Self {
        self.date_format = date_format;
        self
    }

    pub fn with_error_granularity(mut self, granularity: u32) -> Self {
        self.error_granularity = granularity;
        self
    }

    pub fn with_wipe_on_error(mut self, wipe_on_error: bool, pattern: u8) -> Self {
        self.wipe_on_error = wipe_on_error;
        self.wipe_pattern = pattern;
        self
    }

    pub fn with_max_open_files(mut self, max_open_files: usize) -> Self {
        self.max_open_files = max_open_files.max(1);
        self
    }

    pub fn chunk_size(&self) -> u64 {
        self.sectors_per_chunk as u64 * self.bytes_per_sector as u64
    }
}
