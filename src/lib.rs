//! `ewfcore`: a segmented EWF/E01 forensic disk image container —
//! sections, the chunk table, and chunked read/write I/O.
//!
//! [`Handle`] is the entry point: [`Handle::open`]/[`Handle::open_files`]
//! discover and parse an existing image's segments for reading,
//! [`Handle::create`] starts a new one for writing. Both sides implement
//! `std::io::{Read, Seek, Write}` over the logical media stream.

pub mod checksum;
pub mod config;
pub mod digest;
pub mod error;
pub mod error2;
pub mod format;
pub mod glob_resolve;
pub mod handle;
pub mod header;
pub mod ltree;
pub mod media;
pub mod pool;
pub mod read;
pub mod section;
pub mod session;
pub mod table;
pub mod write;

pub use config::Config;
pub use error::{Error, ErrorKind, Result, Warning};
pub use format::{CompressionFlags, CompressionLevel, DateFormat, Format, FormatVersion, MediaFlags, MediaType, NamingSchema};
pub use handle::Handle;
pub use header::HeaderValues;
pub use media::MediaValues;
