//! Section layer: typed, self-delimited records inside a segment file.
//! Handles both on-disk layouts — v1 descriptor leading the payload, v2
//! descriptor trailing it — behind one `SectionDescriptor`.

use crate::checksum::adler32;
use crate::error::{Error, ErrorKind, Result};
use crate::format::FormatVersion;
use crate::pool::{FilePool, PoolEntryId};

/// v1 descriptor is 76 bytes: 16 (type) + 8 (next offset) + 8 (size) + 40
/// (padding) + 4 (Adler-32 over the first 72 bytes).
pub const V1_DESCRIPTOR_SIZE: u64 = 76;
/// v2 descriptor is 64 bytes: 4 (type) + 4 (data flags) + 8 (previous
/// offset) + 8 (data size) + 4 (padding size) + 16 (integrity hash) + 4
/// (Adler-32) + 16 reserved, matching the documented EnCase7 struct size.
pub const V2_DESCRIPTOR_SIZE: u64 = 64;

/// bit 0 of a v2 descriptor's data-flags: payload is DEFLATE-compressed.
pub const V2_FLAG_COMPRESSED: u32 = 0x0000_0001;
/// bit 1: payload is encrypted (unsupported).
pub const V2_FLAG_ENCRYPTED: u32 = 0x0000_0002;
/// bit 2: an integrity hash over the payload is present in the descriptor.
pub const V2_FLAG_INTEGRITY_HASHED: u32 = 0x0000_0004;

/// The well-known section type identifiers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SectionKind {
    Header,
    Header2,
    Xheader,
    Volume,
    Disk,
    Sectors,
    Table,
    Table2,
    Digest,
    Hash,
    Error2,
    Session,
    Ltree,
    Done,
    Next,
    /// v2 only: precedes the `header`/`header2`/`xheader` triple at the
    /// start of every segment after the first, replacing the header
    /// sections a v1 image repeats in full on each rollover.
    DeviceInformation,
    Unknown(String),
}

impl SectionKind {
    pub fn as_str(&self) -> &str {
        match self {
            SectionKind::Header => "header",
            SectionKind::Header2 => "header2",
            SectionKind::Xheader => "xheader",
            SectionKind::Volume => "volume",
            SectionKind::Disk => "disk",
            SectionKind::Sectors => "sectors",
            SectionKind::Table => "table",
            SectionKind::Table2 => "table2",
            SectionKind::Digest => "digest",
            SectionKind::Hash => "hash",
            SectionKind::Error2 => "error2",
            SectionKind::Session => "session",
            SectionKind::Ltree => "ltree",
            SectionKind::Done => "done",
            SectionKind::Next => "next",
            SectionKind::DeviceInformation => "device_information",
            SectionKind::Unknown(s) => s.as_str(),
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "header" => SectionKind::Header,
            "header2" => SectionKind::Header2,
            "xheader" => SectionKind::Xheader,
            "volume" => SectionKind::Volume,
            "disk" => SectionKind::Disk,
            "sectors" => SectionKind::Sectors,
            "table" => SectionKind::Table,
            "table2" => SectionKind::Table2,
            "digest" => SectionKind::Digest,
            "hash" => SectionKind::Hash,
            "error2" => SectionKind::Error2,
            "session" => SectionKind::Session,
            "ltree" => SectionKind::Ltree,
            "done" => SectionKind::Done,
            "next" => SectionKind::Next,
            "device_information" => SectionKind::DeviceInformation,
            other => SectionKind::Unknown(other.to_string()),
        }
    }

    fn from_v1_bytes(bytes: &[u8; 16]) -> Self {
        let end = bytes.iter().position(|&b| b == 0).unwrap_or(16);
        let s = String::from_utf8_lossy(&bytes[..end]).into_owned();
        Self::from_str(&s)
    }

    fn to_v1_bytes(&self) -> [u8; 16] {
        let mut out = [0u8; 16];
        let s = self.as_str().as_bytes();
        let n = s.len().min(16);
        out[..n].copy_from_slice(&s[..n]);
        out
    }

    /// Numeric type codes for the v2 descriptor, a simplification of the
    /// v1 string identifiers rather than a distinct vocabulary.
    fn from_v2_code(code: u32) -> Self {
        match code {
            1 => SectionKind::Header,
            2 => SectionKind::Header2,
            3 => SectionKind::Xheader,
            4 => SectionKind::Volume,
            5 => SectionKind::Disk,
            6 => SectionKind::Sectors,
            7 => SectionKind::Table,
            8 => SectionKind::Table2,
            9 => SectionKind::Digest,
            10 => SectionKind::Hash,
            11 => SectionKind::Error2,
            12 => SectionKind::Session,
            13 => SectionKind::Ltree,
            14 => SectionKind::Done,
            15 => SectionKind::Next,
            16 => SectionKind::DeviceInformation,
            _ => SectionKind::Unknown(format!("v2#{}", code)),
        }
    }

    fn to_v2_code(&self) -> u32 {
        match self {
            SectionKind::Header => 1,
            SectionKind::Header2 => 2,
            SectionKind::Xheader => 3,
            SectionKind::Volume => 4,
            SectionKind::Disk => 5,
            SectionKind::Sectors => 6,
            SectionKind::Table => 7,
            SectionKind::Table2 => 8,
            SectionKind::Digest => 9,
            SectionKind::Hash => 10,
            SectionKind::Error2 => 11,
            SectionKind::Session => 12,
            SectionKind::Ltree => 13,
            SectionKind::Done => 14,
            SectionKind::Next => 15,
            SectionKind::DeviceInformation => 16,
            SectionKind::Unknown(_) => 0,
        }
    }
}

/// A format-agnostic view of a section descriptor after it has been read
/// off disk.
#[derive(Debug, Clone)]
pub struct SectionDescriptor {
    pub kind: SectionKind,
    /// Absolute offset of the descriptor itself.
    pub file_offset: u64,
    /// Absolute offset of the payload bytes.
    pub payload_offset: u64,
    pub payload_size: u64,
    /// v1 only: absolute offset of the next descriptor, or `file_offset`
    /// itself at the last section (end-of-list sentinel).
    pub next_offset: u64,
    /// v2 only: absolute offset of the previous section's descriptor, or
    /// 0 for the first section in the segment. Since a v2 descriptor
    /// trails its own payload, a segment can only be discovered by
    /// starting at the last descriptor (immediately before EOF) and
    /// walking this chain backward.
    pub previous_offset: u64,
    /// v2 only: the data-flags bitfield.
    pub data_flags: u32,
    /// v2 only: MD5 over the payload, present when `data_flags` has
    /// [`V2_FLAG_INTEGRITY_HASHED`] set. Checked against the payload by
    /// [`SectionLayer::read_payload`].
    pub integrity_hash: Option<[u8; 16]>,
}

impl SectionDescriptor {
    pub fn is_last_v1(&self) -> bool {
        self.next_offset == self.file_offset
    }

    pub fn is_first_v2(&self) -> bool {
        self.previous_offset == 0
    }

    pub fn is_compressed_v2(&self) -> bool {
        self.data_flags & V2_FLAG_COMPRESSED != 0
    }

    pub fn is_encrypted_v2(&self) -> bool {
        self.data_flags & V2_FLAG_ENCRYPTED != 0
    }
}

/// Reads and writes sections within one segment file, behind the pool.
pub struct SectionLayer {
    version: FormatVersion,
}

impl SectionLayer {
    pub fn new(version: FormatVersion) -> Self {
        SectionLayer { version }
    }

    pub fn descriptor_size(&self) -> u64 {
        match self.version {
            FormatVersion::V1 => V1_DESCRIPTOR_SIZE,
            FormatVersion::V2 => V2_DESCRIPTOR_SIZE,
        }
    }

    /// Reads the descriptor for the section believed to start at
    /// `offset`. For v1 the descriptor leads the payload; for v2 the
    /// caller is expected to have already located it (trailing scan is
    /// driven by the segment walker, which tracks running sizes).
    pub fn read_descriptor(
        &self,
        pool: &mut FilePool,
        entry: PoolEntryId,
        offset: u64,
    ) -> Result<SectionDescriptor> {
        match self.version {
            FormatVersion::V1 => self.read_descriptor_v1(pool, entry, offset),
            FormatVersion::V2 => self.read_descriptor_v2(pool, entry, offset),
        }
    }

    fn read_descriptor_v1(
        &self,
        pool: &mut FilePool,
        entry: PoolEntryId,
        offset: u64,
    ) -> Result<SectionDescriptor> {
        let mut buf = [0u8; V1_DESCRIPTOR_SIZE as usize];
        pool.read_exact_at(entry, offset, &mut buf)?;

        let stored_checksum = u32::from_le_bytes(buf[72..76].try_into().unwrap());
        let computed = adler32(&buf[0..72]);
        if computed != stored_checksum {
            log::error!("section descriptor at offset {} failed Adler-32 check", offset);
            return Err(Error::new(
                ErrorKind::ChecksumMismatch,
                format!(
                    "section descriptor at offset {} failed Adler-32 check",
                    offset
                ),
            ));
        }

        let mut type_bytes = [0u8; 16];
        type_bytes.copy_from_slice(&buf[0..16]);
        let kind = SectionKind::from_v1_bytes(&type_bytes);
        let next_offset = u64::from_le_bytes(buf[16..24].try_into().unwrap());
        let size = u64::from_le_bytes(buf[24..32].try_into().unwrap());

        Ok(SectionDescriptor {
            kind,
            file_offset: offset,
            payload_offset: offset + V1_DESCRIPTOR_SIZE,
            payload_size: size.saturating_sub(V1_DESCRIPTOR_SIZE),
            next_offset,
            previous_offset: 0,
            data_flags: 0,
            integrity_hash: None,
        })
    }

    fn read_descriptor_v2(
        &self,
        pool: &mut FilePool,
        entry: PoolEntryId,
        descriptor_offset: u64,
    ) -> Result<SectionDescriptor> {
        let mut buf = [0u8; V2_DESCRIPTOR_SIZE as usize];
        pool.read_exact_at(entry, descriptor_offset, &mut buf)?;

        let stored_checksum = u32::from_le_bytes(buf[44..48].try_into().unwrap());
        let computed = adler32(&buf[0..44]);
        if computed != stored_checksum {
            log::error!("section descriptor at offset {} failed Adler-32 check", descriptor_offset);
            return Err(Error::new(
                ErrorKind::ChecksumMismatch,
                format!(
                    "section descriptor at offset {} failed Adler-32 check",
                    descriptor_offset
                ),
            ));
        }

        let type_code = u32::from_le_bytes(buf[0..4].try_into().unwrap());
        let data_flags = u32::from_le_bytes(buf[4..8].try_into().unwrap());
        let previous_offset = u64::from_le_bytes(buf[8..16].try_into().unwrap());
        let data_size = u64::from_le_bytes(buf[16..24].try_into().unwrap());

        if data_flags & V2_FLAG_ENCRYPTED != 0 {
            log::error!("section descriptor at offset {} is encrypted, unsupported", descriptor_offset);
            return Err(Error::new(
                ErrorKind::Unsupported,
                "encrypted section payloads are not supported",
            ));
        }

        let integrity_hash = if data_flags & V2_FLAG_INTEGRITY_HASHED != 0 {
            let mut hash = [0u8; 16];
            hash.copy_from_slice(&buf[28..44]);
            Some(hash)
        } else {
            None
        };

        Ok(SectionDescriptor {
            kind: SectionKind::from_v2_code(type_code),
            file_offset: descriptor_offset,
            payload_offset: descriptor_offset.saturating_sub(data_size),
            payload_size: data_size,
            next_offset: descriptor_offset + V2_DESCRIPTOR_SIZE,
            previous_offset,
            data_flags,
            integrity_hash,
        })
    }

    pub fn read_payload(
        &self,
        pool: &mut FilePool,
        entry: PoolEntryId,
        descriptor: &SectionDescriptor,
    ) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; descriptor.payload_size as usize];
        pool.read_exact_at(entry, descriptor.payload_offset, &mut buf)?;
        if let Some(expected) = descriptor.integrity_hash {
            if crate::digest::md5(&buf) != expected {
                log::error!("section at offset {} failed its integrity hash check", descriptor.file_offset);
                return Err(Error::new(
                    ErrorKind::ChecksumMismatch,
                    format!(
                        "section at offset {} failed its integrity hash check",
                        descriptor.file_offset
                    ),
                ));
            }
        }
        Ok(buf)
    }

    /// Writes one section (descriptor + payload, no separate padding
    /// parameter needed since callers pad the payload themselves) at
    /// `offset` and returns the descriptor actually written plus the
    /// offset immediately following it. `is_last` controls the v1
    /// `next_offset` sentinel (the last section in a segment points at
    /// itself); it is ignored for v2, whose descriptor instead
    /// records the offset of the *previous* section.
    /// `previous_descriptor_offset` is the absolute file offset of the
    /// previous section's own descriptor (0 for the first section in the
    /// segment); ignored for v1, which chains forward instead.
    pub fn write_section(
        &self,
        pool: &mut FilePool,
        entry: PoolEntryId,
        offset: u64,
        kind: &SectionKind,
        payload: &[u8],
        is_last: bool,
        previous_descriptor_offset: u64,
    ) -> Result<(SectionDescriptor, u64)> {
        match self.version {
            FormatVersion::V1 => self.write_section_v1(pool, entry, offset, kind, payload, is_last),
            FormatVersion::V2 => {
                self.write_section_v2(pool, entry, offset, kind, payload, previous_descriptor_offset)
            }
        }
    }

    fn write_section_v1(
        &self,
        pool: &mut FilePool,
        entry: PoolEntryId,
        offset: u64,
        kind: &SectionKind,
        payload: &[u8],
        is_last: bool,
    ) -> Result<(SectionDescriptor, u64)> {
        let total_size = V1_DESCRIPTOR_SIZE + payload.len() as u64;
        // Sections are laid out back-to-back, so the offset of the next
        // one is fully determined by this section's own size.
        let next_offset = if is_last { offset } else { offset + total_size };

        let mut header = [0u8; 72];
        header[0..16].copy_from_slice(&kind.to_v1_bytes());
        header[16..24].copy_from_slice(&next_offset.to_le_bytes());
        header[24..32].copy_from_slice(&total_size.to_le_bytes());
        // header[32..72] stays zeroed padding.
        let checksum = adler32(&header);

        let mut descriptor_bytes = Vec::with_capacity(V1_DESCRIPTOR_SIZE as usize);
        descriptor_bytes.extend_from_slice(&header);
        descriptor_bytes.extend_from_slice(&checksum.to_le_bytes());

        pool.write_at(entry, offset, &descriptor_bytes)?;
        pool.write_at(entry, offset + V1_DESCRIPTOR_SIZE, payload)?;

        let descriptor = SectionDescriptor {
            kind: kind.clone(),
            file_offset: offset,
            payload_offset: offset + V1_DESCRIPTOR_SIZE,
            payload_size: payload.len() as u64,
            next_offset,
            previous_offset: 0,
            data_flags: 0,
            integrity_hash: None,
        };
        Ok((descriptor, offset + total_size))
    }

    fn write_section_v2(
        &self,
        pool: &mut FilePool,
        entry: PoolEntryId,
        offset: u64,
        kind: &SectionKind,
        payload: &[u8],
        previous_descriptor_offset: u64,
    ) -> Result<(SectionDescriptor, u64)> {
        pool.write_at(entry, offset, payload)?;

        let integrity_hash = crate::digest::md5(payload);
        let data_flags = V2_FLAG_INTEGRITY_HASHED;

        let descriptor_offset = offset + payload.len() as u64;
        let mut header = [0u8; 44];
        header[0..4].copy_from_slice(&kind.to_v2_code().to_le_bytes());
        header[4..8].copy_from_slice(&data_flags.to_le_bytes());
        header[8..16].copy_from_slice(&previous_descriptor_offset.to_le_bytes());
        header[16..24].copy_from_slice(&(payload.len() as u64).to_le_bytes());
        // header[24..28] padding size stays zeroed.
        header[28..44].copy_from_slice(&integrity_hash);
        let checksum = adler32(&header);

        let mut descriptor_bytes = Vec::with_capacity(V2_DESCRIPTOR_SIZE as usize);
        descriptor_bytes.extend_from_slice(&header);
        descriptor_bytes.extend_from_slice(&checksum.to_le_bytes());
        descriptor_bytes.resize(V2_DESCRIPTOR_SIZE as usize, 0);

        pool.write_at(entry, descriptor_offset, &descriptor_bytes)?;

        let descriptor = SectionDescriptor {
            kind: kind.clone(),
            file_offset: descriptor_offset,
            payload_offset: offset,
            payload_size: payload.len() as u64,
            next_offset: descriptor_offset + V2_DESCRIPTOR_SIZE,
            previous_offset: previous_descriptor_offset,
            data_flags,
            integrity_hash: Some(integrity_hash),
        };
        Ok((descriptor, descriptor_offset + V2_DESCRIPTOR_SIZE))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::FilePool;

    #[test]
    fn v1_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        std::fs::File::create(&path).unwrap();

        let mut pool = FilePool::new(4);
        let entry = pool.open(&path, true).unwrap();
        let layer = SectionLayer::new(FormatVersion::V1);

        let (written, next) = layer
            .write_section(&mut pool, entry, 0, &SectionKind::Volume, b"hello world", false, 0)
            .unwrap();
        assert_eq!(next, V1_DESCRIPTOR_SIZE + 11);

        let read_back = layer.read_descriptor(&mut pool, entry, 0).unwrap();
        assert_eq!(read_back.kind, SectionKind::Volume);
        assert_eq!(read_back.payload_size, written.payload_size);
        let payload = layer.read_payload(&mut pool, entry, &read_back).unwrap();
        assert_eq!(payload, b"hello world");
    }

    #[test]
    fn v1_checksum_mismatch_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        std::fs::File::create(&path).unwrap();
        let mut pool = FilePool::new(4);
        let entry = pool.open(&path, true).unwrap();
        let layer = SectionLayer::new(FormatVersion::V1);
        layer
            .write_section(&mut pool, entry, 0, &SectionKind::Done, b"", true, 0)
            .unwrap();

        // Corrupt a byte inside the checksummed header region.
        pool.write_at(entry, 16, &[0xff]).unwrap();

        let result = layer.read_descriptor(&mut pool, entry, 0);
        assert_eq!(result.unwrap_err().kind(), ErrorKind::ChecksumMismatch);
    }

    #[test]
    fn v2_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("seg");
        std::fs::File::create(&path).unwrap();
        let mut pool = FilePool::new(4);
        let entry = pool.open(&path, true).unwrap();
        let layer = SectionLayer::new(FormatVersion::V2);

        let (first, next) = layer
            .write_section(&mut pool, entry, 0, &SectionKind::Header, b"payload!", false, 0)
            .unwrap();
        assert_eq!(next, 8 + V2_DESCRIPTOR_SIZE);
        assert!(first.is_first_v2());

        let descriptor = layer.read_descriptor(&mut pool, entry, 8).unwrap();
        assert_eq!(descriptor.kind, SectionKind::Header);
        assert!(descriptor.is_first_v2());
        let payload = layer.read_payload(&mut pool, entry, &descriptor).unwrap();
        assert_eq!(payload, b"payload!");

        // A second section chains back to the first section's descriptor
        // offset, not its own payload offset.
        let (second, _next2) = layer
            .write_section(&mut pool, entry, next, &SectionKind::Done, b"", true, first.file_offset)
            .unwrap();
        assert_eq!(second.previous_offset, first.file_offset);
        assert!(!second.is_first_v2());

        let second_descriptor = layer.read_descriptor(&mut pool, entry, next + 0).unwrap();
        assert_eq!(second_descriptor.previous_offset, first.file_offset);
    }
}
