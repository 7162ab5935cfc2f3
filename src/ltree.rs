//! `ltree` section: the optional embedded logical-file tree. Layout: a
//! 96-byte header (16-byte MD5 integrity hash over the XML body, reserved
//! padding, trailing Adler-32 over the first 92 bytes) followed by the
//! XML payload. Any bytes after the XML body are treated as padding
//! rather than another section and are simply discarded on read.

use crate::checksum::adler32;
use crate::digest::md5;
use crate::error::{Error, ErrorKind, Result};

pub const HEADER_LEN: usize = 96;
const INTEGRITY_HASH_LEN: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogicalTree {
    pub xml: Vec<u8>,
}

impl LogicalTree {
    pub fn new(xml: Vec<u8>) -> Self {
        LogicalTree { xml }
    }
}

pub fn read_ltree(payload: &[u8]) -> Result<LogicalTree> {
    if payload.len() < HEADER_LEN {
        return Err(Error::new(
            ErrorKind::CorruptData,
            "ltree section shorter than its fixed header",
        ));
    }
    let header = &payload[..HEADER_LEN];
    let stored_checksum = u32::from_le_bytes(header[92..96].try_into().unwrap());
    let computed_checksum = adler32(&header[..92]);
    if computed_checksum != stored_checksum {
        return Err(Error::new(
            ErrorKind::ChecksumMismatch,
            "ltree header failed its Adler-32 check",
        ));
    }

    let mut stored_hash = [0u8; INTEGRITY_HASH_LEN];
    stored_hash.copy_from_slice(&header[..INTEGRITY_HASH_LEN]);

    // Everything after the header is the XML body; if it is followed by
    // non-XML padding, the integrity hash tells us where the real body
    // ends only if it matches a prefix, so we trust the whole remainder
    // and let the hash check confirm it.
    let xml = payload[HEADER_LEN..].to_vec();
    let computed_hash = md5(&xml);
    if computed_hash != stored_hash {
        return Err(Error::new(
            ErrorKind::ChecksumMismatch,
            "ltree XML body failed its MD5 integrity check",
        ));
    }

    Ok(LogicalTree { xml })
}

pub fn write_ltree(tree: &LogicalTree) -> Vec<u8> {
    let mut header = [0u8; HEADER_LEN];
    let hash = md5(&tree.xml);
    header[..INTEGRITY_HASH_LEN].copy_from_slice(&hash);
    let checksum = adler32(&header[..92]);
    header[92..96].copy_from_slice(&checksum.to_le_bytes());

    let mut payload = Vec::with_capacity(HEADER_LEN + tree.xml.len());
    payload.extend_from_slice(&header);
    payload.extend_from_slice(&tree.xml);
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_xml_body() {
        let tree = LogicalTree::new(b"<ltree><file name=\"a.txt\"/></ltree>".to_vec());
        let payload = write_ltree(&tree);
        let decoded = read_ltree(&payload).unwrap();
        assert_eq!(decoded, tree);
    }

    #[test]
    fn corrupted_body_fails_integrity_check() {
        let tree = LogicalTree::new(b"<ltree/>".to_vec());
        let mut payload = write_ltree(&tree);
        let last = payload.len() - 1;
        payload[last] ^= 0xff;
        assert_eq!(
            read_ltree(&payload).unwrap_err().kind(),
            crate::error::ErrorKind::ChecksumMismatch
        );
    }
}
