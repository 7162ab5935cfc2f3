//! `digest`/`hash` section readers and writers: precomputed MD5/SHA-1 over
//! the acquired media, consumed here as pure hash functions — hashing
//! itself happens outside this crate.

use md5::{Digest as _, Md5};
use sha1::Sha1;

use crate::error::{Error, ErrorKind, Result};

pub const KEY_MD5: &str = "MD5";
pub const KEY_SHA1: &str = "SHA1";

const MD5_LEN: usize = 16;
const SHA1_LEN: usize = 20;

/// `hash` section layout: 16-byte MD5 + 4-byte padding + Adler-32, but the
/// padding/checksum envelope is handled by the section layer — this module
/// only owns the digest bytes themselves.
const HASH_PAYLOAD_LEN: usize = MD5_LEN + 4;
/// `digest` section layout: 16-byte MD5 + 20-byte SHA-1 + padding.
const DIGEST_PAYLOAD_LEN: usize = MD5_LEN + SHA1_LEN + 40;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HashValues {
    md5: Option<[u8; MD5_LEN]>,
    sha1: Option<[u8; SHA1_LEN]>,
}

impl HashValues {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_md5(&mut self, digest: [u8; MD5_LEN]) {
        self.md5 = Some(digest);
    }

    pub fn set_sha1(&mut self, digest: [u8; SHA1_LEN]) {
        self.sha1 = Some(digest);
    }

    pub fn md5_hex(&self) -> Option<String> {
        self.md5.map(|d| hex_encode(&d))
    }

    pub fn sha1_hex(&self) -> Option<String> {
        self.sha1.map(|d| hex_encode(&d))
    }

    pub fn get_hex(&self, key: &str) -> Option<String> {
        match key {
            KEY_MD5 => self.md5_hex(),
            KEY_SHA1 => self.sha1_hex(),
            _ => None,
        }
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Computes the MD5 of `data`.
pub fn md5(data: &[u8]) -> [u8; MD5_LEN] {
    let mut hasher = Md5::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Computes the SHA-1 of `data`.
pub fn sha1(data: &[u8]) -> [u8; SHA1_LEN] {
    let mut hasher = Sha1::new();
    hasher.update(data);
    hasher.finalize().into()
}

pub fn read_hash(payload: &[u8]) -> Result<HashValues> {
    if payload.len() < MD5_LEN {
        return Err(Error::new(
            ErrorKind::CorruptData,
            "hash section payload shorter than one MD5 digest",
        ));
    }
    let mut values = HashValues::new();
    let mut digest = [0u8; MD5_LEN];
    digest.copy_from_slice(&payload[..MD5_LEN]);
    values.set_md5(digest);
    Ok(values)
}

pub fn write_hash(values: &HashValues) -> Vec<u8> {
    let mut payload = vec![0u8; HASH_PAYLOAD_LEN];
    if let Some(md5) = values.md5 {
        payload[..MD5_LEN].copy_from_slice(&md5);
    }
    payload
}

pub fn read_digest(payload: &[u8]) -> Result<HashValues> {
    if payload.len() < MD5_LEN + SHA1_LEN {
        return Err(Error::new(
            ErrorKind::CorruptData,
            "digest section payload shorter than MD5+SHA1",
        ));
    }
    let mut values = HashValues::new();
    let mut md5 = [0u8; MD5_LEN];
    md5.copy_from_slice(&payload[..MD5_LEN]);
    values.set_md5(md5);
    let mut sha1 = [0u8; SHA1_LEN];
    sha1.copy_from_slice(&payload[MD5_LEN..MD5_LEN + SHA1_LEN]);
    values.set_sha1(sha1);
    Ok(values)
}

pub fn write_digest(values: &HashValues) -> Vec<u8> {
    let mut payload = vec![0u8; DIGEST_PAYLOAD_LEN];
    if let Some(md5) = values.md5 {
        payload[..MD5_LEN].copy_from_slice(&md5);
    }
    if let Some(sha1) = values.sha1 {
        payload[MD5_LEN..MD5_LEN + SHA1_LEN].copy_from_slice(&sha1);
    }
    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn md5_known_vector() {
        assert_eq!(hex_encode(&md5(b"")), "d41d8cd98f00b204e9800998ecf8427e");
    }

    #[test]
    fn sha1_known_vector() {
        assert_eq!(hex_encode(&sha1(b"")), "da39a3ee5e6b4b0d3255bfef95601890afd80709");
    }

    #[test]
    fn digest_section_round_trips() {
        let mut values = HashValues::new();
        values.set_md5(md5(b"media bytes"));
        values.set_sha1(sha1(b"media bytes"));
        let payload = write_digest(&values);
        let decoded = read_digest(&payload).unwrap();
        assert_eq!(decoded, values);
    }

    #[test]
    fn hash_section_round_trips() {
        let mut values = HashValues::new();
        values.set_md5(md5(b"media bytes"));
        let payload = write_hash(&values);
        let decoded = read_hash(&payload).unwrap();
        assert_eq!(decoded.md5_hex(), values.md5_hex());
    }
}
