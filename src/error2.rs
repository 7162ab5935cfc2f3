//! `error2` section: acquisition read errors. Layout: `u32` count
//! followed by that many `(start_sector: u32, sector_count: u32)` pairs.

use crate::error::{Error, ErrorKind, Result};

const ENTRY_LEN: usize = 8;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AcquisitionErrors(Vec<(u32, u32)>);

impl AcquisitionErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, start_sector: u32, sector_count: u32) {
        self.0.push((start_sector, sector_count));
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &(u32, u32)> {
        self.0.iter()
    }
}

pub fn read_error2(payload: &[u8]) -> Result<AcquisitionErrors> {
    read_pairs(payload).map(AcquisitionErrors)
}

pub fn write_error2(errors: &AcquisitionErrors) -> Vec<u8> {
    write_pairs(&errors.0)
}

fn read_pairs(payload: &[u8]) -> Result<Vec<(u32, u32)>> {
    if payload.len() < 4 {
        return Err(Error::new(
            ErrorKind::CorruptData,
            "error2/session section payload shorter than the entry count",
        ));
    }
    let count = u32::from_le_bytes(payload[0..4].try_into().unwrap()) as usize;
    let need = 4 + count * ENTRY_LEN;
    if payload.len() < need {
        return Err(Error::new(
            ErrorKind::CorruptData,
            format!(
                "error2/session section claims {} entries but payload is too short",
                count
            ),
        ));
    }
    let mut pairs = Vec::with_capacity(count);
    for i in 0..count {
        let base = 4 + i * ENTRY_LEN;
        let start = u32::from_le_bytes(payload[base..base + 4].try_into().unwrap());
        let len = u32::from_le_bytes(payload[base + 4..base + 8].try_into().unwrap());
        pairs.push((start, len));
    }
    Ok(pairs)
}

fn write_pairs(pairs: &[(u32, u32)]) -> Vec<u8> {
    let mut payload = Vec::with_capacity(4 + pairs.len() * ENTRY_LEN);
    payload.extend_from_slice(&(pairs.len() as u32).to_le_bytes());
    for (start, len) in pairs {
        payload.extend_from_slice(&start.to_le_bytes());
        payload.extend_from_slice(&len.to_le_bytes());
    }
    payload
}

pub(crate) use write_pairs as write_pairs_shared;
pub(crate) use read_pairs as read_pairs_shared;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_error_ranges() {
        let mut errors = AcquisitionErrors::new();
        errors.push(3 * 64, 64);
        errors.push(10 * 64, 128);

        let payload = write_error2(&errors);
        let decoded = read_error2(&payload).unwrap();
        assert_eq!(decoded, errors);
    }

    #[test]
    fn empty_is_zero_count() {
        let errors = AcquisitionErrors::new();
        let payload = write_error2(&errors);
        assert_eq!(payload, 0u32.to_le_bytes().to_vec());
    }
}
