//! `session` section: CD/DVD session layout. Same `count` +
//! `(start_sector, sector_count)` layout as `error2`.

use crate::error::Result;
use crate::error2::{read_pairs_shared, write_pairs_shared};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Sessions(Vec<(u32, u32)>);

impl Sessions {
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

pub fn read_session(payload: &[u8]) -> Result<Sessions> {
    read_pairs_shared(payload).map(Sessions)
}

pub fn write_session(sessions: &Sessions) -> Vec<u8> {
    write_pairs_shared(&sessions.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_sessions() {
        let mut sessions = Sessions::new();
        sessions.push(0, 1000);
        sessions.push(1000, 500);

        let payload = write_session(&sessions);
        let decoded = read_session(&payload).unwrap();
        assert_eq!(decoded, sessions);
    }
}
