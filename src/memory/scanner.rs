//! First-match byte scanning over bounded ranges

use crate::error::Result;
use crate::memory::space::{Address, Range};

/// bytes read per probe when walking a range
const CHUNK_SIZE: usize = 0x10000;

/// first-match scanner over a bounded range in any space
pub struct Scanner<'s> {
    range: Range<'s>,
}

impl<'s> Scanner<'s> {
    pub fn new(range: Range<'s>) -> Self {
        Self { range }
    }

    /// find the first occurrence of `needle`, returning its absolute address
    ///
    /// the range is read in chunks that overlap by `needle.len() - 1` bytes
    /// so a match straddling a chunk boundary is still seen
    pub fn find(&self, needle: &[u8]) -> Result<Option<Address<'s>>> {
        if needle.is_empty() || needle.len() > self.range.len {
            return Ok(None);
        }

        let space = self.range.base.space;
        let start = self.range.base.addr;
        let end = self.range.end();
        let overlap = needle.len() - 1;

        let mut chunk_start = start;
        while chunk_start + needle.len() <= end {
            let chunk_len = CHUNK_SIZE.min(end - chunk_start);
            let chunk = space.read_vec(chunk_start, chunk_len)?;

            if let Some(pos) = find_in_slice(&chunk, needle) {
                return Ok(Some(space.at(chunk_start + pos)));
            }

            if chunk_start + chunk_len >= end {
                break;
            }
            chunk_start += chunk_len - overlap;
        }

        Ok(None)
    }
}

/// naive first-match search within a local slice
pub fn find_in_slice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}
