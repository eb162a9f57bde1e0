//! Overlapping character-window splitter.
//!
//! Windows are measured in Unicode scalar values. A window ends at the last
//! whitespace run inside it when that keeps more than `overlap` chars of new
//! text, otherwise it is cut hard at `chunk_size`. The next window starts
//! exactly `overlap` chars before the previous end, so dropping the first
//! `overlap` chars of every chunk but the first reconstructs the input.

use crate::error::{Error, Result};
use crate::types::Chunk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextSplitter {
    chunk_size: usize,
    overlap: usize,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self> {
        if overlap == 0 || overlap >= chunk_size {
            return Err(Error::InvalidConfig(format!(
                "chunking requires 0 < overlap < chunk_size (got overlap={overlap}, chunk_size={chunk_size})"
            )));
        }
        Ok(Self { chunk_size, overlap })
    }

    pub fn chunk_size(&self) -> usize { self.chunk_size }
    pub fn overlap(&self) -> usize { self.overlap }

    pub fn split(&self, text: &str) -> Vec<Chunk> {
        let chars: Vec<char> = text.chars().collect();
        let n = chars.len();
        let mut chunks = Vec::new();
        let mut start = 0usize;
        while start < n {
            let hard_end = (start + self.chunk_size).min(n);
            let end = if hard_end == n { n } else { self.soft_end(&chars, start, hard_end) };
            chunks.push(Chunk::new(chunks.len(), Some(start), chars[start..end].iter().collect::<String>()));
            if end == n {
                break;
            }
            start = end - self.overlap;
        }
        chunks
    }

    /// Position just after the last whitespace char in `(start + overlap, hard_end]`.
    fn soft_end(&self, chars: &[char], start: usize, hard_end: usize) -> usize {
        let floor = start + self.overlap;
        (floor + 1..=hard_end)
            .rev()
            .find(|&end| chars[end - 1].is_whitespace())
            .unwrap_or(hard_end)
    }
}

/// Split `text` with a fresh splitter. See [`TextSplitter`].
pub fn split(text: &str, chunk_size: usize, overlap: usize) -> Result<Vec<Chunk>> {
    Ok(TextSplitter::new(chunk_size, overlap)?.split(text))
}
