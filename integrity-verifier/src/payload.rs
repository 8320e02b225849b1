use std::ops::Range;

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};

use crate::errors::VerifyErr;

pub const DEFAULT_CHUNK_SIZE: usize = 512 * 1024;
pub const DEFAULT_CHUNK_COUNT: usize = 4;

/// How a payload is split into equally sized, contiguous blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkLayout {
    chunk_size: usize,
    chunk_count: usize,
}

impl Default for ChunkLayout {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_count: DEFAULT_CHUNK_COUNT,
        }
    }
}

impl ChunkLayout {
    pub fn new(chunk_size: usize, chunk_count: usize) -> Result<Self, VerifyErr> {
        if chunk_size == 0 || chunk_count == 0 {
            return Err(VerifyErr::InvalidLayout(format!(
                "chunk size ({chunk_size}) and chunk count ({chunk_count}) must both be positive"
            )));
        }
        if chunk_size.checked_mul(chunk_count).is_none() {
            return Err(VerifyErr::InvalidLayout(format!(
                "{chunk_count} chunks of {chunk_size} bytes do not fit in memory"
            )));
        }
        Ok(Self { chunk_size, chunk_count })
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_count(&self) -> usize {
        self.chunk_count
    }

    pub fn total_len(&self) -> usize {
        self.chunk_size * self.chunk_count
    }

    /// Byte range of block `index`, or `None` past the last block.
    pub fn window(&self, index: usize) -> Option<Range<usize>> {
        if index >= self.chunk_count {
            return None;
        }
        let start = index * self.chunk_size;
        Some(start..start + self.chunk_size)
    }

    pub fn windows(&self) -> impl Iterator<Item = (usize, Range<usize>)> + '_ {
        (0..self.chunk_count).filter_map(move |i| self.window(i).map(|w| (i, w)))
    }
}

/// The bytes uploaded and later compared against, plus the seed that produced them.
#[derive(Debug, Clone)]
pub struct Payload {
    data: Bytes,
    seed: Option<u64>,
}

impl Payload {
    /// Fills `layout.total_len()` bytes from a PRNG. A random seed is drawn when none is given.
    pub fn generate(layout: &ChunkLayout, seed: Option<u64>) -> Self {
        let seed = seed.unwrap_or_else(rand::random);
        let mut data = vec![0u8; layout.total_len()];
        StdRng::seed_from_u64(seed).fill_bytes(&mut data);
        Self {
            data: Bytes::from(data),
            seed: Some(seed),
        }
    }

    pub fn from_bytes(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            seed: None,
        }
    }

    pub fn bytes(&self) -> &Bytes {
        &self.data
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn seed(&self) -> Option<u64> {
        self.seed
    }

    /// The blocks of `layout` must cover this payload exactly.
    pub fn check_layout(&self, layout: &ChunkLayout) -> Result<(), VerifyErr> {
        if layout.total_len() != self.data.len() {
            return Err(VerifyErr::InvalidLayout(format!(
                "{} chunks of {} bytes cover {} bytes but the payload is {} bytes",
                layout.chunk_count(),
                layout.chunk_size(),
                layout.total_len(),
                self.data.len()
            )));
        }
        Ok(())
    }

    /// Block `index` of this payload under `layout`.
    pub fn chunk(&self, layout: &ChunkLayout, index: usize) -> Option<&[u8]> {
        let window = layout.window(index)?;
        self.data.get(window)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_windows_tile_the_payload() {
        let layout = ChunkLayout::new(5, 4).unwrap();
        let windows: Vec<_> = layout.windows().collect();
        assert_eq!(windows.len(), 4);

        let mut expected_start = 0;
        for (i, window) in windows {
            assert_eq!(window.start, expected_start);
            assert_eq!(window.len(), 5);
            assert_eq!(layout.window(i), Some(window.clone()));
            expected_start = window.end;
        }
        assert_eq!(expected_start, layout.total_len());
        assert_eq!(layout.window(4), None);
    }

    #[test]
    fn test_default_layout_is_two_mebibytes() {
        let layout = ChunkLayout::default();
        assert_eq!(layout.chunk_size(), 512 * 1024);
        assert_eq!(layout.chunk_count(), 4);
        assert_eq!(layout.total_len(), 2 * 1024 * 1024);
    }

    #[test]
    fn test_rejects_degenerate_layouts() {
        assert!(matches!(ChunkLayout::new(0, 4), Err(VerifyErr::InvalidLayout(_))));
        assert!(matches!(ChunkLayout::new(4, 0), Err(VerifyErr::InvalidLayout(_))));
        assert!(matches!(ChunkLayout::new(usize::MAX, 2), Err(VerifyErr::InvalidLayout(_))));
    }

    #[test]
    fn test_seeded_payload_is_reproducible() {
        let layout = ChunkLayout::new(64, 3).unwrap();
        let a = Payload::generate(&layout, Some(42));
        let b = Payload::generate(&layout, Some(42));
        let c = Payload::generate(&layout, Some(43));

        assert_eq!(a.len(), 192);
        assert_eq!(a.bytes(), b.bytes());
        assert_ne!(a.bytes(), c.bytes());
        assert_eq!(a.seed(), Some(42));
        assert!(Payload::generate(&layout, None).seed().is_some());
    }

    #[test]
    fn test_chunks_concatenate_to_payload() {
        let layout = ChunkLayout::new(16, 4).unwrap();
        let payload = Payload::generate(&layout, Some(7));
        let joined: Vec<u8> = (0..4)
            .flat_map(|i| payload.chunk(&layout, i).unwrap().to_vec())
            .collect();
        assert_eq!(joined, payload.bytes().as_ref());
        assert!(payload.chunk(&layout, 4).is_none());
    }

    #[test]
    fn test_layout_must_match_payload() {
        let layout = ChunkLayout::new(10, 2).unwrap();
        assert!(Payload::from_bytes(vec![0u8; 20]).check_layout(&layout).is_ok());
        assert!(matches!(
            Payload::from_bytes(vec![0u8; 21]).check_layout(&layout),
            Err(VerifyErr::InvalidLayout(_))
        ));
    }
}
