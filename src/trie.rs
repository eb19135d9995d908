//! Byte-sequence keyed map with allocation-free range lookups.
//!
//! Each level of the trie consumes up to six bytes of the key, packed into a
//! 48-bit integer by [`packed_key`]. Keys shorter than six remaining bytes
//! land in the level's leaf table; longer keys descend into a nested level
//! addressed by their first six bytes. Lookups take `(buf, start, end)` so
//! the merge engine can probe overlapping windows of one buffer without
//! slicing or copying.
use rustc_hash::FxHashMap;

const BYTES_PER_LEVEL: usize = 6;

/// Leaf addresses carry the window length above the 48 packed bits.
const LEN_SHIFT: u32 = 48;

#[inline(always)]
fn byte_at(buf: &[u8], index: usize) -> u64 {
    buf.get(index).copied().map_or(0, u64::from)
}

/// Pack the window `buf[start..end]` (at most its first six bytes) into a
/// 48-bit key: bytes 0..3 of the window in bits 0..24, bytes 3..6 in bits
/// 24..48, each half masked to the bytes the window actually has. Reads past
/// the end of `buf` contribute 0.
#[inline]
pub fn packed_key(buf: &[u8], start: usize, end: usize) -> u64 {
    let len = end.saturating_sub(start).min(BYTES_PER_LEVEL);

    let lower_mask = 0xFF_FFFFu64 >> (3usize.saturating_sub(len) * 8);
    let lower = (byte_at(buf, start)
        | (byte_at(buf, start + 1) << 8)
        | (byte_at(buf, start + 2) << 16))
        & lower_mask;

    let upper_shift = ((BYTES_PER_LEVEL - len) * 8).min(31);
    let upper_mask = 0xFF_FFFFu64 >> upper_shift;
    let upper = (byte_at(buf, start + 3)
        | (byte_at(buf, start + 4) << 8)
        | (byte_at(buf, start + 5) << 16))
        & upper_mask;

    lower + 0x100_0000 * upper
}

#[inline(always)]
fn leaf_key(buf: &[u8], start: usize, end: usize) -> u64 {
    packed_key(buf, start, end) | ((end - start) as u64) << LEN_SHIFT
}

#[derive(Debug, Clone)]
pub struct PackedTrie<V> {
    nested: FxHashMap<u64, PackedTrie<V>>,
    leaves: FxHashMap<u64, V>,
}

impl<V> Default for PackedTrie<V> {
    fn default() -> Self {
        PackedTrie {
            nested: FxHashMap::default(),
            leaves: FxHashMap::default(),
        }
    }
}

impl<V: Copy> PackedTrie<V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &[u8], value: V) {
        if key.len() < BYTES_PER_LEVEL {
            self.leaves.insert(leaf_key(key, 0, key.len()), value);
            return;
        }
        self.nested
            .entry(packed_key(key, 0, BYTES_PER_LEVEL))
            .or_default()
            .insert(&key[BYTES_PER_LEVEL..], value);
    }

    #[inline]
    pub fn get(&self, key: &[u8]) -> Option<V> {
        self.get_range(key, 0, key.len())
    }

    /// Look up the window `buf[start..end]`.
    pub fn get_range(&self, buf: &[u8], start: usize, end: usize) -> Option<V> {
        if end < start {
            return None;
        }
        let mut level = self;
        let mut start = start;
        while end - start >= BYTES_PER_LEVEL {
            level = level.nested.get(&packed_key(buf, start, end))?;
            start += BYTES_PER_LEVEL;
        }
        level.leaves.get(&leaf_key(buf, start, end)).copied()
    }

    /// Number of keys stored in this trie.
    pub fn len(&self) -> usize {
        self.leaves.len() + self.nested.values().map(PackedTrie::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.leaves.is_empty() && self.nested.values().all(PackedTrie::is_empty)
    }
}
