//! Byte-pair merge over a single pre-tokenized piece.
//!
//! Parts start as single bytes. `bounds[i]..bounds[i + 1]` is the i-th part;
//! `ranks[bounds[i]]` holds the rank of merging part i with part i + 1. Each
//! round merges the leftmost pair with the lowest rank, refreshes the two
//! ranks that touch the merge point, and drops the inner boundary, until no
//! adjacent pair is in the vocabulary.
use crate::trie::PackedTrie;
use crate::Rank;

const NO_RANK: Rank = Rank::MAX;

pub fn byte_pair_encode(piece: &[u8], ranks: &PackedTrie<Rank>, len: usize) -> Vec<Rank> {
    let len = len.min(piece.len());
    if len == 0 {
        return Vec::new();
    }
    if len == 1 {
        return ranks.get_range(piece, 0, 1).into_iter().collect();
    }

    let mut bounds: Vec<usize> = (0..=len).collect();
    let mut pair_ranks = vec![NO_RANK; len + 1];
    for (i, rank) in pair_ranks.iter_mut().enumerate().take(len - 1) {
        *rank = ranks.get_range(piece, i, i + 2).unwrap_or(NO_RANK);
    }

    // Rank of the span starting at part `i` and ending after part `i + 2`,
    // i.e. part i joined with the two parts that follow it.
    let span_rank = |bounds: &[usize], i: usize| -> Rank {
        if i + 3 < bounds.len() {
            ranks
                .get_range(piece, bounds[i], bounds[i + 3])
                .unwrap_or(NO_RANK)
        } else {
            NO_RANK
        }
    };

    while let Some(i) = min_pair(&bounds, &pair_ranks) {
        pair_ranks[bounds[i]] = span_rank(&bounds, i);
        if i > 0 {
            pair_ranks[bounds[i - 1]] = span_rank(&bounds, i - 1);
        }
        bounds.remove(i + 1);
    }

    let mut out = Vec::with_capacity(bounds.len() - 1);
    for w in bounds.windows(2) {
        match ranks.get_range(piece, w[0], w[1]) {
            Some(token) => out.push(token),
            None => break,
        }
    }
    out
}

/// Index of the leftmost part whose merge with its right neighbour has the
/// lowest finite rank.
#[inline]
fn min_pair(bounds: &[usize], pair_ranks: &[Rank]) -> Option<usize> {
    let mut best: Option<(Rank, usize)> = None;
    for (i, &b) in bounds[..bounds.len() - 1].iter().enumerate() {
        let rank = pair_ranks[b];
        if rank != NO_RANK && best.map_or(true, |(r, _)| rank < r) {
            best = Some((rank, i));
        }
    }
    best.map(|(_, i)| i)
}
