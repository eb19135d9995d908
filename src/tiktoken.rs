//! tiktoken-compatible byte-level BPE tokenizer.
//!
//! Text is split into spans at allowed special tokens; ordinary spans are
//! pre-tokenized into pieces by the encoding's regex, and each piece is
//! resolved through the LRU cache, then a direct vocabulary lookup, then the
//! byte-pair merge engine. The vocabulary lives in a packed-key trie so the
//! merge engine can probe sub-ranges of a piece without copying.
use std::borrow::Cow;
use std::fmt;
use std::num::NonZeroUsize;
use std::ops::ControlFlow;
use std::sync::Arc;

use fancy_regex::Regex;
use rustc_hash::{FxHashMap, FxHashSet};
use tracing::debug;

use crate::bpe::byte_pair_encode;
use crate::error::TokenizerError;
use crate::lru::LruCache;
use crate::pretokenize::{find_allowed_special, special_tokens_regex, Pieces, WhitespaceMode};
use crate::trie::PackedTrie;
use crate::Rank;

/// Cache capacity used when a tokenizer is built with a size of 0.
pub const DEFAULT_CACHE_SIZE: usize = 8192;

/// Token ids together with the slice of the input they stand for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncodeResult<'a> {
    pub token_ids: Vec<Rank>,
    pub text: Cow<'a, str>,
}

impl EncodeResult<'_> {
    fn empty() -> Self {
        EncodeResult {
            token_ids: Vec::new(),
            text: Cow::Borrowed(""),
        }
    }
}

/// Immutable tables shared by every clone of a tokenizer.
struct CoreBpe {
    piece_regex: Regex,
    whitespace: WhitespaceMode,
    encoder: PackedTrie<Rank>,
    decoder: FxHashMap<Rank, Vec<u8>>,
    special_regex: Option<Regex>,
    special_encoder: FxHashMap<String, Rank>,
    special_decoder: FxHashMap<Rank, String>,
}

impl CoreBpe {
    /// Ids for one piece, memoized in `cache`.
    fn piece_ids<'c>(&self, cache: &'c mut LruCache, piece: &str) -> &'c [Rank] {
        if cache.get(piece).is_none() {
            let bytes = piece.as_bytes();
            let ids = match self.encoder.get(bytes) {
                Some(id) => vec![id],
                None => byte_pair_encode(bytes, &self.encoder, bytes.len()),
            };
            cache.insert(piece, ids);
        }
        cache.get(piece).unwrap_or_default()
    }

    /// Walk `text` as a sequence of spans (pieces and allowed special
    /// tokens) that together cover it, handing each span and its ids to
    /// `visit` until it breaks.
    fn scan<'t, F>(&self, cache: &mut LruCache, text: &'t str, allowed_special: &[&str], mut visit: F)
    where
        F: FnMut(&'t str, &[Rank]) -> ControlFlow<()>,
    {
        let allowed: FxHashSet<&str> = allowed_special.iter().copied().collect();
        let mut start = 0;

        loop {
            let special = find_allowed_special(self.special_regex.as_ref(), text, start, &allowed);
            let end = special.map_or(text.len(), |(pos, _)| pos);

            for piece in Pieces::new(&self.piece_regex, self.whitespace, &text[start..end]) {
                let ids = self.piece_ids(cache, piece);
                if visit(piece, ids).is_break() {
                    return;
                }
            }

            let Some((pos, literal)) = special else {
                return;
            };
            if let Some(id) = self.special_encoder.get(literal) {
                if visit(literal, std::slice::from_ref(id)).is_break() {
                    return;
                }
            }
            start = pos + literal.len();
            if start >= text.len() {
                return;
            }
        }
    }

    fn token_bytes(&self, id: Rank) -> Option<&[u8]> {
        self.decoder
            .get(&id)
            .map(Vec::as_slice)
            .or_else(|| self.special_decoder.get(&id).map(String::as_bytes))
    }

    fn decode_bytes(&self, ids: &[Rank]) -> Vec<u8> {
        let mut out = Vec::with_capacity(ids.len() * 4);
        for &id in ids {
            if let Some(bytes) = self.token_bytes(id) {
                out.extend_from_slice(bytes);
            }
        }
        out
    }
}

/// A BPE tokenizer with its own piece cache.
///
/// Encoding needs `&mut self` because every call updates the cache. Clones
/// share the vocabulary tables and start with an empty cache, so a pool of
/// workers can each own one.
pub struct Tokenizer {
    core: Arc<CoreBpe>,
    cache: LruCache,
}

impl Tokenizer {
    /// Build a tokenizer from a rank table, special tokens and a piece
    /// pattern. A `cache_size` of 0 selects [`DEFAULT_CACHE_SIZE`].
    pub fn new(
        ranks: FxHashMap<Vec<u8>, Rank>,
        special_tokens: FxHashMap<String, Rank>,
        pattern: &str,
        cache_size: usize,
    ) -> Result<Self, TokenizerError> {
        let piece_regex =
            Regex::new(&format!("^(?:{pattern})")).map_err(TokenizerError::PieceRegex)?;
        let special_regex = special_tokens_regex(special_tokens.keys().map(String::as_str))
            .map_err(TokenizerError::SpecialRegex)?;

        let mut encoder = PackedTrie::new();
        let mut decoder = FxHashMap::with_capacity_and_hasher(ranks.len(), Default::default());
        let encoder_len = ranks.len();
        for (bytes, rank) in ranks {
            encoder.insert(&bytes, rank);
            decoder.insert(rank, bytes);
        }
        if decoder.len() != encoder_len {
            return Err(TokenizerError::CardinalityMismatch {
                encoder: encoder_len,
                decoder: decoder.len(),
            });
        }

        let special_decoder = special_tokens
            .iter()
            .map(|(literal, &id)| (id, literal.clone()))
            .collect();
        let whitespace = WhitespaceMode::for_pattern(pattern);
        let capacity = NonZeroUsize::new(cache_size)
            .or(NonZeroUsize::new(DEFAULT_CACHE_SIZE))
            .unwrap_or(NonZeroUsize::MIN);

        debug!(
            vocab = decoder.len(),
            special = special_tokens.len(),
            ?whitespace,
            cache = capacity.get(),
            "built tokenizer"
        );

        Ok(Tokenizer {
            core: Arc::new(CoreBpe {
                piece_regex,
                whitespace,
                encoder,
                decoder,
                special_regex,
                special_encoder: special_tokens,
                special_decoder,
            }),
            cache: LruCache::new(capacity),
        })
    }

    /// Encode `text`. Special-token literals listed in `allowed_special`
    /// become their reserved ids; any other occurrence is encoded as text.
    pub fn encode(&mut self, text: &str, allowed_special: &[&str]) -> Vec<Rank> {
        let Tokenizer { core, cache } = self;
        let mut ids = Vec::new();
        core.scan(cache, text, allowed_special, |_, span_ids| {
            ids.extend_from_slice(span_ids);
            ControlFlow::Continue(())
        });
        ids
    }

    /// Encode with no special tokens recognized.
    pub fn encode_ordinary(&mut self, text: &str) -> Vec<Rank> {
        self.encode(text, &[])
    }

    /// Number of tokens in `text`, with no special tokens recognized.
    pub fn count(&mut self, text: &str) -> usize {
        let Tokenizer { core, cache } = self;
        let mut total = 0;
        core.scan(cache, text, &[], |_, span_ids| {
            total += span_ids.len();
            ControlFlow::Continue(())
        });
        total
    }

    /// Concatenated bytes of `ids`. Ids that are neither in the vocabulary
    /// nor special tokens are skipped.
    pub fn decode_bytes(&self, ids: &[Rank]) -> Vec<u8> {
        self.core.decode_bytes(ids)
    }

    /// Decode `ids` to text, replacing invalid UTF-8 with U+FFFD.
    pub fn decode(&self, ids: &[Rank]) -> String {
        String::from_utf8_lossy(&self.decode_bytes(ids)).into_owned()
    }

    /// Encode at most the first `max_tokens` tokens of `text`.
    ///
    /// The returned text is the prefix of `text` the ids cover. When the
    /// budget runs out inside a piece, it extends to the end of the last
    /// character the kept ids touch.
    pub fn encode_trim_suffix<'a>(
        &mut self,
        text: &'a str,
        max_tokens: usize,
        allowed_special: &[&str],
    ) -> EncodeResult<'a> {
        if max_tokens == 0 {
            return EncodeResult::empty();
        }

        let Tokenizer { core, cache } = self;
        let core = core.as_ref();
        let mut ids = Vec::new();
        let mut consumed = 0;
        core.scan(cache, text, allowed_special, |span, span_ids| {
            let room = max_tokens - ids.len();
            if span_ids.len() <= room {
                ids.extend_from_slice(span_ids);
                consumed += span.len();
            } else {
                let kept = &span_ids[..room];
                ids.extend_from_slice(kept);
                let covered: usize = kept
                    .iter()
                    .filter_map(|&id| core.token_bytes(id))
                    .map(<[u8]>::len)
                    .sum();
                consumed += ceil_char_boundary(span, covered);
            }
            if ids.len() >= max_tokens {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            }
        });

        EncodeResult {
            token_ids: ids,
            text: Cow::Borrowed(&text[..consumed]),
        }
    }

    /// Encode at most the last `max_tokens` tokens of `text`.
    ///
    /// The cut is made at a piece or special-token boundary when one lands
    /// exactly on the budget, and the returned text is then the matching
    /// suffix of `text`. Otherwise the trailing ids are sliced out of the
    /// full encoding and the text is their decoding.
    pub fn encode_trim_prefix<'a>(
        &mut self,
        text: &'a str,
        max_tokens: usize,
        allowed_special: &[&str],
    ) -> EncodeResult<'a> {
        let Tokenizer { core, cache } = self;
        let mut ids = Vec::new();
        let mut consumed = 0;
        // (ids so far, bytes so far) after each span
        let mut checkpoints = vec![(0usize, 0usize)];
        core.scan(cache, text, allowed_special, |span, span_ids| {
            ids.extend_from_slice(span_ids);
            consumed += span.len();
            checkpoints.push((ids.len(), consumed));
            ControlFlow::Continue(())
        });

        let total = ids.len();
        if total <= max_tokens {
            return EncodeResult {
                token_ids: ids,
                text: Cow::Borrowed(text),
            };
        }
        if max_tokens == 0 {
            return EncodeResult::empty();
        }

        let skip = total - max_tokens;
        match checkpoints.iter().find(|&&(count, _)| count >= skip) {
            Some(&(count, offset)) if count == skip => EncodeResult {
                token_ids: ids.split_off(count),
                text: Cow::Borrowed(&text[offset..]),
            },
            _ => {
                debug!(total, max_tokens, "no span boundary at budget, slicing ids");
                let token_ids = ids.split_off(skip);
                let text = String::from_utf8_lossy(&core.decode_bytes(&token_ids)).into_owned();
                EncodeResult {
                    token_ids,
                    text: Cow::Owned(text),
                }
            }
        }
    }

    /// Drop every cached piece.
    pub fn clear_cache(&mut self) {
        self.cache.clear();
    }

    /// Number of pieces currently cached.
    pub fn cache_len(&self) -> usize {
        self.cache.len()
    }

    /// Number of entries in the rank table, special tokens excluded.
    pub fn vocab_size(&self) -> usize {
        self.core.decoder.len()
    }

    pub fn special_tokens(&self) -> &FxHashMap<String, Rank> {
        &self.core.special_encoder
    }
}

impl fmt::Debug for Tokenizer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tokenizer")
            .field("vocab_size", &self.vocab_size())
            .field("special_tokens", &self.core.special_encoder.len())
            .field("whitespace", &self.core.whitespace)
            .field("cached", &self.cache.len())
            .finish_non_exhaustive()
    }
}

impl Clone for Tokenizer {
    fn clone(&self) -> Self {
        Tokenizer {
            core: Arc::clone(&self.core),
            cache: LruCache::new(self.cache.capacity()),
        }
    }
}

/// Smallest char boundary of `s` at or after `index`.
fn ceil_char_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while !s.is_char_boundary(index) {
        index += 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::O200K_BASE_PATTERN;

    const EOT: &str = "<|endoftext|>";
    const EOP: &str = "<|endofprompt|>";

    /// Every single byte at its own value, then `merges` from 256 upwards.
    fn ranks(merges: &[&str]) -> FxHashMap<Vec<u8>, Rank> {
        let mut ranks: FxHashMap<Vec<u8>, Rank> =
            (0..=255u8).map(|b| (vec![b], Rank::from(b))).collect();
        for (i, merge) in merges.iter().enumerate() {
            ranks.insert(merge.as_bytes().to_vec(), 256 + i as Rank);
        }
        ranks
    }

    fn special(tokens: &[(&str, Rank)]) -> FxHashMap<String, Rank> {
        tokens.iter().map(|&(s, id)| (s.to_owned(), id)).collect()
    }

    /// "hello" -> 259, " world" -> 264
    fn hello_world() -> Tokenizer {
        Tokenizer::new(
            ranks(&["he", "ll", "llo", "hello", " w", "or", " wor", "ld", " world"]),
            special(&[(EOT, 1000), (EOP, 1001)]),
            O200K_BASE_PATTERN,
            0,
        )
        .unwrap()
    }

    /// Splits on whitespace boundaries; "abcd" encodes as ["ab", "cd"].
    fn ab_cd() -> Tokenizer {
        Tokenizer::new(ranks(&["ab", "cd"]), FxHashMap::default(), r"\S+|\s+", 16).unwrap()
    }

    #[test]
    fn test_encode_decode() {
        let mut tokenizer = hello_world();
        let ids = tokenizer.encode("hello world", &[]);
        assert_eq!(ids, vec![259, 264]);
        assert_eq!(tokenizer.decode(&ids), "hello world");
        assert_eq!(tokenizer.count("hello world"), 2);
    }

    #[test]
    fn test_empty_text() {
        let mut tokenizer = hello_world();
        assert!(tokenizer.encode("", &[EOT]).is_empty());
        assert_eq!(tokenizer.decode(&[]), "");
    }

    #[test]
    fn test_allowed_special_token() {
        let mut tokenizer = hello_world();
        let ids = tokenizer.encode("hello<|endoftext|> world", &[EOT]);
        assert_eq!(ids, vec![259, 1000, 264]);
        assert_eq!(tokenizer.decode(&ids), "hello<|endoftext|> world");
    }

    #[test]
    fn test_special_token_at_edges() {
        let mut tokenizer = hello_world();
        assert_eq!(tokenizer.encode("<|endoftext|>", &[EOT]), vec![1000]);
        assert_eq!(
            tokenizer.encode("<|endofprompt|>hello<|endoftext|>", &[EOT, EOP]),
            vec![1001, 259, 1000]
        );
        assert_eq!(
            tokenizer.encode("<|endoftext|><|endoftext|>", &[EOT]),
            vec![1000, 1000]
        );
    }

    #[test]
    fn test_disallowed_special_token_is_text() {
        let mut tokenizer = hello_world();
        let text = "hello<|endoftext|>";
        let ids = tokenizer.encode(text, &[EOP]);
        assert!(!ids.contains(&1000));
        assert_eq!(tokenizer.decode(&ids), text);
        assert_eq!(tokenizer.encode_ordinary(text), ids);
    }

    #[test]
    fn test_special_longest_match() {
        let mut tokenizer = Tokenizer::new(
            ranks(&[]),
            special(&[("A", 1000), ("AB", 1001)]),
            O200K_BASE_PATTERN,
            0,
        )
        .unwrap();
        assert_eq!(tokenizer.encode("xAB", &["A", "AB"]), vec![u32::from(b'x'), 1001]);
        assert_eq!(tokenizer.encode("xA", &["A", "AB"]), vec![u32::from(b'x'), 1000]);
    }

    #[test]
    fn test_decode_skips_unknown_ids() {
        let tokenizer = hello_world();
        assert_eq!(tokenizer.decode(&[259, 99_999, 1000]), "hello<|endoftext|>");
    }

    #[test]
    fn test_decode_invalid_utf8_is_lossy() {
        let tokenizer = hello_world();
        assert_eq!(tokenizer.decode_bytes(&[0xC3]), vec![0xC3]);
        assert_eq!(tokenizer.decode(&[0xC3]), "\u{FFFD}");
        assert_eq!(tokenizer.decode(&[0xC3, 0xA9]), "é");
    }

    #[test]
    fn test_cardinality_mismatch() {
        let mut ranks = FxHashMap::default();
        ranks.insert(b"a".to_vec(), 1);
        ranks.insert(b"b".to_vec(), 1);
        let err = Tokenizer::new(ranks, FxHashMap::default(), r"\S+", 0).err().unwrap();
        assert!(matches!(
            err,
            TokenizerError::CardinalityMismatch { encoder: 2, decoder: 1 }
        ));
    }

    #[test]
    fn test_bad_pattern() {
        let err = Tokenizer::new(ranks(&[]), FxHashMap::default(), "(", 0).err().unwrap();
        assert!(matches!(err, TokenizerError::PieceRegex(_)));
    }

    #[test]
    fn test_cache_is_transparent() {
        let mut tokenizer = hello_world();
        let text = "hello world, hello   world\n\nhello";
        let cold = tokenizer.encode(text, &[]);
        assert!(tokenizer.cache_len() > 0);
        let warm = tokenizer.encode(text, &[]);
        assert_eq!(cold, warm);

        tokenizer.clear_cache();
        assert_eq!(tokenizer.cache_len(), 0);
        assert_eq!(tokenizer.encode(text, &[]), cold);
    }

    #[test]
    fn test_clone_has_fresh_cache() {
        let mut tokenizer = hello_world();
        let ids = tokenizer.encode("hello world", &[]);
        let mut clone = tokenizer.clone();
        assert_eq!(clone.cache_len(), 0);
        assert_eq!(clone.vocab_size(), tokenizer.vocab_size());
        assert_eq!(clone.encode("hello world", &[]), ids);
    }

    #[test]
    fn test_small_cache_still_encodes() {
        let mut tokenizer = Tokenizer::new(ranks(&["ab"]), FxHashMap::default(), r"\S+|\s+", 1).unwrap();
        let ids = tokenizer.encode("ab ab ba ab", &[]);
        assert_eq!(tokenizer.decode(&ids), "ab ab ba ab");
        assert_eq!(tokenizer.cache_len(), 1);
    }

    #[test]
    fn test_trim_suffix() {
        let mut tokenizer = hello_world();
        let result = tokenizer.encode_trim_suffix("hello world", 1, &[]);
        assert_eq!(result.token_ids, vec![259]);
        assert_eq!(result.text, "hello");

        let result = tokenizer.encode_trim_suffix("hello world", 5, &[]);
        assert_eq!(result.token_ids, vec![259, 264]);
        assert_eq!(result.text, "hello world");

        assert_eq!(tokenizer.encode_trim_suffix("hello world", 0, &[]), EncodeResult::empty());
    }

    #[test]
    fn test_trim_suffix_cuts_inside_piece() {
        let mut tokenizer = ab_cd();
        let result = tokenizer.encode_trim_suffix("abcd abcd", 3, &[]);
        assert_eq!(result.token_ids, vec![256, 257, u32::from(b' ')]);
        assert_eq!(result.text, "abcd ");

        let result = tokenizer.encode_trim_suffix("abcd", 1, &[]);
        assert_eq!(result.token_ids, vec![256]);
        assert_eq!(result.text, "ab");
    }

    #[test]
    fn test_trim_suffix_text_ends_on_char_boundary() {
        let mut tokenizer = ab_cd();
        let result = tokenizer.encode_trim_suffix("éa", 1, &[]);
        assert_eq!(result.token_ids, vec![0xC3]);
        assert_eq!(result.text, "é");
    }

    #[test]
    fn test_trim_suffix_stops_at_special() {
        let mut tokenizer = hello_world();
        let result = tokenizer.encode_trim_suffix("hello<|endoftext|> world", 2, &[EOT]);
        assert_eq!(result.token_ids, vec![259, 1000]);
        assert_eq!(result.text, "hello<|endoftext|>");
    }

    #[test]
    fn test_trim_prefix_at_piece_boundary() {
        let mut tokenizer = hello_world();
        let result = tokenizer.encode_trim_prefix("hello world", 1, &[]);
        assert_eq!(result.token_ids, vec![264]);
        assert_eq!(result.text, " world");
        assert!(matches!(result.text, Cow::Borrowed(_)));

        let result = tokenizer.encode_trim_prefix("hello world", 2, &[]);
        assert_eq!(result.token_ids, vec![259, 264]);
        assert_eq!(result.text, "hello world");

        assert_eq!(tokenizer.encode_trim_prefix("hello world", 0, &[]), EncodeResult::empty());
    }

    #[test]
    fn test_trim_prefix_falls_back_to_slicing() {
        let mut tokenizer = ab_cd();
        // ids: [ab, cd, ' ', ab, cd], span ends at 2, 3, 5
        let full = tokenizer.encode("abcd abcd", &[]);
        assert_eq!(full, vec![256, 257, 32, 256, 257]);

        let result = tokenizer.encode_trim_prefix("abcd abcd", 1, &[]);
        assert_eq!(result.token_ids, vec![257]);
        assert_eq!(result.text, "cd");
        assert!(matches!(result.text, Cow::Owned(_)));

        let result = tokenizer.encode_trim_prefix("abcd abcd", 4, &[]);
        assert_eq!(result.token_ids, vec![257, 32, 256, 257]);
        assert_eq!(result.text, "cd abcd");
    }

    #[test]
    fn test_trim_prefix_both_paths_keep_trailing_ids() {
        let mut tokenizer = ab_cd();
        let text = "abcd abcd";
        let full = tokenizer.encode(text, &[]);
        for max in 1..=full.len() {
            let result = tokenizer.encode_trim_prefix(text, max, &[]);
            assert_eq!(result.token_ids, &full[full.len() - max..], "max {max}");
            assert_eq!(result.text, tokenizer.decode(&result.token_ids), "max {max}");
        }
    }

    #[test]
    fn test_trim_prefix_with_special() {
        let mut tokenizer = hello_world();
        let result = tokenizer.encode_trim_prefix("hello<|endoftext|> world", 2, &[EOT]);
        assert_eq!(result.token_ids, vec![1000, 264]);
        assert_eq!(result.text, "<|endoftext|> world");
    }

    #[test]
    fn test_ceil_char_boundary() {
        assert_eq!(ceil_char_boundary("éa", 0), 0);
        assert_eq!(ceil_char_boundary("éa", 1), 2);
        assert_eq!(ceil_char_boundary("éa", 2), 2);
        assert_eq!(ceil_char_boundary("éa", 10), 3);
    }
}
