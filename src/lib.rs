//! Offline `o200k_base` tokenizer and token counter.
//!
//! A byte-level BPE encoder that produces the same ids as tiktoken for the
//! `o200k_base` encoding, plus the budget-bounded encode variants and
//! counters used to size prompts without calling a remote API.
//!
//! ```no_run
//! use waza_tokens::Tokenizer;
//!
//! let mut tokenizer = Tokenizer::for_model("gpt-5", &[])?;
//! let ids = tokenizer.encode("hello world", &[]);
//! assert_eq!(tokenizer.decode(&ids), "hello world");
//!
//! let head = tokenizer.encode_trim_suffix("hello world", 1, &[]);
//! assert_eq!(head.text, "hello");
//! # Ok::<(), waza_tokens::TokenizerError>(())
//! ```

pub mod bpe;
pub mod counter;
pub mod encoding;
pub mod error;
pub mod lru;
pub mod pretokenize;
pub mod tiktoken;
pub mod trie;
pub mod vocab;

/// Token id, which is also the merge priority of its byte sequence.
pub type Rank = u32;

pub use counter::{new_counter, BpeCounter, Counter, EstimatingCounter, TokenizerKind};
pub use encoding::{encoding_for_model, Encoding};
pub use error::{TokenizerError, VocabError};
pub use tiktoken::{EncodeResult, Tokenizer, DEFAULT_CACHE_SIZE};
