//! Token counting behind a single trait, so callers can swap the exact BPE
//! count for a cheap estimate.

use std::fmt;
use std::str::FromStr;

use crate::error::TokenizerError;
use crate::tiktoken::Tokenizer;

/// Bytes per token assumed by [`EstimatingCounter`].
const ESTIMATED_BYTES_PER_TOKEN: usize = 4;

/// Model whose encoding [`BpeCounter`] counts with.
pub const COUNTER_MODEL: &str = "gpt-5";

pub trait Counter: Send {
    fn count(&mut self, text: &str) -> usize;
}

/// Which counter to build.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum TokenizerKind {
    /// Byte-pair encoding, as used by recent OpenAI models.
    #[default]
    Bpe,
    /// Roughly four bytes per token.
    Estimate,
    /// Same as `bpe`.
    #[value(skip)]
    Default,
}

impl TokenizerKind {
    /// Values accepted on the command line. `default` is an alias and
    /// isn't listed.
    pub const VALID: &'static [&'static str] = &["bpe", "estimate"];

    pub fn as_str(self) -> &'static str {
        match self {
            TokenizerKind::Bpe => "bpe",
            TokenizerKind::Estimate => "estimate",
            TokenizerKind::Default => "default",
        }
    }
}

impl fmt::Display for TokenizerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid tokenizer {0:?}: must be one of {valid}", valid = TokenizerKind::VALID.join(", "))]
pub struct InvalidTokenizerKind(pub String);

impl FromStr for TokenizerKind {
    type Err = InvalidTokenizerKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bpe" => Ok(TokenizerKind::Bpe),
            "estimate" => Ok(TokenizerKind::Estimate),
            "default" => Ok(TokenizerKind::Default),
            other => Err(InvalidTokenizerKind(other.to_owned())),
        }
    }
}

/// `ceil(len / 4)` over the UTF-8 length of `text`.
pub fn estimate(text: &str) -> usize {
    text.len().div_ceil(ESTIMATED_BYTES_PER_TOKEN)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct EstimatingCounter;

impl Counter for EstimatingCounter {
    fn count(&mut self, text: &str) -> usize {
        estimate(text)
    }
}

/// Exact counts from the `o200k_base` tokenizer.
#[derive(Debug, Clone)]
pub struct BpeCounter {
    tokenizer: Tokenizer,
}

impl BpeCounter {
    pub fn new() -> Result<Self, TokenizerError> {
        Ok(BpeCounter {
            tokenizer: Tokenizer::for_model(COUNTER_MODEL, &[])?,
        })
    }

    pub fn with_tokenizer(tokenizer: Tokenizer) -> Self {
        BpeCounter { tokenizer }
    }
}

impl Counter for BpeCounter {
    fn count(&mut self, text: &str) -> usize {
        self.tokenizer.count(text)
    }
}

pub fn new_counter(kind: TokenizerKind) -> Result<Box<dyn Counter>, TokenizerError> {
    Ok(match kind {
        TokenizerKind::Estimate => Box::new(EstimatingCounter),
        TokenizerKind::Bpe | TokenizerKind::Default => Box::new(BpeCounter::new()?),
    })
}
