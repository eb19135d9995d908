//! Error types for vocabulary loading and tokenizer construction.
//!
//! Only construction can fail. Once a [`Tokenizer`](crate::Tokenizer) exists,
//! every encode and decode call is total.

/// Errors raised while parsing a `.tiktoken` vocabulary.
#[derive(Debug, thiserror::Error)]
pub enum VocabError {
    /// A line did not split into exactly a token and a rank.
    #[error("line {line}: expected `<base64 token> <rank>`, found {fields} field(s)")]
    Format { line: usize, fields: usize },

    /// The token field is not standard base64.
    #[error("line {line}: invalid base64 token {token:?}: {source}")]
    Base64 {
        line: usize,
        token: String,
        #[source]
        source: base64::DecodeError,
    },

    /// The rank field is not a non-negative integer.
    #[error("line {line}: can't parse rank {rank:?}")]
    Rank { line: usize, rank: String },

    /// The vocabulary file could not be read.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while building a [`Tokenizer`](crate::Tokenizer).
#[derive(Debug, thiserror::Error)]
pub enum TokenizerError {
    /// The piece-splitting pattern does not compile.
    #[error("failed to compile piece regex pattern: {0}")]
    PieceRegex(#[source] fancy_regex::Error),

    /// The alternation built from the special-token literals does not compile.
    #[error("failed to compile special token regex: {0}")]
    SpecialRegex(#[source] fancy_regex::Error),

    /// Two byte sequences share a rank, so ids can't be decoded unambiguously.
    #[error("encoder and decoder sizes do not match ({encoder} vs {decoder})")]
    CardinalityMismatch { encoder: usize, decoder: usize },

    /// No exact name or prefix rule maps the model to an encoding.
    #[error("doesn't support this model [{0}]")]
    UnknownModel(String),

    /// The encoding name is not one this crate ships.
    #[error("{0} encoding isn't supported")]
    UnsupportedEncoding(String),

    /// The vocabulary resource was not present at build time.
    #[error("vocabulary {0} was not embedded at build time (set WAZA_TOKENS_VOCAB_DIR or add it to data/)")]
    VocabularyNotEmbedded(&'static str),

    /// The vocabulary resource failed to parse.
    #[error("vocabulary: {0}")]
    Vocab(#[from] VocabError),
}
