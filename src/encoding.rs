//! Named encodings, model resolution and the tokenizer constructors built on
//! them.

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use rustc_hash::FxHashMap;

use crate::error::TokenizerError;
use crate::tiktoken::{Tokenizer, DEFAULT_CACHE_SIZE};
use crate::vocab;
use crate::Rank;

mod embedded {
    include!(concat!(env!("OUT_DIR"), "/embedded_vocab.rs"));
}

/// Piece pattern of `o200k_base`. The trailing `\s+(?!\S)` branch of the
/// published pattern is emulated by the pre-tokenizer instead.
pub const O200K_BASE_PATTERN: &str = concat!(
    r"[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]*[\p{Ll}\p{Lm}\p{Lo}\p{M}]+",
    r"(?:'s|'S|'t|'T|'re|'RE|'Re|'eR|'ve|'VE|'vE|'Ve|'m|'M|'ll|'lL|'Ll|'LL|'d|'D)?",
    r"|[^\r\n\p{L}\p{N}]?[\p{Lu}\p{Lt}\p{Lm}\p{Lo}\p{M}]+[\p{Ll}\p{Lm}\p{Lo}\p{M}]*",
    r"(?:'s|'S|'t|'T|'re|'RE|'Re|'eR|'ve|'VE|'vE|'Ve|'m|'M|'ll|'lL|'Ll|'LL|'d|'D)?",
    r"|\p{N}{1,3}",
    r"| ?[^\s\p{L}\p{N}]+[\r\n/]*",
    r"|\s*[\r\n]+",
    r"|\s+",
);

/// cl100k-style piece pattern, look-ahead branch removed.
pub const CL100K_PATTERN: &str = concat!(
    r"(?:'s|'S|'t|'T|'re|'RE|'Re|'eR|'ve|'VE|'vE|'Ve|'m|'M|'ll|'lL|'Ll|'LL|'d|'D)",
    r"|[^\r\n\p{L}\p{N}]?\p{L}+",
    r"|\p{N}{1,3}",
    r"| ?[^\s\p{L}\p{N}]+[\r\n]*",
    r"|\s*[\r\n]+",
    r"|\s+",
);

/// r50k-style piece pattern, look-ahead branch removed.
pub const R50K_PATTERN: &str =
    r"'s|'t|'re|'ve|'m|'ll|'d| ?\p{L}+| ?\p{N}+| ?[^\s\p{L}\p{N}]+|\s+";

pub const ENDOFTEXT: &str = "<|endoftext|>";
pub const ENDOFPROMPT: &str = "<|endofprompt|>";

/// Models mapped to an encoding by exact name. Checked before the prefixes.
const MODEL_TO_ENCODING: &[(&str, Encoding)] = &[
    ("gpt-4o", Encoding::O200kBase),
    ("chatgpt-4o-latest", Encoding::O200kBase),
    ("o1", Encoding::O200kBase),
    ("o3", Encoding::O200kBase),
    ("o4-mini", Encoding::O200kBase),
];

/// Model-name prefixes, first match wins.
const MODEL_PREFIX_TO_ENCODING: &[(&str, Encoding)] = &[
    ("gpt-5", Encoding::O200kBase),
    ("gpt-4.", Encoding::O200kBase),
    ("gpt-4o-", Encoding::O200kBase),
    ("o1-", Encoding::O200kBase),
    ("o3-", Encoding::O200kBase),
    ("o4-mini-", Encoding::O200kBase),
];

/// A named bundle of piece pattern, vocabulary and special tokens.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Encoding {
    O200kBase,
}

impl Encoding {
    pub fn from_name(name: &str) -> Result<Self, TokenizerError> {
        match name {
            "o200k_base" => Ok(Encoding::O200kBase),
            other => Err(TokenizerError::UnsupportedEncoding(other.to_owned())),
        }
    }

    /// Resolve the encoding a model uses.
    pub fn for_model(model: &str) -> Result<Self, TokenizerError> {
        if let Some(&(_, encoding)) = MODEL_TO_ENCODING.iter().find(|(name, _)| *name == model) {
            return Ok(encoding);
        }
        MODEL_PREFIX_TO_ENCODING
            .iter()
            .find(|(prefix, _)| model.starts_with(prefix))
            .map(|&(_, encoding)| encoding)
            .ok_or_else(|| TokenizerError::UnknownModel(model.to_owned()))
    }

    pub fn name(self) -> &'static str {
        match self {
            Encoding::O200kBase => "o200k_base",
        }
    }

    pub fn pattern(self) -> &'static str {
        match self {
            Encoding::O200kBase => O200K_BASE_PATTERN,
        }
    }

    /// File name of the `.tiktoken` vocabulary.
    pub fn resource_name(self) -> &'static str {
        match self {
            Encoding::O200kBase => "o200k_base.tiktoken",
        }
    }

    /// Reserved special tokens and their ids.
    pub fn special_tokens(self) -> FxHashMap<String, Rank> {
        match self {
            Encoding::O200kBase => [(ENDOFTEXT, 199_999), (ENDOFPROMPT, 200_018)]
                .into_iter()
                .map(|(literal, id)| (literal.to_owned(), id))
                .collect(),
        }
    }

    /// The vocabulary compiled into the binary, if it was available at
    /// build time.
    pub fn embedded_vocabulary(self) -> Option<&'static [u8]> {
        match self {
            Encoding::O200kBase => embedded::O200K_BASE,
        }
    }

    fn special_tokens_with(self, extra: &[(&str, Rank)]) -> FxHashMap<String, Rank> {
        let mut special = self.special_tokens();
        special.extend(extra.iter().map(|&(literal, id)| (literal.to_owned(), id)));
        special
    }
}

impl fmt::Display for Encoding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Encoding {
    type Err = TokenizerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Encoding::from_name(s)
    }
}

/// Name of the encoding a model uses.
pub fn encoding_for_model(model: &str) -> Result<&'static str, TokenizerError> {
    Encoding::for_model(model).map(Encoding::name)
}

impl Tokenizer {
    /// Build the tokenizer a model uses, from the embedded vocabulary.
    ///
    /// `extra_special_tokens` are merged over the encoding's defaults.
    pub fn for_model(
        model: &str,
        extra_special_tokens: &[(&str, Rank)],
    ) -> Result<Self, TokenizerError> {
        Self::for_encoding(Encoding::for_model(model)?, extra_special_tokens)
    }

    /// Build a tokenizer for a named encoding from the embedded vocabulary.
    pub fn for_encoding(
        encoding: Encoding,
        extra_special_tokens: &[(&str, Rank)],
    ) -> Result<Self, TokenizerError> {
        let data = encoding
            .embedded_vocabulary()
            .ok_or(TokenizerError::VocabularyNotEmbedded(encoding.resource_name()))?;
        Self::from_tiktoken(data, encoding, extra_special_tokens)
    }

    /// Build a tokenizer for `encoding` from `.tiktoken` vocabulary bytes.
    pub fn from_tiktoken(
        data: &[u8],
        encoding: Encoding,
        extra_special_tokens: &[(&str, Rank)],
    ) -> Result<Self, TokenizerError> {
        let ranks = vocab::load_tiktoken_bpe(data)?;
        Tokenizer::new(
            ranks,
            encoding.special_tokens_with(extra_special_tokens),
            encoding.pattern(),
            DEFAULT_CACHE_SIZE,
        )
    }

    /// Like [`Tokenizer::from_tiktoken`], reading the vocabulary from a file.
    pub fn from_tiktoken_file(
        path: impl AsRef<Path>,
        encoding: Encoding,
        extra_special_tokens: &[(&str, Rank)],
    ) -> Result<Self, TokenizerError> {
        let ranks = vocab::load_tiktoken_bpe_file(path)?;
        Tokenizer::new(
            ranks,
            encoding.special_tokens_with(extra_special_tokens),
            encoding.pattern(),
            DEFAULT_CACHE_SIZE,
        )
    }
}
