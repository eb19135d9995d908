//! Parser for the `.tiktoken` vocabulary format: one
//! `<base64 token bytes> <decimal rank>` pair per line, blank lines ignored.

use std::fs;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use rustc_hash::FxHashMap;
use tracing::debug;

use crate::error::VocabError;
use crate::Rank;

pub fn load_tiktoken_bpe(data: &[u8]) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let mut ranks = FxHashMap::default();

    for (i, line) in data.split(|&b| b == b'\n').enumerate() {
        let line_no = i + 1;
        let line = line.trim_ascii();
        if line.is_empty() {
            continue;
        }

        let fields: Vec<&[u8]> = line
            .split(u8::is_ascii_whitespace)
            .filter(|f| !f.is_empty())
            .collect();
        let [token, rank] = fields[..] else {
            return Err(VocabError::Format {
                line: line_no,
                fields: fields.len(),
            });
        };

        let bytes = STANDARD.decode(token).map_err(|source| VocabError::Base64 {
            line: line_no,
            token: String::from_utf8_lossy(token).into_owned(),
            source,
        })?;
        let rank = std::str::from_utf8(rank)
            .ok()
            .and_then(|r| r.parse::<Rank>().ok())
            .ok_or_else(|| VocabError::Rank {
                line: line_no,
                rank: String::from_utf8_lossy(rank).into_owned(),
            })?;

        ranks.insert(bytes, rank);
    }

    debug!(entries = ranks.len(), "parsed tiktoken vocabulary");
    Ok(ranks)
}

pub fn load_tiktoken_bpe_file(
    path: impl AsRef<Path>,
) -> Result<FxHashMap<Vec<u8>, Rank>, VocabError> {
    let data = fs::read(path)?;
    load_tiktoken_bpe(&data)
}
