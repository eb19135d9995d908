use std::collections::BTreeMap;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use rayon::prelude::*;
use serde::Serialize;
use tracing::debug;
use waza_tokens::counter::COUNTER_MODEL;
use waza_tokens::{BpeCounter, Counter, Encoding, EstimatingCounter, Rank, Tokenizer, TokenizerKind};

#[derive(Parser, Debug)]
#[command(
    name = "waza-tokens",
    version,
    about = "Count, encode and trim text with the o200k_base tokenizer",
    long_about = "Count, encode and trim text with the o200k_base tokenizer.\n\
                  Runs fully offline. Set RUST_LOG=debug for tokenizer diagnostics."
)]
struct Cli {
    #[command(subcommand)]
    command: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Count tokens in files or stdin.
    Count(CountArgs),
    /// Print the token ids of TEXT (or stdin) as JSON.
    Encode(EncodeArgs),
    /// Print the text for a list of token ids.
    Decode(DecodeArgs),
    /// Cut TEXT (or stdin) down to a token budget.
    Trim(TrimArgs),
}

#[derive(Args, Debug)]
struct VocabArgs {
    /// Model whose encoding to use.
    #[arg(long, short = 'm', default_value = COUNTER_MODEL)]
    model: String,

    /// Load the vocabulary from a .tiktoken file instead of the embedded one.
    #[arg(long, value_name = "FILE")]
    vocab: Option<PathBuf>,
}

impl VocabArgs {
    fn tokenizer(&self) -> Result<Tokenizer> {
        let encoding = Encoding::for_model(&self.model)?;
        match &self.vocab {
            Some(path) => Tokenizer::from_tiktoken_file(path, encoding, &[])
                .with_context(|| format!("loading vocabulary {}", path.display())),
            None => Ok(Tokenizer::for_encoding(encoding, &[])?),
        }
    }
}

#[derive(Args, Debug)]
struct CountArgs {
    /// Files or directories. Reads stdin when none are given.
    paths: Vec<PathBuf>,

    /// Recurse into directories.
    #[arg(long, short = 'r')]
    recursive: bool,

    /// Skip files and directories matching PATTERN (repeatable). Patterns
    /// with a '/' match the path relative to the directory, others the file
    /// name; '*' and '**' are wildcards.
    #[arg(long, value_name = "PATTERN")]
    ignore: Vec<String>,

    /// Don't skip .gitignore'd files when recursing.
    #[arg(long)]
    no_gitignore: bool,

    #[arg(long, value_enum, default_value_t = Format::Table)]
    format: Format,

    /// Sort table rows by.
    #[arg(long, value_enum, default_value_t = SortBy::Path)]
    sort: SortBy,

    /// Leave out files with fewer tokens.
    #[arg(long, default_value_t = 0)]
    min_tokens: usize,

    /// Hide the total row in table output.
    #[arg(long)]
    no_total: bool,

    #[arg(long, value_enum, default_value_t = TokenizerKind::Bpe)]
    tokenizer: TokenizerKind,

    #[command(flatten)]
    vocab: VocabArgs,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    text: Option<String>,

    /// Special token literal to encode as its reserved id (repeatable).
    #[arg(long, value_name = "LITERAL")]
    allow_special: Vec<String>,

    #[command(flatten)]
    vocab: VocabArgs,
}

#[derive(Args, Debug)]
struct DecodeArgs {
    #[arg(required = true)]
    ids: Vec<Rank>,

    #[command(flatten)]
    vocab: VocabArgs,
}

#[derive(Args, Debug)]
struct TrimArgs {
    text: Option<String>,

    #[arg(long, short = 'n')]
    max_tokens: usize,

    /// Which end of the text to keep.
    #[arg(long, value_enum, default_value_t = Keep::Head)]
    keep: Keep,

    /// Print ids and text as JSON instead of the kept text.
    #[arg(long)]
    json: bool,

    /// Special token literal to encode as its reserved id (repeatable).
    #[arg(long, value_name = "LITERAL")]
    allow_special: Vec<String>,

    #[command(flatten)]
    vocab: VocabArgs,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Format {
    Table,
    Json,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SortBy {
    Path,
    Tokens,
    Name,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Keep {
    Head,
    Tail,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    match Cli::parse().command {
        Cmd::Count(args) => run_count(args),
        Cmd::Encode(args) => run_encode(args),
        Cmd::Decode(args) => run_decode(args),
        Cmd::Trim(args) => run_trim(args),
    }
}

fn text_or_stdin(text: Option<String>) -> Result<String> {
    if let Some(text) = text {
        return Ok(text);
    }
    let mut buf = String::new();
    io::stdin()
        .read_to_string(&mut buf)
        .context("reading stdin")?;
    Ok(buf)
}

fn run_encode(args: EncodeArgs) -> Result<()> {
    let text = text_or_stdin(args.text)?;
    let mut tokenizer = args.vocab.tokenizer()?;
    let allowed: Vec<&str> = args.allow_special.iter().map(String::as_str).collect();
    let ids = tokenizer.encode(&text, &allowed);
    println!("{}", serde_json::to_string(&ids)?);
    Ok(())
}

fn run_decode(args: DecodeArgs) -> Result<()> {
    let tokenizer = args.vocab.tokenizer()?;
    print!("{}", tokenizer.decode(&args.ids));
    Ok(())
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct TrimOutput<'a> {
    token_ids: &'a [Rank],
    text: &'a str,
}

fn run_trim(args: TrimArgs) -> Result<()> {
    let text = text_or_stdin(args.text)?;
    let mut tokenizer = args.vocab.tokenizer()?;
    let allowed: Vec<&str> = args.allow_special.iter().map(String::as_str).collect();
    let result = match args.keep {
        Keep::Head => tokenizer.encode_trim_suffix(&text, args.max_tokens, &allowed),
        Keep::Tail => tokenizer.encode_trim_prefix(&text, args.max_tokens, &allowed),
    };
    if args.json {
        let out = TrimOutput {
            token_ids: &result.token_ids,
            text: &result.text,
        };
        println!("{}", serde_json::to_string_pretty(&out)?);
    } else {
        print!("{}", result.text);
    }
    Ok(())
}

fn is_binary(path: &Path) -> bool {
    let Ok(f) = fs::File::open(path) else {
        return false;
    };
    let mut buf = [0u8; 8192];
    let n = f.take(8192).read(&mut buf).unwrap_or(0);
    buf[..n].contains(&0)
}

fn is_in_git_repo(dir: &Path) -> bool {
    Command::new("git")
        .args(["rev-parse", "--git-dir"])
        .current_dir(dir)
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

fn git_list_files(dir: &Path) -> Vec<PathBuf> {
    let output = Command::new("git")
        .args(["ls-files", "-z"])
        .current_dir(dir)
        .output()
        .ok();
    match output {
        Some(o) if o.status.success() => String::from_utf8_lossy(&o.stdout)
            .split('\0')
            .filter(|f| !f.is_empty())
            .map(|f| dir.join(f))
            .collect(),
        _ => Vec::new(),
    }
}

fn matches_ignore(file_path: &Path, base_dir: &Path, patterns: &[String]) -> bool {
    if patterns.is_empty() {
        return false;
    }
    let Ok(rel) = file_path.strip_prefix(base_dir) else {
        return false;
    };
    let rel = rel.to_string_lossy();
    let basename = file_path
        .file_name()
        .map(|n| n.to_string_lossy())
        .unwrap_or_default();

    patterns.iter().any(|pat| {
        let target = if pat.contains('/') { &rel } else { &basename };
        glob_match(pat, target)
            || (!pat.contains('*') && (rel == pat.as_str() || rel.starts_with(&format!("{pat}/"))))
    })
}

/// Shell-style match where `**` crosses directories and `*` doesn't.
fn glob_match(pattern: &str, text: &str) -> bool {
    let mut re = String::from("^");
    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '*' {
            if chars.peek() == Some(&'*') {
                chars.next();
                re.push_str(".*");
            } else {
                re.push_str("[^/]*");
            }
        } else {
            re.push_str(&fancy_regex::escape(c.encode_utf8(&mut [0; 4])));
        }
    }
    re.push('$');
    fancy_regex::Regex::new(&re)
        .map(|r| r.is_match(text).unwrap_or(false))
        .unwrap_or(false)
}

fn expand_dir(dir: &Path, use_gitignore: bool) -> Vec<PathBuf> {
    if use_gitignore && is_in_git_repo(dir) {
        debug!(dir = %dir.display(), "listing files with git");
        let mut files: Vec<PathBuf> = git_list_files(dir)
            .into_iter()
            .filter(|f| f.is_file() && !is_binary(f))
            .collect();
        files.sort();
        return files;
    }

    fn walk(dir: &Path, files: &mut Vec<PathBuf>) {
        let Ok(entries) = fs::read_dir(dir) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            if path.is_dir() {
                walk(&path, files);
            } else if path.is_file() && !is_binary(&path) {
                files.push(path);
            }
        }
    }

    let mut files = Vec::new();
    walk(dir, &mut files);
    files.sort();
    files
}

fn expand_paths(paths: &[PathBuf], recursive: bool, use_gitignore: bool, ignore: &[String]) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for path in paths {
        if !path.exists() {
            bail!("{}: No such file or directory", path.display());
        }
        if path.is_dir() {
            if !recursive {
                bail!("{}: Is a directory (use -r to recurse)", path.display());
            }
            files.extend(
                expand_dir(path, use_gitignore)
                    .into_iter()
                    .filter(|f| !matches_ignore(f, path, ignore)),
            );
        } else if path.is_file() {
            if is_binary(path) {
                debug!(path = %path.display(), "skipping binary file");
                continue;
            }
            files.push(path.clone());
        }
    }
    Ok(files)
}

/// Builds one counter per worker thread.
enum CounterSource {
    Estimate,
    Bpe(Tokenizer),
}

impl CounterSource {
    fn new(kind: TokenizerKind, vocab: &VocabArgs) -> Result<Self> {
        Ok(match kind {
            TokenizerKind::Estimate => CounterSource::Estimate,
            TokenizerKind::Bpe | TokenizerKind::Default => CounterSource::Bpe(vocab.tokenizer()?),
        })
    }

    fn counter(&self) -> Box<dyn Counter> {
        match self {
            CounterSource::Estimate => Box::new(EstimatingCounter),
            CounterSource::Bpe(tokenizer) => Box::new(BpeCounter::with_tokenizer(tokenizer.clone())),
        }
    }
}

struct Input {
    name: String,
    text: String,
}

#[derive(Debug, Clone, Serialize)]
struct FileCount {
    #[serde(skip)]
    path: String,
    tokens: usize,
    characters: usize,
    lines: usize,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CountOutput<'a> {
    total_tokens: usize,
    total_files: usize,
    files: BTreeMap<&'a str, &'a FileCount>,
}

fn run_count(args: CountArgs) -> Result<()> {
    let inputs: Vec<Input> = if args.paths.is_empty() {
        vec![Input {
            name: "stdin".to_string(),
            text: text_or_stdin(None)?,
        }]
    } else {
        expand_paths(&args.paths, args.recursive, !args.no_gitignore, &args.ignore)?
            .into_iter()
            .map(|f| {
                let text = fs::read_to_string(&f)
                    .with_context(|| format!("reading {}", f.display()))?;
                Ok(Input {
                    name: f.to_string_lossy().into_owned(),
                    text,
                })
            })
            .collect::<Result<_>>()?
    };

    let source = CounterSource::new(args.tokenizer, &args.vocab)?;
    let count_one = |counter: &mut Box<dyn Counter>, input: &Input| FileCount {
        path: input.name.clone(),
        tokens: counter.count(&input.text),
        characters: input.text.len(),
        lines: input.text.split('\n').count(),
    };
    let mut results: Vec<FileCount> = if inputs.len() > 1 {
        inputs
            .par_iter()
            .map_init(|| source.counter(), count_one)
            .collect()
    } else {
        let mut counter = source.counter();
        inputs.iter().map(|input| count_one(&mut counter, input)).collect()
    };

    results.retain(|r| r.tokens >= args.min_tokens);
    sort_results(&mut results, args.sort);

    match args.format {
        Format::Json => print_json(&results),
        Format::Table => {
            print!("{}", format_table(&results, !args.no_total));
            Ok(())
        }
    }
}

fn sort_results(results: &mut [FileCount], by: SortBy) {
    match by {
        SortBy::Path => results.sort_by(|a, b| a.path.cmp(&b.path)),
        SortBy::Tokens => results.sort_by(|a, b| b.tokens.cmp(&a.tokens)),
        SortBy::Name => results.sort_by_cached_key(|r| {
            Path::new(&r.path)
                .file_name()
                .map(|n| n.to_string_lossy().to_lowercase())
                .unwrap_or_default()
        }),
    }
}

fn print_json(results: &[FileCount]) -> Result<()> {
    let out = CountOutput {
        total_tokens: results.iter().map(|r| r.tokens).sum(),
        total_files: results.len(),
        files: results.iter().map(|r| (r.path.as_str(), r)).collect(),
    };
    println!("{}", serde_json::to_string_pretty(&out)?);
    Ok(())
}

fn format_table(results: &[FileCount], show_total: bool) -> String {
    if results.is_empty() {
        return "No files found.\n".to_string();
    }

    let width = results.iter().map(|r| r.path.len()).max().unwrap_or(0).max(4);
    let header = format!("{:<width$}  {:>8}  {:>8}  {:>6}", "File", "Tokens", "Chars", "Lines");
    let rule = "-".repeat(header.len());

    let mut out = format!("{header}\n{rule}\n");
    for r in results {
        out.push_str(&format!(
            "{:<width$}  {:>8}  {:>8}  {:>6}\n",
            r.path, r.tokens, r.characters, r.lines
        ));
    }
    if show_total {
        let tokens: usize = results.iter().map(|r| r.tokens).sum();
        let chars: usize = results.iter().map(|r| r.characters).sum();
        let lines: usize = results.iter().map(|r| r.lines).sum();
        out.push_str(&format!("{rule}\n"));
        out.push_str(&format!("{:<width$}  {tokens:>8}  {chars:>8}  {lines:>6}\n", "Total"));
        out.push_str(&format!("\n{} file(s) scanned\n", results.len()));
    }
    out
}
