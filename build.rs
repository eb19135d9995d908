use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Vocabulary resources the crate knows how to embed, as
/// (constant name, file name).
const VOCABULARIES: &[(&str, &str)] = &[("O200K_BASE", "o200k_base.tiktoken")];

fn main() {
    println!("cargo:rerun-if-env-changed=WAZA_TOKENS_VOCAB_DIR");
    println!("cargo:rerun-if-changed=data");

    let out_dir = env::var("OUT_DIR").unwrap();
    let manifest_dir = env::var("CARGO_MANIFEST_DIR").unwrap();

    let search_dirs = vocab_dirs(&manifest_dir);
    let mut codegen = String::new();

    for &(const_name, file_name) in VOCABULARIES {
        match find_vocab(&search_dirs, file_name) {
            Some(path) => {
                println!("cargo:rerun-if-changed={}", path.display());
                codegen.push_str(&format!(
                    "pub const {}: Option<&[u8]> = Some(include_bytes!({:?}));\n",
                    const_name,
                    path.display().to_string()
                ));
            }
            None => {
                println!(
                    "cargo:warning={} not found; tokenizers must be built from an explicit vocabulary",
                    file_name
                );
                codegen.push_str(&format!("pub const {}: Option<&[u8]> = None;\n", const_name));
            }
        }
    }

    let dest = Path::new(&out_dir).join("embedded_vocab.rs");
    fs::write(&dest, &codegen).expect("Failed to write embedded_vocab.rs");
}

fn vocab_dirs(manifest_dir: &str) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(dir) = env::var("WAZA_TOKENS_VOCAB_DIR") {
        dirs.push(PathBuf::from(dir));
    }
    dirs.push(Path::new(manifest_dir).join("data"));
    dirs
}

fn find_vocab(dirs: &[PathBuf], file_name: &str) -> Option<PathBuf> {
    dirs.iter()
        .map(|dir| dir.join(file_name))
        .find(|path| path.is_file())
        .and_then(|path| fs::canonicalize(&path).ok())
}
