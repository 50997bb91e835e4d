//! Entry point for `tnglc`.
//!
//! Reads a TNGL file and prints its tokens, its preprocessed text or its
//! compiled bytecode.  All real work lives in the library.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tngl_compiler::{compile_with, preprocess, tokenize, CompilerOptions, MemoryFragmentStore};

/// TNGL compiler.
#[derive(Parser)]
#[command(author, version, about)]
struct Cli {
    /// Extra `NAME=VALUE` defines, applied before the first line.
    #[arg(short = 'D', long = "define", global = true)]
    defines: Vec<String>,

    #[command(subcommand)]
    mode: Mode,
}

#[derive(Subcommand)]
enum Mode {
    /// Print the token stream, one token per line.
    Tokens { file: PathBuf },
    /// Print the source after macro and directive expansion.
    Preprocess { file: PathBuf },
    /// Compile to bytecode.
    Compile {
        file: PathBuf,
        /// Print the bytecode as hex instead of a summary.
        #[arg(long)]
        hex: bool,
        /// Write the raw bytecode to this file.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

fn parse_defines(raw: &[String]) -> Result<Vec<(String, String)>> {
    raw.iter()
        .map(|entry| {
            let (name, value) = entry.split_once('=').unwrap_or((entry.as_str(), ""));
            anyhow::ensure!(!name.is_empty(), "empty define name in \"{}\"", entry);
            Ok((name.to_string(), value.to_string()))
        })
        .collect()
}

fn read(file: &PathBuf) -> Result<String> {
    fs::read_to_string(file).with_context(|| format!("reading {}", file.display()))
}

fn main() -> Result<()> {
    // Initialise env_logger; set RUST_LOG to control verbosity.
    env_logger::init();

    let cli = Cli::parse();
    let options = CompilerOptions {
        defines: parse_defines(&cli.defines)?,
        ..CompilerOptions::default()
    };
    let store = MemoryFragmentStore::new();

    match cli.mode {
        Mode::Tokens { file } => {
            let source = read(&file)?;
            let expanded = preprocess(&source, &options.defines, Some(&store))?;
            for token in tokenize(&expanded.source) {
                if token.is_trivia() {
                    continue;
                }
                println!(
                    "{:>6}  {:<16} {:?}",
                    token.offset,
                    format!("{:?}", token.kind),
                    token.text
                );
            }
        }
        Mode::Preprocess { file } => {
            let source = read(&file)?;
            let expanded = preprocess(&source, &options.defines, Some(&store))?;
            print!("{}", expanded.source);
        }
        Mode::Compile { file, hex, out } => {
            let source = read(&file)?;
            let program = compile_with(&source, &options, Some(&store))
                .with_context(|| format!("compiling {}", file.display()))?;
            if let Some(path) = out {
                fs::write(&path, &program.bytes)
                    .with_context(|| format!("writing {}", path.display()))?;
            }
            if hex {
                println!("{}", hex::encode(&program.bytes));
            } else {
                println!(
                    "{} byte(s), fingerprint {}",
                    program.len(),
                    program.fingerprint_hex()
                );
            }
            for warning in &program.warnings {
                log::warn!("{}", warning);
            }
        }
    }

    Ok(())
}
