use std::io;
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use html_fragment::HtmlFragmentDocument;

/// Inspect a stored content body: list its images or re-serialize it.
#[derive(Parser, Debug)]
#[command(name = "html_fragment", version)]
struct Args {
    /// Print the re-serialized fragment instead of the image list.
    #[arg(long)]
    roundtrip: bool,

    /// Body to read; `-` or nothing reads stdin.
    input: Option<PathBuf>,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let html = match args.input.as_deref() {
        Some(path) if path.as_os_str() != "-" => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {:?}", path))?,
        _ => io::read_to_string(io::stdin()).context("failed to read stdin")?,
    };

    let doc = HtmlFragmentDocument::parse(&html)?;
    if args.roundtrip {
        println!("{}", doc.serialize());
    } else {
        println!("{}", serde_json::to_string_pretty(&doc.images())?);
    }
    Ok(())
}
