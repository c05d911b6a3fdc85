use anyhow::{Context, Result};
use wick_core::keygen::KeyPair;

#[derive(clap::Args, Debug)]
pub struct KeygenArgs {
    /// Write the keys to `key` and `key.pub` in the current directory
    #[arg(short = 'o', long)]
    pub output_file: bool,
}

pub fn run(args: KeygenArgs) -> Result<()> {
    let pair = KeyPair::generate();
    if !args.output_file {
        print!("{}", pair.display());
        return Ok(());
    }

    let dir = std::env::current_dir().context("failed to resolve current directory")?;
    let (private, public) = pair
        .write_to(&dir)
        .with_context(|| format!("failed to write keys to {}", dir.display()))?;
    tracing::info!(private = %private.display(), public = %public.display(), "keys written");
    Ok(())
}
