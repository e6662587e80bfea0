use std::path::PathBuf;

use anyhow::{bail, Result};
use clap::Args;
use deneb_core::cache::FileCache;

#[derive(Args)]
pub struct CacheArgs {
    /// Cache directory (defaults to the platform temp location)
    #[arg(long)]
    pub dir: Option<PathBuf>,

    /// Remove every cached entry
    #[arg(long)]
    pub clear: bool,
}

pub fn run(args: &CacheArgs) -> Result<()> {
    let dir = args
        .dir
        .clone()
        .unwrap_or_else(|| std::env::temp_dir().join("deneb-cache"));
    let Some(cache) = FileCache::open(&dir) else {
        bail!("cannot open cache directory {}", dir.display());
    };

    if args.clear {
        let removed = cache.clear()?;
        println!("Removed {removed} entries from {}", dir.display());
    } else {
        println!("Cache:   {}", dir.display());
        println!("Entries: {}", cache.entry_count());
    }
    Ok(())
}
