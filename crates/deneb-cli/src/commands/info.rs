use std::path::PathBuf;

use anyhow::Result;
use clap::Args;
use deneb_core::io::dfc::DfcReader;

#[derive(Args)]
pub struct InfoArgs {
    /// Input frame container
    pub file: PathBuf,
}

pub fn run(args: &InfoArgs) -> Result<()> {
    let reader = DfcReader::open(&args.file)?;
    let header = reader.header();

    println!("File:        {}", args.file.display());
    println!("Dimensions:  {}x{}", header.width, header.height);
    println!("Channels:    {}", header.channels);
    println!("Bit depth:   {}", header.bits_per_sample);

    if !header.keywords.is_empty() {
        println!("Keywords:");
        for (name, value) in &header.keywords {
            println!("  {name:<12} {value}");
        }
    }

    let sample_bytes = if header.bits_per_sample == 64 { 8 } else { 4 };
    let total_mb = (header.width * header.height * header.channels * sample_bytes) as f64
        / (1024.0 * 1024.0);
    println!("Data size:   {total_mb:.1} MB");

    for (name, value) in reader.text_properties() {
        println!();
        println!("{name}:");
        for line in value.lines() {
            println!("  {line}");
        }
    }

    Ok(())
}
