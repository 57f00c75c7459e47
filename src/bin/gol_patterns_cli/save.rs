use crate::util::{parse_rect, print_population, resolve_format, ConsoleProgress};
use anyhow::{anyhow, Result};
use clap::Args;
use gol_patterns::{Pattern, PatternSource, PatternWriter, WriteOptions};

#[derive(Args, Debug)]
pub(super) struct SaveArgs {
    /// Path to the file containing the pattern; supports .mc and .mc.gz formats
    pattern: String,

    /// Path to the file where the pattern will be saved
    #[arg(short, long)]
    output: String,

    /// Output format (rle, mc, mc.gz), guessed from the output path by default
    #[arg(short, long)]
    format: Option<String>,

    /// Rectangle to save as RLE, given as top,left,bottom,right;
    /// the bounding box of the pattern by default
    #[arg(short, long)]
    rect: Option<String>,

    /// Size of the output buffer in bytes
    #[arg(long, default_value_t = WriteOptions::default().buffer_size)]
    buffer_size: usize,

    /// Number of processed cells between progress reports
    #[arg(long, default_value_t = WriteOptions::default().progress_interval)]
    progress_interval: u64,

    /// Count population of the pattern
    #[arg(short, long)]
    population: bool,
}

pub(super) fn run_save(args: SaveArgs) -> Result<()> {
    let format = resolve_format(args.format.as_deref(), &args.output)?;

    let timer = std::time::Instant::now();
    let pattern = Pattern::from_file(&args.pattern)?;
    println!(
        "Loaded pattern in {:.1} secs",
        timer.elapsed().as_secs_f64()
    );
    if args.population {
        print_population(&pattern.population())?;
    }

    let rect = match &args.rect {
        Some(s) => parse_rect(s)?,
        None => pattern
            .find_edges()
            .ok_or_else(|| anyhow!("Pattern {} is empty", args.pattern))?,
    };
    tracing::info!(?format, ?rect, output = %args.output, "saving pattern");

    let writer = PatternWriter::new(WriteOptions {
        buffer_size: args.buffer_size,
        progress_interval: args.progress_interval,
    });
    writer.write_file(
        &args.output,
        &pattern,
        format,
        &rect,
        &mut ConsoleProgress::new(),
    )?;
    println!("Saved pattern to {}", args.output);
    Ok(())
}
