use crate::util::{print_population, resolve_format, ConsoleProgress};
use anyhow::Result;
use clap::Args;
use gol_patterns::{Pattern, PatternSource, PatternWriter, Rect};

#[derive(Args, Debug)]
pub(super) struct RandomArgs {
    /// The pattern will be a square with side 2^size_log2
    #[arg(short, long)]
    size_log2: u32,

    /// Seed for the random number generator, taken from the OS by default
    #[arg(long)]
    seed: Option<u64>,

    /// Path to the file where the pattern will be saved
    #[arg(short, long)]
    output: String,

    /// Output format (rle, mc, mc.gz), guessed from the output path by default
    #[arg(short, long)]
    format: Option<String>,
}

pub(super) fn run_random(args: RandomArgs) -> Result<()> {
    let format = resolve_format(args.format.as_deref(), &args.output)?;
    let pattern = Pattern::random(args.size_log2, args.seed)?;
    print_population(&pattern.population())?;

    let last = (1u64 << args.size_log2) - 1;
    let rect = Rect::new(0, 0, last, last);
    PatternWriter::default().write_file(
        &args.output,
        &pattern,
        format,
        &rect,
        &mut ConsoleProgress::new(),
    )?;
    println!("Saved pattern to {}", args.output);
    Ok(())
}
