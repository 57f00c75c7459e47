mod random;
mod save;
mod util;

use clap::{Parser, Subcommand};
use random::{run_random, RandomArgs};
use save::{run_save, SaveArgs};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(version, about)]
struct CLIParser {
    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Load a macrocell pattern and save it as RLE, .mc or .mc.gz
    Save(SaveArgs),
    /// Generate a random square pattern and save it
    Random(RandomArgs),
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = CLIParser::parse();

    match args.action {
        Action::Save(args) => run_save(args),
        Action::Random(args) => run_random(args),
    }
}
