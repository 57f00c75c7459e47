use anyhow::{anyhow, Context, Result};
use chrono::Local;
use gol_patterns::{BigInt, PatternFormat, Progress, Rect};
use num_format::{CustomFormat, Grouping, ToFormattedString};
use std::time::{Duration, Instant};

pub(super) fn print_population(population: &BigInt) -> Result<()> {
    let fmt = CustomFormat::builder()
        .grouping(Grouping::Standard)
        .separator("_")
        .build()?;
    println!("Population: {}", population.to_formatted_string(&fmt));
    Ok(())
}

pub(super) fn local_time() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.3f").to_string()
}

/// Uses the explicit format if given, otherwise guesses it from the output path.
pub(super) fn resolve_format(format: Option<&str>, output: &str) -> Result<PatternFormat> {
    Ok(match format {
        Some(tag) => tag.parse()?,
        None => PatternFormat::from_path(output)?,
    })
}

/// Parses `top,left,bottom,right`.
pub(super) fn parse_rect(s: &str) -> Result<Rect> {
    let parts = s
        .split(',')
        .map(|x| {
            x.trim()
                .parse::<BigInt>()
                .with_context(|| format!("Invalid coordinate '{}'", x))
        })
        .collect::<Result<Vec<_>>>()?;
    match <[BigInt; 4]>::try_from(parts) {
        Ok([top, left, bottom, right]) => Ok(Rect::new(top, left, bottom, right)),
        Err(parts) => Err(anyhow!("Expected 4 coordinates, got {}", parts.len())),
    }
}

/// Prints timestamped progress lines to stderr, at most a few per second.
pub(super) struct ConsoleProgress {
    started: Instant,
    last_print: Option<Instant>,
}

impl ConsoleProgress {
    const PRINT_INTERVAL: Duration = Duration::from_millis(250);

    pub(super) fn new() -> Self {
        Self {
            started: Instant::now(),
            last_print: None,
        }
    }
}

impl Progress for ConsoleProgress {
    fn begin(&mut self, description: &str) {
        self.started = Instant::now();
        self.last_print = None;
        eprintln!("[{}] {}", local_time(), description);
    }

    fn poll(&mut self, fraction: f64, message: &str) -> bool {
        if self
            .last_print
            .map_or(true, |t| t.elapsed() >= Self::PRINT_INTERVAL)
        {
            self.last_print = Some(Instant::now());
            eprintln!("[{}] {:5.1}% {}", local_time(), fraction * 100.0, message);
        }
        false
    }

    fn end(&mut self) {
        eprintln!(
            "[{}] Done in {:.1} secs",
            local_time(),
            self.started.elapsed().as_secs_f64()
        );
    }
}
