use gol_patterns::*;
use std::io::sink;

fn main() -> anyhow::Result<()> {
    let timer = std::time::Instant::now();
    let pattern = Pattern::random(12, Some(42))?;
    println!("Time on building pattern: {:?}", timer.elapsed());

    let rect = pattern
        .find_edges()
        .ok_or_else(|| anyhow::anyhow!("random pattern is blank"))?;
    for buffer_size in [1 << 10, 1 << 13, 1 << 16] {
        let writer = PatternWriter::new(WriteOptions {
            buffer_size,
            ..Default::default()
        });
        let timer = std::time::Instant::now();
        writer.write(&mut sink(), &pattern, PatternFormat::RLE, &rect, &mut NoProgress)?;
        println!(
            "buffer_size={} time={}",
            buffer_size,
            timer.elapsed().as_secs_f64()
        );
    }
    Ok(())
}
