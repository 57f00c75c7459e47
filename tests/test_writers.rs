#[cfg(test)]
mod tests {
    use gol_patterns::*;
    use rand::{Rng, SeedableRng};
    use std::io::{Read, Write};

    const SEED: u64 = 42;

    /// Decoded RLE file: header values and alive cells relative to the top left corner.
    struct Rle {
        width: u64,
        height: u64,
        rule: String,
        cells: Vec<(i64, i64)>,
    }

    fn decode_rle(data: &[u8]) -> Rle {
        let text = std::str::from_utf8(data).unwrap();
        let (header, body) = text.split_once('\n').unwrap();
        let fields: Vec<&str> = header.split(", ").collect();
        assert_eq!(fields.len(), 3, "bad header {header:?}");
        let width = fields[0].strip_prefix("x = ").unwrap().parse().unwrap();
        let height = fields[1].strip_prefix("y = ").unwrap().parse().unwrap();
        let rule = fields[2].strip_prefix("rule = ").unwrap().to_string();

        let mut cells = vec![];
        let (mut x, mut y) = (0i64, 0i64);
        let mut count = String::new();
        for c in body.chars().filter(|&c| c != '\n') {
            if c.is_ascii_digit() {
                count.push(c);
                continue;
            }
            let n: i64 = if count.is_empty() {
                1
            } else {
                count.parse().unwrap()
            };
            count.clear();
            match c {
                'b' => x += n,
                'o' => {
                    cells.extend((x..x + n).map(|x| (x, y)));
                    x += n;
                }
                '$' => (x, y) = (0, y + n),
                '!' => break,
                _ => panic!("unexpected symbol {c:?}"),
            }
        }
        cells.sort_by_key(|&(x, y)| (y, x));
        Rle {
            width,
            height,
            rule,
            cells,
        }
    }

    fn to_rle<S: PatternSource>(source: &S, rect: &Rect) -> Vec<u8> {
        let mut data = Vec::new();
        PatternWriter::default()
            .write(&mut data, source, PatternFormat::RLE, rect, &mut NoProgress)
            .unwrap();
        data
    }

    fn random_cells(count: usize, range: std::ops::Range<i64>) -> Vec<(i64, i64)> {
        let mut rng = rand_chacha::ChaCha8Rng::seed_from_u64(SEED);
        (0..count)
            .map(|_| (rng.random_range(range.clone()), rng.random_range(range.clone())))
            .collect()
    }

    /// Records every call and cancels on the given poll.
    #[derive(Default)]
    struct ScriptedProgress {
        cancel_on_poll: Option<usize>,
        begins: Vec<String>,
        polls: Vec<(f64, String)>,
        ends: usize,
    }

    impl Progress for ScriptedProgress {
        fn begin(&mut self, description: &str) {
            self.begins.push(description.to_string());
        }

        fn poll(&mut self, fraction: f64, message: &str) -> bool {
            self.polls.push((fraction, message.to_string()));
            self.cancel_on_poll == Some(self.polls.len())
        }

        fn end(&mut self) {
            self.ends += 1;
        }
    }

    struct FailingSink;

    impl Write for FailingSink {
        fn write(&mut self, _: &[u8]) -> std::io::Result<usize> {
            Err(std::io::Error::other("disk is full"))
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_rle_roundtrip_random() {
        let cells = CellSet::from_cells("B3/S23", random_cells(3000, -100..100));
        let rect = cells.find_edges().unwrap();
        let decoded = decode_rle(&to_rle(&cells, &rect));

        assert_eq!(decoded.rule, "B3/S23");
        assert_eq!(BigInt::from(decoded.width), rect.width());
        assert_eq!(BigInt::from(decoded.height), rect.height());
        let bounds = rect.to_bounds().unwrap();
        let expected: Vec<(i64, i64)> = cells
            .iter()
            .map(|(x, y)| (x - bounds.left, y - bounds.top))
            .collect();
        assert_eq!(decoded.cells, expected);
    }

    #[test]
    fn test_rle_lines_and_counts() {
        let cells = CellSet::from_cells("B36/S23", random_cells(5000, 0..300));
        let data = to_rle(&cells, &cells.find_edges().unwrap());
        let text = String::from_utf8(data).unwrap();

        assert!(text.ends_with("!\n"));
        for line in text.lines().skip(1) {
            assert!(line.len() <= 70, "line too long: {line:?}");
        }
        let body: String = text.lines().skip(1).collect();
        let mut count = String::new();
        for c in body.chars() {
            if c.is_ascii_digit() {
                count.push(c);
            } else {
                assert_ne!(count, "1", "explicit count of one before {c:?}");
                assert!(!count.starts_with('0'), "count with leading zero");
                count.clear();
            }
        }
        // tokens never end with a dead run or a row end
        assert!(!body.ends_with("b!") && !body.ends_with("$!"));
    }

    #[test]
    fn test_rle_idempotent() {
        let cells = CellSet::from_cells("B3/S23", random_cells(1000, -40..40));
        let first = to_rle(&cells, &cells.find_edges().unwrap());

        let decoded = decode_rle(&first);
        let copy = CellSet::from_cells(&*decoded.rule, decoded.cells);
        let second = to_rle(&copy, &copy.find_edges().unwrap());
        assert_eq!(first, second);
    }

    #[test]
    fn test_rle_empty() {
        let empty = CellSet::new("B3/S23");
        assert_eq!(
            to_rle(&empty, &Rect::new(-5, -5, 5, 5)),
            b"x = 0, y = 0, rule = B3/S23\n!\n"
        );
        let pattern = Pattern::default();
        assert_eq!(
            to_rle(&pattern, &Rect::new(0, 0, 7, 7)),
            b"x = 0, y = 0, rule = B3/S23\n!\n"
        );
    }

    #[test]
    fn test_pattern_matches_cell_set() {
        let coords: Vec<(i64, i64)> = random_cells(2000, 0..500);
        let cells = CellSet::from_cells("B3/S23", coords.iter().copied());
        let pattern = Pattern::from_cells(
            "B3/S23",
            coords.iter().map(|&(x, y)| (x as u64, y as u64)),
        );
        assert_eq!(pattern.population(), cells.population());
        assert_eq!(pattern.find_edges(), cells.find_edges());

        for rect in [
            cells.find_edges().unwrap(),
            Rect::new(-3, -7, 100, 60),
            Rect::new(250, 250, 600, 600),
        ] {
            assert_eq!(to_rle(&pattern, &rect), to_rle(&cells, &rect));
        }
    }

    #[test]
    fn test_buffer_size_does_not_change_output() {
        let cells = CellSet::from_cells("B3/S23", random_cells(2000, 0..200));
        let rect = cells.find_edges().unwrap();
        let expected = to_rle(&cells, &rect);
        for buffer_size in [1, 7, 64, 1 << 20] {
            let writer = PatternWriter::new(WriteOptions {
                buffer_size,
                progress_interval: 1,
            });
            let mut data = Vec::new();
            writer
                .write(&mut data, &cells, PatternFormat::RLE, &rect, &mut NoProgress)
                .unwrap();
            assert_eq!(data, expected, "buffer_size={buffer_size}");
        }
    }

    #[test]
    fn test_progress_reports() {
        let cells = CellSet::from_cells("B3/S23", random_cells(5000, 0..200));
        let rect = cells.find_edges().unwrap();
        let mut progress = ScriptedProgress::default();
        let writer = PatternWriter::new(WriteOptions {
            progress_interval: 100,
            ..Default::default()
        });
        writer
            .write(&mut Vec::new(), &cells, PatternFormat::RLE, &rect, &mut progress)
            .unwrap();

        assert_eq!(progress.begins, ["Writing pattern file"]);
        assert_eq!(progress.ends, 1);
        assert!(!progress.polls.is_empty());
        let mut last = 0.0;
        for (fraction, message) in &progress.polls {
            assert!((last..=1.0).contains(fraction));
            assert!(message.starts_with("File size: ") && message.ends_with(" MB"));
            last = *fraction;
        }
    }

    #[test]
    fn test_progress_counts_blank_rows() {
        // two cells far apart: the scan time is dominated by blank rows
        let cells = CellSet::from_cells("B3/S23", [(0, 0), (0, 99_999)]);
        let rect = Rect::new(0, 0, 99_999, 0);
        let mut progress = ScriptedProgress::default();
        let writer = PatternWriter::new(WriteOptions {
            progress_interval: 1024,
            ..Default::default()
        });
        let mut data = Vec::new();
        writer
            .write(&mut data, &cells, PatternFormat::RLE, &rect, &mut progress)
            .unwrap();
        assert_eq!(data, b"x = 1, y = 100000, rule = B3/S23\no99999$o!\n");

        // one count per row plus one per alive cell, out of population + height
        let total = 100_002.0;
        assert_eq!(progress.polls.len(), 97);
        let (first, _) = progress.polls[0];
        assert!((first - 1025.0 / total).abs() < 1e-9, "first fraction {first}");
        let (last, _) = progress.polls[progress.polls.len() - 1];
        assert!((last - 97.0 * 1025.0 / total).abs() < 1e-9, "last fraction {last}");
        assert!(last > 0.95);
    }

    #[test]
    fn test_rle_cancelled() {
        let cells = CellSet::from_cells("B3/S23", random_cells(5000, 0..200));
        let rect = cells.find_edges().unwrap();
        let writer = PatternWriter::new(WriteOptions {
            buffer_size: 256,
            progress_interval: 64,
        });
        let full = to_rle(&cells, &rect);

        let mut progress = ScriptedProgress {
            cancel_on_poll: Some(5),
            ..Default::default()
        };
        let mut data = Vec::new();
        let result = writer.write(&mut data, &cells, PatternFormat::RLE, &rect, &mut progress);

        assert!(matches!(result, Err(WriteError::Truncated)));
        assert_eq!(progress.polls.len(), 5);
        assert_eq!(progress.ends, 1);
        assert!(data.len() < full.len());
        assert!(full.starts_with(&data));
        assert!(!data.ends_with(b"!\n"));
    }

    #[test]
    fn test_macrocell_cancelled() {
        let pattern = Pattern::random(9, Some(SEED)).unwrap();
        let mut progress = ScriptedProgress {
            cancel_on_poll: Some(1),
            ..Default::default()
        };
        let result = PatternWriter::default().write(
            &mut Vec::new(),
            &pattern,
            PatternFormat::Macrocell,
            &Rect::new(0, 0, 0, 0),
            &mut progress,
        );
        assert!(matches!(result, Err(WriteError::Truncated)));
        assert_eq!(progress.ends, 1);
    }

    #[test]
    fn test_native_errors_surface() {
        let result = PatternWriter::default().write(
            &mut Vec::new(),
            &Pattern::default(),
            PatternFormat::Macrocell,
            &Rect::new(0, 0, 0, 0),
            &mut NoProgress,
        );
        match result {
            Err(WriteError::Native(err)) => {
                assert_eq!(err.to_string(), "Cannot serialize blank pattern")
            }
            other => panic!("unexpected result {other:?}"),
        }
    }

    #[test]
    fn test_sink_failure() {
        let cells = CellSet::from_cells("B3/S23", [(0, 0), (1, 1)]);
        for rect in [Rect::new(0, 0, 1, 1), Rect::new(1, 1, 0, 0)] {
            let result = PatternWriter::default().write(
                &mut FailingSink,
                &cells,
                PatternFormat::RLE,
                &rect,
                &mut NoProgress,
            );
            assert!(matches!(result, Err(WriteError::Io(_))));
        }
    }

    #[test]
    fn test_write_file() {
        let dir = tempfile::tempdir().unwrap();
        let cells = CellSet::from_cells("B3/S23", random_cells(500, -30..30));
        let rect = cells.find_edges().unwrap();

        let path = dir.path().join("random.rle");
        let format = PatternFormat::from_path(&path).unwrap();
        write_pattern(&path, &cells, format, &rect, &mut NoProgress).unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), to_rle(&cells, &rect));
    }

    #[test]
    fn test_sink_creation_failed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing").join("glider.rle");
        let cells = CellSet::from_cells("B3/S23", [(0, 0)]);
        let mut progress = ScriptedProgress::default();
        let result = write_pattern(
            &path,
            &cells,
            PatternFormat::RLE,
            &Rect::new(0, 0, 0, 0),
            &mut progress,
        );
        match result {
            Err(WriteError::SinkCreationFailed { path: p, .. }) => assert_eq!(p, path),
            other => panic!("unexpected result {other:?}"),
        }
        assert!(progress.begins.is_empty());
        assert!(!path.exists());
    }

    #[test]
    fn test_compressed_macrocell() {
        let dir = tempfile::tempdir().unwrap();
        let mut pattern = Pattern::random(7, Some(SEED)).unwrap();
        pattern.set_rule("B36/S23");

        let path = dir.path().join("random.mc.gz");
        let format = PatternFormat::from_path(&path).unwrap();
        assert_eq!(format, PatternFormat::CompressedMacrocell);
        write_pattern(&path, &pattern, format, &Rect::new(0, 0, 0, 0), &mut NoProgress).unwrap();

        let mut text = String::new();
        flate2::read::GzDecoder::new(std::fs::File::open(&path).unwrap())
            .read_to_string(&mut text)
            .unwrap();
        assert!(text.starts_with("[M2] (gol_patterns "));
        assert!(text.contains("\n#R B36/S23\n"));

        let loaded = Pattern::from_file(&path).unwrap();
        assert_eq!(loaded.rule(), "B36/S23");
        assert_eq!(loaded.population(), pattern.population());
        let rect = pattern.find_edges().unwrap();
        assert_eq!(to_rle(&loaded, &rect), to_rle(&pattern, &rect));
    }
}
