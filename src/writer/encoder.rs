use super::output::OutputBuffer;
use std::io::{Result, Write};

/// No line of RLE data may be longer than this.
pub(super) const MAX_LINE_LEN: usize = 70;

/// Symbols of the RLE body.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum Token {
    Dead,
    Alive,
    EndOfLine,
    EndOfPattern,
}

impl Token {
    pub(super) const fn symbol(self) -> u8 {
        match self {
            Token::Dead => b'b',
            Token::Alive => b'o',
            Token::EndOfLine => b'$',
            Token::EndOfPattern => b'!',
        }
    }
}

/// Emits runs and hard-wraps the output so that no line exceeds
/// [`MAX_LINE_LEN`]. A run is never split between two lines.
#[derive(Default)]
pub(super) struct LineEncoder {
    line_len: usize,
}

impl LineEncoder {
    pub(super) fn add_run<W: Write + ?Sized>(
        &mut self,
        out: &mut OutputBuffer<W>,
        token: Token,
        run: u64,
    ) -> Result<()> {
        let mut digits = [0; 20];
        // no count is shown for a single cell
        let count = if run > 1 {
            format_decimal(run, &mut digits)
        } else {
            &[][..]
        };
        if self.line_len + count.len() + 1 > MAX_LINE_LEN {
            out.put(b'\n')?;
            self.line_len = 0;
        }
        out.put_slice(count)?;
        out.put(token.symbol())?;
        self.line_len += count.len() + 1;
        Ok(())
    }
}

fn format_decimal(mut n: u64, buf: &mut [u8; 20]) -> &[u8] {
    let mut i = buf.len();
    loop {
        i -= 1;
        buf[i] = b'0' + (n % 10) as u8;
        n /= 10;
        if n == 0 {
            break;
        }
    }
    &buf[i..]
}

/// What the current row ended with so far.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum LastToken {
    None,
    Dead,
    Alive,
}

/// Accumulates runs of dead cells, alive cells and row ends, and flushes a
/// run only when a different token begins.
///
/// Only the current run of each kind is kept, so memory does not depend on
/// the size of the pattern.
pub(super) struct RunAccumulator {
    dead: u64,
    alive: u64,
    rows: u64,
    last: LastToken,
    line: LineEncoder,
}

impl RunAccumulator {
    pub(super) fn new() -> Self {
        Self {
            dead: 0,
            alive: 0,
            rows: 0,
            last: LastToken::None,
            line: LineEncoder::default(),
        }
    }

    pub(super) fn start_row(&mut self) {
        self.last = LastToken::None;
    }

    /// Records `count` consecutive dead cells.
    pub(super) fn dead_cells<W: Write + ?Sized>(
        &mut self,
        out: &mut OutputBuffer<W>,
        count: u64,
    ) -> Result<()> {
        if self.last == LastToken::Dead {
            self.dead += count;
        } else {
            self.flush(out, Token::Alive)?;
            self.last = LastToken::Dead;
            self.dead = count;
        }
        Ok(())
    }

    /// Records a single alive cell.
    pub(super) fn live_cell<W: Write + ?Sized>(&mut self, out: &mut OutputBuffer<W>) -> Result<()> {
        if self.last == LastToken::Alive {
            self.alive += 1;
        } else {
            self.flush(out, Token::EndOfLine)?;
            self.flush(out, Token::Dead)?;
            self.last = LastToken::Alive;
            self.alive = 1;
        }
        Ok(())
    }

    /// Closes the current row. Dead cells at the end of a row are implicit
    /// and never written.
    pub(super) fn end_row<W: Write + ?Sized>(&mut self, out: &mut OutputBuffer<W>) -> Result<()> {
        match self.last {
            LastToken::Dead => self.dead = 0,
            LastToken::Alive => self.flush(out, Token::Alive)?,
            LastToken::None => (),
        }
        self.rows += 1;
        Ok(())
    }

    /// Terminates the pattern. Pending row ends are dropped, `!` implies them.
    pub(super) fn finish<W: Write + ?Sized>(&mut self, out: &mut OutputBuffer<W>) -> Result<()> {
        self.rows = 0;
        self.line.add_run(out, Token::EndOfPattern, 1)?;
        out.put(b'\n')
    }

    /// Emits the pending run of `token`, if any, and resets it.
    fn flush<W: Write + ?Sized>(&mut self, out: &mut OutputBuffer<W>, token: Token) -> Result<()> {
        let run = match token {
            Token::Dead => &mut self.dead,
            Token::Alive => &mut self.alive,
            Token::EndOfLine => &mut self.rows,
            Token::EndOfPattern => return Ok(()),
        };
        if *run > 0 {
            let count = std::mem::take(run);
            self.line.add_run(out, token, count)?;
        }
        Ok(())
    }
}
