use std::io::{Result, Write};

/// Batches single bytes into blocks before handing them to the sink.
///
/// Pattern data is produced one character at a time, so writing straight
/// to a file would cost a call per byte.
pub(super) struct OutputBuffer<'a, W: Write + ?Sized> {
    sink: &'a mut W,
    buf: Box<[u8]>,
    pos: usize,
    /// Bytes handed to the sink so far, only used for progress messages.
    written: u64,
}

impl<'a, W: Write + ?Sized> OutputBuffer<'a, W> {
    pub(super) fn new(sink: &'a mut W, capacity: usize) -> Self {
        Self {
            sink,
            buf: vec![0; capacity.max(1)].into_boxed_slice(),
            pos: 0,
            written: 0,
        }
    }

    #[inline]
    pub(super) fn put(&mut self, byte: u8) -> Result<()> {
        if self.pos == self.buf.len() {
            self.sink.write_all(&self.buf)?;
            self.pos = 0;
            self.written += self.buf.len() as u64;
        }
        self.buf[self.pos] = byte;
        self.pos += 1;
        Ok(())
    }

    pub(super) fn put_slice(&mut self, bytes: &[u8]) -> Result<()> {
        for &b in bytes {
            self.put(b)?;
        }
        Ok(())
    }

    /// Bytes already handed to the sink, excluding the pending block.
    pub(super) fn bytes_written(&self) -> u64 {
        self.written
    }

    /// Writes the used prefix of the pending block and flushes the sink.
    pub(super) fn finish(&mut self) -> Result<()> {
        self.sink.write_all(&self.buf[..self.pos])?;
        self.written += self.pos as u64;
        self.pos = 0;
        self.sink.flush()
    }
}
