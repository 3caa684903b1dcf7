use super::Record;

use flate2::bufread::MultiGzDecoder;
use std::{
    fs::File,
    io::{self, BufRead, BufReader, Write},
    path::Path,
};

use super::LINE_FEED;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// A log reader.
pub struct Reader<R> {
    inner: R,
}

impl<R> Reader<R>
where
    R: BufRead,
{
    /// Creates a log reader.
    pub fn new(inner: R) -> Self {
        Self { inner }
    }

    /// Reads a single raw line, appending it to `buf`.
    ///
    /// The line terminator is kept, so the bytes can be written back out
    /// unchanged. Returns the number of bytes read; zero means the end of
    /// the input.
    pub fn read_record(&mut self, buf: &mut Vec<u8>) -> io::Result<usize> {
        self.inner.read_until(LINE_FEED, buf)
    }
}

/// Opens a log file for reading. Gzip-compressed files, including
/// concatenated multi-member ones, are decoded transparently.
pub fn open_input<P: AsRef<Path>>(
    path: P,
    buffer_size: usize,
) -> io::Result<Reader<Box<dyn BufRead>>> {
    let mut file = BufReader::with_capacity(buffer_size, File::open(path)?);
    let inner: Box<dyn BufRead> = if is_gzipped(&mut file)? {
        Box::new(BufReader::with_capacity(buffer_size, MultiGzDecoder::new(file)))
    } else {
        Box::new(file)
    };
    Ok(Reader::new(inner))
}

/// Determine if a stream is gzipped, without consuming it.
fn is_gzipped<R: BufRead>(reader: &mut R) -> io::Result<bool> {
    Ok(reader.fill_buf()?.starts_with(&GZIP_MAGIC))
}

/// A log writer.
///
/// Records are written byte for byte. A record lacking a line terminator
/// (the last line of an input without a trailing newline) is separated from
/// the next record by a single line feed.
pub struct Writer<W> {
    inner: W,
    open_line: bool,
}

impl<W> Writer<W>
where
    W: Write,
{
    /// Creates a log writer.
    pub fn new(inner: W) -> Self {
        Self { inner, open_line: false }
    }

    /// Writes a log record.
    pub fn write_record(&mut self, record: &Record) -> io::Result<()> {
        if self.open_line {
            self.inner.write_all(&[LINE_FEED])?;
        }
        self.inner.write_all(record.raw())?;
        self.open_line = !record.has_terminator();
        Ok(())
    }

    /// Flushes and returns the underlying writer.
    pub fn finish(mut self) -> io::Result<W> {
        self.inner.flush()?;
        Ok(self.inner)
    }
}
