//! One-record-lookahead cursor over a log source.

use crate::record::{io::Reader, KeyField, ParseError, Record, Timestamp};

use std::{fmt, io, io::BufRead, mem};
use thiserror::Error;
use tracing::debug;

/// Which input of a binary merge a stream reads.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum Side {
    Left,
    Right,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Left => f.write_str("left"),
            Side::Right => f.write_str("right"),
        }
    }
}

/// Stream error
#[derive(Debug, Error)]
pub enum StreamError {
    /// Reading the underlying source failed.
    #[error("failed to read {side} input: {source}")]
    Io {
        side: Side,
        #[source]
        source: io::Error,
    },
    /// A line is present but its sort key cannot be extracted.
    #[error("malformed record on line {line} of {side} input: {source}")]
    Malformed {
        side: Side,
        line: u64,
        #[source]
        source: ParseError,
    },
    /// The stream was advanced again after a read or decode error.
    #[error("{side} input already failed after line {line}")]
    Aborted { side: Side, line: u64 },
}

enum Cursor {
    Unprimed,
    Current(Record),
    Exhausted,
    Failed,
}

/// A pull-based cursor over the records of a sorted log.
///
/// The stream holds at most one record, the current one, and moves forward
/// only when [`advance`](RecordStream::advance) is called. Once the source
/// runs out the stream is exhausted for good. A stream that hit an error is
/// failed, not exhausted, and refuses to go on.
pub struct RecordStream<R> {
    reader: Reader<R>,
    key_field: KeyField,
    side: Side,
    cursor: Cursor,
    /// Number of lines read so far.
    line: u64,
}

impl<R> RecordStream<R>
where
    R: BufRead,
{
    /// Creates an unprimed stream. Call [`advance`](RecordStream::advance)
    /// (or [`prime`](RecordStream::prime)) before reading the current record.
    pub fn new(reader: Reader<R>, key_field: KeyField, side: Side) -> Self {
        Self {
            reader,
            key_field,
            side,
            cursor: Cursor::Unprimed,
            line: 0,
        }
    }

    /// Reads the next line and makes it the current record.
    ///
    /// At the end of the input the current record is cleared and the stream
    /// becomes exhausted; further calls are no-ops. A line whose key cannot
    /// be extracted is an error, never treated as the end of the input.
    /// After any error the stream is failed and every later call returns
    /// [`StreamError::Aborted`].
    pub fn advance(&mut self) -> Result<(), StreamError> {
        let mut buf = match mem::replace(&mut self.cursor, Cursor::Failed) {
            Cursor::Current(record) => record.into_raw(),
            Cursor::Unprimed => Vec::new(),
            Cursor::Exhausted => {
                self.cursor = Cursor::Exhausted;
                return Ok(());
            }
            Cursor::Failed => return Err(self.aborted()),
        };
        buf.clear();

        let n = self.reader.read_record(&mut buf).map_err(|source| StreamError::Io {
            side: self.side,
            source,
        })?;
        if n == 0 {
            self.cursor = Cursor::Exhausted;
            debug!(side = %self.side, lines = self.line, "input exhausted");
            return Ok(());
        }

        self.line += 1;
        let record = Record::from_line(buf, &self.key_field).map_err(|source| {
            StreamError::Malformed { side: self.side, line: self.line, source }
        })?;
        self.cursor = Cursor::Current(record);
        Ok(())
    }

    /// Fails with [`StreamError::Aborted`] if an earlier advance failed.
    pub fn check(&self) -> Result<(), StreamError> {
        if self.is_failed() {
            Err(self.aborted())
        } else {
            Ok(())
        }
    }

    fn aborted(&self) -> StreamError {
        StreamError::Aborted { side: self.side, line: self.line }
    }

    /// Advances the stream only if it has never been advanced.
    pub fn prime(&mut self) -> Result<(), StreamError> {
        if self.is_primed() {
            Ok(())
        } else {
            self.advance()
        }
    }

    /// The current record, if any.
    pub fn current(&self) -> Option<&Record> {
        match &self.cursor {
            Cursor::Current(record) => Some(record),
            _ => None,
        }
    }

    /// The sort key of the current record, if any.
    pub fn key(&self) -> Option<&Timestamp> {
        self.current().map(Record::key)
    }

    pub fn is_primed(&self) -> bool {
        !matches!(self.cursor, Cursor::Unprimed)
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.cursor, Cursor::Exhausted)
    }

    pub fn is_failed(&self) -> bool {
        matches!(self.cursor, Cursor::Failed)
    }

    pub fn side(&self) -> Side {
        self.side
    }

    /// Line number of the current record, or of the last line read.
    pub fn line_number(&self) -> u64 {
        self.line
    }
}
