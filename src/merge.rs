//! Two-way merge of sorted record streams.

use crate::record::io::Writer;
use crate::stream::{RecordStream, Side, StreamError};

use std::io::{self, BufRead, Write};
use thiserror::Error;
use tracing::{debug, info};

/// Merge error
#[derive(Debug, Error)]
pub enum MergeError {
    /// Reading or decoding one of the inputs failed.
    #[error(transparent)]
    Stream(#[from] StreamError),
    /// Writing to the sink failed.
    #[error("failed to write merged output: {0}")]
    Write(#[source] io::Error),
}

/// Progress of a merge run.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum MergeState {
    /// Both streams still have a current record.
    BothActive,
    /// The given side is exhausted; the other one is being drained.
    OneExhausted(Side),
    BothExhausted,
}

/// Number of records written from each side.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct MergeStats {
    pub left: u64,
    pub right: u64,
}

impl MergeStats {
    pub fn total(&self) -> u64 {
        self.left + self.right
    }
}

/// Interleaves two sorted record streams into a sink in global key order.
///
/// On every step the side whose current key is not greater is written and
/// advanced, so equal keys come out left before right. Once a side is
/// exhausted the other is drained without further comparisons. Nothing is
/// buffered beyond the current record of each stream.
pub struct BinaryMerger<L, R, W> {
    left: RecordStream<L>,
    right: RecordStream<R>,
    sink: Writer<W>,
    stats: MergeStats,
}

impl<L, R, W> BinaryMerger<L, R, W>
where
    L: BufRead,
    R: BufRead,
    W: Write,
{
    /// Creates a merger, priming either stream that has not been advanced yet.
    pub fn new(
        mut left: RecordStream<L>,
        mut right: RecordStream<R>,
        sink: W,
    ) -> Result<Self, MergeError> {
        left.prime()?;
        right.prime()?;
        Ok(Self { left, right, sink: Writer::new(sink), stats: MergeStats::default() })
    }

    pub fn state(&self) -> MergeState {
        match (self.left.is_exhausted(), self.right.is_exhausted()) {
            (false, false) => MergeState::BothActive,
            (true, false) => MergeState::OneExhausted(Side::Left),
            (false, true) => MergeState::OneExhausted(Side::Right),
            (true, true) => MergeState::BothExhausted,
        }
    }

    /// Writes the next record in key order and advances its stream.
    ///
    /// Returns the side the record came from, or `None` once both streams are
    /// exhausted. After either stream has failed every call is an error, so
    /// the other side is never drained past a bad record.
    pub fn step(&mut self) -> Result<Option<Side>, MergeError> {
        self.left.check()?;
        self.right.check()?;
        let side = match (self.left.key(), self.right.key()) {
            (Some(l), Some(r)) => {
                if l <= r {
                    Side::Left
                } else {
                    Side::Right
                }
            }
            (Some(_), None) => Side::Left,
            (None, Some(_)) => Side::Right,
            (None, None) => return Ok(None),
        };
        match side {
            Side::Left => {
                write_current(&self.left, &mut self.sink)?;
                self.stats.left += 1;
                self.left.advance()?;
            }
            Side::Right => {
                write_current(&self.right, &mut self.sink)?;
                self.stats.right += 1;
                self.right.advance()?;
            }
        }
        Ok(Some(side))
    }

    pub fn stats(&self) -> MergeStats {
        self.stats
    }

    /// Runs the merge to completion and flushes the sink.
    pub fn run(mut self) -> Result<MergeStats, MergeError> {
        let mut state = self.state();
        while self.step()?.is_some() {
            let next = self.state();
            if next != state {
                debug!(?next, left = self.stats.left, right = self.stats.right, "merge state changed");
                state = next;
            }
        }
        self.sink.finish().map_err(MergeError::Write)?;
        Ok(self.stats)
    }
}

fn write_current<S, W>(stream: &RecordStream<S>, sink: &mut Writer<W>) -> Result<(), MergeError>
where
    S: BufRead,
    W: Write,
{
    if let Some(record) = stream.current() {
        sink.write_record(record).map_err(MergeError::Write)?;
    }
    Ok(())
}

/// Merges two sorted streams into `sink`.
///
/// Output already written is left in place when an error aborts the merge.
pub fn merge_sorted<L, R, W>(
    left: RecordStream<L>,
    right: RecordStream<R>,
    sink: W,
) -> Result<MergeStats, MergeError>
where
    L: BufRead,
    R: BufRead,
    W: Write,
{
    let stats = BinaryMerger::new(left, right, sink)?.run()?;
    info!(left = stats.left, right = stats.right, "merged {} records", stats.total());
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{io::Reader, KeyField, ParseError, Record};
    use itertools::Itertools;
    use rand::Rng;
    use rstest::rstest;

    fn stream<'a>(data: &'a [u8], side: Side) -> RecordStream<&'a [u8]> {
        RecordStream::new(Reader::new(data), KeyField::default(), side)
    }

    fn merge(left: &str, right: &str) -> Result<(MergeStats, String), MergeError> {
        let mut out = Vec::new();
        let stats = merge_sorted(
            stream(left.as_bytes(), Side::Left),
            stream(right.as_bytes(), Side::Right),
            &mut out,
        )?;
        Ok((stats, String::from_utf8(out).unwrap()))
    }

    fn lines(records: &[(i64, &str)]) -> String {
        records
            .iter()
            .map(|(ts, msg)| format!("{{\"timestamp\":{},\"msg\":\"{}\"}}\n", ts, msg))
            .collect()
    }

    #[test]
    fn test_interleave() {
        let left = lines(&[(1, "a1"), (3, "a2")]);
        let right = lines(&[(2, "b1")]);
        let (stats, out) = merge(&left, &right).unwrap();
        assert_eq!(out, lines(&[(1, "a1"), (2, "b1"), (3, "a2")]));
        assert_eq!(stats, MergeStats { left: 2, right: 1 });
    }

    #[rstest]
    #[case(&[(5, "a")], &[(5, "b")], &[(5, "a"), (5, "b")])]
    #[case(&[(5, "b")], &[(5, "a")], &[(5, "b"), (5, "a")])]
    #[case(&[(1, "a1"), (1, "a2")], &[(1, "b1"), (1, "b2")], &[(1, "a1"), (1, "a2"), (1, "b1"), (1, "b2")])]
    #[case(&[(1, "a1"), (2, "a2")], &[(1, "b1"), (2, "b2")], &[(1, "a1"), (1, "b1"), (2, "a2"), (2, "b2")])]
    fn test_ties_prefer_left(
        #[case] left: &[(i64, &str)],
        #[case] right: &[(i64, &str)],
        #[case] expected: &[(i64, &str)],
    ) {
        let (_, out) = merge(&lines(left), &lines(right)).unwrap();
        assert_eq!(out, lines(expected));
    }

    #[rstest]
    #[case(true)]
    #[case(false)]
    fn test_drain(#[case] left_empty: bool) {
        let full = lines(&[(3, "x"), (1, "unsorted"), (2, "y")]);
        let (stats, out) = if left_empty { merge("", &full) } else { merge(&full, "") }.unwrap();
        assert_eq!(out, full);
        assert_eq!(stats.total(), 3);
    }

    #[test]
    fn test_empty() {
        let (stats, out) = merge("", "").unwrap();
        assert!(out.is_empty());
        assert_eq!(stats, MergeStats::default());
    }

    #[test]
    fn test_state_machine() {
        let left = lines(&[(1, "a"), (4, "b")]);
        let right = lines(&[(2, "c")]);
        let mut out = Vec::new();
        let mut merger = BinaryMerger::new(
            stream(left.as_bytes(), Side::Left),
            stream(right.as_bytes(), Side::Right),
            &mut out,
        ).unwrap();

        assert_eq!(merger.state(), MergeState::BothActive);
        assert_eq!(merger.step().unwrap(), Some(Side::Left));
        assert_eq!(merger.state(), MergeState::BothActive);
        assert_eq!(merger.step().unwrap(), Some(Side::Right));
        assert_eq!(merger.state(), MergeState::OneExhausted(Side::Right));
        assert_eq!(merger.step().unwrap(), Some(Side::Left));
        assert_eq!(merger.state(), MergeState::BothExhausted);
        assert_eq!(merger.step().unwrap(), None);
        assert_eq!(merger.state(), MergeState::BothExhausted);
        assert_eq!(merger.stats(), MergeStats { left: 2, right: 1 });
    }

    #[test]
    fn test_already_primed() {
        let mut left = stream(b"{\"timestamp\":2}\n", Side::Left);
        left.advance().unwrap();
        let mut out = Vec::new();
        let stats = merge_sorted(left, stream(b"{\"timestamp\":1}\n", Side::Right), &mut out).unwrap();
        assert_eq!(stats.total(), 2);
        assert_eq!(out, b"{\"timestamp\":1}\n{\"timestamp\":2}\n");
    }

    #[test]
    fn test_malformed_aborts() {
        let left = "{\"timestamp\":1,\"msg\":\"a1\"}\n{\"msg\":\"a2\"}\n{\"timestamp\":9}\n";
        let right = lines(&[(2, "b1")]);
        let mut out = Vec::new();
        let err = merge_sorted(
            stream(left.as_bytes(), Side::Left),
            stream(right.as_bytes(), Side::Right),
            &mut out,
        ).unwrap_err();

        match err {
            MergeError::Stream(StreamError::Malformed { side: Side::Left, line: 2, source }) => {
                assert!(matches!(source, ParseError::MissingKey(_)));
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(out, b"{\"timestamp\":1,\"msg\":\"a1\"}\n");
    }

    #[test]
    fn test_no_progress_after_error() {
        let left = b"{\"timestamp\":1}\nbad\n{\"timestamp\":2}\n";
        let right = b"{\"timestamp\":5}\n";
        let mut out = Vec::new();
        let mut merger =
            BinaryMerger::new(stream(left, Side::Left), stream(right, Side::Right), &mut out).unwrap();

        let err = merger.step().unwrap_err();
        assert!(matches!(
            err,
            MergeError::Stream(StreamError::Malformed { side: Side::Left, line: 2, .. })
        ));
        for _ in 0..2 {
            let err = merger.step().unwrap_err();
            assert!(matches!(err, MergeError::Stream(StreamError::Aborted { side: Side::Left, .. })));
        }
        assert_eq!(merger.state(), MergeState::BothActive);
        assert_eq!(merger.stats(), MergeStats { left: 1, right: 0 });
        drop(merger);
        assert_eq!(out, b"{\"timestamp\":1}\n");
    }

    struct Broken;

    impl io::Read for Broken {
        fn read(&mut self, _: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::Other, "device gone"))
        }
    }

    #[test]
    fn test_read_error_aborts() {
        use std::io::Read;

        let left = io::BufReader::new((b"{\"timestamp\":1}\n{\"timestamp\":3}\n" as &[u8]).chain(Broken));
        let left = RecordStream::new(Reader::new(left), KeyField::default(), Side::Left);
        let right = stream(b"{\"timestamp\":2}\n{\"timestamp\":4}\n", Side::Right);
        let mut out = Vec::new();

        let err = merge_sorted(left, right, &mut out).unwrap_err();
        assert!(matches!(err, MergeError::Stream(StreamError::Io { side: Side::Left, .. })));
        assert_eq!(out, b"{\"timestamp\":1}\n{\"timestamp\":2}\n{\"timestamp\":3}\n");
    }

    /// Accepts `limit` bytes, then fails every write.
    struct LimitedSink {
        buf: Vec<u8>,
        limit: usize,
    }

    impl Write for LimitedSink {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            let room = self.limit - self.buf.len();
            if room == 0 {
                return Err(io::Error::new(io::ErrorKind::Other, "disk full"));
            }
            let n = room.min(data.len());
            self.buf.extend_from_slice(&data[..n]);
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_write_error_aborts() {
        let first = "{\"timestamp\":1}\n";
        let left = lines(&[(3, "a")]);
        let right = format!("{}{}", first, lines(&[(2, "b")]));
        let mut sink = LimitedSink { buf: Vec::new(), limit: first.len() + 3 };

        let err = merge_sorted(
            stream(left.as_bytes(), Side::Left),
            stream(right.as_bytes(), Side::Right),
            &mut sink,
        ).unwrap_err();

        assert!(matches!(err, MergeError::Write(ref e) if e.kind() == io::ErrorKind::Other));
        assert_eq!(sink.buf, format!("{}{{\"t", first).as_bytes());
    }

    #[test]
    fn test_large_integer_against_float() {
        let left = "{\"timestamp\":9007199254740993}\n";
        let right = "{\"timestamp\":9007199254740992.0}\n";
        let (_, out) = merge(left, right).unwrap();
        assert_eq!(out, format!("{}{}", right, left));
    }

    #[test]
    fn test_malformed_first_line() {
        let err = merge("{\"timestamp\":1}\n", "oops\n").unwrap_err();
        assert!(matches!(
            err,
            MergeError::Stream(StreamError::Malformed { side: Side::Right, line: 1, .. })
        ));
    }

    #[test]
    fn test_missing_final_newline() {
        let left = "{\"timestamp\":1}";
        let right = "{\"timestamp\":2}\r\n{\"timestamp\":3}";
        let (_, out) = merge(left, right).unwrap();
        assert_eq!(out, "{\"timestamp\":1}\n{\"timestamp\":2}\r\n{\"timestamp\":3}");
    }

    #[test]
    fn test_mixed_keys() {
        let left = "{\"timestamp\":1.5}\n{\"timestamp\":\"2024-01-02\"}\n";
        let right = "{\"timestamp\":2}\n{\"timestamp\":\"2024-01-01\"}\n";
        let (_, out) = merge(left, right).unwrap();
        assert_eq!(
            out,
            "{\"timestamp\":1.5}\n{\"timestamp\":2}\n{\"timestamp\":\"2024-01-01\"}\n{\"timestamp\":\"2024-01-02\"}\n",
        );
    }

    #[test]
    fn test_random() {
        let mut rng = rand::thread_rng();
        for _ in 0..50 {
            let n = rng.gen_range(0..30);
            let m = rng.gen_range(0..30);
            let mut sorted_lines = |n: usize, tag: &str| -> Vec<String> {
                let mut ts: Vec<i64> = (0..n).map(|_| rng.gen_range(0..20)).collect();
                ts.sort();
                ts.into_iter()
                    .enumerate()
                    .map(|(i, t)| format!("{{\"timestamp\":{},\"id\":\"{}{}\"}}\n", t, tag, i))
                    .collect()
            };
            let left = sorted_lines(n, "a");
            let right = sorted_lines(m, "b");

            let (stats, out) = merge(&left.concat(), &right.concat()).unwrap();

            let key = |line: &String| line.parse::<Record>().unwrap().key().clone();
            let expected: String = left
                .iter()
                .merge_by(right.iter(), |a, b| key(a) <= key(b))
                .map(String::as_str)
                .collect();
            assert_eq!(out, expected);
            assert_eq!(stats, MergeStats { left: n as u64, right: m as u64 });
            assert!(out
                .lines()
                .map(|l| l.parse::<Record>().unwrap().key().clone())
                .tuple_windows()
                .all(|(a, b)| a <= b));
        }
    }
}
