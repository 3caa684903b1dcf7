//! Streaming merge of timestamp-ordered, line-delimited JSON logs.
//!
//! Every input line is a JSON object carrying its own timestamp. Two inputs,
//! each already sorted by that timestamp, are merged into a single output in
//! global timestamp order. Neither input is loaded into memory: the merge
//! holds exactly one record per side and copies each line through verbatim.
//!
//! ```no_run
//! use log_merge::{merge_files, MergeOptions};
//!
//! let options = MergeOptions::builder().with_key_field("ts").build();
//! let stats = merge_files(["a.log", "b.log"], "out/merged.log", &options)?;
//! println!("{} records", stats.total());
//! # Ok::<(), log_merge::Error>(())
//! ```

pub mod files;
pub mod merge;
pub mod record;
pub mod stream;

pub use files::{merge_files, Error, MergeOptions, MergeOptionsBuilder};
pub use merge::{merge_sorted, BinaryMerger, MergeError, MergeState, MergeStats};
pub use record::{KeyField, ParseError, Record, Timestamp};
pub use stream::{RecordStream, Side, StreamError};
