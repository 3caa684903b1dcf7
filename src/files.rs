//! Merging log files on disk.
//!
//! These functions check the preconditions of a merge and own the file
//! handles around it: both inputs must be existing regular files, the output
//! must not exist yet, and missing parent directories of the output are
//! created. Handles are released on every exit path.

use crate::merge::{merge_sorted, MergeError, MergeStats};
use crate::record::{io::open_input, KeyField};
use crate::stream::{RecordStream, Side};

use std::{
    fs::{self, OpenOptions},
    io::{self, BufWriter},
    path::{Path, PathBuf},
};
use thiserror::Error;
use tracing::debug;

pub const DEFAULT_BUFFER_SIZE: usize = 64 * 1024;

/// File-level merge error.
#[derive(Debug, Error)]
pub enum Error {
    #[error("log file at {} not found", .0.display())]
    InputNotFound(PathBuf),
    #[error("log file {} already exists", .0.display())]
    OutputExists(PathBuf),
    #[error("failed to create directory {}: {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to open {}: {source}", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Merge(#[from] MergeError),
}

pub struct MergeOptionsBuilder {
    key_field: String,
    buffer_size: usize,
}

impl MergeOptionsBuilder {
    pub fn new() -> Self {
        Self {
            key_field: KeyField::default().name().to_string(),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }

    /// Sets the name of the JSON member holding the timestamp of each record.
    pub fn with_key_field<S: Into<String>>(mut self, name: S) -> Self {
        self.key_field = name.into();
        self
    }

    /// Sets the I/O buffer size, in bytes, used for each input and the output.
    pub fn with_buffer_size(mut self, size: usize) -> Self {
        self.buffer_size = size.max(1);
        self
    }

    pub fn build(self) -> MergeOptions {
        MergeOptions {
            key_field: KeyField::new(self.key_field),
            buffer_size: self.buffer_size,
        }
    }
}

impl Default for MergeOptionsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug)]
pub struct MergeOptions {
    key_field: KeyField,
    buffer_size: usize,
}

impl MergeOptions {
    pub fn builder() -> MergeOptionsBuilder {
        MergeOptionsBuilder::new()
    }

    pub fn key_field(&self) -> &KeyField {
        &self.key_field
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }
}

impl Default for MergeOptions {
    fn default() -> Self {
        MergeOptionsBuilder::new().build()
    }
}

/// Checks that every input is an existing regular file and that the output
/// does not exist.
pub fn verify_files<P, Q>(inputs: &[P], output: Q) -> Result<(), Error>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    for input in inputs {
        let input = input.as_ref();
        if !input.is_file() {
            return Err(Error::InputNotFound(input.to_path_buf()));
        }
    }
    let output = output.as_ref();
    if output.exists() {
        return Err(Error::OutputExists(output.to_path_buf()));
    }
    Ok(())
}

/// Creates the missing parent directories of `output`.
pub fn make_parent_dirs<P: AsRef<Path>>(output: P) -> Result<(), Error> {
    match output.as_ref().parent() {
        Some(dir) if !dir.as_os_str().is_empty() && !dir.is_dir() => {
            debug!(dir = %dir.display(), "creating output directory");
            fs::create_dir_all(dir).map_err(|source| Error::CreateDir {
                path: dir.to_path_buf(),
                source,
            })
        }
        _ => Ok(()),
    }
}

/// Merges two sorted log files into a new file at `output`.
///
/// The output is created exclusively and never overwrites an existing file.
/// If the merge fails the records written so far are left in the output.
pub fn merge_files<P, Q>(inputs: [P; 2], output: Q, options: &MergeOptions) -> Result<MergeStats, Error>
where
    P: AsRef<Path>,
    Q: AsRef<Path>,
{
    let output = output.as_ref();
    verify_files(&inputs, output)?;
    make_parent_dirs(output)?;

    let [left, right] = inputs;
    let left = open_stream(left.as_ref(), Side::Left, options)?;
    let right = open_stream(right.as_ref(), Side::Right, options)?;

    let file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(output)
        .map_err(|source| match source.kind() {
            io::ErrorKind::AlreadyExists => Error::OutputExists(output.to_path_buf()),
            _ => Error::Open { path: output.to_path_buf(), source },
        })?;
    let sink = BufWriter::with_capacity(options.buffer_size(), file);

    debug!(output = %output.display(), key = %options.key_field(), "merging");
    Ok(merge_sorted(left, right, sink)?)
}

fn open_stream(
    path: &Path,
    side: Side,
    options: &MergeOptions,
) -> Result<RecordStream<Box<dyn io::BufRead>>, Error> {
    let reader = open_input(path, options.buffer_size()).map_err(|source| match source.kind() {
        io::ErrorKind::NotFound => Error::InputNotFound(path.to_path_buf()),
        _ => Error::Open { path: path.to_path_buf(), source },
    })?;
    debug!(%side, input = %path.display(), "opened input");
    Ok(RecordStream::new(reader, options.key_field().clone(), side))
}
