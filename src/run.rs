//! Run files.

use std::fs;
use std::io;
use std::path::Path;

use crate::catalog::{RunId, RunMeta};
use crate::record::{Record, RecordReader, RecordWriter};
use crate::sort::SortError;

fn buffered_writer(file: fs::File, buf_size: Option<usize>) -> io::BufWriter<fs::File> {
    match buf_size {
        Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
        None => io::BufWriter::new(file),
    }
}

fn buffered_reader(file: fs::File, buf_size: Option<usize>) -> io::BufReader<fs::File> {
    match buf_size {
        Some(buf_size) => io::BufReader::with_capacity(buf_size, file),
        None => io::BufReader::new(file),
    }
}

/// Creates a new run file for writing. Fails if the file already exists.
pub(crate) fn create_run<T: Record>(
    path: &Path,
    buf_size: Option<usize>,
) -> io::Result<RecordWriter<T, io::BufWriter<fs::File>>> {
    let file = fs::OpenOptions::new().write(true).create_new(true).open(path)?;
    return Ok(RecordWriter::new(buffered_writer(file, buf_size)));
}

/// Dumps sorted records to a new run file.
///
/// A partially written file is removed on failure, so a run either exists completely or not at all.
pub(crate) fn write_run<T: Record>(path: &Path, items: &[T], buf_size: Option<usize>) -> io::Result<()> {
    let writer = create_run(path, buf_size)?;

    let result = fill_run(writer, items);
    if result.is_err() {
        let _ = fs::remove_file(path);
    }

    return result;
}

fn fill_run<T: Record, W: io::Write>(mut writer: RecordWriter<T, W>, items: &[T]) -> io::Result<()> {
    for item in items {
        writer.write_record(item)?;
    }
    writer.into_inner().map(drop)
}

#[cfg(unix)]
fn is_handle_exhaustion(err: &io::Error) -> bool {
    matches!(err.raw_os_error(), Some(libc::EMFILE) | Some(libc::ENFILE))
}

#[cfg(not(unix))]
fn is_handle_exhaustion(_err: &io::Error) -> bool {
    false
}

/// Maps a run open failure to the sorting error it is reported as.
fn open_error(run: RunId, err: io::Error) -> SortError {
    if is_handle_exhaustion(&err) {
        SortError::ResourceExhausted { run, source: err }
    } else {
        SortError::RunOpenFailure { run, source: err }
    }
}

/// Merge cursor: the read position inside a single run.
///
/// The cursor owns the only open handle to its run; dropping the cursor closes the run.
pub struct RunCursor<T> {
    run: RunId,
    reader: RecordReader<T, io::BufReader<fs::File>>,
}

impl<T: Record> RunCursor<T> {
    /// Opens a run for reading.
    pub fn open(meta: &RunMeta, buf_size: Option<usize>) -> Result<Self, SortError> {
        let file = fs::File::open(&meta.path).map_err(|err| open_error(meta.id, err))?;

        return Ok(RunCursor {
            run: meta.id,
            reader: RecordReader::new(buffered_reader(file, buf_size)),
        });
    }

    pub fn run(&self) -> RunId {
        self.run
    }

    /// Returns the next record of the run or [`None`] once the run is exhausted.
    pub fn next_record(&mut self) -> Result<Option<T>, SortError> {
        self.reader
            .read_record()
            .map_err(|err| SortError::RunReadError { run: self.run, source: err })
    }
}
