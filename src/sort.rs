//! External sorter.

use log;
use std::error::Error;
use std::fmt;
use std::fmt::Display;
use std::fs;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::buffer::{MemoryLimitedBuffer, MemoryLimitedBufferBuilder};
use crate::catalog::{RunCatalog, RunId, RunMeta};
use crate::merger;
use crate::record::{Record, RecordReader, RecordWriter};
use crate::run;
use crate::workspace::{release_runs, RunWorkspace};

/// Default maximum number of runs merged at once.
pub const DEFAULT_FAN_IN: usize = 64;
/// Default run file name prefix.
pub const DEFAULT_RUN_PREFIX: &str = "temp_";

const OUTPUT_TMP_PREFIX: &str = ".ext-record-sort-";

/// Sorting error.
#[derive(Debug)]
pub enum SortError {
    /// Sorter configuration is not usable.
    InvalidConfig(String),
    /// Temporary directory creation error.
    TempDir(io::Error),
    /// Input file can't be opened.
    InputUnavailable(io::Error),
    /// Input data stream error, including a trailing partial record.
    InputError(io::Error),
    /// Output or run file can't be created or written.
    OutputUnwritable(io::Error),
    /// Run file can't be opened for merging.
    RunOpenFailure { run: RunId, source: io::Error },
    /// Run file read error during merging.
    RunReadError { run: RunId, source: io::Error },
    /// Out of file handles while opening a run for merging.
    ResourceExhausted { run: RunId, source: io::Error },
    /// Sorting was cancelled through the cancellation flag.
    Cancelled,
}

impl Error for SortError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self {
            SortError::InvalidConfig(_) => None,
            SortError::TempDir(err) => Some(err),
            SortError::InputUnavailable(err) => Some(err),
            SortError::InputError(err) => Some(err),
            SortError::OutputUnwritable(err) => Some(err),
            SortError::RunOpenFailure { source, .. } => Some(source),
            SortError::RunReadError { source, .. } => Some(source),
            SortError::ResourceExhausted { source, .. } => Some(source),
            SortError::Cancelled => None,
        }
    }
}

impl Display for SortError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self {
            SortError::InvalidConfig(reason) => write!(f, "invalid sorter configuration: {}", reason),
            SortError::TempDir(err) => write!(f, "temporary directory not created: {}", err),
            SortError::InputUnavailable(err) => write!(f, "input not available: {}", err),
            SortError::InputError(err) => write!(f, "input data stream error: {}", err),
            SortError::OutputUnwritable(err) => write!(f, "output not writable: {}", err),
            SortError::RunOpenFailure { run, source } => write!(f, "run {} can't be opened: {}", run, source),
            SortError::RunReadError { run, source } => write!(f, "run {} read failed: {}", run, source),
            SortError::ResourceExhausted { run, source } => {
                write!(f, "out of file handles while opening run {}: {}", run, source)
            }
            SortError::Cancelled => write!(f, "sorting cancelled"),
        }
    }
}

/// Sorting summary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortStats {
    /// Number of records sorted.
    pub records: u64,
    /// Number of runs created by run formation.
    pub runs: usize,
    /// Number of merge passes, the final one included.
    pub merge_passes: usize,
}

/// External sorter builder. Provides methods for [`ExternalSorter`] initialization.
#[derive(Clone)]
pub struct ExternalSorterBuilder<T: Record> {
    /// Directory to be used to store temporary data.
    tmp_dir: Option<Box<Path>>,
    /// Run file name prefix.
    run_prefix: String,
    /// Maximum number of runs merged at once.
    fan_in: usize,
    /// Run file read/write buffer size.
    rw_buf_size: Option<usize>,
    /// Run buffer builder.
    buffer_builder: MemoryLimitedBufferBuilder,
    /// Cancellation flag.
    cancel: Option<Arc<AtomicBool>>,

    /// Record type.
    item_type: PhantomData<T>,
}

impl<T: Record> ExternalSorterBuilder<T> {
    /// Creates an instance of a builder with default parameters.
    pub fn new() -> Self {
        ExternalSorterBuilder::default()
    }

    /// Builds an [`ExternalSorter`] instance using provided configuration.
    pub fn build(self) -> Result<ExternalSorter<T>, SortError> {
        if self.buffer_builder.capacity::<T>() == 0 {
            return Err(SortError::InvalidConfig(format!(
                "memory budget of {} bytes doesn't fit a single {}-byte record",
                self.buffer_builder.buffer_limit(),
                T::WIDTH
            )));
        }
        if self.fan_in < 2 {
            return Err(SortError::InvalidConfig(format!(
                "merge fan-in must be at least 2, got {}",
                self.fan_in
            )));
        }
        if self.run_prefix.contains(std::path::is_separator) {
            return Err(SortError::InvalidConfig(format!(
                "run prefix '{}' contains a path separator",
                self.run_prefix
            )));
        }

        return Ok(ExternalSorter {
            tmp_dir: self.tmp_dir,
            run_prefix: self.run_prefix,
            fan_in: self.fan_in,
            rw_buf_size: self.rw_buf_size,
            buffer_builder: self.buffer_builder,
            cancel: self.cancel,
            item_type: PhantomData,
        });
    }

    /// Sets directory to be used to store temporary data.
    pub fn with_tmp_dir(mut self, path: &Path) -> ExternalSorterBuilder<T> {
        self.tmp_dir = Some(path.into());
        return self;
    }

    /// Sets run file name prefix.
    pub fn with_run_prefix(mut self, prefix: &str) -> ExternalSorterBuilder<T> {
        self.run_prefix = prefix.to_string();
        return self;
    }

    /// Sets maximum number of runs merged at once. More runs are merged in several passes.
    pub fn with_fan_in(mut self, fan_in: usize) -> ExternalSorterBuilder<T> {
        self.fan_in = fan_in;
        return self;
    }

    /// Sets run buffer builder which defines the memory budget of a run.
    pub fn with_buffer(mut self, buffer_builder: MemoryLimitedBufferBuilder) -> ExternalSorterBuilder<T> {
        self.buffer_builder = buffer_builder;
        return self;
    }

    /// Sets run read/write buffer size.
    pub fn with_rw_buf_size(mut self, buf_size: usize) -> ExternalSorterBuilder<T> {
        self.rw_buf_size = Some(buf_size);
        return self;
    }

    /// Sets cancellation flag. Once the flag is raised sorting stops with [`SortError::Cancelled`].
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> ExternalSorterBuilder<T> {
        self.cancel = Some(cancel);
        return self;
    }
}

impl<T: Record> Default for ExternalSorterBuilder<T> {
    fn default() -> Self {
        ExternalSorterBuilder {
            tmp_dir: None,
            run_prefix: DEFAULT_RUN_PREFIX.to_string(),
            fan_in: DEFAULT_FAN_IN,
            rw_buf_size: None,
            buffer_builder: MemoryLimitedBufferBuilder::default(),
            cancel: None,
            item_type: PhantomData,
        }
    }
}

/// External sorter.
///
/// Sorting runs in two stages. Run formation reads records into a memory limited buffer, sorts each full
/// buffer and saves it as a run. The merge then combines the runs listed in the [`RunCatalog`] with a k-way merge,
/// merging in several passes whenever there are more runs than the configured fan-in.
pub struct ExternalSorter<T: Record> {
    tmp_dir: Option<Box<Path>>,
    run_prefix: String,
    fan_in: usize,
    rw_buf_size: Option<usize>,
    buffer_builder: MemoryLimitedBufferBuilder,
    cancel: Option<Arc<AtomicBool>>,

    item_type: PhantomData<T>,
}

impl<T: Record> ExternalSorter<T> {
    /// Creates a workspace for run files in the configured temporary directory.
    pub fn create_workspace(&self) -> Result<RunWorkspace, SortError> {
        RunWorkspace::create(self.tmp_dir.as_deref(), &self.run_prefix).map_err(SortError::TempDir)
    }

    /// Sorts the input file into the output file.
    ///
    /// The output is written to a temporary file next to `output` and moved in place only when it's complete,
    /// so on failure no partial output is left and an existing output file stays untouched. Runs that exist
    /// when a failure happens are retained in the workspace directory along with a catalog manifest.
    ///
    /// # Arguments
    /// * `input` - File of records to be sorted
    /// * `output` - Sorted file to be created or replaced
    pub fn sort_file(&self, input: &Path, output: &Path) -> Result<SortStats, SortError> {
        let input = open_input(input)?;

        let mut workspace = self.create_workspace()?;
        let mut catalog = RunCatalog::new();

        match self.sort_in_workspace(input, output, &mut workspace, &mut catalog) {
            Ok(stats) => {
                if let Err(err) = workspace.close() {
                    log::warn!("temporary directory not removed: {}", err);
                }
                return Ok(stats);
            }
            Err(err) => {
                if catalog.is_empty() {
                    if let Err(err) = workspace.close() {
                        log::warn!("temporary directory not removed: {}", err);
                    }
                } else {
                    workspace.retain(&catalog);
                }
                return Err(err);
            }
        }
    }

    fn sort_in_workspace(
        &self,
        input: fs::File,
        output: &Path,
        workspace: &mut RunWorkspace,
        catalog: &mut RunCatalog,
    ) -> Result<SortStats, SortError> {
        let input = match self.rw_buf_size {
            Some(buf_size) => io::BufReader::with_capacity(buf_size, input),
            None => io::BufReader::new(input),
        };
        let records = self.form_runs_into(input, workspace, catalog)?;
        let runs = catalog.len();

        let mut sink: OutputSink<T> = OutputSink::create(output, self.rw_buf_size)?;

        let passes = self.reduce_runs(catalog, workspace)?;
        let merged = merger::merge_runs(catalog.runs(), &mut sink.writer, self.rw_buf_size, self.cancel_flag())?;
        debug_assert_eq!(merged, records);
        sink.commit(output)?;

        release_runs(catalog.runs());
        catalog.take();
        log::info!("sorted {} record(s) into {}", merged, output.display());

        return Ok(SortStats {
            records,
            runs,
            merge_passes: if runs > 0 { passes + 1 } else { 0 },
        });
    }

    /// Splits the input into sorted runs.
    /// Returns the catalog of created runs in creation order; an empty input produces an empty catalog.
    ///
    /// On failure the runs already saved are left in the workspace.
    ///
    /// # Arguments
    /// * `input` - Input stream of records
    /// * `workspace` - Workspace the runs are created in
    pub fn form_runs<R: Read>(&self, input: R, workspace: &mut RunWorkspace) -> Result<RunCatalog, SortError> {
        let mut catalog = RunCatalog::new();
        self.form_runs_into(input, workspace, &mut catalog)?;

        return Ok(catalog);
    }

    fn form_runs_into<R: Read>(
        &self,
        input: R,
        workspace: &mut RunWorkspace,
        catalog: &mut RunCatalog,
    ) -> Result<u64, SortError> {
        let mut reader: RecordReader<T, R> = RecordReader::new(input);
        let mut buffer = self.buffer_builder.build::<T>();
        let mut records = 0;

        while let Some(record) = reader.read_record().map_err(SortError::InputError)? {
            buffer.push(record);
            records += 1;

            if buffer.is_full() {
                catalog.push(self.create_run(&mut buffer, workspace)?);
            }
        }

        if !buffer.is_empty() {
            catalog.push(self.create_run(&mut buffer, workspace)?);
        }

        log::info!("formed {} run(s) from {} record(s)", catalog.len(), records);

        return Ok(records);
    }

    fn create_run(
        &self,
        buffer: &mut MemoryLimitedBuffer<T>,
        workspace: &mut RunWorkspace,
    ) -> Result<RunMeta, SortError> {
        self.check_cancelled()?;

        log::debug!("sorting run data ...");
        buffer.sort();

        let meta = workspace.next_run();
        log::debug!("saving run {} ({} records)", meta.id, buffer.len());
        run::write_run(&meta.path, buffer.as_slice(), self.rw_buf_size).map_err(SortError::OutputUnwritable)?;
        buffer.clear();

        return Ok(meta);
    }

    /// Merges the runs of the catalog into the output.
    /// Returns the number of records written.
    ///
    /// When the catalog holds more runs than the fan-in, groups of runs are first merged into intermediate runs
    /// created in the workspace. On success all merged runs are deleted and the catalog is left empty. On failure
    /// no run is deleted that isn't fully merged into another run, and the catalog lists the runs still alive.
    ///
    /// # Arguments
    /// * `catalog` - Runs to be merged
    /// * `workspace` - Workspace intermediate runs are created in
    /// * `output` - Output stream
    pub fn merge<W: Write>(
        &self,
        catalog: &mut RunCatalog,
        workspace: &mut RunWorkspace,
        output: W,
    ) -> Result<u64, SortError> {
        self.reduce_runs(catalog, workspace)?;

        let mut writer = RecordWriter::<T, _>::new(output);
        let merged = merger::merge_runs(catalog.runs(), &mut writer, self.rw_buf_size, self.cancel_flag())?;
        writer.flush().map_err(SortError::OutputUnwritable)?;

        release_runs(catalog.runs());
        catalog.take();

        return Ok(merged);
    }

    /// Merges runs in groups of `fan_in` until the catalog holds no more than `fan_in` runs.
    /// Returns the number of passes made.
    fn reduce_runs(&self, catalog: &mut RunCatalog, workspace: &mut RunWorkspace) -> Result<usize, SortError> {
        let mut passes = 0;

        while catalog.len() > self.fan_in {
            passes += 1;
            let runs = catalog.take();
            log::info!("merge pass {}: {} runs (fan-in {})", passes, runs.len(), self.fan_in);

            let mut start = 0;
            while start < runs.len() {
                let end = usize::min(start + self.fan_in, runs.len());
                let group = &runs[start..end];

                if group.len() == 1 {
                    catalog.push(group[0].clone());
                } else {
                    match self.merge_group(group, workspace) {
                        Ok(merged) => {
                            release_runs(group);
                            catalog.push(merged);
                        }
                        Err(err) => {
                            for run in &runs[start..] {
                                catalog.push(run.clone());
                            }
                            return Err(err);
                        }
                    }
                }

                start = end;
            }
        }

        return Ok(passes);
    }

    fn merge_group(&self, group: &[RunMeta], workspace: &mut RunWorkspace) -> Result<RunMeta, SortError> {
        let meta = workspace.next_run();
        let mut writer = run::create_run::<T>(&meta.path, self.rw_buf_size).map_err(SortError::OutputUnwritable)?;

        let result = merger::merge_runs(group, &mut writer, self.rw_buf_size, self.cancel_flag())
            .and_then(|merged| writer.into_inner().map(|_| merged).map_err(SortError::OutputUnwritable));

        match result {
            Ok(merged) => {
                log::debug!("run {} merged from {} runs ({} records)", meta.id, group.len(), merged);
                return Ok(meta);
            }
            Err(err) => {
                let _ = fs::remove_file(&meta.path);
                return Err(err);
            }
        }
    }

    fn cancel_flag(&self) -> Option<&AtomicBool> {
        self.cancel.as_deref()
    }

    fn check_cancelled(&self) -> Result<(), SortError> {
        match self.cancel_flag() {
            Some(flag) if flag.load(Ordering::Relaxed) => Err(SortError::Cancelled),
            _ => Ok(()),
        }
    }
}

/// Opens the input file, rejecting anything that isn't a regular file.
fn open_input(path: &Path) -> Result<fs::File, SortError> {
    let file = fs::File::open(path).map_err(SortError::InputUnavailable)?;
    let metadata = file.metadata().map_err(SortError::InputUnavailable)?;
    if !metadata.is_file() {
        return Err(SortError::InputUnavailable(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("{} is not a regular file", path.display()),
        )));
    }

    return Ok(file);
}

/// Output file written through a temporary file in the same directory.
struct OutputSink<T> {
    writer: RecordWriter<T, io::BufWriter<tempfile::NamedTempFile>>,
}

impl<T: Record> OutputSink<T> {
    fn create(output: &Path, buf_size: Option<usize>) -> Result<Self, SortError> {
        let dir = match output.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let file = tempfile::Builder::new()
            .prefix(OUTPUT_TMP_PREFIX)
            .tempfile_in(dir)
            .map_err(SortError::OutputUnwritable)?;

        let writer = match buf_size {
            Some(buf_size) => io::BufWriter::with_capacity(buf_size, file),
            None => io::BufWriter::new(file),
        };

        return Ok(OutputSink {
            writer: RecordWriter::new(writer),
        });
    }

    /// Flushes the data and moves the file to its final location.
    fn commit(self, output: &Path) -> Result<(), SortError> {
        let file = self
            .writer
            .into_inner()
            .map_err(SortError::OutputUnwritable)?
            .into_inner()
            .map_err(|err| SortError::OutputUnwritable(err.into_error()))?;
        file.as_file().sync_all().map_err(SortError::OutputUnwritable)?;
        file.persist(output).map_err(|err| SortError::OutputUnwritable(err.error))?;

        return Ok(());
    }
}
