//! Working storage for run files.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use log;

use crate::catalog::{RunCatalog, RunId, RunMeta};

/// Name of the manifest left next to retained runs.
pub const MANIFEST_NAME: &str = "catalog.mpk";

const WORKSPACE_PREFIX: &str = "ext-record-sort-";

/// Temporary directory holding the runs of a single sort.
///
/// Runs are named `<prefix><seq>.dat` where `seq` grows monotonically for the life of the workspace, so
/// intermediate runs created by merge passes never collide with runs created during formation.
///
/// The directory is removed by [`RunWorkspace::close`] or when the workspace is dropped. To keep runs for
/// diagnosis after a failure use [`RunWorkspace::retain`].
pub struct RunWorkspace {
    dir: tempfile::TempDir,
    run_prefix: String,
    next_seq: u64,
}

impl RunWorkspace {
    /// Creates a new workspace.
    ///
    /// # Arguments
    /// * `tmp_path` - Directory the workspace is created in. If the parameter is [`None`] default OS temporary
    ///   directory will be used.
    /// * `run_prefix` - Run file name prefix
    pub fn create(tmp_path: Option<&Path>, run_prefix: &str) -> io::Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX);

        let dir = match tmp_path {
            Some(tmp_path) => builder.tempdir_in(tmp_path),
            None => builder.tempdir(),
        }?;

        log::info!("using {} as a temporary directory", dir.path().display());

        return Ok(RunWorkspace {
            dir,
            run_prefix: run_prefix.to_string(),
            next_seq: 0,
        });
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Allocates the identifier and file path of the next run.
    /// The file itself is not created.
    pub fn next_run(&mut self) -> RunMeta {
        let id = RunId(self.next_seq);
        self.next_seq += 1;

        let path = self.dir.path().join(format!("{}{}.dat", self.run_prefix, id.0));
        return RunMeta::new(id, path);
    }

    /// Removes the workspace directory together with anything left in it.
    pub fn close(self) -> io::Result<()> {
        self.dir.close()
    }

    /// Keeps the workspace on disk and records the live runs in a manifest next to them.
    /// Returns the retained directory.
    pub fn retain(self, catalog: &RunCatalog) -> PathBuf {
        let path = self.dir.into_path();

        let manifest = path.join(MANIFEST_NAME);
        if let Err(err) = catalog.write_manifest(&manifest) {
            log::warn!("run catalog manifest not saved: {}", err);
        }
        log::warn!("{} run(s) retained in {}", catalog.len(), path.display());

        return path;
    }
}

/// Deletes run files after they have been fully consumed.
///
/// Removal failures are logged and otherwise ignored: by this point every record of the runs has already been
/// written downstream.
pub fn release_runs<'a>(runs: impl IntoIterator<Item = &'a RunMeta>) {
    for run in runs {
        if let Err(err) = fs::remove_file(&run.path) {
            log::warn!("run {} ({}) not removed: {}", run.id, run.path.display(), err);
        }
    }
}

#[cfg(test)]
mod test {
    use std::fs;

    use rstest::*;

    use super::{release_runs, RunWorkspace, MANIFEST_NAME};
    use crate::catalog::{RunCatalog, RunId};

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    #[rstest]
    fn test_run_naming(tmp_dir: tempfile::TempDir) {
        let mut workspace = RunWorkspace::create(Some(tmp_dir.path()), "temp_").unwrap();
        assert!(workspace.path().starts_with(tmp_dir.path()));

        let first = workspace.next_run();
        let second = workspace.next_run();

        assert_eq!(first.id, RunId(0));
        assert_eq!(second.id, RunId(1));
        assert_eq!(first.path, workspace.path().join("temp_0.dat"));
        assert_eq!(second.path, workspace.path().join("temp_1.dat"));
    }

    #[rstest]
    fn test_close_removes_workspace(tmp_dir: tempfile::TempDir) {
        let mut workspace = RunWorkspace::create(Some(tmp_dir.path()), "run_").unwrap();
        let run = workspace.next_run();
        fs::write(&run.path, b"data").unwrap();

        let path = workspace.path().to_path_buf();
        workspace.close().unwrap();

        assert!(!path.exists());
    }

    #[rstest]
    fn test_retain_keeps_runs(tmp_dir: tempfile::TempDir) {
        let mut workspace = RunWorkspace::create(Some(tmp_dir.path()), "run_").unwrap();
        let mut catalog = RunCatalog::new();
        for _ in 0..2 {
            let run = workspace.next_run();
            fs::write(&run.path, b"data").unwrap();
            catalog.push(run);
        }

        let path = workspace.retain(&catalog);

        assert!(path.exists());
        for run in catalog.runs() {
            assert!(run.path.exists());
        }
        assert_eq!(RunCatalog::read_manifest(&path.join(MANIFEST_NAME)).unwrap(), catalog);
    }

    #[rstest]
    fn test_release_runs(tmp_dir: tempfile::TempDir) {
        let mut workspace = RunWorkspace::create(Some(tmp_dir.path()), "run_").unwrap();
        let existing = workspace.next_run();
        fs::write(&existing.path, b"data").unwrap();
        let missing = workspace.next_run();

        release_runs([&existing, &missing]);

        assert!(!existing.path.exists());
    }
}
