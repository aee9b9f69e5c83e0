//! `ext-record-sort` is an external sort for files made of fixed-width binary records.
//!
//! External sorting is required when the data being sorted do not fit into the main memory (RAM) of a computer
//! and instead must be resided in slower external memory, usually a hard disk drive. Sorting is achieved in two
//! stages. Run formation reads records into a memory limited buffer, sorts the buffer and saves it as a run file.
//! The merge combines all runs into the output file with a k-way merge driven by a binary heap.
//! For more information see [External Sorting](https://en.wikipedia.org/wiki/External_sorting).
//!
//! # Overview
//!
//! * **Bounded memory:**
//!   records held in memory never exceed the configured byte budget.
//! * **Bounded file handles:**
//!   no more than `fan_in` runs are open at once; larger run sets are merged in several passes.
//! * **Explicit run catalog:**
//!   the merge works from the list of runs returned by run formation and never scans the file system.
//! * **All-or-nothing output:**
//!   the output file only appears once it is complete; on failure runs are kept for diagnosis.
//! * **Record agnostic:**
//!   any fixed-width totally ordered type implementing [`Record`] can be sorted, all primitive integers do.
//!
//! The file format is a flat sequence of records in native byte order with no header.
//!
//! # Example
//!
//! ```no_run
//! use std::path::Path;
//!
//! use env_logger;
//! use log;
//!
//! use ext_record_sort::{ExternalSorter, ExternalSorterBuilder, MemoryLimitedBufferBuilder};
//!
//! fn main() {
//!     env_logger::Builder::new().filter_level(log::LevelFilter::Debug).init();
//!
//!     let sorter: ExternalSorter<i32> = ExternalSorterBuilder::new()
//!         .with_tmp_dir(Path::new("./"))
//!         .with_buffer(MemoryLimitedBufferBuilder::new(100 * 1024 * 1024))
//!         .with_fan_in(64)
//!         .build()
//!         .unwrap();
//!
//!     let stats = sorter
//!         .sort_file(Path::new("large_input.dat"), Path::new("sorted_output.dat"))
//!         .unwrap();
//!     println!("sorted {} records", stats.records);
//! }
//! ```

pub mod buffer;
pub mod catalog;
pub mod merger;
pub mod record;
pub mod run;
pub mod sort;
pub mod workspace;

pub use buffer::{MemoryLimitedBuffer, MemoryLimitedBufferBuilder};
pub use catalog::{CatalogError, RunCatalog, RunId, RunMeta};
pub use merger::BinaryHeapMerger;
pub use record::{Record, RecordReader, RecordWriter};
pub use run::RunCursor;
pub use sort::{ExternalSorter, ExternalSorterBuilder, SortError, SortStats};
pub use workspace::RunWorkspace;
