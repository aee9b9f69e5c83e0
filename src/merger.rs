//! Binary heap merger.

use std::cmp::Reverse;
use std::collections::BinaryHeap;
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use log;

use crate::catalog::{RunId, RunMeta};
use crate::record::{Record, RecordWriter};
use crate::run::RunCursor;
use crate::sort::SortError;

/// Current head record of a run.
///
/// Entries are ordered by value first and run sequence number second, so equal records are emitted in run
/// order. `slot` is the cursor position in the merger's cursor arena.
#[derive(Debug, PartialEq, Eq, PartialOrd, Ord)]
struct HeapEntry<T> {
    value: T,
    run: RunId,
    slot: usize,
}

/// Binary heap merger implementation.
/// Merges multiple sorted runs into a single sorted output.
/// Time complexity is *m* \* log(*n*) in worst case where *m* is the number of records,
/// *n* is the number of runs.
///
/// The heap holds exactly one entry per cursor that is not yet exhausted. An exhausted cursor is dropped from the
/// arena immediately, which closes its run file.
pub struct BinaryHeapMerger<T> {
    // binary heap is max-heap by default so we reverse it to convert it to min-heap
    items: BinaryHeap<Reverse<HeapEntry<T>>>,
    cursors: Vec<Option<RunCursor<T>>>,
}

impl<T: Record> BinaryHeapMerger<T> {
    /// Opens a cursor for every run and primes the heap with the first record of each.
    /// Runs should be sorted in ascending order otherwise the result is undefined.
    ///
    /// # Arguments
    /// * `runs` - Runs to be merged in a single sorted stream
    /// * `buf_size` - Run file read buffer size
    pub fn open(runs: &[RunMeta], buf_size: Option<usize>) -> Result<Self, SortError> {
        let mut cursors = Vec::with_capacity(runs.len());
        let mut items = BinaryHeap::with_capacity(runs.len());

        for (slot, meta) in runs.iter().enumerate() {
            let mut cursor = RunCursor::open(meta, buf_size)?;
            match cursor.next_record()? {
                Some(value) => {
                    items.push(Reverse(HeapEntry {
                        value,
                        run: cursor.run(),
                        slot,
                    }));
                    cursors.push(Some(cursor));
                }
                // empty run, nothing to merge from it
                None => cursors.push(None),
            }
        }

        return Ok(BinaryHeapMerger { items, cursors });
    }

    /// Returns the number of runs that still have records to merge.
    pub fn open_runs(&self) -> usize {
        self.items.len()
    }

    /// Returns the next record from the runs in ascending order.
    pub fn next_record(&mut self) -> Result<Option<T>, SortError> {
        let Reverse(entry) = match self.items.pop() {
            Some(entry) => entry,
            None => return Ok(None),
        };

        let refill = match self.cursors[entry.slot].as_mut() {
            Some(cursor) => cursor.next_record()?,
            None => None,
        };
        match refill {
            Some(value) => self.items.push(Reverse(HeapEntry {
                value,
                run: entry.run,
                slot: entry.slot,
            })),
            None => self.cursors[entry.slot] = None,
        }

        return Ok(Some(entry.value));
    }
}

impl<T: Record> Iterator for BinaryHeapMerger<T> {
    type Item = Result<T, SortError>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_record().transpose()
    }
}

/// Merges `runs` into `output` in a single pass.
///
/// The cancellation flag, if any, is checked before every emitted record. Runs are neither modified nor deleted.
/// Returns the number of records written.
pub(crate) fn merge_runs<T, W>(
    runs: &[RunMeta],
    output: &mut RecordWriter<T, W>,
    buf_size: Option<usize>,
    cancel: Option<&AtomicBool>,
) -> Result<u64, SortError>
where
    T: Record,
    W: Write,
{
    let mut merger = BinaryHeapMerger::open(runs, buf_size)?;
    log::debug!("merging {} run(s), {} non-empty", runs.len(), merger.open_runs());

    let mut merged = 0;
    loop {
        if cancel.map_or(false, |flag| flag.load(Ordering::Relaxed)) {
            return Err(SortError::Cancelled);
        }

        let record = match merger.next_record()? {
            Some(record) => record,
            None => break,
        };
        output.write_record(&record).map_err(SortError::OutputUnwritable)?;
        merged += 1;
    }

    return Ok(merged);
}

#[cfg(test)]
mod test {
    use std::sync::atomic::AtomicBool;

    use rand::seq::SliceRandom;
    use rstest::*;

    use super::{merge_runs, BinaryHeapMerger};
    use crate::catalog::{RunId, RunMeta};
    use crate::record::RecordWriter;
    use crate::run::write_run;
    use crate::sort::SortError;

    #[fixture]
    fn tmp_dir() -> tempfile::TempDir {
        tempfile::tempdir().unwrap()
    }

    fn make_runs(dir: &tempfile::TempDir, runs: &[Vec<i32>]) -> Vec<RunMeta> {
        runs.iter()
            .enumerate()
            .map(|(idx, items)| {
                let meta = RunMeta::new(RunId(idx as u64), dir.path().join(format!("temp_{}.dat", idx)));
                write_run(&meta.path, items, None).unwrap();
                meta
            })
            .collect()
    }

    #[rstest]
    #[case(
        vec![],
        vec![],
    )]
    #[case(
        vec![
            vec![],
            vec![]
        ],
        vec![],
    )]
    #[case(
        vec![
            vec![4, 5, 7],
            vec![1, 6],
            vec![3],
            vec![],
        ],
        vec![1, 3, 4, 5, 6, 7],
    )]
    #[case(
        vec![
            vec![3, 5],
            vec![1, 8],
        ],
        vec![1, 3, 5, 8],
    )]
    #[case(
        vec![
            vec![2, 4, 4],
            vec![4],
            vec![-1, 4, 9],
        ],
        vec![-1, 2, 4, 4, 4, 4, 9],
    )]
    fn test_merger(tmp_dir: tempfile::TempDir, #[case] runs: Vec<Vec<i32>>, #[case] expected_result: Vec<i32>) {
        let runs = make_runs(&tmp_dir, &runs);

        let merger = BinaryHeapMerger::<i32>::open(&runs, None).unwrap();
        let actual_result: Result<Vec<i32>, _> = merger.collect();

        assert_eq!(actual_result.unwrap(), expected_result);
    }

    #[rstest]
    fn test_run_order_independence(tmp_dir: tempfile::TempDir) {
        let values = Vec::from_iter(0..50);
        let mut runs = make_runs(&tmp_dir, &Vec::from_iter(values.iter().map(|v| vec![*v])));

        for _ in 0..5 {
            runs.shuffle(&mut rand::thread_rng());

            let merger = BinaryHeapMerger::<i32>::open(&runs, None).unwrap();
            let actual_result: Result<Vec<i32>, _> = merger.collect();
            assert_eq!(actual_result.unwrap(), values);
        }
    }

    #[rstest]
    fn test_ties_broken_by_run(tmp_dir: tempfile::TempDir) {
        let mut runs = make_runs(&tmp_dir, &[vec![1, 2], vec![1, 2], vec![2]]);
        runs.reverse();

        let mut merger = BinaryHeapMerger::<i32>::open(&runs, None).unwrap();
        let mut order = Vec::new();
        while let Some(entry) = merger.items.peek() {
            order.push((entry.0.value, entry.0.run));
            merger.next_record().unwrap();
        }

        assert_eq!(
            order,
            vec![
                (1, RunId(0)),
                (1, RunId(1)),
                (2, RunId(0)),
                (2, RunId(1)),
                (2, RunId(2)),
            ]
        );
    }

    #[rstest]
    fn test_exhausted_cursors_are_closed(tmp_dir: tempfile::TempDir) {
        let runs = make_runs(&tmp_dir, &[vec![1], vec![2, 3], vec![]]);

        let mut merger = BinaryHeapMerger::<i32>::open(&runs, None).unwrap();
        assert_eq!(merger.open_runs(), 2);
        assert!(merger.cursors[2].is_none());

        assert_eq!(merger.next_record().unwrap(), Some(1));
        assert!(merger.cursors[0].is_none());
        assert_eq!(merger.open_runs(), 1);
    }

    #[rstest]
    fn test_missing_run_is_not_skipped(tmp_dir: tempfile::TempDir) {
        let mut runs = make_runs(&tmp_dir, &[vec![1, 2]]);
        runs.push(RunMeta::new(RunId(1), tmp_dir.path().join("temp_1.dat")));

        let result = BinaryHeapMerger::<i32>::open(&runs, None);
        assert!(matches!(result, Err(SortError::RunOpenFailure { run: RunId(1), .. })));
    }

    #[rstest]
    fn test_merge_runs(tmp_dir: tempfile::TempDir) {
        let runs = make_runs(&tmp_dir, &[vec![3, 5], vec![1, 8]]);

        let mut output = RecordWriter::<i32, _>::new(Vec::new());
        let merged = merge_runs(&runs, &mut output, None, None).unwrap();
        assert_eq!(merged, 4);

        let bytes = output.into_inner().unwrap();
        let expected: Vec<u8> = [1i32, 3, 5, 8].iter().flat_map(|v| v.to_ne_bytes()).collect();
        assert_eq!(bytes, expected);

        // runs are left for the caller to release
        assert!(runs.iter().all(|run| run.path.exists()));
    }

    #[rstest]
    fn test_merge_runs_cancelled(tmp_dir: tempfile::TempDir) {
        let runs = make_runs(&tmp_dir, &[vec![3, 5], vec![1, 8]]);
        let cancel = AtomicBool::new(true);

        let mut output = RecordWriter::<i32, _>::new(Vec::new());
        let result = merge_runs(&runs, &mut output, None, Some(&cancel));

        assert!(matches!(result, Err(SortError::Cancelled)));
        assert_eq!(output.written(), 0);
    }
}
