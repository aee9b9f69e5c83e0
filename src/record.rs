//! Fixed-width records and their binary streams.

use std::fmt::Debug;
use std::io;
use std::io::prelude::*;
use std::marker::PhantomData;
use std::mem;

/// Fixed-width, totally ordered record.
///
/// A record is stored on disk as exactly [`Record::WIDTH`] bytes with no header or delimiter,
/// so a file of records is just their concatenation.
pub trait Record: Ord + Copy + Send + Debug {
    /// Encoded record size in bytes.
    const WIDTH: usize;

    /// Encodes the record into `buf`. `buf` is exactly [`Record::WIDTH`] bytes long.
    fn encode(&self, buf: &mut [u8]);

    /// Decodes a record from `buf`. `buf` is exactly [`Record::WIDTH`] bytes long.
    fn decode(buf: &[u8]) -> Self;
}

macro_rules! impl_native_record {
    ($($t:ty),*) => {
        $(
            impl Record for $t {
                const WIDTH: usize = mem::size_of::<$t>();

                fn encode(&self, buf: &mut [u8]) {
                    buf.copy_from_slice(&self.to_ne_bytes());
                }

                fn decode(buf: &[u8]) -> Self {
                    let mut bytes = [0; mem::size_of::<$t>()];
                    bytes.copy_from_slice(buf);
                    <$t>::from_ne_bytes(bytes)
                }
            }
        )*
    };
}

// native byte order, matching files produced by writing integers straight from memory
impl_native_record!(i8, i16, i32, i64, i128, u8, u16, u32, u64, u128);

/// Sequential record reader.
pub struct RecordReader<T, R> {
    reader: R,
    scratch: Vec<u8>,

    item_type: PhantomData<T>,
}

impl<T: Record, R: Read> RecordReader<T, R> {
    pub fn new(reader: R) -> Self {
        RecordReader {
            reader,
            scratch: vec![0; T::WIDTH],
            item_type: PhantomData,
        }
    }

    /// Reads the next record.
    ///
    /// Returns `Ok(None)` when the stream ends exactly on a record boundary. A stream ending in the
    /// middle of a record is reported as an [`io::ErrorKind::UnexpectedEof`] error.
    pub fn read_record(&mut self) -> io::Result<Option<T>> {
        let mut filled = 0;
        while filled < self.scratch.len() {
            match self.reader.read(&mut self.scratch[filled..]) {
                Ok(0) => break,
                Ok(n) => filled += n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        if filled == 0 {
            return Ok(None);
        }
        if filled < self.scratch.len() {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                format!("trailing partial record ({} of {} bytes)", filled, T::WIDTH),
            ));
        }

        return Ok(Some(T::decode(&self.scratch)));
    }
}

impl<T: Record, R: Read> Iterator for RecordReader<T, R> {
    type Item = io::Result<T>;

    fn next(&mut self) -> Option<Self::Item> {
        self.read_record().transpose()
    }
}

/// Sequential record writer.
pub struct RecordWriter<T, W: Write> {
    writer: W,
    scratch: Vec<u8>,
    written: u64,

    item_type: PhantomData<T>,
}

impl<T: Record, W: Write> RecordWriter<T, W> {
    pub fn new(writer: W) -> Self {
        RecordWriter {
            writer,
            scratch: vec![0; T::WIDTH],
            written: 0,
            item_type: PhantomData,
        }
    }

    /// Appends a record to the stream.
    pub fn write_record(&mut self, record: &T) -> io::Result<()> {
        record.encode(&mut self.scratch);
        self.writer.write_all(&self.scratch)?;
        self.written += 1;

        return Ok(());
    }

    /// Returns the number of records written so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.writer.flush()
    }

    /// Flushes the stream and returns the underlying writer.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.writer.flush()?;
        return Ok(self.writer);
    }
}
