use crate::{BlockHeader, Error};
use byteorder::{BigEndian, ReadBytesExt};
use serde::de::DeserializeOwned;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::Path;

/// What a [`BlockStream`] does when it meets a special block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderAction {
    /// End the stream.
    Stop,
    /// Continue with the next block.
    Skip,
    /// End the stream with [`Error::UnexpectedMarker`].
    Fail,
}

type OnSpecial = Box<dyn FnMut(&BlockHeader) -> HeaderAction + Send>;

/// Iterator over the records stored in consecutive blocks of a file, starting at a
/// given block offset. Every stream owns its file handle.
pub struct BlockStream<T> {
    reader: BufReader<File>,
    offset: u64,
    on_special: OnSpecial,
    block: std::vec::IntoIter<T>,
    buf: Vec<u8>,
    records_read: u64,
    done: bool,
}

impl<T: DeserializeOwned> BlockStream<T> {
    pub fn open(
        path: &Path,
        offset: u64,
        on_special: impl FnMut(&BlockHeader) -> HeaderAction + Send + 'static,
    ) -> Result<Self, Error> {
        let mut file = File::open(path)?;
        file.seek(SeekFrom::Start(offset))?;
        Ok(BlockStream {
            reader: BufReader::new(file),
            offset,
            on_special: Box::new(on_special),
            block: Vec::new().into_iter(),
            buf: Vec::new(),
            records_read: 0,
            done: false,
        })
    }

    /// Number of records returned so far.
    pub fn records_read(&self) -> u64 {
        self.records_read
    }

    // Load the next data block into `self.block`. Returns false when the stream stops.
    fn load_block(&mut self) -> Result<bool, Error> {
        loop {
            let header_offset = self.offset;
            let header = match BlockHeader::read_from(&mut self.reader, header_offset)? {
                Some(header) => header,
                None => {
                    return Err(Error::Truncated {
                        offset: header_offset,
                    })
                }
            };
            self.offset += BlockHeader::SIZE as u64;

            if header.is_special() {
                match (self.on_special)(&header) {
                    HeaderAction::Stop => return Ok(false),
                    HeaderAction::Skip => continue,
                    HeaderAction::Fail => {
                        return Err(Error::UnexpectedMarker {
                            found: header.special_byte(0),
                            offset: header_offset,
                        })
                    }
                }
            }

            self.buf.resize(header.compressed_len() as usize, 0);
            self.reader
                .read_exact(&mut self.buf)
                .map_err(|_| Error::Truncated {
                    offset: header_offset,
                })?;
            self.offset += header.compressed_len() as u64;

            let raw = lz4::block::decompress(&self.buf, Some(header.raw_len() as i32))?;
            let mut slice = raw.as_slice();
            let mut records = Vec::with_capacity(header.num_records() as usize);
            for _ in 0..header.num_records() {
                records.push(bincode::deserialize_from(&mut slice)?);
            }
            if !slice.is_empty() {
                return Err(Error::CorruptBlock {
                    offset: header_offset,
                    expected: header.num_records(),
                    got: records.len() as u32,
                });
            }
            self.block = records.into_iter();
            if header.num_records() > 0 {
                return Ok(true);
            }
        }
    }
}

impl<T: DeserializeOwned> Iterator for BlockStream<T> {
    type Item = Result<T, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(record) = self.block.next() {
                self.records_read += 1;
                return Some(Ok(record));
            }
            if self.done {
                return None;
            }
            match self.load_block() {
                Ok(true) => {}
                Ok(false) => {
                    self.done = true;
                    return None;
                }
                Err(e) => {
                    self.done = true;
                    return Some(Err(e));
                }
            }
        }
    }
}

/// Read one bincode encoded raw value.
pub fn read_raw<T: DeserializeOwned, R: Read>(reader: &mut R) -> Result<T, Error> {
    Ok(bincode::deserialize_from(reader)?)
}

/// Read `n` big endian `u64`s stored at the very end of the file.
pub fn read_footer(path: &Path, n: usize) -> Result<Vec<u64>, Error> {
    let mut file = File::open(path)?;
    file.seek(SeekFrom::End(-((n * 8) as i64)))?;
    let mut reader = BufReader::new(file);
    (0..n)
        .map(|_| Ok(reader.read_u64::<BigEndian>()?))
        .collect()
}
