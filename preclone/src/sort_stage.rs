//! Background external sorting of records on their way to the output file.
//!
//! Records are handed to a dedicated thread through a bounded queue. The thread feeds
//! them to a shardio writer, which keeps at most a bounded number of items in memory
//! and spills sorted chunks to disk. Closing the queue is the end-of-input signal.

use crate::errors::PreCloneError;
use anyhow::{anyhow, Result};
use crossbeam_channel::{bounded, Sender};
use log::debug;
use serde::de::DeserializeOwned;
use serde::Serialize;
use shardio::{ShardReader, ShardWriter, SortKey};
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::thread::{self, JoinHandle};

pub const SEND_BUFFER_SIZE: usize = 256;
pub const DISK_CHUNK_SIZE: usize = 8_192;
const MIN_ITEM_BUFFER_SIZE: u64 = 1_024;
const MAX_ITEM_BUFFER_SIZE: u64 = 1_048_576;

/// Number of items a shard writer may hold in memory for a given byte budget.
pub fn item_buffer_for(memory_budget: u64, approx_item_bytes: u64) -> usize {
    (memory_budget / approx_item_bytes.max(1)).clamp(MIN_ITEM_BUFFER_SIZE, MAX_ITEM_BUFFER_SIZE)
        as usize
}

/// A running sort stage accepting items of type `T`, ordered by `S`.
pub struct SortStage<T, S> {
    name: &'static str,
    path: PathBuf,
    sender: Option<Sender<T>>,
    handle: Option<JoinHandle<Result<usize>>>,
    _order: PhantomData<fn() -> S>,
}

impl<T, S> SortStage<T, S>
where
    T: 'static + Send + Serialize,
    S: 'static + SortKey<T>,
    <S as SortKey<T>>::Key: 'static + Send + Ord + Serialize + Clone,
{
    /// Start the sorting thread, writing the shard file at `path`.
    pub fn spawn(
        name: &'static str,
        path: &Path,
        queue_capacity: usize,
        item_buffer_size: usize,
    ) -> Result<Self> {
        let (sender, receiver) = bounded::<T>(queue_capacity.max(1));
        let shard_path = path.to_path_buf();
        let handle = thread::Builder::new()
            .name(format!("{name}-sorting"))
            .spawn(move || -> Result<usize> {
                let mut writer: ShardWriter<T, S> = ShardWriter::new(
                    &shard_path,
                    SEND_BUFFER_SIZE,
                    DISK_CHUNK_SIZE,
                    item_buffer_size,
                )?;
                let mut shard_sender = writer.get_sender();
                let mut count = 0;
                for item in receiver {
                    shard_sender.send(item)?;
                    count += 1;
                }
                shard_sender.finished()?;
                drop(shard_sender);
                writer.finish()?;
                debug!("sorted {count} {name} into {}", shard_path.display());
                Ok(count)
            })?;

        Ok(SortStage {
            name,
            path: path.to_path_buf(),
            sender: Some(sender),
            handle: Some(handle),
            _order: PhantomData,
        })
    }

    pub fn send(&mut self, item: T) -> Result<()> {
        let Some(sender) = self.sender.as_ref() else {
            return Err(anyhow!("{} sort stage is already closed", self.name));
        };
        if sender.send(item).is_err() {
            // The receiving end only goes away when the sorting thread stopped.
            return match self.join() {
                Ok(_) => Err(self.failure("sorting thread exited early")),
                Err(err) => Err(err),
            };
        }
        Ok(())
    }
}

impl<T, S> SortStage<T, S> {
    fn failure(&self, message: impl Into<String>) -> anyhow::Error {
        PreCloneError::SortStageFailed {
            stage: self.name,
            message: message.into(),
        }
        .into()
    }

    fn join(&mut self) -> Result<usize> {
        self.sender = None;
        let Some(handle) = self.handle.take() else {
            return Err(self.failure("sorting thread was already joined"));
        };
        match handle.join() {
            Ok(Ok(count)) => Ok(count),
            Ok(Err(err)) => Err(self.failure(format!("{err:#}"))),
            Err(_) => Err(self.failure("sorting thread panicked")),
        }
    }

    /// Close the queue and wait until all items are sorted on disk.
    pub fn finish(mut self) -> Result<SortedShard<T, S>> {
        let len = self.join()?;
        Ok(SortedShard {
            path: std::mem::take(&mut self.path),
            len,
            _types: PhantomData,
        })
    }
}

impl<T, S> Drop for SortStage<T, S> {
    fn drop(&mut self) {
        if self.handle.is_some() {
            if let Err(err) = self.join() {
                debug!("abandoned {} sort stage: {err:#}", self.name);
            }
        }
    }
}

/// Shard file written by a finished [`SortStage`].
pub struct SortedShard<T, S> {
    path: PathBuf,
    len: usize,
    _types: PhantomData<fn() -> (T, S)>,
}

impl<T, S> SortedShard<T, S>
where
    T: DeserializeOwned,
    S: SortKey<T>,
    <S as SortKey<T>>::Key: Ord + Clone + DeserializeOwned,
{
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn reader(&self) -> Result<ShardReader<T, S>> {
        Ok(ShardReader::open(&self.path)?)
    }
}
