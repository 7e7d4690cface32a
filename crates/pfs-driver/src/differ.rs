//! Comparison of two path-ordered file sources.
//!
//! Both sources are drained concurrently through bounded channels and
//! merged by path. A path present in only one source, or present in both
//! with differing content hashes, is reported to the callback.

use futures::Stream;
use futures::StreamExt;
use pfs_core::FileInfo;
use tokio::sync::mpsc;

use crate::error::DriverError;

const CHANNEL_CAPACITY: usize = 32;

enum Advance {
    A,
    B,
    Both,
}

/// Compares two path-ordered sources and reports the entries that differ.
pub struct Differ<A, B> {
    a: A,
    b: B,
}

impl<A, B> Differ<A, B>
where
    A: Stream<Item = Result<FileInfo, DriverError>> + Send + Unpin + 'static,
    B: Stream<Item = Result<FileInfo, DriverError>> + Send + Unpin + 'static,
{
    pub fn new(a: A, b: B) -> Self {
        Self { a, b }
    }

    /// Invoke `cb` for every path in only one source (`(Some, None)` or
    /// `(None, Some)`) and for every path in both whose hashes differ.
    /// Sources must yield their entries in path order.
    pub async fn iterate_diff<F>(self, mut cb: F) -> Result<(), DriverError>
    where
        F: FnMut(Option<&FileInfo>, Option<&FileInfo>) -> Result<(), DriverError>,
    {
        let (a_tx, mut a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, mut b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        tokio::spawn(forward(self.a, a_tx));
        tokio::spawn(forward(self.b, b_tx));

        let mut a_item = next(&mut a_rx).await?;
        let mut b_item = next(&mut b_rx).await?;
        loop {
            let advance = match (&a_item, &b_item) {
                (Some(a_info), Some(b_info)) => {
                    if a_info.file.path < b_info.file.path {
                        cb(Some(a_info), None)?;
                        Advance::A
                    } else if b_info.file.path < a_info.file.path {
                        cb(None, Some(b_info))?;
                        Advance::B
                    } else {
                        if a_info.hash != b_info.hash {
                            cb(Some(a_info), Some(b_info))?;
                        }
                        Advance::Both
                    }
                }
                (Some(a_info), None) => {
                    cb(Some(a_info), None)?;
                    Advance::A
                }
                (None, Some(b_info)) => {
                    cb(None, Some(b_info))?;
                    Advance::B
                }
                (None, None) => return Ok(()),
            };
            match advance {
                Advance::A => a_item = next(&mut a_rx).await?,
                Advance::B => b_item = next(&mut b_rx).await?,
                Advance::Both => {
                    a_item = next(&mut a_rx).await?;
                    b_item = next(&mut b_rx).await?;
                }
            }
        }
    }
}

async fn forward<S>(mut stream: S, tx: mpsc::Sender<Result<FileInfo, DriverError>>)
where
    S: Stream<Item = Result<FileInfo, DriverError>> + Send + Unpin + 'static,
{
    while let Some(item) = stream.next().await {
        if tx.send(item).await.is_err() {
            // receiver dropped: the merge ended early
            return;
        }
    }
}

async fn next(rx: &mut mpsc::Receiver<Result<FileInfo, DriverError>>) -> Result<Option<FileInfo>, DriverError> {
    rx.recv().await.transpose()
}
