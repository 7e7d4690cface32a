//! Streaming reads of resolved files.

use std::sync::Arc;

use bytes::Bytes;
use futures::Stream;
use futures::stream;
use pfs_block::BlockStore;
use pfs_block::BlockStoreError;
use pfs_core::BlockRef;

/// Lazily fetches a file's blocks in resolver order.
///
/// Skipping forward `offset` bytes discards whole blocks whose size is
/// smaller than the remaining offset, then opens the first straddling
/// block at the residual offset. At most `size` bytes are emitted when a
/// size is given; the stream ends exactly when the size is exhausted or
/// all blocks are drained.
pub struct FileReader {
    store: Arc<dyn BlockStore>,
    block_refs: Vec<BlockRef>,
    index: usize,
    offset: u64,
    remaining: Option<u64>,
}

impl std::fmt::Debug for FileReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileReader")
            .field("block_refs", &self.block_refs)
            .field("index", &self.index)
            .field("offset", &self.offset)
            .field("remaining", &self.remaining)
            .finish()
    }
}

impl FileReader {
    pub(crate) fn new(store: Arc<dyn BlockStore>, block_refs: Vec<BlockRef>, offset: u64, size: Option<u64>) -> Self {
        Self {
            store,
            block_refs,
            index: 0,
            offset,
            remaining: size,
        }
    }

    /// The next chunk of file bytes, one block at a time. `None` at end of
    /// stream.
    pub async fn next_chunk(&mut self) -> Option<Result<Bytes, BlockStoreError>> {
        loop {
            if self.remaining == Some(0) {
                return None;
            }
            // a block exactly consumed by the offset is still opened, at an
            // offset equal to its size; it yields nothing and we move on
            while self.index < self.block_refs.len()
                && self.offset != 0
                && self.offset > self.block_refs[self.index].range.len()
            {
                self.offset -= self.block_refs[self.index].range.len();
                self.index += 1;
            }
            let block_ref = self.block_refs.get(self.index)?;
            let chunk = match self.store.get_block(&block_ref.hash, self.offset, self.remaining).await {
                Ok(chunk) => chunk,
                Err(err) => return Some(Err(err)),
            };
            self.offset = 0;
            self.index += 1;
            if let Some(remaining) = self.remaining.as_mut() {
                *remaining -= chunk.len() as u64;
            }
            if !chunk.is_empty() {
                return Some(Ok(chunk));
            }
        }
    }

    /// Drain the reader into one buffer.
    pub async fn read_to_end(mut self) -> Result<Vec<u8>, BlockStoreError> {
        let mut buf = Vec::new();
        while let Some(chunk) = self.next_chunk().await {
            buf.extend_from_slice(&chunk?);
        }
        Ok(buf)
    }

    /// Consume the reader as a stream of chunks.
    pub fn into_stream(self) -> impl Stream<Item = Result<Bytes, BlockStoreError>> + Send {
        stream::unfold(self, |mut reader| async move {
            let item = reader.next_chunk().await?;
            Some((item, reader))
        })
    }
}

#[cfg(test)]
mod tests {
    use futures::StreamExt;
    use pfs_block::MemBlockStore;

    use super::*;

    async fn refs_for(store: &Arc<MemBlockStore>, chunks: &[&'static [u8]]) -> Vec<BlockRef> {
        let mut refs = Vec::new();
        for chunk in chunks {
            refs.extend(store.put_block(Bytes::from_static(chunk)).await.unwrap());
        }
        refs
    }

    #[tokio::test]
    async fn reads_all_blocks_in_order() {
        let store = MemBlockStore::new();
        let refs = refs_for(&store, &[b"hello", b" ", b"world"]).await;
        let reader = FileReader::new(store, refs, 0, None);
        assert_eq!(reader.read_to_end().await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn offset_discards_whole_blocks() {
        let store = MemBlockStore::new();
        let refs = refs_for(&store, &[b"hello", b"abc"]).await;
        // 5 > len is false for the first block, so it is opened at 5 and
        // yields nothing; output starts at the second block
        let reader = FileReader::new(store, refs, 5, None);
        assert_eq!(reader.read_to_end().await.unwrap(), b"abc");
    }

    #[tokio::test]
    async fn offset_opens_straddling_block_at_residual() {
        let store = MemBlockStore::new();
        let refs = refs_for(&store, &[b"hello", b"abc"]).await;
        let reader = FileReader::new(store, refs, 4, None);
        assert_eq!(reader.read_to_end().await.unwrap(), b"oabc");
    }

    #[tokio::test]
    async fn size_bounds_the_stream() {
        let store = MemBlockStore::new();
        let refs = refs_for(&store, &[b"hello", b"abc"]).await;
        let reader = FileReader::new(store, refs, 2, Some(3));
        assert_eq!(reader.read_to_end().await.unwrap(), b"llo");
    }

    #[tokio::test]
    async fn size_spanning_blocks() {
        let store = MemBlockStore::new();
        let refs = refs_for(&store, &[b"hello", b"abc"]).await;
        let reader = FileReader::new(store, refs, 3, Some(4));
        assert_eq!(reader.read_to_end().await.unwrap(), b"loab");
    }

    #[tokio::test]
    async fn empty_ref_list_ends_immediately() {
        let store = MemBlockStore::new();
        let mut reader = FileReader::new(store, Vec::new(), 0, None);
        assert!(reader.next_chunk().await.is_none());
    }

    #[tokio::test]
    async fn stream_yields_per_block_chunks() {
        let store = MemBlockStore::new();
        let refs = refs_for(&store, &[b"ab", b"cd"]).await;
        let chunks: Vec<Bytes> = FileReader::new(store, refs, 0, None)
            .into_stream()
            .map(|chunk| chunk.unwrap())
            .collect()
            .await;
        assert_eq!(chunks, vec![Bytes::from_static(b"ab"), Bytes::from_static(b"cd")]);
    }
}
