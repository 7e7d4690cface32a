//! Lazily-connected handle to the block store.

use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use pfs_block::BlockStore;
use pfs_block::BlockStoreError;
use tokio::sync::OnceCell;
use tracing::debug;

type DialFuture = BoxFuture<'static, Result<Arc<dyn BlockStore>, BlockStoreError>>;

/// A block-store handle that dials on first use.
///
/// The once-gate guarantees exactly one dial even under concurrent first
/// uses; once set, the handle is read-only and shared. A failed dial is
/// not cached — the next caller dials again.
pub struct BlockClient {
    dial: Box<dyn Fn() -> DialFuture + Send + Sync>,
    cell: OnceCell<Arc<dyn BlockStore>>,
}

impl BlockClient {
    /// A handle that runs `dial` on first use.
    pub fn new<F, Fut>(dial: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<Arc<dyn BlockStore>, BlockStoreError>> + Send + 'static,
    {
        Self {
            dial: Box::new(move || dial().boxed()),
            cell: OnceCell::new(),
        }
    }

    /// A handle over an already-connected store.
    pub fn connected(store: Arc<dyn BlockStore>) -> Self {
        Self::new(move || {
            let store = store.clone();
            async move { Ok(store) }
        })
    }

    /// The connected store, dialing if this is the first use.
    pub async fn get(&self) -> Result<Arc<dyn BlockStore>, BlockStoreError> {
        let store = self
            .cell
            .get_or_try_init(|| {
                debug!("dialing block store");
                (self.dial)()
            })
            .await?;
        Ok(store.clone())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::sync::atomic::Ordering;

    use pfs_block::MemBlockStore;

    use super::*;

    #[tokio::test]
    async fn dials_exactly_once_under_contention() {
        let dials = Arc::new(AtomicUsize::new(0));
        let client = Arc::new(BlockClient::new({
            let dials = dials.clone();
            move || {
                let dials = dials.clone();
                async move {
                    dials.fetch_add(1, Ordering::SeqCst);
                    Ok(MemBlockStore::new() as Arc<dyn BlockStore>)
                }
            }
        }));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let client = client.clone();
            tasks.push(tokio::spawn(async move { client.get().await.map(|_| ()) }));
        }
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        assert_eq!(dials.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_dial_is_retried() {
        let dials = Arc::new(AtomicUsize::new(0));
        let client = BlockClient::new({
            let dials = dials.clone();
            move || {
                let attempt = dials.fetch_add(1, Ordering::SeqCst);
                async move {
                    if attempt == 0 {
                        Err(BlockStoreError::Connect {
                            message: "refused".into(),
                        })
                    } else {
                        Ok(MemBlockStore::new() as Arc<dyn BlockStore>)
                    }
                }
            }
        });

        assert!(client.get().await.is_err());
        assert!(client.get().await.is_ok());
        assert_eq!(dials.load(Ordering::SeqCst), 2);
    }
}
