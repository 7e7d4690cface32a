//! In-memory metadata driver for a content-addressed, versioned,
//! branchable file system.
//!
//! The driver tracks an append-only forest of commits across sharded
//! repos and serves reads that reconstruct a file's content by walking a
//! commit's ancestry. It is an in-memory authority: durable state lives in
//! the block store behind [`pfs_block::BlockStore`], and the in-memory
//! graph is rebuilt from it on shard assignment (`add_shard`).
//!
//! # Concurrency
//!
//! One reader/writer lock guards the four index views (started, finished,
//! leaves, branches). Index mutation is memory-only and non-blocking;
//! block-store I/O — uploads, replays, the per-shard mirror fan-out on
//! finish — always runs with the lock released. A commit therefore reports
//! finished as soon as the in-memory move happens, and a later mirror
//! failure means the block store lacks a record the driver already
//! considers finished; callers reconcile by re-running `finish_commit` or
//! replaying the shard.

mod client;
mod differ;
mod driver;
mod error;
mod index;
mod reader;
mod resolve;

pub use client::BlockClient;
pub use differ::Differ;
pub use driver::Driver;
pub use error::DriverError;
pub use reader::FileReader;
