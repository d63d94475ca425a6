//! In-memory store driver for docmap.
//!
//! This crate provides a thread-safe, in-memory implementation of the `StoreDriver` trait. It
//! evaluates filter and update documents itself and is ideal for development, tests and small
//! deployments.
//!
//! # Features
//!
//! - **Thread-safe access** - Concurrent reads and writes using async-aware RwLock
//! - **Query language** - Comparison, set, existence, pattern and logical filter operators
//! - **Updates** - `$set`, `$unset`, `$inc`, `$rename` and `$push` including `$each`
//! - **Unique indexes** - Duplicate keys are rejected on insert and update
//! - **Lazy cursors** - Sorting, skip and limit applied when the cursor is first read
//!
//! # Quick Start
//!
//! ```ignore
//! use docmap::{Mapper, memory::MemoryDriver};
//!
//! let driver = MemoryDriver::builder().build().await?;
//! let mapper = Mapper::with_driver(Arc::new(driver)).await;
//! let logs = mapper.service::<Log>().await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_memory;

pub mod cursor;
pub mod error;
mod evaluator;
pub mod store;
mod update;

pub use cursor::MemoryCursor;
pub use error::MemoryStoreError;
pub use store::{MemoryCollection, MemoryDriver, MemoryDriverBuilder};
