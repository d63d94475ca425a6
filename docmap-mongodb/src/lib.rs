//! MongoDB driver implementation for docmap.
//!
//! This crate provides a MongoDB-based implementation of the `StoreDriver` trait, so records are
//! persisted with MongoDB's query engine doing the filtering, sorting and server-side updates.
//!
//! To use this driver, include the `mongodb` feature in your `Cargo.toml`:
//!
//! ```toml
//! [dependencies]
//! docmap = { version = "x.y.z", features = ["mongodb"] }
//! ```
//!
//! # Features
//!
//! - **Persistent storage** - Data is persisted to a self-hosted or hosted MongoDB deployment
//! - **Configuration** - Credentials, replica set, timeouts and write concern from [`ConnectionConfig`]
//! - **Lazy cursors** - Queries run on the first read, with skip, limit, sort, time limit and snapshot hints
//! - **Indexing** - Unique, sparse, background and expiring indexes
//!
//! # Example
//!
//! ```ignore
//! use docmap::{config::ConnectionConfig, driver::DriverBuilder, mongodb::MongoDriver};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ConnectionConfig::new("localhost:27017", "my_database");
//!     let driver = MongoDriver::builder(config).build().await?;
//!     let mapper = Mapper::with_driver(Arc::new(driver)).await;
//!
//!     Ok(())
//! }
//! ```
//!
//! [`ConnectionConfig`]: docmap_core::config::ConnectionConfig

#[allow(unused_extern_crates)]
extern crate self as docmap_mongodb;

mod concern;
mod query;
pub mod store;

pub use store::{MongoCollection, MongoCursor, MongoDriver, MongoDriverBuilder};
