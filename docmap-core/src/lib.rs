//! A typed object-document mapper over BSON document stores.
//!
//! This crate is the core of the docmap project and provides:
//!
//! - **Values** ([`value`]) - The domain values records hold
//! - **Schema metadata** ([`schema`], [`index`]) - Declarative model descriptions and indexes
//! - **Records and models** ([`model`], [`hooks`]) - The domain-model contract and lifecycle hooks
//! - **Type coercion** ([`coerce`]) - Conversion between domain values and store values
//! - **Atomic operations** ([`atomic`]) - Deferred server-side updates
//! - **Record services** ([`service`], [`payload`]) - Saving, removing and finding records
//! - **Queries and cursors** ([`query`], [`cursor`]) - Filters and lazily hydrated results
//! - **Driver traits** ([`driver`]) - The interface store drivers implement
//! - **Registries** ([`registry`], [`mapper`]) - Connections, metadata and the service cache
//! - **Configuration** ([`config`]) - Connection settings and write options
//! - **Error handling** ([`error`]) - Error types and result types
//!
//! # Example
//!
//! ```ignore
//! use docmap::prelude::*;
//!
//! let mapper = Mapper::with_driver(Arc::new(MemoryDriver::new())).await;
//! let logs = mapper.service::<Log>().await?;
//!
//! let mut log = logs.instantiate();
//! log.assign("name", Value::from("boot"));
//! logs.save(&mut log, &WriteOptions::default()).await?;
//!
//! log.assign("hits", AtomicOperation::increment(1).into());
//! logs.save(&mut log, &WriteOptions::default()).await?;
//! ```

#[allow(unused_extern_crates)]
extern crate self as docmap_core;

pub mod atomic;
pub mod coerce;
pub mod config;
pub mod cursor;
pub mod driver;
pub mod error;
pub mod hooks;
pub mod index;
pub mod mapper;
pub mod model;
pub mod payload;
pub mod query;
pub mod registry;
pub mod schema;
pub mod service;
pub mod value;
