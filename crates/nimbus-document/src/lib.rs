//! Nimbus Document - Document Store Engine
//!
//! Embeddable, single-process document database. Schemaless JSON documents
//! live in named collections; queries are operator-tagged predicate
//! mappings and aggregations are ordered stage pipelines, both in the
//! MongoDB idiom. Persistence maps documents onto a relational substrate
//! through the `nimbus-storage` adapter.
//!
//! Key Features:
//! - Schemaless collections over a durable SQL substrate
//! - Predicate matcher with logical and field operators
//! - Aggregation pipeline ($match/$sort/$group/$lookup/... stages)
//! - Batched, transactional multi-document writes
//!
//! @version 0.1.0
//! @author Nimbus Development Team

pub mod collection;
pub mod id;
pub mod pipeline;
pub mod query;
pub mod store;
pub mod types;

pub use collection::Collection;
pub use id::ObjectId;
pub use pipeline::{DocumentSource, Pipeline};
pub use query::{Filter, Query};
pub use store::Store;
pub use types::{Document, Value};

pub use nimbus_common::{NimbusError, Result, StoreConfig};
