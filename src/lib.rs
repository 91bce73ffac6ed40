//! # remodel: a typed object mapper and query engine over Redis.
//!
//! `remodel` persists plain Rust structs as Redis hashes, keeps numeric, boolean, and
//! string secondary indexes in step with them, and compiles a fluent query builder
//! down to `SORT`/`ZINTERSTORE`/server-side Lua scripts executed atomically.
//!
//! A type opts in with `#[derive(Record)]` (see the `remodel-derive` crate), is handed
//! to a [`Registry`] once at startup, and from there is used through the
//! [`Collection`] facade — `save`, `find`, `delete`, `query`, and friends.

use crate::config::PoolConfig;
use crate::pool::RedisPool;

/// Field-table compilation, the `Record` trait, and the two bundled id generators.
pub mod record;

/// Primitive/pointer/fallback-marshaller encoding between field values and Redis bulk
/// strings.
pub mod codec;

/// The crate-wide error and result types.
pub mod error;

/// Redis key derivation for the four key shapes this engine persists.
pub mod keys;

/// Secondary index command construction and the string-index composite encoding.
pub mod index;

/// Connection configuration.
pub mod config;

/// The pooled Redis connection and loaded script library.
pub mod pool;

/// The five server-side Lua scripts this engine relies on.
pub mod scripts;

/// The WATCH/MULTI/EXEC batch engine every other operation is built from.
pub mod transaction;

/// RESP reply scanning into records and scalars.
pub mod reply;

/// The name/type registry and the `Collection` facades it hands out.
pub mod registry;

/// Save/find/delete and the other per-type operations.
pub mod collection;

/// The fluent `Filter`/`Order`/`Limit`/`Offset`/`Include`/`Exclude` query builder.
pub mod query;

pub use codec::{BinaryMarshaller, JsonMarshaller, Marshaller, ScalarCodec};
pub use collection::Collection;
pub use config::PoolConfig;
pub use error::{Error, QueryError, Result};
pub use pool::RedisPool;
pub use query::{Query, TransactionQuery};
pub use record::{FieldKind, FieldSpec, IndexKind, Record};
pub use registry::Registry;
pub use scripts::{ScriptDef, ScriptLibrary};
pub use transaction::{Handler, Transaction};

pub use remodel_derive::Record;

/// Connect to Redis and build a fresh [`Registry`] in one call — the common case for a
/// small program that registers its types once at startup.
pub async fn connect(config: &PoolConfig) -> error::Result<Registry> {
    let pool = std::sync::Arc::new(RedisPool::new(config).await?);
    Ok(Registry::new(pool))
}
