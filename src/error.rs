//! Unified error handling for the engine.
//!
//! Every fallible operation in this crate returns [`Result`], an alias over the
//! [`Error`] enum below. The taxonomy mirrors the error kinds enumerated in the design:
//! registration failures, missing models, type mismatches, malformed queries, lost
//! optimistic-concurrency races, transport failures, and codec failures.

use thiserror::Error;

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All error kinds this engine can surface.
#[derive(Debug, Error)]
pub enum Error {
    #[error("name {0:?} is already registered to another type")]
    NameAlreadyRegistered(String),

    #[error("type is already registered under name {0:?}")]
    TypeAlreadyRegistered(String),

    #[error("invalid model type: {0}")]
    InvalidType(String),

    #[error("unknown tag option {option:?} on field {field:?}")]
    UnknownTagOption { field: String, option: String },

    #[error("index requested on unsupported field {field:?} of type {type_name:?}")]
    UnsupportedIndex { type_name: String, field: String },

    #[error("no collection registered under name {0:?}")]
    UnknownName(String),

    #[error("no collection registered for type {0:?}")]
    UnknownType(String),

    #[error("model {type_name}:{id} not found")]
    ModelNotFound { type_name: String, id: String },

    #[error("expected model of type {expected:?}, got {found:?}")]
    InvalidModelType { expected: String, found: String },

    #[error("type {type_name:?} was registered with marshaller {registered}, not {requested}")]
    MarshallerMismatch {
        type_name: String,
        registered: &'static str,
        requested: &'static str,
    },

    #[error("query error: {0}")]
    Query(#[from] QueryError),

    #[error("watched key changed before EXEC")]
    Watch,

    #[error("redis transport error: {0}")]
    Transport(#[from] redis::RedisError),

    #[error("redis pool error: {0}")]
    Pool(#[from] bb8::RunError<redis::RedisError>),

    #[error("codec error: {0}")]
    Codec(String),

    #[error("msgpack encode error: {0}")]
    MsgpackEncode(#[from] rmp_serde::encode::Error),

    #[error("msgpack decode error: {0}")]
    MsgpackDecode(#[from] rmp_serde::decode::Error),

    #[error("json codec error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("script error: {0}")]
    Script(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("join error: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Sub-taxonomy for query-construction failures (spec: "malformed filter expression,
/// unknown field, filter/order on a non-indexed field, Include+Exclude conflict, double
/// Order, type mismatch between filter value and field").
#[derive(Debug, Clone, Error)]
pub enum QueryError {
    #[error("malformed filter expression {0:?}")]
    MalformedFilter(String),

    #[error("unknown field {0:?}")]
    UnknownField(String),

    #[error("field {0:?} is not indexed and cannot be filtered or ordered on")]
    NotIndexed(String),

    #[error("Include and Exclude cannot both be set on the same query")]
    IncludeExcludeConflict,

    #[error("Order can only be set once per query")]
    DoubleOrder,

    #[error("filter value does not match the declared type of field {0:?}")]
    TypeMismatch(String),
}

impl Error {
    pub fn model_not_found(type_name: impl Into<String>, id: impl Into<String>) -> Self {
        Error::ModelNotFound {
            type_name: type_name.into(),
            id: id.into(),
        }
    }

    pub fn invalid_model_type(expected: impl Into<String>, found: impl Into<String>) -> Self {
        Error::InvalidModelType {
            expected: expected.into(),
            found: found.into(),
        }
    }
}
