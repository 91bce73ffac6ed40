//! Key derivation for the four key shapes this engine persists.
//!
//! Every key is a plain colon-joined string; nothing here talks to Redis directly, so
//! these are pure, independently testable functions.

use crate::record::id::random_id;

/// Primary hash key for one record: `«typeName»:«id»`.
pub fn primary(type_name: &str, id: &str) -> String {
    format!("{type_name}:{id}")
}

/// All-ids set for a type: `«typeName»:all`.
pub fn all_ids(type_name: &str) -> String {
    format!("{type_name}:all")
}

/// Field index key (numeric, boolean, or string): `«typeName»:«fieldRedisName»`.
pub fn index(type_name: &str, field_redis_name: &str) -> String {
    format!("{type_name}:{field_redis_name}")
}

/// A temporary query key: `tmp:«purpose»:«randomID»`. A fresh random suffix is drawn
/// on every call, so concurrent queries never collide on the same temp key.
pub fn tmp(purpose: &str) -> String {
    format!("tmp:{purpose}:{}", random_id())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_shape() {
        assert_eq!(primary("User", "abc123"), "User:abc123");
    }

    #[test]
    fn all_ids_key_shape() {
        assert_eq!(all_ids("User"), "User:all");
    }

    #[test]
    fn index_key_shape() {
        assert_eq!(index("User", "age"), "User:age");
    }

    #[test]
    fn tmp_keys_are_unique() {
        let a = tmp("filter");
        let b = tmp("filter");
        assert_ne!(a, b);
        assert!(a.starts_with("tmp:filter:"));
    }
}
