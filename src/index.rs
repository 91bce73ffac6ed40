//! Secondary index maintenance: command construction for numeric/boolean sorted-set
//! indexes and for the NUL/DEL composite encoding used by string indexes.
//!
//! Nothing here talks to Redis directly — [`crate::collection::Collection`] calls
//! these to build the commands it queues onto a [`crate::transaction::Transaction`].

use crate::error::{Error, Result};
use crate::keys;

/// Separator between a string index's value and its id. Reserved: a value containing
/// this byte cannot be string-indexed.
pub const NUL: u8 = 0x00;

/// Upper-bound sentinel the query compiler appends to build an exclusive prefix bound
/// (e.g. a `starts-with` filter becomes `[prefix, prefix+DEL)`).
pub const DEL: u8 = 0x7F;

/// The literal bulk-string value a `PointerPrimitive` field holds in place of `Some`.
pub const NULL_LITERAL: &[u8] = b"NULL";

/// `ZADD «type»:«field» score id` for a numeric or boolean indexed field.
pub fn zadd_numeric_bool(type_name: &str, field_redis_name: &str, score: f64, id: &str) -> redis::Cmd {
    let mut cmd = redis::cmd("ZADD");
    cmd.arg(keys::index(type_name, field_redis_name)).arg(score).arg(id);
    cmd
}

/// `ZREM «type»:«field» id` for a numeric or boolean indexed field.
pub fn zrem_numeric_bool(type_name: &str, field_redis_name: &str, id: &str) -> redis::Cmd {
    let mut cmd = redis::cmd("ZREM");
    cmd.arg(keys::index(type_name, field_redis_name)).arg(id);
    cmd
}

/// `ZADD «type»:«field» 0 value∥NUL∥id` for a string indexed field.
pub fn zadd_string(type_name: &str, field_redis_name: &str, value: &[u8], id: &str) -> Result<redis::Cmd> {
    let member = string_member(value, id)?;
    let mut cmd = redis::cmd("ZADD");
    cmd.arg(keys::index(type_name, field_redis_name)).arg(0).arg(member);
    Ok(cmd)
}

/// Build the composite string-index member `value∥NUL∥id`.
pub fn string_member(value: &[u8], id: &str) -> Result<Vec<u8>> {
    if value.contains(&NUL) {
        return Err(Error::Codec(
            "string-indexed value must not contain a NUL byte".into(),
        ));
    }
    let mut member = Vec::with_capacity(value.len() + 1 + id.len());
    member.extend_from_slice(value);
    member.push(NUL);
    member.extend_from_slice(id.as_bytes());
    Ok(member)
}

/// Split a composite string-index member back into its value and id parts.
pub fn split_string_member(member: &[u8]) -> (&[u8], &str) {
    let pos = member
        .iter()
        .position(|&b| b == NUL)
        .unwrap_or(member.len());
    let (value, rest) = member.split_at(pos);
    let id = rest.get(1..).and_then(|b| std::str::from_utf8(b).ok()).unwrap_or("");
    (value, id)
}

/// Parse a numeric field's encoded (decimal-text) bytes into a sorted-set score.
pub fn numeric_score_from_encoded(bytes: &[u8]) -> Result<f64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse::<f64>().ok())
        .ok_or_else(|| Error::Codec("non-numeric value for a numeric index".into()))
}

/// Parse a boolean field's encoded (`"true"`/`"false"`) bytes into a 0/1 score.
pub fn bool_score_from_encoded(bytes: &[u8]) -> Result<f64> {
    match bytes {
        b"true" => Ok(1.0),
        b"false" => Ok(0.0),
        _ => Err(Error::Codec(
            "invalid boolean encoding for a boolean index".into(),
        )),
    }
}

/// Whether an encoded field value is the nil-pointer literal; nil pointers are never
/// indexed.
pub fn is_null_literal(bytes: &[u8]) -> bool {
    bytes == NULL_LITERAL
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn string_member_round_trips() {
        let member = string_member(b"alice", "id1").unwrap();
        let (value, id) = split_string_member(&member);
        assert_eq!(value, b"alice");
        assert_eq!(id, "id1");
    }

    #[test]
    fn string_member_rejects_embedded_nul() {
        assert!(string_member(b"al\0ice", "id1").is_err());
    }

    #[test]
    fn numeric_score_parses_decimal_text() {
        assert_eq!(numeric_score_from_encoded(b"42").unwrap(), 42.0);
        assert_eq!(numeric_score_from_encoded(b"-3.5").unwrap(), -3.5);
    }

    #[test]
    fn bool_score_maps_true_false() {
        assert_eq!(bool_score_from_encoded(b"true").unwrap(), 1.0);
        assert_eq!(bool_score_from_encoded(b"false").unwrap(), 0.0);
    }

    #[test]
    fn null_literal_detection() {
        assert!(is_null_literal(b"NULL"));
        assert!(!is_null_literal(b"42"));
    }
}
