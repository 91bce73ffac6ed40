//! Encoding and decoding between record field values and Redis bulk-string form.
//!
//! Three lanes, matching [`crate::FieldKind`]:
//! - primitive scalars, encoded/decoded directly ([`encode_primitive`]/[`decode_primitive`]);
//! - `Option<primitive>`, where `None` is the literal sentinel `"NULL"`
//!   ([`encode_pointer_primitive`]/[`decode_pointer_primitive`]);
//! - everything else, delegated to a pluggable [`Marshaller`]
//!   ([`encode_inconvertible`]/[`decode_inconvertible`] and the `_opt` variants for
//!   nilable inconvertible fields).
//!
//! `#[derive(Record)]` generates the per-field dispatch that calls into this module;
//! these functions are also unit-testable on their own.

use crate::error::{Error, Result};
use serde::{de::DeserializeOwned, Serialize};

const NULL_SENTINEL: &[u8] = b"NULL";

/// Which family of Redis secondary index a scalar type's values belong in. Used by
/// [`crate::query::Query::filter`] to reject a filter value whose type doesn't match
/// the field's declared [`crate::record::IndexKind`] without needing per-field `TypeId`
/// bookkeeping in [`crate::record::FieldSpec`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarCategory {
    Numeric,
    Boolean,
    Stringlike,
}

/// A scalar type storable directly as a Redis bulk string.
///
/// Integers use canonical decimal, floats use a round-trippable `to_string`/`parse`
/// pair, booleans are `"true"`/`"false"`, and strings/byte-slices are copied verbatim —
/// matching the source design's codec contract exactly.
pub trait ScalarCodec: Sized {
    const CATEGORY: ScalarCategory;

    fn encode_scalar(&self) -> Vec<u8>;
    fn decode_scalar(bytes: &[u8]) -> Result<Self>;
}

macro_rules! impl_int_codec {
    ($($t:ty),*) => {
        $(
            impl ScalarCodec for $t {
                const CATEGORY: ScalarCategory = ScalarCategory::Numeric;

                fn encode_scalar(&self) -> Vec<u8> {
                    self.to_string().into_bytes()
                }
                fn decode_scalar(bytes: &[u8]) -> Result<Self> {
                    let s = std::str::from_utf8(bytes)
                        .map_err(|e| Error::Codec(format!("invalid utf8 in integer field: {e}")))?;
                    s.parse::<$t>()
                        .map_err(|e| Error::Codec(format!("invalid integer {s:?}: {e}")))
                }
            }
        )*
    };
}

impl_int_codec!(i8, i16, i32, i64, i128, isize, u8, u16, u32, u64, u128, usize);

macro_rules! impl_float_codec {
    ($($t:ty),*) => {
        $(
            impl ScalarCodec for $t {
                const CATEGORY: ScalarCategory = ScalarCategory::Numeric;

                fn encode_scalar(&self) -> Vec<u8> {
                    self.to_string().into_bytes()
                }
                fn decode_scalar(bytes: &[u8]) -> Result<Self> {
                    let s = std::str::from_utf8(bytes)
                        .map_err(|e| Error::Codec(format!("invalid utf8 in float field: {e}")))?;
                    s.parse::<$t>()
                        .map_err(|e| Error::Codec(format!("invalid float {s:?}: {e}")))
                }
            }
        )*
    };
}

impl_float_codec!(f32, f64);

impl ScalarCodec for bool {
    const CATEGORY: ScalarCategory = ScalarCategory::Boolean;

    fn encode_scalar(&self) -> Vec<u8> {
        if *self { b"true".to_vec() } else { b"false".to_vec() }
    }

    fn decode_scalar(bytes: &[u8]) -> Result<Self> {
        match bytes {
            b"true" | b"1" => Ok(true),
            b"false" | b"0" => Ok(false),
            other => Err(Error::Codec(format!(
                "invalid bool {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

impl ScalarCodec for String {
    const CATEGORY: ScalarCategory = ScalarCategory::Stringlike;

    fn encode_scalar(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode_scalar(bytes: &[u8]) -> Result<Self> {
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }
}

impl ScalarCodec for Vec<u8> {
    const CATEGORY: ScalarCategory = ScalarCategory::Stringlike;

    fn encode_scalar(&self) -> Vec<u8> {
        self.clone()
    }

    fn decode_scalar(bytes: &[u8]) -> Result<Self> {
        Ok(bytes.to_vec())
    }
}

/// Encode a primitive field.
pub fn encode_primitive<T: ScalarCodec>(value: &T) -> Result<Vec<u8>> {
    Ok(value.encode_scalar())
}

/// Decode a primitive field. A nil reply (`raw = None`) leaves `dest` unchanged.
pub fn decode_primitive<T: ScalarCodec>(raw: Option<&[u8]>, dest: &mut T) -> Result<()> {
    match raw {
        None => Ok(()),
        Some(bytes) => {
            *dest = T::decode_scalar(bytes)?;
            Ok(())
        }
    }
}

/// Encode an `Option<primitive>` field. `None` becomes the literal `"NULL"`.
///
/// A `Some` value that itself encodes to the literal bytes `"NULL"` is rejected rather
/// than silently treated as a nil pointer on the next decode (open question (a) in the
/// design notes, resolved in favor of rejection over corruption).
pub fn encode_pointer_primitive<T: ScalarCodec>(value: &Option<T>) -> Result<Vec<u8>> {
    match value {
        None => Ok(NULL_SENTINEL.to_vec()),
        Some(v) => {
            let bytes = v.encode_scalar();
            if bytes == NULL_SENTINEL {
                return Err(Error::Codec(
                    "value encodes to the literal sentinel \"NULL\", indistinguishable from a nil pointer".into(),
                ));
            }
            Ok(bytes)
        }
    }
}

/// Decode an `Option<primitive>` field. The literal `"NULL"` decodes to `None`; a nil
/// reply leaves `dest` unchanged.
pub fn decode_pointer_primitive<T: ScalarCodec>(
    raw: Option<&[u8]>,
    dest: &mut Option<T>,
) -> Result<()> {
    match raw {
        None => Ok(()),
        Some(bytes) if bytes == NULL_SENTINEL => {
            *dest = None;
            Ok(())
        }
        Some(bytes) => {
            *dest = Some(T::decode_scalar(bytes)?);
            Ok(())
        }
    }
}

/// Pluggable fallback encoder for inconvertible (non-primitive) fields.
///
/// The only coupling between the engine and a marshaller is this trait; any
/// implementation that round-trips `Serialize`/`DeserializeOwned` values is valid. The
/// crate ships [`BinaryMarshaller`] (MessagePack) and [`JsonMarshaller`].
pub trait Marshaller: Default + Send + Sync + 'static {
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>>;
    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T>;
}

/// Binary fallback marshaller using MessagePack (`rmp-serde`), the same wire format the
/// teacher's own `RedisStr` cache wrapper uses for non-primitive values.
#[derive(Debug, Default, Clone, Copy)]
pub struct BinaryMarshaller;

impl Marshaller for BinaryMarshaller {
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}

/// JSON fallback marshaller, for when the stored value should be human-readable
/// outside this engine (e.g. inspected with `redis-cli`).
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonMarshaller;

impl Marshaller for JsonMarshaller {
    fn marshal<T: Serialize>(&self, value: &T) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(value)?)
    }

    fn unmarshal<T: DeserializeOwned>(&self, bytes: &[u8]) -> Result<T> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Encode an inconvertible field via the fallback marshaller.
pub fn encode_inconvertible<M: Marshaller, T: Serialize>(
    marshaller: &M,
    value: &T,
) -> Result<Vec<u8>> {
    marshaller.marshal(value)
}

/// Decode an inconvertible field via the fallback marshaller. A nil reply leaves
/// `dest` unchanged.
pub fn decode_inconvertible<M: Marshaller, T: DeserializeOwned>(
    marshaller: &M,
    raw: Option<&[u8]>,
    dest: &mut T,
) -> Result<()> {
    match raw {
        None => Ok(()),
        Some(bytes) => {
            *dest = marshaller.unmarshal(bytes)?;
            Ok(())
        }
    }
}

/// Encode an `Option<inconvertible>` field; `None` becomes the literal `"NULL"`.
pub fn encode_inconvertible_opt<M: Marshaller, T: Serialize>(
    marshaller: &M,
    value: &Option<T>,
) -> Result<Vec<u8>> {
    match value {
        None => Ok(NULL_SENTINEL.to_vec()),
        Some(v) => marshaller.marshal(v),
    }
}

/// Decode an `Option<inconvertible>` field. The literal `"NULL"` decodes to `None`; a
/// nil reply leaves `dest` unchanged.
pub fn decode_inconvertible_opt<M: Marshaller, T: DeserializeOwned>(
    marshaller: &M,
    raw: Option<&[u8]>,
    dest: &mut Option<T>,
) -> Result<()> {
    match raw {
        None => Ok(()),
        Some(bytes) if bytes == NULL_SENTINEL => {
            *dest = None;
            Ok(())
        }
        Some(bytes) => {
            *dest = Some(marshaller.unmarshal(bytes)?);
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn int_round_trips() {
        let bytes = encode_primitive(&42i64).unwrap();
        assert_eq!(bytes, b"42");
        let mut dest = 0i64;
        decode_primitive(Some(&bytes), &mut dest).unwrap();
        assert_eq!(dest, 42);
    }

    #[test]
    fn nil_reply_leaves_dest_unchanged() {
        let mut dest = 7i64;
        decode_primitive(None, &mut dest).unwrap();
        assert_eq!(dest, 7);
    }

    #[test]
    fn bad_integer_is_a_codec_error() {
        let mut dest = 0i64;
        let err = decode_primitive(Some(b"not-a-number"), &mut dest).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn pointer_primitive_none_is_null_sentinel() {
        let bytes = encode_pointer_primitive::<i64>(&None).unwrap();
        assert_eq!(bytes, b"NULL");
        let mut dest: Option<i64> = Some(1);
        decode_pointer_primitive(Some(b"NULL"), &mut dest).unwrap();
        assert_eq!(dest, None);
    }

    #[test]
    fn pointer_primitive_some_round_trips() {
        let bytes = encode_pointer_primitive(&Some(123i64)).unwrap();
        let mut dest: Option<i64> = None;
        decode_pointer_primitive(Some(&bytes), &mut dest).unwrap();
        assert_eq!(dest, Some(123));
    }

    #[test]
    fn literal_null_string_value_is_rejected_at_encode_time() {
        let err = encode_pointer_primitive(&Some("NULL".to_string())).unwrap_err();
        assert!(matches!(err, Error::Codec(_)));
    }

    #[test]
    fn json_marshaller_round_trips_a_map() {
        use std::collections::HashMap;
        let marshaller = JsonMarshaller;
        let mut map = HashMap::new();
        map.insert("a".to_string(), "x".to_string());
        let bytes = encode_inconvertible(&marshaller, &map).unwrap();
        let mut dest: HashMap<String, String> = HashMap::new();
        decode_inconvertible(&marshaller, Some(&bytes), &mut dest).unwrap();
        assert_eq!(dest, map);
    }

    #[test]
    fn binary_marshaller_round_trips_a_vec() {
        let marshaller = BinaryMarshaller;
        let data = vec![1, 2, 3];
        let bytes = encode_inconvertible(&marshaller, &data).unwrap();
        let mut dest: Vec<i32> = Vec::new();
        decode_inconvertible(&marshaller, Some(&bytes), &mut dest).unwrap();
        assert_eq!(dest, data);
    }
}
