//! Reply handlers: functions that consume one RESP reply (`&redis::Value`) and scan
//! it into a destination. These are what a [`crate::transaction::Handler`] closure
//! typically calls into.
//!
//! Two model-scanning conventions are supported, matching the two reply shapes this
//! engine produces: [`scan_model`]/[`scan_models`] for `SORT ... GET field GET #`
//! replies (positional, ordered by the requested field list, with the literal `"-"`
//! token standing in for the id); [`scan_hash_model`]/[`scan_hash_models`] for
//! `findModelsByIds`-style replies (one row per record: `[id, field, value, ...]`).

use redis::Value;

use crate::codec::Marshaller;
use crate::error::{Error, QueryError, Result};
use crate::record::{FieldSpec, Record};

pub fn scan_int(value: &Value, dest: &mut i64) -> Result<()> {
    match value {
        Value::Nil => Ok(()),
        Value::Int(i) => {
            *dest = *i;
            Ok(())
        }
        Value::BulkString(bytes) => {
            *dest = parse_i64(bytes)?;
            Ok(())
        }
        other => Err(Error::Codec(format!("expected integer reply, got {other:?}"))),
    }
}

pub fn scan_bool(value: &Value, dest: &mut bool) -> Result<()> {
    match value {
        Value::Nil => Ok(()),
        Value::Int(i) => {
            *dest = *i != 0;
            Ok(())
        }
        Value::Boolean(b) => {
            *dest = *b;
            Ok(())
        }
        Value::BulkString(bytes) => {
            *dest = match bytes.as_slice() {
                b"true" | b"1" => true,
                b"false" | b"0" => false,
                _ => return Err(Error::Codec("expected boolean-valued bulk string".into())),
            };
            Ok(())
        }
        other => Err(Error::Codec(format!("expected boolean reply, got {other:?}"))),
    }
}

pub fn scan_string(value: &Value, dest: &mut String) -> Result<()> {
    match value {
        Value::Nil => Ok(()),
        Value::BulkString(bytes) => {
            *dest = String::from_utf8_lossy(bytes).into_owned();
            Ok(())
        }
        Value::SimpleString(s) => {
            *dest = s.clone();
            Ok(())
        }
        Value::Int(i) => {
            *dest = i.to_string();
            Ok(())
        }
        Value::Okay => {
            *dest = "OK".to_string();
            Ok(())
        }
        other => Err(Error::Codec(format!("expected string reply, got {other:?}"))),
    }
}

pub fn scan_float(value: &Value, dest: &mut f64) -> Result<()> {
    match value {
        Value::Nil => Ok(()),
        Value::Double(d) => {
            *dest = *d;
            Ok(())
        }
        Value::Int(i) => {
            *dest = *i as f64;
            Ok(())
        }
        Value::BulkString(bytes) => {
            *dest = std::str::from_utf8(bytes)
                .ok()
                .and_then(|s| s.parse().ok())
                .ok_or_else(|| Error::Codec("expected float-valued bulk string".into()))?;
            Ok(())
        }
        other => Err(Error::Codec(format!("expected float reply, got {other:?}"))),
    }
}

pub fn scan_strings(value: &Value, dest: &mut Vec<String>) -> Result<()> {
    match value {
        Value::Nil => {
            dest.clear();
            Ok(())
        }
        Value::Array(items) => {
            dest.clear();
            dest.reserve(items.len());
            for item in items {
                let mut s = String::new();
                scan_string(item, &mut s)?;
                dest.push(s);
            }
            Ok(())
        }
        other => Err(Error::Codec(format!(
            "expected array-of-strings reply, got {other:?}"
        ))),
    }
}

/// Scan one `SORT ... GET ... GET #` reply into `dest`, using `field_names` (which may
/// include the `"-"` id token) to interpret each positional entry.
pub fn scan_model<T: Record, M: Marshaller>(
    field_names: &[&str],
    marshaller: &M,
    value: &Value,
    dest: &mut T,
) -> Result<()> {
    let items = match value {
        Value::Array(items) => items,
        Value::Nil => return Err(Error::model_not_found(T::type_name(), "")),
        other => {
            return Err(Error::Codec(format!(
                "expected array reply for a model scan, got {other:?}"
            )))
        }
    };
    if items.len() != field_names.len() {
        return Err(Error::Codec(format!(
            "reply cardinality {} does not match the requested field count {}",
            items.len(),
            field_names.len()
        )));
    }
    for (name, item) in field_names.iter().zip(items.iter()) {
        apply_named_field(*name, marshaller, item, dest)?;
    }
    Ok(())
}

/// Scan a flattened multi-record `SORT ... GET ... GET #` reply into `dest`, resizing
/// it to match the reply's record count.
pub fn scan_models<T: Record, M: Marshaller>(
    field_names: &[&str],
    marshaller: &M,
    value: &Value,
    dest: &mut Vec<T>,
) -> Result<()> {
    let items = match value {
        Value::Array(items) => items,
        Value::Nil => {
            dest.clear();
            return Ok(());
        }
        other => {
            return Err(Error::Codec(format!(
                "expected array reply for a models scan, got {other:?}"
            )))
        }
    };
    let width = field_names.len();
    if width == 0 || items.len() % width != 0 {
        return Err(Error::Codec(format!(
            "reply cardinality {} is not a multiple of the requested field count {}",
            items.len(),
            width
        )));
    }
    dest.clear();
    dest.reserve(items.len() / width);
    for chunk in items.chunks(width) {
        let mut record = T::default();
        for (name, item) in field_names.iter().zip(chunk.iter()) {
            apply_named_field(*name, marshaller, item, &mut record)?;
        }
        dest.push(record);
    }
    Ok(())
}

/// Scan one `findModelsByIds`-style row (`[id, field, value, ...]`) into `dest`.
/// Empty rows (the id lookup came up empty) surface as [`Error::ModelNotFound`].
pub fn scan_hash_model<T: Record, M: Marshaller>(
    marshaller: &M,
    row: &Value,
    dest: &mut T,
) -> Result<()> {
    let items = match row {
        Value::Array(items) => items,
        Value::Nil => return Err(Error::model_not_found(T::type_name(), "")),
        other => {
            return Err(Error::Codec(format!(
                "expected array reply for a hash model row, got {other:?}"
            )))
        }
    };
    let (id_value, rest) = items
        .split_first()
        .ok_or_else(|| Error::model_not_found(T::type_name(), ""))?;

    let mut id = String::new();
    scan_string(id_value, &mut id)?;
    dest.set_id(id);

    if rest.len() % 2 != 0 {
        return Err(Error::Codec(
            "hash model row must have an even number of field/value entries".into(),
        ));
    }
    for pair in rest.chunks(2) {
        let mut name = String::new();
        scan_string(&pair[0], &mut name)?;
        apply_named_field(&name, marshaller, &pair[1], dest)?;
    }
    Ok(())
}

/// Scan a `findModelsByIds`-style reply (one row per record) into `dest`.
pub fn scan_hash_models<T: Record, M: Marshaller>(
    marshaller: &M,
    value: &Value,
    dest: &mut Vec<T>,
) -> Result<()> {
    let rows = match value {
        Value::Array(rows) => rows,
        Value::Nil => {
            dest.clear();
            return Ok(());
        }
        other => {
            return Err(Error::Codec(format!(
                "expected array reply for hash models, got {other:?}"
            )))
        }
    };
    dest.clear();
    dest.reserve(rows.len());
    for row in rows {
        let mut record = T::default();
        scan_hash_model(marshaller, row, &mut record)?;
        dest.push(record);
    }
    Ok(())
}

fn apply_named_field<T: Record, M: Marshaller>(
    name: &str,
    marshaller: &M,
    item: &Value,
    dest: &mut T,
) -> Result<()> {
    if name == "-" {
        let mut id = String::new();
        scan_string(item, &mut id)?;
        dest.set_id(id);
        return Ok(());
    }
    let spec = FieldSpec::find(T::fields(), name)
        .ok_or_else(|| Error::Query(QueryError::UnknownField(name.to_string())))?;
    let raw = bulk_bytes(item)?;
    dest.decode_field(spec, marshaller, raw.as_deref())
}

fn bulk_bytes(value: &Value) -> Result<Option<Vec<u8>>> {
    match value {
        Value::Nil => Ok(None),
        Value::BulkString(bytes) => Ok(Some(bytes.clone())),
        Value::SimpleString(s) => Ok(Some(s.clone().into_bytes())),
        Value::Int(i) => Ok(Some(i.to_string().into_bytes())),
        other => Err(Error::Codec(format!(
            "unexpected reply shape for a field value: {other:?}"
        ))),
    }
}

fn parse_i64(bytes: &[u8]) -> Result<i64> {
    std::str::from_utf8(bytes)
        .ok()
        .and_then(|s| s.parse().ok())
        .ok_or_else(|| Error::Codec("expected an integer-valued bulk string".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::JsonMarshaller;
    use crate::record::{FieldKind, IndexKind};

    #[derive(Default)]
    struct Widget {
        id: String,
        name: String,
        count: i64,
    }

    static WIDGET_FIELDS: [FieldSpec; 2] = [
        FieldSpec {
            name: "name",
            redis_name: "name",
            kind: FieldKind::Primitive,
            index: IndexKind::String,
        },
        FieldSpec {
            name: "count",
            redis_name: "count",
            kind: FieldKind::Primitive,
            index: IndexKind::Numeric,
        },
    ];

    impl Record for Widget {
        fn type_name() -> &'static str {
            "Widget"
        }
        fn fields() -> &'static [FieldSpec] {
            &WIDGET_FIELDS
        }
        fn id(&self) -> &str {
            &self.id
        }
        fn set_id(&mut self, id: String) {
            self.id = id;
        }
        fn encode_field<M: Marshaller>(&self, spec: &FieldSpec, _m: &M) -> Result<Vec<u8>> {
            match spec.name {
                "name" => Ok(self.name.clone().into_bytes()),
                "count" => Ok(self.count.to_string().into_bytes()),
                other => unreachable!("unknown field {other}"),
            }
        }
        fn decode_field<M: Marshaller>(
            &mut self,
            spec: &FieldSpec,
            _m: &M,
            raw: Option<&[u8]>,
        ) -> Result<()> {
            match (spec.name, raw) {
                ("name", Some(bytes)) => self.name = String::from_utf8_lossy(bytes).into_owned(),
                ("count", Some(bytes)) => {
                    self.count = std::str::from_utf8(bytes).unwrap().parse().unwrap()
                }
                _ => {}
            }
            Ok(())
        }
    }

    #[test]
    fn scan_model_from_sort_get_reply() {
        let marshaller = JsonMarshaller;
        let reply = Value::Array(vec![
            Value::BulkString(b"id-1".to_vec()),
            Value::BulkString(b"gadget".to_vec()),
            Value::BulkString(b"3".to_vec()),
        ]);
        let mut widget = Widget::default();
        scan_model(&["-", "name", "count"], &marshaller, &reply, &mut widget).unwrap();
        assert_eq!(widget.id, "id-1");
        assert_eq!(widget.name, "gadget");
        assert_eq!(widget.count, 3);
    }

    #[test]
    fn scan_hash_model_from_find_models_row() {
        let marshaller = JsonMarshaller;
        let row = Value::Array(vec![
            Value::BulkString(b"id-2".to_vec()),
            Value::BulkString(b"name".to_vec()),
            Value::BulkString(b"widget".to_vec()),
            Value::BulkString(b"count".to_vec()),
            Value::BulkString(b"7".to_vec()),
        ]);
        let mut widget = Widget::default();
        scan_hash_model(&marshaller, &row, &mut widget).unwrap();
        assert_eq!(widget.id, "id-2");
        assert_eq!(widget.name, "widget");
        assert_eq!(widget.count, 7);
    }

    #[test]
    fn scan_hash_model_empty_row_is_not_found() {
        let marshaller = JsonMarshaller;
        let row = Value::Array(vec![]);
        let mut widget = Widget::default();
        let err = scan_hash_model(&marshaller, &row, &mut widget).unwrap_err();
        assert!(matches!(err, Error::ModelNotFound { .. }));
    }

    #[test]
    fn scan_strings_handles_nil_as_empty() {
        let mut dest = vec!["stale".to_string()];
        scan_strings(&Value::Nil, &mut dest).unwrap();
        assert!(dest.is_empty());
    }
}
