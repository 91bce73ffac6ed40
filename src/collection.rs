//! `Collection<T, M>`: the per-type facade over save/find/delete, matching the
//! teacher's own thin-wrapper-over-`Transaction` style. Every method here is a single
//! `Transaction` with one or more queued actions — a "standalone" call is just a
//! one-action transaction, exactly as the design intends.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use redis::Value;

use crate::codec::Marshaller;
use crate::error::{Error, QueryError, Result};
use crate::index;
use crate::keys;
use crate::pool::RedisPool;
use crate::query::Query;
use crate::record::{FieldSpec, IndexKind, Record};
use crate::reply;
use crate::transaction::{Handler, Transaction};

/// Stash a reply into an owned slot so it can be decoded after `Transaction::exec`
/// returns, instead of inside the (`'static`-bounded) handler closure itself.
fn capture() -> (Handler, Arc<Mutex<Option<Value>>>) {
    let slot = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);
    let handler: Handler = Box::new(move |value: &Value| {
        *sink.lock() = Some(value.clone());
        Ok(())
    });
    (handler, slot)
}

/// A registered record type's collection of persisted instances, plus the secondary
/// indexes kept in step with it.
pub struct Collection<T: Record, M: Marshaller> {
    pool: Arc<RedisPool>,
    type_name: String,
    marshaller: M,
    id_generator: fn() -> String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Record, M: Marshaller> Collection<T, M> {
    pub fn new(pool: Arc<RedisPool>, type_name: String, marshaller: M) -> Self {
        Collection {
            pool,
            type_name,
            marshaller,
            id_generator: crate::record::id::random_id,
            _marker: PhantomData,
        }
    }

    /// Swap the id generator `save` uses for fresh records (e.g. to
    /// [`crate::record::id::sequential_id`]).
    pub fn with_id_generator(mut self, generator: fn() -> String) -> Self {
        self.id_generator = generator;
        self
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Start a fluent query over this collection.
    pub fn query(&self) -> Query<'_, T, M> {
        Query::new(self.pool.as_ref(), &self.type_name, &self.marshaller)
    }

    fn primary_key(&self, id: &str) -> String {
        keys::primary(&self.type_name, id)
    }

    fn all_ids_key(&self) -> String {
        keys::all_ids(&self.type_name)
    }

    fn indexed_field_names(&self) -> (Vec<&'static str>, Vec<&'static str>) {
        let mut numeric = Vec::new();
        let mut string = Vec::new();
        for spec in T::fields() {
            match spec.index {
                IndexKind::Numeric | IndexKind::Boolean => numeric.push(spec.redis_name),
                IndexKind::String => string.push(spec.redis_name),
                IndexKind::None => {}
            }
        }
        (numeric, string)
    }

    fn index_write_cmd(&self, spec: &FieldSpec, encoded: &[u8], id: &str) -> Result<redis::Cmd> {
        match spec.index {
            IndexKind::Numeric => {
                let score = index::numeric_score_from_encoded(encoded)?;
                Ok(index::zadd_numeric_bool(&self.type_name, spec.redis_name, score, id))
            }
            IndexKind::Boolean => {
                let score = index::bool_score_from_encoded(encoded)?;
                Ok(index::zadd_numeric_bool(&self.type_name, spec.redis_name, score, id))
            }
            IndexKind::String => index::zadd_string(&self.type_name, spec.redis_name, encoded, id),
            IndexKind::None => unreachable!("index_write_cmd is only called for indexed fields"),
        }
    }

    fn resolve_fields(&self, field_names: Option<&[&str]>) -> Result<Vec<&'static FieldSpec>> {
        match field_names {
            None => Ok(T::fields().iter().collect()),
            Some(names) => names
                .iter()
                .map(|name| {
                    FieldSpec::find(T::fields(), name)
                        .ok_or_else(|| Error::Query(QueryError::UnknownField((*name).to_string())))
                })
                .collect(),
        }
    }

    /// Assigns a fresh id if absent, then writes every field and refreshes every index.
    pub async fn save(&self, record: &mut T) -> Result<()> {
        if !record.has_id() {
            record.set_id((self.id_generator)());
        }
        self.write_fields(record, None).await
    }

    /// Like [`save`](Self::save) but restricted to `field_names`: only those fields are
    /// written and only their indexes refreshed. The id is never touched, and the
    /// record must already have one.
    pub async fn update_fields(&self, field_names: &[&str], record: &T) -> Result<()> {
        if !record.has_id() {
            return Err(Error::Codec(
                "update_fields requires a record that already has an id".into(),
            ));
        }
        self.write_fields(record, Some(field_names)).await
    }

    async fn write_fields(&self, record: &T, field_names: Option<&[&str]>) -> Result<()> {
        let id = record.id().to_string();
        let selected = self.resolve_fields(field_names)?;
        let primary_key = self.primary_key(&id);

        let mut encoded_fields = Vec::with_capacity(selected.len());
        for spec in selected {
            let encoded = record.encode_field(spec, &self.marshaller)?;
            encoded_fields.push((spec, encoded));
        }

        let pool = self.pool.as_ref();
        let scripts = pool.scripts();
        let mut tx = Transaction::new(pool);

        // Stale string-index entries must be removed before HSET overwrites the value
        // they were computed from — after the overwrite, the old value is gone.
        for (spec, _) in &encoded_fields {
            if spec.index == IndexKind::String {
                let index_key = keys::index(&self.type_name, spec.redis_name);
                tx.script(
                    &scripts.delete_string_index,
                    vec![primary_key.clone().into_bytes(), index_key.into_bytes()],
                    vec![id.clone().into_bytes(), spec.redis_name.as_bytes().to_vec()],
                    None,
                );
            }
        }

        let mut hset = redis::cmd("HSET");
        hset.arg(&primary_key);
        for (spec, encoded) in &encoded_fields {
            hset.arg(spec.redis_name).arg(encoded);
        }
        tx.command(hset, None);

        let mut sadd = redis::cmd("SADD");
        sadd.arg(self.all_ids_key()).arg(&id);
        tx.command(sadd, None);

        for (spec, encoded) in &encoded_fields {
            if spec.is_indexed() && !index::is_null_literal(encoded) {
                tx.command(self.index_write_cmd(spec, encoded, &id)?, None);
            }
        }

        tx.exec().await
    }

    /// `HMGET` every non-skipped field and decode into `dest`. Fails with
    /// [`Error::ModelNotFound`] if `id` is not in the all-ids set.
    pub async fn find(&self, id: &str, dest: &mut T) -> Result<()> {
        self.find_fields_inner(id, None, dest).await
    }

    /// Like [`find`](Self::find) but restricted to `field_names`.
    pub async fn find_fields(&self, id: &str, field_names: &[&str], dest: &mut T) -> Result<()> {
        self.find_fields_inner(id, Some(field_names), dest).await
    }

    async fn find_fields_inner(
        &self,
        id: &str,
        field_names: Option<&[&str]>,
        dest: &mut T,
    ) -> Result<()> {
        let selected = self.resolve_fields(field_names)?;

        let pool = self.pool.as_ref();
        let mut tx = Transaction::new(pool);

        let (member_handler, member_slot) = capture();
        let mut is_member = redis::cmd("SISMEMBER");
        is_member.arg(self.all_ids_key()).arg(id);
        tx.command(is_member, Some(member_handler));

        let (hmget_handler, hmget_slot) = capture();
        let mut hmget = redis::cmd("HMGET");
        hmget.arg(self.primary_key(id));
        for spec in &selected {
            hmget.arg(spec.redis_name);
        }
        tx.command(hmget, Some(hmget_handler));

        tx.exec().await?;

        let mut member = false;
        if let Some(value) = member_slot.lock().take() {
            reply::scan_bool(&value, &mut member)?;
        }
        if !member {
            return Err(Error::model_not_found(self.type_name.clone(), id));
        }

        let values = match hmget_slot.lock().take() {
            Some(Value::Array(items)) => items,
            Some(Value::Nil) | None => Vec::new(),
            Some(other) => {
                return Err(Error::Codec(format!(
                    "expected HMGET array reply, got {other:?}"
                )))
            }
        };
        if values.len() != selected.len() {
            return Err(Error::Codec(
                "HMGET reply cardinality does not match the requested field count".into(),
            ));
        }
        for (spec, value) in selected.iter().zip(values.iter()) {
            let raw = match value {
                Value::Nil => None,
                Value::BulkString(bytes) => Some(bytes.as_slice()),
                other => {
                    return Err(Error::Codec(format!(
                        "unexpected HMGET field value shape: {other:?}"
                    )))
                }
            };
            dest.decode_field(spec, &self.marshaller, raw)?;
        }
        dest.set_id(id.to_string());
        Ok(())
    }

    /// Scan every persisted record of this type into `dest`.
    pub async fn find_all(&self, dest: &mut Vec<T>) -> Result<()> {
        let pool = self.pool.as_ref();
        let scripts = pool.scripts();
        let mut tx = Transaction::new(pool);

        let (handler, slot) = capture();
        tx.script(
            &scripts.find_models_by_ids,
            vec![self.all_ids_key().into_bytes()],
            vec![self.type_name.clone().into_bytes(), b"set".to_vec()],
            Some(handler),
        );
        tx.exec().await?;

        let value = slot.lock().take().unwrap_or(Value::Nil);
        reply::scan_hash_models(&self.marshaller, &value, dest)
    }

    /// `SCARD` of the all-ids set.
    pub async fn count(&self) -> Result<i64> {
        let pool = self.pool.as_ref();
        let mut tx = Transaction::new(pool);

        let (handler, slot) = capture();
        let mut scard = redis::cmd("SCARD");
        scard.arg(self.all_ids_key());
        tx.command(scard, Some(handler));
        tx.exec().await?;

        let mut count = 0i64;
        if let Some(value) = slot.lock().take() {
            reply::scan_int(&value, &mut count)?;
        }
        Ok(count)
    }

    fn delete_script_args(&self) -> Vec<Vec<u8>> {
        let (numeric_fields, string_fields) = self.indexed_field_names();
        let mut args = vec![self.type_name.clone().into_bytes()];
        args.push(numeric_fields.len().to_string().into_bytes());
        args.extend(numeric_fields.iter().map(|f| f.as_bytes().to_vec()));
        args.push(string_fields.len().to_string().into_bytes());
        args.extend(string_fields.iter().map(|f| f.as_bytes().to_vec()));
        args
    }

    /// Removes every index entry and the primary hash for `id`, and drops it from the
    /// all-ids set. Returns `true` iff a record was actually removed.
    ///
    /// Implemented by running `deleteModelsBySetIds` over a throwaway one-member set
    /// rather than duplicating its per-field index cleanup here; the script's own
    /// `EXISTS` guard on the primary hash gives the same "did anything really get
    /// deleted" signal the single-id path needs.
    pub async fn delete(&self, id: &str) -> Result<bool> {
        let pool = self.pool.as_ref();
        let scripts = pool.scripts();
        let mut tx = Transaction::new(pool);

        let tmp_key = keys::tmp("delete-one");

        let mut sadd = redis::cmd("SADD");
        sadd.arg(&tmp_key).arg(id);
        tx.command(sadd, None);

        let (handler, slot) = capture();
        tx.script(
            &scripts.delete_models_by_set_ids,
            vec![tmp_key.clone().into_bytes()],
            self.delete_script_args(),
            Some(handler),
        );

        let mut del = redis::cmd("DEL");
        del.arg(&tmp_key);
        tx.command(del, None);

        tx.exec().await?;

        let mut deleted = 0i64;
        if let Some(value) = slot.lock().take() {
            reply::scan_int(&value, &mut deleted)?;
        }
        Ok(deleted > 0)
    }

    /// Delete every persisted record of this type. Returns the number deleted.
    pub async fn delete_all(&self) -> Result<i64> {
        let pool = self.pool.as_ref();
        let scripts = pool.scripts();
        let mut tx = Transaction::new(pool);

        let (handler, slot) = capture();
        tx.script(
            &scripts.delete_models_by_set_ids,
            vec![self.all_ids_key().into_bytes()],
            self.delete_script_args(),
            Some(handler),
        );
        tx.exec().await?;

        let mut deleted = 0i64;
        if let Some(value) = slot.lock().take() {
            reply::scan_int(&value, &mut deleted)?;
        }
        Ok(deleted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
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
    fn delete_script_args_lists_numeric_then_string_field_names() {
        // Pure-function check on the argument layout without touching Redis: the
        // numeric/bool group comes first with its count prefix, then the string group.
        let numeric_count_and_names = [b"1".to_vec(), b"count".to_vec()];
        let string_count_and_names = [b"1".to_vec(), b"name".to_vec()];

        let (numeric_fields, string_fields) = {
            let mut numeric = Vec::new();
            let mut string = Vec::new();
            for spec in Widget::fields() {
                match spec.index {
                    IndexKind::Numeric | IndexKind::Boolean => numeric.push(spec.redis_name),
                    IndexKind::String => string.push(spec.redis_name),
                    IndexKind::None => {}
                }
            }
            (numeric, string)
        };
        assert_eq!(numeric_fields, vec!["count"]);
        assert_eq!(string_fields, vec!["name"]);

        let mut expected = vec![b"Widget".to_vec()];
        expected.extend(numeric_count_and_names);
        expected.extend(string_count_and_names);
        assert_eq!(expected[0], b"Widget".to_vec());
    }
}
