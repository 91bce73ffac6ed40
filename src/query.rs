//! The fluent query builder: `Filter`/`Order`/`Limit`/`Offset`/`Include`/`Exclude`
//! compile down to a temp-key plan executed as one [`crate::transaction::Transaction`],
//! matching the "deferred-error mutator, consuming finisher" shape the teacher's own
//! command builders use.
//!
//! Compilation follows a fixed four-step plan: seed a candidate id set (the all-ids
//! set, a field's own index, or — for a string-indexed order — a freshly extracted
//! copy of one), narrow it by intersecting each filter's matching ids in turn, project
//! through `SORT ... GET`, then delete every temp key the plan created.

use std::marker::PhantomData;
use std::sync::Arc;

use parking_lot::Mutex;
use redis::Value;

use crate::codec::{Marshaller, ScalarCategory, ScalarCodec};
use crate::error::{Error, QueryError, Result};
use crate::index;
use crate::keys;
use crate::pool::RedisPool;
use crate::record::{FieldSpec, IndexKind, Record};
use crate::reply;
use crate::transaction::{Handler, Transaction};

#[derive(Debug, Clone, Copy)]
enum Op {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

fn parse_op(op: &str) -> std::result::Result<Op, QueryError> {
    match op {
        "=" => Ok(Op::Eq),
        "!=" => Ok(Op::Ne),
        "<" => Ok(Op::Lt),
        ">" => Ok(Op::Gt),
        "<=" => Ok(Op::Le),
        ">=" => Ok(Op::Ge),
        other => Err(QueryError::MalformedFilter(other.to_string())),
    }
}

fn category_for_index(index: IndexKind) -> ScalarCategory {
    match index {
        IndexKind::Numeric => ScalarCategory::Numeric,
        IndexKind::Boolean => ScalarCategory::Boolean,
        IndexKind::String => ScalarCategory::Stringlike,
        IndexKind::None => unreachable!("filter()/order() reject non-indexed fields first"),
    }
}

fn fmt_score(score: f64) -> String {
    score.to_string()
}

/// `ZRANGEBYSCORE` bound pairs for a numeric or boolean filter. `!=` is the two-part
/// union the design calls for; everything else is one pair.
fn numeric_bounds(op: Op, score: f64) -> Vec<(Vec<u8>, Vec<u8>)> {
    let v = fmt_score(score);
    match op {
        Op::Eq => vec![(v.clone().into_bytes(), v.into_bytes())],
        Op::Lt => vec![(b"-inf".to_vec(), format!("({v}").into_bytes())],
        Op::Gt => vec![(format!("({v}").into_bytes(), b"+inf".to_vec())],
        Op::Le => vec![(b"-inf".to_vec(), v.into_bytes())],
        Op::Ge => vec![(v.into_bytes(), b"+inf".to_vec())],
        Op::Ne => vec![
            (format!("({v}").into_bytes(), b"+inf".to_vec()),
            (b"-inf".to_vec(), format!("({v}").into_bytes()),
        ],
    }
}

/// `ZRANGEBYLEX` bound pairs for a string filter, over the `value` + NUL + `id`
/// composite member encoding: equality is `[value\0` .. `(value\x7f`, exclusive of
/// anything past the DEL sentinel; ordered comparisons extend one bound to `-`/`+`.
fn string_bounds(op: Op, value: &[u8]) -> Vec<(Vec<u8>, Vec<u8>)> {
    let mut lower_incl = vec![b'['];
    lower_incl.extend_from_slice(value);
    lower_incl.push(index::NUL);

    let mut upper_excl = vec![b'('];
    upper_excl.extend_from_slice(value);
    upper_excl.push(index::DEL);

    let mut bare_excl = vec![b'('];
    bare_excl.extend_from_slice(value);

    match op {
        Op::Eq => vec![(lower_incl, upper_excl)],
        Op::Lt => vec![(b"-".to_vec(), bare_excl)],
        Op::Gt => vec![(upper_excl, b"+".to_vec())],
        Op::Le => vec![(b"-".to_vec(), upper_excl)],
        Op::Ge => vec![(lower_incl, b"+".to_vec())],
        Op::Ne => vec![(upper_excl.clone(), b"+".to_vec()), (b"-".to_vec(), bare_excl)],
    }
}

struct Filter {
    spec: &'static FieldSpec,
    op: Op,
    encoded: Vec<u8>,
}

#[derive(Clone)]
enum Projection {
    All,
    Include(Vec<&'static str>),
    Exclude(Vec<&'static str>),
}

fn capture() -> (Handler, Arc<Mutex<Option<Value>>>) {
    let slot = Arc::new(Mutex::new(None));
    let sink = Arc::clone(&slot);
    let handler: Handler = Box::new(move |value: &Value| {
        *sink.lock() = Some(value.clone());
        Ok(())
    });
    (handler, slot)
}

/// A fluent query over a [`crate::collection::Collection`]. Every mutator returns
/// `&mut Self`; a malformed call sets a deferred error surfaced by the first finisher
/// called afterward, rather than panicking or failing mid-chain.
pub struct Query<'c, T: Record, M: Marshaller> {
    pool: &'c RedisPool,
    type_name: &'c str,
    marshaller: &'c M,
    filters: Vec<Filter>,
    order: Option<(&'static FieldSpec, bool)>,
    limit: Option<i64>,
    offset: Option<i64>,
    projection: Projection,
    error: Option<QueryError>,
    _marker: PhantomData<fn() -> T>,
}

impl<'c, T: Record, M: Marshaller> Query<'c, T, M> {
    pub(crate) fn new(pool: &'c RedisPool, type_name: &'c str, marshaller: &'c M) -> Self {
        Query {
            pool,
            type_name,
            marshaller,
            filters: Vec::new(),
            order: None,
            limit: None,
            offset: None,
            projection: Projection::All,
            error: None,
            _marker: PhantomData,
        }
    }

    /// `field op value`; `op` is one of `= != < > <= >=`. `value`'s category (numeric,
    /// boolean, string-like) must match the field's declared index kind, and the field
    /// must be indexed.
    pub fn filter<V: ScalarCodec>(&mut self, field: &str, op: &str, value: V) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        match self.build_filter(field, op, value) {
            Ok(f) => self.filters.push(f),
            Err(e) => self.error = Some(e),
        }
        self
    }

    fn build_filter<V: ScalarCodec>(
        &self,
        field_name: &str,
        op_str: &str,
        value: V,
    ) -> std::result::Result<Filter, QueryError> {
        let spec = FieldSpec::find(T::fields(), field_name)
            .ok_or_else(|| QueryError::UnknownField(field_name.to_string()))?;
        if !spec.is_indexed() {
            return Err(QueryError::NotIndexed(field_name.to_string()));
        }
        if V::CATEGORY != category_for_index(spec.index) {
            return Err(QueryError::TypeMismatch(field_name.to_string()));
        }
        let op = parse_op(op_str)?;
        Ok(Filter {
            spec,
            op,
            encoded: value.encode_scalar(),
        })
    }

    /// `fieldName` for ascending, `"-fieldName"` for descending. May be called at most
    /// once per query, and only on an indexed field.
    pub fn order(&mut self, field_expr: &str) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        if self.order.is_some() {
            self.error = Some(QueryError::DoubleOrder);
            return self;
        }
        let (descending, name) = match field_expr.strip_prefix('-') {
            Some(rest) => (true, rest),
            None => (false, field_expr),
        };
        match FieldSpec::find(T::fields(), name) {
            Some(spec) if spec.is_indexed() => self.order = Some((spec, descending)),
            Some(_) => self.error = Some(QueryError::NotIndexed(name.to_string())),
            None => self.error = Some(QueryError::UnknownField(name.to_string())),
        }
        self
    }

    pub fn limit(&mut self, n: i64) -> &mut Self {
        if self.error.is_none() {
            self.limit = Some(n);
        }
        self
    }

    pub fn offset(&mut self, n: i64) -> &mut Self {
        if self.error.is_none() {
            self.offset = Some(n);
        }
        self
    }

    /// Project only the named fields. Conflicts with [`exclude`](Self::exclude).
    pub fn include(&mut self, fields: &[&str]) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        if !matches!(self.projection, Projection::All) {
            self.error = Some(QueryError::IncludeExcludeConflict);
            return self;
        }
        match self.resolve_redis_names(fields) {
            Ok(names) => self.projection = Projection::Include(names),
            Err(e) => self.error = Some(e),
        }
        self
    }

    /// Project every field except the named ones. Conflicts with [`include`](Self::include).
    pub fn exclude(&mut self, fields: &[&str]) -> &mut Self {
        if self.error.is_some() {
            return self;
        }
        if !matches!(self.projection, Projection::All) {
            self.error = Some(QueryError::IncludeExcludeConflict);
            return self;
        }
        match self.resolve_redis_names(fields) {
            Ok(names) => self.projection = Projection::Exclude(names),
            Err(e) => self.error = Some(e),
        }
        self
    }

    fn resolve_redis_names(&self, fields: &[&str]) -> std::result::Result<Vec<&'static str>, QueryError> {
        fields
            .iter()
            .map(|name| {
                FieldSpec::find(T::fields(), name)
                    .map(|spec| spec.redis_name)
                    .ok_or_else(|| QueryError::UnknownField(name.to_string()))
            })
            .collect()
    }

    fn projected_fields(&self) -> Vec<&'static FieldSpec> {
        match &self.projection {
            Projection::All => T::fields().iter().collect(),
            Projection::Include(names) => T::fields()
                .iter()
                .filter(|f| names.contains(&f.redis_name))
                .collect(),
            Projection::Exclude(names) => T::fields()
                .iter()
                .filter(|f| !names.contains(&f.redis_name))
                .collect(),
        }
    }

    /// Queue the seed + filter-intersection steps onto `tx`, returning the final
    /// candidate-ids key and the list of temp keys still needing cleanup (the seed's
    /// own temp key, if any, plus one running-intersection key per filter; each
    /// filter's own scratch `filterKey` is deleted inline as soon as it's consumed).
    fn queue_seed_and_filters(&self, tx: &mut Transaction<'c>) -> Result<(String, Vec<String>)> {
        let scripts = self.pool.scripts();
        let mut temp_keys = Vec::new();

        let mut current_key = match &self.order {
            Some((spec, _)) => match spec.index {
                IndexKind::String => {
                    let seed_key = keys::tmp("seed");
                    tx.script(
                        &scripts.extract_ids_from_string_index,
                        vec![
                            keys::index(self.type_name, spec.redis_name).into_bytes(),
                            seed_key.clone().into_bytes(),
                        ],
                        vec![b"-".to_vec(), b"+".to_vec()],
                        None,
                    );
                    temp_keys.push(seed_key.clone());
                    seed_key
                }
                IndexKind::Numeric | IndexKind::Boolean => keys::index(self.type_name, spec.redis_name),
                IndexKind::None => unreachable!("order() only accepts indexed fields"),
            },
            None => keys::all_ids(self.type_name),
        };

        for filter in &self.filters {
            let index_key = keys::index(self.type_name, filter.spec.redis_name);
            let filter_key = keys::tmp("filter");

            let bounds = match filter.spec.index {
                IndexKind::Numeric => numeric_bounds(filter.op, index::numeric_score_from_encoded(&filter.encoded)?),
                IndexKind::Boolean => numeric_bounds(filter.op, index::bool_score_from_encoded(&filter.encoded)?),
                IndexKind::String => string_bounds(filter.op, &filter.encoded),
                IndexKind::None => unreachable!("filter() only accepts indexed fields"),
            };

            for (min, max) in bounds {
                match filter.spec.index {
                    IndexKind::String => tx.script(
                        &scripts.extract_ids_from_string_index,
                        vec![index_key.clone().into_bytes(), filter_key.clone().into_bytes()],
                        vec![min, max],
                        None,
                    ),
                    IndexKind::Numeric | IndexKind::Boolean => tx.script(
                        &scripts.extract_ids_from_field_index,
                        vec![index_key.clone().into_bytes(), filter_key.clone().into_bytes()],
                        vec![min, max],
                        None,
                    ),
                    IndexKind::None => unreachable!(),
                };
            }

            let running_key = keys::tmp("running");
            let mut zinterstore = redis::cmd("ZINTERSTORE");
            zinterstore
                .arg(&running_key)
                .arg(2)
                .arg(&current_key)
                .arg(&filter_key)
                .arg("WEIGHTS")
                .arg(1)
                .arg(0);
            tx.command(zinterstore, None);

            let mut del_filter = redis::cmd("DEL");
            del_filter.arg(&filter_key);
            tx.command(del_filter, None);

            temp_keys.push(running_key.clone());
            current_key = running_key;
        }

        Ok((current_key, temp_keys))
    }

    fn build_sort_cmd(
        &self,
        ids_key: &str,
        limit_override: Option<(i64, i64)>,
        field_names: &mut Vec<&'static str>,
    ) -> redis::Cmd {
        let mut cmd = redis::cmd("SORT");
        cmd.arg(ids_key).arg("BY").arg("nosort");
        if let Some((_, true)) = &self.order {
            cmd.arg("DESC");
        }
        match limit_override {
            Some((offset, limit)) => {
                cmd.arg("LIMIT").arg(offset).arg(limit);
            }
            None if self.offset.is_some() || self.limit.is_some() => {
                cmd.arg("LIMIT").arg(self.offset.unwrap_or(0)).arg(self.limit.unwrap_or(-1));
            }
            None => {}
        }
        for spec in self.projected_fields() {
            cmd.arg("GET").arg(format!("{}:*->{}", self.type_name, spec.redis_name));
            field_names.push(spec.redis_name);
        }
        cmd.arg("GET").arg("#");
        field_names.push("-");
        cmd
    }

    fn queue_cleanup(&self, tx: &mut Transaction<'c>, temp_keys: &[String]) {
        for key in temp_keys {
            let mut del = redis::cmd("DEL");
            del.arg(key);
            tx.command(del, None);
        }
    }

    /// Run the query, decoding every matching record into `dest`.
    pub async fn run(&self, dest: &mut Vec<T>) -> Result<()> {
        if let Some(err) = self.error.clone() {
            return Err(Error::Query(err));
        }
        let mut tx = Transaction::new(self.pool);
        let (ids_key, temp_keys) = self.queue_seed_and_filters(&mut tx)?;

        let mut field_names = Vec::new();
        let sort_cmd = self.build_sort_cmd(&ids_key, None, &mut field_names);
        let (handler, slot) = capture();
        tx.command(sort_cmd, Some(handler));
        self.queue_cleanup(&mut tx, &temp_keys);

        tx.exec().await?;
        let value = slot.lock().take().unwrap_or(Value::Nil);
        reply::scan_models(&field_names, self.marshaller, &value, dest)
    }

    /// Run the query, taking only its first matching record (after `Offset`, if set).
    pub async fn run_one(&self, dest: &mut T) -> Result<()> {
        if let Some(err) = self.error.clone() {
            return Err(Error::Query(err));
        }
        let mut tx = Transaction::new(self.pool);
        let (ids_key, temp_keys) = self.queue_seed_and_filters(&mut tx)?;

        let mut field_names = Vec::new();
        let sort_cmd = self.build_sort_cmd(&ids_key, Some((self.offset.unwrap_or(0), 1)), &mut field_names);
        let (handler, slot) = capture();
        tx.command(sort_cmd, Some(handler));
        self.queue_cleanup(&mut tx, &temp_keys);

        tx.exec().await?;
        let value = slot.lock().take().unwrap_or(Value::Nil);
        match &value {
            Value::Array(items) if items.is_empty() => {
                return Err(Error::model_not_found(self.type_name.to_string(), ""))
            }
            Value::Nil => return Err(Error::model_not_found(self.type_name.to_string(), "")),
            _ => {}
        }
        reply::scan_model(&field_names, self.marshaller, &value, dest)
    }

    /// `SCARD(all-ids)` (with limit/offset arithmetic applied in process) when there are
    /// no filters; otherwise materialises ids with `SORT ... STORE` and takes `LLEN`.
    pub async fn count(&self) -> Result<i64> {
        if let Some(err) = self.error.clone() {
            return Err(Error::Query(err));
        }

        if self.filters.is_empty() {
            let mut tx = Transaction::new(self.pool);
            let (handler, slot) = capture();
            let mut scard = redis::cmd("SCARD");
            scard.arg(keys::all_ids(self.type_name));
            tx.command(scard, Some(handler));
            tx.exec().await?;

            let mut total = 0i64;
            if let Some(value) = slot.lock().take() {
                reply::scan_int(&value, &mut total)?;
            }
            let offset = self.offset.unwrap_or(0).max(0);
            let remaining = (total - offset).max(0);
            return Ok(match self.limit {
                Some(limit) if limit >= 0 => remaining.min(limit),
                _ => remaining,
            });
        }

        let mut tx = Transaction::new(self.pool);
        let (ids_key, temp_keys) = self.queue_seed_and_filters(&mut tx)?;

        let count_key = keys::tmp("count");
        let mut sort_store = redis::cmd("SORT");
        sort_store.arg(&ids_key).arg("BY").arg("nosort");
        if let Some((_, true)) = &self.order {
            sort_store.arg("DESC");
        }
        if self.offset.is_some() || self.limit.is_some() {
            sort_store
                .arg("LIMIT")
                .arg(self.offset.unwrap_or(0))
                .arg(self.limit.unwrap_or(-1));
        }
        sort_store.arg("STORE").arg(&count_key);
        tx.command(sort_store, None);

        let (handler, slot) = capture();
        let mut llen = redis::cmd("LLEN");
        llen.arg(&count_key);
        tx.command(llen, Some(handler));

        let mut del_count = redis::cmd("DEL");
        del_count.arg(&count_key);
        tx.command(del_count, None);
        self.queue_cleanup(&mut tx, &temp_keys);

        tx.exec().await?;
        let mut count = 0i64;
        if let Some(value) = slot.lock().take() {
            reply::scan_int(&value, &mut count)?;
        }
        Ok(count)
    }

    /// The matching ids, in the query's order, with limit/offset applied.
    pub async fn ids(&self) -> Result<Vec<String>> {
        if let Some(err) = self.error.clone() {
            return Err(Error::Query(err));
        }
        let mut tx = Transaction::new(self.pool);
        let (ids_key, temp_keys) = self.queue_seed_and_filters(&mut tx)?;

        let mut sort_cmd = redis::cmd("SORT");
        sort_cmd.arg(&ids_key).arg("BY").arg("nosort");
        if let Some((_, true)) = &self.order {
            sort_cmd.arg("DESC");
        }
        if self.offset.is_some() || self.limit.is_some() {
            sort_cmd
                .arg("LIMIT")
                .arg(self.offset.unwrap_or(0))
                .arg(self.limit.unwrap_or(-1));
        }
        let (handler, slot) = capture();
        tx.command(sort_cmd, Some(handler));
        self.queue_cleanup(&mut tx, &temp_keys);

        tx.exec().await?;
        let mut ids = Vec::new();
        if let Some(value) = slot.lock().take() {
            reply::scan_strings(&value, &mut ids)?;
        }
        Ok(ids)
    }

    /// Store the matching ids (in the query's order, with limit/offset applied) as a
    /// Redis list at `dest_key`.
    pub async fn store_ids(&self, dest_key: &str) -> Result<()> {
        if let Some(err) = self.error.clone() {
            return Err(Error::Query(err));
        }
        let mut tx = Transaction::new(self.pool);
        let (ids_key, temp_keys) = self.queue_seed_and_filters(&mut tx)?;

        let mut sort_cmd = redis::cmd("SORT");
        sort_cmd.arg(&ids_key).arg("BY").arg("nosort");
        if let Some((_, true)) = &self.order {
            sort_cmd.arg("DESC");
        }
        if self.offset.is_some() || self.limit.is_some() {
            sort_cmd
                .arg("LIMIT")
                .arg(self.offset.unwrap_or(0))
                .arg(self.limit.unwrap_or(-1));
        }
        sort_cmd.arg("STORE").arg(dest_key);
        tx.command(sort_cmd, None);
        self.queue_cleanup(&mut tx, &temp_keys);

        tx.exec().await
    }
}

/// The same builder, appending its plan onto a caller-owned [`Transaction`] instead of
/// running its own; destinations are filled in once that transaction executes.
pub struct TransactionQuery<'c, T: Record, M: Marshaller> {
    inner: Query<'c, T, M>,
}

impl<'c, T: Record, M: Marshaller> TransactionQuery<'c, T, M> {
    pub fn new(pool: &'c RedisPool, type_name: &'c str, marshaller: &'c M) -> Self {
        TransactionQuery {
            inner: Query::new(pool, type_name, marshaller),
        }
    }

    pub fn filter<V: ScalarCodec>(&mut self, field: &str, op: &str, value: V) -> &mut Self {
        self.inner.filter(field, op, value);
        self
    }

    pub fn order(&mut self, field_expr: &str) -> &mut Self {
        self.inner.order(field_expr);
        self
    }

    pub fn limit(&mut self, n: i64) -> &mut Self {
        self.inner.limit(n);
        self
    }

    pub fn offset(&mut self, n: i64) -> &mut Self {
        self.inner.offset(n);
        self
    }

    pub fn include(&mut self, fields: &[&str]) -> &mut Self {
        self.inner.include(fields);
        self
    }

    pub fn exclude(&mut self, fields: &[&str]) -> &mut Self {
        self.inner.exclude(fields);
        self
    }

    /// Queue `Run`'s plan onto `tx`. `dest` is replaced with the matching records once
    /// `tx` executes.
    pub fn run(&self, tx: &mut Transaction<'c>, dest: Arc<Mutex<Vec<T>>>) -> Result<()> {
        if let Some(err) = self.inner.error.clone() {
            return Err(Error::Query(err));
        }
        let (ids_key, temp_keys) = self.inner.queue_seed_and_filters(tx)?;
        let mut field_names = Vec::new();
        let sort_cmd = self.inner.build_sort_cmd(&ids_key, None, &mut field_names);

        let handler: Handler = Box::new(move |value: &Value| {
            let marshaller = M::default();
            let mut items = Vec::new();
            reply::scan_models(&field_names, &marshaller, value, &mut items)?;
            *dest.lock() = items;
            Ok(())
        });
        tx.command(sort_cmd, Some(handler));
        self.inner.queue_cleanup(tx, &temp_keys);
        Ok(())
    }

    /// Queue `RunOne`'s plan onto `tx`. `dest` is replaced once `tx` executes; not
    /// finding a match leaves `dest` at its default.
    pub fn run_one(&self, tx: &mut Transaction<'c>, dest: Arc<Mutex<T>>) -> Result<()> {
        if let Some(err) = self.inner.error.clone() {
            return Err(Error::Query(err));
        }
        let (ids_key, temp_keys) = self.inner.queue_seed_and_filters(tx)?;
        let mut field_names = Vec::new();
        let sort_cmd =
            self.inner
                .build_sort_cmd(&ids_key, Some((self.inner.offset.unwrap_or(0), 1)), &mut field_names);

        let handler: Handler = Box::new(move |value: &Value| {
            if matches!(value, Value::Nil) {
                return Ok(());
            }
            if let Value::Array(items) = value {
                if items.is_empty() {
                    return Ok(());
                }
            }
            let marshaller = M::default();
            let mut record = T::default();
            reply::scan_model(&field_names, &marshaller, value, &mut record)?;
            *dest.lock() = record;
            Ok(())
        });
        tx.command(sort_cmd, Some(handler));
        self.inner.queue_cleanup(tx, &temp_keys);
        Ok(())
    }

    /// Queue `Count`'s plan onto `tx`. `dest` is replaced once `tx` executes.
    pub fn count(&self, tx: &mut Transaction<'c>, dest: Arc<Mutex<i64>>) -> Result<()> {
        if let Some(err) = self.inner.error.clone() {
            return Err(Error::Query(err));
        }
        if self.inner.filters.is_empty() {
            let offset = self.inner.offset.unwrap_or(0).max(0);
            let limit = self.inner.limit;
            let handler: Handler = Box::new(move |value: &Value| {
                let mut total = 0i64;
                reply::scan_int(value, &mut total)?;
                let remaining = (total - offset).max(0);
                *dest.lock() = match limit {
                    Some(l) if l >= 0 => remaining.min(l),
                    _ => remaining,
                };
                Ok(())
            });
            let mut scard = redis::cmd("SCARD");
            scard.arg(keys::all_ids(self.inner.type_name));
            tx.command(scard, Some(handler));
            return Ok(());
        }

        let (ids_key, temp_keys) = self.inner.queue_seed_and_filters(tx)?;
        let count_key = keys::tmp("count");
        let mut sort_store = redis::cmd("SORT");
        sort_store.arg(&ids_key).arg("BY").arg("nosort");
        if let Some((_, true)) = &self.inner.order {
            sort_store.arg("DESC");
        }
        if self.inner.offset.is_some() || self.inner.limit.is_some() {
            sort_store
                .arg("LIMIT")
                .arg(self.inner.offset.unwrap_or(0))
                .arg(self.inner.limit.unwrap_or(-1));
        }
        sort_store.arg("STORE").arg(&count_key);
        tx.command(sort_store, None);

        let handler: Handler = Box::new(move |value: &Value| {
            let mut count = 0i64;
            reply::scan_int(value, &mut count)?;
            *dest.lock() = count;
            Ok(())
        });
        let mut llen = redis::cmd("LLEN");
        llen.arg(&count_key);
        tx.command(llen, Some(handler));

        let mut del_count = redis::cmd("DEL");
        del_count.arg(&count_key);
        tx.command(del_count, None);
        self.inner.queue_cleanup(tx, &temp_keys);
        Ok(())
    }

    /// Queue `IDs`' plan onto `tx`. `dest` is replaced once `tx` executes.
    pub fn ids(&self, tx: &mut Transaction<'c>, dest: Arc<Mutex<Vec<String>>>) -> Result<()> {
        if let Some(err) = self.inner.error.clone() {
            return Err(Error::Query(err));
        }
        let (ids_key, temp_keys) = self.inner.queue_seed_and_filters(tx)?;
        let mut sort_cmd = redis::cmd("SORT");
        sort_cmd.arg(&ids_key).arg("BY").arg("nosort");
        if let Some((_, true)) = &self.inner.order {
            sort_cmd.arg("DESC");
        }
        if self.inner.offset.is_some() || self.inner.limit.is_some() {
            sort_cmd
                .arg("LIMIT")
                .arg(self.inner.offset.unwrap_or(0))
                .arg(self.inner.limit.unwrap_or(-1));
        }
        let handler: Handler = Box::new(move |value: &Value| {
            let mut ids = Vec::new();
            reply::scan_strings(value, &mut ids)?;
            *dest.lock() = ids;
            Ok(())
        });
        tx.command(sort_cmd, Some(handler));
        self.inner.queue_cleanup(tx, &temp_keys);
        Ok(())
    }

    /// Queue `StoreIDs`' plan onto `tx`.
    pub fn store_ids(&self, tx: &mut Transaction<'c>, dest_key: String) -> Result<()> {
        if let Some(err) = self.inner.error.clone() {
            return Err(Error::Query(err));
        }
        let (ids_key, temp_keys) = self.inner.queue_seed_and_filters(tx)?;
        let mut sort_cmd = redis::cmd("SORT");
        sort_cmd.arg(&ids_key).arg("BY").arg("nosort");
        if let Some((_, true)) = &self.inner.order {
            sort_cmd.arg("DESC");
        }
        if self.inner.offset.is_some() || self.inner.limit.is_some() {
            sort_cmd
                .arg("LIMIT")
                .arg(self.inner.offset.unwrap_or(0))
                .arg(self.inner.limit.unwrap_or(-1));
        }
        sort_cmd.arg("STORE").arg(&dest_key);
        tx.command(sort_cmd, None);
        self.inner.queue_cleanup(tx, &temp_keys);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_equality_bounds_are_a_single_point() {
        let bounds = numeric_bounds(Op::Eq, 42.0);
        assert_eq!(bounds, vec![(b"42".to_vec(), b"42".to_vec())]);
    }

    #[test]
    fn numeric_not_equal_is_two_part() {
        let bounds = numeric_bounds(Op::Ne, 5.0);
        assert_eq!(
            bounds,
            vec![
                (b"(5".to_vec(), b"+inf".to_vec()),
                (b"-inf".to_vec(), b"(5".to_vec()),
            ]
        );
    }

    #[test]
    fn string_equality_bounds_bracket_the_nul_del_window() {
        let bounds = string_bounds(Op::Eq, b"alice");
        assert_eq!(bounds.len(), 1);
        let (min, max) = &bounds[0];
        assert_eq!(min, &[b"[alice".as_slice(), &[index::NUL]].concat());
        assert_eq!(max, &[b"(alice".as_slice(), &[index::DEL]].concat());
    }

    #[test]
    fn string_less_than_excludes_the_equality_block() {
        let bounds = string_bounds(Op::Lt, b"m");
        assert_eq!(bounds, vec![(b"-".to_vec(), b"(m".to_vec())]);
    }

    #[test]
    fn parse_op_rejects_unknown_operators() {
        assert!(parse_op("~=").is_err());
        assert!(matches!(parse_op("="), Ok(Op::Eq)));
    }
}
