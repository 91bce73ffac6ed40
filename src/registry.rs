//! The specification registry: tracks every record type registered against a pool,
//! keeping a name → type and type → name mapping in bijection.
//!
//! Guarded by one `parking_lot::RwLock` (the lock style used for registry-shaped
//! shared state elsewhere in the retrieved example pack) rather than two separate
//! locks, so the two maps can never desync under concurrent registration.

use std::any::TypeId;
use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::codec::Marshaller;
use crate::collection::Collection;
use crate::error::{Error, Result};
use crate::pool::RedisPool;
use crate::record::{FieldSpec, Record};

struct Specification {
    type_name: &'static str,
    fields: &'static [FieldSpec],
    type_id: TypeId,
    /// The `Marshaller` this type was registered with. Every later `collection()`/
    /// `collection_for_name()` call for this type must use the same one — see
    /// [`Specification::check_marshaller`].
    marshaller_type_id: TypeId,
    marshaller_type_name: &'static str,
}

impl Specification {
    fn check_marshaller<M: Marshaller>(&self) -> Result<()> {
        if self.marshaller_type_id == TypeId::of::<M>() {
            return Ok(());
        }
        Err(Error::MarshallerMismatch {
            type_name: self.type_name.to_string(),
            registered: self.marshaller_type_name,
            requested: std::any::type_name::<M>(),
        })
    }
}

#[derive(Default)]
struct RegistryInner {
    by_name: HashMap<String, Specification>,
    by_type: HashMap<TypeId, String>,
}

impl RegistryInner {
    fn register<M: Marshaller>(
        &mut self,
        declared_name: String,
        type_name: &'static str,
        fields: &'static [FieldSpec],
        type_id: TypeId,
    ) -> Result<String> {
        if self.by_name.contains_key(&declared_name) {
            return Err(Error::NameAlreadyRegistered(declared_name));
        }
        if let Some(existing) = self.by_type.get(&type_id) {
            return Err(Error::TypeAlreadyRegistered(existing.clone()));
        }
        self.by_type.insert(type_id, declared_name.clone());
        self.by_name.insert(
            declared_name.clone(),
            Specification {
                type_name,
                fields,
                type_id,
                marshaller_type_id: TypeId::of::<M>(),
                marshaller_type_name: std::any::type_name::<M>(),
            },
        );
        Ok(declared_name)
    }
}

/// Registers record types and hands back [`Collection`] facades bound to them.
/// Registration happens at startup and is read-mostly afterward.
pub struct Registry {
    pool: Arc<RedisPool>,
    inner: RwLock<RegistryInner>,
}

impl Registry {
    pub fn new(pool: Arc<RedisPool>) -> Self {
        Registry {
            pool,
            inner: RwLock::new(RegistryInner::default()),
        }
    }

    /// Register `T` under `name`, defaulting to `T::type_name()`, fixing `marshaller`
    /// as the one every later [`Self::collection`]/[`Self::collection_for_name`] call
    /// for this type must use — the Specification carries one fallback marshaller for
    /// its lifetime, not a choice made fresh per call. Each `(type, name)` pair may be
    /// registered at most once in either direction.
    pub fn register<T: Record, M: Marshaller>(
        &self,
        name: Option<&str>,
        marshaller: M,
    ) -> Result<Collection<T, M>> {
        let declared_name = name.unwrap_or_else(T::type_name).to_string();
        let declared_name = self.inner.write().register::<M>(
            declared_name,
            T::type_name(),
            T::fields(),
            TypeId::of::<T>(),
        )?;
        Ok(Collection::new(self.pool.clone(), declared_name, marshaller))
    }

    pub fn is_registered<T: Record>(&self) -> bool {
        self.inner.read().by_type.contains_key(&TypeId::of::<T>())
    }

    /// Field table registered under `name`, regardless of which type it belongs to.
    pub fn fields_for_name(&self, name: &str) -> Result<&'static [FieldSpec]> {
        self.inner
            .read()
            .by_name
            .get(name)
            .map(|spec| spec.fields)
            .ok_or_else(|| Error::UnknownName(name.to_string()))
    }

    /// A [`Collection`] for `T` under the name it was registered with. `M` must match
    /// the marshaller `T` was registered with, or every `Inconvertible` field risks
    /// being decoded by the wrong codec.
    pub fn collection<T: Record, M: Marshaller>(&self, marshaller: M) -> Result<Collection<T, M>> {
        let inner = self.inner.read();
        let name = inner
            .by_type
            .get(&TypeId::of::<T>())
            .ok_or_else(|| Error::UnknownType(T::type_name().to_string()))?
            .clone();
        inner
            .by_name
            .get(&name)
            .expect("by_type and by_name stay in bijection")
            .check_marshaller::<M>()?;
        drop(inner);
        Ok(Collection::new(self.pool.clone(), name, marshaller))
    }

    /// A [`Collection`] for `T` looked up by its registered name. Fails if `name` is
    /// unregistered, registered to a different type, or was registered with a
    /// different marshaller than `M`.
    pub fn collection_for_name<T: Record, M: Marshaller>(
        &self,
        name: &str,
        marshaller: M,
    ) -> Result<Collection<T, M>> {
        let inner = self.inner.read();
        let spec = inner
            .by_name
            .get(name)
            .ok_or_else(|| Error::UnknownName(name.to_string()))?;
        if spec.type_id != TypeId::of::<T>() {
            return Err(Error::invalid_model_type(spec.type_name, T::type_name()));
        }
        spec.check_marshaller::<M>()?;
        Ok(Collection::new(self.pool.clone(), name.to_string(), marshaller))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn type_id_a() -> TypeId {
        struct A;
        TypeId::of::<A>()
    }

    fn type_id_b() -> TypeId {
        struct B;
        TypeId::of::<B>()
    }

    #[test]
    fn registers_a_new_name_and_type() {
        let mut inner = RegistryInner::default();
        let name = inner
            .register::<crate::codec::JsonMarshaller>("Widget".to_string(), "Widget", &[], type_id_a())
            .unwrap();
        assert_eq!(name, "Widget");
        assert!(inner.by_name.contains_key("Widget"));
        assert_eq!(inner.by_type.get(&type_id_a()), Some(&"Widget".to_string()));
    }

    #[test]
    fn rejects_duplicate_name() {
        let mut inner = RegistryInner::default();
        inner
            .register::<crate::codec::JsonMarshaller>("Widget".to_string(), "Widget", &[], type_id_a())
            .unwrap();
        let err = inner
            .register::<crate::codec::JsonMarshaller>("Widget".to_string(), "Gadget", &[], type_id_b())
            .unwrap_err();
        assert!(matches!(err, Error::NameAlreadyRegistered(_)));
    }

    #[test]
    fn rejects_duplicate_type_under_a_new_name() {
        let mut inner = RegistryInner::default();
        inner
            .register::<crate::codec::JsonMarshaller>("Widget".to_string(), "Widget", &[], type_id_a())
            .unwrap();
        let err = inner
            .register::<crate::codec::JsonMarshaller>("OtherWidget".to_string(), "Widget", &[], type_id_a())
            .unwrap_err();
        assert!(matches!(err, Error::TypeAlreadyRegistered(_)));
    }
}
