//! Entity identity keys.
//!
//! An [`EntityKey`] identifies one row within one unit of work: the entity
//! type plus a hash of its primary-key values. The full key values stay with
//! the identity-map entry; the key itself is `Copy` and cheap to pass around
//! as a map key.

use crate::entity::Entity;
use crate::error::{IdentityError, IdentityErrorKind, Result};
use crate::value::Value;
use std::any::TypeId;
use std::hash::{Hash, Hasher};

/// Identity of a managed instance: entity type + primary key hash.
///
/// Unique within a unit of work. Two instances of different entity types
/// never collide even with equal primary keys, because the `TypeId`
/// participates in equality.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EntityKey {
    type_id: TypeId,
    key_hash: u64,
}

impl EntityKey {
    /// Build a key for an entity type from primary-key values.
    #[must_use]
    pub fn of<T: Entity>(key_values: &[Value]) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            key_hash: hash_values(key_values),
        }
    }

    /// Build a key from a live instance, rejecting instances without a
    /// usable primary key.
    pub fn from_entity<T: Entity>(entity: &T) -> Result<Self> {
        let values = entity.key_values();
        if values.is_empty() || values.iter().all(Value::is_null) {
            return Err(IdentityError::new(
                IdentityErrorKind::MissingKey,
                std::any::type_name::<T>(),
                "primary key is empty or all NULL",
            )
            .into());
        }
        Ok(Self::of::<T>(&values))
    }

    /// Build a key from a raw type id and already-hashed key values.
    ///
    /// Used by type-erased handles that cannot name `T`.
    #[must_use]
    pub fn from_parts(type_id: TypeId, key_values: &[Value]) -> Self {
        Self {
            type_id,
            key_hash: hash_values(key_values),
        }
    }

    /// The entity type component.
    #[must_use]
    pub const fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The primary-key hash component.
    #[must_use]
    pub const fn key_hash(&self) -> u64 {
        self.key_hash
    }

    /// Check whether this key belongs to entity type `T`.
    #[must_use]
    pub fn is_type<T: Entity>(&self) -> bool {
        self.type_id == TypeId::of::<T>()
    }
}

/// Hash a slice of key values into a single u64.
///
/// Each value is hashed with a variant tag so that, for example,
/// `Int(1)` and `Text("1")` produce different hashes.
#[must_use]
pub fn hash_values(values: &[Value]) -> u64 {
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    values.len().hash(&mut hasher);
    for value in values {
        hash_value(&mut hasher, value);
    }
    hasher.finish()
}

fn hash_value<H: Hasher>(hasher: &mut H, value: &Value) {
    match value {
        Value::Null => 0u8.hash(hasher),
        Value::Bool(v) => {
            1u8.hash(hasher);
            v.hash(hasher);
        }
        Value::Int(v) => {
            2u8.hash(hasher);
            v.hash(hasher);
        }
        Value::BigInt(v) => {
            3u8.hash(hasher);
            v.hash(hasher);
        }
        Value::Double(v) => {
            4u8.hash(hasher);
            v.to_bits().hash(hasher);
        }
        Value::Decimal(v) => {
            5u8.hash(hasher);
            v.hash(hasher);
        }
        Value::Text(v) => {
            6u8.hash(hasher);
            v.hash(hasher);
        }
        Value::Bytes(v) => {
            7u8.hash(hasher);
            v.hash(hasher);
        }
        Value::Date(v) => {
            8u8.hash(hasher);
            v.hash(hasher);
        }
        Value::Timestamp(v) => {
            9u8.hash(hasher);
            v.hash(hasher);
        }
        Value::Uuid(v) => {
            10u8.hash(hasher);
            v.hash(hasher);
        }
        Value::Json(v) => {
            11u8.hash(hasher);
            v.to_string().hash(hasher);
        }
    }
}

/// Render key values for error messages and logs.
#[must_use]
pub fn display_key(values: &[Value]) -> String {
    let parts: Vec<String> = values
        .iter()
        .map(|v| match v {
            Value::Null => "NULL".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Int(i) => i.to_string(),
            Value::BigInt(i) => i.to_string(),
            Value::Double(d) => d.to_string(),
            Value::Decimal(s) | Value::Text(s) => s.clone(),
            Value::Bytes(b) => format!("<{} bytes>", b.len()),
            Value::Date(d) => format!("date:{d}"),
            Value::Timestamp(t) => format!("ts:{t}"),
            Value::Uuid(u) => u
                .iter()
                .map(|b| format!("{b:02x}"))
                .collect::<String>(),
            Value::Json(j) => j.to_string(),
        })
        .collect();
    if parts.len() == 1 {
        parts.into_iter().next().unwrap_or_default()
    } else {
        format!("({})", parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::column::ColumnInfo;
    use crate::error::Error;
    use crate::row::Row;

    struct Book {
        id: i64,
    }

    struct Shelf {
        id: i64,
    }

    impl Entity for Book {
        const TABLE: &'static str = "books";
        const KEY: &'static [&'static str] = &["id"];

        fn columns() -> &'static [ColumnInfo] {
            static COLUMNS: [ColumnInfo; 1] = [ColumnInfo::new("id").primary_key()];
            &COLUMNS
        }

        fn state(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::BigInt(self.id))]
        }

        fn key_values(&self) -> Vec<Value> {
            vec![Value::BigInt(self.id)]
        }

        fn is_transient(&self) -> bool {
            self.id == 0
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
            })
        }
    }

    impl Entity for Shelf {
        const TABLE: &'static str = "shelves";
        const KEY: &'static [&'static str] = &["id"];

        fn columns() -> &'static [ColumnInfo] {
            static COLUMNS: [ColumnInfo; 1] = [ColumnInfo::new("id").primary_key()];
            &COLUMNS
        }

        fn state(&self) -> Vec<(&'static str, Value)> {
            vec![("id", Value::BigInt(self.id))]
        }

        fn key_values(&self) -> Vec<Value> {
            vec![Value::BigInt(self.id)]
        }

        fn is_transient(&self) -> bool {
            self.id == 0
        }

        fn from_row(row: &Row) -> Result<Self> {
            Ok(Self {
                id: row.get_named("id")?,
            })
        }
    }

    #[test]
    fn test_same_key_same_hash() {
        let a = EntityKey::of::<Book>(&[Value::BigInt(1)]);
        let b = EntityKey::of::<Book>(&[Value::BigInt(1)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_different_types_never_collide() {
        let book = EntityKey::of::<Book>(&[Value::BigInt(1)]);
        let shelf = EntityKey::of::<Shelf>(&[Value::BigInt(1)]);
        assert_ne!(book, shelf);
        assert!(book.is_type::<Book>());
        assert!(!book.is_type::<Shelf>());
    }

    #[test]
    fn test_variant_tags_distinguish_values() {
        let int_key = EntityKey::of::<Book>(&[Value::BigInt(1)]);
        let text_key = EntityKey::of::<Book>(&[Value::Text("1".to_string())]);
        assert_ne!(int_key, text_key);
    }

    #[test]
    fn test_from_entity_rejects_null_key() {
        let book = Book { id: 7 };
        assert!(EntityKey::from_entity(&book).is_ok());

        struct NoKey;
        impl Entity for NoKey {
            const TABLE: &'static str = "nokey";
            const KEY: &'static [&'static str] = &["id"];

            fn columns() -> &'static [ColumnInfo] {
                static COLUMNS: [ColumnInfo; 1] = [ColumnInfo::new("id").primary_key()];
                &COLUMNS
            }

            fn state(&self) -> Vec<(&'static str, Value)> {
                vec![("id", Value::Null)]
            }

            fn key_values(&self) -> Vec<Value> {
                vec![Value::Null]
            }

            fn is_transient(&self) -> bool {
                true
            }

            fn from_row(_row: &Row) -> Result<Self> {
                Ok(Self)
            }
        }

        let err = EntityKey::from_entity(&NoKey).unwrap_err();
        assert!(matches!(err, Error::Identity(_)));
    }

    #[test]
    fn test_display_key_formats() {
        assert_eq!(display_key(&[Value::BigInt(42)]), "42");
        assert_eq!(
            display_key(&[Value::BigInt(1), Value::Text("a".to_string())]),
            "(1, a)"
        );
    }
}
