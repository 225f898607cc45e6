//! information.rs
//! Ordered key/value metadata attached to ports and algorithms.

use crate::node::NodeTypeId;
use crate::value::{FromValue, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Information {
    entries: BTreeMap<String, Value>,
}

impl Information {
    pub fn new() -> Self { Self::default() }

    /// Value stored under `key`, or `default` when the key is absent.
    pub fn value_or(&self, key: &str, default: Value) -> Value {
        self.entries.get(key).cloned().unwrap_or(default)
    }

    pub fn value(&self, key: &str) -> Value { self.value_or(key, Value::Invalid) }

    pub fn contains(&self, key: &str) -> bool { self.entries.contains_key(key) }

    /// Upsert. Returns `false` without touching the map when the stored
    /// value already equals `value`.
    pub fn set_value(&mut self, key: &str, value: Value) -> bool {
        match self.entries.get_mut(key) {
            Some(current) if *current == value => false,
            Some(current) => {
                *current = value;
                true
            }
            None => {
                self.entries.insert(key.to_string(), value);
                true
            }
        }
    }

    pub fn add(&mut self, key: &str, value: Value) -> bool { self.set_value(key, value) }

    pub fn remove(&mut self, key: &str) -> bool { self.entries.remove(key).is_some() }

    pub fn clear(&mut self) { self.entries.clear(); }
    pub fn is_empty(&self) -> bool { self.entries.is_empty() }
    pub fn len(&self) -> usize { self.entries.len() }

    pub fn keys(&self) -> impl Iterator<Item = &str> { self.entries.keys().map(String::as_str) }

    /// Applies the "invalid removes" rule: returns whether the map changed.
    pub fn write(&mut self, key: &str, value: Value) -> bool {
        if value.is_valid() { self.set_value(key, value) } else { self.remove(key) }
    }

    pub fn get<K: InfoKey>(&self) -> K::Type {
        self.entries.get(K::NAME).and_then(K::Type::from_value).unwrap_or_else(K::default)
    }

    pub fn set<K: InfoKey>(&mut self, value: K::Type) -> bool {
        self.write(K::NAME, value.into())
    }

    pub fn unset<K: InfoKey>(&mut self) -> bool { self.remove(K::NAME) }
}

/// A typed, named information entry.
pub trait InfoKey {
    const NAME: &'static str;
    type Type: FromValue + Into<Value>;
    fn default() -> Self::Type;
}

/// Declares a zero-sized typed key for `Information::get`/`set`.
#[macro_export]
macro_rules! declare_info_key {
    ($(#[$meta:meta])* $key:ident, $name:literal, $ty:ty, $default:expr) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy)]
        pub struct $key;

        impl $crate::information::InfoKey for $key {
            const NAME: &'static str = $name;
            type Type = $ty;
            fn default() -> $ty { $default }
        }
    };
}

// Request flags
declare_info_key!(CreateOutputData, "CREATE_OUTPUT_DATA", bool, false);
declare_info_key!(CheckInputConsistency, "CHECK_INPUT_CONSISTENCY", bool, false);
declare_info_key!(UpdateOutputData, "UPDATE_OUTPUT_DATA", bool, false);

// Algorithm-level
declare_info_key!(
    /// When set, the default batch hook dispatches one call per slice.
    ManageInputDataPerSlice, "MANAGE_INPUT_DATA_PER_SLICE", bool, true
);

// Port-level
declare_info_key!(InformationFilled, "INFORMATION_FILLED", bool, false);
declare_info_key!(InputIsOptional, "INPUT_IS_OPTIONAL", bool, false);
declare_info_key!(InputIsRepeatable, "INPUT_IS_REPEATABLE", bool, false);
declare_info_key!(InputDataRequiredTypeid, "INPUT_DATA_REQUIRED_TYPEID", NodeTypeId, NodeTypeId::NODE);
declare_info_key!(InputDataPossiblyMultinode, "INPUT_DATA_POSSIBLY_MULTINODE", bool, false);
declare_info_key!(OutputDataTypeid, "OUTPUT_DATA_TYPEID", NodeTypeId, NodeTypeId::NODE);
declare_info_key!(OutputDataCreated, "OUTPUT_DATA_CREATED", bool, false);

impl Information {
    /// Request carrying the given phase flags.
    pub fn request(create: bool, check: bool, update: bool) -> Self {
        let mut info = Self::new();
        if create { info.set::<CreateOutputData>(true); }
        if check { info.set::<CheckInputConsistency>(true); }
        if update { info.set::<UpdateOutputData>(true); }
        info
    }
}
