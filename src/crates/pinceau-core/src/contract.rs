//! Task data contracts
//!
//! A [`TaskDataContract`] is an ordered map from data key to [`KeyContract`]. Tasks
//! declare one contract for what they need and one for what they produce; the DAG
//! walks the graph combining them to find which keys a caller must supply.
//!
//! # Algebra
//!
//! - [`add`](TaskDataContract::add) inserts a key, or merges it into the existing
//!   entry when the two are compatible. The merged entry is optional only when
//!   both sides are optional.
//! - [`add_all`](TaskDataContract::add_all) adds every key of another contract and
//!   stops at the first incompatibility.
//! - [`subtract_all`](TaskDataContract::subtract_all) removes the keys another
//!   contract provides. An incompatible provider aborts the subtraction.
//!
//! Both bulk operations return `false` on a conflict. Callers treat that as a
//! wiring error, never as partial success.
//!
//! # Compatibility
//!
//! Two entries for one key have the same shape when their types are equal or
//! subtype-related and their multiplicity matches. Merging only needs the same
//! shape. Subtraction also needs monotonic optionality: an optional provider
//! cannot satisfy a required slot.
//!
//! ```rust
//! use pinceau_core::contract::{KeyContract, TaskDataContract, ValueType};
//!
//! let mut needed = TaskDataContract::new()
//!     .with("x", KeyContract::new(ValueType::Integer))
//!     .with("y", KeyContract::new(ValueType::String));
//! let upstream = TaskDataContract::new().with("x", KeyContract::new(ValueType::Integer));
//!
//! assert!(needed.subtract_all(&upstream));
//! assert_eq!(needed.keys().collect::<Vec<_>>(), vec!["y"]);
//! ```

use std::fmt;

use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};

use crate::types::TaskData;

/// Declared type of a data key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Any,
    Bool,
    Integer,
    Float,
    Number,
    String,
    Array,
    Object,
    /// Application-defined object type
    Named(String),
}

impl ValueType {
    /// Reflexive subtype relation.
    pub fn is_subtype_of(&self, other: &ValueType) -> bool {
        if self == other {
            return true;
        }
        match (self, other) {
            (_, ValueType::Any) => true,
            (ValueType::Integer | ValueType::Float, ValueType::Number) => true,
            (ValueType::Named(_), ValueType::Object) => true,
            _ => false,
        }
    }

    /// Equal or subtype-related in either direction.
    pub fn is_related(&self, other: &ValueType) -> bool {
        self.is_subtype_of(other) || other.is_subtype_of(self)
    }

    /// The more specific of two related types.
    fn narrowest(&self, other: &ValueType) -> ValueType {
        if self.is_subtype_of(other) {
            self.clone()
        } else {
            other.clone()
        }
    }

    /// Whether a JSON value inhabits this type.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::Bool => value.is_boolean(),
            ValueType::Integer => value.is_i64() || value.is_u64(),
            ValueType::Float => value.is_f64(),
            ValueType::Number => value.is_number(),
            ValueType::String => value.is_string(),
            ValueType::Array => value.is_array(),
            ValueType::Object | ValueType::Named(_) => value.is_object(),
        }
    }

    /// Widget family used by form renderers.
    pub fn field_kind(&self) -> &'static str {
        match self {
            ValueType::Any => "any",
            ValueType::Bool => "boolean",
            ValueType::Integer => "integer",
            ValueType::Float | ValueType::Number => "number",
            ValueType::String => "text",
            ValueType::Array => "list",
            ValueType::Object => "object",
            ValueType::Named(_) => "model",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValueType::Named(name) => f.write_str(name),
            other => f.write_str(other.field_kind()),
        }
    }
}

/// Display metadata attached to a key. Opaque to the scheduler.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UiMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl UiMeta {
    pub fn is_empty(&self) -> bool {
        self.label.is_none() && self.help.is_none() && self.extra.is_empty()
    }
}

/// Contract for a single key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyContract {
    #[serde(rename = "type")]
    pub value_type: ValueType,
    #[serde(default)]
    pub optional: bool,
    #[serde(default)]
    pub multiple: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(default, skip_serializing_if = "UiMeta::is_empty")]
    pub ui: UiMeta,
}

impl KeyContract {
    /// A required, single-valued key.
    pub fn new(value_type: ValueType) -> Self {
        Self {
            value_type,
            optional: false,
            multiple: false,
            default: None,
            ui: UiMeta::default(),
        }
    }

    pub fn optional(mut self) -> Self {
        self.optional = true;
        self
    }

    pub fn multiple(mut self) -> Self {
        self.multiple = true;
        self
    }

    pub fn with_default(mut self, value: Value) -> Self {
        self.default = Some(value);
        self
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.ui.label = Some(label.into());
        self
    }

    /// Same shape: related types and equal multiplicity.
    pub fn has_same_shape(&self, other: &KeyContract) -> bool {
        self.value_type.is_related(&other.value_type) && self.multiple == other.multiple
    }

    /// Whether this entry, as a provider, satisfies `other`. An optional provider
    /// never satisfies a required slot.
    pub fn is_compatible(&self, other: &KeyContract) -> bool {
        self.has_same_shape(other) && !(self.optional && !other.optional)
    }

    /// Merge `other` into this entry. Leaves it untouched and returns `false` when
    /// the shapes differ.
    pub fn update(&mut self, other: &KeyContract) -> bool {
        if !self.has_same_shape(other) {
            return false;
        }
        self.value_type = self.value_type.narrowest(&other.value_type);
        self.optional = self.optional && other.optional;
        if other.default.is_some() {
            self.default.clone_from(&other.default);
        }
        true
    }

    /// Whether a concrete value satisfies this entry.
    pub fn is_matched_by(&self, value: &Value) -> bool {
        if self.multiple {
            value
                .as_array()
                .is_some_and(|items| items.iter().all(|item| self.value_type.matches(item)))
        } else {
            self.value_type.matches(value)
        }
    }

    /// A caller must supply this key.
    pub fn is_mandatory(&self) -> bool {
        !self.optional && self.default.is_none()
    }

    fn descriptor(&self, key: &str) -> FieldDescriptor {
        FieldDescriptor {
            kind: self.value_type.field_kind().to_string(),
            model: match &self.value_type {
                ValueType::Named(name) => Some(name.clone()),
                _ => None,
            },
            label: self.ui.label.clone().unwrap_or_else(|| humanize(key)),
            help: self.ui.help.clone(),
            optional: self.optional,
            multiple: self.multiple,
            default_value: self.default.clone(),
            extra: self.ui.extra.clone(),
        }
    }
}

/// Form field projected from a [`KeyContract`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDescriptor {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    pub label: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub help: Option<String>,
    pub optional: bool,
    pub multiple: bool,
    #[serde(rename = "defaultValue", skip_serializing_if = "Option::is_none")]
    pub default_value: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn humanize(key: &str) -> String {
    let spaced = key.replace('_', " ");
    let mut chars = spaced.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars).collect(),
        None => String::new(),
    }
}

/// Ordered map from key to [`KeyContract`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TaskDataContract {
    entries: Vec<(String, KeyContract)>,
}

impl TaskDataContract {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert. Replaces an existing entry for `key`.
    pub fn with(mut self, key: impl Into<String>, contract: KeyContract) -> Self {
        let key = key.into();
        match self.position(&key) {
            Some(i) => self.entries[i].1 = contract,
            None => self.entries.push((key, contract)),
        }
        self
    }

    fn position(&self, key: &str) -> Option<usize> {
        self.entries.iter().position(|(k, _)| k == key)
    }

    pub fn get(&self, key: &str) -> Option<&KeyContract> {
        self.position(key).map(|i| &self.entries[i].1)
    }

    pub fn contains_key(&self, key: &str) -> bool {
        self.position(key).is_some()
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(k, _)| k.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &KeyContract)> {
        self.entries.iter().map(|(k, c)| (k.as_str(), c))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn remove(&mut self, key: &str) -> Option<KeyContract> {
        self.position(key).map(|i| self.entries.remove(i).1)
    }

    /// Insert `key`, or merge into the existing entry. `false` when incompatible.
    pub fn add(&mut self, key: impl Into<String>, contract: KeyContract) -> bool {
        let key = key.into();
        match self.position(&key) {
            Some(i) => self.entries[i].1.update(&contract),
            None => {
                self.entries.push((key, contract));
                true
            }
        }
    }

    /// [`add`](Self::add) every entry of `other`, stopping at the first conflict.
    pub fn add_all(&mut self, other: &TaskDataContract) -> bool {
        for (key, contract) in &other.entries {
            if !self.add(key.clone(), contract.clone()) {
                return false;
            }
        }
        true
    }

    /// Remove every key `other` provides. Stops at the first provider whose entry
    /// cannot satisfy the local one and returns `false`.
    pub fn subtract_all(&mut self, other: &TaskDataContract) -> bool {
        for (key, provided) in &other.entries {
            let Some(i) = self.position(key) else {
                continue;
            };
            if !provided.is_compatible(&self.entries[i].1) {
                return false;
            }
            self.entries.remove(i);
        }
        true
    }

    /// Keys present on both sides whose entries cannot be merged.
    pub fn conflicts(&self, other: &TaskDataContract) -> Vec<String> {
        other
            .entries
            .iter()
            .filter(|(key, contract)| {
                self.get(key)
                    .is_some_and(|local| !local.has_same_shape(contract))
            })
            .map(|(key, _)| key.clone())
            .collect()
    }

    /// Problems with `data` as an input: missing mandatory keys and values of the
    /// wrong type.
    pub fn unmet(&self, data: &TaskData) -> Vec<String> {
        let mut problems = Vec::new();
        for (key, contract) in &self.entries {
            match data.get(key) {
                None | Some(Value::Null) if contract.is_mandatory() => {
                    problems.push(format!("missing key '{key}'"));
                }
                Some(value) if !value.is_null() && !contract.is_matched_by(value) => {
                    problems.push(format!(
                        "key '{key}' expects {}{}",
                        contract.value_type,
                        if contract.multiple { " list" } else { "" }
                    ));
                }
                _ => {}
            }
        }
        problems
    }

    /// Form-oriented projection, in key order.
    pub fn fields_map(&self) -> Vec<(String, FieldDescriptor)> {
        self.entries
            .iter()
            .map(|(key, contract)| (key.clone(), contract.descriptor(key)))
            .collect()
    }
}

impl FromIterator<(String, KeyContract)> for TaskDataContract {
    fn from_iter<I: IntoIterator<Item = (String, KeyContract)>>(iter: I) -> Self {
        iter.into_iter()
            .fold(Self::new(), |contract, (key, entry)| contract.with(key, entry))
    }
}

impl fmt::Display for TaskDataContract {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (key, contract)) in self.entries.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{key}: ")?;
            if contract.optional {
                write!(f, "Optional[")?;
            }
            if contract.multiple {
                write!(f, "List[{}]", contract.value_type)?;
            } else {
                write!(f, "{}", contract.value_type)?;
            }
            if contract.optional {
                write!(f, "]")?;
            }
        }
        f.write_str("}")
    }
}

impl Serialize for TaskDataContract {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (key, contract) in &self.entries {
            map.serialize_entry(key, contract)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for TaskDataContract {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct ContractVisitor;

        impl<'de> Visitor<'de> for ContractVisitor {
            type Value = TaskDataContract;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a map of key contracts")
            }

            fn visit_map<A: MapAccess<'de>>(self, mut access: A) -> std::result::Result<Self::Value, A::Error> {
                let mut contract = TaskDataContract::new();
                while let Some((key, entry)) = access.next_entry::<String, KeyContract>()? {
                    contract = contract.with(key, entry);
                }
                Ok(contract)
            }
        }

        deserializer.deserialize_map(ContractVisitor)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn int() -> KeyContract {
        KeyContract::new(ValueType::Integer)
    }

    #[test]
    fn test_add_merges_optionality() {
        let mut contract = TaskDataContract::new().with("x", int());
        assert!(contract.add("x", int().optional()));
        assert!(!contract.get("x").unwrap().optional);

        let mut both = TaskDataContract::new().with("x", int().optional());
        assert!(both.add("x", int().optional()));
        assert!(both.get("x").unwrap().optional);

        let mut tightened = TaskDataContract::new().with("x", int().optional());
        assert!(tightened.add("x", int()));
        assert!(!tightened.get("x").unwrap().optional);
    }

    #[test]
    fn test_add_rejects_unrelated_types() {
        let mut contract = TaskDataContract::new().with("x", int());
        let before = contract.clone();
        assert!(!contract.add("x", KeyContract::new(ValueType::String)));
        assert_eq!(contract, before);
    }

    #[test]
    fn test_add_narrows_to_subtype() {
        let mut contract = TaskDataContract::new().with("n", KeyContract::new(ValueType::Number));
        assert!(contract.add("n", int()));
        assert_eq!(contract.get("n").unwrap().value_type, ValueType::Integer);
    }

    #[test]
    fn test_subtract_blocks_on_optional_provider() {
        let mut required = TaskDataContract::new().with("x", int());
        let provider = TaskDataContract::new().with("x", int().optional());
        assert!(!required.subtract_all(&provider));
        assert!(required.contains_key("x"));
    }

    #[test]
    fn test_subtract_ignores_absent_keys() {
        let mut required = TaskDataContract::new().with("x", int());
        let provider = TaskDataContract::new().with("z", KeyContract::new(ValueType::String));
        assert!(required.subtract_all(&provider));
        assert_eq!(required.len(), 1);
    }

    #[test]
    fn test_multiplicity_must_match() {
        assert!(!int().is_compatible(&int().multiple()));
    }

    #[test]
    fn test_unmet_reports_missing_and_mistyped() {
        let contract = TaskDataContract::new()
            .with("x", int())
            .with("y", KeyContract::new(ValueType::String))
            .with("z", int().with_default(json!(3)))
            .with("tags", KeyContract::new(ValueType::String).multiple());
        let data = json!({"y": 4, "tags": ["a", "b"]}).as_object().cloned().unwrap();
        assert_eq!(
            contract.unmet(&data),
            vec!["missing key 'x'".to_string(), "key 'y' expects text".to_string()]
        );
    }

    #[test]
    fn test_fields_map_keeps_order_and_labels() {
        let contract = TaskDataContract::new()
            .with("search_query", KeyContract::new(ValueType::String))
            .with("limit", int().optional().with_label("Max results"));
        let fields = contract.fields_map();
        assert_eq!(fields[0].0, "search_query");
        assert_eq!(fields[0].1.label, "Search query");
        assert_eq!(fields[0].1.kind, "text");
        assert_eq!(fields[1].1.label, "Max results");
        assert!(fields[1].1.optional);
    }

    #[test]
    fn test_serde_preserves_key_order() {
        let contract = TaskDataContract::new()
            .with("zeta", int())
            .with("alpha", KeyContract::new(ValueType::Named("Document".into())).multiple());
        let text = serde_json::to_string(&contract).unwrap();
        assert!(text.find("zeta").unwrap() < text.find("alpha").unwrap());
        let back: TaskDataContract = serde_json::from_str(&text).unwrap();
        assert_eq!(back, contract);
    }

    #[test]
    fn test_display() {
        let contract = TaskDataContract::new()
            .with("x", int())
            .with("y", KeyContract::new(ValueType::String).optional().multiple());
        assert_eq!(contract.to_string(), "{x: integer, y: Optional[List[text]]}");
    }
}
