//! Row schemas and the generic record value they describe.
//!
//! A `Schema` is an ordered list of typed fields; `RecordValue` is the tree a
//! flat row dict is mapped onto. Defaults are constructed explicitly and
//! immutably per field, never shared.

use indexmap::IndexMap;

#[derive(Debug, Clone)]
pub struct Schema {
    pub fields: Vec<FieldDef>,
}

#[derive(Debug, Clone)]
pub struct FieldDef {
    pub name: String,
    pub kind: FieldKind,
}

#[derive(Debug, Clone)]
pub enum FieldKind {
    /// Scalar string field with its declared default.
    Scalar { default: String },
    /// Ordered list; default is empty.
    List(Box<FieldKind>),
    /// Nested sub-schema; headers addressing it recurse.
    Record(Schema),
}

impl Schema {
    pub fn new(fields: Vec<(&str, FieldKind)>) -> Self {
        Schema {
            fields: fields
                .into_iter()
                .map(|(name, kind)| FieldDef {
                    name: name.to_string(),
                    kind,
                })
                .collect(),
        }
    }

    pub fn field(&self, name: &str) -> Option<&FieldDef> {
        self.fields.iter().find(|f| f.name == name)
    }

    /// A record with every field at its declared default.
    pub fn default_record(&self) -> RecordValue {
        let mut map = IndexMap::new();
        for f in &self.fields {
            map.insert(f.name.clone(), f.kind.default_value());
        }
        RecordValue::Record(map)
    }
}

impl FieldKind {
    pub fn scalar(default: &str) -> Self {
        FieldKind::Scalar {
            default: default.to_string(),
        }
    }

    pub fn list(elem: FieldKind) -> Self {
        FieldKind::List(Box::new(elem))
    }

    pub fn default_value(&self) -> RecordValue {
        match self {
            FieldKind::Scalar { default } => RecordValue::Str(default.clone()),
            FieldKind::List(_) => RecordValue::List(vec![]),
            FieldKind::Record(schema) => schema.default_record(),
        }
    }
}

/// The mapped form of one row: a tree of strings, lists, and records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordValue {
    Str(String),
    List(Vec<RecordValue>),
    Record(IndexMap<String, RecordValue>),
}

impl RecordValue {
    pub fn as_str(&self) -> &str {
        match self {
            RecordValue::Str(s) => s,
            _ => "",
        }
    }

    pub fn get(&self, field: &str) -> Option<&RecordValue> {
        match self {
            RecordValue::Record(map) => map.get(field),
            _ => None,
        }
    }

    pub fn items(&self) -> &[RecordValue] {
        match self {
            RecordValue::List(items) => items,
            _ => &[],
        }
    }
}
