//! State schema compilation.
//!
//! Turns the declared `state.schema` mapping of a flow document into a
//! [`StateSchema`]: a typed record layout with default values, nested object
//! schemas, and the zero-value record used to initialize every new
//! [`StateRecord`](crate::state::StateRecord).

use miette::Diagnostic;
use serde_json::Value;
use thiserror::Error;

use crate::document::value_type_name;
use crate::state::StateRecord;

/// Closed set of field types a state schema may declare.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FieldType {
    String,
    Number,
    Boolean,
    List,
    Object,
}

impl FieldType {
    /// Parse the documented type keyword, or `None` for anything outside the
    /// closed set.
    #[must_use]
    pub fn parse(keyword: &str) -> Option<Self> {
        match keyword {
            "string" => Some(Self::String),
            "number" => Some(Self::Number),
            "boolean" => Some(Self::Boolean),
            "list" => Some(Self::List),
            "object" => Some(Self::Object),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Number => "number",
            Self::Boolean => "boolean",
            Self::List => "list",
            Self::Object => "object",
        }
    }

    /// Whether a JSON value is an acceptable instance of this type.
    #[must_use]
    pub fn accepts(self, value: &Value) -> bool {
        match self {
            Self::String => value.is_string(),
            Self::Number => value.is_number(),
            Self::Boolean => value.is_boolean(),
            Self::List => value.is_array(),
            Self::Object => value.is_object(),
        }
    }

    /// The zero value used when a field declares no default.
    #[must_use]
    pub fn zero_value(self) -> Value {
        match self {
            Self::String => Value::String(String::new()),
            Self::Number => serde_json::json!(0),
            Self::Boolean => Value::Bool(false),
            Self::List => Value::Array(Vec::new()),
            Self::Object => Value::Object(serde_json::Map::new()),
        }
    }
}

impl std::fmt::Display for FieldType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One compiled field of a state schema.
#[derive(Clone, Debug, PartialEq)]
pub struct FieldSpec {
    pub field_type: FieldType,
    /// Default value, type-checked against `field_type` at compile time.
    pub default: Value,
    /// Nested schema for `object` fields that declare one.
    pub nested: Option<StateSchema>,
}

/// Compiled layout of a workflow's state: field name → typed spec.
///
/// Immutable once compiled; shared (via `Arc`) between the graph and every
/// running instance.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StateSchema {
    fields: Vec<(String, FieldSpec)>,
}

/// Errors from compiling a `state.schema` mapping.
#[derive(Debug, Error, Diagnostic)]
pub enum SchemaError {
    /// A default value's type disagrees with the declared field type.
    #[error("invalid default for field `{field}`: declared {declared}, default is {found}")]
    #[diagnostic(
        code(harmonyspace::schema::invalid_default_type),
        help("Make the default value match the declared type, or drop it to use the zero value.")
    )]
    InvalidDefaultType {
        field: String,
        declared: FieldType,
        found: &'static str,
    },

    /// A field declares a type keyword outside the closed set.
    #[error("unknown field type `{keyword}` for field `{field}`")]
    #[diagnostic(
        code(harmonyspace::schema::unknown_field_type),
        help("Valid types: string, number, boolean, list, object.")
    )]
    UnknownFieldType { field: String, keyword: String },

    /// A field entry is not a mapping or lacks its `type` key.
    #[error("malformed schema entry for field `{field}`")]
    #[diagnostic(code(harmonyspace::schema::malformed_field))]
    MalformedField { field: String },
}

impl StateSchema {
    /// Compile a `state.schema` mapping (field name → `{type, default?,
    /// schema?}`) into a typed layout.
    ///
    /// The validator has already rejected cross-document field conflicts;
    /// this reports per-field defects: unknown type keywords, malformed
    /// entries, and `InvalidDefaultType` when a default disagrees with its
    /// declared type.
    pub fn compile(schema_map: &serde_json::Map<String, Value>) -> Result<Self, SchemaError> {
        let mut fields = Vec::with_capacity(schema_map.len());
        for (name, entry) in schema_map {
            fields.push((name.clone(), compile_field(name, entry)?));
        }
        Ok(Self { fields })
    }

    /// Merge another schema's fields into this one. Conflicting declarations
    /// were already rejected by validation, so an identical re-declaration is
    /// simply skipped.
    pub fn absorb(&mut self, other: StateSchema) {
        for (name, spec) in other.fields {
            if !self.fields.iter().any(|(existing, _)| *existing == name) {
                self.fields.push((name, spec));
            }
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldSpec> {
        self.fields
            .iter()
            .find(|(field, _)| field == name)
            .map(|(_, spec)| spec)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &FieldSpec)> {
        self.fields.iter().map(|(name, spec)| (name, spec))
    }

    /// Materialize the zero-value record every new instance starts from:
    /// declared defaults where present, type zero values otherwise, nested
    /// object schemas filled recursively.
    #[must_use]
    pub fn zero_record(&self) -> StateRecord {
        let mut record = StateRecord::default();
        for (name, spec) in &self.fields {
            record.set(name.clone(), zero_value_for(spec));
        }
        record
    }
}

fn zero_value_for(spec: &FieldSpec) -> Value {
    if !spec.default.is_null() {
        return spec.default.clone();
    }
    if let Some(nested) = &spec.nested {
        let mut object = serde_json::Map::new();
        for (name, inner) in nested.iter() {
            object.insert(name.clone(), zero_value_for(inner));
        }
        return Value::Object(object);
    }
    spec.field_type.zero_value()
}

fn compile_field(name: &str, entry: &Value) -> Result<FieldSpec, SchemaError> {
    let Some(map) = entry.as_object() else {
        return Err(SchemaError::MalformedField { field: name.into() });
    };
    let Some(keyword) = map.get("type").and_then(Value::as_str) else {
        return Err(SchemaError::MalformedField { field: name.into() });
    };
    let field_type =
        FieldType::parse(keyword).ok_or_else(|| SchemaError::UnknownFieldType {
            field: name.into(),
            keyword: keyword.into(),
        })?;

    let default = map.get("default").cloned().unwrap_or(Value::Null);
    if !default.is_null() && !field_type.accepts(&default) {
        return Err(SchemaError::InvalidDefaultType {
            field: name.into(),
            declared: field_type,
            found: value_type_name(&default),
        });
    }

    let nested = match (field_type, map.get("schema").and_then(Value::as_object)) {
        (FieldType::Object, Some(nested_map)) => {
            let nested = StateSchema::compile(nested_map).map_err(|e| nest_error(name, e))?;
            Some(nested)
        }
        _ => None,
    };

    Ok(FieldSpec {
        field_type,
        default,
        nested,
    })
}

/// Prefix nested-schema errors with the parent field name so diagnostics read
/// as full paths.
fn nest_error(parent: &str, error: SchemaError) -> SchemaError {
    match error {
        SchemaError::InvalidDefaultType {
            field,
            declared,
            found,
        } => SchemaError::InvalidDefaultType {
            field: format!("{parent}.{field}"),
            declared,
            found,
        },
        SchemaError::UnknownFieldType { field, keyword } => SchemaError::UnknownFieldType {
            field: format!("{parent}.{field}"),
            keyword,
        },
        SchemaError::MalformedField { field } => SchemaError::MalformedField {
            field: format!("{parent}.{field}"),
        },
    }
}
