//! Packaged JSON Schema registry and message validation.
//!
//! Schemas are Draft-07 documents embedded at compile time and compiled into
//! validators once, on first use. Validation is extended so that `default`
//! values declared under `properties` are materialised into the instance
//! before the validator runs, recursing into nested object schemas.

use std::collections::HashMap;
use std::sync::OnceLock;

use jsonschema::Validator;
use serde_json::Value;

use crate::error::{SchemaError, StageError, ValidationError};

/// All schemas packaged with the crate, addressed by name.
const SCHEMAS: &[(&str, &str)] = &[
    ("inbox-upload", include_str!("../schemas/inbox-upload.json")),
    ("inbox-rename", include_str!("../schemas/inbox-rename.json")),
    ("inbox-remove", include_str!("../schemas/inbox-remove.json")),
    (
        "ingestion-trigger",
        include_str!("../schemas/ingestion-trigger.json"),
    ),
    (
        "ingestion-accession-request",
        include_str!("../schemas/ingestion-accession-request.json"),
    ),
    (
        "ingestion-accession",
        include_str!("../schemas/ingestion-accession.json"),
    ),
    (
        "ingestion-completion",
        include_str!("../schemas/ingestion-completion.json"),
    ),
    (
        "dataset-mapping",
        include_str!("../schemas/dataset-mapping.json"),
    ),
    (
        "ingestion-user-error",
        include_str!("../schemas/ingestion-user-error.json"),
    ),
];

struct Entry {
    document: Value,
    validator: Validator,
}

fn registry() -> &'static Result<HashMap<&'static str, Entry>, SchemaError> {
    static REGISTRY: OnceLock<Result<HashMap<&'static str, Entry>, SchemaError>> = OnceLock::new();
    REGISTRY.get_or_init(|| {
        let mut map = HashMap::new();
        for (name, raw) in SCHEMAS {
            let document: Value =
                serde_json::from_str(raw).map_err(|e| SchemaError::Malformed {
                    name: (*name).to_string(),
                    message: e.to_string(),
                })?;
            let validator =
                jsonschema::validator_for(&document).map_err(|e| SchemaError::Compile {
                    name: (*name).to_string(),
                    message: e.to_string(),
                })?;
            map.insert(*name, Entry { document, validator });
        }
        Ok(map)
    })
}

fn entry(name: &str) -> Result<&'static Entry, SchemaError> {
    let map = registry().as_ref().map_err(Clone::clone)?;
    map.get(name).ok_or_else(|| SchemaError::NotFound {
        name: name.to_string(),
    })
}

/// Validate `instance` against the named packaged schema.
///
/// Defaults declared in the schema are written into the instance first, so a
/// conforming message comes back with every defaulted field present.
/// Fails with [`StageError::Schema`] when the schema itself is unknown or
/// broken, and [`StageError::Validation`] when the instance does not conform.
pub fn validate(schema_name: &str, instance: &mut Value) -> Result<(), StageError> {
    let entry = entry(schema_name)?;
    apply_defaults(&entry.document, instance);
    entry
        .validator
        .validate(instance)
        .map_err(|err| ValidationError {
            schema: schema_name.to_string(),
            detail: err.to_string(),
        })?;
    Ok(())
}

/// Materialise `properties.*.default` values into the instance, recursively.
fn apply_defaults(schema: &Value, instance: &mut Value) {
    let Some(properties) = schema.get("properties").and_then(Value::as_object) else {
        return;
    };
    let Some(object) = instance.as_object_mut() else {
        return;
    };
    for (key, subschema) in properties {
        if let Some(default) = subschema.get("default") {
            object.entry(key.clone()).or_insert_with(|| default.clone());
        }
        if let Some(nested) = object.get_mut(key) {
            apply_defaults(subschema, nested);
        }
    }
}
