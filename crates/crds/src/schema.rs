//! Schema helpers for fields holding free-form JSON.

use schemars::{Schema, SchemaGenerator, json_schema};

/// Object schema that keeps every field the API server receives.
pub fn preserve_unknown_fields(_generator: &mut SchemaGenerator) -> Schema {
    json_schema!({
        "type": "object",
        "nullable": true,
        "x-kubernetes-preserve-unknown-fields": true
    })
}
