//! Output extraction
//!
//! After the engine call returns the final snapshot is exported and, by
//! convention, the first resource (the root pseudo-resource) carries the
//! run's aggregated outputs. Those are recursively decrypted, then the
//! reserved keys (`_links`, `_hints`, `_warps`, `_receivers`) are split out
//! into their typed structures; everything else that is not
//! underscore-prefixed lands in the generic output bucket. Link names also
//! get a generated structural type declaration for the program's authoring
//! environment.

use crate::event::{Links, Receiver, RunResult, Warp};
use crate::snapshot::StateSnapshot;
use serde_json::Value;

/// File the inferred link type declarations are written to
pub const TYPES_FILE: &str = "types.generated.ts";

/// Module name the generated declarations augment
const TYPES_MODULE: &str = "stagehand";

/// Recursively unwrap secret-wrapped values
///
/// An object carrying a string `plaintext` field is replaced by the JSON
/// value parsed from that string (null when it does not parse); any other
/// object is decrypted field by field; every other value kind passes
/// through unchanged.
pub fn decrypt(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            if let Some(Value::String(plaintext)) = map.get("plaintext") {
                return serde_json::from_str(plaintext).unwrap_or(Value::Null);
            }
            Value::Object(map.into_iter().map(|(k, v)| (k, decrypt(v))).collect())
        }
        other => other,
    }
}

/// Partition the decrypted root outputs of `snapshot` into `result`
///
/// Returns immediately when the snapshot holds no resources; the result is
/// left untouched in that case.
pub fn extract(result: &mut RunResult, snapshot: &StateSnapshot) {
    let Some(root) = snapshot.resources.first() else {
        return;
    };
    result.resources = snapshot.resources.clone();

    let mut outputs: serde_json::Map<String, Value> = root
        .outputs
        .iter()
        .map(|(key, value)| (key.clone(), decrypt(value.clone())))
        .collect();

    if let Some(Value::Object(links)) = outputs.remove("_links") {
        for (name, value) in links {
            result.links.insert(name, value);
        }
    }

    if let Some(Value::Object(hints)) = outputs.remove("_hints") {
        for (name, value) in hints {
            if let Value::String(hint) = value {
                result.hints.insert(name, hint);
            }
        }
    }

    if let Some(Value::Object(warps)) = outputs.remove("_warps") {
        for (name, value) in warps {
            match serde_json::from_value::<Warp>(value) {
                Ok(warp) => {
                    result.warps.insert(name, warp);
                }
                Err(e) => log::warn!("skipping malformed warp {name}: {e}"),
            }
        }
    }

    if let Some(Value::Object(receivers)) = outputs.remove("_receivers") {
        for (name, value) in receivers {
            match serde_json::from_value::<Receiver>(value) {
                Ok(receiver) => {
                    result.receivers.insert(name, receiver);
                }
                Err(e) => log::warn!("skipping malformed receiver {name}: {e}"),
            }
        }
    }

    for (name, value) in outputs {
        if !name.starts_with('_') {
            result.outputs.insert(name, value);
        }
    }
}

/// Render the type declaration file for the given links
///
/// Each link name gets a structural type inferred from its JSON shape, for
/// downstream static consumption by the program's authoring environment.
pub fn render_type_declarations(links: &Links) -> String {
    let shape = Value::Object(links.iter().map(|(k, v)| (k.clone(), v.clone())).collect());
    format!(
        "import \"{TYPES_MODULE}\"\n\
         declare module \"{TYPES_MODULE}\" {{\n  \
         export interface Resource {}\n\
         }}\n\
         export {{}}",
        infer_type(&shape, "  ")
    )
}

/// Infer a structural type from a JSON value's shape
fn infer_type(value: &Value, indent: &str) -> String {
    match value {
        Value::Null => "any".to_string(),
        Value::Bool(_) => "boolean".to_string(),
        Value::Number(_) => "number".to_string(),
        Value::String(_) => "string".to_string(),
        Value::Array(items) => match items.first() {
            Some(first) => format!("{}[]", infer_type(first, indent)),
            None => "any[]".to_string(),
        },
        Value::Object(map) => {
            let mut out = String::from("{\n");
            for (key, value) in map {
                out.push_str(&format!(
                    "{indent}  \"{key}\": {}\n",
                    infer_type(value, &format!("{indent}  "))
                ));
            }
            out.push_str(indent);
            out.push('}');
            out
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::ResourceRecord;
    use crate::urn::{TypeToken, Urn};
    use serde_json::json;

    fn snapshot_with_outputs(outputs: Value) -> StateSnapshot {
        let Value::Object(outputs) = outputs else {
            panic!("outputs must be an object");
        };
        StateSnapshot {
            resources: vec![ResourceRecord {
                urn: Urn::parse("urn:stack:prod::web::app:run:Root::root").unwrap(),
                ty: TypeToken::parse("app:run:Root").unwrap(),
                id: String::new(),
                parent: None,
                custom: false,
                outputs,
                extra: serde_json::Map::new(),
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_decrypt_unwraps_nested_plaintext() {
        let value = json!({ "a": { "plaintext": "{\"b\":1}" } });
        assert_eq!(decrypt(value), json!({ "a": { "b": 1 } }));

        // Wrappers at any depth
        let value = json!({
            "outer": { "inner": { "plaintext": "\"secret\"" } }
        });
        assert_eq!(decrypt(value), json!({ "outer": { "inner": "secret" } }));
    }

    #[test]
    fn test_decrypt_is_idempotent_on_plain_values() {
        let value = json!({
            "url": "https://example.com",
            "count": 3,
            "nested": { "ok": true },
            "list": [1, 2]
        });
        assert_eq!(decrypt(value.clone()), value);
        assert_eq!(decrypt(decrypt(value.clone())), value);
    }

    #[test]
    fn test_decrypt_unparsable_plaintext_becomes_null() {
        let value = json!({ "a": { "plaintext": "not json" } });
        assert_eq!(decrypt(value), json!({ "a": null }));
    }

    #[test]
    fn test_extract_partitions_reserved_keys() {
        let snapshot = snapshot_with_outputs(json!({
            "_links": { "MyBucket": { "name": "assets" } },
            "_hints": { "MyBucket": "aws.s3.Bucket", "bad": 42 },
            "_warps": {
                "api": { "functionID": "api", "runtime": "nodejs20.x",
                         "handler": "index.handler", "bundle": "out/api" }
            },
            "_receivers": { "worker": { "links": ["MyBucket"] } },
            "_private": { "x": 1 },
            "apiUrl": "https://api.example.com"
        }));

        let mut result = RunResult::default();
        extract(&mut result, &snapshot);

        assert_eq!(result.links["MyBucket"], json!({ "name": "assets" }));
        assert_eq!(result.hints["MyBucket"], "aws.s3.Bucket");
        assert_eq!(result.hints.len(), 1);
        assert_eq!(result.warps["api"].function_id, "api");
        assert_eq!(result.receivers["worker"].links, vec!["MyBucket"]);

        // Reserved and underscore-prefixed keys never reach the bucket
        assert_eq!(result.outputs.len(), 1);
        assert_eq!(result.outputs["apiUrl"], "https://api.example.com");
        assert_eq!(result.resources.len(), 1);
    }

    #[test]
    fn test_extract_decrypts_before_partitioning() {
        let snapshot = snapshot_with_outputs(json!({
            "_links": { "plaintext": "{\"MySecret\":{\"value\":\"s3cr3t\"}}" },
            "apiKey": { "plaintext": "\"abc\"" }
        }));

        let mut result = RunResult::default();
        extract(&mut result, &snapshot);

        assert_eq!(result.links["MySecret"], json!({ "value": "s3cr3t" }));
        assert_eq!(result.outputs["apiKey"], "abc");
    }

    #[test]
    fn test_extract_empty_snapshot_is_noop() {
        let mut result = RunResult::default();
        extract(&mut result, &StateSnapshot::default());
        assert!(result.outputs.is_empty());
        assert!(result.resources.is_empty());
    }

    #[test]
    fn test_render_type_declarations() {
        let mut links = Links::new();
        links.insert(
            "MyBucket".into(),
            json!({ "name": "assets", "tags": ["a"], "versioned": true }),
        );
        links.insert("MyUrl".into(), json!("https://example.com"));

        let rendered = render_type_declarations(&links);
        assert!(rendered.starts_with("import \"stagehand\"\n"));
        assert!(rendered.contains("export interface Resource {"));
        assert!(rendered.contains("\"MyBucket\": {"));
        assert!(rendered.contains("\"name\": string"));
        assert!(rendered.contains("\"tags\": string[]"));
        assert!(rendered.contains("\"versioned\": boolean"));
        assert!(rendered.contains("\"MyUrl\": string"));
        assert!(rendered.ends_with("export {}"));
    }
}
