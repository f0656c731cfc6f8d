//! Minimal JSON response schemas: required keys, value kinds, and allowed values.

use mito_types::MitoError;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    String,
    Bool,
    Number,
    Array,
    Object,
}

impl FieldKind {
    fn matches(&self, value: &Value) -> bool {
        match self {
            FieldKind::String => value.is_string(),
            FieldKind::Bool => value.is_boolean(),
            FieldKind::Number => value.is_number(),
            FieldKind::Array => value.is_array(),
            FieldKind::Object => value.is_object(),
        }
    }

    fn label(&self) -> &'static str {
        match self {
            FieldKind::String => "string",
            FieldKind::Bool => "boolean",
            FieldKind::Number => "number",
            FieldKind::Array => "array",
            FieldKind::Object => "object",
        }
    }
}

#[derive(Debug, Clone)]
pub struct FieldSpec {
    pub name: String,
    pub kind: FieldKind,
    pub required: bool,
    pub allowed: Vec<String>,
}

#[derive(Debug, Clone, Default)]
pub struct ResponseSchema {
    pub name: String,
    pub fields: Vec<FieldSpec>,
}

impl ResponseSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: Vec::new(),
        }
    }

    pub fn required(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: true,
            allowed: Vec::new(),
        });
        self
    }

    pub fn optional(mut self, name: &str, kind: FieldKind) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind,
            required: false,
            allowed: Vec::new(),
        });
        self
    }

    /// Required string field restricted to `allowed` values.
    pub fn one_of(mut self, name: &str, allowed: &[&str]) -> Self {
        self.fields.push(FieldSpec {
            name: name.to_string(),
            kind: FieldKind::String,
            required: true,
            allowed: allowed.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Check `value` against the schema. Optional fields may be absent or null.
    pub fn validate(&self, value: &Value) -> Result<(), MitoError> {
        let obj = value.as_object().ok_or_else(|| {
            MitoError::SchemaMismatch(format!("{}: expected a JSON object", self.name))
        })?;
        for field in &self.fields {
            match obj.get(&field.name) {
                None | Some(Value::Null) if !field.required => continue,
                None | Some(Value::Null) => {
                    return Err(MitoError::SchemaMismatch(format!(
                        "{}: missing required key '{}'",
                        self.name, field.name
                    )));
                }
                Some(v) if !field.kind.matches(v) => {
                    return Err(MitoError::SchemaMismatch(format!(
                        "{}: key '{}' should be a {}",
                        self.name,
                        field.name,
                        field.kind.label()
                    )));
                }
                Some(v) => {
                    if field.allowed.is_empty() {
                        continue;
                    }
                    let text = v.as_str().unwrap_or_default();
                    if !field.allowed.iter().any(|a| a.eq_ignore_ascii_case(text)) {
                        return Err(MitoError::SchemaMismatch(format!(
                            "{}: key '{}' has unexpected value '{}'",
                            self.name, field.name, text
                        )));
                    }
                }
            }
        }
        Ok(())
    }

    /// Render the schema as an instruction appended to prompts.
    pub fn prompt_hint(&self) -> String {
        let mut lines = vec!["Respond with a single JSON object with these keys:".to_string()];
        for field in &self.fields {
            let mut line = format!(
                "- \"{}\" ({}{})",
                field.name,
                field.kind.label(),
                if field.required { "" } else { ", optional" }
            );
            if !field.allowed.is_empty() {
                line.push_str(&format!(": one of {}", field.allowed.join(", ")));
            }
            lines.push(line);
        }
        lines.push("Do not include any text outside the JSON object.".to_string());
        lines.join("\n")
    }
}

/// Pull a JSON object out of model text, tolerating markdown fences and chatter.
pub fn extract_json(text: &str) -> Result<Value, MitoError> {
    let trimmed = text.trim();
    if let Ok(v) = serde_json::from_str::<Value>(trimmed) {
        return Ok(v);
    }
    if let Some(fenced) = fenced_block(trimmed) {
        if let Ok(v) = serde_json::from_str::<Value>(fenced) {
            return Ok(v);
        }
    }
    match (trimmed.find('{'), trimmed.rfind('}')) {
        (Some(start), Some(end)) if end > start => serde_json::from_str(&trimmed[start..=end])
            .map_err(|e| MitoError::SchemaMismatch(format!("response is not valid JSON: {e}"))),
        _ => Err(MitoError::SchemaMismatch(
            "response contains no JSON object".into(),
        )),
    }
}

fn fenced_block(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after = &text[start + 3..];
    let body_start = after.find('\n')? + 1;
    let body = &after[body_start..];
    let end = body.find("```")?;
    Some(body[..end].trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn schema() -> ResponseSchema {
        ResponseSchema::new("diagnosis")
            .one_of("fix_strategy", &["retry", "abort"])
            .required("can_fix", FieldKind::Bool)
            .optional("alternative_tool", FieldKind::String)
    }

    #[test]
    fn validate_accepts_conforming_object() {
        let v = json!({"fix_strategy": "Retry", "can_fix": true, "alternative_tool": null});
        assert!(schema().validate(&v).is_ok());
    }

    #[test]
    fn validate_rejects_missing_key() {
        let err = schema().validate(&json!({"fix_strategy": "retry"})).unwrap_err();
        assert!(err.to_string().contains("missing required key 'can_fix'"));
    }

    #[test]
    fn validate_rejects_wrong_kind_and_value() {
        assert!(schema()
            .validate(&json!({"fix_strategy": "retry", "can_fix": "yes"}))
            .is_err());
        let err = schema()
            .validate(&json!({"fix_strategy": "pray", "can_fix": true}))
            .unwrap_err();
        assert!(err.to_string().contains("unexpected value 'pray'"));
    }

    #[test]
    fn validate_rejects_non_object() {
        assert!(schema().validate(&json!([1, 2])).is_err());
    }

    #[test]
    fn extract_json_from_fenced_block() {
        let text = "Here you go:\n```json\n{\"a\": 1}\n```\nthanks";
        assert_eq!(extract_json(text).unwrap(), json!({"a": 1}));
    }

    #[test]
    fn extract_json_from_surrounding_prose() {
        let text = "Sure! {\"a\": {\"b\": 2}} hope that helps";
        assert_eq!(extract_json(text).unwrap(), json!({"a": {"b": 2}}));
    }

    #[test]
    fn extract_json_fails_without_object() {
        assert!(extract_json("no json here").is_err());
    }

    #[test]
    fn prompt_hint_lists_fields() {
        let hint = schema().prompt_hint();
        assert!(hint.contains("\"fix_strategy\" (string): one of retry, abort"));
        assert!(hint.contains("\"alternative_tool\" (string, optional)"));
    }
}
