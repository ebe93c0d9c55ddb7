use serde_json::{Map, Value};
use shared::models::{FieldError, HeroDefinition};
use thiserror::Error;

/// Every field of a hero payload that failed validation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid hero definition: {}", field_list(.0))]
pub struct ValidationErrors(pub Vec<FieldError>);

fn field_list(errors: &[FieldError]) -> String {
    errors
        .iter()
        .map(|e| e.field.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}

impl ValidationErrors {
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(|e| e.field.as_str())
    }
}

const EXPECTED_STRING: &str = "Expected string";

/// Check a raw hero payload and turn it into a [`HeroDefinition`].
///
/// Required strings only need to be non-empty; whitespace is kept as is.
/// Unknown keys are ignored.
pub fn validate(raw: &Value) -> Result<HeroDefinition, ValidationErrors> {
    let Some(object) = raw.as_object() else {
        return Err(ValidationErrors(vec![FieldError::new(
            "body",
            "Expected an object",
        )]));
    };

    let mut errors = Vec::new();
    let name = required(object, "name", "Name is required", &mut errors);
    let description = required(object, "description", "Description is required", &mut errors);
    let system_prompt = optional(object, "systemPrompt", &mut errors);
    let model_name = required(object, "modelName", "Model is required", &mut errors);
    let avatar_url = optional(object, "avatarUrl", &mut errors);

    if !errors.is_empty() {
        return Err(ValidationErrors(errors));
    }

    Ok(HeroDefinition {
        name: name.unwrap_or_default(),
        description: description.unwrap_or_default(),
        system_prompt,
        model_name: model_name.unwrap_or_default(),
        avatar_url,
    })
}

fn required(
    object: &Map<String, Value>,
    field: &str,
    missing: &str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match object.get(field) {
        Some(Value::String(s)) if !s.is_empty() => Some(s.clone()),
        None | Some(Value::String(_)) => {
            errors.push(FieldError::new(field, missing));
            None
        }
        Some(_) => {
            errors.push(FieldError::new(field, EXPECTED_STRING));
            None
        }
    }
}

fn optional(
    object: &Map<String, Value>,
    field: &str,
    errors: &mut Vec<FieldError>,
) -> Option<String> {
    match object.get(field) {
        None => None,
        Some(Value::String(s)) => Some(s.clone()),
        Some(_) => {
            errors.push(FieldError::new(field, EXPECTED_STRING));
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn accepts_full_payload() {
        let def = validate(&json!({
            "name": "Einstein",
            "description": "physicist",
            "systemPrompt": "Talk about relativity.",
            "modelName": "llama3.2:latest",
            "avatarUrl": "not even a url",
        }))
        .unwrap();

        assert_eq!(def.name, "Einstein");
        assert_eq!(def.system_prompt.as_deref(), Some("Talk about relativity."));
        assert_eq!(def.avatar_url.as_deref(), Some("not even a url"));
    }

    #[test]
    fn optional_fields_pass_through_empty() {
        let def = validate(&json!({
            "name": "Einstein",
            "description": "physicist",
            "systemPrompt": "",
            "modelName": "m",
            "avatarUrl": "",
        }))
        .unwrap();
        assert_eq!(def.system_prompt.as_deref(), Some(""));
        assert_eq!(def.avatar_url.as_deref(), Some(""));

        let def = validate(&json!({"name": "a", "description": "b", "modelName": "m"})).unwrap();
        assert_eq!(def.system_prompt, None);
        assert_eq!(def.avatar_url, None);
    }

    #[test]
    fn empty_name_is_rejected() {
        let err = validate(&json!({"name": "", "description": "x", "modelName": "m"})).unwrap_err();
        assert_eq!(err.0, vec![FieldError::new("name", "Name is required")]);
    }

    #[test]
    fn errors_are_aggregated() {
        let err = validate(&json!({"systemPrompt": 3})).unwrap_err();
        let fields: Vec<_> = err.fields().collect();
        assert_eq!(fields, ["name", "description", "systemPrompt", "modelName"]);
        assert_eq!(err.0[2].reason, "Expected string");
    }

    #[test]
    fn whitespace_is_not_trimmed() {
        let def = validate(&json!({"name": "  ", "description": " d ", "modelName": "m"})).unwrap();
        assert_eq!(def.name, "  ");
        assert_eq!(def.description, " d ");
    }

    #[test]
    fn null_and_wrong_types_are_rejected() {
        let err = validate(&json!({
            "name": null,
            "description": "d",
            "modelName": 7,
            "avatarUrl": null,
        }))
        .unwrap_err();
        assert_eq!(
            err.0,
            vec![
                FieldError::new("name", "Expected string"),
                FieldError::new("modelName", "Expected string"),
                FieldError::new("avatarUrl", "Expected string"),
            ]
        );
    }

    #[test]
    fn unknown_keys_are_ignored_and_non_objects_rejected() {
        assert!(validate(&json!({"name": "a", "description": "b", "modelName": "m", "extra": 1})).is_ok());

        let err = validate(&json!(["name"])).unwrap_err();
        assert_eq!(err.0[0].field, "body");
    }
}
