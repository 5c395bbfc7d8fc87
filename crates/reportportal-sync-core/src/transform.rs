//! Entity-to-document transformation.
//!
//! [`transform`] is a pure function: it turns one [`RemoteEntity`] into a
//! [`NormalizedRecord`] plus the text that gets embedded. Each entity type
//! contributes a fixed, ordered set of labelled fields so that similar
//! entities produce similar documents.

use serde_json::{Map, Value};

use crate::models::{scalar_string, EntityType, NormalizedRecord, RemoteEntity};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransformError {
    #[error("{entity_type} entity is missing required field '{field}'")]
    MissingField {
        entity_type: EntityType,
        field: &'static str,
    },
}

/// Transform one remote entity.
///
/// Only missing identity (the id, or the owning project) is an error;
/// every other field is optional.
pub fn transform(entity: &RemoteEntity) -> Result<(NormalizedRecord, String), TransformError> {
    let entity_type = entity.entity_type;
    let entity_id = entity
        .id
        .clone()
        .filter(|id| !id.is_empty())
        .ok_or(TransformError::MissingField {
            entity_type,
            field: "id",
        })?;
    if entity.project_name.trim().is_empty() {
        return Err(TransformError::MissingField {
            entity_type,
            field: "projectName",
        });
    }

    let raw = &entity.raw_fields;
    let mut document = document_text(entity_type, raw);
    if document.is_empty() {
        document = format!("{}: {}", label(entity_type), entity_id);
    }

    let record = NormalizedRecord {
        record_id: NormalizedRecord::record_id_for(entity_type, &entity.project_name, &entity_id),
        entity_type,
        entity_id,
        project_name: entity.project_name.clone(),
        last_modified_at: entity.last_modified_at,
        fields: metadata_fields(entity_type, raw),
        raw_json: raw.to_string(),
    };
    Ok((record, document))
}

fn label(entity_type: EntityType) -> &'static str {
    match entity_type {
        EntityType::Project => "Project",
        EntityType::User => "User",
        EntityType::Launch => "Launch",
        EntityType::TestItem => "Test Item",
        EntityType::Log => "Log",
        EntityType::Filter => "Filter",
        EntityType::Dashboard => "Dashboard",
    }
}

fn text(raw: &Value, pointer: &str) -> Option<String> {
    raw.pointer(pointer).and_then(scalar_string)
}

fn first_text(raw: &Value, pointers: &[&str]) -> Option<String> {
    pointers.iter().find_map(|p| text(raw, p))
}

/// Collects `Label: value` parts, skipping empty values.
struct Parts(Vec<String>);

impl Parts {
    fn new() -> Self {
        Parts(Vec::new())
    }

    fn push(&mut self, label: &str, value: Option<String>) {
        if let Some(value) = value {
            self.0.push(format!("{}: {}", label, value));
        }
    }

    fn push_raw(&mut self, value: String) {
        if !value.trim().is_empty() {
            self.0.push(value);
        }
    }

    fn join(self) -> String {
        self.0.join(" ")
    }
}

fn array<'a>(raw: &'a Value, key: &str) -> impl Iterator<Item = &'a Value> {
    raw.get(key)
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
}

fn document_text(entity_type: EntityType, raw: &Value) -> String {
    let mut parts = Parts::new();
    match entity_type {
        EntityType::Launch => {
            parts.push("Launch", text(raw, "/name"));
            parts.push("Description", text(raw, "/description"));
            parts.push("Status", text(raw, "/status"));
            parts.push("Mode", text(raw, "/mode"));
            for attr in array(raw, "attributes") {
                let value = text(attr, "/value");
                match (text(attr, "/key"), value) {
                    (Some(key), Some(value)) => parts.push_raw(format!("{}: {}", key, value)),
                    (None, Some(value)) => parts.push_raw(value),
                    _ => {}
                }
            }
        }
        EntityType::TestItem => {
            parts.push("Test Item", text(raw, "/name"));
            parts.push("Description", text(raw, "/description"));
            parts.push("Type", text(raw, "/type"));
            parts.push("Status", text(raw, "/status"));
            parts.push("Issue Type", text(raw, "/issue/issueType"));
            parts.push("Issue Comment", text(raw, "/issue/comment"));
        }
        EntityType::Log => {
            parts.push("Log Level", text(raw, "/level"));
            parts.push("Message", text(raw, "/message"));
            parts.push("Test Item", first_text(raw, &["/itemName", "/testItemName"]));
        }
        EntityType::User => {
            parts.push("User", first_text(raw, &["/userId", "/login"]));
            parts.push("Full Name", text(raw, "/fullName"));
            parts.push("Email", text(raw, "/email"));
            parts.push("Role", first_text(raw, &["/userRole", "/projectRole"]));
        }
        EntityType::Project => {
            parts.push("Project", text(raw, "/projectName"));
            parts.push("Organization", text(raw, "/organization"));
            parts.push("Entry Type", text(raw, "/entryType"));
        }
        EntityType::Filter => {
            parts.push("Filter", text(raw, "/name"));
            parts.push("Description", text(raw, "/description"));
            parts.push("Type", text(raw, "/type"));
            for condition in array(raw, "conditions") {
                let rendered = [
                    text(condition, "/filteringField"),
                    text(condition, "/condition"),
                    text(condition, "/value"),
                ]
                .into_iter()
                .flatten()
                .collect::<Vec<_>>()
                .join(" ");
                parts.push_raw(rendered);
            }
        }
        EntityType::Dashboard => {
            parts.push("Dashboard", text(raw, "/name"));
            parts.push("Description", text(raw, "/description"));
            parts.push("Owner", text(raw, "/owner"));
            for widget in array(raw, "widgets") {
                parts.push("Widget", text(widget, "/widgetName"));
            }
        }
    }
    parts.join()
}

fn metadata_fields(entity_type: EntityType, raw: &Value) -> Map<String, Value> {
    let mapping: &[(&str, &str)] = match entity_type {
        EntityType::Launch => &[
            ("launch_name", "/name"),
            ("launch_number", "/number"),
            ("status", "/status"),
            ("mode", "/mode"),
            ("owner", "/owner"),
        ],
        EntityType::TestItem => &[
            ("item_name", "/name"),
            ("item_type", "/type"),
            ("status", "/status"),
            ("launch_id", "/launchId"),
            ("issue_type", "/issue/issueType"),
        ],
        EntityType::Log => &[
            ("level", "/level"),
            ("item_id", "/itemId"),
            ("launch_id", "/launchId"),
        ],
        EntityType::User => &[
            ("full_name", "/fullName"),
            ("email", "/email"),
            ("role", "/userRole"),
        ],
        EntityType::Project => &[
            ("organization", "/organization"),
            ("entry_type", "/entryType"),
        ],
        EntityType::Filter => &[
            ("filter_name", "/name"),
            ("filter_type", "/type"),
            ("owner", "/owner"),
        ],
        EntityType::Dashboard => &[("dashboard_name", "/name"), ("owner", "/owner")],
    };

    let mut fields = Map::new();
    for (key, pointer) in mapping {
        match raw.pointer(pointer) {
            Some(value @ (Value::String(_) | Value::Number(_) | Value::Bool(_))) => {
                fields.insert((*key).to_string(), value.clone());
            }
            _ => {}
        }
    }
    if entity_type == EntityType::Dashboard {
        let widgets = array(raw, "widgets").count();
        fields.insert("widget_count".to_string(), Value::from(widgets));
    }
    fields
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entity(entity_type: EntityType, raw: Value) -> RemoteEntity {
        RemoteEntity::from_raw(entity_type, "demo", raw)
    }

    #[test]
    fn launch_document_includes_attributes() {
        let launch = entity(
            EntityType::Launch,
            json!({
                "id": 12,
                "name": "nightly",
                "status": "FAILED",
                "mode": "DEFAULT",
                "attributes": [{"key": "browser", "value": "firefox"}, {"value": "smoke"}],
                "lastModified": 1_700_000_000_000i64
            }),
        );
        let (record, doc) = transform(&launch).unwrap();
        assert_eq!(record.record_id, "launch:12");
        assert_eq!(
            doc,
            "Launch: nightly Status: FAILED Mode: DEFAULT browser: firefox smoke"
        );
        assert_eq!(record.fields["launch_name"], json!("nightly"));
        assert!(record.last_modified_at.is_some());
    }

    #[test]
    fn log_document_uses_level_message_and_item() {
        let log = entity(
            EntityType::Log,
            json!({"id": 5, "level": "ERROR", "message": "NullPointerException", "itemName": "login test", "itemId": 9}),
        );
        let (record, doc) = transform(&log).unwrap();
        assert_eq!(
            doc,
            "Log Level: ERROR Message: NullPointerException Test Item: login test"
        );
        assert_eq!(record.fields["item_id"], json!(9));
    }

    #[test]
    fn test_item_reads_nested_issue() {
        let item = entity(
            EntityType::TestItem,
            json!({"id": "77", "name": "checkout", "type": "STEP", "issue": {"issueType": "pb001", "comment": "flaky"}}),
        );
        let (record, doc) = transform(&item).unwrap();
        assert_eq!(
            doc,
            "Test Item: checkout Type: STEP Issue Type: pb001 Issue Comment: flaky"
        );
        assert_eq!(record.fields["issue_type"], json!("pb001"));
    }

    #[test]
    fn dashboard_lists_widgets() {
        let dashboard = entity(
            EntityType::Dashboard,
            json!({"id": 3, "name": "Release", "widgets": [{"widgetName": "Pass rate"}, {"widgetName": "Trends"}]}),
        );
        let (record, doc) = transform(&dashboard).unwrap();
        assert_eq!(doc, "Dashboard: Release Widget: Pass rate Widget: Trends");
        assert_eq!(record.fields["widget_count"], json!(2));
    }

    #[test]
    fn missing_id_is_an_error() {
        let log = entity(EntityType::Log, json!({"message": "orphan"}));
        assert_eq!(
            transform(&log),
            Err(TransformError::MissingField {
                entity_type: EntityType::Log,
                field: "id"
            })
        );
    }

    #[test]
    fn missing_optional_fields_fall_back_to_identity() {
        let filter = entity(EntityType::Filter, json!({"id": 1}));
        let (record, doc) = transform(&filter).unwrap();
        assert_eq!(doc, "Filter: 1");
        assert!(record.fields.is_empty());
        assert_eq!(record.last_modified_at, None);
    }

    #[test]
    fn transform_is_deterministic() {
        let user = entity(
            EntityType::User,
            json!({"userId": "jdoe", "fullName": "J Doe", "email": "j@example.com", "userRole": "USER"}),
        );
        assert_eq!(transform(&user), transform(&user));
        let (record, doc) = transform(&user).unwrap();
        assert_eq!(record.record_id, "user:demo/jdoe");
        assert_eq!(doc, "User: jdoe Full Name: J Doe Email: j@example.com Role: USER");
    }
}
