//! The scenario document model and its typed accessors.

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ScenarioError;

/// Entity kinds every scenario must declare (possibly with an empty list).
pub const REQUIRED_KINDS: &[&str] = &[
    "BaseStation",
    "NetworkSwitch",
    "NetworkLink",
    "EdgeServer",
    "ContainerImage",
    "ContainerLayer",
    "ContainerRegistry",
    "Service",
    "Application",
    "User",
    "FailureModel",
    "Topology",
];

/// A reference to another record: `{"class": "EdgeServer", "id": 3}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityRef {
    pub class: String,
    pub id: u64,
}

/// One entity record. Attributes and relationships are raw JSON maps so
/// fields this simulator does not interpret are preserved verbatim.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    #[serde(default)]
    pub attributes: Map<String, Value>,
    #[serde(default)]
    pub relationships: Map<String, Value>,
}

impl EntityRecord {
    /// The record's mandatory `attributes.id`.
    pub fn id(&self, kind: &str) -> Result<u64, ScenarioError> {
        match self.attributes.get("id") {
            Some(Value::Number(n)) => n.as_u64().ok_or_else(|| ScenarioError::InvalidField {
                kind: kind.to_string(),
                id: 0,
                field: "id".to_string(),
                expected: "unsigned integer",
            }),
            Some(_) => Err(ScenarioError::InvalidField {
                kind: kind.to_string(),
                id: 0,
                field: "id".to_string(),
                expected: "unsigned integer",
            }),
            None => Err(ScenarioError::MissingField {
                kind: kind.to_string(),
                id: 0,
                field: "id".to_string(),
            }),
        }
    }

    fn missing(&self, kind: &str, field: &str) -> ScenarioError {
        ScenarioError::MissingField {
            kind: kind.to_string(),
            id: self.id(kind).unwrap_or(0),
            field: field.to_string(),
        }
    }

    fn invalid(&self, kind: &str, field: &str, expected: &'static str) -> ScenarioError {
        ScenarioError::InvalidField {
            kind: kind.to_string(),
            id: self.id(kind).unwrap_or(0),
            field: field.to_string(),
            expected,
        }
    }

    pub fn attr(&self, name: &str) -> Option<&Value> {
        self.attributes.get(name)
    }

    pub fn attr_u64(&self, kind: &str, name: &str) -> Result<u64, ScenarioError> {
        self.attr(name)
            .ok_or_else(|| self.missing(kind, name))?
            .as_u64()
            .ok_or_else(|| self.invalid(kind, name, "unsigned integer"))
    }

    pub fn attr_i64(&self, kind: &str, name: &str) -> Result<i64, ScenarioError> {
        let value = self.attr(name).ok_or_else(|| self.missing(kind, name))?;
        // Infinite instants are written as null.
        if value.is_null() {
            return Ok(i64::MAX);
        }
        value
            .as_i64()
            .ok_or_else(|| self.invalid(kind, name, "integer or null"))
    }

    pub fn attr_f64(&self, kind: &str, name: &str) -> Result<f64, ScenarioError> {
        self.attr(name)
            .ok_or_else(|| self.missing(kind, name))?
            .as_f64()
            .ok_or_else(|| self.invalid(kind, name, "number"))
    }

    pub fn attr_bool(&self, kind: &str, name: &str) -> Result<bool, ScenarioError> {
        self.attr(name)
            .ok_or_else(|| self.missing(kind, name))?
            .as_bool()
            .ok_or_else(|| self.invalid(kind, name, "boolean"))
    }

    pub fn attr_str(&self, kind: &str, name: &str) -> Result<&str, ScenarioError> {
        self.attr(name)
            .ok_or_else(|| self.missing(kind, name))?
            .as_str()
            .ok_or_else(|| self.invalid(kind, name, "string"))
    }

    /// A single relationship. `null` values map to `None`.
    pub fn rel(&self, kind: &str, name: &str) -> Result<Option<EntityRef>, ScenarioError> {
        match self.relationships.get(name) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|_| self.invalid(kind, name, "{class, id} reference")),
        }
    }

    /// A required single relationship.
    pub fn rel_required(&self, kind: &str, name: &str) -> Result<EntityRef, ScenarioError> {
        self.rel(kind, name)?
            .ok_or_else(|| self.missing(kind, name))
    }

    /// A list-valued relationship. Missing and `null` map to empty.
    pub fn rel_list(&self, kind: &str, name: &str) -> Result<Vec<EntityRef>, ScenarioError> {
        match self.relationships.get(name) {
            None | Some(Value::Null) => Ok(Vec::new()),
            Some(value) => serde_json::from_value(value.clone())
                .map_err(|_| self.invalid(kind, name, "list of {class, id} references")),
        }
    }
}

/// A parsed scenario document: one record list per entity kind.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScenarioDocument {
    pub entities: BTreeMap<String, Vec<EntityRecord>>,
}

impl ScenarioDocument {
    pub fn from_str(text: &str, path: &Path) -> Result<Self, ScenarioError> {
        serde_json::from_str(text).map_err(|source| ScenarioError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_path(path: &Path) -> Result<Self, ScenarioError> {
        let text = fs::read_to_string(path).map_err(|source| ScenarioError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let doc = Self::from_str(&text, path)?;
        doc.validate()?;
        Ok(doc)
    }

    pub fn write_to_path(&self, path: &Path) -> Result<(), ScenarioError> {
        let text = serde_json::to_string_pretty(self).map_err(|source| ScenarioError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        fs::write(path, text).map_err(|source| ScenarioError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn records(&self, kind: &str) -> &[EntityRecord] {
        self.entities.get(kind).map_or(&[], Vec::as_slice)
    }

    /// Checks structural integrity: required kinds present, ids unique
    /// within their kind, and every relationship resolvable.
    pub fn validate(&self) -> Result<(), ScenarioError> {
        for kind in REQUIRED_KINDS {
            if !self.entities.contains_key(*kind) {
                return Err(ScenarioError::MissingEntityKind(kind));
            }
        }

        // Collect the id universe per class, rejecting duplicates.
        let mut ids: BTreeMap<&str, Vec<u64>> = BTreeMap::new();
        for (kind, records) in &self.entities {
            let known = ids.entry(kind.as_str()).or_default();
            for record in records {
                let id = record.id(kind)?;
                if known.contains(&id) {
                    return Err(ScenarioError::DuplicateId {
                        kind: kind.clone(),
                        id,
                    });
                }
                known.push(id);
            }
        }

        for (kind, records) in &self.entities {
            for record in records {
                let id = record.id(kind)?;
                for (field, value) in &record.relationships {
                    for entity_ref in collect_refs(value) {
                        let resolvable = ids
                            .get(entity_ref.class.as_str())
                            .is_some_and(|known| known.contains(&entity_ref.id));
                        if !resolvable {
                            return Err(ScenarioError::DanglingReference {
                                kind: kind.clone(),
                                id,
                                field: field.clone(),
                                target_class: entity_ref.class,
                                target_id: entity_ref.id,
                            });
                        }
                    }
                }
            }
        }

        Ok(())
    }
}

/// Extracts every `{class, id}` reference nested inside a relationship
/// value (single references, lists, and keyed maps all occur).
fn collect_refs(value: &Value) -> Vec<EntityRef> {
    let mut refs = Vec::new();
    match value {
        Value::Object(map) => {
            if let (Some(class), Some(id)) = (
                map.get("class").and_then(Value::as_str),
                map.get("id").and_then(Value::as_u64),
            ) {
                refs.push(EntityRef {
                    class: class.to_string(),
                    id,
                });
            } else {
                for nested in map.values() {
                    refs.extend(collect_refs(nested));
                }
            }
        }
        Value::Array(items) => {
            for item in items {
                refs.extend(collect_refs(item));
            }
        }
        _ => {}
    }
    refs
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_doc() -> ScenarioDocument {
        let text = r#"{
            "BaseStation": [],
            "NetworkSwitch": [
                {"attributes": {"id": 1, "coordinates": [0, 0]}, "relationships": {}}
            ],
            "NetworkLink": [],
            "EdgeServer": [
                {
                    "attributes": {"id": 1, "cpu": 4, "memory": 4, "disk": 10000,
                                   "custom_vendor_tag": "rack-7"},
                    "relationships": {"network_switch": {"class": "NetworkSwitch", "id": 1}}
                }
            ],
            "ContainerImage": [],
            "ContainerLayer": [],
            "ContainerRegistry": [],
            "Service": [],
            "Application": [],
            "User": [],
            "FailureModel": [],
            "Topology": []
        }"#;
        ScenarioDocument::from_str(text, Path::new("test.json")).unwrap()
    }

    #[test]
    fn parses_and_validates_minimal_document() {
        let doc = minimal_doc();
        doc.validate().unwrap();
        assert_eq!(doc.records("EdgeServer").len(), 1);
    }

    #[test]
    fn unknown_attributes_survive_round_trip() {
        let doc = minimal_doc();
        let text = serde_json::to_string(&doc).unwrap();
        let reparsed = ScenarioDocument::from_str(&text, Path::new("test.json")).unwrap();
        assert_eq!(doc, reparsed);
        assert_eq!(
            reparsed.records("EdgeServer")[0]
                .attr("custom_vendor_tag")
                .and_then(Value::as_str),
            Some("rack-7")
        );
    }

    #[test]
    fn dangling_reference_is_rejected() {
        let mut doc = minimal_doc();
        doc.entities.get_mut("EdgeServer").unwrap()[0]
            .relationships
            .insert(
                "base_station".to_string(),
                serde_json::json!({"class": "BaseStation", "id": 9}),
            );
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, ScenarioError::DanglingReference { .. }));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let mut doc = minimal_doc();
        let dup = doc.records("EdgeServer")[0].clone();
        doc.entities.get_mut("EdgeServer").unwrap().push(dup);
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, ScenarioError::DuplicateId { .. }));
    }

    #[test]
    fn missing_kind_is_rejected() {
        let mut doc = minimal_doc();
        doc.entities.remove("Topology");
        let err = doc.validate().unwrap_err();
        assert!(matches!(err, ScenarioError::MissingEntityKind("Topology")));
    }

    #[test]
    fn infinite_instants_read_as_null() {
        let record: EntityRecord = serde_json::from_str(
            r#"{"attributes": {"id": 1, "initial_failure_time_step": null}}"#,
        )
        .unwrap();
        assert_eq!(
            record.attr_i64("FailureModel", "initial_failure_time_step").unwrap(),
            i64::MAX
        );
    }
}
