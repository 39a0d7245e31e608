//! Minimal object view consumed by event handlers, plus the change events
//! delivered by informers.

use crate::queue::key::{QueueKey, ResourceKind};
use serde::Deserialize;
use serde_json::{json, Value};
use std::fmt;

/// The single owner that controls an object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerRef {
    pub kind: ResourceKind,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRef {
    kind: ResourceKind,
    namespace: String,
    name: String,
    controller_ref: Option<ControllerRef>,
}

impl ObjectRef {
    pub fn new(kind: ResourceKind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            kind,
            namespace: namespace.into(),
            name: name.into(),
            controller_ref: None,
        }
    }

    pub fn with_controller(mut self, kind: ResourceKind, name: impl Into<String>) -> Self {
        self.controller_ref = Some(ControllerRef {
            kind,
            name: name.into(),
        });
        self
    }

    pub fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn controller_ref(&self) -> Option<&ControllerRef> {
        self.controller_ref.as_ref()
    }

    pub fn queue_key(&self) -> QueueKey {
        QueueKey::new(self.namespace.clone(), self.name.clone())
    }

    /// Store key in `namespace/name` form (bare name for cluster-scoped objects).
    pub fn store_key(&self) -> String {
        self.queue_key().to_string()
    }

    /// Decodes the metadata of a Kubernetes-style JSON object.
    pub fn from_value(value: &Value) -> Result<Self, ObjectDecodeError> {
        let raw = RawObject::deserialize(value).map_err(ObjectDecodeError::Shape)?;
        if raw.metadata.name.trim().is_empty() {
            return Err(ObjectDecodeError::MissingName);
        }

        let mut controllers = raw
            .metadata
            .owner_references
            .into_iter()
            .filter(|owner| owner.controller.unwrap_or(false));
        let controller_ref = controllers.next().map(|owner| ControllerRef {
            kind: ResourceKind::from_api_version(&owner.api_version, owner.kind),
            name: owner.name,
        });
        let extra = controllers.count();
        if extra > 0 {
            tracing::warn!(
                obj_namespace = %raw.metadata.namespace,
                obj_name = %raw.metadata.name,
                controllers = extra + 1,
                "object has more than one controller owner reference; using the first"
            );
        }

        Ok(Self {
            kind: ResourceKind::from_api_version(&raw.api_version, raw.kind),
            namespace: raw.metadata.namespace,
            name: raw.metadata.name,
            controller_ref,
        })
    }

    /// Renders the object metadata in the shape [`ObjectRef::from_value`] reads.
    pub fn to_value(&self) -> Value {
        let mut metadata = serde_json::Map::new();
        if !self.namespace.is_empty() {
            metadata.insert("namespace".into(), Value::from(self.namespace.as_str()));
        }
        metadata.insert("name".into(), Value::from(self.name.as_str()));
        if let Some(owner) = &self.controller_ref {
            metadata.insert(
                "ownerReferences".into(),
                json!([{
                    "apiVersion": owner.kind.api_version(),
                    "kind": owner.kind.kind(),
                    "name": owner.name,
                    "controller": true,
                }]),
            );
        }

        json!({
            "apiVersion": self.kind.api_version(),
            "kind": self.kind.kind(),
            "metadata": metadata,
        })
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawObject {
    api_version: String,
    kind: String,
    metadata: RawMetadata,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawMetadata {
    #[serde(default)]
    namespace: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    owner_references: Vec<RawOwnerReference>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawOwnerReference {
    api_version: String,
    kind: String,
    name: String,
    #[serde(default)]
    controller: Option<bool>,
}

/// Error returned when a payload does not look like a resource object.
#[derive(Debug)]
pub enum ObjectDecodeError {
    Shape(serde_json::Error),
    MissingName,
}

impl fmt::Display for ObjectDecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ObjectDecodeError::Shape(err) => write!(f, "unrecognized object shape: {err}"),
            ObjectDecodeError::MissingName => write!(f, "object metadata has no name"),
        }
    }
}

impl std::error::Error for ObjectDecodeError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ObjectDecodeError::Shape(err) => Some(err),
            _ => None,
        }
    }
}

/// Deletion observed only through a relist: the last state the cache held.
#[derive(Debug, Clone, PartialEq)]
pub struct Tombstone {
    pub key: String,
    pub state: Value,
}

#[derive(Debug, Clone, PartialEq)]
pub enum DeletedObject {
    Live(ObjectRef),
    LastKnownState(Tombstone),
}

impl DeletedObject {
    pub fn resolve(&self) -> Result<ObjectRef, ObjectDecodeError> {
        match self {
            DeletedObject::Live(obj) => Ok(obj.clone()),
            DeletedObject::LastKnownState(tombstone) => ObjectRef::from_value(&tombstone.state),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
    Added(ObjectRef),
    Updated { old: ObjectRef, new: ObjectRef },
    Deleted(DeletedObject),
}

impl ChangeEvent {
    pub fn dispatch(&self, handler: &dyn crate::router::handler::ResourceEventHandler) {
        match self {
            ChangeEvent::Added(obj) => handler.on_add(obj),
            ChangeEvent::Updated { old, new } => handler.on_update(old, new),
            ChangeEvent::Deleted(obj) => handler.on_delete(obj),
        }
    }
}
