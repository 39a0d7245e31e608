use crate::queue::key::ResourceKind;
use crate::router::object::{DeletedObject, ObjectRef};
use std::fmt;

/// Receives change notifications from an informer.
///
/// Implementations must be cheap and non-blocking: they run on the
/// informer's task.
pub trait ResourceEventHandler: Send + Sync {
    fn on_add(&self, obj: &ObjectRef);
    fn on_update(&self, old: &ObjectRef, new: &ObjectRef);
    fn on_delete(&self, obj: &DeletedObject);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventAction {
    Added,
    Updated,
    Deleted,
}

impl fmt::Display for EventAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            EventAction::Added => "added",
            EventAction::Updated => "updated",
            EventAction::Deleted => "deleted",
        })
    }
}

/// Unwraps a deletion into an object, logging and dropping tombstones whose
/// last known state cannot be decoded.
pub(crate) fn resolve_deleted(ctrl_kind: &ResourceKind, obj: &DeletedObject) -> Option<ObjectRef> {
    match obj.resolve() {
        Ok(obj) => Some(obj),
        Err(err) => {
            let tombstone_key = match obj {
                DeletedObject::LastKnownState(tombstone) => Some(tombstone.key.as_str()),
                DeletedObject::Live(_) => None,
            };
            tracing::error!(
                ctrl_kind = %ctrl_kind,
                tombstone_key,
                error = %err,
                "delete tombstone with unrecognized object; dropping event"
            );
            None
        }
    }
}

/// Empty namespaces are left out of log lines.
pub(crate) fn namespace_field(namespace: &str) -> Option<&str> {
    if namespace.is_empty() {
        None
    } else {
        Some(namespace)
    }
}
