use crate::queue::key::ResourceKind;
use crate::router::object::ObjectRef;
use anyhow::Result;

/// Index from controlled objects to the objects that own them, or would want
/// to own them once they exist.
///
/// Consulted when an object carries no usable controller reference. Must be
/// safe to call from many informer tasks at once.
pub trait OwnerIndex: Send + Sync {
    fn candidate_owners(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<ObjectRef>>;
}

impl<F> OwnerIndex for F
where
    F: Fn(&ResourceKind, &str, &str) -> Result<Vec<ObjectRef>> + Send + Sync,
{
    fn candidate_owners(
        &self,
        kind: &ResourceKind,
        namespace: &str,
        name: &str,
    ) -> Result<Vec<ObjectRef>> {
        self(kind, namespace, name)
    }
}
