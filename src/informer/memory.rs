//! In-process informer backed by a map, for embedding and tests.

use crate::informer::{Informer, InformerFuture};
use crate::queue::key::ResourceKind;
use crate::router::handler::ResourceEventHandler;
use crate::router::object::{ChangeEvent, DeletedObject, ObjectRef, Tombstone};
use anyhow::{bail, Result};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

pub struct MemoryInformer {
    kind: ResourceKind,
    sync_delay: Duration,
    resync_period: Option<Duration>,
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    objects: BTreeMap<String, ObjectRef>,
    handlers: Vec<Arc<dyn ResourceEventHandler>>,
    synced: bool,
}

impl MemoryInformer {
    pub fn new(kind: ResourceKind) -> Self {
        Self {
            kind,
            sync_delay: Duration::ZERO,
            resync_period: None,
            state: Mutex::new(MemoryState::default()),
        }
    }

    /// Objects returned by the initial listing. Objects of another kind are skipped.
    pub fn with_objects(self, objects: impl IntoIterator<Item = ObjectRef>) -> Self {
        {
            let mut state = self.state.lock().unwrap();
            for obj in objects {
                if obj.kind() != &self.kind {
                    tracing::warn!(
                        informer_kind = %self.kind,
                        obj_kind = %obj.kind(),
                        obj_name = obj.name(),
                        "skipping object of a different kind"
                    );
                    continue;
                }
                state.objects.insert(obj.store_key(), obj);
            }
        }
        self
    }

    /// Delay before the initial listing completes.
    pub fn with_sync_delay(mut self, delay: Duration) -> Self {
        self.sync_delay = delay;
        self
    }

    /// Period at which every cached object is redelivered as an update.
    pub fn with_resync_period(mut self, period: Duration) -> Self {
        self.resync_period = (!period.is_zero()).then_some(period);
        self
    }

    /// Inserts or replaces an object, notifying handlers once synced.
    pub fn upsert(&self, obj: ObjectRef) -> Result<()> {
        if obj.kind() != &self.kind {
            bail!(
                "informer for {} cannot store object of kind {}",
                self.kind,
                obj.kind()
            );
        }

        let (handlers, event) = {
            let mut state = self.state.lock().unwrap();
            let previous = state.objects.insert(obj.store_key(), obj.clone());
            if !state.synced {
                return Ok(());
            }
            let event = match previous {
                Some(old) => ChangeEvent::Updated { old, new: obj },
                None => ChangeEvent::Added(obj),
            };
            (state.handlers.clone(), event)
        };

        dispatch(&handlers, &event);
        Ok(())
    }

    /// Removes an object whose deletion was observed by the watch.
    pub fn remove(&self, namespace: &str, name: &str) -> Option<ObjectRef> {
        self.remove_with(namespace, name, |obj| DeletedObject::Live(obj.clone()))
    }

    /// Removes an object whose deletion was only noticed on relist, so handlers
    /// receive its last known state rather than the object.
    pub fn remove_missed(&self, namespace: &str, name: &str) -> Option<ObjectRef> {
        self.remove_with(namespace, name, |obj| {
            DeletedObject::LastKnownState(Tombstone {
                key: obj.store_key(),
                state: obj.to_value(),
            })
        })
    }

    fn remove_with(
        &self,
        namespace: &str,
        name: &str,
        deleted: impl FnOnce(&ObjectRef) -> DeletedObject,
    ) -> Option<ObjectRef> {
        let key = ObjectRef::new(self.kind.clone(), namespace, name).store_key();
        let (handlers, obj) = {
            let mut state = self.state.lock().unwrap();
            let obj = state.objects.remove(&key)?;
            if !state.synced {
                return Some(obj);
            }
            (state.handlers.clone(), obj)
        };

        dispatch(&handlers, &ChangeEvent::Deleted(deleted(&obj)));
        Some(obj)
    }

    pub fn get(&self, namespace: &str, name: &str) -> Option<ObjectRef> {
        let key = ObjectRef::new(self.kind.clone(), namespace, name).store_key();
        self.state.lock().unwrap().objects.get(&key).cloned()
    }

    pub fn list(&self) -> Vec<ObjectRef> {
        self.state.lock().unwrap().objects.values().cloned().collect()
    }

    fn complete_initial_list(&self) {
        let (handlers, objects) = {
            let mut state = self.state.lock().unwrap();
            state.synced = true;
            (
                state.handlers.clone(),
                state.objects.values().cloned().collect::<Vec<_>>(),
            )
        };

        tracing::debug!(kind = %self.kind, objects = objects.len(), "informer cache synced");
        for obj in objects {
            dispatch(&handlers, &ChangeEvent::Added(obj));
        }
    }

    fn resync(&self) {
        let (handlers, objects) = {
            let state = self.state.lock().unwrap();
            (
                state.handlers.clone(),
                state.objects.values().cloned().collect::<Vec<_>>(),
            )
        };

        for obj in objects {
            dispatch(
                &handlers,
                &ChangeEvent::Updated {
                    old: obj.clone(),
                    new: obj,
                },
            );
        }
    }
}

fn dispatch(handlers: &[Arc<dyn ResourceEventHandler>], event: &ChangeEvent) {
    for handler in handlers {
        event.dispatch(handler.as_ref());
    }
}

impl Informer for MemoryInformer {
    fn kind(&self) -> &ResourceKind {
        &self.kind
    }

    fn run(self: Arc<Self>, token: CancellationToken) -> InformerFuture {
        Box::pin(async move {
            if !self.sync_delay.is_zero() {
                tokio::select! {
                    _ = token.cancelled() => return Ok(()),
                    _ = time::sleep(self.sync_delay) => {}
                }
            }
            self.complete_initial_list();

            let Some(period) = self.resync_period else {
                token.cancelled().await;
                return Ok(());
            };

            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => self.resync(),
                }
            }
            Ok(())
        })
    }

    fn has_synced(&self) -> bool {
        self.state.lock().unwrap().synced
    }

    fn add_event_handler(&self, handler: Arc<dyn ResourceEventHandler>) {
        let replay = {
            let mut state = self.state.lock().unwrap();
            state.handlers.push(handler.clone());
            if state.synced {
                state.objects.values().cloned().collect()
            } else {
                Vec::new()
            }
        };

        for obj in &replay {
            handler.on_add(obj);
        }
    }
}
