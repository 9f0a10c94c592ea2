//! The command channel between the AI producers and the UI consumers.
//!
//! Delivery is synchronous fan-out in subscription order, per command kind.
//! Nothing is queued: a command published with no subscribers is dropped.

use crate::types::{Command, CommandKind};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

type Handler = Arc<dyn Fn(&Command) -> anyhow::Result<()> + Send + Sync>;

struct Entry {
    id: u64,
    handler: Handler,
}

#[derive(Default)]
struct Registry {
    next_id: u64,
    subscribers: HashMap<CommandKind, Vec<Entry>>,
}

impl Registry {
    fn contains(&self, kind: CommandKind, id: u64) -> bool {
        self.subscribers
            .get(&kind)
            .is_some_and(|entries| entries.iter().any(|e| e.id == id))
    }

    /// Takes the entry out. The caller drops it once the lock is released,
    /// since a handler's captures may themselves unsubscribe on drop.
    fn remove(&mut self, kind: CommandKind, id: u64) -> Option<Entry> {
        let entries = self.subscribers.get_mut(&kind)?;
        let index = entries.iter().position(|e| e.id == id)?;
        Some(entries.remove(index))
    }
}

fn lock(registry: &Mutex<Registry>) -> MutexGuard<'_, Registry> {
    // Handlers never run under the lock, so a poisoned registry is still consistent.
    registry.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Outcome of one publish.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub failed: usize,
}

impl Delivery {
    pub fn is_success(&self) -> bool {
        self.failed == 0
    }
}

/// A shared handle to one subscriber registry. Clones publish to the same subscribers.
#[derive(Clone, Default)]
pub struct CommandBus {
    registry: Arc<Mutex<Registry>>,
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, kind: CommandKind, handler: F) -> Subscription
    where
        F: Fn(&Command) -> anyhow::Result<()> + Send + Sync + 'static,
    {
        let mut registry = lock(&self.registry);
        let id = registry.next_id;
        registry.next_id += 1;
        registry.subscribers.entry(kind).or_default().push(Entry {
            id,
            handler: Arc::new(handler),
        });
        tracing::debug!("subscribed #{} to {}", id, kind);

        Subscription {
            registry: Arc::downgrade(&self.registry),
            kind,
            id,
            active: true,
        }
    }

    /// Delivers `command` to every handler registered for its kind.
    ///
    /// Handlers run outside the registry lock, so they may publish or
    /// (un)subscribe. A handler removed mid-delivery is skipped; one added
    /// mid-delivery first sees the next publish. A failing or panicking
    /// handler is counted and logged, and delivery continues.
    pub fn publish(&self, command: &Command) -> Delivery {
        let kind = command.kind();
        let snapshot: Vec<(u64, Handler)> = {
            let registry = lock(&self.registry);
            registry
                .subscribers
                .get(&kind)
                .map(|entries| {
                    entries
                        .iter()
                        .map(|e| (e.id, e.handler.clone()))
                        .collect()
                })
                .unwrap_or_default()
        };

        if snapshot.is_empty() {
            tracing::debug!("no subscribers for {}, dropping {:?}", kind, command);
            return Delivery::default();
        }

        let mut delivery = Delivery::default();
        for (id, handler) in snapshot {
            if !lock(&self.registry).contains(kind, id) {
                continue;
            }
            delivery.delivered += 1;
            match catch_unwind(AssertUnwindSafe(|| handler(command))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    delivery.failed += 1;
                    tracing::error!("handler #{} for {} failed: {:#}", id, kind, e);
                }
                Err(_) => {
                    delivery.failed += 1;
                    tracing::error!("handler #{} for {} panicked", id, kind);
                }
            }
        }
        tracing::debug!(
            "published {}: delivered={}, failed={}",
            kind,
            delivery.delivered,
            delivery.failed
        );
        delivery
    }

    pub fn subscriber_count(&self, kind: CommandKind) -> usize {
        lock(&self.registry)
            .subscribers
            .get(&kind)
            .map_or(0, Vec::len)
    }
}

/// Registration of one handler. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes its handler"]
pub struct Subscription {
    registry: Weak<Mutex<Registry>>,
    kind: CommandKind,
    id: u64,
    active: bool,
}

impl Subscription {
    pub fn kind(&self) -> CommandKind {
        self.kind
    }

    pub fn unsubscribe(mut self) {
        self.remove();
    }

    /// Leaves the handler registered for as long as the bus lives.
    pub fn detach(mut self) {
        self.active = false;
    }

    fn remove(&mut self) {
        if !std::mem::take(&mut self.active) {
            return;
        }
        let Some(registry) = self.registry.upgrade() else {
            return;
        };
        let removed = lock(&registry).remove(self.kind, self.id);
        if let Some(entry) = removed {
            tracing::debug!("unsubscribed #{} from {}", self.id, self.kind);
            drop(entry);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.remove();
    }
}
