//! Hook fan-out to downstream consumers.
//!
//! Every handled inbound line becomes a `(source, command, payload)`
//! event delivered to all registered consumers, in registration order, on
//! the dispatching thread, after the state store's critical section has
//! closed. Payloads are detached value snapshots with the stable key set
//! of the crate's public contract; consumers never see live references
//! into the store.

use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;

/// A hook payload: a JSON map with stable keys (`channel`, `users`,
/// `modes`, `ts`, `target`, `text`, ...).
pub type Payload = serde_json::Map<String, Value>;

/// One delivered hook.
#[derive(Debug, Clone)]
pub struct HookEvent {
    /// SID or UID the line came from.
    pub source: String,
    /// Uppercased command name, or a synthetic name such as
    /// `SLINK_CLIENT_OPERED`.
    pub command: String,
    pub payload: Payload,
}

/// A downstream consumer of hook events.
pub trait HookConsumer: Send + Sync {
    fn on_hook(&self, event: &HookEvent);
}

impl<F> HookConsumer for F
where
    F: Fn(&HookEvent) + Send + Sync,
{
    fn on_hook(&self, event: &HookEvent) {
        self(event)
    }
}

/// Fan-out bus over registered consumers.
#[derive(Default)]
pub struct HookBus {
    consumers: RwLock<Vec<Arc<dyn HookConsumer>>>,
}

impl HookBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a consumer. Consumers cannot be unregistered; they live as
    /// long as the bus.
    pub fn subscribe(&self, consumer: Arc<dyn HookConsumer>) {
        self.consumers.write().push(consumer);
    }

    /// Deliver one event to every consumer.
    ///
    /// A `parse_as` key in the payload overrides the routed command name,
    /// which is how encapsulated subcommands surface under their own hook
    /// (`ENCAP * KNOCK ...` arrives as a `KNOCK` event).
    pub fn dispatch(&self, mut event: HookEvent) {
        if let Some(Value::String(command)) = event.payload.get("parse_as") {
            event.command = command.clone();
        }
        let consumers = self.consumers.read().clone();
        for consumer in &consumers {
            consumer.on_hook(&event);
        }
    }
}
