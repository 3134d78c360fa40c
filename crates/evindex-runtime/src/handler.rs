//! The user handler trait and registry: a trait plus a name-keyed
//! registry, dispatch looks up handlers by the decoded event's callback
//! index and awaits each in turn.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use evindex_core::error::IndexerError;
use evindex_core::types::Event;

use crate::context::HandlerContext;

/// A user-provided handler for one named event/setup hook
/// (`"<Contract>:<Event>"` or `"<Contract>:setup"`).
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, event: &Event, ctx: &HandlerContext) -> Result<(), IndexerError>;

    /// The registration name this handler answers to, used as the
    /// completed-event count / metrics label.
    fn name(&self) -> &str;
}

/// A setup handler, invoked once per chain at `processSetupEvents` time
/// rather than per matched event.
#[async_trait]
pub trait SetupHandler: Send + Sync {
    async fn setup(&self, ctx: &HandlerContext) -> Result<(), IndexerError>;

    fn name(&self) -> &str;
}

/// Name-keyed registry dispatching a decoded [`Event`] to every handler
/// registered for its `event_callback_index`-derived name.
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<usize, Vec<Arc<dyn Handler>>>,
    setup_handlers: Vec<Arc<dyn SetupHandler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` for the given `event_callback_index` — the index
    /// `build_events` stamps onto every [`RawEvent`](evindex_core::types::RawEvent)
    /// it produces from this handler's filter.
    pub fn register(&mut self, event_callback_index: usize, handler: Arc<dyn Handler>) {
        self.handlers.entry(event_callback_index).or_default().push(handler);
    }

    pub fn register_setup(&mut self, handler: Arc<dyn SetupHandler>) {
        self.setup_handlers.push(handler);
    }

    pub fn setup_handlers(&self) -> &[Arc<dyn SetupHandler>] {
        &self.setup_handlers
    }

    /// The metrics/log label for an event: the registered handler names,
    /// or the bare callback index when nothing is registered for it.
    pub fn label_for(&self, event_callback_index: usize) -> String {
        match self.handlers.get(&event_callback_index) {
            Some(handlers) if !handlers.is_empty() => {
                handlers.iter().map(|h| h.name()).collect::<Vec<_>>().join(",")
            }
            _ => format!("callback:{event_callback_index}"),
        }
    }

    /// Dispatch `event` to every handler registered for its callback index.
    pub async fn dispatch(&self, event: &Event, ctx: &HandlerContext) -> Result<(), IndexerError> {
        let Some(handlers) = self.handlers.get(&event.raw.event_callback_index) else {
            return Ok(());
        };
        for handler in handlers {
            handler.handle(event, ctx).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use evindex_core::checkpoint::{Checkpoint, CheckpointParts, EventType};
    use evindex_core::types::{EventBlock, EventPayload, Hex, RawEvent};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct Counter(Arc<AtomicU32>);

    #[async_trait]
    impl Handler for Counter {
        async fn handle(&self, _event: &Event, _ctx: &HandlerContext) -> Result<(), IndexerError> {
            self.0.fetch_add(1, Ordering::Relaxed);
            Ok(())
        }
        fn name(&self) -> &str {
            "Token:Transfer"
        }
    }

    fn sample_event(callback_index: usize) -> Event {
        let checkpoint = Checkpoint::encode(CheckpointParts {
            block_timestamp: 1,
            chain_id: 1,
            block_number: 1,
            transaction_index: 0,
            event_type: EventType::Log,
            event_index: 0,
        });
        Event {
            raw: RawEvent {
                chain_id: 1,
                event_callback_index: callback_index,
                checkpoint,
                kind: EventType::Log,
                block: EventBlock { number: 1, hash: Hex::new("0xa"), timestamp: 1 },
                transaction: None,
                transaction_receipt: None,
                log: None,
                trace: None,
            },
            payload: EventPayload::Block,
        }
    }

    #[tokio::test]
    async fn dispatch_only_calls_handlers_for_the_matching_callback_index() {
        let count = Arc::new(AtomicU32::new(0));
        let mut registry = HandlerRegistry::new();
        registry.register(0, Arc::new(Counter(count.clone())));

        let ctx = HandlerContext::new(1, "ethereum");
        registry.dispatch(&sample_event(0), &ctx).await.unwrap();
        registry.dispatch(&sample_event(1), &ctx).await.unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 1);
    }
}
