//! Post-commit event delivery.
//!
//! Each event kind has its own strongly-typed subscription list. Events are
//! enqueued by the commit pipeline after publish returns and drained by one
//! dedicated worker thread, so subscribers never run inside the commit path.
//! A subscriber error is logged and never affects commit outcome.

use std::sync::mpsc::{sync_channel, Receiver, SyncSender};
use std::sync::Arc;
use std::thread::JoinHandle;

use lattice_types::{CommitId, ObjectKind, ObjectName, RowNumber, TableId};
use parking_lot::Mutex;
use tracing::{debug, warn};

/// Rows changed in one table by one commit.
#[derive(Debug, Clone)]
pub struct TableModifiedEvent {
    pub table: ObjectName,
    pub table_id: TableId,
    pub commit: CommitId,
    pub added: Vec<RowNumber>,
    pub removed: Vec<RowNumber>,
}

/// An object created or dropped by one commit.
#[derive(Debug, Clone)]
pub struct ObjectLifecycleEvent {
    pub name: ObjectName,
    pub kind: ObjectKind,
    pub commit: CommitId,
}

/// A caller-raised event queued on the transaction and fired at commit.
#[derive(Debug, Clone)]
pub struct CustomEvent {
    pub name: String,
    pub payload: String,
}

/// Everything the dispatcher can carry.
#[derive(Debug, Clone)]
pub enum Event {
    TableModified(TableModifiedEvent),
    ObjectCreated(ObjectLifecycleEvent),
    ObjectDropped(ObjectLifecycleEvent),
    Custom(CustomEvent),
}

type Handler<E> = Box<dyn Fn(&E) -> std::result::Result<(), String> + Send + Sync>;

#[derive(Default)]
struct Subscriptions {
    table_modified: Mutex<Vec<Handler<TableModifiedEvent>>>,
    object_created: Mutex<Vec<Handler<ObjectLifecycleEvent>>>,
    object_dropped: Mutex<Vec<Handler<ObjectLifecycleEvent>>>,
    custom: Mutex<Vec<Handler<CustomEvent>>>,
}

impl Subscriptions {
    fn deliver(&self, event: &Event) {
        match event {
            Event::TableModified(e) => Self::fan_out(&self.table_modified, e),
            Event::ObjectCreated(e) => Self::fan_out(&self.object_created, e),
            Event::ObjectDropped(e) => Self::fan_out(&self.object_dropped, e),
            Event::Custom(e) => Self::fan_out(&self.custom, e),
        }
    }

    fn fan_out<E: std::fmt::Debug>(handlers: &Mutex<Vec<Handler<E>>>, event: &E) {
        for handler in handlers.lock().iter() {
            if let Err(reason) = handler(event) {
                warn!(?event, reason, "post-commit event handler failed");
            }
        }
    }
}

/// Bounded queue plus worker thread delivering post-commit events.
pub struct EventDispatcher {
    sender: Mutex<Option<SyncSender<Event>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    subs: Arc<Subscriptions>,
}

impl EventDispatcher {
    /// Start the dispatcher with a bounded queue of `capacity` events.
    pub fn start(capacity: usize) -> std::io::Result<Self> {
        let (sender, receiver): (SyncSender<Event>, Receiver<Event>) = sync_channel(capacity);
        let subs = Arc::new(Subscriptions::default());
        let worker_subs = Arc::clone(&subs);
        let worker = std::thread::Builder::new()
            .name("lattice-events".to_owned())
            .spawn(move || {
                while let Ok(event) = receiver.recv() {
                    worker_subs.deliver(&event);
                }
                debug!("event dispatcher drained");
            })?;

        Ok(Self {
            sender: Mutex::new(Some(sender)),
            worker: Mutex::new(Some(worker)),
            subs,
        })
    }

    pub fn subscribe_table_modified(
        &self,
        handler: impl Fn(&TableModifiedEvent) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) {
        self.subs.table_modified.lock().push(Box::new(handler));
    }

    pub fn subscribe_object_created(
        &self,
        handler: impl Fn(&ObjectLifecycleEvent) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) {
        self.subs.object_created.lock().push(Box::new(handler));
    }

    pub fn subscribe_object_dropped(
        &self,
        handler: impl Fn(&ObjectLifecycleEvent) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) {
        self.subs.object_dropped.lock().push(Box::new(handler));
    }

    pub fn subscribe_custom(
        &self,
        handler: impl Fn(&CustomEvent) -> std::result::Result<(), String> + Send + Sync + 'static,
    ) {
        self.subs.custom.lock().push(Box::new(handler));
    }

    /// Enqueue an event. Blocks when the bounded queue is full; logs and
    /// drops the event if the dispatcher is already shut down.
    pub fn publish(&self, event: Event) {
        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(tx) => {
                if tx.send(event).is_err() {
                    warn!("event dispatcher gone; dropping post-commit event");
                }
            }
            None => warn!("event dispatcher shut down; dropping post-commit event"),
        }
    }

    /// Drain the queue and stop the worker.
    pub fn shutdown(&self) {
        let sender = self.sender.lock().take();
        drop(sender);
        if let Some(worker) = self.worker.lock().take() {
            let _ = worker.join();
        }
    }
}

impl Drop for EventDispatcher {
    fn drop(&mut self) {
        self.shutdown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn table_event(commit: u64) -> Event {
        Event::TableModified(TableModifiedEvent {
            table: ObjectName::new("app", "t"),
            table_id: TableId::new(1),
            commit: CommitId::new(commit),
            added: vec![RowNumber::new(1)],
            removed: vec![],
        })
    }

    #[test]
    fn test_events_reach_typed_subscribers() {
        let dispatcher = EventDispatcher::start(8).unwrap();
        let table_hits = Arc::new(AtomicUsize::new(0));
        let custom_hits = Arc::new(AtomicUsize::new(0));

        let t = Arc::clone(&table_hits);
        dispatcher.subscribe_table_modified(move |e| {
            assert_eq!(e.added.len(), 1);
            t.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let c = Arc::clone(&custom_hits);
        dispatcher.subscribe_custom(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.publish(table_event(1));
        dispatcher.publish(Event::Custom(CustomEvent {
            name: "audit".into(),
            payload: "{}".into(),
        }));
        dispatcher.shutdown();

        assert_eq!(table_hits.load(Ordering::SeqCst), 1);
        assert_eq!(custom_hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_handler_error_does_not_stop_delivery() {
        let dispatcher = EventDispatcher::start(8).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));

        dispatcher.subscribe_table_modified(|_| Err("handler exploded".to_owned()));
        let h = Arc::clone(&hits);
        dispatcher.subscribe_table_modified(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        dispatcher.publish(table_event(1));
        dispatcher.publish(table_event(2));
        dispatcher.shutdown();
        assert_eq!(hits.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_publish_after_shutdown_is_dropped_quietly() {
        let dispatcher = EventDispatcher::start(2).unwrap();
        dispatcher.shutdown();
        dispatcher.publish(table_event(1));
    }
}
