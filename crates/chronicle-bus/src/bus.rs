//! The event bus.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chronicle_core::error::DomainError;
use chronicle_core::event::Event;
use chronicle_core::store::EventPublisher;
use tokio::sync::{Notify, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::error::BusError;
use crate::handler::EventHandler;

/// Delivery counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BusStats {
    /// Handler invocations that returned `Ok`.
    pub delivered: u64,
    /// Handler invocations that returned an error or panicked.
    pub failed: u64,
    /// Deliveries queued or running.
    pub pending: u64,
    /// Deliveries that found their subscriber's queue full and waited in
    /// its backlog.
    pub backlogged: u64,
}

/// Routes events to subscribers by event type.
///
/// Cloning is cheap; all clones share the same subscription table.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

struct Inner {
    known_types: BTreeSet<String>,
    queue_capacity: usize,
    table: Mutex<Table>,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

#[derive(Default)]
struct Table {
    routes: HashMap<String, Vec<Route>>,
    names: HashSet<String>,
    workers: Vec<JoinHandle<()>>,
}

#[derive(Clone)]
struct Route {
    name: Arc<str>,
    queue: mpsc::Sender<Event>,
    backlog: Arc<Mutex<Backlog>>,
}

/// Events waiting for room in one subscriber's queue.
///
/// While `draining` is set, a drain task owns delivery into the queue and
/// every new event for this subscriber goes to the back of `events`.
#[derive(Default)]
struct Backlog {
    events: VecDeque<Event>,
    draining: bool,
}

enum Enqueued {
    Queued,
    Backlogged { spawn_drain: bool },
}

impl Route {
    fn backlog(&self) -> std::sync::MutexGuard<'_, Backlog> {
        self.backlog.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Hands `event` to the subscriber without waiting on its queue.
    fn enqueue(&self, event: Event) -> Result<Enqueued, BusError> {
        let mut backlog = self.backlog();
        if backlog.draining {
            backlog.events.push_back(event);
            return Ok(Enqueued::Backlogged { spawn_drain: false });
        }
        match self.queue.try_send(event) {
            Ok(()) => Ok(Enqueued::Queued),
            Err(mpsc::error::TrySendError::Full(event)) => {
                backlog.events.push_back(event);
                backlog.draining = true;
                Ok(Enqueued::Backlogged { spawn_drain: true })
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(BusError::Closed),
        }
    }
}

#[derive(Default)]
struct Shared {
    delivered: AtomicU64,
    failed: AtomicU64,
    pending: AtomicU64,
    backlogged: AtomicU64,
    idle: Notify,
}

impl Shared {
    fn finish_one(&self) {
        if self.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.idle.notify_waiters();
        }
    }
}

impl EventBus {
    /// Creates a bus accepting the given event type tags.
    ///
    /// `queue_capacity` bounds each subscriber's queue. Events published
    /// while a queue is full wait in that subscriber's backlog, so
    /// `publish` never waits on a slow handler.
    pub fn new<I, S>(known_types: I, queue_capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            inner: Arc::new(Inner {
                known_types: known_types.into_iter().map(Into::into).collect(),
                queue_capacity: queue_capacity.max(1),
                table: Mutex::new(Table::default()),
                shared: Arc::new(Shared::default()),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Whether `event_type` is accepted by this bus.
    #[must_use]
    pub fn knows(&self, event_type: &str) -> bool {
        self.inner.known_types.contains(event_type)
    }

    /// Registers `handler` under `name` for events of `event_type`.
    ///
    /// Spawns the subscriber's worker task, so this must be called from
    /// inside a tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns `BusError::UnknownEventType` for tags the bus does not know,
    /// `BusError::DuplicateSubscriber` if `name` is taken, and
    /// `BusError::Closed` after [`shutdown`](Self::shutdown).
    pub fn subscribe(
        &self,
        event_type: &str,
        name: &str,
        handler: Arc<dyn EventHandler>,
    ) -> Result<(), BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        if !self.knows(event_type) {
            return Err(BusError::UnknownEventType(event_type.to_owned()));
        }

        let mut table = self.table();
        if !table.names.insert(name.to_owned()) {
            return Err(BusError::DuplicateSubscriber(name.to_owned()));
        }

        let (queue, receiver) = mpsc::channel(self.inner.queue_capacity);
        let name: Arc<str> = Arc::from(name);
        let worker = tokio::spawn(run_worker(
            Arc::clone(&name),
            handler,
            receiver,
            Arc::clone(&self.inner.shared),
        ));
        table.workers.push(worker);
        table
            .routes
            .entry(event_type.to_owned())
            .or_default()
            .push(Route {
                name: Arc::clone(&name),
                queue,
                backlog: Arc::default(),
            });

        info!(event_type, subscriber = %name, "subscriber registered");
        Ok(())
    }

    /// Enqueues `event` for every subscriber of its type.
    ///
    /// Returns the number of subscribers the event was queued for.
    ///
    /// # Errors
    ///
    /// Returns `BusError::UnknownEventType` for unknown tags and
    /// `BusError::Closed` once the bus is shut down.
    pub async fn publish(&self, event: &Event) -> Result<usize, BusError> {
        if self.inner.closed.load(Ordering::SeqCst) {
            return Err(BusError::Closed);
        }
        if !self.knows(&event.event_type) {
            return Err(BusError::UnknownEventType(event.event_type.clone()));
        }

        let routes: Vec<Route> = self
            .table()
            .routes
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();

        let shared = &self.inner.shared;
        for route in &routes {
            shared.pending.fetch_add(1, Ordering::SeqCst);
            match route.enqueue(event.clone()) {
                Ok(Enqueued::Queued) => {
                    debug!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        subscriber = %route.name,
                        "event queued"
                    );
                }
                Ok(Enqueued::Backlogged { spawn_drain }) => {
                    shared.backlogged.fetch_add(1, Ordering::SeqCst);
                    debug!(
                        event_id = %event.event_id,
                        event_type = %event.event_type,
                        subscriber = %route.name,
                        "subscriber queue full, event backlogged"
                    );
                    if spawn_drain {
                        tokio::spawn(drain_backlog(route.clone(), Arc::clone(shared)));
                    }
                }
                Err(err) => {
                    shared.finish_one();
                    return Err(err);
                }
            }
        }
        Ok(routes.len())
    }

    /// Waits until every queued delivery has been processed.
    pub async fn flush(&self) {
        let shared = &self.inner.shared;
        loop {
            let idle = shared.idle.notified();
            if shared.pending.load(Ordering::SeqCst) == 0 {
                return;
            }
            idle.await;
        }
    }

    /// Stops accepting events, drains the queues, and joins the workers.
    pub async fn shutdown(&self) {
        if self.inner.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        let workers = {
            let mut table = self.table();
            // Dropping the senders lets each worker drain and exit.
            table.routes.clear();
            std::mem::take(&mut table.workers)
        };
        for worker in workers {
            if let Err(err) = worker.await {
                error!(error = %err, "bus worker terminated abnormally");
            }
        }
        info!("event bus shut down");
    }

    /// Current delivery counters.
    #[must_use]
    pub fn stats(&self) -> BusStats {
        let shared = &self.inner.shared;
        BusStats {
            delivered: shared.delivered.load(Ordering::SeqCst),
            failed: shared.failed.load(Ordering::SeqCst),
            pending: shared.pending.load(Ordering::SeqCst),
            backlogged: shared.backlogged.load(Ordering::SeqCst),
        }
    }

    /// Number of subscribers registered for `event_type`.
    #[must_use]
    pub fn subscriber_count(&self, event_type: &str) -> usize {
        self.table().routes.get(event_type).map_or(0, Vec::len)
    }

    fn table(&self) -> std::sync::MutexGuard<'_, Table> {
        // The table holds no invariant a panicking writer could break.
        self.inner.table.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("known_types", &self.inner.known_types.len())
            .field("queue_capacity", &self.inner.queue_capacity)
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

/// Moves one subscriber's backlog into its queue, oldest first.
async fn drain_backlog(route: Route, shared: Arc<Shared>) {
    loop {
        let next = {
            let mut backlog = route.backlog();
            match backlog.events.pop_front() {
                Some(event) => event,
                None => {
                    backlog.draining = false;
                    return;
                }
            }
        };
        if route.queue.send(next).await.is_err() {
            let abandoned = {
                let mut backlog = route.backlog();
                backlog.draining = false;
                std::mem::take(&mut backlog.events).len() + 1
            };
            warn!(
                subscriber = %route.name,
                abandoned,
                "subscriber worker gone, dropping backlog"
            );
            for _ in 0..abandoned {
                shared.failed.fetch_add(1, Ordering::SeqCst);
                shared.finish_one();
            }
            return;
        }
    }
}

async fn run_worker(
    name: Arc<str>,
    handler: Arc<dyn EventHandler>,
    mut queue: mpsc::Receiver<Event>,
    shared: Arc<Shared>,
) {
    while let Some(event) = queue.recv().await {
        let event_id = event.event_id;
        let event_type = event.event_type.clone();
        let handler = Arc::clone(&handler);

        // Each invocation runs in its own task so a panic is contained.
        let outcome = tokio::spawn(async move { handler.handle(&event).await }).await;
        match outcome {
            Ok(Ok(())) => {
                shared.delivered.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(err)) => {
                shared.failed.fetch_add(1, Ordering::SeqCst);
                error!(
                    subscriber = %name,
                    %event_id,
                    %event_type,
                    error = %err,
                    "event handler failed"
                );
            }
            Err(join_err) => {
                shared.failed.fetch_add(1, Ordering::SeqCst);
                error!(
                    subscriber = %name,
                    %event_id,
                    %event_type,
                    error = %join_err,
                    "event handler panicked"
                );
            }
        }
        shared.finish_one();
    }
    debug!(subscriber = %name, "bus worker stopped");
}

#[async_trait]
impl EventPublisher for EventBus {
    async fn publish(&self, event: &Event) -> Result<usize, DomainError> {
        EventBus::publish(self, event).await.map_err(DomainError::from)
    }
}
