//! In-process event bus: a bounded queue drained by one dispatch loop.
//!
//! Handlers subscribe under `"*"`, an event type (`"sensor"`) or a
//! `type.name` key (`"fault.scenario_triggered"`). For every event the loop
//! records history, drops expired events, then calls the matching handlers
//! by descending priority. Each call is isolated in its own task, bounded by
//! the handler timeout, so a panicking or hung handler never stalls the bus.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio_util::sync::CancellationToken;

use simhub_domain::error::{CapacityError, NotFoundError, SimHubError};
use simhub_domain::event::{Event, EventFilter, EventType, WILDCARD};
use simhub_domain::id::HandlerId;
use simhub_domain::time::now;

use crate::config::EventBusConfig;
use crate::ports::EventPublisher;
use crate::runtime::{Lifecycle, lock, read, write};

/// Future returned by a handler callback.
pub type HandlerFuture = Pin<Box<dyn Future<Output = ()> + Send>>;

type Callback = Arc<dyn Fn(Event) -> HandlerFuture + Send + Sync>;

/// How the dispatch loop runs a handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// Awaited on the dispatch loop before the next handler runs.
    Inline,
    /// Detached; the loop moves on immediately.
    Spawned,
}

/// A subscription callback with its routing metadata.
#[derive(Clone)]
pub struct EventHandler {
    pub id: HandlerId,
    pub name: String,
    pub filter: EventFilter,
    pub priority: i32,
    pub dispatch: Dispatch,
    callback: Callback,
}

impl EventHandler {
    /// A handler run in order on the dispatch loop.
    pub fn sync<F>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let callback = Arc::new(callback);
        Self::with_callback(
            name,
            Dispatch::Inline,
            Arc::new(move |event: Event| {
                let callback = Arc::clone(&callback);
                Box::pin(async move { callback(&event) }) as HandlerFuture
            }),
        )
    }

    /// A handler detached from the dispatch loop.
    pub fn spawned<F, Fut>(name: impl Into<String>, callback: F) -> Self
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        Self::with_callback(
            name,
            Dispatch::Spawned,
            Arc::new(move |event: Event| Box::pin(callback(event)) as HandlerFuture),
        )
    }

    fn with_callback(name: impl Into<String>, dispatch: Dispatch, callback: Callback) -> Self {
        Self {
            id: HandlerId::new(),
            name: name.into(),
            filter: EventFilter::default(),
            priority: 0,
            dispatch,
            callback,
        }
    }

    /// Override how the dispatch loop runs this handler.
    #[must_use]
    pub fn with_dispatch(mut self, dispatch: Dispatch) -> Self {
        self.dispatch = dispatch;
        self
    }

    #[must_use]
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: EventFilter) -> Self {
        self.filter = filter;
        self
    }
}

impl std::fmt::Debug for EventHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHandler")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("priority", &self.priority)
            .field("dispatch", &self.dispatch)
            .finish_non_exhaustive()
    }
}

/// Snapshot of the bus counters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BusStatistics {
    pub published: u64,
    pub dispatched: u64,
    pub expired: u64,
    /// Publishes refused because the queue stayed full.
    pub rejected: u64,
    pub handler_invocations: u64,
    pub handler_timeouts: u64,
    pub handler_panics: u64,
    pub queue_depth: usize,
    pub history_len: usize,
    pub subscriptions: usize,
}

#[derive(Debug, Default)]
struct Counters {
    published: AtomicU64,
    dispatched: AtomicU64,
    expired: AtomicU64,
    rejected: AtomicU64,
    handler_invocations: AtomicU64,
    handler_timeouts: AtomicU64,
    handler_panics: AtomicU64,
}

fn bump(counter: &AtomicU64) {
    counter.fetch_add(1, Ordering::Relaxed);
}

struct Inner {
    config: EventBusConfig,
    sender: mpsc::Sender<Event>,
    receiver: Mutex<Option<mpsc::Receiver<Event>>>,
    handlers: RwLock<HashMap<String, Vec<EventHandler>>>,
    history: Mutex<VecDeque<Event>>,
    counters: Counters,
    lifecycle: Lifecycle,
}

/// Process-wide publish/subscribe dispatcher. Clones share the same bus.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<Inner>,
}

impl EventBus {
    #[must_use]
    pub fn new(config: EventBusConfig) -> Self {
        let (sender, receiver) = mpsc::channel(config.queue_size.max(1));
        Self {
            inner: Arc::new(Inner {
                config,
                sender,
                receiver: Mutex::new(Some(receiver)),
                handlers: RwLock::new(HashMap::new()),
                history: Mutex::new(VecDeque::new()),
                counters: Counters::default(),
                lifecycle: Lifecycle::default(),
            }),
        }
    }

    /// Spawn the dispatch loop. A bus runs once: starting it again after
    /// [`stop`](Self::stop) is a no-op.
    pub fn start(&self) {
        let Some(receiver) = lock(&self.inner.receiver).take() else {
            tracing::warn!("event bus already started");
            return;
        };
        let Some(cancel) = self.inner.lifecycle.begin() else {
            return;
        };
        let inner = Arc::clone(&self.inner);
        tokio::spawn(inner.dispatch_loop(receiver, cancel));
        tracing::info!(
            queue_size = self.inner.config.queue_size,
            history_size = self.inner.config.history_size,
            "event bus started"
        );
    }

    /// Stop the dispatch loop. Events still queued are discarded.
    pub fn stop(&self) {
        if self.inner.lifecycle.end() {
            tracing::info!("event bus stopped");
        }
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.lifecycle.is_running()
    }

    /// Enqueue an event, waiting at most `publish_timeout` for room.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::BusStopped`] when the bus is not running and
    /// [`CapacityError::QueueFull`] when the queue stays full.
    pub async fn publish(&self, event: Event) -> Result<(), SimHubError> {
        if !self.is_running() {
            return Err(SimHubError::BusStopped);
        }
        let key = event.compound_key();
        match self
            .inner
            .sender
            .send_timeout(event, self.inner.config.publish_timeout)
            .await
        {
            Ok(()) => {
                bump(&self.inner.counters.published);
                Ok(())
            }
            Err(SendTimeoutError::Timeout(_)) => {
                bump(&self.inner.counters.rejected);
                tracing::warn!(event = %key, "event queue full, publish rejected");
                Err(CapacityError::QueueFull.into())
            }
            Err(SendTimeoutError::Closed(_)) => Err(SimHubError::BusStopped),
        }
    }

    /// Register `handler` under `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] when the pattern names no event type.
    pub fn subscribe(&self, pattern: &str, handler: EventHandler) -> Result<HandlerId, SimHubError> {
        if pattern != WILDCARD {
            let event_type = pattern.split_once('.').map_or(pattern, |(t, _)| t);
            event_type.parse::<EventType>()?;
        }
        let id = handler.id;
        tracing::debug!(pattern, handler = %handler.name, priority = handler.priority, "handler subscribed");
        write(&self.inner.handlers)
            .entry(pattern.to_string())
            .or_default()
            .push(handler);
        Ok(id)
    }

    /// Remove the handler registered as `handler_id` under `pattern`.
    ///
    /// # Errors
    ///
    /// Returns [`SimHubError::NotFound`] when no such subscription exists.
    pub fn unsubscribe(&self, pattern: &str, handler_id: HandlerId) -> Result<(), SimHubError> {
        let mut handlers = write(&self.inner.handlers);
        let list = handlers.get_mut(pattern);
        let position = list
            .as_ref()
            .and_then(|list| list.iter().position(|h| h.id == handler_id));
        match (list, position) {
            (Some(list), Some(position)) => {
                list.remove(position);
                if list.is_empty() {
                    handlers.remove(pattern);
                }
                Ok(())
            }
            _ => Err(NotFoundError {
                entity: "EventHandler",
                id: format!("{pattern}/{handler_id}"),
            }
            .into()),
        }
    }

    /// The most recent `limit` events, oldest first.
    #[must_use]
    pub fn history(&self, limit: usize) -> Vec<Event> {
        let history = lock(&self.inner.history);
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    #[must_use]
    pub fn statistics(&self) -> BusStatistics {
        let c = &self.inner.counters;
        BusStatistics {
            published: c.published.load(Ordering::Relaxed),
            dispatched: c.dispatched.load(Ordering::Relaxed),
            expired: c.expired.load(Ordering::Relaxed),
            rejected: c.rejected.load(Ordering::Relaxed),
            handler_invocations: c.handler_invocations.load(Ordering::Relaxed),
            handler_timeouts: c.handler_timeouts.load(Ordering::Relaxed),
            handler_panics: c.handler_panics.load(Ordering::Relaxed),
            queue_depth: self.inner.sender.max_capacity() - self.inner.sender.capacity(),
            history_len: lock(&self.inner.history).len(),
            subscriptions: read(&self.inner.handlers).values().map(Vec::len).sum(),
        }
    }
}

impl EventPublisher for EventBus {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), SimHubError>> + Send {
        EventBus::publish(self, event)
    }
}

impl Inner {
    async fn dispatch_loop(self: Arc<Self>, mut receiver: mpsc::Receiver<Event>, cancel: CancellationToken) {
        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = receiver.recv() => match event {
                    Some(event) => self.dispatch(event).await,
                    None => break,
                },
            }
        }
        tracing::debug!("event bus dispatch loop exited");
    }

    async fn dispatch(self: &Arc<Self>, event: Event) {
        self.remember(&event);
        if event.is_expired(now()) {
            bump(&self.counters.expired);
            tracing::debug!(event = %event.compound_key(), "expired event dropped");
            return;
        }
        bump(&self.counters.dispatched);

        for handler in self.matching(&event) {
            bump(&self.counters.handler_invocations);
            match handler.dispatch {
                Dispatch::Inline => Arc::clone(self).invoke(handler, event.clone()).await,
                Dispatch::Spawned => {
                    tokio::spawn(Arc::clone(self).invoke(handler, event.clone()));
                }
            }
        }
    }

    fn remember(&self, event: &Event) {
        let mut history = lock(&self.history);
        history.push_back(event.clone());
        while history.len() > self.config.history_size {
            history.pop_front();
        }
    }

    /// Handlers under `*`, the type and the `type.name` key that pass their
    /// filter, by descending priority, registration order on ties.
    fn matching(&self, event: &Event) -> Vec<EventHandler> {
        let handlers = read(&self.handlers);
        let keys = [
            WILDCARD.to_string(),
            event.event_type.as_str().to_string(),
            event.compound_key(),
        ];
        let mut matched: Vec<EventHandler> = keys
            .iter()
            .filter_map(|key| handlers.get(key))
            .flatten()
            .filter(|h| h.filter.matches(event))
            .cloned()
            .collect();
        matched.sort_by_key(|h| std::cmp::Reverse(h.priority));
        matched
    }

    async fn invoke(self: Arc<Self>, handler: EventHandler, event: Event) {
        let key = event.compound_key();
        let call = tokio::spawn((handler.callback)(event));
        match tokio::time::timeout(self.config.handler_timeout, call).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) if err.is_panic() => {
                bump(&self.counters.handler_panics);
                tracing::error!(handler = %handler.name, event = %key, "event handler panicked");
            }
            Ok(Err(_)) => {}
            Err(_) => {
                bump(&self.counters.handler_timeouts);
                tracing::warn!(
                    handler = %handler.name,
                    event = %key,
                    timeout = ?self.config.handler_timeout,
                    "event handler timed out"
                );
            }
        }
    }
}
