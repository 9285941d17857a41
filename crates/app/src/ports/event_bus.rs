//! Event bus port: how engines announce what they did.
//!
//! Engine lifecycle events are informational. A full or stopped bus must
//! never fail the operation that produced the event, so engines go through
//! [`publish_or_log`](EventPublisher::publish_or_log) from a detached task.

use std::future::Future;

use simhub_domain::error::SimHubError;
use simhub_domain::event::Event;

/// Publishes events to interested subscribers.
pub trait EventPublisher {
    /// Publish an event to all current subscribers.
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), SimHubError>> + Send;

    /// Publish and swallow the failure, logging it at `debug`.
    fn publish_or_log(&self, event: Event) -> impl Future<Output = ()> + Send {
        let key = event.compound_key();
        let publish = self.publish(event);
        async move {
            if let Err(err) = publish.await {
                tracing::debug!(event = %key, error = %err, "event not published");
            }
        }
    }
}

impl<T: EventPublisher + Send + Sync> EventPublisher for std::sync::Arc<T> {
    fn publish(&self, event: Event) -> impl Future<Output = Result<(), SimHubError>> + Send {
        (**self).publish(event)
    }
}
