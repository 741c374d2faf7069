//! Collaborator traits for fetching and subscribing, plus a mock.

use crate::error::{ClientError, ClientResult};
use ogre_core::{GraphUpdate, TypeDomain};
use ogre_protocol::RequestTarget;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Receives each item of a subscription stream.
///
/// Called with `Ok` for every update and at most once with `Err` when the
/// stream fails or the server closes it. Not called after a local close.
pub type UpdateSink = Box<dyn FnMut(ClientResult<GraphUpdate>) + Send>;

/// Blocking one-shot fetches against a replication server.
pub trait ReplicaTransport: Send + Sync {
    /// Fetches the schema of a type domain.
    fn fetch_type_domain(&self, type_domain_id: &str) -> ClientResult<TypeDomain>;

    /// Fetches the full current contents of an object graph.
    fn fetch_snapshot(&self, target: &RequestTarget) -> ClientResult<GraphUpdate>;
}

/// Opens live update streams.
pub trait UpdateSubscriber: Send + Sync {
    /// Subscribes to updates of one object graph. The sink runs on a thread
    /// owned by the subscription.
    fn subscribe(
        &self,
        target: &RequestTarget,
        sink: UpdateSink,
    ) -> ClientResult<Box<dyn Subscription>>;
}

/// A live update stream. Dropping it closes the stream.
pub trait Subscription: Send {
    /// Stops the stream; the sink is not called again.
    fn close(&mut self);

    /// Whether the stream is still delivering.
    fn is_active(&self) -> bool;
}

/// An in-process transport for testing.
///
/// Serves canned type domains and snapshots, and lets the test push
/// updates to every open subscription synchronously.
#[derive(Default)]
pub struct MockTransport {
    domains: Mutex<HashMap<String, TypeDomain>>,
    snapshots: Mutex<HashMap<RequestTarget, GraphUpdate>>,
    sinks: Arc<Mutex<Vec<(RequestTarget, Arc<AtomicBool>, UpdateSink)>>>,
    fail_subscribe: AtomicBool,
}

impl MockTransport {
    /// Creates an empty mock transport.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serves a type domain.
    pub fn set_type_domain(&self, domain: TypeDomain) {
        self.domains.lock().insert(domain.id().to_string(), domain);
    }

    /// Serves a snapshot under the target named by the update.
    pub fn set_snapshot(&self, snapshot: GraphUpdate) {
        let target = RequestTarget::new(&snapshot.type_domain_id, &snapshot.object_graph_id);
        self.snapshots.lock().insert(target, snapshot);
    }

    /// Makes subsequent `subscribe` calls fail.
    pub fn set_fail_subscribe(&self, fail: bool) {
        self.fail_subscribe.store(fail, Ordering::SeqCst);
    }

    /// Delivers an update to every open subscription on its target.
    pub fn push(&self, update: GraphUpdate) {
        let mut sinks = self.sinks.lock();
        for (target, active, sink) in sinks.iter_mut() {
            if active.load(Ordering::SeqCst)
                && target.type_domain_id == update.type_domain_id
                && target.object_graph_id == update.object_graph_id
            {
                sink(Ok(update.clone()));
            }
        }
    }

    /// Ends every open subscription as if the server had closed them.
    pub fn disconnect_all(&self) {
        let mut sinks = self.sinks.lock();
        for (_, active, sink) in sinks.iter_mut() {
            if active.swap(false, Ordering::SeqCst) {
                sink(Err(ClientError::SubscriptionClosed));
            }
        }
    }

    /// Number of subscriptions that are still open.
    pub fn active_subscriptions(&self) -> usize {
        self.sinks
            .lock()
            .iter()
            .filter(|(_, active, _)| active.load(Ordering::SeqCst))
            .count()
    }
}

impl ReplicaTransport for MockTransport {
    fn fetch_type_domain(&self, type_domain_id: &str) -> ClientResult<TypeDomain> {
        self.domains
            .lock()
            .get(type_domain_id)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("type domain '{type_domain_id}'")))
    }

    fn fetch_snapshot(&self, target: &RequestTarget) -> ClientResult<GraphUpdate> {
        self.snapshots
            .lock()
            .get(target)
            .cloned()
            .ok_or_else(|| ClientError::NotFound(format!("object graph '{target}'")))
    }
}

impl UpdateSubscriber for MockTransport {
    fn subscribe(
        &self,
        target: &RequestTarget,
        sink: UpdateSink,
    ) -> ClientResult<Box<dyn Subscription>> {
        if self.fail_subscribe.load(Ordering::SeqCst) {
            return Err(ClientError::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionRefused,
                "mock subscribe failure",
            )));
        }
        let active = Arc::new(AtomicBool::new(true));
        self.sinks
            .lock()
            .push((target.clone(), Arc::clone(&active), sink));
        Ok(Box::new(MockSubscription { active }))
    }
}

struct MockSubscription {
    active: Arc<AtomicBool>,
}

impl Subscription for MockSubscription {
    fn close(&mut self) {
        self.active.store(false, Ordering::SeqCst);
    }

    fn is_active(&self) -> bool {
        self.active.load(Ordering::SeqCst)
    }
}

impl Drop for MockSubscription {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ogre_core::TypeDomainDef;

    #[test]
    fn mock_fetches() {
        let transport = MockTransport::new();
        transport.set_type_domain(TypeDomainDef::new("social").build().unwrap());
        transport.set_snapshot(GraphUpdate::new("social", "main").with_version(3, 1));

        assert_eq!(transport.fetch_type_domain("social").unwrap().id(), "social");
        assert!(transport.fetch_type_domain("other").unwrap_err().is_not_found());

        let snapshot = transport
            .fetch_snapshot(&RequestTarget::new("social", "main"))
            .unwrap();
        assert_eq!(snapshot.data_version, 3);
        assert!(transport
            .fetch_snapshot(&RequestTarget::new("social", "x"))
            .unwrap_err()
            .is_not_found());
    }

    #[test]
    fn mock_push_reaches_open_subscriptions_only() {
        let transport = MockTransport::new();
        let received = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&received);
        let mut subscription = transport
            .subscribe(
                &RequestTarget::new("social", "main"),
                Box::new(move |item| sink.lock().push(item.map(|u| u.data_version).ok())),
            )
            .unwrap();

        transport.push(GraphUpdate::new("social", "main").with_version(1, 1));
        transport.push(GraphUpdate::new("social", "other").with_version(2, 1));
        assert_eq!(*received.lock(), vec![Some(1)]);

        subscription.close();
        assert!(!subscription.is_active());
        transport.push(GraphUpdate::new("social", "main").with_version(3, 1));
        assert_eq!(received.lock().len(), 1);
        assert_eq!(transport.active_subscriptions(), 0);
    }

    #[test]
    fn mock_disconnect_reports_closed_once() {
        let transport = MockTransport::new();
        let errors = Arc::new(Mutex::new(0));
        let sink = Arc::clone(&errors);
        let _subscription = transport
            .subscribe(
                &RequestTarget::new("d", "g"),
                Box::new(move |item| {
                    if matches!(item, Err(ClientError::SubscriptionClosed)) {
                        *sink.lock() += 1;
                    }
                }),
            )
            .unwrap();

        transport.disconnect_all();
        transport.disconnect_all();
        assert_eq!(*errors.lock(), 1);
    }
}
