//! Fan-out of updates to subscribe connections.

use crate::engine::UpdatePublisher;
use ogre_core::GraphUpdate;
use ogre_protocol::{frame, MessageCodec, RequestTarget, WireMessage};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, trace};

/// A framed envelope shared by every subscriber it is queued for.
pub type Frame = Arc<[u8]>;

struct Subscriber {
    id: u64,
    target: RequestTarget,
    queue: mpsc::UnboundedSender<Frame>,
}

/// Keeps one outbound queue per subscribe connection.
///
/// Queues are unbounded: a slow consumer grows its queue without limit
/// rather than slowing down the data source.
pub struct SubscriptionHub {
    codec: Arc<dyn MessageCodec>,
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
}

impl SubscriptionHub {
    /// Creates a hub that frames updates with `codec`.
    pub fn new(codec: Arc<dyn MessageCodec>) -> Self {
        Self {
            codec,
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// The codec used for framing.
    pub fn codec(&self) -> &Arc<dyn MessageCodec> {
        &self.codec
    }

    /// Registers a subscriber and returns its id and queue.
    pub fn subscribe(&self, target: RequestTarget) -> (u64, mpsc::UnboundedReceiver<Frame>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (queue, receiver) = mpsc::unbounded_channel();
        debug!(subscriber = id, target = %target, "subscriber registered");
        self.subscribers.lock().push(Subscriber { id, target, queue });
        (id, receiver)
    }

    /// Removes a subscriber. Unknown ids are ignored.
    pub fn unsubscribe(&self, id: u64) {
        let mut subscribers = self.subscribers.lock();
        let before = subscribers.len();
        subscribers.retain(|s| s.id != id);
        if subscribers.len() != before {
            debug!(subscriber = id, "subscriber removed");
        }
    }

    /// Number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    /// Drops every subscriber, ending their streams.
    pub fn close_all(&self) {
        self.subscribers.lock().clear();
    }
}

impl UpdatePublisher for SubscriptionHub {
    fn publish(&self, update: &GraphUpdate) {
        let mut subscribers = self.subscribers.lock();
        if !subscribers
            .iter()
            .any(|s| matches_target(&s.target, update))
        {
            return;
        }

        let encoded: Frame = match frame(self.codec.as_ref(), &WireMessage::Update(update.clone())) {
            Ok(bytes) => bytes.into(),
            Err(e) => {
                error!(error = %e, version = update.data_version, "failed to encode update");
                return;
            }
        };

        subscribers.retain(|s| {
            if !matches_target(&s.target, update) {
                return true;
            }
            // A closed receiver means the connection task has gone.
            let alive = s.queue.send(Arc::clone(&encoded)).is_ok();
            if !alive {
                debug!(subscriber = s.id, "dropping closed subscriber");
            }
            alive
        });
        trace!(
            object_graph = %update.object_graph_id,
            version = update.data_version,
            bytes = encoded.len(),
            "update queued"
        );
    }
}

fn matches_target(target: &RequestTarget, update: &GraphUpdate) -> bool {
    target.type_domain_id == update.type_domain_id
        && target.object_graph_id == update.object_graph_id
}
