//! Gossip pub/sub over the overlay
//!
//! Subscriptions are local handler registrations. A publication floods to
//! the closest known contacts as a PUBLISH RPC with a hop TTL; receivers
//! deduplicate by publication id, deliver to their local subscriber, and
//! relay the remainder of the TTL. Publications are not delivered to the
//! publisher itself.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::future::BoxFuture;
use lru::LruCache;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::net::overlay::Overlay;
use crate::rpc::{Ack, Method, PublishParams};
use crate::types::{Contact, NodeId};

/// Publication ids remembered for deduplication.
const SEEN_CACHE_CAP: usize = 4096;

/// Handler invoked for each publication delivered on a subscribed topic.
pub type TopicHandler = Arc<dyn Fn(Value) -> BoxFuture<'static, ()> + Send + Sync>;

pub struct Topics {
    overlay: Arc<Overlay>,
    handlers: RwLock<HashMap<String, TopicHandler>>,
    seen: Mutex<LruCache<String, ()>>,
    ttl: u32,
    fanout: usize,
}

impl Topics {
    pub fn new(overlay: Arc<Overlay>, ttl: u32, fanout: usize) -> Self {
        Self {
            overlay,
            handlers: RwLock::new(HashMap::new()),
            seen: Mutex::new(LruCache::new(
                NonZeroUsize::new(SEEN_CACHE_CAP).expect("cache capacity is nonzero"),
            )),
            ttl,
            fanout,
        }
    }

    /// Register the handler for a topic, replacing any previous one.
    pub fn subscribe(&self, topic: impl Into<String>, handler: TopicHandler) {
        self.handlers.write().insert(topic.into(), handler);
    }

    /// Publish to the network. Returns how many contacts accepted the
    /// publication; zero means nobody was reachable.
    pub async fn publish(&self, topic: &str, contents: Value) -> Result<usize> {
        let publication_id = Uuid::new_v4().to_string();
        // Never re-deliver our own publication when it gossips back.
        self.seen.lock().put(publication_id.clone(), ());
        let params = PublishParams {
            topic: topic.to_string(),
            publication_id,
            ttl: self.ttl,
            contents,
            contact: self.overlay.local_contact(),
        };
        Ok(self.relay(&params, None).await)
    }

    /// Inbound PUBLISH: deduplicate, deliver locally, relay onward.
    pub async fn handle_publish(&self, params: PublishParams, sender: &Contact) -> Result<Ack> {
        if self.seen.lock().put(params.publication_id.clone(), ()).is_some() {
            return Ok(Ack {});
        }

        if let Some(handler) = self.handlers.read().get(&params.topic).cloned() {
            let contents = params.contents.clone();
            tokio::spawn(async move { handler(contents).await });
        }

        if params.ttl > 1 {
            let mut relayed = params.clone();
            relayed.ttl -= 1;
            relayed.contact = self.overlay.local_contact();
            let exclude = sender.node_id;
            let overlay = self.overlay.clone();
            let fanout = self.fanout;
            tokio::spawn(async move {
                relay(&overlay, fanout, &relayed, Some(exclude)).await;
            });
        }
        Ok(Ack {})
    }

    async fn relay(&self, params: &PublishParams, exclude: Option<NodeId>) -> usize {
        relay(&self.overlay, self.fanout, params, exclude).await
    }
}

/// Forward a publication to the closest known contacts, skipping the one
/// it arrived from.
async fn relay(
    overlay: &Overlay,
    fanout: usize,
    params: &PublishParams,
    exclude: Option<NodeId>,
) -> usize {
    let targets: Vec<Contact> = overlay
        .table()
        .closest(&overlay.local_id(), fanout * 2)
        .into_iter()
        .filter(|c| Some(c.node_id) != exclude)
        .take(fanout)
        .collect();

    let mut delivered = 0;
    for target in targets {
        match overlay.call::<_, Ack>(&target, Method::Publish, params).await {
            Ok(_) => delivered += 1,
            Err(e) => debug!(peer = %target.node_id, error = %e, "publish relay failed"),
        }
    }
    delivered
}

impl std::fmt::Debug for Topics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Topics({} subscribed)", self.handlers.read().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::KeyPair;
    use crate::metrics::NodeMetrics;
    use crate::rpc::MessageAuth;
    use crate::types::NodeId;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn topics() -> Topics {
        let keys = Arc::new(KeyPair::generate());
        let auth = Arc::new(MessageAuth::new(
            keys.clone(),
            15_000,
            Arc::new(NodeMetrics::new()),
        ));
        let contact = Contact::new("127.0.0.1", 0, keys.node_id());
        let overlay = Arc::new(Overlay::new(contact, auth, Duration::from_secs(1)));
        Topics::new(overlay, 3, 6)
    }

    fn publish_params(topic: &str, id: &str, ttl: u32) -> PublishParams {
        PublishParams {
            topic: topic.into(),
            publication_id: id.into(),
            ttl,
            contents: Value::from("payload"),
            contact: Contact::new("127.0.0.1", 4001, NodeId::from_bytes([9u8; 20])),
        }
    }

    #[tokio::test]
    async fn test_delivery_to_subscriber() {
        let topics = topics();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        topics.subscribe(
            "contract-v1",
            Arc::new(move |_contents| -> futures::future::BoxFuture<'static, ()> {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        let sender = publish_params("contract-v1", "pub-1", 1).contact.clone();
        topics
            .handle_publish(publish_params("contract-v1", "pub-1", 1), &sender)
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_duplicate_publication_delivered_once() {
        let topics = topics();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();
        topics.subscribe(
            "contract-v1",
            Arc::new(move |_contents| -> futures::future::BoxFuture<'static, ()> {
                let counter = counter.clone();
                Box::pin(async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
            }),
        );

        let params = publish_params("contract-v1", "pub-dup", 1);
        let sender = params.contact.clone();
        topics.handle_publish(params.clone(), &sender).await.unwrap();
        topics.handle_publish(params, &sender).await.unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_unsubscribed_topic_ignored() {
        let topics = topics();
        let params = publish_params("other-topic", "pub-2", 1);
        let sender = params.contact.clone();
        // No handler registered; still acknowledged for the gossip.
        topics.handle_publish(params, &sender).await.unwrap();
    }

    #[tokio::test]
    async fn test_publish_with_empty_table_reaches_nobody() {
        let topics = topics();
        let delivered = topics
            .publish("contract-v1", Value::from("contract"))
            .await
            .unwrap();
        assert_eq!(delivered, 0);
    }
}
