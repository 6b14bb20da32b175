use std::sync::Arc;

use serde_json::Value;
use tracing::debug;

use swq_core::{Message, MessageId, StoreResult};
use swq_storage::Store;

/// Topic-addressed point-to-point and broadcast messaging between agents.
///
/// Delivery is at-most-once per message record: `receive` is a destructive
/// read, and a broadcast is a single consumable copy shared by all
/// recipients, so whichever agent polls first takes it for everyone. A
/// per-recipient fanout would be the more intuitive broadcast semantic;
/// the single-copy behavior is kept deliberately for compatibility.
pub struct MessageBus {
    store: Arc<dyn Store>,
}

impl MessageBus {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Send to one agent, or to everyone when `to` is `None`. No delivery
    /// confirmation; messages toward the same recipient arrive in send
    /// order.
    pub fn send(
        &self,
        from: &str,
        to: Option<&str>,
        topic: &str,
        payload: Value,
    ) -> StoreResult<MessageId> {
        let id = self.store.send_message(from, to, topic, payload)?;
        debug!(message_id = id, from, to = to.unwrap_or("*"), topic, "message sent");
        Ok(id)
    }

    /// Drain every unconsumed message visible to this agent (direct or
    /// broadcast), oldest first, optionally filtered by topic.
    pub fn receive(&self, agent_id: &str, topic: Option<&str>) -> StoreResult<Vec<Message>> {
        self.store.receive_messages(agent_id, topic)
    }

    /// How many unconsumed messages are waiting; never consumes.
    pub fn unread(&self, agent_id: &str) -> StoreResult<u64> {
        self.store.unread_count(agent_id)
    }
}
