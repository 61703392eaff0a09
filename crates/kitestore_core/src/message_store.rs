//! Message store contract of the relational backend.
//!
//! The broker can keep message metadata in a relational store instead of
//! the snapshot engine. That backend does not share ids or ordering with
//! [`crate::SnapshotStore`]; each call is independently durable. Only the
//! contract lives here, together with an in-memory implementation used by
//! tests and embedded deployments.

use crate::error::CoreResult;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// A message as stored by a [`MessageStore`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MessageEntity {
    /// Producer-assigned unique id.
    pub message_id: String,
    /// Topic the message was published to.
    pub topic: String,
    /// Message type tag (bytes or string message).
    pub message_type: u8,
    /// Broker node that owns delivery.
    pub kite_server: String,
    /// Unix seconds after which the message is no longer delivered.
    pub expired_time: i64,
    /// Unix seconds of the next delivery attempt.
    pub next_delivery_time: i64,
    /// Delivery attempts so far.
    pub deliver_count: u32,
    /// Delivery attempts allowed.
    pub deliver_limit: u32,
    /// Whether the producer committed the message.
    pub commit: bool,
    /// Message body. Empty in page query results.
    pub body: Vec<u8>,
}

/// Selects messages due for redelivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFilter {
    /// Only messages owned by this broker node.
    pub kite_server: String,
    /// Current Unix seconds; expired messages are skipped.
    pub now: i64,
    /// Only messages whose next delivery is at or before this time.
    pub next_delivery_time: i64,
}

impl PageFilter {
    fn matches(&self, entity: &MessageEntity) -> bool {
        entity.kite_server == self.kite_server
            && entity.expired_time >= self.now
            && entity.next_delivery_time <= self.next_delivery_time
            && entity.deliver_count < entity.deliver_limit
    }
}

/// Persistent message metadata keyed by message id.
pub trait MessageStore: Send + Sync {
    /// Stores a new message. Returns `false` if the id already exists.
    fn save(&self, entity: MessageEntity) -> CoreResult<bool>;

    /// Returns the message with `message_id`, body included.
    fn query(&self, message_id: &str) -> CoreResult<Option<MessageEntity>>;

    /// Marks a message committed. Returns `false` if it does not exist.
    fn commit(&self, message_id: &str) -> CoreResult<bool>;

    /// Returns up to `limit` matching messages starting at offset `start`,
    /// ordered by next delivery time, without bodies.
    ///
    /// The flag reports whether more matches follow the page.
    fn page_query(
        &self,
        filter: &PageFilter,
        start: usize,
        limit: usize,
    ) -> CoreResult<(bool, Vec<MessageEntity>)>;

    /// Removes a message. Returns `false` if it does not exist.
    fn delete(&self, message_id: &str) -> CoreResult<bool>;
}

/// [`MessageStore`] over an in-memory ordered map.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: RwLock<BTreeMap<String, MessageEntity>>,
}

impl InMemoryMessageStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of stored messages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.read().len()
    }

    /// Returns whether the store is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.read().is_empty()
    }
}

impl MessageStore for InMemoryMessageStore {
    fn save(&self, entity: MessageEntity) -> CoreResult<bool> {
        let mut messages = self.messages.write();
        if messages.contains_key(&entity.message_id) {
            return Ok(false);
        }
        messages.insert(entity.message_id.clone(), entity);
        Ok(true)
    }

    fn query(&self, message_id: &str) -> CoreResult<Option<MessageEntity>> {
        Ok(self.messages.read().get(message_id).cloned())
    }

    fn commit(&self, message_id: &str) -> CoreResult<bool> {
        Ok(self
            .messages
            .write()
            .get_mut(message_id)
            .map(|entity| entity.commit = true)
            .is_some())
    }

    fn page_query(
        &self,
        filter: &PageFilter,
        start: usize,
        limit: usize,
    ) -> CoreResult<(bool, Vec<MessageEntity>)> {
        let messages = self.messages.read();
        let mut matched: Vec<&MessageEntity> =
            messages.values().filter(|e| filter.matches(e)).collect();
        matched.sort_by(|a, b| {
            a.next_delivery_time
                .cmp(&b.next_delivery_time)
                .then_with(|| a.message_id.cmp(&b.message_id))
        });

        // One extra row tells whether another page exists.
        let mut page: Vec<MessageEntity> = matched
            .into_iter()
            .skip(start)
            .take(limit.saturating_add(1))
            .map(|e| MessageEntity {
                body: Vec::new(),
                ..e.clone()
            })
            .collect();

        let has_more = page.len() > limit;
        page.truncate(limit);
        Ok((has_more, page))
    }

    fn delete(&self, message_id: &str) -> CoreResult<bool> {
        Ok(self.messages.write().remove(message_id).is_some())
    }
}
