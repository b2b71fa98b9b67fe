use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use tg_core::ingest::incomplete_reason;
use tg_core::{ChatId, MessageEnvelope};

type MessageKey = (ChatId, i64);

#[derive(Default)]
struct Inner {
    messages: HashMap<MessageKey, MessageEnvelope>,
    order: VecDeque<MessageKey>,
    /// 首次出现时结构不完整的消息，后续编辑视为补全后的副本
    pending: HashSet<MessageKey>,
}

/// 有界的本地消息缓存，按插入顺序淘汰
pub struct MessageStore {
    capacity: usize,
    inner: Mutex<Inner>,
}

impl MessageStore {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn insert(&self, envelope: MessageEnvelope) {
        let key = (envelope.source_chat(), envelope.id);
        let mut inner = match self.inner.lock() {
            Ok(inner) => inner,
            Err(poisoned) => poisoned.into_inner(),
        };

        if incomplete_reason(&envelope).is_some() {
            inner.pending.insert(key);
        }
        if inner.messages.insert(key, envelope).is_none() {
            inner.order.push_back(key);
        }
        while inner.order.len() > self.capacity {
            if let Some(oldest) = inner.order.pop_front() {
                inner.messages.remove(&oldest);
                inner.pending.remove(&oldest);
            }
        }
    }

    pub fn get(&self, chat: ChatId, message_id: i64) -> Option<MessageEnvelope> {
        let inner = self.inner.lock().ok()?;
        inner.messages.get(&(chat, message_id)).cloned()
    }

    /// 消息曾以不完整状态出现过，返回后清除标记
    pub fn take_pending(&self, chat: ChatId, message_id: i64) -> bool {
        match self.inner.lock() {
            Ok(mut inner) => inner.pending.remove(&(chat, message_id)),
            Err(_) => false,
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|inner| inner.order.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
