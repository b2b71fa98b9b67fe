use std::collections::VecDeque;
use std::time::Duration;
use tokio::time::Instant;

use crate::model::{ChatId, MessageEnvelope};

pub const LEDGER_CAPACITY: usize = 200;

/// 事件的稳定标识，重新拉取的同一条消息得到相同的 key
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKey {
    Outgoing {
        chat: ChatId,
        date: i64,
        text: String,
    },
    Incoming {
        author: ChatId,
        chat: ChatId,
        message_id: i64,
    },
    Album {
        author: ChatId,
        chat: ChatId,
        group_id: i64,
    },
}

impl EventKey {
    pub fn for_message(envelope: &MessageEnvelope) -> Self {
        if envelope.outgoing {
            EventKey::Outgoing {
                chat: envelope.source_chat(),
                date: envelope.date,
                text: envelope.text.clone(),
            }
        } else {
            EventKey::Incoming {
                author: envelope.author_id(),
                chat: envelope.source_chat(),
                message_id: envelope.id,
            }
        }
    }

    pub fn for_album(first: &MessageEnvelope, group_id: i64) -> Self {
        EventKey::Album {
            author: first.author_id(),
            chat: first.source_chat(),
            group_id,
        }
    }
}

/// 最近已分发事件的有序记录，按时间窗口与数量双重裁剪
pub struct DedupLedger {
    window: Duration,
    capacity: usize,
    entries: VecDeque<(EventKey, Instant)>,
}

impl DedupLedger {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            capacity: LEDGER_CAPACITY,
            entries: VecDeque::with_capacity(LEDGER_CAPACITY),
        }
    }

    pub fn set_window(&mut self, window: Duration) {
        self.window = window;
    }

    /// 从最旧的一端移除超出窗口的记录
    pub fn prune(&mut self, now: Instant) {
        while let Some((_, seen_at)) = self.entries.front() {
            if now.saturating_duration_since(*seen_at) > self.window {
                self.entries.pop_front();
            } else {
                break;
            }
        }
    }

    /// 检查前先裁剪过期记录
    pub fn is_duplicate(&mut self, key: &EventKey, now: Instant) -> bool {
        self.prune(now);
        self.entries.iter().any(|(seen, _)| seen == key)
    }

    /// 只在即将分发前调用
    pub fn record(&mut self, key: EventKey, now: Instant) {
        self.entries.push_back((key, now));
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PeerRef;

    fn incoming(id: i64) -> EventKey {
        EventKey::Incoming {
            author: ChatId(7),
            chat: ChatId(-100),
            message_id: id,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn duplicate_within_window_expires_after() {
        let mut ledger = DedupLedger::new(Duration::from_secs(10));
        let t0 = Instant::now();

        assert!(!ledger.is_duplicate(&incoming(1), t0));
        ledger.record(incoming(1), t0);
        assert!(ledger.is_duplicate(&incoming(1), t0 + Duration::from_secs(5)));
        assert!(!ledger.is_duplicate(&incoming(2), t0 + Duration::from_secs(5)));
        assert!(!ledger.is_duplicate(&incoming(1), t0 + Duration::from_secs(11)));
        assert!(ledger.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn capped_by_count() {
        let mut ledger = DedupLedger::new(Duration::from_secs(3600));
        let now = Instant::now();
        for id in 0..(LEDGER_CAPACITY as i64 + 5) {
            ledger.record(incoming(id), now);
        }
        assert_eq!(ledger.len(), LEDGER_CAPACITY);
        assert!(!ledger.is_duplicate(&incoming(0), now));
        assert!(ledger.is_duplicate(&incoming(LEDGER_CAPACITY as i64 + 4), now));
    }

    #[test]
    fn refetched_copy_keeps_its_key() {
        let mut original = MessageEnvelope::new(10, PeerRef::Channel(100), 1_700_000_000);
        original.from = Some(PeerRef::User(7));
        let refreshed = original.clone().with_text("now with text");
        assert_eq!(
            EventKey::for_message(&original),
            EventKey::for_message(&refreshed)
        );

        let mut outgoing = original.clone();
        outgoing.outgoing = true;
        outgoing.text = "hi".into();
        assert_eq!(
            EventKey::for_message(&outgoing),
            EventKey::Outgoing {
                chat: ChatId(-100),
                date: 1_700_000_000,
                text: "hi".into()
            }
        );
    }
}
