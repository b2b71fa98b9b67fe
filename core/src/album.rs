use super::model::{ChatId, MessageEnvelope};
use super::timer::TimerHandle;
use std::collections::HashMap;
use tracing::debug;

/// 相册缓冲键：同一个 grouped_id 只在同一个源聊天内有意义
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AlbumKey {
    pub chat: ChatId,
    pub group_id: i64,
}

impl AlbumKey {
    pub fn of(envelope: &MessageEnvelope) -> Option<Self> {
        envelope.album_group().map(|group_id| Self {
            chat: envelope.source_chat(),
            group_id,
        })
    }
}

struct AlbumBuffer {
    parts: Vec<MessageEnvelope>,
    seq: u64,
    timer: TimerHandle,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlbumAction {
    /// 新建缓冲并启动了定时器
    Started { seq: u64 },
    Appended { parts: usize },
}

/// 纯超时去抖：首个分片启动定时器，后续分片不重置，也没有数量上限
#[derive(Default)]
pub struct AlbumAggregator {
    buffers: HashMap<AlbumKey, AlbumBuffer>,
    next_seq: u64,
}

impl AlbumAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// start_timer 只在新建缓冲时被调用，参数为本缓冲的序号
    pub fn add_part<F>(&mut self, key: AlbumKey, envelope: MessageEnvelope, start_timer: F) -> AlbumAction
    where
        F: FnOnce(u64) -> TimerHandle,
    {
        if let Some(buffer) = self.buffers.get_mut(&key) {
            buffer.parts.push(envelope);
            debug!(
                "相册分片已缓存: chat={} group={} parts={}",
                key.chat,
                key.group_id,
                buffer.parts.len()
            );
            return AlbumAction::Appended {
                parts: buffer.parts.len(),
            };
        }

        self.next_seq += 1;
        let seq = self.next_seq;
        let timer = start_timer(seq);
        self.buffers.insert(
            key,
            AlbumBuffer {
                parts: vec![envelope],
                seq,
                timer,
            },
        );
        debug!("检测到新相册: chat={} group={}", key.chat, key.group_id);
        AlbumAction::Started { seq }
    }

    /// 定时器触发时取出缓冲；序号不符（已被取出或替换）时返回 None
    pub fn take(&mut self, key: AlbumKey, seq: u64) -> Option<Vec<MessageEnvelope>> {
        match self.buffers.get(&key) {
            Some(buffer) if buffer.seq == seq => {}
            _ => return None,
        }
        self.buffers.remove(&key).map(|mut buffer| {
            buffer.timer.cancel();
            buffer.parts
        })
    }

    /// 取消全部定时器并丢弃缓冲，返回被丢弃的相册数
    pub fn clear(&mut self) -> usize {
        let count = self.buffers.len();
        for (_, mut buffer) in self.buffers.drain() {
            buffer.timer.cancel();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PeerRef;
    use std::time::Duration;

    fn part(id: i64, group: i64) -> MessageEnvelope {
        let mut envelope = MessageEnvelope::new(id, PeerRef::Channel(100), 0);
        envelope.group_id = Some(group);
        envelope
    }

    fn idle_timer(_seq: u64) -> TimerHandle {
        TimerHandle::schedule(Duration::from_secs(3600), async {})
    }

    #[tokio::test]
    async fn parts_share_one_buffer_and_one_timer() {
        let mut albums = AlbumAggregator::new();
        let key = AlbumKey::of(&part(1, 9)).unwrap();
        let mut timers = 0;

        let first = albums.add_part(key, part(1, 9), |seq| {
            timers += 1;
            idle_timer(seq)
        });
        let seq = match first {
            AlbumAction::Started { seq } => seq,
            other => panic!("unexpected {:?}", other),
        };
        for id in 2..=3 {
            albums.add_part(key, part(id, 9), |seq| {
                timers += 1;
                idle_timer(seq)
            });
        }
        assert_eq!(timers, 1);

        assert!(albums.take(key, seq + 1).is_none());
        let parts = albums.take(key, seq).unwrap();
        assert_eq!(parts.iter().map(|p| p.id).collect::<Vec<_>>(), vec![1, 2, 3]);
        assert!(albums.take(key, seq).is_none());
    }

    #[tokio::test]
    async fn same_group_id_in_other_chat_is_separate() {
        let mut albums = AlbumAggregator::new();
        let a = part(1, 9);
        let mut b = part(1, 9);
        b.peer = PeerRef::Channel(200);

        albums.add_part(AlbumKey::of(&a).unwrap(), a, idle_timer);
        albums.add_part(AlbumKey::of(&b).unwrap(), b, idle_timer);
        assert_eq!(albums.len(), 2);
        assert_eq!(albums.clear(), 2);
        assert!(albums.is_empty());
    }

    #[test]
    fn zero_group_is_not_an_album() {
        assert!(AlbumKey::of(&part(1, 0)).is_none());
    }
}
