use super::dedup::EventKey;
use super::model::MessageEnvelope;
use super::timer::TimerHandle;
use std::collections::HashMap;

struct DeferredEntry {
    envelope: MessageEnvelope,
    seq: u64,
    timer: TimerHandle,
    refetching: bool,
}

/// 结构不完整的消息暂存，超时后只重试一次
#[derive(Default)]
pub struct DeferralManager {
    pending: HashMap<EventKey, DeferredEntry>,
    next_seq: u64,
}

impl DeferralManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 已在等待中的 key 不会重复登记，返回 None
    pub fn defer<F>(&mut self, key: EventKey, envelope: MessageEnvelope, start_timer: F) -> Option<u64>
    where
        F: FnOnce(u64) -> TimerHandle,
    {
        if self.pending.contains_key(&key) {
            return None;
        }
        self.next_seq += 1;
        let seq = self.next_seq;
        let timer = start_timer(seq);
        self.pending.insert(
            key,
            DeferredEntry {
                envelope,
                seq,
                timer,
                refetching: false,
            },
        );
        Some(seq)
    }

    /// 提前补全：取消定时器并移除条目，返回是否存在过
    pub fn resolve(&mut self, key: &EventKey) -> bool {
        match self.pending.remove(key) {
            Some(mut entry) => {
                entry.timer.cancel();
                true
            }
            None => false,
        }
    }

    /// 定时器触发：标记为正在重新拉取并返回暂存的副本
    pub fn begin_refetch(&mut self, key: &EventKey, seq: u64) -> Option<MessageEnvelope> {
        let entry = self.pending.get_mut(key)?;
        if entry.seq != seq || entry.refetching {
            return None;
        }
        entry.refetching = true;
        Some(entry.envelope.clone())
    }

    /// 移除条目并返回原始消息；序号不符时返回 None
    pub fn finish(&mut self, key: &EventKey, seq: u64) -> Option<MessageEnvelope> {
        match self.pending.get(key) {
            Some(entry) if entry.seq == seq => {}
            _ => return None,
        }
        self.pending.remove(key).map(|mut entry| {
            entry.timer.cancel();
            entry.envelope
        })
    }

    pub fn clear(&mut self) -> usize {
        let count = self.pending.len();
        for (_, mut entry) in self.pending.drain() {
            entry.timer.cancel();
        }
        count
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
