use std::collections::{HashMap, VecDeque};
use std::time::Duration;
use tokio::time::Instant;

use crate::model::ChatId;

pub const ANTISPAM_CACHE_SIZE: usize = 500;

/// 按作者的最小间隔限流
///
/// 淘汰顺序为插入顺序：更新已有作者的时间戳不会把它移到队尾。
pub struct AntiSpamLimiter {
    delay: Duration,
    capacity: usize,
    last_allowed: HashMap<ChatId, Instant>,
    order: VecDeque<ChatId>,
}

impl AntiSpamLimiter {
    pub fn new(delay: Duration) -> Self {
        Self::with_capacity(delay, ANTISPAM_CACHE_SIZE)
    }

    pub fn with_capacity(delay: Duration, capacity: usize) -> Self {
        Self {
            delay,
            capacity: capacity.max(1),
            last_allowed: HashMap::new(),
            order: VecDeque::new(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        !self.delay.is_zero()
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.delay = delay;
    }

    /// 返回 false 表示应丢弃；被丢弃的消息不会刷新缓存
    pub fn check(&mut self, author: ChatId, now: Instant) -> bool {
        if !self.is_enabled() {
            return true;
        }

        if let Some(last) = self.last_allowed.get(&author) {
            if now.saturating_duration_since(*last) < self.delay {
                return false;
            }
        }

        if self.last_allowed.insert(author, now).is_none() {
            self.order.push_back(author);
        }
        while self.last_allowed.len() > self.capacity {
            match self.order.pop_front() {
                Some(oldest) => {
                    self.last_allowed.remove(&oldest);
                }
                None => break,
            }
        }
        true
    }

    pub fn len(&self) -> usize {
        self.last_allowed.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last_allowed.is_empty()
    }

    pub fn contains(&self, author: ChatId) -> bool {
        self.last_allowed.contains_key(&author)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn drops_within_delay_and_measures_from_last_allowed() {
        let mut limiter = AntiSpamLimiter::new(Duration::from_secs(1));
        let start = Instant::now();
        let author = ChatId(7);

        assert!(limiter.check(author, start));
        assert!(!limiter.check(author, start + Duration::from_millis(500)));
        assert!(limiter.check(author, start + Duration::from_millis(1100)));
        // 下一次从 1.1s 起算
        assert!(!limiter.check(author, start + Duration::from_millis(1900)));
    }

    #[tokio::test(start_paused = true)]
    async fn zero_delay_never_drops() {
        let mut limiter = AntiSpamLimiter::new(Duration::ZERO);
        let now = Instant::now();
        assert!(limiter.check(ChatId(1), now));
        assert!(limiter.check(ChatId(1), now));
        assert!(limiter.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn evicts_oldest_inserted_even_if_recently_updated() {
        let mut limiter = AntiSpamLimiter::with_capacity(Duration::from_secs(1), 2);
        let t0 = Instant::now();

        assert!(limiter.check(ChatId(1), t0));
        assert!(limiter.check(ChatId(2), t0));
        // 更新 1 不改变它的插入位置
        assert!(limiter.check(ChatId(1), t0 + Duration::from_secs(2)));
        assert!(limiter.check(ChatId(3), t0 + Duration::from_secs(2)));

        assert_eq!(limiter.len(), 2);
        assert!(!limiter.contains(ChatId(1)));
        assert!(limiter.contains(ChatId(2)));
        assert!(limiter.contains(ChatId(3)));
    }
}
