use super::model::{ChatId, ForwardTask, MessageEnvelope, PeerInfo, PeerRef};
use std::future::Future;
use std::pin::Pin;

pub type FetchFuture = Pin<Box<dyn Future<Output = anyhow::Result<Option<MessageEnvelope>>> + Send>>;
pub type SendFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;
pub type LookupFuture = Pin<Box<dyn Future<Output = anyhow::Result<Option<PeerInfo>>> + Send>>;

/// 本地实体缓存，只读且同步
pub trait PeerDirectory: Send + Sync {
    fn user(&self, user_id: i64) -> Option<PeerInfo>;

    /// 按原始（正数）ID 查群组或频道
    fn chat(&self, raw_id: i64) -> Option<PeerInfo>;

    fn me(&self) -> Option<PeerInfo>;

    /// 规范化 ID：正数为用户，负数为群组/频道
    fn peer(&self, id: ChatId) -> Option<PeerInfo> {
        if id.0 > 0 {
            self.user(id.0)
        } else if id.0 < 0 {
            self.chat(id.raw())
        } else {
            None
        }
    }

    fn peer_ref(&self, peer: PeerRef) -> Option<PeerInfo> {
        self.peer(peer.chat_id())
    }
}

/// 读穿式消息缓存，用于超时后重新拉取
pub trait MessageCache: Send + Sync {
    fn fetch(&self, chat: PeerRef, message_id: i64) -> FetchFuture;
}

/// 发送端：文本、单媒体、多媒体
pub trait Outbound: Send + Sync {
    fn send(&self, task: ForwardTask) -> SendFuture;
}

/// 目标聊天的远程解析
pub trait PeerResolver: Send + Sync {
    fn check_invite(&self, hash: &str) -> LookupFuture;

    /// 一次请求多个候选 ID，返回第一个命中的群组/频道
    fn lookup_chats(&self, candidates: Vec<i64>) -> LookupFuture;

    fn resolve_username(&self, username: &str) -> LookupFuture;
}
