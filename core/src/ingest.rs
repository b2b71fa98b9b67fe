use super::model::{AuthorClass, ChatId, MessageEnvelope, MediaType};
use super::platform::PeerDirectory;

/// 发送者分类：自己发出 / 机器人 / 普通用户。查不到实体时按普通用户处理
pub fn classify_author(envelope: &MessageEnvelope, directory: &dyn PeerDirectory) -> AuthorClass {
    if envelope.outgoing {
        return AuthorClass::Outgoing;
    }
    match envelope.from.and_then(|peer| directory.peer_ref(peer)) {
        Some(info) if info.is_bot() => AuthorClass::Bot,
        _ => AuthorClass::User,
    }
}

/// 限流键：自己发出的消息用本账号 ID，否则用发送者
pub fn throttle_key(envelope: &MessageEnvelope, self_id: Option<ChatId>) -> Option<ChatId> {
    if envelope.outgoing {
        return self_id;
    }
    envelope.from.map(|peer| peer.chat_id())
}

/// 结构不完整：媒体缺少重新发送所需的引用，或回复目标尚未加载
pub fn incomplete_reason(envelope: &MessageEnvelope) -> Option<&'static str> {
    if let Some(media) = &envelope.media {
        if media.media_type != MediaType::WebPage && !media.is_complete() {
            return Some("媒体引用缺失");
        }
    }
    if let Some(reply) = &envelope.reply_to {
        if reply.target.is_none() {
            return Some("回复目标未加载");
        }
    }
    None
}
