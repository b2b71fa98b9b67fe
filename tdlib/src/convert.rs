use grammers_client::{
    grammers_tl_types as tl,
    types::{Media, Message, Peer, User},
};
use grammers_session::defs::{PeerAuth, PeerId, PeerRef as SessionPeer};
use std::sync::{Mutex, OnceLock};
use std::time::{Duration, Instant};
use tracing::{debug, info};

use tg_core::{
    DocumentTraits, EntityType, ForwardOrigin, MediaView, MessageEnvelope, PeerInfo, PeerKind,
    PeerRef, ReplyRef, TextEntity,
};

/// Bot API 对话 ID 中频道的偏移量（-100xxxxxxxxxx）
const CHANNEL_DIALOG_OFFSET: i64 = 1_000_000_000_000;
const SKIP_LOG_MAX_COUNT: usize = 50;
const SKIP_LOG_MAX_AGE: Duration = Duration::from_secs(2);

pub fn peer_from_dialog_id(dialog_id: i64) -> PeerRef {
    if dialog_id <= -CHANNEL_DIALOG_OFFSET {
        PeerRef::Channel(-dialog_id - CHANNEL_DIALOG_OFFSET)
    } else if dialog_id < 0 {
        PeerRef::Chat(-dialog_id)
    } else {
        PeerRef::User(dialog_id)
    }
}

/// 不带 access_hash 的 session 引用，由 session 缓存补全
pub fn session_peer(peer: PeerRef) -> SessionPeer {
    let id = match peer {
        PeerRef::User(id) => PeerId::user(id),
        PeerRef::Chat(id) => PeerId::chat(id),
        PeerRef::Channel(id) => PeerId::channel(id),
    };
    SessionPeer {
        id,
        auth: PeerAuth::default(),
    }
}

fn tl_peer(peer: &tl::enums::Peer) -> PeerRef {
    match peer {
        tl::enums::Peer::User(p) => PeerRef::User(p.user_id),
        tl::enums::Peer::Chat(p) => PeerRef::Chat(p.chat_id),
        tl::enums::Peer::Channel(p) => PeerRef::Channel(p.channel_id),
    }
}

fn owned<'a>(value: impl Into<Option<&'a str>>) -> Option<String> {
    value
        .into()
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn user_info(user: &User, peer: PeerRef) -> PeerInfo {
    PeerInfo {
        peer,
        kind: PeerKind::User {
            bot: user.is_bot(),
        },
        title: owned(user.first_name()).unwrap_or_default(),
        last_name: owned(user.last_name()),
        username: owned(user.username()),
    }
}

pub fn peer_info(peer: &Peer) -> PeerInfo {
    let peer_ref = peer_from_dialog_id(peer.id().bot_api_dialog_id());
    match peer {
        Peer::User(user) => user_info(user, peer_ref),
        Peer::Group(group) => PeerInfo {
            peer: peer_ref,
            kind: if group.is_megagroup() {
                PeerKind::Supergroup
            } else {
                PeerKind::BasicGroup
            },
            title: owned(peer.name()).unwrap_or_default(),
            last_name: None,
            username: owned(peer.username()),
        },
        Peer::Channel(_) => PeerInfo {
            peer: peer_ref,
            kind: PeerKind::Broadcast,
            title: owned(peer.name()).unwrap_or_default(),
            last_name: None,
            username: owned(peer.username()),
        },
    }
}

/// 原始 TL 聊天对象，用于邀请链接与 GetChats 的返回
pub fn chat_info(chat: &tl::enums::Chat) -> Option<PeerInfo> {
    let info = match chat {
        tl::enums::Chat::Empty(_) => return None,
        tl::enums::Chat::Chat(c) => PeerInfo {
            peer: PeerRef::Chat(c.id),
            kind: PeerKind::BasicGroup,
            title: c.title.clone(),
            last_name: None,
            username: None,
        },
        tl::enums::Chat::Forbidden(c) => PeerInfo {
            peer: PeerRef::Chat(c.id),
            kind: PeerKind::BasicGroup,
            title: c.title.clone(),
            last_name: None,
            username: None,
        },
        tl::enums::Chat::Channel(c) => PeerInfo {
            peer: PeerRef::Channel(c.id),
            kind: if c.broadcast {
                PeerKind::Broadcast
            } else {
                PeerKind::Supergroup
            },
            title: c.title.clone(),
            last_name: None,
            username: c.username.clone(),
        },
        tl::enums::Chat::ChannelForbidden(c) => PeerInfo {
            peer: PeerRef::Channel(c.id),
            kind: if c.broadcast {
                PeerKind::Broadcast
            } else {
                PeerKind::Supergroup
            },
            title: c.title.clone(),
            last_name: None,
            username: None,
        },
    };
    Some(info)
}

struct SkipLog {
    chat_id: Option<i64>,
    min_id: i64,
    max_id: i64,
    count: usize,
    last_flush: Instant,
}

impl SkipLog {
    fn new() -> Self {
        Self {
            chat_id: None,
            min_id: 0,
            max_id: 0,
            count: 0,
            last_flush: Instant::now(),
        }
    }

    /// 同一聊天的连续跳过合并为一条日志，返回需要输出的 (chat, 范围, 数量)
    fn record(&mut self, chat_id: i64, msg_id: i64) -> Option<(i64, String, usize)> {
        let now = Instant::now();
        let flushed = match self.chat_id {
            Some(current) if current == chat_id => {
                self.min_id = self.min_id.min(msg_id);
                self.max_id = self.max_id.max(msg_id);
                self.count += 1;
                if self.count < SKIP_LOG_MAX_COUNT
                    && now.duration_since(self.last_flush) < SKIP_LOG_MAX_AGE
                {
                    return None;
                }
                let entry = self.entry();
                self.chat_id = None;
                self.count = 0;
                self.last_flush = now;
                return entry;
            }
            Some(_) => self.entry(),
            None => None,
        };
        self.chat_id = Some(chat_id);
        self.min_id = msg_id;
        self.max_id = msg_id;
        self.count = 1;
        self.last_flush = now;
        flushed
    }

    fn entry(&self) -> Option<(i64, String, usize)> {
        let chat_id = self.chat_id?;
        let range = if self.min_id == self.max_id {
            self.min_id.to_string()
        } else {
            format!("{}-{}", self.min_id, self.max_id)
        };
        Some((chat_id, range, self.count))
    }
}

static SERVICE_SKIP_LOG: OnceLock<Mutex<SkipLog>> = OnceLock::new();
static EMPTY_SKIP_LOG: OnceLock<Mutex<SkipLog>> = OnceLock::new();

fn log_skip(logger: &OnceLock<Mutex<SkipLog>>, label: &str, chat_id: i64, msg_id: i64, loud: bool) {
    let logger = logger.get_or_init(|| Mutex::new(SkipLog::new()));
    let mut guard = match logger.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    if let Some((chat_id, range, count)) = guard.record(chat_id, msg_id) {
        if loud {
            info!("{}: chat_id={} count={} ids={}", label, chat_id, count, range);
        } else {
            debug!("{}: chat_id={} count={} ids={}", label, chat_id, count, range);
        }
    }
}

/// 转换为管道消息；服务消息与无内容消息返回 None
pub fn convert_message(msg: &Message) -> Option<MessageEnvelope> {
    let dialog = msg.peer_id().bot_api_dialog_id();
    let id = msg.id() as i64;

    if msg.action().is_some() {
        log_skip(&SERVICE_SKIP_LOG, "服务消息批量跳过", dialog, id, true);
        return None;
    }

    let mut envelope = MessageEnvelope::new(id, peer_from_dialog_id(dialog), msg.date().timestamp())
        .with_text(msg.text());
    envelope.outgoing = msg.outgoing();
    envelope.from = msg
        .sender()
        .map(|sender| peer_from_dialog_id(sender.id().bot_api_dialog_id()));
    envelope.entities = msg
        .fmt_entities()
        .map(|ents| ents.iter().filter_map(convert_entity).collect())
        .unwrap_or_default();
    envelope.group_id = msg.grouped_id();
    envelope.reply_to = msg.reply_to_message_id().map(|reply_id| ReplyRef {
        message_id: reply_id as i64,
        target: None,
    });
    envelope.forward = msg.forward_header().map(|header| match header {
        tl::enums::MessageFwdHeader::Header(h) => ForwardOrigin {
            from: h.from_id.as_ref().map(tl_peer),
            from_name: h.from_name.clone(),
            channel_post: h.channel_post.map(i64::from),
        },
    });

    if let Some(media) = msg.media().and_then(|media| convert_media(&media)) {
        envelope = envelope.with_media(media);
    }

    if envelope.text.trim().is_empty() && envelope.media.is_none() {
        log_skip(&EMPTY_SKIP_LOG, "无内容消息批量跳过", dialog, id, false);
        return None;
    }
    Some(envelope)
}

fn convert_media(media: &Media) -> Option<MediaView> {
    match media {
        Media::Photo(photo) => match &photo.raw.photo {
            Some(tl::enums::Photo::Photo(raw)) => {
                let mut view = MediaView::photo(raw.id, raw.access_hash, raw.file_reference.clone());
                view.spoiler = photo.is_spoiler();
                Some(view)
            }
            _ => None,
        },
        Media::Document(doc) => {
            let (access_hash, file_reference, attributes) = match &doc.raw.document {
                Some(tl::enums::Document::Document(inner)) => (
                    inner.access_hash,
                    inner.file_reference.clone(),
                    inner.attributes.as_slice(),
                ),
                _ => (0, Vec::new(), &[][..]),
            };
            let (traits, alt) = document_traits(attributes);
            let mut view = MediaView::document(doc.id(), access_hash, file_reference, traits);
            view.mime_type = doc.mime_type().map(str::to_string);
            view.file_name = owned(doc.name());
            view.alt = alt;
            view.spoiler = doc.is_spoiler();
            Some(view)
        }
        Media::Sticker(sticker) => {
            let mut view = convert_media(&Media::Document(sticker.document.clone()))?;
            view.traits.sticker = true;
            Some(view)
        }
        Media::WebPage(_) => Some(MediaView::web_page()),
        _ => None,
    }
}

/// 从文档属性推断类型特征，贴纸同时返回 alt emoji
pub fn document_traits(attributes: &[tl::enums::DocumentAttribute]) -> (DocumentTraits, Option<String>) {
    let mut traits = DocumentTraits::default();
    let mut alt = None;
    for attribute in attributes {
        match attribute {
            tl::enums::DocumentAttribute::Sticker(sticker) => {
                traits.sticker = true;
                alt = owned(sticker.alt.as_str());
            }
            tl::enums::DocumentAttribute::Video(video) => {
                traits.video = true;
                traits.round |= video.round_message;
            }
            tl::enums::DocumentAttribute::Audio(audio) => {
                if audio.voice {
                    traits.voice = true;
                } else {
                    traits.audio = true;
                }
            }
            tl::enums::DocumentAttribute::Animated => traits.animated = true,
            _ => {}
        }
    }
    (traits, alt)
}

pub fn convert_entity(entity: &tl::enums::MessageEntity) -> Option<TextEntity> {
    use tl::enums::MessageEntity as E;

    let (offset, length, entity_type, data, user_id) = match entity {
        E::Bold(e) => (e.offset, e.length, EntityType::Bold, None, None),
        E::Italic(e) => (e.offset, e.length, EntityType::Italic, None, None),
        E::Underline(e) => (e.offset, e.length, EntityType::Underline, None, None),
        E::Strike(e) => (e.offset, e.length, EntityType::Strikethrough, None, None),
        E::Code(e) => (e.offset, e.length, EntityType::Code, None, None),
        E::Pre(e) => (e.offset, e.length, EntityType::Pre, Some(e.language.clone()), None),
        E::TextUrl(e) => (e.offset, e.length, EntityType::TextUrl, Some(e.url.clone()), None),
        E::Mention(e) => (e.offset, e.length, EntityType::Mention, None, None),
        E::MentionName(e) => (e.offset, e.length, EntityType::MentionName, None, Some(e.user_id)),
        E::Hashtag(e) => (e.offset, e.length, EntityType::Hashtag, None, None),
        E::Spoiler(e) => (e.offset, e.length, EntityType::Spoiler, None, None),
        E::Blockquote(e) => {
            let data = e.collapsed.then(|| "true".to_string());
            (e.offset, e.length, EntityType::Blockquote, data, None)
        }
        E::Url(e) => (e.offset, e.length, EntityType::Url, None, None),
        E::Email(e) => (e.offset, e.length, EntityType::Email, None, None),
        E::Phone(e) => (e.offset, e.length, EntityType::Phone, None, None),
        E::Cashtag(e) => (e.offset, e.length, EntityType::Cashtag, None, None),
        E::BankCard(e) => (e.offset, e.length, EntityType::BankCard, None, None),
        E::BotCommand(e) => (e.offset, e.length, EntityType::BotCommand, None, None),
        E::CustomEmoji(e) => (
            e.offset,
            e.length,
            EntityType::CustomEmoji,
            Some(e.document_id.to_string()),
            None,
        ),
        _ => return None,
    };

    Some(TextEntity {
        offset,
        length,
        entity_type,
        data,
        user_id,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dialog_ids_map_to_peer_kinds() {
        assert_eq!(peer_from_dialog_id(42), PeerRef::User(42));
        assert_eq!(peer_from_dialog_id(-42), PeerRef::Chat(42));
        assert_eq!(
            peer_from_dialog_id(-1001234567890),
            PeerRef::Channel(1234567890)
        );
        assert_eq!(peer_from_dialog_id(-999999999999), PeerRef::Chat(999999999999));
    }

    #[test]
    fn converts_formatting_and_mentions() {
        let bold: tl::enums::MessageEntity = tl::types::MessageEntityBold {
            offset: 1,
            length: 2,
        }
        .into();
        let entity = convert_entity(&bold).unwrap();
        assert_eq!(entity.entity_type, EntityType::Bold);
        assert_eq!((entity.offset, entity.length), (1, 2));

        let mention: tl::enums::MessageEntity = tl::types::MessageEntityMentionName {
            offset: 0,
            length: 3,
            user_id: 77,
        }
        .into();
        assert_eq!(convert_entity(&mention).unwrap().user_id, Some(77));
    }

    #[test]
    fn skip_log_flushes_on_chat_change() {
        let mut log = SkipLog::new();
        assert!(log.record(1, 10).is_none());
        assert!(log.record(1, 12).is_none());
        let (chat, range, count) = log.record(2, 5).unwrap();
        assert_eq!((chat, range.as_str(), count), (1, "10-12", 2));
    }
}
