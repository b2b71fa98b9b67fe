use serde::{Deserialize, Serialize};
use std::fmt;

/// 规范化的聊天 ID：用户为正数，群组/频道为原始 ID 取负
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl ChatId {
    pub fn is_user(self) -> bool {
        self.0 > 0
    }

    pub fn raw(self) -> i64 {
        self.0.abs()
    }
}

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 平台侧的 peer 引用，保留原始 ID 与种类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PeerRef {
    User(i64),
    Chat(i64),
    Channel(i64),
}

impl PeerRef {
    pub fn chat_id(self) -> ChatId {
        match self {
            PeerRef::User(id) => ChatId(id),
            PeerRef::Chat(id) | PeerRef::Channel(id) => ChatId(-id),
        }
    }

    pub fn raw_id(self) -> i64 {
        match self {
            PeerRef::User(id) | PeerRef::Chat(id) | PeerRef::Channel(id) => id,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerKind {
    User { bot: bool },
    /// 普通群组（无消息链接）
    BasicGroup,
    /// 超级群组
    Supergroup,
    /// 广播频道
    Broadcast,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PeerInfo {
    pub peer: PeerRef,
    pub kind: PeerKind,
    /// 群组/频道标题，或用户的 first name
    pub title: String,
    pub last_name: Option<String>,
    pub username: Option<String>,
}

impl PeerInfo {
    pub fn id(&self) -> ChatId {
        self.peer.chat_id()
    }

    pub fn is_bot(&self) -> bool {
        matches!(self.kind, PeerKind::User { bot: true })
    }

    pub fn is_user(&self) -> bool {
        matches!(self.kind, PeerKind::User { .. })
    }

    pub fn public_username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }

    /// 显示名称：标题或 "名 姓"，都为空时退回 "ID: x"
    pub fn display_name(&self) -> String {
        match self.kind {
            PeerKind::User { .. } => {
                let name = format!(
                    "{} {}",
                    self.title,
                    self.last_name.as_deref().unwrap_or_default()
                );
                let name = name.trim();
                if name.is_empty() {
                    format!("ID: {}", self.peer.raw_id())
                } else {
                    name.to_string()
                }
            }
            _ => {
                if self.title.trim().is_empty() {
                    format!("ID: {}", self.peer.raw_id())
                } else {
                    self.title.clone()
                }
            }
        }
    }

    /// 有公开用户名时为 "@username"，否则为显示名称
    pub fn tag(&self) -> String {
        match self.public_username() {
            Some(username) => format!("@{}", username),
            None => self.display_name(),
        }
    }

    /// 指向某条消息的永久链接
    pub fn message_link(&self, message_id: i64) -> String {
        match self.public_username() {
            Some(username) => format!("https://t.me/{}/{}", username, message_id),
            None => format!("https://t.me/c/{}/{}", self.peer.raw_id(), message_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaType {
    Photo,
    Document,
    /// 链接预览，不可重新发送
    WebPage,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentTraits {
    pub sticker: bool,
    pub voice: bool,
    pub round: bool,
    pub animated: bool,
    pub audio: bool,
    pub video: bool,
}

#[derive(Debug, Clone)]
pub struct MediaView {
    pub media_type: MediaType,
    pub traits: DocumentTraits,
    pub media_id: Option<i64>,
    pub access_hash: i64,
    pub file_reference: Vec<u8>,
    pub mime_type: Option<String>,
    pub file_name: Option<String>,
    /// 贴纸附带的 emoji
    pub alt: Option<String>,
    pub spoiler: bool,
}

impl MediaView {
    pub fn photo(media_id: i64, access_hash: i64, file_reference: Vec<u8>) -> Self {
        Self {
            media_type: MediaType::Photo,
            traits: DocumentTraits::default(),
            media_id: Some(media_id),
            access_hash,
            file_reference,
            mime_type: None,
            file_name: None,
            alt: None,
            spoiler: false,
        }
    }

    pub fn document(
        media_id: i64,
        access_hash: i64,
        file_reference: Vec<u8>,
        traits: DocumentTraits,
    ) -> Self {
        Self {
            media_type: MediaType::Document,
            traits,
            media_id: Some(media_id),
            access_hash,
            file_reference,
            mime_type: None,
            file_name: None,
            alt: None,
            spoiler: false,
        }
    }

    pub fn web_page() -> Self {
        Self {
            media_type: MediaType::WebPage,
            traits: DocumentTraits::default(),
            media_id: None,
            access_hash: 0,
            file_reference: Vec::new(),
            mime_type: None,
            file_name: None,
            alt: None,
            spoiler: false,
        }
    }

    /// 是否可以作为媒体重新发送
    pub fn is_sendable(&self) -> bool {
        self.media_type != MediaType::WebPage && self.media_id.is_some()
    }

    /// 重新发送所需的 file_reference 是否已就绪
    pub fn is_complete(&self) -> bool {
        match self.media_type {
            MediaType::WebPage => true,
            MediaType::Photo | MediaType::Document => !self.file_reference.is_empty(),
        }
    }
}

/// 内容类型，按 photo > sticker > voice > round > gif > audio > video > document > text 优先级归类
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ContentType {
    #[serde(rename = "text")]
    Text,
    #[serde(rename = "photos")]
    Photo,
    #[serde(rename = "videos")]
    Video,
    #[serde(rename = "documents")]
    Document,
    #[serde(rename = "audio")]
    Audio,
    #[serde(rename = "voice")]
    Voice,
    #[serde(rename = "video_messages")]
    RoundVideo,
    #[serde(rename = "stickers")]
    Sticker,
    #[serde(rename = "gifs")]
    Gif,
}

impl ContentType {
    pub const ALL: [ContentType; 9] = [
        ContentType::Text,
        ContentType::Photo,
        ContentType::Video,
        ContentType::Document,
        ContentType::Audio,
        ContentType::Voice,
        ContentType::RoundVideo,
        ContentType::Sticker,
        ContentType::Gif,
    ];

    pub fn classify(media: Option<&MediaView>) -> Self {
        let media = match media {
            Some(media) => media,
            None => return ContentType::Text,
        };
        match media.media_type {
            MediaType::WebPage => ContentType::Text,
            MediaType::Photo => ContentType::Photo,
            MediaType::Document => {
                let t = &media.traits;
                if t.sticker {
                    ContentType::Sticker
                } else if t.voice {
                    ContentType::Voice
                } else if t.round {
                    ContentType::RoundVideo
                } else if t.animated {
                    ContentType::Gif
                } else if t.audio {
                    ContentType::Audio
                } else if t.video {
                    ContentType::Video
                } else {
                    ContentType::Document
                }
            }
        }
    }

    /// 规则文件中 filters 的键名
    pub fn key(self) -> &'static str {
        match self {
            ContentType::Text => "text",
            ContentType::Photo => "photos",
            ContentType::Video => "videos",
            ContentType::Document => "documents",
            ContentType::Audio => "audio",
            ContentType::Voice => "voice",
            ContentType::RoundVideo => "video_messages",
            ContentType::Sticker => "stickers",
            ContentType::Gif => "gifs",
        }
    }

    pub fn from_key(key: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|ct| ct.key() == key)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextEntity {
    pub offset: i32,
    pub length: i32,
    pub entity_type: EntityType,
    /// 链接实体的 URL、Pre 的语言、CustomEmoji 的文档 ID 等附加数据
    pub data: Option<String>,
    /// MentionName 实体指向的用户
    pub user_id: Option<i64>,
}

impl TextEntity {
    pub fn new(entity_type: EntityType, offset: i32, length: i32) -> Self {
        Self {
            offset,
            length,
            entity_type,
            data: None,
            user_id: None,
        }
    }

    pub fn text_url(offset: i32, length: i32, url: String) -> Self {
        Self {
            data: Some(url),
            ..Self::new(EntityType::TextUrl, offset, length)
        }
    }

    pub fn mention_name(offset: i32, length: i32, user_id: i64) -> Self {
        Self {
            user_id: Some(user_id),
            ..Self::new(EntityType::MentionName, offset, length)
        }
    }

    pub fn end(&self) -> i32 {
        self.offset.saturating_add(self.length)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityType {
    Bold,
    Italic,
    Underline,
    Strikethrough,
    Code,
    Pre,
    TextUrl,
    Mention,
    MentionName,
    Hashtag,
    Spoiler,
    Blockquote,
    Url,
    Email,
    Phone,
    Cashtag,
    BankCard,
    BotCommand,
    CustomEmoji,
}

#[derive(Debug, Clone, Default)]
pub struct ForwardOrigin {
    pub from: Option<PeerRef>,
    pub from_name: Option<String>,
    pub channel_post: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct ReplyRef {
    pub message_id: i64,
    /// 本地已解析的被回复消息；None 表示尚未加载
    pub target: Option<Box<MessageEnvelope>>,
}

/// 管道观察到的一条消息（或相册的一部分）
#[derive(Debug, Clone)]
pub struct MessageEnvelope {
    pub id: i64,
    pub peer: PeerRef,
    pub from: Option<PeerRef>,
    pub outgoing: bool,
    /// 发送时间（Unix 秒）
    pub date: i64,
    pub text: String,
    pub entities: Vec<TextEntity>,
    pub media: Option<MediaView>,
    pub content_type: ContentType,
    pub group_id: Option<i64>,
    pub reply_to: Option<ReplyRef>,
    pub forward: Option<ForwardOrigin>,
}

impl MessageEnvelope {
    pub fn new(id: i64, peer: PeerRef, date: i64) -> Self {
        Self {
            id,
            peer,
            from: None,
            outgoing: false,
            date,
            text: String::new(),
            entities: Vec::new(),
            media: None,
            content_type: ContentType::Text,
            group_id: None,
            reply_to: None,
            forward: None,
        }
    }

    pub fn source_chat(&self) -> ChatId {
        self.peer.chat_id()
    }

    pub fn author_id(&self) -> ChatId {
        self.from.map(PeerRef::chat_id).unwrap_or(ChatId(0))
    }

    /// 非零的相册分组 ID
    pub fn album_group(&self) -> Option<i64> {
        self.group_id.filter(|id| *id != 0)
    }

    pub fn with_media(mut self, media: MediaView) -> Self {
        self.content_type = ContentType::classify(Some(&media));
        self.media = Some(media);
        self
    }

    pub fn with_text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorClass {
    Outgoing,
    Bot,
    User,
}

#[derive(Debug, Clone)]
pub struct AlbumItem {
    pub media: MediaView,
    pub caption: String,
    pub entities: Vec<TextEntity>,
}

#[derive(Debug, Clone)]
pub enum ForwardPayload {
    Text {
        text: String,
        entities: Vec<TextEntity>,
    },
    Media {
        media: MediaView,
        caption: String,
        entities: Vec<TextEntity>,
    },
    Album {
        items: Vec<AlbumItem>,
    },
}

/// 交给发送端的一次发送
#[derive(Debug, Clone)]
pub struct ForwardTask {
    pub source: ChatId,
    pub destination: ChatId,
    pub payload: ForwardPayload,
}

impl ForwardTask {
    pub fn kind(&self) -> &'static str {
        match self.payload {
            ForwardPayload::Text { .. } => "text",
            ForwardPayload::Media { .. } => "media",
            ForwardPayload::Album { .. } => "album",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(traits: DocumentTraits) -> MediaView {
        MediaView::document(1, 2, vec![1], traits)
    }

    #[test]
    fn classify_prefers_first_matching_predicate() {
        let sticker_video = doc(DocumentTraits {
            sticker: true,
            video: true,
            ..Default::default()
        });
        assert_eq!(
            ContentType::classify(Some(&sticker_video)),
            ContentType::Sticker
        );

        let round = doc(DocumentTraits {
            round: true,
            video: true,
            ..Default::default()
        });
        assert_eq!(ContentType::classify(Some(&round)), ContentType::RoundVideo);

        let gif = doc(DocumentTraits {
            animated: true,
            video: true,
            ..Default::default()
        });
        assert_eq!(ContentType::classify(Some(&gif)), ContentType::Gif);

        assert_eq!(
            ContentType::classify(Some(&doc(DocumentTraits::default()))),
            ContentType::Document
        );
        assert_eq!(
            ContentType::classify(Some(&MediaView::web_page())),
            ContentType::Text
        );
        assert_eq!(ContentType::classify(None), ContentType::Text);
    }

    #[test]
    fn peer_ids_follow_sign_convention() {
        assert_eq!(PeerRef::User(42).chat_id(), ChatId(42));
        assert_eq!(PeerRef::Chat(42).chat_id(), ChatId(-42));
        assert_eq!(PeerRef::Channel(1234567890).chat_id(), ChatId(-1234567890));
    }

    #[test]
    fn names_and_links() {
        let user = PeerInfo {
            peer: PeerRef::User(7),
            kind: PeerKind::User { bot: false },
            title: "Ada".into(),
            last_name: Some("Lovelace".into()),
            username: None,
        };
        assert_eq!(user.tag(), "Ada Lovelace");

        let channel = PeerInfo {
            peer: PeerRef::Channel(555),
            kind: PeerKind::Broadcast,
            title: "News".into(),
            last_name: None,
            username: Some("news".into()),
        };
        assert_eq!(channel.tag(), "@news");
        assert_eq!(channel.message_link(9), "https://t.me/news/9");

        let private = PeerInfo {
            username: None,
            ..channel
        };
        assert_eq!(private.message_link(9), "https://t.me/c/555/9");
    }

    #[test]
    fn content_type_keys_round_trip() {
        for ct in ContentType::ALL {
            assert_eq!(ContentType::from_key(ct.key()), Some(ct));
        }
        assert_eq!(ContentType::from_key("nope"), None);
    }
}
