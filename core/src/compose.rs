use common::text::{collapse_whitespace, truncate_display};
use common::utf16::{utf16_find, utf16_find_from, utf16_len};

use super::model::{
    ContentType, EntityType, ForwardOrigin, MessageEnvelope, PeerInfo, PeerKind, TextEntity,
};
use super::platform::PeerDirectory;
use super::rules::Rule;

pub const QUOTE_SNIPPET_MAX: usize = 44;
const UNKNOWN: &str = "Unknown";

/// 头部与引用组成的前缀，实体偏移以前缀起点为 0
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Prefix {
    pub text: String,
    pub entities: Vec<TextEntity>,
}

impl Prefix {
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// 追加一段，段与段之间空一行
    fn push_section(&mut self, text: String, entities: Vec<TextEntity>) {
        if !self.text.is_empty() {
            self.text.push_str("\n\n");
        }
        let shift = utf16_len(&self.text) as i32;
        self.entities.extend(entities.into_iter().map(|mut entity| {
            entity.offset += shift;
            entity
        }));
        self.text.push_str(&text);
    }
}

/// 合成最终文本：前缀 + "\n\n" + 正文，原正文实体整体后移；无前缀时去掉正文首尾空白
pub fn merge_prefix(prefix: &Prefix, body: &str, body_entities: &[TextEntity]) -> (String, Vec<TextEntity>) {
    if prefix.is_empty() {
        let trimmed = body.trim_start();
        let cut = (utf16_len(body) - utf16_len(trimmed)) as i32;
        let entities = body_entities
            .iter()
            .filter_map(|entity| {
                let start = (entity.offset - cut).max(0);
                let end = entity.end() - cut;
                (end > start).then(|| TextEntity {
                    offset: start,
                    length: end - start,
                    ..entity.clone()
                })
            })
            .collect();
        return (trimmed.trim_end().to_string(), entities);
    }

    let text = format!("{}\n\n{}", prefix.text, body);
    let shift = utf16_len(&prefix.text) as i32 + 2;
    let mut entities = prefix.entities.clone();
    entities.extend(body_entities.iter().map(|entity| TextEntity {
        offset: entity.offset + shift,
        ..entity.clone()
    }));
    (text.trim_end().to_string(), entities)
}

/// 校验实体范围；越过尾部空白裁剪的实体截短，其余越界直接报错
pub fn fit_entities(text: &str, entities: Vec<TextEntity>) -> anyhow::Result<Vec<TextEntity>> {
    let total = utf16_len(text) as i32;
    let mut fitted = Vec::with_capacity(entities.len());
    for mut entity in entities {
        if entity.offset < 0 || entity.length < 0 || entity.offset > total {
            anyhow::bail!(
                "实体越界: offset={} length={} text_len={}",
                entity.offset,
                entity.length,
                total
            );
        }
        if entity.end() > total {
            entity.length = total - entity.offset;
        }
        if entity.length > 0 {
            fitted.push(entity);
        }
    }
    Ok(fitted)
}

fn mention_target(entity: Option<&PeerInfo>) -> Option<i64> {
    entity
        .filter(|info| info.is_user() && info.public_username().is_none())
        .map(|info| info.peer.raw_id())
}

fn tag_of(info: Option<&PeerInfo>) -> String {
    info.map(PeerInfo::tag).unwrap_or_else(|| UNKNOWN.to_string())
}

/// 组装转发头部与回复引用
pub struct Composer<'a> {
    directory: &'a dyn PeerDirectory,
}

impl<'a> Composer<'a> {
    pub fn new(directory: &'a dyn PeerDirectory) -> Self {
        Self { directory }
    }

    pub fn prefix(&self, rule: &Rule, envelope: &MessageEnvelope) -> Prefix {
        let mut prefix = Prefix::default();
        if !rule.drop_author {
            if let Some((text, entities)) = self.header(envelope) {
                prefix.push_section(text, entities);
            }
        }
        if rule.quote_replies {
            if let Some((text, entities)) = self.reply_quote(envelope) {
                prefix.push_section(text, entities);
            }
        }
        prefix
    }

    /// 被转发消息的原作者：(显示标签, 实体)
    fn original_author(&self, origin: Option<&ForwardOrigin>) -> (Option<String>, Option<PeerInfo>) {
        let origin = match origin {
            Some(origin) => origin,
            None => return (None, None),
        };
        if let Some(peer) = origin.from {
            return match self.directory.peer_ref(peer) {
                Some(info) => (Some(info.tag()), Some(info)),
                None => (None, None),
            };
        }
        match origin.from_name.as_deref() {
            Some(name) if !name.is_empty() => (Some(name.to_string()), None),
            _ => (None, None),
        }
    }

    fn author(&self, envelope: &MessageEnvelope) -> Option<PeerInfo> {
        match envelope.from {
            Some(peer) => self.directory.peer_ref(peer),
            None if envelope.outgoing => self.directory.me(),
            None => None,
        }
    }

    pub fn header(&self, envelope: &MessageEnvelope) -> Option<(String, Vec<TextEntity>)> {
        let source = self.directory.peer_ref(envelope.peer)?;
        let author = self.author(envelope);
        let header = match source.kind {
            PeerKind::Broadcast => self.channel_header(envelope, &source),
            PeerKind::BasicGroup | PeerKind::Supergroup => {
                self.group_header(envelope, &source, author.as_ref())
            }
            PeerKind::User { .. } => {
                let (sender, receiver) = if envelope.outgoing {
                    (author, Some(source))
                } else {
                    (author, self.directory.me())
                };
                self.private_header(envelope, sender.as_ref(), receiver.as_ref())
            }
        };
        Some(header)
    }

    fn channel_header(&self, envelope: &MessageEnvelope, channel: &PeerInfo) -> (String, Vec<TextEntity>) {
        let name = channel.display_name();
        let (original_tag, _) = self.original_author(envelope.forward.as_ref());

        let mut text = format!("Forwarded from {}", name);
        if let Some(tag) = &original_tag {
            text.push_str(&format!(" (fwd from {})", tag));
        }

        let mut entities = Vec::new();
        let message_id = envelope
            .forward
            .as_ref()
            .and_then(|origin| origin.channel_post)
            .unwrap_or(envelope.id);
        if let Some(offset) = utf16_find(&text, &name) {
            entities.push(TextEntity::text_url(
                offset as i32,
                utf16_len(&name) as i32,
                channel.message_link(message_id),
            ));
        }
        (text, entities)
    }

    fn group_header(
        &self,
        envelope: &MessageEnvelope,
        group: &PeerInfo,
        author: Option<&PeerInfo>,
    ) -> (String, Vec<TextEntity>) {
        let group_name = group.display_name();
        let author_tag = tag_of(author);
        let (original_tag, original_entity) = self.original_author(envelope.forward.as_ref());

        let mut text = format!("Forwarded from {} (by {})", group_name, author_tag);
        if let Some(tag) = &original_tag {
            text.push_str(&format!(" (fwd from {})", tag));
        }

        let mut entities = Vec::new();
        if let Some(offset) = utf16_find(&text, &group_name) {
            let length = utf16_len(&group_name) as i32;
            if group.kind == PeerKind::Supergroup {
                entities.push(TextEntity::text_url(
                    offset as i32,
                    length,
                    group.message_link(envelope.id),
                ));
            } else {
                entities.push(TextEntity::new(EntityType::Bold, offset as i32, length));
            }
        }

        let author_offset = utf16_find(&text, &author_tag);
        if let (Some(user_id), Some(offset)) = (mention_target(author), author_offset) {
            entities.push(TextEntity::mention_name(
                offset as i32,
                utf16_len(&author_tag) as i32,
                user_id,
            ));
        }

        // 原作者在作者标签之后查找
        if let (Some(user_id), Some(tag), Some(author_offset)) = (
            mention_target(original_entity.as_ref()),
            original_tag.as_deref(),
            author_offset,
        ) {
            let from = author_offset + utf16_len(&author_tag);
            if let Some(offset) = utf16_find_from(&text, tag, from) {
                entities.push(TextEntity::mention_name(
                    offset as i32,
                    utf16_len(tag) as i32,
                    user_id,
                ));
            }
        }

        (text, entities)
    }

    fn private_header(
        &self,
        envelope: &MessageEnvelope,
        sender: Option<&PeerInfo>,
        receiver: Option<&PeerInfo>,
    ) -> (String, Vec<TextEntity>) {
        let sender_tag = tag_of(sender);
        let receiver_tag = tag_of(receiver);
        let (original_tag, original_entity) = self.original_author(envelope.forward.as_ref());

        let mut text = format!("Forwarded from {} to {}", sender_tag, receiver_tag);
        if let Some(tag) = &original_tag {
            text.push_str(&format!(" (fwd from {})", tag));
        }

        let mut entities = Vec::new();
        let participants = [
            (sender, Some(sender_tag.as_str())),
            (receiver, Some(receiver_tag.as_str())),
            (original_entity.as_ref(), original_tag.as_deref()),
        ];
        for (entity, tag) in participants {
            let (user_id, tag) = match (mention_target(entity), tag) {
                (Some(user_id), Some(tag)) => (user_id, tag),
                _ => continue,
            };
            if let Some(offset) = utf16_find(&text, tag) {
                entities.push(TextEntity::mention_name(
                    offset as i32,
                    utf16_len(tag) as i32,
                    user_id,
                ));
            }
        }
        (text, entities)
    }

    /// 回复引用：作者行 + "> " + 摘要，整段包在引用实体内
    pub fn reply_quote(&self, envelope: &MessageEnvelope) -> Option<(String, Vec<TextEntity>)> {
        let target = envelope.reply_to.as_ref()?.target.as_deref()?;

        let author = match target.from {
            Some(peer) => self.directory.peer_ref(peer),
            None => self.directory.peer_ref(target.peer),
        };
        let author_tag = tag_of(author.as_ref());
        let (original_tag, _) = self.original_author(target.forward.as_ref());

        let mut line = author_tag.clone();
        if let Some(tag) = &original_tag {
            line.push_str(&format!(" (from {})", tag));
        }
        let text = format!("{}\n> {}", line, quote_snippet(target));

        let mut entities = vec![TextEntity::new(
            EntityType::Blockquote,
            0,
            utf16_len(&text) as i32,
        )];
        if let Some(offset) = utf16_find(&text, &author_tag) {
            let length = utf16_len(&author_tag) as i32;
            match author.as_ref().and_then(PeerInfo::public_username) {
                Some(username) => entities.push(TextEntity::text_url(
                    offset as i32,
                    length,
                    format!("https://t.me/{}", username),
                )),
                None => entities.push(TextEntity::new(EntityType::Bold, offset as i32, length)),
            }
        }
        Some((text, entities))
    }
}

/// 被回复消息的单行摘要；无文本时用类型标签
pub fn quote_snippet(target: &MessageEnvelope) -> String {
    let collapsed = collapse_whitespace(&target.text);
    if !collapsed.is_empty() {
        return truncate_display(&collapsed, QUOTE_SNIPPET_MAX);
    }
    match target.content_type {
        ContentType::Photo => "Photo".to_string(),
        ContentType::Video => "Video".to_string(),
        ContentType::Voice => "Voice Message".to_string(),
        ContentType::Sticker => target
            .media
            .as_ref()
            .and_then(|media| media.alt.clone())
            .filter(|alt| !alt.is_empty())
            .unwrap_or_else(|| "Sticker".to_string()),
        _ => "Media".to_string(),
    }
}
