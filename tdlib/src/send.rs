use anyhow::Result;
use common::text::truncate_text;
use grammers_client::{grammers_tl_types as tl, types::InputMessage};
use grammers_session::defs::PeerRef as SessionPeer;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use tracing::info;

use tg_core::platform::{Outbound, SendFuture};
use tg_core::{AlbumItem, EntityType, ForwardPayload, ForwardTask, MediaType, MediaView, TextEntity};

use super::peers::PeerCache;
use super::TdlibClient;

/// 把 ForwardTask 发往目标聊天；失败直接返回错误，由调度器记录
#[derive(Clone)]
pub struct TdlibOutbound {
    client: TdlibClient,
}

impl TdlibOutbound {
    pub fn new(client: TdlibClient) -> Self {
        Self { client }
    }

    async fn deliver(&self, task: ForwardTask) -> Result<()> {
        let peer = self.client.destination(task.destination).await?;
        let peers = self.client.peers();
        match task.payload {
            ForwardPayload::Text { text, entities } => {
                info!(
                    "发送文本: dest={} 长度={} 内容预览=\"{}\"",
                    task.destination,
                    text.chars().count(),
                    truncate_text(&text, 120)
                );
                let msg = InputMessage::new()
                    .text(text.as_str())
                    .fmt_entities(convert_entities(&entities, &peers));
                self.client.client().send_message(peer, msg).await?;
            }
            ForwardPayload::Media {
                media,
                caption,
                entities,
            } => {
                info!(
                    "发送媒体: dest={} type={:?} caption预览=\"{}\"",
                    task.destination,
                    media.media_type,
                    truncate_text(&caption, 120)
                );
                let msg = InputMessage::new()
                    .text(caption.as_str())
                    .fmt_entities(convert_entities(&entities, &peers))
                    .media(convert_media(&media)?);
                self.client.client().send_message(peer, msg).await?;
            }
            ForwardPayload::Album { items } => {
                info!("发送相册: dest={} 张数={}", task.destination, items.len());
                self.send_album(peer, &items, &peers).await?;
            }
        }
        Ok(())
    }

    async fn send_album(&self, peer: SessionPeer, items: &[AlbumItem], peers: &PeerCache) -> Result<()> {
        if items.is_empty() {
            return Ok(());
        }

        let mut multi_media = Vec::with_capacity(items.len());
        for item in items {
            let entities = (!item.entities.is_empty()).then(|| convert_entities(&item.entities, peers));
            multi_media.push(tl::enums::InputSingleMedia::Media(tl::types::InputSingleMedia {
                media: convert_media(&item.media)?,
                random_id: next_random_id(),
                message: item.caption.clone(),
                entities,
            }));
        }

        self.client
            .client()
            .invoke(&tl::functions::messages::SendMultiMedia {
                silent: false,
                background: false,
                clear_draft: false,
                noforwards: false,
                update_stickersets_order: false,
                invert_media: false,
                allow_paid_floodskip: false,
                peer: peer.into(),
                reply_to: None,
                multi_media,
                schedule_date: None,
                send_as: None,
                quick_reply_shortcut: None,
                effect: None,
                allow_paid_stars: None,
            })
            .await?;
        Ok(())
    }
}

impl Outbound for TdlibOutbound {
    fn send(&self, task: ForwardTask) -> SendFuture {
        let this = self.clone();
        Box::pin(async move { this.deliver(task).await })
    }
}

static RANDOM_ID_SEQ: OnceLock<AtomicU64> = OnceLock::new();

fn next_random_id() -> i64 {
    let seq = RANDOM_ID_SEQ.get_or_init(|| {
        let seed = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .map(|elapsed| elapsed.as_nanos() as u64)
            .unwrap_or_default();
        AtomicU64::new(seed)
    });
    seq.fetch_add(1, Ordering::Relaxed) as i64
}

fn convert_media(media: &MediaView) -> Result<tl::enums::InputMedia> {
    let id = media
        .media_id
        .ok_or_else(|| anyhow::anyhow!("媒体 ID 缺失"))?;

    match media.media_type {
        MediaType::Photo => Ok(tl::types::InputMediaPhoto {
            spoiler: media.spoiler,
            id: tl::types::InputPhoto {
                id,
                access_hash: media.access_hash,
                file_reference: media.file_reference.clone(),
            }
            .into(),
            ttl_seconds: None,
        }
        .into()),
        MediaType::Document => Ok(tl::types::InputMediaDocument {
            spoiler: media.spoiler,
            id: tl::types::InputDocument {
                id,
                access_hash: media.access_hash,
                file_reference: media.file_reference.clone(),
            }
            .into(),
            ttl_seconds: None,
            query: None,
            video_cover: None,
            video_timestamp: None,
        }
        .into()),
        MediaType::WebPage => anyhow::bail!("链接预览不能作为媒体发送"),
    }
}

fn convert_entities(entities: &[TextEntity], peers: &PeerCache) -> Vec<tl::enums::MessageEntity> {
    entities
        .iter()
        .filter_map(|entity| convert_entity(entity, peers))
        .collect()
}

fn convert_entity(entity: &TextEntity, peers: &PeerCache) -> Option<tl::enums::MessageEntity> {
    let (offset, length) = (entity.offset, entity.length);
    let converted: tl::enums::MessageEntity = match entity.entity_type {
        EntityType::Bold => tl::types::MessageEntityBold { offset, length }.into(),
        EntityType::Italic => tl::types::MessageEntityItalic { offset, length }.into(),
        EntityType::Underline => tl::types::MessageEntityUnderline { offset, length }.into(),
        EntityType::Strikethrough => tl::types::MessageEntityStrike { offset, length }.into(),
        EntityType::Code => tl::types::MessageEntityCode { offset, length }.into(),
        EntityType::Pre => tl::types::MessageEntityPre {
            offset,
            length,
            language: entity.data.clone().unwrap_or_default(),
        }
        .into(),
        EntityType::TextUrl => tl::types::MessageEntityTextUrl {
            offset,
            length,
            url: entity.data.clone()?,
        }
        .into(),
        EntityType::Mention => tl::types::MessageEntityMention { offset, length }.into(),
        // 没有缓存到 access_hash 的用户退化为加粗
        EntityType::MentionName => match entity.user_id.and_then(|id| peers.input_user(id)) {
            Some(user_id) => tl::types::InputMessageEntityMentionName {
                offset,
                length,
                user_id,
            }
            .into(),
            None => tl::types::MessageEntityBold { offset, length }.into(),
        },
        EntityType::Hashtag => tl::types::MessageEntityHashtag { offset, length }.into(),
        EntityType::Spoiler => tl::types::MessageEntitySpoiler { offset, length }.into(),
        EntityType::Blockquote => tl::types::MessageEntityBlockquote {
            offset,
            length,
            collapsed: entity.data.as_deref() == Some("true"),
        }
        .into(),
        EntityType::Url => tl::types::MessageEntityUrl { offset, length }.into(),
        EntityType::Email => tl::types::MessageEntityEmail { offset, length }.into(),
        EntityType::Phone => tl::types::MessageEntityPhone { offset, length }.into(),
        EntityType::Cashtag => tl::types::MessageEntityCashtag { offset, length }.into(),
        EntityType::BankCard => tl::types::MessageEntityBankCard { offset, length }.into(),
        EntityType::BotCommand => tl::types::MessageEntityBotCommand { offset, length }.into(),
        EntityType::CustomEmoji => tl::types::MessageEntityCustomEmoji {
            offset,
            length,
            document_id: entity.data.as_ref()?.parse::<i64>().ok()?,
        }
        .into(),
    };
    Some(converted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::session_peer;
    use tg_core::{PeerInfo, PeerKind, PeerRef};

    #[test]
    fn mention_without_known_user_falls_back_to_bold() {
        let peers = PeerCache::new();
        let mention = TextEntity::mention_name(0, 3, 42);
        assert!(matches!(
            convert_entity(&mention, &peers),
            Some(tl::enums::MessageEntity::Bold(_))
        ));

        peers.remember(
            PeerInfo {
                peer: PeerRef::User(42),
                kind: PeerKind::User { bot: false },
                title: "Bob".into(),
                last_name: None,
                username: None,
            },
            session_peer(PeerRef::User(42)),
        );
        assert!(matches!(
            convert_entity(&mention, &peers),
            Some(tl::enums::MessageEntity::InputMessageEntityMentionName(_))
        ));
    }

    #[test]
    fn text_url_without_target_is_dropped() {
        let peers = PeerCache::new();
        let mut link = TextEntity::text_url(0, 1, "https://t.me/x".into());
        assert!(convert_entity(&link, &peers).is_some());
        link.data = None;
        assert!(convert_entity(&link, &peers).is_none());
    }

    #[test]
    fn web_page_media_is_not_sendable() {
        assert!(convert_media(&MediaView::web_page()).is_err());
        assert!(convert_media(&MediaView::photo(1, 2, vec![3])).is_ok());
    }
}
