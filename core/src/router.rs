use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use super::album::{AlbumAction, AlbumAggregator, AlbumKey};
use super::antispam::AntiSpamLimiter;
use super::compose::{fit_entities, merge_prefix, Composer, Prefix};
use super::dedup::{DedupLedger, EventKey};
use super::deferral::DeferralManager;
use super::dispatch::Dispatcher;
use super::filter::ContentFilter;
use super::ingest::{classify_author, incomplete_reason, throttle_key};
use super::model::{
    AlbumItem, ChatId, ContentType, ForwardPayload, ForwardTask, MediaView, MessageEnvelope,
    TextEntity,
};
use super::platform::{MessageCache, PeerDirectory};
use super::rules::{Rule, RuleSet};
use super::settings::PipelineSettings;
use super::timer::TimerHandle;

/// 投递给路由 actor 的事件。所有状态修改都在 actor 任务内完成
#[derive(Debug)]
pub enum RouterEvent {
    NewMessages(Vec<MessageEnvelope>),
    AlbumTimeout {
        key: AlbumKey,
        seq: u64,
    },
    /// 缺失引用的分片已尝试刷新
    AlbumReady {
        key: AlbumKey,
        parts: Vec<MessageEnvelope>,
    },
    DeferralTimeout {
        key: EventKey,
        seq: u64,
    },
    Refetched {
        key: EventKey,
        seq: u64,
        fresh: Option<MessageEnvelope>,
    },
    ReplaceRules(RuleSet),
    UpsertRule {
        source: ChatId,
        rule: Rule,
    },
    RemoveRule(ChatId),
    UpdateSettings(PipelineSettings),
    Shutdown(oneshot::Sender<()>),
}

pub struct RouterParts {
    pub rules: RuleSet,
    pub settings: PipelineSettings,
    pub directory: Arc<dyn PeerDirectory>,
    pub cache: Arc<dyn MessageCache>,
    pub dispatcher: Dispatcher,
}

/// 单账号的路由上下文：规则、缓冲、缓存与定时器
pub struct Router {
    rules: RuleSet,
    settings: PipelineSettings,
    antispam: AntiSpamLimiter,
    ledger: DedupLedger,
    albums: AlbumAggregator,
    deferrals: DeferralManager,
    filter: ContentFilter,
    directory: Arc<dyn PeerDirectory>,
    cache: Arc<dyn MessageCache>,
    dispatcher: Dispatcher,
    events: mpsc::UnboundedSender<RouterEvent>,
}

#[derive(Clone)]
pub struct RouterHandle {
    events: mpsc::UnboundedSender<RouterEvent>,
}

impl RouterHandle {
    /// 启动路由 actor
    pub fn spawn(parts: RouterParts) -> (Self, JoinHandle<()>) {
        let (events, receiver) = mpsc::unbounded_channel();
        let router = Router::new(parts, events.clone());
        let task = tokio::spawn(router.run(receiver));
        (Self { events }, task)
    }

    fn post(&self, event: RouterEvent) {
        if self.events.send(event).is_err() {
            warn!("路由已停止，事件被丢弃");
        }
    }

    pub fn submit(&self, batch: Vec<MessageEnvelope>) {
        if !batch.is_empty() {
            self.post(RouterEvent::NewMessages(batch));
        }
    }

    pub fn replace_rules(&self, rules: RuleSet) {
        self.post(RouterEvent::ReplaceRules(rules));
    }

    pub fn upsert_rule(&self, source: ChatId, rule: Rule) {
        self.post(RouterEvent::UpsertRule { source, rule });
    }

    pub fn remove_rule(&self, source: ChatId) {
        self.post(RouterEvent::RemoveRule(source));
    }

    pub fn update_settings(&self, settings: PipelineSettings) {
        self.post(RouterEvent::UpdateSettings(settings));
    }

    /// 取消所有相册与延迟定时器，等待 actor 确认
    pub async fn shutdown(&self) {
        let (ack, done) = oneshot::channel();
        if self.events.send(RouterEvent::Shutdown(ack)).is_err() {
            return;
        }
        let _ = done.await;
    }
}

impl Router {
    pub fn new(parts: RouterParts, events: mpsc::UnboundedSender<RouterEvent>) -> Self {
        let RouterParts {
            rules,
            settings,
            directory,
            cache,
            dispatcher,
        } = parts;
        Self {
            antispam: AntiSpamLimiter::new(settings.antispam_delay()),
            ledger: DedupLedger::new(settings.dedup_window()),
            filter: ContentFilter::new(settings.min_msg_length, settings.max_msg_length),
            albums: AlbumAggregator::new(),
            deferrals: DeferralManager::new(),
            rules,
            settings,
            directory,
            cache,
            dispatcher,
            events,
        }
    }

    pub async fn run(mut self, mut receiver: mpsc::UnboundedReceiver<RouterEvent>) {
        info!("路由已启动: rules={}", self.rules.len());
        while let Some(event) = receiver.recv().await {
            match event {
                RouterEvent::Shutdown(ack) => {
                    self.shutdown();
                    let _ = ack.send(());
                    break;
                }
                event => self.handle_event(event),
            }
        }
        info!("路由已停止");
    }

    fn shutdown(&mut self) {
        let albums = self.albums.clear();
        let deferred = self.deferrals.clear();
        info!(
            "路由关闭: 丢弃相册缓冲={} 延迟消息={}",
            albums, deferred
        );
    }

    fn handle_event(&mut self, event: RouterEvent) {
        match event {
            RouterEvent::NewMessages(batch) => {
                for envelope in batch {
                    let (chat, id) = (envelope.source_chat(), envelope.id);
                    if let Err(e) = self.handle_message(envelope) {
                        error!("处理消息失败: chat={} msg_id={} error={:#}", chat, id, e);
                    }
                }
            }
            RouterEvent::AlbumTimeout { key, seq } => {
                if let Err(e) = self.on_album_timeout(key, seq) {
                    error!("处理相册失败: chat={} group={} error={:#}", key.chat, key.group_id, e);
                }
            }
            RouterEvent::AlbumReady { key, parts } => {
                if let Err(e) = self.flush_album(key, parts) {
                    error!("处理相册失败: chat={} group={} error={:#}", key.chat, key.group_id, e);
                }
            }
            RouterEvent::DeferralTimeout { key, seq } => {
                if let Err(e) = self.on_deferral_timeout(key, seq) {
                    error!("处理延迟消息失败: error={:#}", e);
                }
            }
            RouterEvent::Refetched { key, seq, fresh } => {
                if let Err(e) = self.on_refetched(key, seq, fresh) {
                    error!("处理延迟消息失败: error={:#}", e);
                }
            }
            RouterEvent::ReplaceRules(rules) => {
                info!("规则已更新: {} 条", rules.len());
                self.rules = rules;
            }
            RouterEvent::UpsertRule { source, rule } => {
                info!("规则已写入: source={} dest={}", source, rule.destination);
                self.rules.insert(source, rule);
            }
            RouterEvent::RemoveRule(source) => {
                if self.rules.remove(source).is_some() {
                    info!("规则已删除: source={}", source);
                }
            }
            RouterEvent::UpdateSettings(settings) => {
                self.antispam.set_delay(settings.antispam_delay());
                self.ledger.set_window(settings.dedup_window());
                self.filter
                    .set_length_bounds(settings.min_msg_length, settings.max_msg_length);
                self.settings = settings;
            }
            RouterEvent::Shutdown(_) => {}
        }
    }

    fn album_timer(&self, key: AlbumKey) -> impl FnOnce(u64) -> TimerHandle {
        let events = self.events.clone();
        let delay = self.settings.album_timeout();
        move |seq| {
            TimerHandle::schedule(delay, async move {
                let _ = events.send(RouterEvent::AlbumTimeout { key, seq });
            })
        }
    }

    fn deferral_timer(&self, key: EventKey) -> impl FnOnce(u64) -> TimerHandle {
        let events = self.events.clone();
        let delay = self.settings.deferral_timeout();
        move |seq| {
            TimerHandle::schedule(delay, async move {
                let _ = events.send(RouterEvent::DeferralTimeout { key, seq });
            })
        }
    }

    fn handle_message(&mut self, envelope: MessageEnvelope) -> anyhow::Result<()> {
        let source = envelope.source_chat();
        let rule = match self.rules.active(source) {
            Some(rule) => rule,
            None => return Ok(()),
        };

        let class = classify_author(&envelope, self.directory.as_ref());
        if !rule.allows_author(class) {
            debug!("作者类型被规则禁止: chat={} class={:?}", source, class);
            return Ok(());
        }

        if let Some(key) = AlbumKey::of(&envelope) {
            let start = self.album_timer(key);
            if let AlbumAction::Started { seq } = self.albums.add_part(key, envelope, start) {
                debug!("相册缓冲已创建: chat={} group={} seq={}", key.chat, key.group_id, seq);
            }
            return Ok(());
        }

        if self.antispam.is_enabled() {
            let self_id = self.directory.me().map(|me| me.id());
            if let Some(author) = throttle_key(&envelope, self_id) {
                if !self.antispam.check(author, Instant::now()) {
                    info!("限流丢弃: author={} chat={} msg_id={}", author, source, envelope.id);
                    return Ok(());
                }
            }
        }

        let key = EventKey::for_message(&envelope);
        if self.ledger.is_duplicate(&key, Instant::now()) {
            debug!("重复消息: chat={} msg_id={}", source, envelope.id);
            return Ok(());
        }

        if let Some(reason) = incomplete_reason(&envelope) {
            let start = self.deferral_timer(key.clone());
            if self.deferrals.defer(key, envelope, start).is_some() {
                info!("消息延迟处理: chat={} reason={}", source, reason);
            }
            return Ok(());
        }

        if self.deferrals.resolve(&key) {
            info!("延迟消息已提前补全: chat={} msg_id={}", source, envelope.id);
        }

        self.process_and_send(envelope, key)
    }

    fn on_deferral_timeout(&mut self, key: EventKey, seq: u64) -> anyhow::Result<()> {
        let envelope = match self.deferrals.begin_refetch(&key, seq) {
            Some(envelope) => envelope,
            None => return Ok(()),
        };

        if envelope.outgoing {
            return self.on_refetched(key, seq, None);
        }

        let cache = self.cache.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let fresh = match cache.fetch(envelope.peer, envelope.id).await {
                Ok(fresh) => fresh,
                Err(e) => {
                    warn!("重新拉取消息失败，使用原始副本: msg_id={} error={:#}", envelope.id, e);
                    None
                }
            };
            let _ = events.send(RouterEvent::Refetched { key, seq, fresh });
        });
        Ok(())
    }

    fn on_refetched(
        &mut self,
        key: EventKey,
        seq: u64,
        fresh: Option<MessageEnvelope>,
    ) -> anyhow::Result<()> {
        let original = match self.deferrals.finish(&key, seq) {
            Some(original) => original,
            None => return Ok(()),
        };
        let envelope = match fresh {
            Some(fresh) => {
                debug!("已从缓存重新拉取消息: msg_id={}", fresh.id);
                fresh
            }
            None => original,
        };
        info!("超时后处理延迟消息: chat={} msg_id={}", envelope.source_chat(), envelope.id);
        self.process_and_send(envelope, key)
    }

    fn process_and_send(&mut self, envelope: MessageEnvelope, key: EventKey) -> anyhow::Result<()> {
        if self.ledger.is_duplicate(&key, Instant::now()) {
            debug!("重复消息: chat={} msg_id={}", envelope.source_chat(), envelope.id);
            return Ok(());
        }

        let source = envelope.source_chat();
        let rule = match self.rules.active(source) {
            Some(rule) => rule.clone(),
            None => return Ok(()),
        };

        let (allowed, reason) = self.filter.check(&rule, &envelope);
        if !allowed {
            info!(
                "消息被过滤: chat={} msg_id={} reason={}",
                source,
                envelope.id,
                reason.unwrap_or_default()
            );
            return Ok(());
        }

        let task = match self.compose_single(&rule, &envelope) {
            Some(task) => task,
            None => {
                debug!("消息没有可发送的内容: chat={} msg_id={}", source, envelope.id);
                return Ok(());
            }
        };

        self.ledger.record(key, Instant::now());
        info!(
            "转发消息: {} -> {} msg_id={} kind={}",
            source,
            task.destination,
            envelope.id,
            task.kind()
        );
        self.dispatcher.dispatch(task);
        Ok(())
    }

    /// 拼接前缀与正文；实体无法对齐时丢弃格式，保留纯文本
    fn finish_text(&self, prefix: &Prefix, body: &str, body_entities: &[TextEntity]) -> (String, Vec<TextEntity>) {
        let (text, entities) = merge_prefix(prefix, body, body_entities);
        match fit_entities(&text, entities) {
            Ok(entities) => (text, entities),
            Err(e) => {
                warn!("格式实体计算失败，改为纯文本发送: {:#}", e);
                (text, Vec::new())
            }
        }
    }

    fn compose_single(&self, rule: &Rule, envelope: &MessageEnvelope) -> Option<ForwardTask> {
        let (body, body_entities) = if rule.allows_type(ContentType::Text) {
            (envelope.text.as_str(), envelope.entities.as_slice())
        } else {
            ("", &[][..])
        };
        let prefix = Composer::new(self.directory.as_ref()).prefix(rule, envelope);
        let (text, entities) = self.finish_text(&prefix, body, body_entities);

        let payload = match envelope.media.as_ref().filter(|media| media.is_sendable()) {
            Some(media) => ForwardPayload::Media {
                media: media.clone(),
                caption: text,
                entities,
            },
            None if !text.trim().is_empty() => ForwardPayload::Text { text, entities },
            None => return None,
        };
        Some(ForwardTask {
            source: envelope.source_chat(),
            destination: rule.destination,
            payload,
        })
    }

    fn on_album_timeout(&mut self, key: AlbumKey, seq: u64) -> anyhow::Result<()> {
        let parts = match self.albums.take(key, seq) {
            Some(parts) if !parts.is_empty() => parts,
            _ => return Ok(()),
        };

        let needs_refresh = parts
            .iter()
            .any(|part| part.media.as_ref().map_or(false, |m| !m.is_complete()));
        if !needs_refresh {
            return self.flush_album(key, parts);
        }

        let cache = self.cache.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let parts = refresh_album_parts(cache, parts).await;
            let _ = events.send(RouterEvent::AlbumReady { key, parts });
        });
        Ok(())
    }

    fn flush_album(&mut self, key: AlbumKey, parts: Vec<MessageEnvelope>) -> anyhow::Result<()> {
        let first = match parts.first() {
            Some(first) => first,
            None => return Ok(()),
        };
        let rule = match self.rules.active(key.chat) {
            Some(rule) => rule.clone(),
            None => {
                info!("相册的规则已删除，丢弃: chat={} group={}", key.chat, key.group_id);
                return Ok(());
            }
        };

        let album_key = EventKey::for_album(first, key.group_id);
        if self.ledger.is_duplicate(&album_key, Instant::now()) {
            debug!("重复相册: chat={} group={}", key.chat, key.group_id);
            return Ok(());
        }

        let kept: Vec<(&MessageEnvelope, &MediaView)> = parts
            .iter()
            .filter(|part| rule.allows_type(part.content_type))
            .filter_map(|part| {
                part.media
                    .as_ref()
                    .filter(|media| media.is_sendable())
                    .map(|media| (part, media))
            })
            .collect();
        if kept.is_empty() {
            info!(
                "相册所有分片均被过滤: chat={} group={} parts={}",
                key.chat,
                key.group_id,
                parts.len()
            );
            return Ok(());
        }

        // 关键词只看真正会作为说明文字发出的那一段
        let caption_text = kept
            .iter()
            .find(|(part, _)| !part.text.is_empty())
            .map(|(part, _)| part.text.as_str())
            .unwrap_or_default();
        if !self.filter.matches_keyword(&rule.keyword_pattern, caption_text) {
            info!(
                "相册被过滤: chat={} group={} reason=未匹配关键词",
                key.chat, key.group_id
            );
            return Ok(());
        }

        let (body, body_entities) = if rule.allows_type(ContentType::Text) {
            kept.iter()
                .find(|(part, _)| !part.text.is_empty())
                .map(|(part, _)| (part.text.as_str(), part.entities.as_slice()))
                .unwrap_or(("", &[][..]))
        } else {
            ("", &[][..])
        };
        let prefix = Composer::new(self.directory.as_ref()).prefix(&rule, first);
        let (caption, entities) = self.finish_text(&prefix, body, body_entities);

        let mut caption = Some((caption, entities));
        let items: Vec<AlbumItem> = kept
            .iter()
            .map(|(_, media)| {
                let (caption, entities) = caption.take().unwrap_or_default();
                AlbumItem {
                    media: (*media).clone(),
                    caption,
                    entities,
                }
            })
            .collect();

        self.ledger.record(album_key, Instant::now());
        info!(
            "转发相册: {} -> {} group={} items={}/{}",
            key.chat,
            rule.destination,
            key.group_id,
            items.len(),
            parts.len()
        );
        self.dispatcher.dispatch(ForwardTask {
            source: key.chat,
            destination: rule.destination,
            payload: ForwardPayload::Album { items },
        });
        Ok(())
    }
}

/// 从缓存刷新缺少引用的分片；刷新结果不完整时保留原分片
async fn refresh_album_parts(
    cache: Arc<dyn MessageCache>,
    parts: Vec<MessageEnvelope>,
) -> Vec<MessageEnvelope> {
    let mut refreshed = Vec::with_capacity(parts.len());
    for part in parts {
        let incomplete = part.media.as_ref().map_or(false, |m| !m.is_complete());
        if !incomplete {
            refreshed.push(part);
            continue;
        }
        match cache.fetch(part.peer, part.id).await {
            Ok(Some(fresh)) if fresh.media.as_ref().map_or(false, MediaView::is_complete) => {
                debug!("相册分片已从缓存刷新: msg_id={}", part.id);
                refreshed.push(fresh);
            }
            Ok(_) => refreshed.push(part),
            Err(e) => {
                warn!("刷新相册分片失败: msg_id={} error={:#}", part.id, e);
                refreshed.push(part);
            }
        }
    }
    refreshed
}
