use anyhow::{anyhow, Context, Result};
use grammers_client::{
    grammers_tl_types as tl,
    types::{Message, Peer, Update},
    Client, SignInError, UpdatesConfiguration,
};
use grammers_mtsender::SenderPool;
use grammers_session::{defs::PeerRef as SessionPeer, storages::SqliteSession, updates::UpdatesLike};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::{
    sync::mpsc,
    task::JoinHandle,
    time::{timeout, Duration},
};
use tracing::{debug, error, info, warn};

use tg_core::ingest::incomplete_reason;
use tg_core::platform::{FetchFuture, LookupFuture, MessageCache, PeerDirectory, PeerResolver};
use tg_core::{ChatId, MessageEnvelope, PeerInfo, PeerRef};

use super::cache::MessageStore;
use super::convert::{chat_info, convert_message, peer_info, session_peer};
use super::peers::PeerCache;

const LOGIN_TIMEOUT: Duration = Duration::from_secs(25);
const MAX_CONSECUTIVE_ERRORS: u32 = 10;

#[derive(Clone)]
pub struct TdlibClient {
    client: Client,
    api_hash: String,
    updates_rx: Arc<tokio::sync::Mutex<Option<mpsc::UnboundedReceiver<UpdatesLike>>>>,
    _runner: Arc<RunnerGuard>,
    runner_alive: Arc<AtomicBool>,
    peers: Arc<PeerCache>,
    messages: Arc<MessageStore>,
    request_timeout: Duration,
}

struct RunnerGuard {
    handle: JoinHandle<()>,
}

impl Drop for RunnerGuard {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

fn prompt(label: &str) -> Result<String> {
    let input = tokio::task::block_in_place(|| {
        println!("{}", label);
        let mut input = String::new();
        std::io::stdin().read_line(&mut input)?;
        Ok::<String, std::io::Error>(input.trim().to_string())
    })?;
    Ok(input)
}

impl TdlibClient {
    pub async fn connect(
        api_id: i32,
        api_hash: &str,
        session_name: &str,
        message_cache_size: usize,
        request_timeout: Duration,
    ) -> Result<Self> {
        let session = Arc::new(
            SqliteSession::open(session_name)
                .with_context(|| format!("无法打开 session: {}", session_name))?,
        );
        let pool = SenderPool::new(session, api_id);
        let client = Client::new(&pool);

        let runner_alive = Arc::new(AtomicBool::new(true));
        let runner_alive_clone = runner_alive.clone();

        let runner = tokio::spawn(async move {
            pool.runner.run().await;
            runner_alive_clone.store(false, Ordering::Release);
            warn!("SenderPool runner 已退出（可能是网络断开或连接错误）");
        });

        Ok(Self {
            client,
            api_hash: api_hash.to_string(),
            updates_rx: Arc::new(tokio::sync::Mutex::new(Some(pool.updates))),
            _runner: Arc::new(RunnerGuard { handle: runner }),
            runner_alive,
            peers: Arc::new(PeerCache::new()),
            messages: Arc::new(MessageStore::new(message_cache_size)),
            request_timeout,
        })
    }

    /// 检查 runner 是否仍然存活
    pub fn is_runner_alive(&self) -> bool {
        self.runner_alive.load(Ordering::Acquire) && !self._runner.handle.is_finished()
    }

    pub async fn is_authorized(&self) -> Result<bool> {
        Ok(self.client.is_authorized().await?)
    }

    pub async fn authorize(&self) -> Result<()> {
        if self.is_authorized().await? {
            return Ok(());
        }

        let phone = prompt("请输入手机号（带国际区号，例如 +8613800138000）：")?;

        info!("正在请求验证码，请稍候...");
        let token = timeout(
            LOGIN_TIMEOUT,
            self.client.request_login_code(&phone, &self.api_hash),
        )
        .await
        .context("请求验证码超时，请检查网络或代理")??;
        info!("验证码已发送，若未收到请检查设备或等待片刻");

        let code = prompt("请输入验证码：")?;
        let sign_in = timeout(LOGIN_TIMEOUT, self.client.sign_in(&token, &code))
            .await
            .context("登录请求超时，请检查网络或代理")?;

        match sign_in {
            Ok(_) => {}
            Err(SignInError::PasswordRequired(token)) => {
                let password = prompt("请输入二步验证密码：")?;
                timeout(
                    LOGIN_TIMEOUT,
                    self.client
                        .check_password(token, password.as_bytes().to_vec()),
                )
                .await
                .context("二步验证超时，请检查网络或代理")??;
            }
            Err(e) => {
                error!("登录失败: {}", e);
                return Err(e.into());
            }
        }

        Ok(())
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn peers(&self) -> Arc<PeerCache> {
        self.peers.clone()
    }

    async fn timed<T, E, F>(&self, action: &str, fut: F) -> Result<T>
    where
        F: Future<Output = std::result::Result<T, E>>,
        E: Into<anyhow::Error>,
    {
        match timeout(self.request_timeout, fut).await {
            Ok(result) => result
                .map_err(Into::<anyhow::Error>::into)
                .with_context(|| format!("{}失败", action)),
            Err(_) => Err(anyhow!(
                "{}超时: timeout={}s",
                action,
                self.request_timeout.as_secs()
            )),
        }
    }

    /// 加载当前账号，用于私聊头部和自己消息的限流键
    pub async fn load_me(&self) -> Result<PeerInfo> {
        let me = self.timed("获取当前账号", self.client.get_me()).await?;
        let info = self.remember_peer(&Peer::User(me));
        self.peers.set_me(info.clone());
        info!("当前账号: {} ({})", info.display_name(), info.id());
        Ok(info)
    }

    fn remember_peer(&self, peer: &Peer) -> PeerInfo {
        let info = peer_info(peer);
        self.peers.remember(info.clone(), peer.into());
        info
    }

    /// 缓存未命中时向服务器解析实体
    pub async fn ensure_peer(&self, peer: PeerRef) -> Result<PeerInfo> {
        if let Some(info) = self.peers.peer_ref(peer) {
            return Ok(info);
        }
        let resolved = self
            .timed("解析实体", self.client.resolve_peer(session_peer(peer)))
            .await?;
        Ok(self.remember_peer(&resolved))
    }

    async fn session_for(&self, peer: PeerRef) -> Result<SessionPeer> {
        self.ensure_peer(peer).await?;
        self.peers
            .session_peer(peer.chat_id())
            .with_context(|| format!("实体未缓存: {}", peer.chat_id()))
    }

    /// 规范化 ID 对应的发送目标；负数 ID 依次按频道、普通群组尝试
    pub async fn destination(&self, id: ChatId) -> Result<SessionPeer> {
        if let Some(session) = self.peers.session_peer(id) {
            return Ok(session);
        }
        let candidates = if id.is_user() {
            vec![PeerRef::User(id.0)]
        } else {
            vec![PeerRef::Channel(id.raw()), PeerRef::Chat(id.raw())]
        };
        let mut last_error = None;
        for candidate in candidates {
            match self.session_for(candidate).await {
                Ok(session) => return Ok(session),
                Err(e) => last_error = Some(e),
            }
        }
        Err(last_error.unwrap_or_else(|| anyhow!("无效的目标 ID: {}", id)))
    }

    async fn ensure_envelope_peers(&self, envelope: &MessageEnvelope) {
        let origin = envelope.forward.as_ref().and_then(|origin| origin.from);
        for peer in [Some(envelope.peer), envelope.from, origin].into_iter().flatten() {
            if let Err(e) = self.ensure_peer(peer).await {
                debug!("实体解析失败: peer={:?} error={:#}", peer, e);
            }
        }
    }

    /// 入站消息：补全实体缓存、从本地缓存挂上回复目标并写入消息缓存
    async fn ingest(&self, msg: &Message, edited: bool) -> Option<MessageEnvelope> {
        let mut envelope = convert_message(msg)?;
        let chat = envelope.source_chat();
        if edited && !self.messages.take_pending(chat, envelope.id) {
            return None;
        }

        self.ensure_envelope_peers(&envelope).await;
        if let Some(reply) = envelope.reply_to.as_mut() {
            if let Some(target) = self.messages.get(chat, reply.message_id) {
                reply.target = Some(Box::new(target));
            }
        }
        self.messages.insert(envelope.clone());
        Some(envelope)
    }

    async fn fetch_remote(&self, chat: PeerRef, message_id: i64) -> Result<Option<MessageEnvelope>> {
        let id = i32::try_from(message_id).with_context(|| format!("消息 ID 越界: {}", message_id))?;
        let session = self.session_for(chat).await?;
        let messages = self
            .timed("拉取消息", self.client.get_messages_by_id(session, &[id]))
            .await?;
        let envelope = messages
            .into_iter()
            .flatten()
            .next()
            .and_then(|msg| convert_message(&msg));
        if let Some(envelope) = &envelope {
            self.ensure_envelope_peers(envelope).await;
        }
        Ok(envelope)
    }

    async fn read_through(&self, chat: PeerRef, message_id: i64) -> Result<Option<MessageEnvelope>> {
        if let Some(cached) = self.messages.get(chat.chat_id(), message_id) {
            if incomplete_reason(&cached).is_none() {
                return Ok(Some(cached));
            }
        }

        let mut envelope = match self.fetch_remote(chat, message_id).await? {
            Some(envelope) => envelope,
            None => return Ok(None),
        };
        if let Some(reply) = envelope.reply_to.as_mut() {
            let target = match self.messages.get(chat.chat_id(), reply.message_id) {
                Some(target) => Some(target),
                None => self.fetch_remote(chat, reply.message_id).await?,
            };
            reply.target = target.map(Box::new);
        }
        self.messages.insert(envelope.clone());
        Ok(Some(envelope))
    }

    pub async fn subscribe_updates(&self) -> Result<mpsc::UnboundedReceiver<Vec<MessageEnvelope>>> {
        let updates = {
            let mut guard = self.updates_rx.lock().await;
            guard.take().context("更新通道已被消费，无法重复订阅")?
        };

        let (sender, receiver) = mpsc::unbounded_channel();
        let this = self.clone();

        tokio::spawn(async move {
            let mut stream = this.client.stream_updates(
                updates,
                UpdatesConfiguration {
                    catch_up: false,
                    ..Default::default()
                },
            );

            let mut consecutive_errors = 0u32;
            loop {
                let (msg, edited) = match stream.next().await {
                    Ok(Update::NewMessage(msg)) => (msg, false),
                    Ok(Update::MessageEdited(msg)) => (msg, true),
                    Ok(_) => {
                        consecutive_errors = 0;
                        continue;
                    }
                    Err(e) => {
                        consecutive_errors += 1;
                        error!("更新流错误 ({}): {}", consecutive_errors, e);

                        if !this.is_runner_alive() {
                            error!("Runner 已崩溃，更新流无法继续");
                            break;
                        }
                        if consecutive_errors >= MAX_CONSECUTIVE_ERRORS {
                            error!("连续错误次数过多 ({})，更新流可能已损坏", consecutive_errors);
                            break;
                        }
                        tokio::time::sleep(Duration::from_secs(1)).await;
                        continue;
                    }
                };
                consecutive_errors = 0;

                if let Some(envelope) = this.ingest(&msg, edited).await {
                    if edited {
                        debug!(
                            "不完整消息已补全: chat={} msg_id={}",
                            envelope.source_chat(),
                            envelope.id
                        );
                    }
                    if sender.send(vec![envelope]).is_err() {
                        break;
                    }
                }
            }

            drop(sender);
            warn!("更新流已停止");
        });

        Ok(receiver)
    }
}

impl MessageCache for TdlibClient {
    fn fetch(&self, chat: PeerRef, message_id: i64) -> FetchFuture {
        let this = self.clone();
        Box::pin(async move { this.read_through(chat, message_id).await })
    }
}

impl PeerResolver for TdlibClient {
    fn check_invite(&self, hash: &str) -> LookupFuture {
        let this = self.clone();
        let hash = hash.to_string();
        Box::pin(async move {
            let request = tl::functions::messages::CheckChatInvite { hash };
            let invite = this.timed("检查邀请链接", this.client.invoke(&request)).await?;
            let chat = match invite {
                tl::enums::ChatInvite::Already(invite) => invite.chat,
                tl::enums::ChatInvite::Peek(invite) => invite.chat,
                tl::enums::ChatInvite::Invite(_) => {
                    anyhow::bail!("尚未加入该邀请链接对应的聊天")
                }
            };
            let info = chat_info(&chat);
            if let Some(info) = &info {
                this.peers.remember(info.clone(), session_peer(info.peer));
            }
            Ok(info)
        })
    }

    fn lookup_chats(&self, candidates: Vec<i64>) -> LookupFuture {
        let this = self.clone();
        Box::pin(async move {
            let raw_ids: Vec<i64> = candidates.into_iter().filter(|id| *id > 0).collect();
            if raw_ids.is_empty() {
                return Ok(None);
            }

            let request = tl::functions::messages::GetChats { id: raw_ids.clone() };
            match this.timed("批量查询群组", this.client.invoke(&request)).await {
                Ok(chats) => {
                    let chats = match chats {
                        tl::enums::messages::Chats::Chats(chats) => chats.chats,
                        tl::enums::messages::Chats::Slice(slice) => slice.chats,
                    };
                    if let Some(info) = chats.iter().find_map(chat_info) {
                        this.peers.remember(info.clone(), session_peer(info.peer));
                        return Ok(Some(info));
                    }
                }
                Err(e) => debug!("批量查询群组未命中: ids={:?} error={:#}", raw_ids, e),
            }

            for raw_id in raw_ids {
                match this.ensure_peer(PeerRef::Channel(raw_id)).await {
                    Ok(info) => return Ok(Some(info)),
                    Err(e) => debug!("频道查询未命中: id={} error={:#}", raw_id, e),
                }
            }
            Ok(None)
        })
    }

    fn resolve_username(&self, username: &str) -> LookupFuture {
        let this = self.clone();
        let username = username.to_string();
        Box::pin(async move {
            let peer = this
                .timed("解析用户名", this.client.resolve_username(&username))
                .await?;
            Ok(peer.map(|peer| this.remember_peer(&peer)))
        })
    }
}
