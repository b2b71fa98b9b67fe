use anyhow::{Context, Result};
use std::sync::Arc;

use super::model::PeerInfo;
use super::platform::{PeerDirectory, PeerResolver};

/// 用户输入的目标聊天形式
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DestinationInput {
    InviteLink(String),
    Numeric(i64),
    Username(String),
}

impl DestinationInput {
    pub fn parse(input: &str) -> Result<Self> {
        let cleaned = input.trim();
        if cleaned.is_empty() {
            anyhow::bail!("目标不能为空");
        }

        if cleaned.contains("/joinchat/") || cleaned.contains("/+") {
            let hash = cleaned
                .trim_end_matches('/')
                .rsplit('/')
                .next()
                .unwrap_or_default()
                .trim_start_matches('+');
            if hash.is_empty() {
                anyhow::bail!("邀请链接缺少 hash: {}", cleaned);
            }
            return Ok(DestinationInput::InviteLink(hash.to_string()));
        }

        if let Ok(id) = cleaned.parse::<i64>() {
            return Ok(DestinationInput::Numeric(id));
        }

        let username = cleaned
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default()
            .replace('@', "");
        if username.is_empty() {
            anyhow::bail!("无法识别的目标: {}", cleaned);
        }
        Ok(DestinationInput::Username(username))
    }
}

/// 去掉超级群组/频道 ID 的 "100" 前缀，得到接口使用的短 ID
pub fn short_channel_id(id: i64) -> i64 {
    let abs = id.unsigned_abs();
    let digits = abs.to_string();
    if digits.len() > 9 {
        if let Some(rest) = digits.strip_prefix("100") {
            if let Ok(short) = rest.parse::<i64>() {
                return short;
            }
        }
    }
    abs as i64
}

/// 本地未命中时一次性尝试的候选 ID：{short, -short, |id|, -|id|}
pub fn lookup_candidates(id: i64) -> Vec<i64> {
    let short = short_channel_id(id);
    let abs = id.saturating_abs();
    let mut candidates = Vec::with_capacity(4);
    for candidate in [short, -short, abs, -abs] {
        if candidate != 0 && !candidates.contains(&candidate) {
            candidates.push(candidate);
        }
    }
    candidates
}

pub struct DestinationResolver {
    directory: Arc<dyn PeerDirectory>,
    remote: Arc<dyn PeerResolver>,
}

impl DestinationResolver {
    pub fn new(directory: Arc<dyn PeerDirectory>, remote: Arc<dyn PeerResolver>) -> Self {
        Self { directory, remote }
    }

    /// 依次按邀请链接、数字 ID、用户名解析；解析结果 ID 为 0 视为失败
    pub async fn resolve(&self, input: &str) -> Result<PeerInfo> {
        let parsed = DestinationInput::parse(input)?;
        let resolved = match &parsed {
            DestinationInput::InviteLink(hash) => self
                .remote
                .check_invite(hash)
                .await
                .with_context(|| format!("邀请链接解析失败: {}", input.trim()))?,
            DestinationInput::Numeric(id) => match self.lookup_local(*id) {
                Some(info) => Some(info),
                None => {
                    tracing::info!("ID {} 不在本地缓存，尝试远程查询", id);
                    self.remote
                        .lookup_chats(lookup_candidates(*id))
                        .await
                        .with_context(|| format!("按 ID 查询失败: {}", id))?
                }
            },
            DestinationInput::Username(username) => self
                .remote
                .resolve_username(username)
                .await
                .with_context(|| format!("用户名解析失败: {}", username))?,
        };

        let info = resolved.with_context(|| format!("找不到目标聊天: {}", input.trim()))?;
        if info.id().0 == 0 {
            anyhow::bail!("目标聊天 ID 无效: {}", input.trim());
        }
        Ok(info)
    }

    fn lookup_local(&self, id: i64) -> Option<PeerInfo> {
        if id == 0 {
            return None;
        }
        if let Some(info) = self.directory.chat(id.saturating_abs()) {
            return Some(info);
        }
        if id > 0 {
            return self.directory.user(id);
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatId, PeerKind, PeerRef};
    use crate::platform::LookupFuture;
    use std::sync::Mutex;

    #[test]
    fn parses_destination_forms() {
        assert_eq!(
            DestinationInput::parse(" https://t.me/joinchat/AbCd ").unwrap(),
            DestinationInput::InviteLink("AbCd".into())
        );
        assert_eq!(
            DestinationInput::parse("https://t.me/+XyZ").unwrap(),
            DestinationInput::InviteLink("XyZ".into())
        );
        assert_eq!(
            DestinationInput::parse("-1001234567890").unwrap(),
            DestinationInput::Numeric(-1001234567890)
        );
        assert_eq!(
            DestinationInput::parse("https://t.me/somechannel").unwrap(),
            DestinationInput::Username("somechannel".into())
        );
        assert_eq!(
            DestinationInput::parse("@someone").unwrap(),
            DestinationInput::Username("someone".into())
        );
        assert!(DestinationInput::parse("   ").is_err());
    }

    #[test]
    fn strips_channel_prefix_only_from_long_ids() {
        assert_eq!(short_channel_id(-1001234567890), 1234567890);
        assert_eq!(short_channel_id(100123), 100123);
        assert_eq!(
            lookup_candidates(-1001234567890),
            vec![1234567890, -1234567890, 1001234567890, -1001234567890]
        );
        assert_eq!(lookup_candidates(-42), vec![42, -42]);
    }

    struct Local;

    impl PeerDirectory for Local {
        fn user(&self, user_id: i64) -> Option<PeerInfo> {
            (user_id == 7).then(|| PeerInfo {
                peer: PeerRef::User(7),
                kind: PeerKind::User { bot: false },
                title: "Seven".into(),
                last_name: None,
                username: None,
            })
        }
        fn chat(&self, _raw_id: i64) -> Option<PeerInfo> {
            None
        }
        fn me(&self) -> Option<PeerInfo> {
            None
        }
    }

    #[derive(Default)]
    struct Remote {
        seen: Mutex<Vec<Vec<i64>>>,
    }

    impl PeerResolver for Remote {
        fn check_invite(&self, _hash: &str) -> LookupFuture {
            Box::pin(async { Err::<Option<PeerInfo>, _>(anyhow::anyhow!("INVITE_HASH_EXPIRED")) })
        }

        fn lookup_chats(&self, candidates: Vec<i64>) -> LookupFuture {
            let hit = candidates.contains(&1234567890);
            self.seen.lock().unwrap().push(candidates);
            Box::pin(async move {
                Ok(hit.then(|| PeerInfo {
                    peer: PeerRef::Channel(1234567890),
                    kind: PeerKind::Broadcast,
                    title: "Remote".into(),
                    last_name: None,
                    username: None,
                }))
            })
        }

        fn resolve_username(&self, _username: &str) -> LookupFuture {
            Box::pin(async { Ok(None) })
        }
    }

    #[tokio::test]
    async fn numeric_ids_hit_local_cache_before_remote() {
        let remote = Arc::new(Remote::default());
        let resolver = DestinationResolver::new(Arc::new(Local), remote.clone());

        let local = resolver.resolve("7").await.unwrap();
        assert_eq!(local.id(), ChatId(7));
        assert!(remote.seen.lock().unwrap().is_empty());

        let channel = resolver.resolve("-1001234567890").await.unwrap();
        assert_eq!(channel.id(), ChatId(-1234567890));
        assert_eq!(remote.seen.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn failures_surface_as_errors() {
        let resolver = DestinationResolver::new(Arc::new(Local), Arc::new(Remote::default()));
        assert!(resolver.resolve("https://t.me/+dead").await.is_err());
        assert!(resolver.resolve("@nobody").await.is_err());
        assert!(resolver.resolve("0").await.is_err());
    }
}
