use grammers_client::grammers_tl_types as tl;
use grammers_session::defs::PeerRef as SessionPeer;
use std::collections::HashMap;
use std::sync::Mutex;

use tg_core::platform::PeerDirectory;
use tg_core::{ChatId, PeerInfo};

/// 本地实体缓存：规范化 ID -> (展示信息, 带认证的 session 引用)
#[derive(Default)]
pub struct PeerCache {
    peers: Mutex<HashMap<ChatId, (PeerInfo, SessionPeer)>>,
    me: Mutex<Option<PeerInfo>>,
}

impl PeerCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn remember(&self, info: PeerInfo, session: SessionPeer) {
        if let Ok(mut peers) = self.peers.lock() {
            peers.insert(info.id(), (info, session));
        }
    }

    pub fn set_me(&self, info: PeerInfo) {
        if let Ok(mut me) = self.me.lock() {
            *me = Some(info);
        }
    }

    pub fn contains(&self, id: ChatId) -> bool {
        self.peers
            .lock()
            .map(|peers| peers.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn session_peer(&self, id: ChatId) -> Option<SessionPeer> {
        let peers = self.peers.lock().ok()?;
        peers.get(&id).map(|(_, session)| *session)
    }

    /// MentionName 实体需要 InputUser
    pub fn input_user(&self, user_id: i64) -> Option<tl::enums::InputUser> {
        let session = self.session_peer(ChatId(user_id))?;
        match tl::enums::InputPeer::from(session) {
            tl::enums::InputPeer::User(user) => Some(
                tl::types::InputUser {
                    user_id: user.user_id,
                    access_hash: user.access_hash,
                }
                .into(),
            ),
            _ => None,
        }
    }

    pub fn len(&self) -> usize {
        self.peers.lock().map(|peers| peers.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl PeerDirectory for PeerCache {
    fn user(&self, user_id: i64) -> Option<PeerInfo> {
        if user_id <= 0 {
            return None;
        }
        let peers = self.peers.lock().ok()?;
        peers.get(&ChatId(user_id)).map(|(info, _)| info.clone())
    }

    fn chat(&self, raw_id: i64) -> Option<PeerInfo> {
        if raw_id <= 0 {
            return None;
        }
        let peers = self.peers.lock().ok()?;
        peers.get(&ChatId(-raw_id)).map(|(info, _)| info.clone())
    }

    fn me(&self) -> Option<PeerInfo> {
        self.me.lock().ok()?.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::convert::session_peer;
    use tg_core::{PeerKind, PeerRef};

    fn info(peer: PeerRef, kind: PeerKind, title: &str) -> PeerInfo {
        PeerInfo {
            peer,
            kind,
            title: title.to_string(),
            last_name: None,
            username: None,
        }
    }

    #[test]
    fn looks_up_users_and_chats_by_sign() {
        let cache = PeerCache::new();
        cache.remember(
            info(PeerRef::User(5), PeerKind::User { bot: false }, "Bob"),
            session_peer(PeerRef::User(5)),
        );
        cache.remember(
            info(PeerRef::Channel(5), PeerKind::Broadcast, "News"),
            session_peer(PeerRef::Channel(5)),
        );

        assert_eq!(cache.len(), 2);
        assert_eq!(cache.user(5).unwrap().title, "Bob");
        assert_eq!(cache.chat(5).unwrap().title, "News");
        assert_eq!(cache.peer(ChatId(-5)).unwrap().title, "News");
        assert!(cache.user(-5).is_none());
        assert!(cache.me().is_none());
    }

    #[test]
    fn input_user_only_for_users() {
        let cache = PeerCache::new();
        cache.remember(
            info(PeerRef::User(9), PeerKind::User { bot: true }, "Bot"),
            session_peer(PeerRef::User(9)),
        );
        cache.remember(
            info(PeerRef::Chat(9), PeerKind::BasicGroup, "Group"),
            session_peer(PeerRef::Chat(9)),
        );
        assert!(cache.input_user(9).is_some());
        assert!(cache.input_user(10).is_none());
    }
}
