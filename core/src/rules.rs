use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

use crate::model::{AuthorClass, ChatId, ContentType};

fn default_true() -> bool {
    true
}

/// 一条转发规则，以源聊天 ID 为键
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub destination: ChatId,
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_true")]
    pub drop_author: bool,
    #[serde(default = "default_true")]
    pub quote_replies: bool,
    #[serde(default = "default_true")]
    pub forward_users: bool,
    #[serde(default = "default_true")]
    pub forward_bots: bool,
    #[serde(default = "default_true", alias = "forward_own")]
    pub forward_outgoing: bool,
    #[serde(default)]
    pub keyword_pattern: String,
    /// 键为 ContentType::key()，缺失项视为允许
    #[serde(default)]
    pub filters: BTreeMap<String, bool>,
}

impl Rule {
    pub fn new(destination: ChatId) -> Self {
        Self {
            destination,
            enabled: true,
            drop_author: true,
            quote_replies: true,
            forward_users: true,
            forward_bots: true,
            forward_outgoing: true,
            keyword_pattern: String::new(),
            filters: BTreeMap::new(),
        }
    }

    pub fn allows_type(&self, content_type: ContentType) -> bool {
        self.filters
            .get(content_type.key())
            .copied()
            .unwrap_or(true)
    }

    pub fn set_type(&mut self, content_type: ContentType, allowed: bool) {
        self.filters.insert(content_type.key().to_string(), allowed);
    }

    pub fn allows_author(&self, class: AuthorClass) -> bool {
        match class {
            AuthorClass::Outgoing => self.forward_outgoing,
            AuthorClass::Bot => self.forward_bots,
            AuthorClass::User => self.forward_users,
        }
    }
}

/// 源聊天 → 规则；每个源最多一条
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleSet {
    rules: HashMap<ChatId, Rule>,
}

impl RuleSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: ChatId) -> Option<&Rule> {
        self.rules.get(&source)
    }

    /// 仅返回已启用的规则
    pub fn active(&self, source: ChatId) -> Option<&Rule> {
        self.rules.get(&source).filter(|rule| rule.enabled)
    }

    pub fn insert(&mut self, source: ChatId, rule: Rule) -> Option<Rule> {
        self.rules.insert(source, rule)
    }

    pub fn remove(&mut self, source: ChatId) -> Option<Rule> {
        self.rules.remove(&source)
    }

    pub fn get_mut(&mut self, source: ChatId) -> Option<&mut Rule> {
        self.rules.get_mut(&source)
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// 按源 ID 排序遍历
    pub fn iter(&self) -> impl Iterator<Item = (ChatId, &Rule)> {
        let mut entries: Vec<_> = self.rules.iter().map(|(k, v)| (*k, v)).collect();
        entries.sort_by_key(|(k, _)| *k);
        entries.into_iter()
    }
}

impl FromIterator<(ChatId, Rule)> for RuleSet {
    fn from_iter<T: IntoIterator<Item = (ChatId, Rule)>>(iter: T) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_fields_take_plugin_defaults() {
        let rule: Rule = serde_json::from_str(r#"{"destination": -100123}"#).unwrap();
        assert_eq!(rule.destination, ChatId(-100123));
        assert!(!rule.enabled);
        assert!(rule.drop_author);
        assert!(rule.quote_replies);
        assert!(rule.forward_outgoing);
        assert!(rule.allows_type(ContentType::Sticker));
    }

    #[test]
    fn legacy_forward_own_key_is_accepted() {
        let rule: Rule = serde_json::from_str(
            r#"{"destination": 5, "enabled": true, "forward_own": false, "filters": {"stickers": false}}"#,
        )
        .unwrap();
        assert!(!rule.forward_outgoing);
        assert!(!rule.allows_author(AuthorClass::Outgoing));
        assert!(rule.allows_author(AuthorClass::Bot));
        assert!(!rule.allows_type(ContentType::Sticker));
        assert!(rule.allows_type(ContentType::Photo));
    }

    #[test]
    fn active_skips_disabled_rules() {
        let mut rules = RuleSet::new();
        let mut rule = Rule::new(ChatId(9));
        rules.insert(ChatId(-1), rule.clone());
        rule.enabled = false;
        rules.insert(ChatId(-2), rule);

        assert!(rules.active(ChatId(-1)).is_some());
        assert!(rules.active(ChatId(-2)).is_none());
        assert!(rules.get(ChatId(-2)).is_some());
        assert!(rules.active(ChatId(-3)).is_none());
    }
}
