use regex::{Regex, RegexBuilder};
use std::collections::HashMap;

use super::model::{MediaType, MessageEnvelope};
use super::rules::Rule;

/// 关键词表达式：能编译为正则则按正则搜索，否则退回子串匹配
#[derive(Debug, Clone)]
enum KeywordMatcher {
    Regex(Regex),
    Substring(String),
}

impl KeywordMatcher {
    fn compile(pattern: &str) -> Self {
        match RegexBuilder::new(pattern).case_insensitive(true).build() {
            Ok(re) => KeywordMatcher::Regex(re),
            Err(e) => {
                tracing::debug!("关键词正则编译失败，改用子串匹配: {} ({})", pattern, e);
                KeywordMatcher::Substring(pattern.to_lowercase())
            }
        }
    }

    fn is_match(&self, text: &str) -> bool {
        match self {
            KeywordMatcher::Regex(re) => re.is_match(text),
            KeywordMatcher::Substring(needle) => text.to_lowercase().contains(needle.as_str()),
        }
    }
}

/// 内容过滤：类型 → 关键词 → 长度
pub struct ContentFilter {
    min_len: usize,
    max_len: usize,
    matchers: HashMap<String, KeywordMatcher>,
}

impl ContentFilter {
    pub fn new(min_len: usize, max_len: usize) -> Self {
        Self {
            min_len,
            max_len,
            matchers: HashMap::new(),
        }
    }

    pub fn set_length_bounds(&mut self, min_len: usize, max_len: usize) {
        self.min_len = min_len;
        self.max_len = max_len;
    }

    /// 空表达式放行；空文本不匹配任何非空表达式
    pub fn matches_keyword(&mut self, pattern: &str, text: &str) -> bool {
        if pattern.is_empty() {
            return true;
        }
        if text.is_empty() {
            return false;
        }
        self.matchers
            .entry(pattern.to_string())
            .or_insert_with(|| KeywordMatcher::compile(pattern))
            .is_match(text)
    }

    pub fn length_ok(&self, text: &str) -> bool {
        let len = text.chars().count();
        self.min_len <= len && len <= self.max_len
    }

    /// 单条消息的完整检查，返回 (是否放行, 拒绝原因)
    pub fn check(&mut self, rule: &Rule, envelope: &MessageEnvelope) -> (bool, Option<String>) {
        if !rule.allows_type(envelope.content_type) {
            return (
                false,
                Some(format!("类型被禁止: {}", envelope.content_type.key())),
            );
        }

        if !self.matches_keyword(&rule.keyword_pattern, &envelope.text) {
            return (
                false,
                Some(format!("未匹配关键词: {}", rule.keyword_pattern)),
            );
        }

        let text_based = match &envelope.media {
            None => true,
            Some(media) => media.media_type == MediaType::WebPage,
        };
        if text_based && !self.length_ok(&envelope.text) {
            return (
                false,
                Some(format!("长度超出范围: {}", envelope.text.chars().count())),
            );
        }

        (true, None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{ChatId, ContentType, MediaView, PeerRef};

    fn text(s: &str) -> MessageEnvelope {
        MessageEnvelope::new(1, PeerRef::Chat(1), 0).with_text(s)
    }

    #[test]
    fn invalid_regex_falls_back_to_substring() {
        let mut filter = ContentFilter::new(1, 4096);
        assert!(filter.matches_keyword("(", "contains ( literally"));
        assert!(!filter.matches_keyword("(", "nothing here"));
    }

    #[test]
    fn regex_is_a_case_insensitive_search() {
        let mut filter = ContentFilter::new(1, 4096);
        assert!(!filter.matches_keyword(r"\bcat\b", "Concatenate"));
        assert!(filter.matches_keyword(r"\bcat\b", "a CAT sat"));
        assert!(!filter.matches_keyword("cat", ""));
        assert!(filter.matches_keyword("", ""));
    }

    #[test]
    fn length_applies_only_to_text_based_messages() {
        let mut filter = ContentFilter::new(3, 5);
        let rule = Rule::new(ChatId(1));

        assert!(!filter.check(&rule, &text("hi")).0);
        assert!(filter.check(&rule, &text("héllo")).0);
        assert!(!filter.check(&rule, &text("too long")).0);

        let photo = text("").with_media(MediaView::photo(1, 1, vec![1]));
        assert!(filter.check(&rule, &photo).0);

        let preview = text("x").with_media(MediaView::web_page());
        assert!(!filter.check(&rule, &preview).0);
    }

    #[test]
    fn type_filter_runs_first() {
        let mut filter = ContentFilter::new(1, 4096);
        let mut rule = Rule::new(ChatId(1));
        rule.set_type(ContentType::Photo, false);
        let photo = text("hello").with_media(MediaView::photo(1, 1, vec![1]));
        let (ok, reason) = filter.check(&rule, &photo);
        assert!(!ok);
        assert!(reason.unwrap().contains("photos"));
    }
}
