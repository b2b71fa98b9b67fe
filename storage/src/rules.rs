use anyhow::{Context, Result};
use std::path::{Path, PathBuf};
use tg_core::model::ChatId;
use tg_core::rules::{Rule, RuleSet};

/// 规则文件：JSON 对象 "源聊天 ID" → Rule
#[derive(Debug, Clone)]
pub struct RuleStore {
    path: PathBuf,
}

impl RuleStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// 读取规则；文件缺失或损坏时返回空规则集，不向上抛错
    pub fn load(&self) -> RuleSet {
        match self.try_load() {
            Ok(rules) => rules,
            Err(err) => {
                tracing::warn!("规则文件无法解析，已重置为空: {:?} ({:#})", self.path, err);
                RuleSet::new()
            }
        }
    }

    /// 与 load 相同，但把读取或解析错误交给调用方
    pub fn try_load(&self) -> Result<RuleSet> {
        if !self.path.exists() {
            return Ok(RuleSet::new());
        }

        let content = std::fs::read_to_string(&self.path)
            .with_context(|| format!("无法读取规则文件: {:?}", self.path))?;
        if content.trim().is_empty() {
            return Ok(RuleSet::new());
        }

        parse_rules(&content)
    }

    pub fn save(&self, rules: &RuleSet) -> Result<()> {
        let content = serialize_rules(rules)?;

        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content)
            .with_context(|| format!("无法写入规则文件: {:?}", tmp))?;
        std::fs::rename(&tmp, &self.path)
            .with_context(|| format!("无法替换规则文件: {:?}", self.path))?;

        tracing::debug!("已保存 {} 条规则: {:?}", rules.len(), self.path);
        Ok(())
    }
}

/// 整体不是 JSON 对象时报错；单条规则损坏时跳过该条
pub fn parse_rules(content: &str) -> Result<RuleSet> {
    let data: serde_json::Map<String, serde_json::Value> =
        serde_json::from_str(content).context("规则文件不是 JSON 对象")?;

    let mut rules = RuleSet::new();
    for (key, value) in data {
        let source = match key.trim().parse::<i64>() {
            Ok(id) if id != 0 => ChatId(id),
            _ => {
                tracing::warn!("忽略无效的源聊天 ID: {}", key);
                continue;
            }
        };
        match serde_json::from_value::<Rule>(value) {
            Ok(rule) => {
                rules.insert(source, rule);
            }
            Err(err) => tracing::warn!("忽略无法解析的规则: source={} ({})", key, err),
        }
    }

    Ok(rules)
}

pub fn serialize_rules(rules: &RuleSet) -> Result<String> {
    let mut data = serde_json::Map::new();
    for (source, rule) in rules.iter() {
        data.insert(source.to_string(), serde_json::to_value(rule)?);
    }
    Ok(serde_json::to_string_pretty(&serde_json::Value::Object(data))?)
}
