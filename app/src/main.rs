use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

use common::text::truncate_text;
use config::{load_config, AppConfig};
use logging::LogGuard;
use storage::{rotate_log, RuleStore};
use tdlib::{TdlibClient, TdlibOutbound};
use tg_core::{
    dispatch::Dispatcher, hotreload::HotReloadManager, resolve::DestinationResolver, ChatId,
    ContentType, RouterHandle, RouterParts, Rule, RuleSet,
};

/// 命令行参数
#[derive(Parser, Debug)]
#[command(name = "tg-auto-forwarder")]
#[command(version, about = "按规则把来源聊天的消息转发到目标聊天")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// 连接 Telegram 并开始转发（默认）
    Run,
    /// 管理转发规则
    #[command(subcommand)]
    Rule(RuleCommand),
}

#[derive(Subcommand, Debug)]
enum RuleCommand {
    /// 解析来源与目标并保存一条启用的规则
    Add(AddRule),
    /// 删除来源的规则
    Remove {
        #[arg(allow_negative_numbers = true)]
        source: i64,
    },
    /// 启用来源的规则
    Enable {
        #[arg(allow_negative_numbers = true)]
        source: i64,
    },
    /// 停用来源的规则
    Disable {
        #[arg(allow_negative_numbers = true)]
        source: i64,
    },
    /// 列出全部规则
    List,
}

#[derive(Args, Debug, Clone)]
struct AddRule {
    /// 来源：数字 ID、@用户名、t.me 链接或邀请链接
    #[arg(allow_negative_numbers = true)]
    source: String,
    /// 目标：格式同来源
    #[arg(allow_negative_numbers = true)]
    destination: String,
    /// 保留 "Forwarded from" 头部
    #[arg(long)]
    keep_author: bool,
    /// 不附带回复引用
    #[arg(long)]
    no_quotes: bool,
    /// 不转发自己发出的消息
    #[arg(long)]
    no_outgoing: bool,
    /// 不转发普通用户的消息
    #[arg(long)]
    no_users: bool,
    /// 不转发机器人的消息
    #[arg(long)]
    no_bots: bool,
    /// 关键词正则，非法正则按子串匹配
    #[arg(long, default_value = "")]
    keyword: String,
    /// 屏蔽的内容类型，可重复：text photos videos documents audio voice video_messages stickers gifs
    #[arg(long = "deny", value_name = "TYPE")]
    deny: Vec<String>,
}

impl AddRule {
    fn build_rule(&self, destination: ChatId) -> Result<Rule> {
        let mut rule = Rule::new(destination);
        rule.drop_author = !self.keep_author;
        rule.quote_replies = !self.no_quotes;
        rule.forward_outgoing = !self.no_outgoing;
        rule.forward_users = !self.no_users;
        rule.forward_bots = !self.no_bots;
        rule.keyword_pattern = self.keyword.trim().to_string();
        for key in &self.deny {
            let content_type = ContentType::from_key(key.trim())
                .with_context(|| format!("未知的内容类型: {}", key))?;
            rule.set_type(content_type, false);
        }
        Ok(rule)
    }
}

enum RunOutcome {
    Exit,
    Reconnect,
}

async fn connect(config: &AppConfig) -> Result<TdlibClient> {
    let client = TdlibClient::connect(
        config.api_id,
        &config.api_hash,
        &config.session_name,
        config.message_cache_size,
        Duration::from_secs(config.request_timeout),
    )
    .await?;

    if !client.is_authorized().await? {
        info!("需要授权，请按提示完成登录");
        client.authorize().await?;
    }

    if let Err(e) = client.load_me().await {
        warn!("获取当前账号失败，私聊头部将显示为 Unknown: {:#}", e);
    }
    Ok(client)
}

struct TelegramForwarder {
    config: AppConfig,
    client: TdlibClient,
    store: RuleStore,
}

impl TelegramForwarder {
    async fn new(config: AppConfig) -> Result<Self> {
        info!("正在初始化 TelegramForwarder...");
        let client = connect(&config).await?;
        let store = RuleStore::new(&config.rules_file);
        Ok(Self {
            config,
            client,
            store,
        })
    }

    async fn run(&self) -> Result<RunOutcome> {
        let rules = self.store.load();
        let enabled = rules.iter().filter(|(_, rule)| rule.enabled).count();
        info!(
            "已加载 {} 条规则，其中 {} 条启用: {:?}",
            rules.len(),
            enabled,
            self.store.path()
        );

        let request_timeout = Duration::from_secs(self.config.request_timeout);
        let dispatcher = Dispatcher::new(self.config.worker_count);
        dispatcher.start_outbound(
            Arc::new(TdlibOutbound::new(self.client.clone())),
            request_timeout,
        );

        let (router, router_task) = RouterHandle::spawn(RouterParts {
            rules,
            settings: self.config.pipeline.clone(),
            directory: self.client.peers(),
            cache: Arc::new(self.client.clone()),
            dispatcher: dispatcher.clone(),
        });

        let hotreload = HotReloadManager::new();
        {
            let router = router.clone();
            hotreload
                .register(self.store.path(), move |path| {
                    let rules = RuleStore::new(path).try_load()?;
                    router.replace_rules(rules);
                    Ok(())
                })
                .await;
        }
        let hotreload_task =
            hotreload.spawn(Duration::from_secs(self.config.hotreload_interval));

        let mut updates = self.client.subscribe_updates().await?;
        info!("启动转发器...");

        let mut message_count = 0u64;
        let outcome = loop {
            tokio::select! {
                batch = updates.recv() => {
                    match batch {
                        Some(batch) => {
                            message_count += batch.len() as u64;
                            router.submit(batch);
                        }
                        None => {
                            warn!("更新流已关闭，准备重新连接");
                            break RunOutcome::Reconnect;
                        }
                    }
                }
                _ = signal::ctrl_c() => {
                    info!("收到退出信号，已接收 {} 条消息", message_count);
                    break RunOutcome::Exit;
                }
            }
        };

        hotreload_task.abort();
        router.shutdown().await;
        if let Err(e) = router_task.await {
            error!("路由任务异常退出: {}", e);
        }

        let drain = Duration::from_secs(self.config.shutdown_drain_timeout);
        if dispatcher.shutdown_graceful(drain).await {
            info!("发送队列已清空");
        } else {
            warn!(
                "发送队列未在 {}s 内清空，剩余 {} 个任务被放弃",
                drain.as_secs(),
                dispatcher.inflight()
            );
        }

        Ok(outcome)
    }
}

async fn run_forever(config: AppConfig) -> Result<()> {
    loop {
        let forwarder = match TelegramForwarder::new(config.clone()).await {
            Ok(f) => f,
            Err(e) => {
                error!("初始化转发器失败: {:#}", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
                continue;
            }
        };

        match forwarder.run().await {
            Ok(RunOutcome::Exit) => break,
            Ok(RunOutcome::Reconnect) => {
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
            Err(e) => {
                error!("运行出错: {:#}，5秒后重新连接", e);
                tokio::time::sleep(Duration::from_secs(5)).await;
            }
        }
    }
    Ok(())
}

async fn add_rule(config: &AppConfig, args: AddRule) -> Result<()> {
    let client = connect(config).await?;
    let resolver = DestinationResolver::new(client.peers(), Arc::new(client.clone()));

    let source = resolver
        .resolve(&args.source)
        .await
        .with_context(|| format!("无法解析来源: {}", args.source))?;
    let destination = resolver
        .resolve(&args.destination)
        .await
        .with_context(|| format!("无法解析目标: {}", args.destination))?;
    if source.id() == destination.id() {
        anyhow::bail!("来源与目标相同: {}", source.id());
    }

    let rule = args.build_rule(destination.id())?;
    let store = RuleStore::new(&config.rules_file);
    let mut rules = store.load();
    if rules.insert(source.id(), rule).is_some() {
        info!("覆盖已有规则: source={}", source.id());
    }
    store.save(&rules)?;

    println!(
        "已添加规则: {} ({}) -> {} ({})",
        source.display_name(),
        source.id(),
        destination.display_name(),
        destination.id()
    );
    Ok(())
}

fn edit_rule(config: &AppConfig, command: RuleCommand) -> Result<()> {
    let store = RuleStore::new(&config.rules_file);
    let mut rules = store.load();

    match command {
        RuleCommand::Remove { source } => {
            let source = ChatId(source);
            rules
                .remove(source)
                .with_context(|| format!("没有来源为 {} 的规则", source))?;
            println!("已删除规则: {}", source);
        }
        RuleCommand::Enable { source } => set_enabled(&mut rules, ChatId(source), true)?,
        RuleCommand::Disable { source } => set_enabled(&mut rules, ChatId(source), false)?,
        RuleCommand::List => {
            print_rules(&store);
            return Ok(());
        }
        RuleCommand::Add(_) => anyhow::bail!("rule add 需要连接 Telegram 解析来源与目标"),
    }

    store.save(&rules)
}

fn set_enabled(rules: &mut RuleSet, source: ChatId, enabled: bool) -> Result<()> {
    let rule = rules
        .get_mut(source)
        .with_context(|| format!("没有来源为 {} 的规则", source))?;
    rule.enabled = enabled;
    println!("规则已{}: {}", if enabled { "启用" } else { "停用" }, source);
    Ok(())
}

fn describe_rule(source: ChatId, rule: &Rule) -> String {
    let denied: Vec<&str> = ContentType::ALL
        .into_iter()
        .filter(|content_type| !rule.allows_type(*content_type))
        .map(ContentType::key)
        .collect();
    let mut line = format!(
        "[{}] {} -> {} author={} quotes={} outgoing={} users={} bots={}",
        if rule.enabled { "on" } else { "off" },
        source,
        rule.destination,
        if rule.drop_author { "drop" } else { "keep" },
        rule.quote_replies,
        rule.forward_outgoing,
        rule.forward_users,
        rule.forward_bots
    );
    if !rule.keyword_pattern.is_empty() {
        line.push_str(&format!(" keyword=\"{}\"", truncate_text(&rule.keyword_pattern, 40)));
    }
    if !denied.is_empty() {
        line.push_str(&format!(" deny={}", denied.join(",")));
    }
    line
}

fn print_rules(store: &RuleStore) {
    let rules = store.load();
    if rules.is_empty() {
        println!("没有规则: {:?}", store.path());
        return;
    }
    for (source, rule) in rules.iter() {
        println!("{}", describe_rule(source, rule));
    }
}

fn main() -> Result<()> {
    // grammers-mtsender 在网络异常时栈占用较深
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .worker_threads(4)
        .thread_stack_size(16 * 1024 * 1024)
        .build()
        .expect("无法创建 tokio 运行时")
        .block_on(async_main())
}

async fn async_main() -> Result<()> {
    dotenv().ok();
    let cli = Cli::parse();
    let config = load_config()?;

    if config.log_file.exists() {
        rotate_log(&config.log_file, config.log_max_lines)?;
    }
    let _log_guard: &'static LogGuard = logging::init(&config.log_file, &config.log_level);

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => run_forever(config).await,
        Command::Rule(RuleCommand::Add(args)) => add_rule(&config, args).await,
        Command::Rule(command) => edit_rule(&config, command),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn add_args(extra: &[&str]) -> AddRule {
        let mut argv = vec!["tg-auto-forwarder", "rule", "add", "@src", "-100123"];
        argv.extend_from_slice(extra);
        match Cli::parse_from(argv).command {
            Some(Command::Rule(RuleCommand::Add(args))) => args,
            other => panic!("unexpected command: {:?}", other),
        }
    }

    #[test]
    fn add_defaults_match_rule_defaults() {
        let rule = add_args(&[]).build_rule(ChatId(-123)).unwrap();
        assert!(rule.enabled);
        assert!(rule.drop_author);
        assert!(rule.quote_replies);
        assert!(rule.forward_outgoing && rule.forward_users && rule.forward_bots);
        assert!(ContentType::ALL.into_iter().all(|ct| rule.allows_type(ct)));
    }

    #[test]
    fn add_flags_flip_rule_fields() {
        let args = add_args(&[
            "--keep-author",
            "--no-quotes",
            "--no-bots",
            "--keyword",
            " cat|dog ",
            "--deny",
            "stickers",
            "--deny",
            "gifs",
        ]);
        let rule = args.build_rule(ChatId(-123)).unwrap();
        assert!(!rule.drop_author);
        assert!(!rule.quote_replies);
        assert!(!rule.forward_bots);
        assert!(rule.forward_users);
        assert_eq!(rule.keyword_pattern, "cat|dog");
        assert!(!rule.allows_type(ContentType::Sticker));
        assert!(!rule.allows_type(ContentType::Gif));
        assert!(rule.allows_type(ContentType::Photo));
    }

    #[test]
    fn unknown_deny_type_is_rejected() {
        let args = add_args(&["--deny", "polls"]);
        assert!(args.build_rule(ChatId(-123)).is_err());
    }

    #[test]
    fn rule_subcommands_take_numeric_sources() {
        let cli = Cli::parse_from(["tg-auto-forwarder", "rule", "disable", "-100"]);
        assert!(matches!(
            cli.command,
            Some(Command::Rule(RuleCommand::Disable { source: -100 }))
        ));
        assert!(Cli::parse_from(["tg-auto-forwarder"]).command.is_none());
    }

    #[test]
    fn describe_lists_denied_types() {
        let mut rule = Rule::new(ChatId(-5));
        rule.set_type(ContentType::Voice, false);
        rule.keyword_pattern = "news".into();
        let line = describe_rule(ChatId(7), &rule);
        assert!(line.starts_with("[on] 7 -> -5"));
        assert!(line.contains("keyword=\"news\""));
        assert!(line.ends_with("deny=voice"));
    }
}
