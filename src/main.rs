//! Notify Relay CLI
//!
//! 订阅推送 stream，按规则把消息转发到配置的 webhook

use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use notify_relay::relay::{decode_frame, Frame};
use notify_relay::{Config, EffectiveTarget, RelayPlugin};
use std::path::PathBuf;
use tracing::{error, info};
use tracing_subscriber::{fmt, EnvFilter};

const CONFIG_HELP: &str = "\
配置说明：
  1. 在推送服务中创建一个 Client，获取 token，填入 client_token
  2. 修改服务器地址 host_server，默认为 ws://localhost
  3. 在 web_hooks 中填写需要接收通知的 webhook

  webhook 字段：url（必填）、method（默认 POST）、body（支持 $title / $message）、
  header（默认 Content-Type: application/json）、tags、rules

  body 中只有 $title / $message 的值会把换行转义为 \\n，模板自身的真实换行原样发送；
  需要单行 JSON 时，模板里的换行请写成 \\n（JSON 配置文件中为 \\\\n）。

  rules 为空时按 extras.tag 与 tags 匹配；否则所有规则都满足才转发。
  规则 type 可选 appid / title / message / tag，mode 可选 AND / OR。

  修改配置后请重新启动。";

#[derive(Parser)]
#[command(name = "notify-relay")]
#[command(about = "Notify Relay - 订阅推送 stream 并转发到 webhook")]
#[command(after_long_help = CONFIG_HELP)]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 ~/.config/notify-relay/config.json）
    #[arg(long, short, global = true)]
    config: Option<PathBuf>,

    /// 输出调试日志
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// 连接 stream 并持续转发，Ctrl+C 退出
    Run,
    /// 校验配置并列出生效的 webhook
    Check,
    /// 用一条消息 JSON 试跑规则，不发送请求
    Match {
        /// 消息 JSON，如 {"title":"t","message":"m","appid":1}
        message: String,
    },
    /// 测试 WebSocket 地址能否连通
    TestConnection {
        /// 目标地址（默认使用配置中的 stream 地址）
        url: Option<String>,
    },
    /// 写出示例配置
    Init {
        /// 覆盖已存在的配置文件
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = cli.config.clone().unwrap_or_else(Config::default_path);
    let loaded = Config::load(&path);

    let debug = cli.debug || loaded.as_ref().map(|c| c.debug).unwrap_or(false);
    let default_filter = if debug {
        "notify_relay=debug"
    } else {
        "notify_relay=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .init();

    match cli.command {
        Commands::Init { force } => {
            if path.exists() && !force {
                return Err(anyhow!("配置文件已存在: {}（使用 --force 覆盖）", path.display()));
            }
            Config::sample().save(&path)?;
            println!("✅ 已写入示例配置: {}", path.display());
            println!("{}", CONFIG_HELP);
        }
        Commands::Check => {
            let config = loaded.with_context(|| format!("加载配置失败: {}", path.display()))?;
            config.validate()?;
            println!("host_server: {}", config.host_server);
            println!("web_hooks: {}", config.web_hooks.len());
            for (i, hook) in config.web_hooks.iter().enumerate() {
                match EffectiveTarget::resolve(hook) {
                    Ok(target) => println!(
                        "  [{}] {} {} ({} tags, {} rules)",
                        i,
                        target.method,
                        target.url,
                        hook.tags.len(),
                        hook.rules.len()
                    ),
                    Err(failure) => println!("  [{}] ❌ {}", i, failure),
                }
            }
        }
        Commands::Match { message } => {
            let config = loaded.with_context(|| format!("加载配置失败: {}", path.display()))?;
            let (msg, extras) = match decode_frame(&message)? {
                Frame::Message(msg, extras) => (msg, extras),
                Frame::Unsupported => return Err(anyhow!("消息必须是 JSON 对象")),
            };
            for (i, hook) in config.web_hooks.iter().enumerate() {
                let matched = notify_relay::relay::matches(&msg, &extras, hook);
                println!("  [{}] {} {}", i, if matched { "✅" } else { "⏭️" }, hook.url);
            }
        }
        Commands::TestConnection { url } => {
            let url = match url {
                Some(url) => url,
                None => loaded
                    .with_context(|| format!("加载配置失败: {}", path.display()))?
                    .stream_url(),
            };
            let plugin = RelayPlugin::new(Config::default())?;
            plugin.test_connection(&url).await?;
            println!("✅ 连接成功");
        }
        Commands::Run => {
            let config = loaded.with_context(|| format!("加载配置失败: {}", path.display()))?;
            let mut plugin = RelayPlugin::new(config)?;
            plugin.enable().await?;

            let interrupt = plugin.interrupt_token();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("shutdown signal received (Ctrl+C)");
                    interrupt.trigger();
                }
            });

            let end = plugin.wait().await?;
            if end.is_requested() {
                info!(end = ?end, "Relay exited");
            } else {
                error!(end = ?end, "Relay session ended");
                return Err(anyhow!("session ended: {:?}", end));
            }
        }
    }

    Ok(())
}
