use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Arg, ArgMatches, Command};
use relay_config::AppConfig;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::app::{AppMode, Application};
use crate::shutdown::ShutdownManager;

/// 等待各组件退出的最长时间
pub const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(30);

/// 通用的应用启动配置
#[derive(Debug, Clone, Default)]
pub struct StartupConfig {
    /// 未指定时依次查找默认路径，都不存在则使用内置默认值
    pub config_path: Option<String>,
    pub log_level: String,
    pub log_format: String,
    pub worker_id: Option<String>,
    pub bind_address: Option<String>,
}

impl StartupConfig {
    pub fn from_matches(matches: &ArgMatches) -> Self {
        let optional = |name: &str| {
            matches
                .try_get_one::<String>(name)
                .ok()
                .flatten()
                .cloned()
        };

        Self {
            config_path: optional("config"),
            log_level: optional("log-level").unwrap_or_else(|| "info".to_string()),
            log_format: optional("log-format").unwrap_or_else(|| "pretty".to_string()),
            worker_id: optional("worker-id"),
            bind_address: optional("bind"),
        }
    }
}

/// 所有二进制共用的参数
pub fn base_command(name: &'static str, about: &'static str) -> Command {
    Command::new(name)
        .version(env!("CARGO_PKG_VERSION"))
        .about(about)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("配置文件路径（默认查找 config/relay.toml）"),
        )
        .arg(
            Arg::new("log-level")
                .short('l')
                .long("log-level")
                .value_name("LEVEL")
                .help("日志级别，RUST_LOG 优先")
                .value_parser(["trace", "debug", "info", "warn", "error"])
                .default_value("info"),
        )
        .arg(
            Arg::new("log-format")
                .long("log-format")
                .value_name("FORMAT")
                .help("日志格式")
                .value_parser(["json", "pretty"])
                .default_value("pretty"),
        )
}

pub fn worker_id_arg() -> Arg {
    Arg::new("worker-id")
        .short('w')
        .long("worker-id")
        .value_name("ID")
        .help("覆盖配置中的 worker.worker_id")
}

pub fn bind_arg() -> Arg {
    Arg::new("bind")
        .long("bind")
        .value_name("ADDR")
        .help("覆盖配置中的 api.bind_address，格式 host:port")
}

/// 初始化日志系统
pub fn init_logging(log_level: &str, log_format: &str) -> Result<()> {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

    let registry = tracing_subscriber::registry().with(env_filter);

    match log_format {
        "json" => {
            registry
                .with(tracing_subscriber::fmt::layer().json())
                .try_init()
                .context("初始化JSON日志格式失败")?;
        }
        "pretty" => {
            registry
                .with(tracing_subscriber::fmt::layer().pretty())
                .try_init()
                .context("初始化Pretty日志格式失败")?;
        }
        _ => {
            return Err(anyhow::anyhow!("不支持的日志格式: {log_format}"));
        }
    }

    Ok(())
}

/// 加载应用配置并应用命令行覆盖
pub fn load_config(startup_config: &StartupConfig) -> Result<AppConfig> {
    let mut config = AppConfig::load(startup_config.config_path.as_deref()).with_context(|| {
        format!(
            "加载配置失败: {}",
            startup_config.config_path.as_deref().unwrap_or("<默认路径>")
        )
    })?;

    if let Some(ref worker_id) = startup_config.worker_id {
        config.worker.worker_id = worker_id.clone();
    }
    if let Some(ref bind_address) = startup_config.bind_address {
        config.api.bind_address = bind_address.clone();
    }

    Ok(config)
}

/// 验证指定的模式是否在配置中被启用
pub fn ensure_mode_enabled(app_mode: AppMode, config: &AppConfig) -> Result<()> {
    let enabled = match app_mode {
        AppMode::Dispatcher => config.dispatcher.enabled,
        AppMode::Worker => config.worker.enabled,
        AppMode::Api => config.api.enabled,
        AppMode::All => true,
    };
    if !enabled {
        return Err(anyhow::anyhow!("{app_mode}模式被禁用，请检查配置"));
    }
    Ok(())
}

/// 启动应用并阻塞到收到关闭信号
pub async fn start_application(startup_config: StartupConfig, app_mode: AppMode) -> Result<()> {
    init_logging(&startup_config.log_level, &startup_config.log_format)?;

    info!("启动Relay，模式: {}", app_mode);
    let config = load_config(&startup_config)?;
    ensure_mode_enabled(app_mode, &config)?;

    let app = Application::new(config, app_mode).await?;
    let shutdown_manager = ShutdownManager::new();

    let app_handle = {
        let shutdown_rx = shutdown_manager.subscribe();
        tokio::spawn(async move {
            if let Err(e) = app.run(shutdown_rx).await {
                error!("应用运行失败: {:#}", e);
            }
        })
    };

    wait_for_shutdown_signal().await;
    info!("收到关闭信号，开始优雅关闭...");

    if shutdown_manager
        .shutdown_and_wait(app_handle, SHUTDOWN_TIMEOUT)
        .await
    {
        info!("应用已优雅关闭");
    } else {
        warn!("应用关闭超时，强制退出");
    }

    info!("Relay已退出");
    Ok(())
}

/// 单一模式二进制的入口
pub async fn run_cli(
    name: &'static str,
    about: &'static str,
    extra_args: Vec<Arg>,
    app_mode: AppMode,
) -> Result<()> {
    let matches = base_command(name, about).args(extra_args).get_matches();
    start_application(StartupConfig::from_matches(&matches), app_mode).await
}

/// 等待Ctrl+C或SIGTERM
async fn wait_for_shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!("安装Ctrl+C信号处理器失败: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!("安装SIGTERM信号处理器失败: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("收到Ctrl+C信号");
        },
        _ = terminate => {
            info!("收到SIGTERM信号");
        },
    }
}
