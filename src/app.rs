use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use anyhow::{Context, Result};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

use relay_api::{create_app, metrics_routes, AppState};
use relay_config::AppConfig;
use relay_core::RuntimeConfig;
use relay_dispatcher::ProducerScheduler;
use relay_domain::{KeySpace, KvStore};
use relay_infrastructure::StoreFactory;
use relay_worker::{HandlerRegistry, OpsClient, WorkerService};

/// 应用运行模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppMode {
    /// 仅运行生产者调度
    Dispatcher,
    /// 仅运行Worker
    Worker,
    /// 仅运行Operator API
    Api,
    /// 运行所有启用的组件
    All,
}

impl AppMode {
    fn runs_dispatcher(self) -> bool {
        matches!(self, AppMode::Dispatcher | AppMode::All)
    }

    fn runs_api(self) -> bool {
        matches!(self, AppMode::Api | AppMode::All)
    }
}

impl FromStr for AppMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dispatcher" => Ok(AppMode::Dispatcher),
            "worker" => Ok(AppMode::Worker),
            "api" => Ok(AppMode::Api),
            "all" => Ok(AppMode::All),
            _ => Err(anyhow::anyhow!("不支持的运行模式: {s}")),
        }
    }
}

impl fmt::Display for AppMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AppMode::Dispatcher => "dispatcher",
            AppMode::Worker => "worker",
            AppMode::Api => "api",
            AppMode::All => "all",
        };
        f.write_str(name)
    }
}

/// 主应用程序
pub struct Application {
    config: AppConfig,
    mode: AppMode,
    store: Arc<dyn KvStore>,
    keys: KeySpace,
    prometheus: Option<PrometheusHandle>,
}

impl Application {
    pub async fn new(config: AppConfig, mode: AppMode) -> Result<Self> {
        info!("初始化应用程序，模式: {}", mode);

        let store = StoreFactory::create(&config.store)
            .await
            .context("创建存储失败")?;
        let keys = KeySpace::new(config.store.key_prefix.clone());

        if mode.runs_dispatcher() && !config.dispatcher.seed.is_empty() {
            let written = RuntimeConfig::new(store.clone(), keys.clone())
                .seed(&config.dispatcher.seed)
                .await
                .context("写入初始运行参数失败")?;
            info!(
                "初始运行参数: 写入 {} 项，共 {} 项",
                written,
                config.dispatcher.seed.len()
            );
        }

        let prometheus = if config.observability.metrics_enabled && mode.runs_api() {
            Some(install_prometheus()?)
        } else {
            None
        };

        Ok(Self {
            config,
            mode,
            store,
            keys,
            prometheus,
        })
    }

    pub fn mode(&self) -> AppMode {
        self.mode
    }

    pub async fn run(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动应用程序，模式: {}", self.mode);

        match self.mode {
            AppMode::Dispatcher => self.run_dispatcher(shutdown_rx).await,
            AppMode::Worker => self.run_worker(shutdown_rx).await,
            AppMode::Api => self.run_api(shutdown_rx).await,
            AppMode::All => self.run_all_components(shutdown_rx).await,
        }
    }

    async fn run_dispatcher(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let holder = format!("dispatcher-{}", node_name());
        info!("启动生产者调度: {}", holder);

        let scheduler = ProducerScheduler::from_config(
            self.store.clone(),
            self.keys.clone(),
            &self.config.queue,
            &self.config.dispatcher,
            &holder,
        )
        .context("创建生产者调度器失败")?;
        info!("已启用的生产者: {:?}", scheduler.producer_names());

        scheduler.run(shutdown_rx).await;
        info!("生产者调度已停止");
        Ok(())
    }

    async fn run_worker(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let worker_config = &self.config.worker;
        info!(
            "启动Worker: {} -> {}",
            worker_config.worker_id, worker_config.api_url
        );

        let client = OpsClient::new(worker_config).context("创建Operator API客户端失败")?;
        let registry = HandlerRegistry::with_defaults(worker_config.dry_run);
        let service = WorkerService::new(worker_config, Arc::new(client), registry)
            .context("创建Worker失败")?;

        service.run(shutdown_rx).await?;
        Ok(())
    }

    async fn run_api(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let api_config = &self.config.api;
        let state = AppState::new(
            self.store.clone(),
            self.keys.clone(),
            self.config.queue.clone(),
            api_config,
        );

        let mut app = create_app(state, api_config);
        if let Some(handle) = &self.prometheus {
            app = app.merge(metrics_routes(
                &self.config.observability.metrics_endpoint,
                handle.clone(),
            ));
        }
        if !api_config.auth.enabled {
            warn!("Operator API认证已关闭，只应在开发环境使用");
        }

        let listener = TcpListener::bind(&api_config.bind_address)
            .await
            .with_context(|| format!("绑定地址失败: {}", api_config.bind_address))?;
        info!("Operator API启动在 http://{}", api_config.bind_address);

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
                info!("API服务器收到关闭信号");
            })
            .await
            .context("API服务器运行失败")?;

        info!("API服务器已停止");
        Ok(())
    }

    async fn run_all_components(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        let dispatcher = async {
            if self.config.dispatcher.enabled {
                if let Err(e) = self.run_dispatcher(shutdown_rx.resubscribe()).await {
                    error!("Dispatcher运行失败: {:#}", e);
                }
            }
        };
        let worker = async {
            if self.config.worker.enabled {
                if let Err(e) = self.run_worker(shutdown_rx.resubscribe()).await {
                    error!("Worker运行失败: {:#}", e);
                }
            }
        };
        let api = async {
            if self.config.api.enabled {
                if let Err(e) = self.run_api(shutdown_rx.resubscribe()).await {
                    error!("API服务器运行失败: {:#}", e);
                }
            }
        };

        tokio::join!(dispatcher, worker, api);
        info!("所有组件已停止");
        Ok(())
    }
}

fn install_prometheus() -> Result<PrometheusHandle> {
    PrometheusBuilder::new()
        .install_recorder()
        .context("安装Prometheus指标记录器失败")
}

fn node_name() -> String {
    hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "unknown".to_string())
}
