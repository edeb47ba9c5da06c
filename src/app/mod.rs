pub mod inventory;
pub mod network;

use crate::adapters::{
    LocalStorage, NodeRepository, SystemCommandRunner, SystemPingProber, SystemResolver, TcpProber,
};
use crate::config::{Command, MonitorConfig, ProbeKind};
use crate::core::registry::NodeRegistry;
use crate::domain::ports::{CommandRunner, Prober, Resolver};
use crate::utils::error::Result;
use crate::utils::monitor::ResourceMonitor;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// 命令執行所需的共用元件
pub struct App {
    config: MonitorConfig,
    runner: Arc<dyn CommandRunner>,
    resolver: Arc<dyn Resolver>,
    prober: Arc<dyn Prober>,
    resources: ResourceMonitor,
    cancel: CancellationToken,
}

impl App {
    pub fn new(config: MonitorConfig) -> Result<Self> {
        let runner: Arc<dyn CommandRunner> = Arc::new(SystemCommandRunner::default());
        let resolver: Arc<dyn Resolver> = Arc::new(SystemResolver::new(runner.clone()));
        let prober: Arc<dyn Prober> = match config.probe_kind()? {
            ProbeKind::Ping => Arc::new(SystemPingProber),
            ProbeKind::Tcp => Arc::new(TcpProber::new(config.tcp_probe_port())),
        };
        let resources = ResourceMonitor::new(config.monitor_resources());

        Ok(Self::with_components(config, runner, resolver, prober, resources))
    }

    /// 測試用：注入假的指令執行器、解析器與探測器
    pub fn with_components(
        config: MonitorConfig,
        runner: Arc<dyn CommandRunner>,
        resolver: Arc<dyn Resolver>,
        prober: Arc<dyn Prober>,
        resources: ResourceMonitor,
    ) -> Self {
        Self {
            config,
            runner,
            resolver,
            prober,
            resources,
            cancel: CancellationToken::new(),
        }
    }

    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    /// Ctrl-C 時由 main 觸發
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn repository(&self) -> NodeRepository<LocalStorage> {
        NodeRepository::with_file_name(
            LocalStorage::new(self.config.data_dir()),
            self.config.nodes_file(),
        )
    }

    pub(crate) async fn load_registry(&self) -> Result<NodeRegistry> {
        self.repository().load(self.runner.as_ref()).await
    }

    pub(crate) async fn save_registry(&self, registry: &NodeRegistry) -> Result<()> {
        self.repository().save(registry).await
    }

    pub async fn run(&self, command: Command) -> Result<()> {
        self.resources.log_stats("Start");

        let result = match command {
            Command::Nodes { action } => self.nodes(action).await,
            Command::Discover { action } => self.discover(action).await,
            Command::Scan(args) => self.scan(args).await,
            Command::Trace(args) => self.trace(args).await,
            Command::Watch(args) => self.watch(args).await,
            Command::HostInfo => self.host_info().await,
            Command::Subnet { ip, prefix } => self.subnet(&ip, prefix),
        };

        if self.resources.is_enabled() {
            self.resources.log_final_stats();
        }
        result
    }
}
