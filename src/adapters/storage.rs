use crate::core::interfaces::default_gateway;
use crate::core::registry::NodeRegistry;
use crate::domain::model::NodeRecord;
use crate::domain::ports::{CommandRunner, Storage};
use crate::utils::error::Result;
use std::path::{Path, PathBuf};
use tokio::fs;

pub const NODES_FILE: &str = "nodes.json";

#[derive(Debug, Clone)]
pub struct LocalStorage {
    base_path: PathBuf,
}

impl LocalStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn full_path(&self, path: &str) -> PathBuf {
        self.base_path.join(path)
    }
}

impl Storage for LocalStorage {
    async fn read_file(&self, path: &str) -> Result<Vec<u8>> {
        let data = fs::read(self.full_path(path)).await?;
        Ok(data)
    }

    async fn write_file(&self, path: &str, data: &[u8]) -> Result<()> {
        let full_path = self.full_path(path);

        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).await?;
        }

        fs::write(full_path, data).await?;
        Ok(())
    }

    async fn exists(&self, path: &str) -> bool {
        fs::try_exists(self.full_path(path)).await.unwrap_or(false)
    }
}

/// nodes.json 的讀寫
pub struct NodeRepository<S: Storage> {
    storage: S,
    file_name: String,
}

impl<S: Storage> NodeRepository<S> {
    pub fn new(storage: S) -> Self {
        Self::with_file_name(storage, NODES_FILE)
    }

    pub fn with_file_name(storage: S, file_name: impl Into<String>) -> Self {
        Self {
            storage,
            file_name: file_name.into(),
        }
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// 沒有存檔時建立預設主節點，Gateway 位址由路由表偵測
    pub async fn load(&self, runner: &dyn CommandRunner) -> Result<NodeRegistry> {
        if !self.storage.exists(&self.file_name).await {
            tracing::info!(
                "📄 No {} found, creating default Host and Gateway nodes",
                self.file_name
            );
            let gateway = default_gateway(runner).await.map(|ip| ip.to_string());
            return Ok(NodeRegistry::with_default_main_nodes(gateway));
        }

        let data = self.storage.read_file(&self.file_name).await?;
        let records: Vec<NodeRecord> = serde_json::from_slice(&data)?;
        let registry = NodeRegistry::from_records(records)?;
        tracing::info!("📂 Loaded {} nodes from {}", registry.len(), self.file_name);
        Ok(registry)
    }

    pub async fn save(&self, registry: &NodeRegistry) -> Result<()> {
        let json = serde_json::to_string_pretty(&registry.to_records())?;
        self.storage
            .write_file(&self.file_name, json.as_bytes())
            .await?;
        tracing::debug!("💾 Saved {} nodes to {}", registry.len(), self.file_name);
        Ok(())
    }
}
