use crate::core::registry::NodeRegistry;
use crate::domain::model::DiscoveredNode;
use crate::domain::ports::Storage;
use crate::utils::error::{MonitorError, Result};
use serde::Serialize;
use std::path::Path;
use std::str::FromStr;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    Csv,
    Json,
}

impl ExportFormat {
    /// 依副檔名判斷，無法判斷時用 CSV
    pub fn from_path(path: &str) -> Self {
        match Path::new(path)
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("json") => ExportFormat::Json,
            _ => ExportFormat::Csv,
        }
    }
}

impl FromStr for ExportFormat {
    type Err = MonitorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "csv" => Ok(ExportFormat::Csv),
            "json" => Ok(ExportFormat::Json),
            other => Err(MonitorError::InvalidConfigValueError {
                field: "format".to_string(),
                value: other.to_string(),
                reason: "Supported formats: csv, json".to_string(),
            }),
        }
    }
}

/// 匯出用的扁平列，路由欄位以名稱呈現
#[derive(Debug, Serialize)]
struct NodeRow<'a> {
    id: u64,
    display_name: &'a str,
    address: &'a str,
    resolved_ip: String,
    device_type: &'static str,
    location: &'static str,
    connection: &'static str,
    main_node: bool,
    route_switch: &'a str,
    host_node: &'a str,
    mac_address: &'a str,
    connected: bool,
}

fn node_rows(registry: &NodeRegistry) -> Vec<NodeRow<'_>> {
    registry
        .nodes()
        .iter()
        .map(|n| NodeRow {
            id: n.node_id,
            display_name: &n.display_name,
            address: &n.ip_or_hostname,
            resolved_ip: n.resolved_ip.map(|ip| ip.to_string()).unwrap_or_default(),
            device_type: n.device_type.as_str(),
            location: n.network_location.as_str(),
            connection: n.connection_type.as_str(),
            main_node: n.main_node,
            route_switch: &n.route_switch,
            host_node: &n.host_node,
            mac_address: n.mac_address.as_deref().unwrap_or(""),
            connected: n.connected,
        })
        .collect()
}

fn to_csv<T: Serialize>(rows: &[T]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for row in rows {
        writer.serialize(row)?;
    }
    writer
        .into_inner()
        .map_err(|e| MonitorError::IoError(e.into_error()))
}

fn encode<T: Serialize>(rows: &[T], format: ExportFormat) -> Result<Vec<u8>> {
    match format {
        ExportFormat::Csv => to_csv(rows),
        ExportFormat::Json => Ok(serde_json::to_vec_pretty(rows)?),
    }
}

pub struct Exporter<S: Storage> {
    storage: S,
}

impl<S: Storage> Exporter<S> {
    pub fn new(storage: S) -> Self {
        Self { storage }
    }

    pub async fn export_nodes(
        &self,
        registry: &NodeRegistry,
        path: &str,
        format: ExportFormat,
    ) -> Result<usize> {
        let rows = node_rows(registry);
        let data = encode(&rows, format)?;
        tracing::debug!("Writing {} node rows ({} bytes) to {}", rows.len(), data.len(), path);
        self.storage.write_file(path, &data).await?;
        Ok(rows.len())
    }

    pub async fn export_discovered<'a>(
        &self,
        nodes: impl IntoIterator<Item = &'a DiscoveredNode>,
        path: &str,
        format: ExportFormat,
    ) -> Result<usize> {
        let rows: Vec<&DiscoveredNode> = nodes.into_iter().collect();
        let data = encode(&rows, format)?;
        tracing::debug!("Writing {} discovered rows to {}", rows.len(), path);
        self.storage.write_file(path, &data).await?;
        Ok(rows.len())
    }
}
