// 對外部系統的具體實作：檔案、系統指令、探測、名稱解析、匯出
pub mod command;
pub mod export;
pub mod probe;
pub mod resolver;
pub mod storage;

pub use command::SystemCommandRunner;
pub use export::{ExportFormat, Exporter};
pub use probe::{SystemPingProber, TcpProber};
pub use resolver::SystemResolver;
pub use storage::{LocalStorage, NodeRepository, NODES_FILE};
