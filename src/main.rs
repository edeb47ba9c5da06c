use clap::Parser;
use node_monitor::utils::error::{ErrorSeverity, MonitorError};
use node_monitor::utils::{logger, validation::Validate};
use node_monitor::{App, CliConfig, MonitorConfig};

fn report_failure(stage: &str, e: &MonitorError) -> i32 {
    // 記錄詳細錯誤信息
    tracing::error!(
        "❌ {} failed: {} (Category: {:?}, Severity: {:?})",
        stage,
        e,
        e.category(),
        e.severity()
    );
    tracing::error!("💡 Recovery suggestion: {}", e.recovery_suggestion());

    // 輸出用戶友好的錯誤信息
    eprintln!("❌ {}", e.user_friendly_message());
    eprintln!("💡 建議: {}", e.recovery_suggestion());

    // 根據錯誤嚴重程度決定退出碼
    match e.severity() {
        ErrorSeverity::Low => 0,      // 警告，但成功
        ErrorSeverity::Medium => 2,   // 可重試
        ErrorSeverity::High => 1,     // 處理錯誤
        ErrorSeverity::Critical => 3, // 系統錯誤
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = CliConfig::parse();

    // 載入設定檔並套用命令列覆蓋
    let mut config = match MonitorConfig::load(cli.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("❌ {}", e.user_friendly_message());
            eprintln!("💡 建議: {}", e.recovery_suggestion());
            std::process::exit(1);
        }
    };
    cli.apply_overrides(&mut config);

    // 初始化日誌
    let log_format = config.log_format().unwrap_or_default();
    logger::init_cli_logger(cli.verbose, config.logging.level.as_deref(), log_format);

    tracing::info!("Starting node-monitor CLI");
    if cli.verbose {
        tracing::debug!("CLI config: {:?}", cli);
        tracing::debug!("Data directory: {}", config.data_dir().display());
    }

    // 驗證配置
    if let Err(e) = cli.validate().and_then(|_| config.validate()) {
        std::process::exit(report_failure("Configuration validation", &e).max(1));
    }

    if config.monitor_resources() {
        tracing::info!("🔍 System monitoring enabled");
    }

    let app = App::new(config)?;

    let cancel = app.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("🛑 Interrupt received, stopping");
            cancel.cancel();
        }
    });

    if let Err(e) = app.run(cli.command).await {
        let exit_code = report_failure("Command", &e);
        if exit_code > 0 {
            std::process::exit(exit_code);
        }
    }

    Ok(())
}
