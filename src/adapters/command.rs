use crate::domain::ports::CommandRunner;
use crate::utils::error::{MonitorError, Result};
use async_trait::async_trait;
use std::time::Duration;
use tokio::process::Command;

/// 以 tokio::process 執行系統指令
#[derive(Debug, Clone)]
pub struct SystemCommandRunner {
    timeout: Duration,
}

impl Default for SystemCommandRunner {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
        }
    }
}

impl SystemCommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }
}

#[async_trait]
impl CommandRunner for SystemCommandRunner {
    async fn run(&self, program: &str, args: &[String]) -> Result<String> {
        tracing::debug!("Running {} {}", program, args.join(" "));

        let command_error = |message: String| MonitorError::CommandError {
            command: program.to_string(),
            message,
        };

        let output = tokio::time::timeout(
            self.timeout,
            Command::new(program).args(args).kill_on_drop(true).output(),
        )
        .await
        .map_err(|_| command_error(format!("timed out after {:?}", self.timeout)))?
        .map_err(|e| command_error(e.to_string()))?;

        // ping 在目標不可達時回傳非零，stdout 仍需要
        if !output.status.success() && output.stdout.is_empty() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            return Err(command_error(if stderr.is_empty() {
                format!("exited with {}", output.status)
            } else {
                stderr
            }));
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}
