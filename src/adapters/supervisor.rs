use crate::domain::model::UpstreamSpec;
use crate::domain::ports::{CredentialProvider, ProcessSupervisor};
use crate::utils::error::{ProxyError, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::process::Command;
use tokio::sync::Mutex;

/// Command lines for the external forwarding scripts. Each entry is the
/// program followed by its arguments; `{port}`, `{host}`, `{upstream_port}`
/// and `{provider}` are substituted per call.
#[derive(Debug, Clone)]
pub struct SupervisorCommands {
    pub start: Vec<String>,
    pub restart: Vec<String>,
    pub stop: Vec<String>,
}

/// Drives the forwarding processes through shell commands and checks
/// liveness through the PID files they write (`<pid_dir>/<port>.pid`).
pub struct ShellSupervisor {
    commands: SupervisorCommands,
    pid_dir: PathBuf,
    credentials: Option<Arc<dyn CredentialProvider>>,
    command_timeout: Duration,
}

impl ShellSupervisor {
    pub fn new(commands: SupervisorCommands, pid_dir: impl Into<PathBuf>) -> Self {
        Self {
            commands,
            pid_dir: pid_dir.into(),
            credentials: None,
            command_timeout: Duration::from_secs(30),
        }
    }

    pub fn with_credentials(mut self, credentials: Arc<dyn CredentialProvider>) -> Self {
        self.credentials = Some(credentials);
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    fn pid_file(&self, port: u16) -> PathBuf {
        self.pid_dir.join(format!("{}.pid", port))
    }

    async fn run(&self, template: &[String], port: u16, upstream: Option<&UpstreamSpec>) -> Result<()> {
        let rendered = render_command(template, port, upstream);
        let Some((program, args)) = rendered.split_first() else {
            return Err(ProxyError::MissingConfigError {
                field: "supervisor command".to_string(),
            });
        };

        let mut command = Command::new(program);
        command.args(args).kill_on_drop(true);
        if let Some(credentials) = self.credentials.as_ref().and_then(|c| c.current_credentials()) {
            command
                .env("VPN_USERNAME", &credentials.username)
                .env("VPN_PASSWORD", &credentials.password);
        }

        tracing::debug!("Running supervisor command: {}", rendered.join(" "));
        let output = tokio::time::timeout(self.command_timeout, command.output())
            .await
            .map_err(|_| ProxyError::SupervisorError {
                message: format!(
                    "'{}' timed out after {:?}",
                    program, self.command_timeout
                ),
            })??;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(ProxyError::SupervisorError {
                message: format!("'{}' exited with {}: {}", program, output.status, stderr.trim()),
            });
        }
        Ok(())
    }
}

impl ProcessSupervisor for ShellSupervisor {
    async fn start(&self, port: u16, upstream: &UpstreamSpec) -> Result<()> {
        self.run(&self.commands.start, port, Some(upstream)).await
    }

    async fn restart(&self, port: u16, upstream: &UpstreamSpec) -> Result<()> {
        self.run(&self.commands.restart, port, Some(upstream)).await
    }

    async fn stop(&self, port: u16) -> Result<()> {
        self.run(&self.commands.stop, port, None).await
    }

    async fn is_alive(&self, port: u16) -> bool {
        let raw = match tokio::fs::read_to_string(self.pid_file(port)).await {
            Ok(raw) => raw,
            Err(_) => return false,
        };
        match raw.trim().parse::<u32>() {
            Ok(pid) => process_exists(pid),
            Err(_) => false,
        }
    }
}

fn process_exists(pid: u32) -> bool {
    let pid = Pid::from_u32(pid);
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    system.process(pid).is_some()
}

pub fn render_command(template: &[String], port: u16, upstream: Option<&UpstreamSpec>) -> Vec<String> {
    template
        .iter()
        .map(|part| {
            let mut rendered = part.replace("{port}", &port.to_string());
            if let Some(upstream) = upstream {
                rendered = rendered
                    .replace("{host}", &upstream.host)
                    .replace("{upstream_port}", &upstream.port.to_string())
                    .replace("{provider}", &upstream.provider);
            }
            rendered
        })
        .collect()
}

/// Pretends to run forwarders: a port is alive from (re)start until stop.
#[derive(Debug, Clone, Default)]
pub struct DryRunSupervisor {
    running: Arc<Mutex<HashMap<u16, UpstreamSpec>>>,
}

impl DryRunSupervisor {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn running(&self) -> HashMap<u16, UpstreamSpec> {
        self.running.lock().await.clone()
    }
}

impl ProcessSupervisor for DryRunSupervisor {
    async fn start(&self, port: u16, upstream: &UpstreamSpec) -> Result<()> {
        tracing::info!("[dry-run] start {} -> {}", port, upstream);
        self.running.lock().await.insert(port, upstream.clone());
        Ok(())
    }

    async fn restart(&self, port: u16, upstream: &UpstreamSpec) -> Result<()> {
        tracing::info!("[dry-run] restart {} -> {}", port, upstream);
        self.running.lock().await.insert(port, upstream.clone());
        Ok(())
    }

    async fn stop(&self, port: u16) -> Result<()> {
        tracing::info!("[dry-run] stop {}", port);
        self.running.lock().await.remove(&port);
        Ok(())
    }

    async fn is_alive(&self, port: u16) -> bool {
        self.running.lock().await.contains_key(&port)
    }

    async fn is_listening(&self, port: u16) -> bool {
        self.is_alive(port).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn upstream() -> UpstreamSpec {
        UpstreamSpec {
            provider: "nordvpn".into(),
            host: "vn42.nordvpn.com".into(),
            port: 89,
        }
    }

    #[test]
    fn test_render_command() {
        let template = vec![
            "./proxy.sh".to_string(),
            "restart".to_string(),
            "--port={port}".to_string(),
            "{host}:{upstream_port}".to_string(),
            "{provider}".to_string(),
        ];

        assert_eq!(
            render_command(&template, 7891, Some(&upstream())),
            vec!["./proxy.sh", "restart", "--port=7891", "vn42.nordvpn.com:89", "nordvpn"]
        );
        assert_eq!(
            render_command(&template[..3], 7891, None),
            vec!["./proxy.sh", "restart", "--port=7891"]
        );
    }

    #[tokio::test]
    async fn test_dry_run_supervisor_tracks_processes() {
        let supervisor = DryRunSupervisor::new();
        assert!(!supervisor.is_alive(7891).await);

        supervisor.restart(7891, &upstream()).await.unwrap();
        assert!(supervisor.is_alive(7891).await);
        assert!(supervisor.is_listening(7891).await);

        supervisor.stop(7891).await.unwrap();
        assert!(!supervisor.is_alive(7891).await);
    }

    #[tokio::test]
    async fn test_shell_supervisor_pid_check() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = ShellSupervisor::new(
            SupervisorCommands {
                start: vec!["true".into()],
                restart: vec!["true".into()],
                stop: vec!["true".into()],
            },
            temp_dir.path(),
        );

        assert!(!supervisor.is_alive(7891).await);

        std::fs::write(temp_dir.path().join("7891.pid"), std::process::id().to_string()).unwrap();
        assert!(supervisor.is_alive(7891).await);

        std::fs::write(temp_dir.path().join("7892.pid"), "not-a-pid").unwrap();
        assert!(!supervisor.is_alive(7892).await);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_shell_supervisor_reports_command_failure() {
        let temp_dir = TempDir::new().unwrap();
        let supervisor = ShellSupervisor::new(
            SupervisorCommands {
                start: vec!["true".into()],
                restart: vec!["false".into()],
                stop: vec!["true".into()],
            },
            temp_dir.path(),
        );

        assert!(supervisor.start(7891, &upstream()).await.is_ok());
        assert!(matches!(
            supervisor.restart(7891, &upstream()).await,
            Err(ProxyError::SupervisorError { .. })
        ));
    }
}
