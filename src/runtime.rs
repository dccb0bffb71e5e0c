//! Runtime Context Probe
//!
//! Reads environment and process/filesystem facts from the environment the
//! index server runs in. The production implementation shells out to the
//! docker CLI; each query is bounded by its own timeout and fails
//! independently of the others.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::debug;

use crate::config::MonitorConfig;

/// Separator used when two variables are read in one round trip
pub const PAIR_SEPARATOR: char = '|';

#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("failed to spawn runtime query: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("runtime query timed out")]
    Timeout,

    #[error("runtime query exited with {status}: {stderr}")]
    NonZeroExit { status: String, stderr: String },

    #[error("unparseable runtime output: {0}")]
    Parse(String),
}

/// Introspection of the index server's runtime environment
#[async_trait]
pub trait RuntimeProbe: Send + Sync {
    /// Value of an environment variable inside the index server's context
    async fn read_env(&self, name: &str) -> Result<String, RuntimeError>;

    /// Two variables joined by [`PAIR_SEPARATOR`]
    async fn read_env_pair(&self, first: &str, second: &str) -> Result<String, RuntimeError> {
        let a = self.read_env(first).await?;
        let b = self.read_env(second).await?;
        Ok(format!("{}{}{}", a, PAIR_SEPARATOR, b))
    }

    /// When the index server process started
    async fn process_start_time(&self) -> Result<DateTime<Utc>, RuntimeError>;

    /// Size of the data directory in bytes
    async fn data_directory_size(&self) -> Result<u64, RuntimeError>;

    /// Established TCP connections on `port`
    async fn established_session_count(&self, port: u16) -> Result<u32, RuntimeError>;
}

/// Runtime probe backed by `docker inspect` / `docker exec`
pub struct DockerRuntimeProbe {
    docker_binary: String,
    container: String,
    data_dir: String,
    timeout: Duration,
}

impl DockerRuntimeProbe {
    pub fn new(config: &MonitorConfig) -> Self {
        Self {
            docker_binary: config.docker_binary.clone(),
            container: config.container_name.clone(),
            data_dir: config.data_dir.clone(),
            timeout: config.runtime_timeout(),
        }
    }

    /// Run docker with `args` and return trimmed stdout
    async fn docker(&self, args: &[&str]) -> Result<String, RuntimeError> {
        let mut command = Command::new(&self.docker_binary);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| RuntimeError::Timeout)??;

        if !output.status.success() {
            return Err(RuntimeError::NonZeroExit {
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
        debug!("docker {:?} -> {:?}", args, stdout);
        Ok(stdout)
    }

    async fn exec_shell(&self, script: &str) -> Result<String, RuntimeError> {
        self.docker(&["exec", &self.container, "sh", "-c", script]).await
    }
}

#[async_trait]
impl RuntimeProbe for DockerRuntimeProbe {
    async fn read_env(&self, name: &str) -> Result<String, RuntimeError> {
        self.docker(&["exec", &self.container, "printenv", name]).await
    }

    async fn read_env_pair(&self, first: &str, second: &str) -> Result<String, RuntimeError> {
        let script = format!("printf '%s{}%s' \"${}\" \"${}\"", PAIR_SEPARATOR, first, second);
        self.exec_shell(&script).await
    }

    async fn process_start_time(&self) -> Result<DateTime<Utc>, RuntimeError> {
        let raw = self
            .docker(&["inspect", &self.container, "--format", "{{.State.StartedAt}}"])
            .await?;
        parse_start_time(&raw)
    }

    async fn data_directory_size(&self) -> Result<u64, RuntimeError> {
        let raw = self.docker(&["exec", &self.container, "du", "-sb", &self.data_dir]).await?;
        parse_du_output(&raw)
    }

    async fn established_session_count(&self, port: u16) -> Result<u32, RuntimeError> {
        let script = format!(
            "netstat -an 2>/dev/null | grep ':{}.*ESTABLISHED' | wc -l",
            port
        );
        let raw = self.exec_shell(&script).await?;
        raw.trim()
            .parse()
            .map_err(|_| RuntimeError::Parse(raw.clone()))
    }
}

/// Parse docker's RFC 3339 `StartedAt` timestamp
pub fn parse_start_time(raw: &str) -> Result<DateTime<Utc>, RuntimeError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| RuntimeError::Parse(format!("{}: {}", raw, e)))
}

/// First field of `du -sb` output
pub fn parse_du_output(raw: &str) -> Result<u64, RuntimeError> {
    raw.split_whitespace()
        .next()
        .and_then(|size| size.parse().ok())
        .ok_or_else(|| RuntimeError::Parse(raw.to_string()))
}

/// Whole seconds between `started` and `now`, never negative
pub fn uptime_secs(started: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - started).num_seconds().max(0) as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_parse_start_time_with_nanos() {
        let started = parse_start_time("2024-03-01T12:00:00.123456789Z\n").unwrap();
        assert_eq!(started, Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789));
    }

    #[test]
    fn test_parse_start_time_rejects_garbage() {
        assert!(matches!(parse_start_time("not a date"), Err(RuntimeError::Parse(_))));
    }

    #[test]
    fn test_parse_du_output() {
        assert_eq!(parse_du_output("1073741824\t/data").unwrap(), 1_073_741_824);
        assert!(parse_du_output("").is_err());
        assert!(parse_du_output("du: cannot access").is_err());
    }

    #[test]
    fn test_uptime_secs() {
        let started = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        let now = started + chrono::Duration::milliseconds(3_600_900);
        assert_eq!(uptime_secs(started, now), 3600);

        // Clock skew never produces a negative uptime
        assert_eq!(uptime_secs(now, started), 0);
    }

    #[tokio::test]
    async fn test_missing_docker_binary_is_spawn_error() {
        let config = MonitorConfig {
            docker_binary: "/nonexistent/docker-binary".to_string(),
            ..MonitorConfig::default()
        };
        let probe = DockerRuntimeProbe::new(&config);

        let result = probe.data_directory_size().await;
        assert!(matches!(result, Err(RuntimeError::Spawn(_))));
    }
}
