use anyhow::{Context, Result, bail};
use herald_core::{AddressSpecifier, Pid};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use tracing::warn;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeraldConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub script: Vec<ScriptStep>,
}

// ── Cluster Config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_master_pid")]
    pub master_pid: u32,
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_agents")]
    pub agents: Vec<String>,
}

fn default_master_pid() -> u32 {
    1000
}

fn default_workers() -> usize {
    2
}

fn default_agents() -> Vec<String> {
    vec!["logger".to_string()]
}

impl ClusterConfig {
    /// Pid of worker `n` (1-based): `master_pid + n`
    pub fn worker_pid(&self, n: usize) -> Result<Pid> {
        self.offset_pid(n, &format!("worker:{}", n))
    }

    /// Pid of the agent at `index` in `agents`: `master_pid + 101 + index`
    pub fn agent_pid(&self, index: usize) -> Result<Pid> {
        self.offset_pid(101 + index, &format!("agent #{}", index + 1))
    }

    fn offset_pid(&self, offset: usize, what: &str) -> Result<Pid> {
        u32::try_from(offset)
            .ok()
            .and_then(|offset| self.master_pid.checked_add(offset))
            .map(Pid)
            .with_context(|| format!("master_pid {} leaves no pid for {}", self.master_pid, what))
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            master_pid: default_master_pid(),
            workers: default_workers(),
            agents: default_agents(),
        }
    }
}

// ── Runtime Config ──────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    #[serde(default = "default_event_capacity")]
    pub event_capacity: usize,
    /// How long to let messages settle before reporting
    #[serde(default = "default_settle_ms")]
    pub settle_ms: u64,
}

fn default_event_capacity() -> usize {
    256
}

fn default_settle_ms() -> u64 {
    200
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            event_capacity: default_event_capacity(),
            settle_ms: default_settle_ms(),
        }
    }
}

// ── Script ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScriptStep {
    /// `master`, `worker:N` (1-based) or `agent:NAME`
    pub from: String,
    pub to: Vec<AddressSpecifier>,
    pub action: String,
    #[serde(default)]
    pub body: serde_json::Value,
    /// Send a bare signal named `action` instead of an envelope
    #[serde(default)]
    pub signal: bool,
}

/// Which simulated process performs a script step
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sender {
    Master,
    Worker(usize),
    Agent(String),
}

impl FromStr for Sender {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        if s == "master" {
            return Ok(Self::Master);
        }
        if let Some(n) = s.strip_prefix("worker:") {
            let n: usize = n
                .parse()
                .with_context(|| format!("Invalid worker number in '{}'", s))?;
            if n == 0 {
                bail!("Worker numbers start at 1: '{}'", s);
            }
            return Ok(Self::Worker(n));
        }
        if let Some(name) = s.strip_prefix("agent:") {
            if name.is_empty() {
                bail!("Missing agent name in '{}'", s);
            }
            return Ok(Self::Agent(name.to_string()));
        }
        bail!("Unknown sender '{}': expected master, worker:N or agent:NAME", s)
    }
}

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".herald")
}

impl HeraldConfig {
    pub fn load(custom_path: &Option<PathBuf>) -> Result<Self> {
        let path = custom_path
            .clone()
            .unwrap_or_else(|| config_dir().join("config.toml"));

        let content = std::fs::read_to_string(&path).with_context(|| {
            format!(
                "Failed to read config from {}. Run `herald init` first.",
                path.display()
            )
        })?;

        let config = Self::parse(&content)
            .with_context(|| format!("Failed to parse config at {}", path.display()))?;
        Ok(config)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check the cluster can be built and every script step can be performed
    pub fn validate(&self) -> Result<()> {
        if self.runtime.event_capacity == 0 {
            bail!("runtime.event_capacity must be at least 1");
        }
        self.cluster.worker_pid(self.cluster.workers)?;
        if !self.cluster.agents.is_empty() {
            self.cluster.agent_pid(self.cluster.agents.len() - 1)?;
        }

        for (i, name) in self.cluster.agents.iter().enumerate() {
            if self.cluster.agents[..i].contains(name) {
                warn!(
                    "Agent '{}' is listed twice; the later registration wins",
                    name
                );
            }
        }

        for (i, step) in self.script.iter().enumerate() {
            let sender: Sender = step
                .from
                .parse()
                .with_context(|| format!("script step {}", i + 1))?;
            match &sender {
                Sender::Master => {}
                Sender::Worker(n) if *n <= self.cluster.workers => {}
                Sender::Worker(n) => bail!(
                    "script step {}: worker:{} does not exist ({} workers)",
                    i + 1,
                    n,
                    self.cluster.workers
                ),
                Sender::Agent(name) if self.cluster.agents.contains(name) => {}
                Sender::Agent(name) => {
                    bail!("script step {}: agent '{}' is not configured", i + 1, name)
                }
            }
            if step.signal && sender != Sender::Master && step.to != [AddressSpecifier::Master] {
                bail!(
                    "script step {}: {} can only signal the master",
                    i + 1,
                    step.from
                );
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_file() {
        let config = HeraldConfig::parse("").unwrap();
        assert_eq!(config.cluster.master_pid, 1000);
        assert_eq!(config.cluster.workers, 2);
        assert_eq!(config.cluster.agents, vec!["logger"]);
        assert_eq!(config.runtime.event_capacity, 256);
        assert!(config.script.is_empty());
    }

    #[test]
    fn test_default_config_file_parses() {
        let config = HeraldConfig::parse(include_str!("../../../config/default.toml")).unwrap();
        assert!(!config.script.is_empty());
    }

    #[test]
    fn test_script_step_specifiers() {
        let config = HeraldConfig::parse(
            r#"
            [cluster]
            workers = 3
            agents = ["logger", "cache"]

            [[script]]
            from = "worker:2"
            to = ["agents", 1001, "cache"]
            action = "log"
            body = { msg = "x", level = 2 }
            "#,
        )
        .unwrap();

        let step = &config.script[0];
        assert_eq!(
            step.to,
            vec![
                AddressSpecifier::Agents,
                AddressSpecifier::Pid(Pid(1001)),
                AddressSpecifier::Name("cache".to_string()),
            ]
        );
        assert_eq!(step.body["msg"], "x");
        assert_eq!(step.body["level"], 2);
        assert!(!step.signal);
    }

    #[test]
    fn test_unknown_sender_rejected() {
        let err = HeraldConfig::parse(
            r#"
            [[script]]
            from = "worker:5"
            to = ["master"]
            action = "hi"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("worker:5"));

        assert!(
            HeraldConfig::parse(
                r#"
                [[script]]
                from = "agent:ghost"
                to = ["master"]
                action = "hi"
                "#,
            )
            .is_err()
        );
    }

    #[test]
    fn test_zero_event_capacity_rejected() {
        let err = HeraldConfig::parse("[runtime]\nevent_capacity = 0").unwrap_err();
        assert!(err.to_string().contains("event_capacity"));
    }

    #[test]
    fn test_pid_range_checked() {
        let err = HeraldConfig::parse(&format!(
            "[cluster]\nmaster_pid = {}\nworkers = 2",
            u32::MAX - 1
        ))
        .unwrap_err();
        assert!(err.to_string().contains("worker:2"));

        let err = HeraldConfig::parse(&format!(
            "[cluster]\nmaster_pid = {}\nworkers = 0",
            u32::MAX - 100
        ))
        .unwrap_err();
        assert!(err.to_string().contains("agent #1"));

        let cluster = ClusterConfig::default();
        assert_eq!(cluster.worker_pid(2).unwrap(), Pid(1002));
        assert_eq!(cluster.agent_pid(0).unwrap(), Pid(1101));
    }

    #[test]
    fn test_peer_signal_from_worker_rejected() {
        let err = HeraldConfig::parse(
            r#"
            [[script]]
            from = "worker:1"
            to = ["workers"]
            action = "reload"
            signal = true
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("only signal the master"));

        assert!(
            HeraldConfig::parse(
                r#"
                [[script]]
                from = "agent:logger"
                to = ["master"]
                action = "reload"
                signal = true
                "#,
            )
            .is_ok()
        );
    }

    #[test]
    fn test_sender_parse() {
        assert_eq!("master".parse::<Sender>().unwrap(), Sender::Master);
        assert_eq!("worker:3".parse::<Sender>().unwrap(), Sender::Worker(3));
        assert_eq!(
            "agent:logger".parse::<Sender>().unwrap(),
            Sender::Agent("logger".to_string())
        );
        assert!("worker:0".parse::<Sender>().is_err());
        assert!("worker:x".parse::<Sender>().is_err());
        assert!("agent:".parse::<Sender>().is_err());
        assert!("nobody".parse::<Sender>().is_err());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[cluster]\nworkers = 4\n\n[runtime]\nsettle_ms = 50").unwrap();

        let config = HeraldConfig::load(&Some(file.path().to_path_buf())).unwrap();
        assert_eq!(config.cluster.workers, 4);
        assert_eq!(config.runtime.settle_ms, 50);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = HeraldConfig::load(&Some(dir.path().join("missing.toml"))).unwrap_err();
        assert!(err.to_string().contains("herald init"));
    }
}
