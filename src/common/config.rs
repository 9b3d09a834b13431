//! Configuration file handling

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::error::ErrorKind;
use super::paths::{config_path, element_socket_name};
use super::{Error, Result};
use crate::ipc::transport::Endpoint;

/// Main configuration structure
#[derive(Debug, Deserialize)]
pub struct Config {
    /// Element sets the orchestrator may drive; one worker per testbed
    #[serde(default = "default_testbeds")]
    pub testbeds: Vec<Testbed>,

    /// Timeout settings
    #[serde(default)]
    pub timeouts: Timeouts,

    /// Retry policy used when a scenario does not override it
    #[serde(default)]
    pub retry: RetryConfig,

    /// Report output settings
    #[serde(default)]
    pub reports: ReportsConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            testbeds: default_testbeds(),
            timeouts: Timeouts::default(),
            retry: RetryConfig::default(),
            reports: ReportsConfig::default(),
        }
    }
}

/// Endpoints of one UE/gNB/5GC set
#[derive(Debug, Deserialize, Clone)]
pub struct Testbed {
    /// Name used in logs and reports
    #[serde(default = "default_testbed_name")]
    pub name: String,

    /// UE control endpoints, one per UE
    pub ues: Vec<Endpoint>,

    /// gNB control endpoint
    pub gnb: Endpoint,

    /// 5GC control endpoint
    pub fivegc: Endpoint,
}

impl Testbed {
    /// Testbed served by a local `sim` agent on the default sockets
    pub fn local(ue_count: usize) -> Self {
        let ues = (1..=ue_count.max(1))
            .map(|i| Endpoint::Local(element_socket_name(&ue_name(i))))
            .collect();
        Self {
            name: default_testbed_name(),
            ues,
            gnb: Endpoint::Local(element_socket_name(GNB_NAME)),
            fivegc: Endpoint::Local(element_socket_name(FIVEGC_NAME)),
        }
    }

    /// Checks the UE list is usable: at least one UE and no more than [`MAX_UES`]
    pub fn validate(&self) -> Result<()> {
        if self.ues.is_empty() {
            return Err(Error::Config(format!(
                "Testbed '{}' has no UE endpoints",
                self.name
            )));
        }
        if self.ues.len() > MAX_UES {
            return Err(Error::Config(format!(
                "Testbed '{}' has {} UEs, at most {} are supported",
                self.name,
                self.ues.len(),
                MAX_UES
            )));
        }
        Ok(())
    }

    /// Names of the UEs, in endpoint order
    pub fn ue_names(&self) -> Vec<String> {
        (1..=self.ues.len()).map(ue_name).collect()
    }

    /// Every element name paired with its endpoint, UEs first
    pub fn endpoints(&self) -> Vec<(String, &Endpoint)> {
        self.ue_names()
            .into_iter()
            .zip(&self.ues)
            .chain([
                (GNB_NAME.to_string(), &self.gnb),
                (FIVEGC_NAME.to_string(), &self.fivegc),
            ])
            .collect()
    }
}

/// Most UEs one testbed may hold; UE addresses are numbered within one /24
pub const MAX_UES: usize = 255;

/// Element name of the gNB
pub const GNB_NAME: &str = "gnb";

/// Element name of the 5GC
pub const FIVEGC_NAME: &str = "5gc";

/// Element name of the i-th UE (1-based)
pub fn ue_name(index: usize) -> String {
    format!("ue-{}", index)
}

fn default_testbeds() -> Vec<Testbed> {
    vec![Testbed::local(1)]
}

fn default_testbed_name() -> String {
    "local".to_string()
}

/// Timeout settings in seconds
#[derive(Debug, Deserialize, Clone)]
pub struct Timeouts {
    /// Timeout for establishing a control connection to an element
    #[serde(default = "default_connect")]
    pub connect_secs: u64,

    /// Timeout for a single control request
    #[serde(default = "default_request")]
    pub request_secs: u64,

    /// Attach timeout when a scenario step does not set one
    #[serde(default = "default_attach")]
    pub attach_secs: u64,

    /// Deadline for one scenario execution when the scenario does not set one
    #[serde(default = "default_scenario")]
    pub scenario_secs: u64,
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            connect_secs: default_connect(),
            request_secs: default_request(),
            attach_secs: default_attach(),
            scenario_secs: default_scenario(),
        }
    }
}

impl Timeouts {
    pub fn connect(&self) -> Duration {
        Duration::from_secs(self.connect_secs)
    }

    pub fn request(&self) -> Duration {
        Duration::from_secs(self.request_secs)
    }
}

fn default_connect() -> u64 {
    5
}
fn default_request() -> u64 {
    30
}
fn default_attach() -> u64 {
    60
}
fn default_scenario() -> u64 {
    900
}

/// Retry/flake policy settings
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct RetryConfig {
    /// Number of re-executions allowed after the first attempt
    #[serde(default = "default_budget")]
    pub budget: u32,

    /// Failure kinds that are worth another attempt
    #[serde(default = "default_retry_on")]
    pub retry_on: Vec<ErrorKind>,

    /// Extra substrings of failure messages that are worth another attempt
    #[serde(default)]
    pub retry_on_messages: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            budget: default_budget(),
            retry_on: default_retry_on(),
            retry_on_messages: Vec::new(),
        }
    }
}

fn default_budget() -> u32 {
    2
}

fn default_retry_on() -> Vec<ErrorKind> {
    vec![
        ErrorKind::Connection,
        ErrorKind::Attach,
        ErrorKind::RemoteFault,
        ErrorKind::Verification,
    ]
}

/// Report output configuration
#[derive(Debug, Deserialize, Clone, Default)]
pub struct ReportsConfig {
    /// Directory receiving one JSON report per run
    pub directory: Option<PathBuf>,
}

impl Config {
    /// Load configuration from an explicit path or the default config file
    ///
    /// Returns default configuration if no file exists at the default location
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(p) => Some(p.to_path_buf()),
            None => config_path().filter(|p| p.exists()),
        };

        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(&path).map_err(|e| Error::FileRead {
                    path: path.display().to_string(),
                    error: e.to_string(),
                })?;
                Self::from_toml(&content)?
            }
            None => Self::default(),
        };

        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from TOML text
    pub fn from_toml(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::ConfigParse(e.to_string()))
    }

    /// Configured testbeds, or only the one called `name`
    pub fn select_testbeds(&self, name: Option<&str>) -> Result<Vec<Testbed>> {
        match name {
            None => Ok(self.testbeds.clone()),
            Some(name) => self
                .testbeds
                .iter()
                .find(|t| t.name == name)
                .map(|t| vec![t.clone()])
                .ok_or_else(|| Error::Config(format!("No testbed named '{}'", name))),
        }
    }

    fn validate(&self) -> Result<()> {
        if self.testbeds.is_empty() {
            return Err(Error::Config("At least one testbed is required".to_string()));
        }
        for testbed in &self.testbeds {
            testbed.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_use_local_testbed() {
        let config = Config::default();
        assert_eq!(config.testbeds.len(), 1);
        assert_eq!(config.testbeds[0].ues.len(), 1);
        assert!(matches!(config.testbeds[0].gnb, Endpoint::Local(_)));
        assert_eq!(config.retry.budget, 2);
        assert!(config.retry.retry_on.contains(&ErrorKind::Attach));
        assert!(!config.retry.retry_on.contains(&ErrorKind::Shutdown));
    }

    #[test]
    fn test_parse_full_config() {
        let config = Config::from_toml(
            r#"
[[testbeds]]
name = "lab-a"
ues = ["tcp://10.0.0.5:7000", "tcp://10.0.0.6:7000"]
gnb = "tcp://10.0.0.2:7001"
fivegc = "local:/run/ran/5gc.sock"

[timeouts]
attach_secs = 90

[retry]
budget = 1
retry_on = ["attach"]
retry_on_messages = ["Exception calling application"]
"#,
        )
        .unwrap();

        let bed = &config.testbeds[0];
        assert_eq!(bed.name, "lab-a");
        assert_eq!(bed.ues.len(), 2);
        assert_eq!(bed.ue_names(), vec!["ue-1", "ue-2"]);
        assert_eq!(bed.gnb, Endpoint::Tcp("10.0.0.2:7001".to_string()));
        assert_eq!(bed.fivegc, Endpoint::Local("/run/ran/5gc.sock".to_string()));
        assert_eq!(config.timeouts.attach_secs, 90);
        assert_eq!(config.timeouts.request_secs, 30);
        assert_eq!(config.retry.retry_on, vec![ErrorKind::Attach]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_bad_endpoint() {
        let err = Config::from_toml(
            r#"
[[testbeds]]
ues = ["http://x"]
gnb = "tcp://a:1"
fivegc = "tcp://b:2"
"#,
        )
        .unwrap_err();
        assert!(matches!(err, Error::ConfigParse(_)));
    }

    #[test]
    fn test_rejects_empty_testbed() {
        let config = Config::from_toml(
            r#"
[[testbeds]]
ues = []
gnb = "tcp://a:1"
fivegc = "tcp://b:2"
"#,
        )
        .unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_more_ues_than_addresses() {
        let mut config = Config {
            testbeds: vec![Testbed::local(MAX_UES)],
            ..Config::default()
        };
        assert!(config.validate().is_ok());

        config.testbeds = vec![Testbed::local(MAX_UES + 1)];
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("at most 255"));
    }

    #[test]
    fn test_select_testbed_by_name() {
        let config = Config::default();
        assert_eq!(config.select_testbeds(None).unwrap().len(), 1);
        assert_eq!(config.select_testbeds(Some("local")).unwrap()[0].name, "local");
        assert!(config.select_testbeds(Some("lab-z")).is_err());
        let names: Vec<String> = config.testbeds[0]
            .endpoints()
            .into_iter()
            .map(|(name, _)| name)
            .collect();
        assert_eq!(names, vec!["ue-1", "gnb", "5gc"]);
    }
}
