//! Scenario definition types
//!
//! Defines the data structures for deserializing YAML scenarios, plus the
//! built-in paging scenario.

use std::fmt;
use std::path::Path;

use serde::Deserialize;

use crate::common::config::RetryConfig;
use crate::common::error::ErrorKind;
use crate::common::{Error, Result};

use super::executor::plan_phases;
use super::variant::{Matrix, RadioParams, Variant, VariantDefaults};

/// A complete scenario loaded from a YAML file
#[derive(Deserialize, Debug, Clone)]
pub struct Scenario {
    /// Name of the scenario
    pub name: String,
    /// Optional description of what the scenario verifies
    pub description: Option<String>,
    /// Variants to run
    pub matrix: Matrix,
    /// Values shared by every variant
    #[serde(default)]
    pub defaults: VariantDefaults,
    /// The ordered steps; teardown is implicit and always runs last
    pub steps: Vec<Step>,
    /// Teardown options
    #[serde(default)]
    pub teardown: Teardown,
    /// Overrides the configured retry policy
    #[serde(default)]
    pub retry: Option<RetryConfig>,
    /// Deadline for one execution in seconds
    #[serde(default)]
    pub timeout: Option<u64>,
}

/// A single step in the execution flow
#[derive(Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Step {
    /// Start the 5GC and the gNB
    StartNetwork,
    /// Start every UE and wait for it to attach
    Attach {
        /// Attach timeout in seconds (default from configuration)
        #[serde(default)]
        timeout: Option<u64>,
    },
    /// Exchange echo traffic between the UEs and the 5GC
    Ping {
        direction: PingDirection,
        /// Echo requests per UE
        #[serde(default = "default_packets")]
        packets: u32,
        /// Minimum share of replies, in percent
        #[serde(default = "default_min_success")]
        min_success: u8,
        /// Require the element to report that the transfer paged the UE
        #[serde(default)]
        expect_paging: bool,
    },
    /// Sleep for a fixed time (e.g. until an inactivity timer expires)
    Wait { seconds: f64 },
}

fn default_packets() -> u32 {
    10
}

fn default_min_success() -> u8 {
    100
}

/// Longest wait a step may ask for (one day)
pub const MAX_WAIT_SECS: f64 = 86_400.0;

/// Longest attach timeout a step may ask for (one hour)
pub const MAX_ATTACH_SECS: u64 = 3_600;

impl Step {
    /// Short label used in reports
    pub fn label(&self) -> String {
        match self {
            Step::StartNetwork => "start network".to_string(),
            Step::Attach { .. } => "attach".to_string(),
            Step::Ping {
                direction, packets, ..
            } => format!("ping {} x{}", direction, packets),
            Step::Wait { seconds } => format!("wait {}s", seconds),
        }
    }
}

/// Which side originates the echo requests
#[derive(Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PingDirection {
    /// Every UE pings the 5GC
    UeToCore,
    /// The 5GC pings every UE; pages UEs that went idle
    CoreToUe,
}

impl fmt::Display for PingDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UeToCore => write!(f, "ue->5gc"),
            Self::CoreToUe => write!(f, "5gc->ue"),
        }
    }
}

/// Teardown options
#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Teardown {
    /// Fail the scenario when an element reports warnings on stop
    #[serde(default)]
    pub warnings_as_errors: bool,
}

impl Scenario {
    /// Load and validate a scenario from a YAML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!(
                "Failed to read scenario '{}': {}",
                path.display(),
                e
            ))
        })?;
        Self::from_yaml(&content)
    }

    /// Parse and validate a scenario from YAML text
    pub fn from_yaml(content: &str) -> Result<Self> {
        let scenario: Scenario = serde_yaml::from_str(content)
            .map_err(|e| Error::Config(format!("Failed to parse scenario: {}", e)))?;
        scenario.validate()?;
        Ok(scenario)
    }

    /// Resolve a scenario argument: a YAML path, or the name of a built-in scenario
    pub fn resolve(arg: &str) -> Result<Self> {
        let path = Path::new(arg);
        if path.exists() {
            return Self::load(path);
        }
        match arg {
            "paging" => Ok(Self::paging()),
            _ => Err(Error::Config(format!(
                "Scenario '{}' is neither a file nor a built-in scenario (built-ins: paging)",
                arg
            ))),
        }
    }

    /// COTS paging: ping, let the UE go idle, then reach it from the 5GC
    pub fn paging() -> Self {
        Self {
            name: "cots_paging".to_string(),
            description: Some(
                "Attach, ping, wait for the inactivity timer, then ping from the 5GC so the idle UE is paged"
                    .to_string(),
            ),
            matrix: Matrix {
                variants: vec![
                    RadioParams {
                        band: 3,
                        common_scs: 15,
                        bandwidth: 10,
                        sample_rate: None,
                    },
                    RadioParams {
                        band: 78,
                        common_scs: 30,
                        bandwidth: 20,
                        sample_rate: None,
                    },
                ],
                product: None,
            },
            defaults: VariantDefaults::default(),
            steps: vec![
                Step::StartNetwork,
                Step::Attach { timeout: None },
                Step::Ping {
                    direction: PingDirection::UeToCore,
                    packets: 10,
                    min_success: 100,
                    expect_paging: false,
                },
                Step::Wait { seconds: 5.0 },
                Step::Ping {
                    direction: PingDirection::CoreToUe,
                    packets: 10,
                    min_success: 100,
                    expect_paging: false,
                },
            ],
            teardown: Teardown {
                warnings_as_errors: false,
            },
            retry: Some(RetryConfig {
                budget: 2,
                retry_on: vec![
                    ErrorKind::Connection,
                    ErrorKind::RemoteFault,
                    ErrorKind::Attach,
                    ErrorKind::Verification,
                ],
                retry_on_messages: Vec::new(),
            }),
            timeout: None,
        }
    }

    /// Resolve every variant of the matrix
    pub fn variants(&self) -> Result<Vec<Variant>> {
        self.matrix.expand(&self.defaults)
    }

    /// Check step ordering and parameters
    pub fn validate(&self) -> Result<()> {
        let invalid = |reason: String| Error::InvalidScenario {
            name: self.name.clone(),
            reason,
        };

        if self.steps.is_empty() {
            return Err(invalid("no steps".to_string()));
        }

        for step in &self.steps {
            match step {
                Step::Wait { seconds } if !(0.0..=MAX_WAIT_SECS).contains(seconds) => {
                    return Err(invalid(format!(
                        "invalid wait of {} seconds (0 to {} allowed)",
                        seconds, MAX_WAIT_SECS
                    )));
                }
                Step::Ping {
                    packets,
                    min_success,
                    ..
                } => {
                    if *packets == 0 {
                        return Err(invalid("ping needs at least one packet".to_string()));
                    }
                    if *min_success > 100 {
                        return Err(invalid(format!(
                            "min_success {}% is above 100%",
                            min_success
                        )));
                    }
                }
                Step::Attach { timeout: Some(secs) } if *secs == 0 || *secs > MAX_ATTACH_SECS => {
                    return Err(invalid(format!(
                        "attach timeout of {} seconds is outside 1 to {}",
                        secs, MAX_ATTACH_SECS
                    )));
                }
                _ => {}
            }
        }

        plan_phases(&self.steps).map_err(invalid)?;
        self.variants()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PAGING_YAML: &str = r#"
name: cots_paging
description: Paging test
matrix:
  variants:
    - { band: 3, common_scs: 15, bandwidth: 10 }
    - { band: 78, common_scs: 30, bandwidth: 20 }
defaults:
  global_timing_advance: -1
  time_alignment_calibration: auto
  inactivity_timer: 1
retry:
  budget: 2
  retry_on: [connection, remote_fault, attach, verification]
  retry_on_messages: ["Some packages got lost"]
steps:
  - action: start_network
  - action: attach
    timeout: 60
  - action: ping
    direction: ue_to_core
    packets: 10
  - action: wait
    seconds: 5
  - action: ping
    direction: core_to_ue
    packets: 10
    expect_paging: true
teardown:
  warnings_as_errors: false
"#;

    #[test]
    fn test_parse_paging_yaml() {
        let scenario = Scenario::from_yaml(PAGING_YAML).unwrap();
        assert_eq!(scenario.name, "cots_paging");
        assert_eq!(scenario.steps.len(), 5);
        assert_eq!(scenario.steps[1], Step::Attach { timeout: Some(60) });
        assert_eq!(
            scenario.steps[4],
            Step::Ping {
                direction: PingDirection::CoreToUe,
                packets: 10,
                min_success: 100,
                expect_paging: true,
            }
        );
        let retry = scenario.retry.as_ref().unwrap();
        assert_eq!(retry.retry_on_messages, vec!["Some packages got lost"]);
        assert_eq!(scenario.variants().unwrap().len(), 2);
    }

    #[test]
    fn test_builtin_paging_is_valid() {
        let scenario = Scenario::paging();
        scenario.validate().unwrap();
        let ids: Vec<String> = scenario.variants().unwrap().iter().map(Variant::id).collect();
        assert_eq!(
            ids,
            vec!["band:3-scs:15-bandwidth:10", "band:78-scs:30-bandwidth:20"]
        );
    }

    #[test]
    fn test_shipped_paging_matches_builtin() {
        let path = Path::new(env!("CARGO_MANIFEST_DIR")).join("scenarios/paging.yaml");
        let shipped = Scenario::load(&path).unwrap();
        let builtin = Scenario::paging();
        assert_eq!(shipped.name, builtin.name);
        assert_eq!(shipped.steps, builtin.steps);
        assert_eq!(shipped.retry, builtin.retry);
        assert_eq!(shipped.variants().unwrap(), builtin.variants().unwrap());
    }

    #[test]
    fn test_rejects_attach_before_start() {
        let yaml = r#"
name: bad
matrix: { variants: [{ band: 3, common_scs: 15, bandwidth: 10 }] }
steps:
  - action: attach
  - action: start_network
"#;
        let err = Scenario::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, Error::InvalidScenario { .. }), "{}", err);
    }

    #[test]
    fn test_rejects_out_of_range_waits_and_attach_timeouts() {
        let with_steps = |steps: &str| {
            format!(
                "name: bad\nmatrix: {{ variants: [{{ band: 3, common_scs: 15, bandwidth: 10 }}] }}\nsteps:\n{}",
                steps
            )
        };

        let huge_wait = with_steps("  - action: wait\n    seconds: 1e30\n");
        let err = Scenario::from_yaml(&huge_wait).unwrap_err();
        assert!(err.to_string().contains("invalid wait"), "{}", err);

        let huge_attach = with_steps(
            "  - action: start_network\n  - action: attach\n    timeout: 18446744073709551615\n",
        );
        let err = Scenario::from_yaml(&huge_attach).unwrap_err();
        assert!(err.to_string().contains("attach timeout"), "{}", err);

        let day = with_steps("  - action: wait\n    seconds: 86400\n");
        assert!(Scenario::from_yaml(&day).is_ok());
    }

    #[test]
    fn test_rejects_ping_without_attach() {
        let yaml = r#"
name: bad
matrix: { variants: [{ band: 3, common_scs: 15, bandwidth: 10 }] }
steps:
  - action: start_network
  - action: ping
    direction: ue_to_core
"#;
        assert!(Scenario::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_rejects_unknown_action() {
        let yaml = r#"
name: bad
matrix: { variants: [{ band: 3, common_scs: 15, bandwidth: 10 }] }
steps:
  - action: reboot
"#;
        assert!(matches!(
            Scenario::from_yaml(yaml).unwrap_err(),
            Error::Config(_)
        ));
    }

    #[test]
    fn test_step_labels() {
        assert_eq!(Step::StartNetwork.label(), "start network");
        assert_eq!(
            Step::Ping {
                direction: PingDirection::CoreToUe,
                packets: 10,
                min_success: 100,
                expect_paging: false
            }
            .label(),
            "ping 5gc->ue x10"
        );
        assert_eq!(Step::Wait { seconds: 5.0 }.label(), "wait 5s");
    }
}
