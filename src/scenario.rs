//! Scenarios
//!
//! TigerStyle: scripted callers, reproducible from a seed.
//!
//! A scenario is a JSON list of control calls. Create steps may carry a
//! label; later steps refer to the returned identifier by that label or by a
//! raw number. Every call goes through [`ControlDevice::ioctl`], so results
//! are exactly what a caller sees: an id, `0`, or `-1`.
//!
//! ```json
//! { "steps": [
//!   { "op": "create_engine", "name": "Rocket", "label": "e" },
//!   { "op": "create_compartment", "engine": "e", "desc": "first class", "label": "c" },
//!   { "op": "update_log", "compartment": "c", "text": "boiler ok" },
//!   { "op": "show_log", "compartment": "c" },
//!   { "op": "delete_compartment", "compartment": "c" }
//! ] }
//! ```

use std::collections::HashMap;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::audit::{Divergence, RegistrySnapshot};
use crate::constants::{COMPARTMENT_DESC_BYTES, CONTROL_FAILURE, ENGINE_LOG_BYTES, ENGINE_NAME_BYTES};
use crate::device::{call, Command, ControlDevice, Request};
use crate::slot::RecordId;
use crate::user::SimUserMemory;

/// Maximum number of steps in one scenario
pub const SCENARIO_STEPS_COUNT_MAX: usize = 10_000;

// =============================================================================
// Types
// =============================================================================

/// Identifier given literally or by label.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum IdRef {
    /// Literal identifier
    Raw(RecordId),
    /// Label bound by an earlier create step
    Label(String),
}

/// One control call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case", deny_unknown_fields)]
pub enum Step {
    /// Create an engine
    CreateEngine {
        /// Engine name, padded or truncated to the name field
        name: String,
        /// Label for the returned id
        #[serde(default)]
        label: Option<String>,
    },
    /// Create a compartment bound to an engine
    CreateCompartment {
        /// Target engine
        engine: IdRef,
        /// Description, padded or truncated to the description field
        desc: String,
        /// Label for the returned id
        #[serde(default)]
        label: Option<String>,
    },
    /// Delete a compartment
    DeleteCompartment {
        /// Target compartment
        compartment: IdRef,
    },
    /// Read a compartment's engine log
    ShowLog {
        /// Target compartment
        compartment: IdRef,
    },
    /// Overwrite a compartment's engine log
    UpdateLog {
        /// Target compartment
        compartment: IdRef,
        /// Log text, padded or truncated to the log size
        text: String,
    },
}

impl Step {
    /// Control command issued by this step.
    #[must_use]
    pub fn command(&self) -> Command {
        match self {
            Self::CreateEngine { .. } => Command::CreateEngine,
            Self::CreateCompartment { .. } => Command::CreateCompartment,
            Self::DeleteCompartment { .. } => Command::DeleteCompartment,
            Self::ShowLog { .. } => Command::ShowLog,
            Self::UpdateLog { .. } => Command::UpdateLog,
        }
    }
}

/// A scripted sequence of control calls.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Scenario {
    /// Calls in order
    pub steps: Vec<Step>,
}

impl Scenario {
    /// Parse from JSON text.
    pub fn from_json(text: &str) -> Result<Self, ScenarioError> {
        let scenario: Self = serde_json::from_str(text)?;
        if scenario.steps.len() > SCENARIO_STEPS_COUNT_MAX {
            return Err(ScenarioError::TooManySteps {
                count: scenario.steps.len(),
                max: SCENARIO_STEPS_COUNT_MAX,
            });
        }
        Ok(scenario)
    }

    /// Load from a JSON file.
    pub fn load(path: &Path) -> Result<Self, ScenarioError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }

    /// Link, write, read, unlink, then let the next create sweep the engine.
    #[must_use]
    pub fn demo() -> Self {
        let label = |s: &str| IdRef::Label(s.to_string());
        Self {
            steps: vec![
                Step::CreateEngine {
                    name: "Pioneer".to_string(),
                    label: Some("pioneer".to_string()),
                },
                Step::CreateCompartment {
                    engine: label("pioneer"),
                    desc: "first class".to_string(),
                    label: Some("first".to_string()),
                },
                Step::UpdateLog {
                    compartment: label("first"),
                    text: "boiler pressure nominal".to_string(),
                },
                Step::ShowLog {
                    compartment: label("first"),
                },
                Step::DeleteCompartment {
                    compartment: label("first"),
                },
                Step::CreateEngine {
                    name: "Successor".to_string(),
                    label: Some("successor".to_string()),
                },
                Step::CreateCompartment {
                    engine: label("pioneer"),
                    desc: "too late".to_string(),
                    label: None,
                },
            ],
        }
    }
}

/// Result of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepOutcome {
    /// Position in the scenario
    pub index: usize,
    /// The step as written
    pub step: Step,
    /// Value returned by the control interface
    pub result: i64,
    /// Log text read back, for successful show steps
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log: Option<String>,
}

/// Result of a whole scenario.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScenarioReport {
    /// One entry per step
    pub outcomes: Vec<StepOutcome>,
    /// Registry contents afterwards
    pub snapshot: RegistrySnapshot,
    /// Divergences afterwards
    pub audit: Vec<Divergence>,
}

// =============================================================================
// Runner
// =============================================================================

/// Executes scenarios as one caller against a device.
#[derive(Debug)]
pub struct ScenarioRunner {
    device: ControlDevice,
    mem: SimUserMemory,
    labels: HashMap<String, i64>,
}

impl ScenarioRunner {
    /// Create a runner with its own caller memory.
    #[must_use]
    pub fn new(device: ControlDevice) -> Self {
        Self {
            device,
            mem: SimUserMemory::new(),
            labels: HashMap::new(),
        }
    }

    /// Run every step in order. Failed calls are recorded, not fatal; a label
    /// bound to a failed create holds `-1`.
    pub async fn run(&mut self, scenario: &Scenario) -> Result<ScenarioReport, ScenarioError> {
        let mut outcomes = Vec::with_capacity(scenario.steps.len());
        for (index, step) in scenario.steps.iter().enumerate() {
            let (result, log) = self.execute(step).await?;
            tracing::debug!(index = index, command = ?step.command(), result = result, "Scenario step");
            outcomes.push(StepOutcome {
                index,
                step: step.clone(),
                result,
                log,
            });
        }

        let registry = self.device.registry();
        Ok(ScenarioReport {
            outcomes,
            snapshot: registry.snapshot().await,
            audit: registry.audit().await,
        })
    }

    async fn execute(&mut self, step: &Step) -> Result<(i64, Option<String>), ScenarioError> {
        let command = step.command();
        let mut request = Request::default();
        let mut log_out = None;

        match step {
            Step::CreateEngine { name, .. } => {
                request.name = self.mem.map_fixed(name.as_bytes(), ENGINE_NAME_BYTES);
            }
            Step::CreateCompartment { engine, desc, .. } => {
                request.id = self.resolve(engine)?;
                request.desc = self.mem.map_fixed(desc.as_bytes(), COMPARTMENT_DESC_BYTES);
            }
            Step::DeleteCompartment { compartment } => {
                request.id = self.resolve(compartment)?;
            }
            Step::ShowLog { compartment } => {
                request.id = self.resolve(compartment)?;
                let out = self.mem.map_zeroed(ENGINE_LOG_BYTES);
                request.logs = out;
                log_out = Some(out);
            }
            Step::UpdateLog { compartment, text } => {
                request.id = self.resolve(compartment)?;
                request.logs = self.mem.map_fixed(text.as_bytes(), ENGINE_LOG_BYTES);
            }
        }

        let result = call(&self.device, &mut self.mem, command, request).await;

        if let Step::CreateEngine { label: Some(l), .. } | Step::CreateCompartment { label: Some(l), .. } = step {
            self.labels.insert(l.clone(), result);
        }

        let log = match log_out {
            Some(out) if result != CONTROL_FAILURE => self.mem.peek(out, ENGINE_LOG_BYTES).map(|bytes| {
                let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
                String::from_utf8_lossy(&bytes[..end]).into_owned()
            }),
            _ => None,
        };
        Ok((result, log))
    }

    fn resolve(&self, id: &IdRef) -> Result<RecordId, ScenarioError> {
        match id {
            IdRef::Raw(raw) => Ok(*raw),
            IdRef::Label(label) => self
                .labels
                .get(label)
                // Labels hold raw control results; ids are 32-bit
                .map(|&value| value as RecordId)
                .ok_or_else(|| ScenarioError::UnknownLabel(label.clone())),
        }
    }
}

// =============================================================================
// Errors
// =============================================================================

/// Scenario errors
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    /// Scenario file could not be read
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Scenario is not valid JSON for this schema
    #[error("invalid scenario: {0}")]
    Parse(#[from] serde_json::Error),

    /// Scenario is longer than allowed
    #[error("too many steps: {count} > {max}")]
    TooManySteps {
        /// Steps given
        count: usize,
        /// Largest accepted count
        max: usize,
    },

    /// A step referred to a label no earlier step bound
    #[error("label used before it was bound: {0}")]
    UnknownLabel(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RegistryConfig;

    fn runner() -> ScenarioRunner {
        ScenarioRunner::new(ControlDevice::register(&RegistryConfig::with_seed(5)))
    }

    #[test]
    fn test_parse_steps() {
        let scenario = Scenario::from_json(
            r#"{ "steps": [
                { "op": "create_engine", "name": "Rocket", "label": "e" },
                { "op": "create_compartment", "engine": "e", "desc": "coach" },
                { "op": "delete_compartment", "compartment": 1234 }
            ] }"#,
        )
        .unwrap();

        assert_eq!(scenario.steps.len(), 3);
        assert_eq!(
            scenario.steps[2],
            Step::DeleteCompartment {
                compartment: IdRef::Raw(1234)
            }
        );
        assert_eq!(scenario.steps[1].command(), Command::CreateCompartment);
    }

    #[test]
    fn test_parse_rejects_unknown_op() {
        let result = Scenario::from_json(r#"{ "steps": [ { "op": "derail" } ] }"#);
        assert!(matches!(result, Err(ScenarioError::Parse(_))));
    }

    #[tokio::test]
    async fn test_demo_scenario() {
        let mut runner = runner();
        let report = runner.run(&Scenario::demo()).await.unwrap();
        let results: Vec<i64> = report.outcomes.iter().map(|o| o.result).collect();

        // Engine and compartment ids, then 0 for update/show/delete
        assert_ne!(results[0], CONTROL_FAILURE);
        assert_ne!(results[1], CONTROL_FAILURE);
        assert_eq!(&results[2..5], &[0, 0, 0]);
        assert_eq!(report.outcomes[3].log.as_deref(), Some("boiler pressure nominal"));

        // Creating the successor swept the pioneer; linking to it now fails
        assert_ne!(results[5], CONTROL_FAILURE);
        assert_eq!(results[6], CONTROL_FAILURE);

        assert_eq!(report.snapshot.engines.len(), 1);
        assert_eq!(report.snapshot.engines[0].name, "Successor");
        assert!(report.snapshot.compartments.is_empty());
        assert!(report.audit.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_label_aborts() {
        let mut runner = runner();
        let scenario = Scenario {
            steps: vec![Step::ShowLog {
                compartment: IdRef::Label("nowhere".to_string()),
            }],
        };

        assert!(matches!(
            runner.run(&scenario).await,
            Err(ScenarioError::UnknownLabel(l)) if l == "nowhere"
        ));
    }

    #[tokio::test]
    async fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("scenario.json");
        std::fs::write(
            &path,
            r#"{ "steps": [ { "op": "create_engine", "name": "Flyer", "label": "e" } ] }"#,
        )
        .unwrap();

        let scenario = Scenario::load(&path).unwrap();
        let report = runner().run(&scenario).await.unwrap();
        assert_eq!(report.snapshot.engines.len(), 1);
        assert_eq!(report.snapshot.engines[0].id as i64, report.outcomes[0].result);
    }
}
