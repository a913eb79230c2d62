//! Plan domain model

use crate::core::config::PlanConfig;
use crate::core::data::{FieldValue, StepData, COMMON_KEYS};
use crate::core::error::{ErrorKind, Result};
use crate::core::names::safe_name;
use crate::core::step::{Phase, Step, StepKind};
use crate::plugin::Registries;
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// Command line adjustments of one step
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StepOverride {
    /// Switch every phase of the step to this method
    pub how: Option<String>,
    /// Field values keyed by field key
    pub options: BTreeMap<String, FieldValue>,
    pub dry: bool,
    pub force: bool,
}

/// A named test scenario with one instance of every step
#[derive(Debug, Clone)]
pub struct Plan {
    pub name: String,
    pub summary: Option<String>,
    pub environment: BTreeMap<String, String>,
    pub workdir: PathBuf,
    /// One step per kind, in execution order
    pub steps: Vec<Step>,
}

impl Plan {
    /// Build a plan, resolving and normalizing every phase
    pub fn from_config(
        name: &str,
        config: &PlanConfig,
        registries: &Registries,
        workdir: PathBuf,
        overrides: &BTreeMap<StepKind, StepOverride>,
    ) -> Result<Self> {
        let mut steps = Vec::with_capacity(StepKind::ALL.len());
        for kind in StepKind::ALL {
            let step_override = overrides.get(&kind);
            let phases = build_phases(kind, config.phases(kind), registries, step_override).map_err(|e| {
                e.wrap(
                    ErrorKind::Specification,
                    format!("Invalid {} configuration of plan '{}'.", kind, name),
                )
            })?;
            let mut step = Step::new(kind, phases, &workdir);
            if let Some(step_override) = step_override {
                step.dry = step_override.dry;
                step.force = step_override.force;
            }
            steps.push(step);
        }

        Ok(Self {
            name: name.to_string(),
            summary: config.summary.clone(),
            environment: config.environment.clone(),
            workdir,
            steps,
        })
    }

    pub fn safe_name(&self) -> String {
        safe_name(&self.name)
    }

    pub fn step(&self, kind: StepKind) -> &Step {
        // steps are built for every kind in order
        &self.steps[kind as usize]
    }

    pub fn step_mut(&mut self, kind: StepKind) -> &mut Step {
        &mut self.steps[kind as usize]
    }
}

fn build_phases(
    kind: StepKind,
    raw_phases: Vec<Mapping>,
    registries: &Registries,
    step_override: Option<&StepOverride>,
) -> Result<Vec<Phase>> {
    let raw_phases = if raw_phases.is_empty() {
        vec![Mapping::new()]
    } else {
        raw_phases
    };
    let cli_how = step_override.and_then(|o| o.how.as_deref());

    let mut phases = Vec::with_capacity(raw_phases.len());
    for (index, raw) in raw_phases.into_iter().enumerate() {
        let configured = raw.get("how").and_then(Value::as_str).unwrap_or_default().to_string();
        let (how, raw) = match cli_how {
            Some(how) if !same_method(registries, kind, how, &configured) => {
                // a different method does not know the original method's keys
                (how.to_string(), common_keys_only(&raw))
            }
            Some(how) => (how.to_string(), raw),
            None => (configured, raw),
        };
        let method = registries.resolve_method(kind, &how)?;
        let mut data = StepData::normalize(&raw, &format!("default-{}", index), method.name, method.fields)?;

        if let Some(step_override) = step_override {
            for (key, value) in &step_override.options {
                if method.fields.iter().any(|f| f.key == key.as_str()) {
                    data.set(key, value.clone());
                }
            }
        }
        phases.push(Phase::new(data, method.fields));
    }
    Ok(phases)
}

/// Whether both requested names resolve to one method
fn same_method(registries: &Registries, kind: StepKind, cli_how: &str, configured: &str) -> bool {
    match (registries.find_method(kind, cli_how), registries.find_method(kind, configured)) {
        (Some(cli), Some(configured)) => cli.name == configured.name,
        _ => false,
    }
}

fn common_keys_only(raw: &Mapping) -> Mapping {
    raw.iter()
        .filter(|(key, _)| key.as_str().is_some_and(|k| COMMON_KEYS.contains(&k) && k != "how"))
        .map(|(key, value)| (key.clone(), value.clone()))
        .collect()
}
