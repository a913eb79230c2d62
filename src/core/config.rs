//! Plan configuration from YAML

use crate::core::error::{Error, ErrorKind, Result, ResultExt};
use crate::core::step::StepKind;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Top-level plans file
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlansConfig {
    /// Environment shared by all plans
    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    /// Plans keyed by their name
    pub plans: BTreeMap<String, PlanConfig>,
}

fn default_enabled() -> bool {
    true
}

/// A single plan as written in the plans file
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PlanConfig {
    #[serde(default)]
    pub summary: Option<String>,

    #[serde(default)]
    pub environment: BTreeMap<String, String>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub discover: Option<PhasesConfig>,

    #[serde(default)]
    pub provision: Option<PhasesConfig>,

    #[serde(default)]
    pub prepare: Option<PhasesConfig>,

    #[serde(default)]
    pub execute: Option<PhasesConfig>,

    #[serde(default)]
    pub report: Option<PhasesConfig>,

    #[serde(default)]
    pub finish: Option<PhasesConfig>,
}

/// Step configuration: a single phase or a list of phases
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PhasesConfig {
    One(Mapping),
    Many(Vec<Mapping>),
}

impl PhasesConfig {
    pub fn phases(&self) -> Vec<Mapping> {
        match self {
            PhasesConfig::One(phase) => vec![phase.clone()],
            PhasesConfig::Many(phases) => phases.clone(),
        }
    }
}

impl PlanConfig {
    /// Raw phase mappings configured for a step
    pub fn phases(&self, kind: StepKind) -> Vec<Mapping> {
        let config = match kind {
            StepKind::Discover => &self.discover,
            StepKind::Provision => &self.provision,
            StepKind::Prepare => &self.prepare,
            StepKind::Execute => &self.execute,
            StepKind::Report => &self.report,
            StepKind::Finish => &self.finish,
        };
        config.as_ref().map(PhasesConfig::phases).unwrap_or_default()
    }
}

impl PlansConfig {
    /// Load plans from a YAML file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .wrap_err(ErrorKind::Specification, || format!("Failed to read plans file '{}'.", path.display()))?;
        Self::from_yaml(&content)
            .map_err(|e| e.wrap(ErrorKind::Specification, format!("Invalid plans file '{}'.", path.display())))
    }

    /// Parse plans from a YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: PlansConfig = serde_yaml::from_str(yaml)
            .wrap_err(ErrorKind::Specification, || "Failed to parse plans.")?;
        config.validate()?;
        Ok(config)
    }

    /// Structural checks which do not need the method registry
    pub fn validate(&self) -> Result<()> {
        if self.plans.is_empty() {
            return Err(Error::specification("No plans defined."));
        }

        for (name, plan) in &self.plans {
            if name.trim().is_empty() {
                return Err(Error::specification("Plan name must not be empty."));
            }
            for kind in StepKind::ALL {
                let mut seen = HashSet::new();
                for phase in plan.phases(kind) {
                    let Some(value) = phase.get("name") else {
                        continue;
                    };
                    let phase_name = match value {
                        Value::String(s) => s.clone(),
                        _ => {
                            return Err(Error::specification(format!(
                                "Plan '{}' has a {} phase with a non-string name.",
                                name, kind
                            )))
                        }
                    };
                    if !seen.insert(phase_name.clone()) {
                        return Err(Error::specification(format!(
                            "Duplicate {} phase '{}' in plan '{}'.",
                            kind, phase_name, name
                        )));
                    }
                }
            }
        }

        Ok(())
    }

    /// Enabled plans in name order
    pub fn enabled_plans(&self) -> impl Iterator<Item = (&String, &PlanConfig)> {
        self.plans.iter().filter(|(_, plan)| plan.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PLANS: &str = r#"
environment:
  SHARED: "1"
plans:
  /smoke:
    summary: Quick checks
    discover:
      how: shell
      tests:
        - name: /hello
          test: echo hello
    provision:
      how: local
    prepare:
      - name: first
        how: shell
        script: echo one
      - name: second
        how: shell
        script: echo two
  /disabled:
    enabled: false
"#;

    #[test]
    fn test_parse_plans() {
        let config = PlansConfig::from_yaml(PLANS).unwrap();
        assert_eq!(config.plans.len(), 2);
        assert_eq!(config.environment.get("SHARED"), Some(&"1".to_string()));

        let smoke = &config.plans["/smoke"];
        assert_eq!(smoke.phases(StepKind::Discover).len(), 1);
        assert_eq!(smoke.phases(StepKind::Prepare).len(), 2);
        assert!(smoke.phases(StepKind::Finish).is_empty());

        let enabled: Vec<_> = config.enabled_plans().map(|(name, _)| name.as_str()).collect();
        assert_eq!(enabled, vec!["/smoke"]);
    }

    #[test]
    fn test_duplicate_phase_names_rejected() {
        let yaml = r#"
plans:
  /dup:
    prepare:
      - name: same
        how: shell
      - name: same
        how: shell
"#;
        let err = PlansConfig::from_yaml(yaml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Specification);
        assert!(err.message().contains("Duplicate prepare phase"));
    }

    #[test]
    fn test_unknown_plan_key_rejected() {
        let yaml = "plans:\n  /typo:\n    provison:\n      how: local\n";
        let err = PlansConfig::from_yaml(yaml).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Specification);
    }

    #[test]
    fn test_no_plans_rejected() {
        assert!(PlansConfig::from_yaml("plans: {}\n").is_err());
    }
}
