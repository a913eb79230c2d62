//! Install and usage hints for unsupported methods

use crate::core::step::StepKind;
use tracing::info;

/// Methods known elsewhere but not shipped with this build
const EXTERNAL_METHODS: &[(StepKind, &str, &str)] = &[
    (
        StepKind::Provision,
        "virtual",
        "Virtual machines are not supported, provision a machine yourself and use 'connect'.",
    ),
    (
        StepKind::Provision,
        "beaker",
        "Beaker machines can be reserved separately and then used through 'connect'.",
    ),
    (
        StepKind::Provision,
        "artemis",
        "Artemis guests can be reserved separately and then used through 'connect'.",
    ),
    (
        StepKind::Discover,
        "fmf",
        "Metadata trees are not read directly, list the tests inline with 'shell'.",
    ),
    (
        StepKind::Report,
        "polarion",
        "Use 'junit' and import the file into Polarion.",
    ),
    (
        StepKind::Prepare,
        "ansible",
        "Run the playbook from a 'shell' prepare phase with ansible-playbook.",
    ),
];

/// Hints for an unsupported `how` of a step
pub fn hints(step: StepKind, how: &str, available: &[&str]) -> Vec<String> {
    let mut hints: Vec<String> = EXTERNAL_METHODS
        .iter()
        .filter(|(kind, name, _)| *kind == step && !how.is_empty() && name.starts_with(how))
        .map(|(_, _, hint)| hint.to_string())
        .collect();

    if available.is_empty() {
        hints.push(format!("No {} methods are available.", step));
    } else {
        hints.push(format!(
            "Supported {} methods: {}.",
            step,
            available.join(", ")
        ));
    }
    hints.push("Run 'testcraft methods' to see what each method does.".to_string());
    hints
}

/// Log the hints before the resolution error propagates
pub fn emit(step: StepKind, how: &str, available: &[&str]) {
    for hint in hints(step, how, available) {
        info!(target: "hint", step = %step, how = %how, "{}", hint);
    }
}
