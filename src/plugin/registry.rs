//! Method registration and resolution

use crate::core::error::{Error, Result};
use crate::core::step::StepKind;
use crate::plugin::{
    hints, DiscoverPlugin, ExecutePlugin, FinishPlugin, Method, PreparePlugin, ProvisionPlugin, ReportPlugin,
};
use std::sync::Arc;
use tracing::debug;

/// Methods of one step kind, kept sorted by their order
pub struct Registry<P: ?Sized> {
    step: StepKind,
    entries: Vec<(Method, Arc<P>)>,
}

impl<P: ?Sized> Registry<P> {
    pub fn new(step: StepKind) -> Self {
        Self {
            step,
            entries: Vec::new(),
        }
    }

    pub fn step(&self) -> StepKind {
        self.step
    }

    /// Add a method; methods with equal order keep registration order
    pub fn register(&mut self, method: Method, plugin: Arc<P>) {
        let position = self
            .entries
            .iter()
            .position(|(existing, _)| existing.order > method.order)
            .unwrap_or(self.entries.len());
        self.entries.insert(position, (method, plugin));
    }

    /// Methods in priority order
    pub fn methods(&self) -> impl Iterator<Item = &Method> {
        self.entries.iter().map(|(method, _)| method)
    }

    /// The default method, first by priority
    pub fn default_method(&self) -> Option<&Method> {
        self.entries.first().map(|(method, _)| method)
    }

    /// Exact lookup by full method name
    pub fn get(&self, name: &str) -> Option<(&Method, &Arc<P>)> {
        self.entries
            .iter()
            .find(|(method, _)| method.name == name)
            .map(|(method, plugin)| (method, plugin))
    }

    /// Find the first method, by priority, whose name starts with `how`
    ///
    /// An empty `how` selects the default method. Matching is textual, so
    /// `name` also matches `name.variant` if that one comes first.
    /// Unknown methods emit hints and fail with a specification error.
    pub fn resolve(&self, how: &str) -> Result<(&Method, &Arc<P>)> {
        let found = if how.is_empty() {
            self.entries.first()
        } else {
            self.entries.iter().find(|(method, _)| method.name.starts_with(how))
        };

        match found {
            Some((method, plugin)) => {
                debug!(step = %self.step, how = %how, method = %method.name, "Method resolved");
                Ok((method, plugin))
            }
            None => {
                let available: Vec<&str> = self.methods().map(|m| m.name).collect();
                hints::emit(self.step, how, &available);
                Err(Error::specification(format!(
                    "Unsupported {} method '{}'.",
                    self.step, how
                )))
            }
        }
    }
}

/// Registries of every step kind
pub struct Registries {
    pub discover: Registry<dyn DiscoverPlugin>,
    pub provision: Registry<dyn ProvisionPlugin>,
    pub prepare: Registry<dyn PreparePlugin>,
    pub execute: Registry<dyn ExecutePlugin>,
    pub report: Registry<dyn ReportPlugin>,
    pub finish: Registry<dyn FinishPlugin>,
}

impl Default for Registries {
    fn default() -> Self {
        Self::empty()
    }
}

impl Registries {
    pub fn empty() -> Self {
        Self {
            discover: Registry::new(StepKind::Discover),
            provision: Registry::new(StepKind::Provision),
            prepare: Registry::new(StepKind::Prepare),
            execute: Registry::new(StepKind::Execute),
            report: Registry::new(StepKind::Report),
            finish: Registry::new(StepKind::Finish),
        }
    }

    /// Registries holding every built-in method
    pub fn builtin() -> Self {
        let mut registries = Self::empty();
        crate::plugins::register_builtin(&mut registries);
        registries
    }

    /// Resolve `how` for a step without touching the plugin
    pub fn resolve_method(&self, step: StepKind, how: &str) -> Result<&Method> {
        match step {
            StepKind::Discover => self.discover.resolve(how).map(|(m, _)| m),
            StepKind::Provision => self.provision.resolve(how).map(|(m, _)| m),
            StepKind::Prepare => self.prepare.resolve(how).map(|(m, _)| m),
            StepKind::Execute => self.execute.resolve(how).map(|(m, _)| m),
            StepKind::Report => self.report.resolve(how).map(|(m, _)| m),
            StepKind::Finish => self.finish.resolve(how).map(|(m, _)| m),
        }
    }

    /// Prefix lookup without hints or errors
    pub fn find_method(&self, step: StepKind, how: &str) -> Option<&Method> {
        self.methods(step)
            .into_iter()
            .find(|method| how.is_empty() || method.name.starts_with(how))
    }

    /// Methods of a step in priority order
    pub fn methods(&self, step: StepKind) -> Vec<&Method> {
        match step {
            StepKind::Discover => self.discover.methods().collect(),
            StepKind::Provision => self.provision.methods().collect(),
            StepKind::Prepare => self.prepare.methods().collect(),
            StepKind::Execute => self.execute.methods().collect(),
            StepKind::Report => self.report.methods().collect(),
            StepKind::Finish => self.finish.methods().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::error::ErrorKind;

    trait Named: Send + Sync + std::fmt::Debug {
        fn label(&self) -> &'static str;
    }

    #[derive(Debug)]
    struct Plugin(&'static str);

    impl Named for Plugin {
        fn label(&self) -> &'static str {
            self.0
        }
    }

    fn method(name: &'static str, order: i64) -> Method {
        Method::new(name, "", order, &[])
    }

    fn registry() -> Registry<dyn Named> {
        let mut registry: Registry<dyn Named> = Registry::new(StepKind::Provision);
        registry.register(method("virtual.testcloud", 50), Arc::new(Plugin("testcloud")));
        registry.register(method("local", 30), Arc::new(Plugin("local")));
        registry.register(method("virtual", 50), Arc::new(Plugin("virtual")));
        registry.register(method("container", 40), Arc::new(Plugin("container")));
        registry
    }

    #[test]
    fn test_methods_sorted_by_order_stably() {
        let names: Vec<_> = registry().methods().map(|m| m.name).collect();
        assert_eq!(names, vec!["local", "container", "virtual.testcloud", "virtual"]);
    }

    #[test]
    fn test_prefix_resolution() {
        let registry = registry();
        assert_eq!(registry.resolve("cont").unwrap().1.label(), "container");
        assert_eq!(registry.resolve("local").unwrap().0.name, "local");
    }

    #[test]
    fn test_empty_how_selects_default() {
        let registry = registry();
        assert_eq!(registry.resolve("").unwrap().0.name, "local");
    }

    #[test]
    fn test_coarser_name_matches_earlier_variant() {
        // "virtual" is a textual prefix of "virtual.testcloud", registered first
        let registry = registry();
        assert_eq!(registry.resolve("virtual").unwrap().0.name, "virtual.testcloud");
        assert_eq!(registry.get("virtual").unwrap().1.label(), "virtual");
    }

    #[test]
    fn test_unknown_method_is_specification_error() {
        let err = registry().resolve("beaker").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Specification);
        assert!(err.message().contains("beaker"));
    }

    #[test]
    fn test_builtin_registries() {
        let registries = Registries::builtin();
        for step in StepKind::ALL {
            assert!(
                registries.resolve_method(step, "").is_ok(),
                "step {} has no default method",
                step
            );
        }
        assert_eq!(registries.resolve_method(StepKind::Provision, "cont").unwrap().name, "container");
    }

    #[test]
    fn test_find_method_is_quiet() {
        let registries = Registries::builtin();
        assert_eq!(registries.find_method(StepKind::Provision, "cont").map(|m| m.name), Some("container"));
        assert!(registries.find_method(StepKind::Provision, "beaker").is_none());
        assert!(registries.find_method(StepKind::Execute, "").is_some());
    }
}
