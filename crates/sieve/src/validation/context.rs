//! Per-evaluation context handed to rules.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::aggregate::StopPolicy;
use super::outcome::Severity;

/// What caused an evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Trigger {
    /// A single cell changed.
    CellChanged { column: String },
    /// A whole row was edited or inserted.
    RowChanged,
    /// The dataset was bulk-modified (import, paste, bulk delete).
    DatasetChanged,
    /// Explicit validation before saving or exporting.
    OnSave,
}

/// Type-keyed collaborator services that custom and async rules may query.
#[derive(Clone, Default)]
pub struct Services {
    entries: HashMap<TypeId, Arc<dyn Any + Send + Sync>>,
}

impl Services {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a service, replacing any previous one of the same type.
    pub fn insert<T: Any + Send + Sync>(&mut self, service: Arc<T>) {
        self.entries.insert(TypeId::of::<T>(), service);
    }

    /// Look up a service by type.
    pub fn get<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        self.entries
            .get(&TypeId::of::<T>())
            .and_then(|s| Arc::clone(s).downcast::<T>().ok())
    }
}

impl fmt::Debug for Services {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Services")
            .field("count", &self.entries.len())
            .finish()
    }
}

/// Runtime parameters for one evaluation.
#[derive(Debug, Clone)]
pub struct ValidationContext {
    pub trigger: Trigger,
    /// Outcomes below this severity are dropped.
    pub minimum_severity: Severity,
    pub stop_policy: StopPolicy,
    pub cancellation: CancellationToken,
    pub services: Arc<Services>,
}

impl ValidationContext {
    /// Create a context for the given trigger with default settings.
    pub fn new(trigger: Trigger) -> Self {
        Self {
            trigger,
            minimum_severity: Severity::Information,
            stop_policy: StopPolicy::Continue,
            cancellation: CancellationToken::new(),
            services: Arc::new(Services::new()),
        }
    }

    /// Context for a single cell change.
    pub fn cell_changed(column: impl Into<String>) -> Self {
        Self::new(Trigger::CellChanged {
            column: column.into(),
        })
    }

    pub fn with_minimum_severity(mut self, severity: Severity) -> Self {
        self.minimum_severity = severity;
        self
    }

    pub fn with_stop_policy(mut self, policy: StopPolicy) -> Self {
        self.stop_policy = policy;
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancellation = token;
        self
    }

    pub fn with_services(mut self, services: Services) -> Self {
        self.services = Arc::new(services);
        self
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

impl Default for ValidationContext {
    fn default() -> Self {
        Self::new(Trigger::DatasetChanged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Directory {
        known: Vec<&'static str>,
    }

    #[test]
    fn test_services_lookup() {
        let mut services = Services::new();
        services.insert(Arc::new(Directory {
            known: vec!["a@x.org"],
        }));

        let ctx = ValidationContext::cell_changed("email").with_services(services);
        let directory = ctx.services.get::<Directory>().unwrap();
        assert_eq!(directory.known, vec!["a@x.org"]);
        assert!(ctx.services.get::<String>().is_none());
    }

    #[test]
    fn test_context_defaults() {
        let ctx = ValidationContext::default();
        assert_eq!(ctx.trigger, Trigger::DatasetChanged);
        assert_eq!(ctx.stop_policy, StopPolicy::Continue);
        assert!(!ctx.is_cancelled());
        ctx.cancellation.cancel();
        assert!(ctx.is_cancelled());
    }
}
