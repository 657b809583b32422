//! Host event delivery to started addons.

use serde::{Deserialize, Serialize};

use super::error::AddonError;
use super::hook::{self, Hook};
use super::registry::AddonRegistry;

/// One observed change in the host document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MutationRecord {
    /// Mutation type (`childList`, `attributes`, `characterData`).
    #[serde(rename = "type")]
    pub kind: String,
    /// Description of the changed node.
    pub target: String,
    #[serde(default)]
    pub added_nodes: Vec<String>,
    #[serde(default)]
    pub removed_nodes: Vec<String>,
    #[serde(default)]
    pub attribute_name: Option<String>,
}

/// Event originating in the host.
#[derive(Debug, Clone, PartialEq)]
pub enum HostEvent {
    /// Host navigated to another page.
    PageSwitch,
    /// One mutation from an observed batch.
    Mutation(MutationRecord),
    /// Any other named event with a JSON payload.
    Custom {
        name: String,
        payload: serde_json::Value,
    },
}

impl HostEvent {
    /// Hook that receives this event.
    #[must_use]
    pub fn hook(&self) -> Hook {
        match self {
            HostEvent::PageSwitch => Hook::OnSwitch,
            HostEvent::Mutation(_) => Hook::Observer,
            HostEvent::Custom { name, .. } => Hook::Custom(name.clone()),
        }
    }

    /// Payload passed to the hook.
    #[must_use]
    pub fn payload(&self) -> Option<serde_json::Value> {
        match self {
            HostEvent::PageSwitch => None,
            HostEvent::Mutation(record) => serde_json::to_value(record).ok(),
            HostEvent::Custom { payload, .. } => Some(payload.clone()),
        }
    }
}

/// Result of one broadcast.
#[derive(Debug, Default)]
pub struct BroadcastReport {
    /// Addons whose hook returned normally, in delivery order.
    pub delivered: Vec<String>,
    /// Hook faults, in delivery order.
    pub failed: Vec<AddonError>,
}

impl BroadcastReport {
    /// True if no hook raised.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Delivers host events to every started addon in registry order.
pub struct EventBroadcaster<'a> {
    registry: &'a mut AddonRegistry,
}

impl<'a> EventBroadcaster<'a> {
    /// Creates a broadcaster.
    pub fn new(registry: &'a mut AddonRegistry) -> Self {
        Self { registry }
    }

    /// Delivers one event. A hook that raises is logged and skipped; delivery
    /// continues with the next addon.
    ///
    /// Custom events named after a lifecycle hook or accessor are dropped;
    /// lifecycle hooks only run through the lifecycle controller.
    pub fn broadcast(&mut self, event: &HostEvent) -> BroadcastReport {
        let hook = event.hook();
        let mut report = BroadcastReport::default();
        if hook.is_reserved_custom() {
            tracing::warn!(
                event = %hook.method_name(),
                "Ignoring custom event with a reserved name"
            );
            return report;
        }
        let payload = event.payload();

        for record in self.registry.records_mut() {
            if !record.is_started() {
                continue;
            }
            let Some(instance) = record.instance.as_deref_mut() else {
                continue;
            };
            let supported = record
                .capabilities
                .supports(&hook)
                .unwrap_or_else(|| instance.has_hook(&hook));
            if !supported {
                continue;
            }

            match hook::invoke(instance, &hook, payload.as_ref()) {
                Ok(()) => report.delivered.push(record.id.clone()),
                Err(fault) => {
                    tracing::error!(
                        addon = %record.name,
                        event = %hook.method_name(),
                        "Unable to fire {} for {}: {}",
                        hook,
                        record.name,
                        fault.message
                    );
                    report
                        .failed
                        .push(AddonError::hook(&record.name, &record.filename, &hook, fault));
                }
            }
        }

        report
    }

    /// Delivers each mutation of a batch in order.
    pub fn broadcast_mutations(&mut self, batch: &[MutationRecord]) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        for mutation in batch {
            let single = self.broadcast(&HostEvent::Mutation(mutation.clone()));
            report.delivered.extend(single.delivered);
            report.failed.extend(single.failed);
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::error::Fault;
    use crate::addon::hook::Capabilities;
    use crate::addon::record::{AddonRecord, AddonState};
    use crate::addon::source::{AddonInstance, AddonMetadata};
    use std::any::Any;
    use std::path::Path;

    struct Listener {
        calls: Vec<String>,
        fail: bool,
    }

    impl AddonInstance for Listener {
        fn has_hook(&self, hook: &Hook) -> bool {
            !matches!(hook, Hook::Custom(name) if name == "on_missing")
        }

        fn call(&mut self, hook: &Hook, payload: Option<&serde_json::Value>) -> Result<(), Fault> {
            if self.fail {
                return Err(Fault::new("observer blew up"));
            }
            let suffix = payload.map(|p| p.to_string()).unwrap_or_default();
            self.calls.push(format!("{}{}", hook.method_name(), suffix));
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    fn add(registry: &mut AddonRegistry, id: &str, fail: bool, state: AddonState) {
        let listener = Listener {
            calls: Vec::new(),
            fail,
        };
        let mut record = AddonRecord::new(
            id.to_string(),
            Path::new(&format!("{}.addon.lua", id)),
            id,
            AddonMetadata::default(),
        );
        record.capabilities = Capabilities::detect(&listener);
        record.instance = Some(Box::new(listener));
        record.state = state;
        registry.insert(record);
    }

    fn calls(registry: &AddonRegistry, id: &str) -> Vec<String> {
        registry
            .get(id)
            .and_then(|r| r.instance_as::<Listener>())
            .map(|p| p.calls.clone())
            .unwrap_or_default()
    }

    #[test]
    fn test_failure_does_not_stop_delivery() {
        let mut registry = AddonRegistry::new();
        add(&mut registry, "a", false, AddonState::Started);
        add(&mut registry, "b", true, AddonState::Started);
        add(&mut registry, "c", false, AddonState::Started);

        let report = EventBroadcaster::new(&mut registry).broadcast(&HostEvent::PageSwitch);

        assert_eq!(report.delivered, vec!["a".to_string(), "c".to_string()]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].reason, "on_switch() could not be fired.");
        assert_eq!(calls(&registry, "a"), vec!["on_switch".to_string()]);
        assert_eq!(calls(&registry, "c"), vec!["on_switch".to_string()]);
    }

    #[test]
    fn test_only_started_receive() {
        let mut registry = AddonRegistry::new();
        add(&mut registry, "a", false, AddonState::Ready);
        add(&mut registry, "b", false, AddonState::Stopped);
        add(&mut registry, "c", false, AddonState::Started);

        let report = EventBroadcaster::new(&mut registry).broadcast(&HostEvent::PageSwitch);
        assert_eq!(report.delivered, vec!["c".to_string()]);
        assert!(calls(&registry, "a").is_empty());
    }

    #[test]
    fn test_custom_event_needs_hook() {
        let mut registry = AddonRegistry::new();
        add(&mut registry, "a", false, AddonState::Started);

        let report = EventBroadcaster::new(&mut registry).broadcast(&HostEvent::Custom {
            name: "on_missing".into(),
            payload: serde_json::json!(1),
        });
        assert!(report.delivered.is_empty());

        let report = EventBroadcaster::new(&mut registry).broadcast(&HostEvent::Custom {
            name: "on_theme".into(),
            payload: serde_json::json!("dark"),
        });
        assert_eq!(report.delivered, vec!["a".to_string()]);
        assert_eq!(calls(&registry, "a"), vec!["on_theme\"dark\"".to_string()]);
    }

    #[test]
    fn test_custom_event_cannot_fire_lifecycle_hooks() {
        let mut registry = AddonRegistry::new();
        add(&mut registry, "a", false, AddonState::Started);

        for name in ["start", "stop", "load", "observer"] {
            let report = EventBroadcaster::new(&mut registry).broadcast(&HostEvent::Custom {
                name: name.into(),
                payload: serde_json::Value::Null,
            });
            assert!(report.delivered.is_empty());
            assert!(report.is_clean());
        }
        assert!(calls(&registry, "a").is_empty());
        assert!(registry.get("a").is_some_and(|r| r.is_started()));
    }

    #[test]
    fn test_mutation_batch_in_order() {
        let mut registry = AddonRegistry::new();
        add(&mut registry, "a", false, AddonState::Started);

        let batch = vec![
            MutationRecord {
                kind: "childList".into(),
                target: "div#app".into(),
                ..MutationRecord::default()
            },
            MutationRecord {
                kind: "attributes".into(),
                target: "body".into(),
                attribute_name: Some("class".into()),
                ..MutationRecord::default()
            },
        ];
        let report = EventBroadcaster::new(&mut registry).broadcast_mutations(&batch);
        assert_eq!(report.delivered.len(), 2);

        let seen = calls(&registry, "a");
        assert!(seen[0].starts_with("observer"));
        assert!(seen[0].contains("childList"));
        assert!(seen[1].contains("\"attribute_name\":\"class\""));
    }
}
