//! Priority-ordered fallback across identification strategies

use tracing::{debug, warn};

use tenantry_core::{EntityDefinition, RequestInfo, StrategyConfig};

use crate::strategy::{IdentificationStrategy, build_strategy};

/// Tries each strategy in ascending priority order; the first hit wins
///
/// Errors raised by an individual strategy count as a miss.
#[derive(Debug, Default)]
pub struct CompositeStrategy {
    strategies: Vec<(u32, Box<dyn IdentificationStrategy>)>,
}

impl CompositeStrategy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from configured strategies
    pub fn from_configs(configs: &[StrategyConfig]) -> Self {
        let mut composite = Self::new();
        for config in configs {
            composite.add(config.priority, build_strategy(config));
        }
        composite
    }

    /// Insert a strategy, keeping ascending priority order
    ///
    /// Equal priorities keep insertion order.
    pub fn add(&mut self, priority: u32, strategy: Box<dyn IdentificationStrategy>) {
        let index = self.strategies.partition_point(|(p, _)| *p <= priority);
        self.strategies.insert(index, (priority, strategy));
    }

    pub fn len(&self) -> usize {
        self.strategies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.strategies.is_empty()
    }

    pub fn extract_entity_id(
        &self,
        request: &RequestInfo,
        definition: &EntityDefinition,
    ) -> Option<String> {
        for (priority, strategy) in &self.strategies {
            match strategy.extract_entity_id(request, definition) {
                Ok(Some(id)) => {
                    debug!(
                        entity_type = %definition.entity_type,
                        strategy = ?strategy.kind(),
                        priority,
                        entity_id = %id,
                        "Entity identified"
                    );
                    return Some(id);
                }
                Ok(None) => continue,
                Err(e) => {
                    warn!(
                        entity_type = %definition.entity_type,
                        strategy = ?strategy.kind(),
                        "Identification strategy failed: {}",
                        e
                    );
                    continue;
                }
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::IdentifyError;
    use std::sync::{Arc, Mutex};
    use tenantry_core::{StrategyParams, StrategyType};

    /// Records call order and returns a fixed answer
    #[derive(Debug)]
    struct Fixed {
        label: &'static str,
        answer: Option<&'static str>,
        fail: bool,
        calls: Arc<Mutex<Vec<&'static str>>>,
    }

    impl IdentificationStrategy for Fixed {
        fn kind(&self) -> StrategyType {
            StrategyType::Header
        }

        fn extract_entity_id(
            &self,
            _request: &RequestInfo,
            _definition: &EntityDefinition,
        ) -> Result<Option<String>, IdentifyError> {
            self.calls.lock().unwrap().push(self.label);
            if self.fail {
                return Err(IdentifyError::MissingHeaders);
            }
            Ok(self.answer.map(|s| s.to_string()))
        }
    }

    fn fixed(
        label: &'static str,
        answer: Option<&'static str>,
        fail: bool,
        calls: &Arc<Mutex<Vec<&'static str>>>,
    ) -> Box<dyn IdentificationStrategy> {
        Box::new(Fixed {
            label,
            answer,
            fail,
            calls: calls.clone(),
        })
    }

    #[test]
    fn test_lowest_priority_hit_wins() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut composite = CompositeStrategy::new();
        composite.add(3, fixed("c", Some("from-c"), false, &calls));
        composite.add(1, fixed("a", None, false, &calls));
        composite.add(2, fixed("b", Some("from-b"), false, &calls));

        let id = composite.extract_entity_id(&RequestInfo::new(), &EntityDefinition::new("tenant"));

        assert_eq!(id.as_deref(), Some("from-b"));
        assert_eq!(*calls.lock().unwrap(), vec!["a", "b"]);
    }

    #[test]
    fn test_failure_is_treated_as_miss() {
        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut composite = CompositeStrategy::new();
        composite.add(1, fixed("a", None, true, &calls));
        composite.add(2, fixed("b", Some("from-b"), false, &calls));

        let id = composite.extract_entity_id(&RequestInfo::new(), &EntityDefinition::new("tenant"));
        assert_eq!(id.as_deref(), Some("from-b"));
    }

    #[test]
    fn test_empty_and_all_miss() {
        let composite = CompositeStrategy::new();
        assert!(composite.is_empty());
        assert_eq!(
            composite.extract_entity_id(&RequestInfo::new(), &EntityDefinition::new("tenant")),
            None
        );

        let calls = Arc::new(Mutex::new(Vec::new()));
        let mut composite = CompositeStrategy::new();
        composite.add(1, fixed("a", None, false, &calls));
        composite.add(2, fixed("b", None, true, &calls));
        assert_eq!(
            composite.extract_entity_id(&RequestInfo::new(), &EntityDefinition::new("tenant")),
            None
        );
    }

    #[test]
    fn test_from_configs_real_strategies() {
        let configs = vec![
            StrategyConfig::new(StrategyType::Header, 2),
            StrategyConfig::new(StrategyType::Subdomain, 1),
        ];
        let composite = CompositeStrategy::from_configs(&configs);
        let tenant = EntityDefinition::new("tenant");

        // Subdomain has the lower priority and wins when both match
        let req = RequestInfo::new()
            .with_hostname("sub.example.com")
            .with_header("x-tenant-id", "hdr");
        assert_eq!(
            composite.extract_entity_id(&req, &tenant).as_deref(),
            Some("sub")
        );

        // Falls back to the header when the hostname has no subdomain
        let req = RequestInfo::new()
            .with_hostname("localhost")
            .with_header("x-tenant-id", "hdr");
        assert_eq!(
            composite.extract_entity_id(&req, &tenant).as_deref(),
            Some("hdr")
        );
    }

    #[test]
    fn test_invalid_pattern_falls_through() {
        let configs = vec![
            StrategyConfig::new(StrategyType::Subdomain, 1).with_params(StrategyParams {
                extract_pattern: Some("(".to_string()),
                ..Default::default()
            }),
            StrategyConfig::new(StrategyType::Query, 2),
        ];
        let composite = CompositeStrategy::from_configs(&configs);
        let req = RequestInfo::new()
            .with_hostname("a.example.com")
            .with_query("tenant_id", "q");

        assert_eq!(
            composite
                .extract_entity_id(&req, &EntityDefinition::new("tenant"))
                .as_deref(),
            Some("q")
        );
    }
}
