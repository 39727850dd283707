//! Native components shipped with the server
//!
//! Entity files reference these with `{ native: "<name>" }`. Embedders that
//! need more register them on the catalog returned by [`builtin_catalog`]
//! before the entity manager is built.
//!
//! | name             | kind     | behaviour                                        |
//! |------------------|----------|--------------------------------------------------|
//! | `request-log`    | plugin   | logs the registration (entity and route prefix)  |
//! | `entity-config`  | function | service holding the entity's merged config       |
//! | `database`       | function | the host database handle, if one is configured   |

use async_trait::async_trait;
use std::sync::Arc;
use tracing::info;

use tenantry_core::{Catalog, Error, Plugin, PluginOptions, Result, ServiceDeps, ServiceHandle};

/// Plugin that only records that it was mounted
pub struct RequestLogPlugin;

#[async_trait]
impl Plugin for RequestLogPlugin {
    async fn register(&self, options: &PluginOptions) -> Result<()> {
        let entity = options.entity_key().unwrap_or_else(|| "-".to_string());
        info!(
            entity = %entity,
            prefix = options.prefix.as_deref().unwrap_or("/"),
            "Request log mounted"
        );
        Ok(())
    }
}

pub fn builtin_catalog() -> Arc<Catalog> {
    let catalog = Arc::new(Catalog::new());
    catalog.register_plugin("request-log", Arc::new(RequestLogPlugin));
    catalog.register_function(
        "entity-config",
        Arc::new(|deps: &ServiceDeps| Ok(ServiceHandle::from_value(deps.config.clone()))),
    );
    catalog.register_function(
        "database",
        Arc::new(|deps: &ServiceDeps| {
            deps.db
                .clone()
                .ok_or_else(|| Error::Internal("No database handle configured".to_string()))
        }),
    );
    catalog
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tenantry_core::Export;

    fn call(catalog: &Catalog, name: &str, deps: &ServiceDeps) -> Result<ServiceHandle> {
        match catalog.get(name) {
            Some(Export::Function(func)) => func(deps),
            other => panic!("{} is not a function: {:?}", name, other),
        }
    }

    #[test]
    fn test_entity_config_service() {
        let catalog = builtin_catalog();
        let deps = ServiceDeps {
            db: None,
            config: json!({"plan": "gold"}),
        };

        let handle = call(&catalog, "entity-config", &deps).unwrap();
        assert_eq!(handle.as_value(), Some(&json!({"plan": "gold"})));
    }

    #[test]
    fn test_database_requires_handle() {
        let catalog = builtin_catalog();
        assert!(call(&catalog, "database", &ServiceDeps::default()).is_err());

        let db = ServiceHandle::from_value(json!("pool"));
        let deps = ServiceDeps {
            db: Some(db.clone()),
            config: json!({}),
        };
        assert!(call(&catalog, "database", &deps).unwrap().ptr_eq(&db));
    }

    #[tokio::test]
    async fn test_request_log_plugin() {
        let catalog = builtin_catalog();
        let Some(Export::Plugin(plugin)) = catalog.get("request-log") else {
            panic!("request-log is not a plugin");
        };
        plugin
            .register(&PluginOptions::new().with_prefix("/tenants/acme"))
            .await
            .unwrap();
    }
}
