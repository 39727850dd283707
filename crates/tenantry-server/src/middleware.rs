//! Entity resolution middleware
//!
//! Identifies the entities a request belongs to and attaches the primary
//! entity's context to the request extensions. Requests that match no
//! entity pass through untouched.

use axum::{
    Json,
    extract::{Query, Request, State},
    http::{StatusCode, header},
    middleware::Next,
    response::{IntoResponse, Response},
};
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use tenantry_core::{AccessContext, PolicyViolation, RequestInfo, entity_key};
use tenantry_identify::IdentifiedEntity;
use tenantry_runtime::EntityManager;

/// Every entity identified on the request, primary first
#[derive(Debug, Clone)]
pub struct IdentifiedEntities(pub Vec<IdentifiedEntity>);

/// Framework-neutral view of an axum request
pub fn request_info(req: &Request) -> RequestInfo {
    let uri = req.uri();
    let mut info = RequestInfo::new().with_url(
        uri.path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or_else(|| uri.path()),
    );

    let host = req
        .headers()
        .get(header::HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| uri.host());
    if let Some(host) = host {
        info = info.with_hostname(host);
    }

    for (name, value) in req.headers() {
        if let Ok(value) = value.to_str() {
            info = info.with_header(name.as_str(), value);
        }
    }

    if let Ok(Query(params)) = Query::<HashMap<String, String>>::try_from_uri(uri) {
        for (name, value) in params {
            info = info.with_query(name, value);
        }
    }

    info
}

fn reject(status: StatusCode, message: String) -> Response {
    (status, Json(json!({"success": false, "error": message}))).into_response()
}

pub async fn entity_middleware(
    State(manager): State<Arc<EntityManager>>,
    mut req: Request,
    next: Next,
) -> Response {
    let found = manager.identify_entities(&request_info(&req));
    let Some(primary) = found.first() else {
        return next.run(req).await;
    };

    let key = entity_key(&primary.entity_type, &primary.id);
    let Some(context) = manager.get_entity(&primary.entity_type, &primary.id) else {
        debug!(entity = %key, "Identified entity is not loaded");
        return reject(StatusCode::NOT_FOUND, format!("Entity '{}' not found", key));
    };

    if !context.is_active() {
        return reject(
            StatusCode::SERVICE_UNAVAILABLE,
            format!("Entity '{}' is suspended", key),
        );
    }

    // Set by an outer authentication layer, if any
    let access = req
        .extensions()
        .get::<AccessContext>()
        .cloned()
        .unwrap_or_default();
    if let Err(violation) = context
        .definition
        .security
        .check(&access, &context.entity_type, &context.id)
    {
        let status = match violation {
            PolicyViolation::Unauthenticated { .. } => StatusCode::UNAUTHORIZED,
            PolicyViolation::IsolationViolation { .. } => StatusCode::FORBIDDEN,
        };
        return reject(status, violation.to_string());
    }

    req.extensions_mut().insert(IdentifiedEntities(found));
    req.extensions_mut().insert(context);
    next.run(req).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::AxumHost;
    use axum::{
        Extension, Router,
        body::{Body, to_bytes},
        http::Request as HttpRequest,
        middleware,
        routing::get,
    };
    use serde_json::Value;
    use tempfile::TempDir;
    use tenantry_core::{
        Authentication, Catalog, CatalogModuleLoader, EntityContext, EntityDefinition, Isolation,
        SecurityPolicy, StaticConfigStore, StrategyConfig, StrategyType,
    };
    use tenantry_runtime::RuntimeConfig;
    use tower::ServiceExt;

    async fn handler(
        Extension(context): Extension<Arc<EntityContext>>,
        Extension(found): Extension<IdentifiedEntities>,
    ) -> String {
        format!("{}:{}", context.key(), found.0.len())
    }

    async fn manager_with(definition: EntityDefinition, root: &TempDir) -> Arc<EntityManager> {
        for id in ["acme", "globex"] {
            std::fs::create_dir_all(root.path().join("entities/tenant").join(id)).unwrap();
        }
        let manager = EntityManager::builder(
            RuntimeConfig::with_dirs(root.path().join("entities"), root.path().join("resources")),
            Arc::new(StaticConfigStore::with_definitions([definition]).unwrap()),
            Arc::new(AxumHost::new()),
            Arc::new(CatalogModuleLoader::new(Arc::new(Catalog::new()))),
        )
        .build();
        manager.load_all_from_disk().await.unwrap();
        Arc::new(manager)
    }

    fn tenant() -> EntityDefinition {
        EntityDefinition::new("tenant").with_strategy(StrategyConfig::new(StrategyType::Header, 1))
    }

    fn app(manager: Arc<EntityManager>) -> Router {
        Router::new()
            .route("/", get(handler))
            .route("/open", get(|| async { "open" }))
            .layer(middleware::from_fn_with_state(manager, entity_middleware))
    }

    fn request(uri: &str, tenant: Option<&str>) -> HttpRequest<Body> {
        let mut builder = HttpRequest::builder().uri(uri);
        if let Some(tenant) = tenant {
            builder = builder.header("x-tenant-id", tenant);
        }
        builder.body(Body::empty()).unwrap()
    }

    async fn body_json(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_request_info() {
        let req = HttpRequest::builder()
            .uri("/orders?tenant_id=acme&page=2")
            .header("host", "acme.example.com:8080")
            .header("X-Tenant-Id", "acme")
            .body(Body::empty())
            .unwrap();

        let info = request_info(&req);
        assert_eq!(info.hostname.as_deref(), Some("acme.example.com"));
        assert_eq!(info.url.as_deref(), Some("/orders?tenant_id=acme&page=2"));
        assert_eq!(info.header("x-tenant-id"), Some(Some("acme")));
        assert_eq!(info.query_param("page"), Some("2"));
    }

    #[tokio::test]
    async fn test_attaches_entity_context() {
        let root = TempDir::new().unwrap();
        let app = app(manager_with(tenant(), &root).await);

        let response = app.oneshot(request("/", Some("acme"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert_eq!(&bytes[..], b"tenant:acme:1");
    }

    #[tokio::test]
    async fn test_unmatched_request_passes_through() {
        let root = TempDir::new().unwrap();
        let app = app(manager_with(tenant(), &root).await);

        let response = app.oneshot(request("/open", None)).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn test_unknown_entity_is_404() {
        let root = TempDir::new().unwrap();
        let app = app(manager_with(tenant(), &root).await);

        let response = app.oneshot(request("/", Some("nobody"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let body = body_json(response).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"], "Entity 'tenant:nobody' not found");
    }

    #[tokio::test]
    async fn test_suspended_entity_is_503() {
        let root = TempDir::new().unwrap();
        let manager = manager_with(tenant(), &root).await;
        manager.suspend_entity("tenant", "acme").await.unwrap();

        let response = app(manager).oneshot(request("/", Some("acme"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn test_policy_violations() {
        let root = TempDir::new().unwrap();
        let definition = tenant().with_security(SecurityPolicy {
            authentication: Authentication::Required,
            isolation: Isolation::Strict,
        });
        let manager = manager_with(definition, &root).await;

        let response = app(manager.clone())
            .oneshot(request("/", Some("acme")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let bound_elsewhere = app(manager.clone()).layer(Extension(
            AccessContext::authenticated().bound_to("tenant", "globex"),
        ));
        let response = bound_elsewhere
            .oneshot(request("/", Some("acme")))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);

        let bound_here = app(manager).layer(Extension(
            AccessContext::authenticated().bound_to("tenant", "acme"),
        ));
        let response = bound_here.oneshot(request("/", Some("acme"))).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
