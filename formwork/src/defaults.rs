//! Initial values for a form session.

use std::future::Future;

use async_trait::async_trait;
use formwork_common::Pretty;
use serde_json::Value;
use tracing::{debug, error};

use crate::error::InitializationError;

/// Error type resolvers may fail with. The engine only keeps its message.
pub type ResolveError = Box<dyn std::error::Error + Send + Sync>;

/// Produces the defaults snapshot for a session.
///
/// Called exactly once per session, before any field operation is allowed.
#[async_trait]
pub trait DefaultsResolver: Send + Sync {
    async fn resolve(&self) -> Result<Value, ResolveError>;
}

/// Defaults known up front.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaticDefaults(pub Value);

#[async_trait]
impl DefaultsResolver for StaticDefaults {
    async fn resolve(&self) -> Result<Value, ResolveError> {
        Ok(self.0.clone())
    }
}

/// Adapts an async closure into a resolver.
pub struct FnResolver<F>(F);

/// Build a resolver from a closure returning a future, e.g. a remote lookup.
pub fn resolver_fn<F, Fut>(f: F) -> FnResolver<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ResolveError>> + Send + 'static,
{
    FnResolver(f)
}

#[async_trait]
impl<F, Fut> DefaultsResolver for FnResolver<F>
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, ResolveError>> + Send + 'static,
{
    async fn resolve(&self) -> Result<Value, ResolveError> {
        (self.0)().await
    }
}

/// Run a resolver, mapping failure to the terminal initialization error.
pub(crate) async fn resolve_defaults(
    resolver: &dyn DefaultsResolver,
) -> Result<Value, InitializationError> {
    debug!("resolving form defaults");
    match resolver.resolve().await {
        Ok(defaults) => {
            debug!(defaults = %Pretty(&defaults), "form defaults resolved");
            Ok(defaults)
        }
        Err(e) => {
            error!(error = %e, "form defaults failed to resolve");
            Err(InitializationError::Failed {
                message: e.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn static_defaults_resolve_to_themselves() {
        let resolver = StaticDefaults(json!({"username": "Batman"}));
        let defaults = resolve_defaults(&resolver).await.unwrap();
        assert_eq!(defaults, json!({"username": "Batman"}));
    }

    #[tokio::test]
    async fn closure_resolver_runs_its_future() {
        let resolver = resolver_fn(|| async {
            tokio::task::yield_now().await;
            Ok::<_, ResolveError>(json!({"email": "leanne@april.biz"}))
        });
        let defaults = resolve_defaults(&resolver).await.unwrap();
        assert_eq!(defaults["email"], "leanne@april.biz");
    }

    #[tokio::test]
    async fn failure_becomes_initialization_error() {
        let resolver = resolver_fn(|| async {
            Err::<Value, ResolveError>("network unreachable".into())
        });
        let err = resolve_defaults(&resolver).await.unwrap_err();
        assert_eq!(
            err,
            InitializationError::Failed {
                message: "network unreachable".into()
            }
        );
    }
}
