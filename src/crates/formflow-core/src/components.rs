//! Component registry
//!
//! The core never assembles HTML. It evaluates a step into a block tree and
//! hands that tree to the external framework adapter, which renders each block
//! through the renderer registered for its `variant`. The registry lives here
//! so adapters and tests share one lookup contract; a missing variant is a
//! `LOOKUP_FAILED` thunk error, exactly like a missing function.

use crate::error::{ThunkError, ThunkResult};
use futures::future::BoxFuture;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

type Renderer = Arc<dyn Fn(Value) -> BoxFuture<'static, ThunkResult<String>> + Send + Sync>;

/// Variant-keyed registry of block renderers
#[derive(Default, Clone)]
pub struct ComponentRegistry {
    entries: HashMap<String, Renderer>,
}

impl ComponentRegistry {
    /// Empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an async renderer for a variant
    pub fn register(
        &mut self,
        variant: impl Into<String>,
        renderer: impl Fn(Value) -> BoxFuture<'static, ThunkResult<String>> + Send + Sync + 'static,
    ) {
        self.entries.insert(variant.into(), Arc::new(renderer));
    }

    /// Register a synchronous renderer for a variant
    pub fn register_sync(
        &mut self,
        variant: impl Into<String>,
        renderer: impl Fn(&Value) -> String + Send + Sync + 'static,
    ) {
        let renderer = Arc::new(renderer);
        self.register(variant, move |block| {
            let renderer = Arc::clone(&renderer);
            Box::pin(async move { Ok(renderer(&block)) })
        });
    }

    /// True when a renderer exists for the variant
    pub fn contains(&self, variant: &str) -> bool {
        self.entries.contains_key(variant)
    }

    /// Render one evaluated block
    pub async fn render(&self, variant: &str, block: Value) -> ThunkResult<String> {
        let renderer = self.entries.get(variant).ok_or_else(|| {
            ThunkError::lookup_failed(format!("component '{variant}' is not registered"))
        })?;
        renderer(block).await
    }
}

impl std::fmt::Debug for ComponentRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ComponentRegistry")
            .field("variants", &self.entries.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_render_dispatches_by_variant() {
        let mut registry = ComponentRegistry::new();
        registry.register_sync("heading", |block| {
            format!("<h1>{}</h1>", block["text"].as_str().unwrap_or(""))
        });

        let html = registry
            .render("heading", json!({"text": "Welcome"}))
            .await
            .unwrap();
        assert_eq!(html, "<h1>Welcome</h1>");
    }

    #[tokio::test]
    async fn test_missing_variant_is_lookup_failed() {
        let registry = ComponentRegistry::new();
        let err = registry.render("nope", json!({})).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ThunkErrorKind::LookupFailed);
    }
}
