//! Handler registry keyed by request type.
//!
//! Registration interns a factory closure per request type; dispatch and
//! recovery materialise handler instances through it. Lookups are O(1) on a
//! concurrent map, and the interned closure is built once per type; there
//! is no per-dispatch reflection or downcasting.

use std::sync::Arc;

use dashmap::DashMap;

use crate::handler::{ErasedHandler, HandlerWrapper, TaskHandler};

type HandlerFactory = Arc<dyn Fn() -> Arc<dyn ErasedHandler> + Send + Sync>;

/// One registered request type.
pub struct HandlerRegistration {
    request_type: &'static str,
    handler_type: &'static str,
    factory: HandlerFactory,
}

impl HandlerRegistration {
    pub fn request_type(&self) -> &'static str {
        self.request_type
    }

    pub fn handler_type(&self) -> &'static str {
        self.handler_type
    }

    /// Build a fresh handler instance.
    pub fn materialize(&self) -> Arc<dyn ErasedHandler> {
        (self.factory)()
    }
}

/// Concurrent map from request type name to handler factory.
#[derive(Default)]
pub struct HandlerRegistry {
    registrations: DashMap<String, Arc<HandlerRegistration>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for its request type.
    ///
    /// The factory runs once per materialisation (eager dispatch, lazy
    /// execution, recovery). Registering the same request type again
    /// replaces the previous entry.
    pub fn register<H, F>(&self, factory: F)
    where
        H: TaskHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        let request_type = std::any::type_name::<H::Request>();
        let handler_type = std::any::type_name::<H>();
        let erased: HandlerFactory =
            Arc::new(move || Arc::new(HandlerWrapper::new(factory())) as Arc<dyn ErasedHandler>);

        let replaced = self
            .registrations
            .insert(
                request_type.to_string(),
                Arc::new(HandlerRegistration {
                    request_type,
                    handler_type,
                    factory: erased,
                }),
            )
            .is_some();
        if replaced {
            tracing::warn!(request_type, "handler registration replaced");
        }
    }

    pub fn resolve(&self, request_type: &str) -> Option<Arc<HandlerRegistration>> {
        self.registrations.get(request_type).map(|r| r.clone())
    }

    /// Build a handler instance for a request type, if registered.
    pub fn materialize(&self, request_type: &str) -> Option<Arc<dyn ErasedHandler>> {
        self.resolve(request_type).map(|r| r.materialize())
    }

    pub fn is_registered(&self, request_type: &str) -> bool {
        self.registrations.contains_key(request_type)
    }

    pub fn registered_types(&self) -> Vec<&'static str> {
        self.registrations
            .iter()
            .map(|entry| entry.value().request_type())
            .collect()
    }
}
