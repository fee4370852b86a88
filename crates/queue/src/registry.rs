//! Handler registration.
//!
//! Handlers are registered under an explicit type name. The payload type's
//! serde implementation is the serializer/deserializer pair used for the
//! `data` field of an [`Envelope`](crate::Envelope).

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::warn;

use crate::error::{HandlerError, QueueError, QueueResult};

/// Application side of the queue: persists one payload type.
#[async_trait]
pub trait Handler: Send + Sync + 'static {
    /// Payload type handled.
    type Item: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Process one payload.
    ///
    /// The returned flag is informational; any `Ok` acknowledges the envelope.
    async fn save(&self, item: Self::Item) -> Result<bool, HandlerError>;
}

/// Type-erased handler as stored in the registry.
#[async_trait]
pub trait RegisteredHandler: Send + Sync {
    /// Type name the handler is registered under.
    fn name(&self) -> &str;

    /// Encode a payload. Fails if `item` is not the handler's payload type.
    fn to_json(&self, item: &dyn Any) -> QueueResult<String>;

    /// Decode a payload into the handler's payload type.
    fn parse_json(&self, data: &str) -> QueueResult<Box<dyn Any + Send>>;

    /// Hand a decoded payload to the handler.
    async fn save(&self, item: Box<dyn Any + Send>) -> QueueResult<bool>;
}

struct Registration<H: Handler> {
    name: String,
    handler: H,
    _item: PhantomData<fn() -> H::Item>,
}

#[async_trait]
impl<H: Handler> RegisteredHandler for Registration<H> {
    fn name(&self) -> &str {
        &self.name
    }

    fn to_json(&self, item: &dyn Any) -> QueueResult<String> {
        let item = item
            .downcast_ref::<H::Item>()
            .ok_or_else(|| QueueError::TypeMismatch {
                expected: self.name.clone(),
            })?;
        Ok(serde_json::to_string(item)?)
    }

    fn parse_json(&self, data: &str) -> QueueResult<Box<dyn Any + Send>> {
        let item: H::Item =
            serde_json::from_str(data).map_err(|e| QueueError::Deserialization {
                type_name: self.name.clone(),
                message: e.to_string(),
            })?;
        Ok(Box::new(item))
    }

    async fn save(&self, item: Box<dyn Any + Send>) -> QueueResult<bool> {
        let item = item
            .downcast::<H::Item>()
            .map_err(|_| QueueError::TypeMismatch {
                expected: self.name.clone(),
            })?;
        self.handler
            .save(*item)
            .await
            .map_err(|source| QueueError::Handler {
                type_name: self.name.clone(),
                source,
            })
    }
}

/// Handlers indexed by type name and by payload type.
#[derive(Default, Clone)]
pub struct HandlerRegistry {
    by_name: HashMap<String, Arc<dyn RegisteredHandler>>,
    by_type: HashMap<TypeId, String>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `handler` under `type_name`.
    ///
    /// A later registration for the same name or payload type replaces the
    /// earlier one.
    pub fn register<H: Handler>(&mut self, type_name: impl Into<String>, handler: H) -> &mut Self {
        let name = type_name.into();
        let type_id = TypeId::of::<H::Item>();

        if self.by_name.contains_key(&name) {
            warn!(type_name = %name, "Replacing registered handler");
        }
        if let Some(previous) = self.by_type.insert(type_id, name.clone()) {
            if previous != name {
                warn!(
                    type_name = %name,
                    previous = %previous,
                    "Payload type re-registered under a new name"
                );
                self.by_name.remove(&previous);
            }
        }

        self.by_name.insert(
            name.clone(),
            Arc::new(Registration {
                name,
                handler,
                _item: PhantomData,
            }),
        );
        self
    }

    /// Builder-style [`register`](Self::register).
    #[must_use]
    pub fn with<H: Handler>(mut self, type_name: impl Into<String>, handler: H) -> Self {
        self.register(type_name, handler);
        self
    }

    /// Look up a handler by type name.
    #[must_use]
    pub fn lookup(&self, type_name: &str) -> Option<Arc<dyn RegisteredHandler>> {
        self.by_name.get(type_name).cloned()
    }

    /// Look up the handler registered for payload type `T`.
    #[must_use]
    pub fn lookup_type<T: 'static>(&self) -> Option<Arc<dyn RegisteredHandler>> {
        self.by_type
            .get(&TypeId::of::<T>())
            .and_then(|name| self.lookup(name))
    }

    /// Number of registered handlers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    /// Whether no handler is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("types", &self.by_name.keys().collect::<Vec<_>>())
            .finish()
    }
}
