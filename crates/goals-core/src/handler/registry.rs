//! Handler registry -- a named collection of registered handlers.
//!
//! The dispatcher looks handlers up by the identifier persisted on the
//! goal row. A goal whose identifier is not registered is marked corrupted
//! at dispatch time.

use std::collections::HashMap;

use super::Handler;

/// A collection of registered [`Handler`] implementations, keyed by name.
///
/// # Example
///
/// ```ignore
/// let mut registry = HandlerRegistry::new();
/// registry.register(SendWelcomeEmail::default());
/// let handler = registry.get("send-welcome-email").unwrap();
/// ```
#[derive(Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Box<dyn Handler>>,
}

impl HandlerRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler.
    ///
    /// The handler is stored under the name returned by [`Handler::name`].
    /// If a handler with the same name is already registered, it is
    /// replaced and the old one is returned.
    pub fn register(&mut self, handler: impl Handler + 'static) -> Option<Box<dyn Handler>> {
        let name = handler.name().to_string();
        self.handlers.insert(name, Box::new(handler))
    }

    /// Look up a handler by name.
    pub fn get(&self, name: &str) -> Option<&dyn Handler> {
        self.handlers.get(name).map(|b| b.as_ref())
    }

    /// List the names of all registered handlers.
    ///
    /// The order is not guaranteed (HashMap iteration order).
    pub fn list(&self) -> Vec<&str> {
        self.handlers.keys().map(|s| s.as_str()).collect()
    }

    /// Return the number of registered handlers.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Return `true` if no handlers are registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::Outcome;
    use anyhow::Result;
    use async_trait::async_trait;
    use goals_db::models::Goal;
    use sqlx::PgConnection;

    /// Minimal test handler.
    struct FakeHandler {
        handler_name: String,
    }

    impl FakeHandler {
        fn new(name: &str) -> Self {
            Self {
                handler_name: name.to_string(),
            }
        }
    }

    #[async_trait]
    impl Handler for FakeHandler {
        fn name(&self) -> &str {
            &self.handler_name
        }

        async fn handle(&self, _conn: &mut PgConnection, _goal: &Goal) -> Result<Outcome> {
            Ok(Outcome::AllDone)
        }
    }

    #[test]
    fn registry_starts_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert_eq!(registry.len(), 0);
        assert!(registry.list().is_empty());
    }

    #[test]
    fn register_and_get() {
        let mut registry = HandlerRegistry::new();
        let old = registry.register(FakeHandler::new("alpha"));
        assert!(old.is_none());

        let handler = registry.get("alpha");
        assert!(handler.is_some());
        assert_eq!(handler.unwrap().name(), "alpha");
    }

    #[test]
    fn register_replaces_existing() {
        let mut registry = HandlerRegistry::new();
        registry.register(FakeHandler::new("alpha"));
        let old = registry.register(FakeHandler::new("alpha"));
        assert!(old.is_some());
        assert_eq!(old.unwrap().name(), "alpha");
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn get_missing_returns_none() {
        let registry = HandlerRegistry::new();
        assert!(registry.get("nonexistent").is_none());
    }

    #[test]
    fn list_returns_all_names() {
        let mut registry = HandlerRegistry::new();
        registry.register(FakeHandler::new("alpha"));
        registry.register(FakeHandler::new("beta"));
        registry.register(FakeHandler::new("gamma"));

        let mut names = registry.list();
        names.sort();
        assert_eq!(names, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn registry_debug_shows_names() {
        let mut registry = HandlerRegistry::new();
        registry.register(FakeHandler::new("enroll-user"));
        let debug = format!("{registry:?}");
        assert!(debug.contains("enroll-user"));
    }
}
