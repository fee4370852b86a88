//! Redis key names for a queue identity.
//!
//! Every queue identity owns three lists:
//!
//! - `$ASYNC_STORAGE:[<queue>:]<server[:port]>`: pending envelopes
//! - `$ASYNC_STORAGE_ACK:[<queue>:]<server[:port]>`: claimed, not yet acknowledged
//! - `$ASYNC_STORAGE_ERROR:[<queue>:]<server[:port]>`: failed envelopes

use std::sync::OnceLock;

use taskline_common::{IdGenerator, QueueConfig};

/// Prefix of the pending list.
pub const PENDING_PREFIX: &str = "$ASYNC_STORAGE";

/// Prefix of the in-flight list.
pub const IN_FLIGHT_PREFIX: &str = "$ASYNC_STORAGE_ACK";

/// Prefix of the error list.
pub const ERROR_PREFIX: &str = "$ASYNC_STORAGE_ERROR";

/// Server identity used when the host name cannot be read.
const FALLBACK_SERVER_NAME: &str = "localhost";

/// Key derivation for one queue identity.
#[derive(Debug)]
pub struct QueueNaming {
    use_queue_name: bool,
    queue_name: OnceLock<String>,
    server_name: String,
}

impl QueueNaming {
    /// Create naming for the given server identity.
    ///
    /// When `use_queue_name` is set and `queue_name` is `None`, a random
    /// name is generated on first use and kept for the life of the value.
    #[must_use]
    pub fn new(server_name: impl Into<String>, use_queue_name: bool, queue_name: Option<String>) -> Self {
        let cell = OnceLock::new();
        if let Some(name) = queue_name {
            let _ = cell.set(name);
        }
        Self {
            use_queue_name,
            queue_name: cell,
            server_name: server_name.into(),
        }
    }

    /// Create naming from configuration, resolving the host name.
    #[must_use]
    pub fn from_config(config: &QueueConfig) -> Self {
        let host = config
            .server_name
            .clone()
            .unwrap_or_else(local_host_name);
        let server_name = match config.port {
            Some(port) => format!("{host}:{port}"),
            None => host,
        };
        Self::new(server_name, config.use_queue_name, config.name.clone())
    }

    /// Queue name segment, if enabled.
    pub fn queue_name(&self) -> Option<&str> {
        if !self.use_queue_name {
            return None;
        }
        Some(
            self.queue_name
                .get_or_init(|| IdGenerator::new().generate_queue_name()),
        )
    }

    /// Server identity, including the port when configured.
    #[must_use]
    pub fn server_name(&self) -> &str {
        &self.server_name
    }

    /// Key suffix shared by the three lists: `[<queue>:]<server>`.
    pub fn suffix(&self) -> String {
        match self.queue_name() {
            Some(queue) => format!("{queue}:{}", self.server_name),
            None => self.server_name.clone(),
        }
    }

    /// Full key for the given prefix.
    pub fn full_name(&self, prefix: &str) -> String {
        format!("{prefix}:{}", self.suffix())
    }

    /// Pending list key.
    pub fn pending_key(&self) -> String {
        self.full_name(PENDING_PREFIX)
    }

    /// In-flight list key.
    pub fn in_flight_key(&self) -> String {
        self.full_name(IN_FLIGHT_PREFIX)
    }

    /// Error list key.
    pub fn error_key(&self) -> String {
        self.full_name(ERROR_PREFIX)
    }

    /// Resolve all three keys at once.
    pub fn keys(&self) -> QueueKeys {
        QueueKeys {
            pending: self.pending_key(),
            in_flight: self.in_flight_key(),
            error: self.error_key(),
        }
    }
}

/// The three list keys of a queue identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueKeys {
    /// Pending list.
    pub pending: String,
    /// In-flight list.
    pub in_flight: String,
    /// Error list.
    pub error: String,
}

fn local_host_name() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| FALLBACK_SERVER_NAME.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_without_queue_name() {
        let naming = QueueNaming::new("web-1", false, Some("ignored".into()));

        assert_eq!(naming.queue_name(), None);
        assert_eq!(naming.pending_key(), "$ASYNC_STORAGE:web-1");
        assert_eq!(naming.in_flight_key(), "$ASYNC_STORAGE_ACK:web-1");
        assert_eq!(naming.error_key(), "$ASYNC_STORAGE_ERROR:web-1");
    }

    #[test]
    fn test_keys_with_queue_name() {
        let naming = QueueNaming::new("web-1:8080", true, Some("orders".into()));

        assert_eq!(naming.pending_key(), "$ASYNC_STORAGE:orders:web-1:8080");
        assert_eq!(naming.in_flight_key(), "$ASYNC_STORAGE_ACK:orders:web-1:8080");
        assert_eq!(naming.error_key(), "$ASYNC_STORAGE_ERROR:orders:web-1:8080");
    }

    #[test]
    fn test_generated_queue_name_is_stable() {
        let naming = QueueNaming::new("web-1", true, None);

        let first = naming.pending_key();
        let second = naming.pending_key();
        assert_eq!(first, second);

        let name = naming.queue_name().unwrap();
        assert_eq!(name.len(), 12);
        assert_eq!(naming.in_flight_key(), format!("$ASYNC_STORAGE_ACK:{name}:web-1"));
    }

    #[test]
    fn test_generated_queue_name_is_shared_across_threads() {
        let naming = std::sync::Arc::new(QueueNaming::new("web-1", true, None));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let naming = naming.clone();
                std::thread::spawn(move || naming.pending_key())
            })
            .collect();
        let keys: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(keys.windows(2).all(|w| w[0] == w[1]));
    }

    #[test]
    fn test_from_config_appends_port() {
        let config = QueueConfig {
            server_name: Some("worker-a".into()),
            port: Some(9000),
            ..QueueConfig::default()
        };
        let naming = QueueNaming::from_config(&config);

        assert_eq!(naming.server_name(), "worker-a:9000");
        assert_eq!(naming.pending_key(), "$ASYNC_STORAGE:worker-a:9000");
    }

    #[test]
    fn test_from_config_uses_host_name() {
        let naming = QueueNaming::from_config(&QueueConfig::default());
        assert!(!naming.server_name().is_empty());
    }

    #[test]
    fn test_keys_bundle() {
        let naming = QueueNaming::new("web-1", false, None);
        let keys = naming.keys();

        assert_eq!(keys.pending, naming.pending_key());
        assert_eq!(keys.in_flight, naming.in_flight_key());
        assert_eq!(keys.error, naming.error_key());
    }
}
