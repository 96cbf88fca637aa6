use std::time::Duration;

/// Connection parameters for a [`Store`](crate::store::Store) adapter that
/// talks to a networked document store.
///
/// The in-memory reference store ([`MemoryStore`](crate::memory_store::MemoryStore))
/// has no network endpoint and ignores this, but accepts it at construction
/// time so callers can swap in a real adapter without changing call sites.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub connect_timeout: Duration,
    pub query_timeout: Option<Duration>,
}

impl StoreConfig {
    pub fn new(database: &str) -> Self {
        Self {
            host: "localhost".to_string(),
            port: 28015,
            database: database.to_string(),
            connect_timeout: Duration::from_secs(20),
            query_timeout: None,
        }
    }

    pub fn with_host(mut self, host: &str) -> Self {
        self.host = host.to_string();
        self
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_query_timeout(mut self, timeout: Duration) -> Self {
        self.query_timeout = Some(timeout);
        self
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::new("doctx")
    }
}
