//! Service discovery used when a node tries to find its way back into the cluster.

use std::time::Duration;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::net::TcpStream;
use tracing::debug;

/// Best-effort instance lookup. Failures degrade to an empty list.
#[async_trait]
pub trait ServiceDiscovery: Send + Sync {
    async fn list_instances(&self, service_name: &str) -> Vec<String>;
}

/// Fixed address list, e.g. from configuration.
#[derive(Debug, Default)]
pub struct StaticDiscovery {
    addresses: RwLock<Vec<String>>,
}

impl StaticDiscovery {
    pub fn new(addresses: Vec<String>) -> Self {
        Self {
            addresses: RwLock::new(addresses),
        }
    }

    /// Replace the advertised addresses
    pub fn set_addresses(&self, addresses: Vec<String>) {
        *self.addresses.write() = addresses;
    }
}

#[async_trait]
impl ServiceDiscovery for StaticDiscovery {
    async fn list_instances(&self, _service_name: &str) -> Vec<String> {
        self.addresses.read().clone()
    }
}

/// Whether a TCP connection to `address` can be opened within `timeout`.
pub async fn tcp_reachable(address: &str, timeout: Duration) -> bool {
    match tokio::time::timeout(timeout, TcpStream::connect(address)).await {
        Ok(Ok(_)) => true,
        Ok(Err(e)) => {
            debug!(%address, error = %e, "Connection refused");
            false
        }
        Err(_) => {
            debug!(%address, "Connection attempt timed out");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn listening_address_is_reachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        assert!(tcp_reachable(&address, Duration::from_secs(1)).await);
    }

    #[tokio::test]
    async fn closed_port_is_unreachable() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        drop(listener);

        assert!(!tcp_reachable(&address, Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn static_discovery_returns_configured_addresses() {
        let discovery = StaticDiscovery::new(vec!["10.0.0.1:5701".to_string()]);
        assert_eq!(discovery.list_instances("svc").await, vec!["10.0.0.1:5701"]);

        discovery.set_addresses(vec![]);
        assert!(discovery.list_instances("svc").await.is_empty());
    }
}
