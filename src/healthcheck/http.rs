use super::HealthChecker;
use crate::error::Result;
use async_trait::async_trait;
use reqwest::Client;
use std::sync::OnceLock;
use std::time::Duration;

/// Global shared HTTP client for liveness probes.
///
/// The client-level timeout is only a fallback; each probe applies its own
/// per-request timeout.
static SHARED_HTTP_CLIENT: OnceLock<Client> = OnceLock::new();

fn shared_client() -> &'static Client {
    SHARED_HTTP_CLIENT.get_or_init(|| {
        Client::builder()
            .timeout(Duration::from_secs(30))
            .pool_max_idle_per_host(0)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!("Falling back to default HTTP client: {}", e);
                Client::new()
            })
    })
}

/// Reachability probe against a local port.
///
/// Any HTTP response, whatever its status, counts as alive. Connection
/// errors and timeouts count as not alive. This is a reachability check,
/// not a deep health check.
pub struct HttpProbe {
    url: String,
    client: Client,
    timeout: Duration,
}

impl HttpProbe {
    /// Probe `http://127.0.0.1:<port>/`.
    pub fn for_port(port: u16, timeout: Duration) -> Self {
        Self {
            url: format!("http://127.0.0.1:{}/", port),
            client: shared_client().clone(),
            timeout,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl HealthChecker for HttpProbe {
    async fn check(&self) -> Result<bool> {
        match self
            .client
            .get(&self.url)
            .timeout(self.timeout)
            .send()
            .await
        {
            Ok(response) => {
                tracing::trace!("Probe {} answered {}", self.url, response.status());
                Ok(true)
            }
            Err(e) => {
                tracing::trace!("Probe {} failed: {}", self.url, e);
                Ok(false)
            }
        }
    }
}
