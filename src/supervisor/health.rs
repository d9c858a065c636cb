//! Health probe for the supervised server.

use std::time::Duration;

use tracing::debug;

use crate::constants::{HEALTH_CHECK_TIMEOUT, HEALTH_PATH};

/// Configuration for health checks.
#[derive(Debug, Clone)]
pub struct HealthCheckConfig {
    /// Timeout for each health check request.
    pub timeout: Duration,
    /// Path appended to the base URL.
    pub path: String,
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            timeout: HEALTH_CHECK_TIMEOUT,
            path: HEALTH_PATH.to_string(),
        }
    }
}

/// Single-shot HTTP health probe.
///
/// One `check` is one request: retries belong to the caller's polling loop.
#[derive(Debug, Clone)]
pub struct HealthCheck {
    config: HealthCheckConfig,
    client: reqwest::Client,
}

impl HealthCheck {
    /// Create a new health check.
    ///
    /// # Panics
    ///
    /// Panics if the TLS backend cannot be initialized.
    pub fn new(config: HealthCheckConfig) -> Self {
        // The server is local: never route probes through a system proxy.
        let client = reqwest::Client::builder()
            .timeout(config.timeout)
            .no_proxy()
            .pool_max_idle_per_host(1)
            .build()
            .expect("Failed to create health check client");

        Self { config, client }
    }

    /// Full probe URL for a server base URL such as `http://127.0.0.1:4096`.
    pub fn url(&self, base_url: &str) -> String {
        format!("{}{}", base_url.trim_end_matches('/'), self.config.path)
    }

    /// Returns true when the server answers with a 2xx status.
    pub async fn check(&self, base_url: &str) -> bool {
        let url = self.url(base_url);

        match self
            .client
            .get(&url)
            .timeout(self.config.timeout)
            .send()
            .await
        {
            Ok(response) => {
                let healthy = response.status().is_success();
                if healthy {
                    debug!(url = %url, "Health check passed");
                } else {
                    debug!(
                        url = %url,
                        status = %response.status(),
                        "Health check failed with status"
                    );
                }
                healthy
            },
            Err(e) => {
                debug!(url = %url, error = %e, "Health check failed");
                false
            },
        }
    }
}

impl Default for HealthCheck {
    fn default() -> Self {
        Self::new(HealthCheckConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_health_check_config_default() {
        let config = HealthCheckConfig::default();
        assert_eq!(config.timeout, Duration::from_millis(2000));
        assert_eq!(config.path, "/global/health");
    }

    #[test]
    fn test_url_joins_without_double_slash() {
        let check = HealthCheck::default();
        assert_eq!(
            check.url("http://127.0.0.1:4096"),
            "http://127.0.0.1:4096/global/health"
        );
        assert_eq!(
            check.url("http://127.0.0.1:4096/"),
            "http://127.0.0.1:4096/global/health"
        );
    }

    #[tokio::test]
    async fn test_unreachable_server_is_unhealthy() {
        // Bind then drop to get a port nobody listens on.
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };

        let check = HealthCheck::new(HealthCheckConfig {
            timeout: Duration::from_millis(500),
            ..HealthCheckConfig::default()
        });
        assert!(!check.check(&format!("http://127.0.0.1:{port}")).await);
    }

    #[tokio::test]
    async fn test_silent_server_times_out_per_request() {
        // Accepts connections but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let accept = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let check = HealthCheck::new(HealthCheckConfig {
            timeout: Duration::from_millis(200),
            ..HealthCheckConfig::default()
        });
        let began = std::time::Instant::now();
        assert!(!check.check(&format!("http://127.0.0.1:{port}")).await);
        assert!(began.elapsed() < Duration::from_secs(2));

        accept.abort();
    }
}
