//! HTTP health probe.
//!
//! Issues `GET {path}` over a fresh HTTP/1.1 connection to the worker
//! endpoint. 2xx is healthy, any other status is unhealthy, and anything
//! that prevents an answer is a [`HealthCheckError`].

use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use flock_core::{HealthCheckError, HealthPort};

/// [`HealthPort`] backed by plain HTTP/1.1 probes.
#[derive(Debug, Clone)]
pub struct HttpHealthPort {
    path: String,
    timeout: Duration,
}

impl HttpHealthPort {
    pub fn new(path: impl Into<String>, timeout: Duration) -> Self {
        Self {
            path: path.into(),
            timeout,
        }
    }
}

#[async_trait]
impl HealthPort for HttpHealthPort {
    async fn health_check(&self, endpoint: &str) -> Result<bool, HealthCheckError> {
        http_probe(endpoint, &self.path, self.timeout).await
    }
}

/// Perform an HTTP health probe against `address` (`host:port`, an
/// optional `http://` prefix is ignored).
pub async fn http_probe(
    address: &str,
    path: &str,
    timeout: Duration,
) -> Result<bool, HealthCheckError> {
    let address = address.strip_prefix("http://").unwrap_or(address);
    let address = address.trim_end_matches('/');
    let uri = format!("http://{address}{path}");

    let probe = async {
        let stream = tokio::net::TcpStream::connect(address)
            .await
            .map_err(|e| HealthCheckError::Connect {
                endpoint: address.to_string(),
                reason: e.to_string(),
            })?;

        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| HealthCheckError::Connect {
                endpoint: address.to_string(),
                reason: e.to_string(),
            })?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", address)
            .header("user-agent", "flock-health/0.1")
            .body(http_body_util::Empty::<bytes::Bytes>::new())
            .map_err(|e| HealthCheckError::Request {
                endpoint: address.to_string(),
                reason: e.to_string(),
            })?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| HealthCheckError::Request {
                endpoint: address.to_string(),
                reason: e.to_string(),
            })?;

        let healthy = resp.status().is_success();
        if !healthy {
            debug!(status = %resp.status(), %uri, "health probe non-2xx");
        }
        Ok::<bool, HealthCheckError>(healthy)
    };

    match tokio::time::timeout(timeout, probe).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%uri, "health probe timed out");
            Err(HealthCheckError::Timeout(timeout))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serve a single canned HTTP response on an ephemeral port.
    async fn serve_once(status_line: &'static str) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0u8; 1024];
                let _ = socket.read(&mut buf).await;
                let response =
                    format!("{status_line}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n");
                let _ = socket.write_all(response.as_bytes()).await;
                let _ = socket.shutdown().await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn probe_2xx_is_healthy() {
        let addr = serve_once("HTTP/1.1 200 OK").await;
        let result = http_probe(&addr, "/health", Duration::from_secs(2)).await;
        assert!(result.unwrap());
    }

    #[tokio::test]
    async fn probe_5xx_is_unhealthy() {
        let addr = serve_once("HTTP/1.1 503 Service Unavailable").await;
        let result = http_probe(&addr, "/health", Duration::from_secs(2)).await;
        assert!(!result.unwrap());
    }

    #[tokio::test]
    async fn probe_accepts_http_prefix() {
        let addr = serve_once("HTTP/1.1 204 No Content").await;
        let port = HttpHealthPort::new("/health", Duration::from_secs(2));
        let result = port.health_check(&format!("http://{addr}/")).await;
        assert!(result.unwrap());
    }

    #[tokio::test]
    async fn probe_to_closed_port_is_connect_error() {
        // Bind then drop to get a port nobody listens on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        drop(listener);

        let result = http_probe(&addr, "/health", Duration::from_secs(1)).await;
        assert!(matches!(result, Err(HealthCheckError::Connect { .. })));
    }

    #[tokio::test]
    async fn probe_to_silent_server_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        tokio::spawn(async move {
            // Accept and hold the socket open without answering.
            let held = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(held);
        });

        let result = http_probe(&addr, "/health", Duration::from_millis(100)).await;
        assert!(matches!(result, Err(HealthCheckError::Timeout(_))));
    }
}
