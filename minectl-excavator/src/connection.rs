use crate::{
    config::ExcavatorConfig,
    error::{ExcavatorError, Result},
    protocol::{ExcavatorRequest, ExcavatorResponse},
};
use futures::{sink::SinkExt, stream::StreamExt};
use std::{
    sync::atomic::{AtomicU64, Ordering},
    time::Duration,
};
use tokio::{
    net::TcpStream,
    sync::Mutex,
    time::{timeout, Instant},
};
use tokio_util::codec::{Framed, LinesCodec};
use tracing::{debug, info, warn};

const MAX_LINE_LENGTH: usize = 1024 * 1024;

/// Line-delimited JSON-RPC connection to one excavator API endpoint.
///
/// Requests are serialized: the stream lock is held from send until the
/// matching response arrives.
pub struct ExcavatorConnection {
    host: String,
    port: u16,
    stream: Mutex<Option<Framed<TcpStream, LinesCodec>>>,
    next_id: AtomicU64,
    connect_timeout: Duration,
    response_timeout: Duration,
}

impl ExcavatorConnection {
    pub fn new(host: String, port: u16, connect_timeout: Duration, response_timeout: Duration) -> Self {
        Self {
            host,
            port,
            stream: Mutex::new(None),
            next_id: AtomicU64::new(1),
            connect_timeout,
            response_timeout,
        }
    }

    pub fn from_config(config: &ExcavatorConfig, port: u16) -> Self {
        Self::new(
            config.api_host.clone(),
            port,
            config.connect_timeout(),
            config.response_timeout(),
        )
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Single connection attempt
    pub async fn connect(&self) -> Result<()> {
        let addr = self.address();
        debug!("Connecting to excavator API at {}", addr);

        let stream = timeout(self.connect_timeout, TcpStream::connect(&addr))
            .await
            .map_err(|_| ExcavatorError::Timeout)?
            .map_err(|e| ExcavatorError::Connection(e.to_string()))?;

        stream
            .set_nodelay(true)
            .map_err(|e| ExcavatorError::Connection(e.to_string()))?;

        let framed = Framed::new(stream, LinesCodec::new_with_max_length(MAX_LINE_LENGTH));
        *self.stream.lock().await = Some(framed);

        info!("Connected to excavator API at {}", addr);
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.stream.lock().await.is_some()
    }

    pub async fn disconnect(&self) {
        if let Some(mut stream) = self.stream.lock().await.take() {
            let _ = SinkExt::<String>::close(&mut stream).await;
        }
    }

    /// Send a request built with a fresh id and wait for its response
    pub async fn send_request<F>(&self, build: F) -> Result<ExcavatorResponse>
    where
        F: FnOnce(u64) -> ExcavatorRequest,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let request = build(id);

        let mut guard = self.stream.lock().await;
        let framed = guard.as_mut().ok_or(ExcavatorError::NotConnected)?;

        let line = serde_json::to_string(&request)?;
        debug!("Sending: {}", line);

        if let Err(e) = framed.send(line).await {
            warn!("Write to excavator failed: {}", e);
            *guard = None;
            return Err(e.into());
        }

        let deadline = Instant::now() + self.response_timeout;
        loop {
            let next = tokio::time::timeout_at(deadline, framed.next())
                .await
                .map_err(|_| ExcavatorError::Timeout)?;

            let line = match next {
                Some(Ok(line)) => line,
                Some(Err(e)) => {
                    warn!("Read from excavator failed: {}", e);
                    *guard = None;
                    return Err(e.into());
                }
                None => {
                    *guard = None;
                    return Err(ExcavatorError::Connection("connection closed by excavator".to_string()));
                }
            };

            debug!("Received: {}", line);

            match serde_json::from_str::<ExcavatorResponse>(&line) {
                Ok(response) if response.id == Some(id) => return Ok(response),
                Ok(response) => debug!("Skipping stale response {:?}", response.id),
                Err(e) => warn!("Failed to parse message: {} ({})", line, e),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_not_connected() {
        let conn = ExcavatorConnection::new(
            "127.0.0.1".to_string(),
            3456,
            Duration::from_millis(100),
            Duration::from_millis(100),
        );

        assert!(!conn.is_connected().await);
        let result = conn.send_request(ExcavatorRequest::info).await;
        assert!(matches!(result, Err(ExcavatorError::NotConnected)));
    }

    #[test]
    fn test_address() {
        let config = ExcavatorConfig::default();
        let conn = ExcavatorConnection::from_config(&config, 4001);
        assert_eq!(conn.address(), "127.0.0.1:4001");
    }
}
