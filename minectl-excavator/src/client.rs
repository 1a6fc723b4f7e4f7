use crate::{
    config::ExcavatorConfig,
    connection::ExcavatorConnection,
    error::Result,
    protocol::{methods, parse_worker_id, parse_worker_list, ExcavatorRequest, WorkerStatus},
};
use tracing::{debug, info};

/// Typed wrapper over the excavator API
pub struct ExcavatorClient {
    connection: ExcavatorConnection,
}

impl ExcavatorClient {
    pub fn new(config: &ExcavatorConfig, port: u16) -> Self {
        Self {
            connection: ExcavatorConnection::from_config(config, port),
        }
    }

    pub fn from_connection(connection: ExcavatorConnection) -> Self {
        Self { connection }
    }

    pub async fn connect(&self) -> Result<()> {
        self.connection.connect().await
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.is_connected().await
    }

    pub async fn disconnect(&self) {
        self.connection.disconnect().await
    }

    /// Point excavator at a stratum server
    pub async fn subscribe(&self, stratum_url: &str, username: &str) -> Result<()> {
        info!("Subscribing excavator to {} as {}", stratum_url, username);
        self.connection
            .send_request(|id| ExcavatorRequest::subscribe(id, stratum_url, username))
            .await?
            .into_body(methods::SUBSCRIBE)?;
        Ok(())
    }

    pub async fn algorithm_add(&self, algorithm: &str) -> Result<()> {
        debug!("Adding algorithm {}", algorithm);
        self.connection
            .send_request(|id| ExcavatorRequest::algorithm_add(id, algorithm))
            .await?
            .into_body(methods::ALGORITHM_ADD)?;
        Ok(())
    }

    pub async fn algorithm_remove(&self, algorithm: &str) -> Result<()> {
        self.connection
            .send_request(|id| ExcavatorRequest::algorithm_remove(id, algorithm))
            .await?
            .into_body(methods::ALGORITHM_REMOVE)?;
        Ok(())
    }

    /// Start a worker, returning its worker id
    pub async fn worker_add(&self, algorithm: &str, device_id: u32) -> Result<u32> {
        debug!("Adding worker for {} on device {}", algorithm, device_id);
        let body = self
            .connection
            .send_request(|id| ExcavatorRequest::worker_add(id, algorithm, device_id))
            .await?
            .into_body(methods::WORKER_ADD)?;
        parse_worker_id(&body)
    }

    pub async fn worker_free(&self, worker_id: u32) -> Result<()> {
        self.connection
            .send_request(|id| ExcavatorRequest::worker_free(id, worker_id))
            .await?
            .into_body(methods::WORKER_FREE)?;
        Ok(())
    }

    pub async fn worker_list(&self) -> Result<Vec<WorkerStatus>> {
        let body = self
            .connection
            .send_request(ExcavatorRequest::worker_list)
            .await?
            .into_body(methods::WORKER_LIST)?;
        parse_worker_list(body)
    }

    /// Ask excavator to exit
    pub async fn quit(&self) -> Result<()> {
        info!("Asking excavator at {} to quit", self.connection.address());
        self.connection
            .send_request(ExcavatorRequest::quit)
            .await?
            .into_body(methods::QUIT)?;
        Ok(())
    }
}
