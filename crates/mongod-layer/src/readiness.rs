use crate::LayerError;
use async_trait::async_trait;
use backon::{ExponentialBuilder, Retryable};
use mongod_layer_core::LayerConfig;
use std::time::Duration;
use tokio::net::TcpStream;
use tracing::{debug, info};

/// Decides when a freshly started server is ready for imports
#[async_trait]
pub trait ReadinessProbe: Send + Sync {
    async fn wait_ready(&self) -> Result<(), LayerError>;
}

/// Sleep a fixed interval
pub struct FixedDelay(pub Duration);

#[async_trait]
impl ReadinessProbe for FixedDelay {
    async fn wait_ready(&self) -> Result<(), LayerError> {
        info!(
            "Waiting {} seconds for mongod to start up",
            self.0.as_secs_f64()
        );
        tokio::time::sleep(self.0).await;
        Ok(())
    }
}

/// Retry a plain TCP connect until the server's port accepts one.
/// Nothing is sent over the connection.
pub struct PortProbe {
    address: String,
    min_delay: Duration,
    max_delay: Duration,
    max_attempts: usize,
}

impl PortProbe {
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            min_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(2),
            max_attempts: 10,
        }
    }

    pub fn localhost(port: u16) -> Self {
        Self::new(format!("127.0.0.1:{port}"))
    }

    pub fn with_delays(mut self, min_delay: Duration, max_delay: Duration) -> Self {
        self.min_delay = min_delay;
        self.max_delay = max_delay;
        self
    }

    /// At least one connect is always attempted
    pub fn with_max_attempts(mut self, max_attempts: usize) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    fn retry_strategy(&self) -> ExponentialBuilder {
        ExponentialBuilder::default()
            .with_min_delay(self.min_delay)
            .with_max_delay(self.max_delay)
            .with_max_times(self.max_attempts.saturating_sub(1))
    }
}

#[async_trait]
impl ReadinessProbe for PortProbe {
    async fn wait_ready(&self) -> Result<(), LayerError> {
        info!("Waiting for mongod to accept connections on {}", self.address);

        let connect = || async { TcpStream::connect(self.address.as_str()).await.map(drop) };

        connect
            .retry(self.retry_strategy())
            .notify(|e: &std::io::Error, delay: Duration| {
                debug!("{} not ready ({e}), retrying in {delay:?}", self.address);
            })
            .await
            .map_err(|_| LayerError::NotReady {
                address: self.address.clone(),
                attempts: self.max_attempts,
            })?;

        info!("mongod is accepting connections on {}", self.address);
        Ok(())
    }
}

/// Port probe when a ready port is configured, the fixed delay otherwise
pub fn probe_for(config: &LayerConfig) -> Box<dyn ReadinessProbe> {
    match config.ready_port {
        Some(port) => Box::new(PortProbe::localhost(port)),
        None => Box::new(FixedDelay(config.startup_wait())),
    }
}
