use crate::state::Snapshot;
use reqwest::{Client, StatusCode};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("коллектор недоступен: {0}")]
    Request(#[from] reqwest::Error),
    #[error("коллектор ответил статусом {0}")]
    Status(StatusCode),
}

/// Outcome of one delivery as seen by the caller's logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Failed; `consecutive` counts this one.
    Failed { consecutive: u64, report: bool },
}

/// Fire-and-forget POST of snapshots. No retries: the next tick is the retry.
pub struct Transport {
    client: Client,
    url: String,
    timeout: Duration,
    failures: AtomicU64,
}

impl Transport {
    pub fn new(url: impl Into<String>, timeout: Duration) -> Result<Self, TransportError> {
        let client = Client::builder()
            .user_agent(concat!("rigstatd/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            url: url.into(),
            timeout,
            failures: AtomicU64::new(0),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub async fn send(&self, snapshot: &Snapshot) -> Result<(), TransportError> {
        let response = self
            .client
            .post(&self.url)
            .timeout(self.timeout)
            .json(snapshot)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status(status));
        }
        Ok(())
    }

    /// Updates the consecutive-failure streak. Failures are reported on the
    /// 1st, 11th, 21st ... in a row.
    pub fn record(&self, result: &Result<(), TransportError>) -> Delivery {
        match result {
            Ok(()) => {
                self.failures.store(0, Ordering::Relaxed);
                Delivery::Sent
            }
            Err(_) => {
                let consecutive = self.failures.fetch_add(1, Ordering::Relaxed) + 1;
                Delivery::Failed {
                    consecutive,
                    report: consecutive % 10 == 1,
                }
            }
        }
    }
}
