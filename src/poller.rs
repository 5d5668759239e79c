//! Polling the hub's status page.
//!
//! The [`Poller`] performs one GET per cycle, optionally archives the raw
//! body, runs [`extract`] over it and returns the resulting [`PollResult`]
//! with timing attached. [`Poller::run`] drives it on a fixed interval and
//! hands every result to the [`Recorder`].
//!
//! # Example
//!
//! ```no_run
//! use btsmarthub2_exporter::{config::RouterConfig, poller::Poller};
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let poller = Poller::new(&RouterConfig::default(), None)?;
//! let result = poller.poll_once().await;
//! println!("{:?}", result.state);
//! # Ok(())
//! # }
//! ```

use anyhow::{Context, Result};
use chrono::Utc;
use reqwest::header::REFERER;
use std::fs;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::config::RouterConfig;
use crate::error::PollError;
use crate::extract::{extract, PollResult, PollTiming};
use crate::metrics::Recorder;

pub struct Poller {
    client: reqwest::Client,
    url: String,
    referer: String,
    archive: Option<Archive>,
}

impl Poller {
    /// Builds a poller for the router described by `config`.
    ///
    /// The configured timeout bounds the whole request, body included.
    pub fn new(config: &RouterConfig, archive: Option<Archive>) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.timeout())
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            url: config.poll_url(),
            referer: config.referer(),
            archive,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Polls the status page once. Never fails: transport problems come
    /// back as a [`PollResult`] in the `FetchFailed` state.
    pub async fn poll_once(&self) -> PollResult {
        let polled_at = Utc::now();
        let started = Instant::now();

        let timing = |poll_duration: Duration, parse_duration: Duration| PollTiming {
            polled_at,
            poll_duration,
            parse_duration,
        };

        let response = match self
            .client
            .get(&self.url)
            .header(REFERER, &self.referer)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                warn!("Failed to poll {}: {}", self.url, e);
                return PollResult::fetch_failed(PollError::from(e), None)
                    .with_timing(timing(started.elapsed(), Duration::ZERO));
            }
        };

        let status_code = response.status().as_u16();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) => {
                warn!("Failed to read response from {}: {}", self.url, e);
                return PollResult::fetch_failed(PollError::from(e), Some(status_code))
                    .with_timing(timing(started.elapsed(), Duration::ZERO));
            }
        };
        let poll_duration = started.elapsed();

        if let Some(archive) = &self.archive {
            match archive.store(polled_at, &body) {
                Ok(path) => debug!("Archived response to {}", path.display()),
                Err(e) => warn!("{:#}", e),
            }
        }

        let parse_started = Instant::now();
        let result = extract(&body, status_code);
        let parse_duration = parse_started.elapsed();

        debug!(
            status_code,
            state = ?result.state,
            errors = result.errors.len(),
            "Polled {}",
            self.url
        );

        result.with_timing(timing(poll_duration, parse_duration))
    }

    /// Polls forever, sleeping `interval` between polls, recording each result.
    pub async fn run(self, recorder: Arc<Recorder>, interval: Duration) {
        info!("Polling {} every {:?}", self.url, interval);

        loop {
            let result = self.poll_once().await;
            recorder.record(result);
            tokio::time::sleep(interval).await;
        }
    }
}

/// Fetches the status page once with a blocking request and saves the body
/// to `output_path`. Returns the HTTP status code.
///
/// Non-2xx responses are saved too; the hub's error pages are worth keeping
/// as fixtures.
pub fn fetch_to_file(config: &RouterConfig, output_path: &Path) -> Result<u16> {
    let url = config.poll_url();
    let response = match ureq::get(&url)
        .set("Referer", &config.referer())
        .timeout(config.timeout())
        .call()
    {
        Ok(response) => response,
        Err(ureq::Error::Status(_, response)) => response,
        Err(e) => {
            return Err(PollError::Fetch(e.to_string()))
                .with_context(|| format!("Failed to fetch {}", url));
        }
    };

    let status = response.status();
    let content = response
        .into_string()
        .map_err(|e| PollError::Fetch(e.to_string()))?;

    fs::write(output_path, &content).context("Failed to write output file")?;

    Ok(status)
}
