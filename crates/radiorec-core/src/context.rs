//! Everything a record needs to run a capture, passed in explicitly.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Duration as Pad;
use reqwest::Client;
use tokio::runtime::Handle;

use crate::config::Config;
use crate::finalize::{Finalizer, Id3Finalizer};

#[derive(Clone)]
pub struct RecorderContext {
    client: Client,
    temp_dir: PathBuf,
    time_append: Pad,
    finalizer: Arc<dyn Finalizer>,
    runtime: Handle,
    response_timeout: Duration,
}

const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(30);

impl RecorderContext {
    pub fn new(
        client: Client,
        temp_dir: impl Into<PathBuf>,
        time_append: Pad,
        finalizer: Arc<dyn Finalizer>,
        runtime: Handle,
    ) -> Self {
        Self {
            client,
            temp_dir: temp_dir.into(),
            time_append,
            finalizer,
            runtime,
            response_timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    /// Bound on the wait for a source's response headers.
    pub fn with_response_timeout(mut self, timeout: Duration) -> Self {
        self.response_timeout = timeout;
        self
    }

    /// Build from configuration. Must be called inside a tokio runtime.
    pub fn from_config(config: &Config) -> anyhow::Result<Self> {
        let client = Client::builder()
            // Follow redirects (common for Icecast/Shoutcast load balancers)
            .redirect(reqwest::redirect::Policy::limited(10))
            // Many Icecast servers only interleave metadata when asked
            .default_headers({
                let mut h = reqwest::header::HeaderMap::new();
                h.insert(
                    "Icy-MetaData",
                    reqwest::header::HeaderValue::from_static("1"),
                );
                h
            })
            .user_agent(config.http.user_agent.clone())
            .connect_timeout(Duration::from_secs(config.http.connect_timeout_secs))
            .build()
            .context("failed to build HTTP client for recorder")?;

        let runtime = Handle::try_current().context("recorder needs a tokio runtime")?;

        Ok(Self::new(
            client,
            config.paths.temp_dir.clone(),
            config.records.pad(),
            Arc::new(Id3Finalizer),
            runtime,
        )
        .with_response_timeout(Duration::from_secs(config.http.response_timeout_secs)))
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn temp_dir(&self) -> &Path {
        &self.temp_dir
    }

    pub fn time_append(&self) -> Pad {
        self.time_append
    }

    pub fn finalizer(&self) -> Arc<dyn Finalizer> {
        self.finalizer.clone()
    }

    pub fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub fn response_timeout(&self) -> Duration {
        self.response_timeout
    }

    /// Fresh scratch path for one capture.
    pub fn temp_file(&self) -> PathBuf {
        self.temp_dir
            .join(format!("RadioRec-{:016x}.mp3", rand::random::<u64>()))
    }
}

impl std::fmt::Debug for RecorderContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecorderContext")
            .field("temp_dir", &self.temp_dir)
            .field("time_append", &self.time_append)
            .field("response_timeout", &self.response_timeout)
            .finish_non_exhaustive()
    }
}
