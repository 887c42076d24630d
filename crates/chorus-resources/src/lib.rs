//! # Chorus Resources
//!
//! The shared infrastructure every plugin may use, bundled into one
//! [`SharedResources`] value that is created once and passed around by `Arc`.
//!
//! | Resource | Type | Backed by |
//! |----------|------|-----------|
//! | HTTP client | [`reqwest::Client`] | `reqwest` |
//! | Timer | [`SharedTimer`] | `tokio` + `tokio-util` |
//! | JSON codec | [`JsonCodec`] | `serde_json` |
//! | SQL source | [`SqlSource`] | `r2d2` + `r2d2_sqlite` |
//!
//! ## Lifecycle
//!
//! [`SharedResources::start`] acquires the resources in table order from the
//! bottom up: the SQL source first (probed with `SELECT 1`), then the HTTP
//! client, the timer and the codec. [`SharedResources::stop`] releases them
//! in reverse.
//!
//! ```rust,ignore
//! let resources = SharedResources::start(&config.resources).await?;
//! let rows = resources.sql()?.with_connection(|c| count_timers(c)).await?;
//! resources.stop().await;
//! ```

pub mod error;
pub mod http;
pub mod json;
pub mod sql;
pub mod timer;

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

pub use error::{ResourceError, ResourceResult};
pub use json::JsonCodec;
pub use sql::{MEMORY_URL, SqlConnection, SqlSource};
pub use timer::{SharedTimer, TimerHandle};

/// Configuration of the shared resources.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourcesConfig {
    /// SQLite database (`:memory:`, a path or a `sqlite://` url). No SQL source when unset.
    pub database_url: Option<String>,
    /// Maximum pooled SQL connections.
    pub pool_size: u32,
    /// `User-Agent` header of the HTTP client.
    pub user_agent: String,
    /// HTTP request timeout in seconds.
    pub http_timeout_secs: u64,
    /// Whether the JSON codec indents its output.
    pub pretty_json: bool,
}

impl Default for ResourcesConfig {
    fn default() -> Self {
        Self {
            database_url: None,
            pool_size: 4,
            user_agent: format!("chorus/{}", env!("CARGO_PKG_VERSION")),
            http_timeout_secs: 30,
            pretty_json: false,
        }
    }
}

/// The shared resource bundle.
pub struct SharedResources {
    sql: Mutex<Option<SqlSource>>,
    sql_configured: bool,
    http: reqwest::Client,
    timer: SharedTimer,
    json: JsonCodec,
    stopped: AtomicBool,
}

impl SharedResources {
    /// Acquires every configured resource.
    ///
    /// Fails if the SQL source cannot be opened or does not answer the probe,
    /// or if the HTTP client cannot be built.
    pub async fn start(config: &ResourcesConfig) -> ResourceResult<Arc<Self>> {
        let sql = match &config.database_url {
            Some(url) => {
                let source = SqlSource::open(
                    url,
                    config.pool_size,
                    Duration::from_secs(config.http_timeout_secs.max(1)),
                )?;
                source.probe().await?;
                info!(url = %url, "SQL source ready");
                Some(source)
            }
            None => None,
        };

        let http = http::build_client(
            &config.user_agent,
            Duration::from_secs(config.http_timeout_secs),
        )?;
        let timer = SharedTimer::new();
        let json = JsonCodec::new(config.pretty_json);

        info!(sql = sql.is_some(), "Shared resources started");
        Ok(Arc::new(Self {
            sql_configured: sql.is_some(),
            sql: Mutex::new(sql),
            http,
            timer,
            json,
            stopped: AtomicBool::new(false),
        }))
    }

    /// The shared HTTP client.
    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    /// The shared timer.
    pub fn timer(&self) -> &SharedTimer {
        &self.timer
    }

    /// The shared JSON codec.
    pub fn json(&self) -> &JsonCodec {
        &self.json
    }

    /// A handle to the SQL source.
    pub fn sql(&self) -> ResourceResult<SqlSource> {
        if self.is_stopped() {
            return Err(ResourceError::Stopped);
        }
        match self.sql.lock().as_ref() {
            Some(source) => Ok(source.clone()),
            None if self.sql_configured => Err(ResourceError::Stopped),
            None => Err(ResourceError::Unavailable { resource: "sql" }),
        }
    }

    /// Whether [`stop`](Self::stop) was called.
    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Releases the resources in reverse acquisition order. Idempotent.
    pub async fn stop(&self) {
        if self.stopped.swap(true, Ordering::AcqRel) {
            return;
        }

        self.timer.shutdown().await;
        debug!("Timer stopped");

        // Pooled connections close once the last outstanding handle is dropped.
        if self.sql.lock().take().is_some() {
            debug!("SQL source released");
        }

        info!("Shared resources stopped");
    }
}

impl fmt::Debug for SharedResources {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SharedResources")
            .field("sql", &*self.sql.lock())
            .field("timer", &self.timer)
            .field("json", &self.json)
            .field("stopped", &self.is_stopped())
            .finish_non_exhaustive()
    }
}
