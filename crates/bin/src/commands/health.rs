//! Health reporting, served by `orda serve` and queried by `orda health`.

use std::{fmt, time::Duration};

use orda::constants::HEALTH_PATH;
use serde::{Deserialize, Serialize};

use crate::cli::HealthArgs;

const HEALTHY: &str = "healthy";

/// Body of `GET /health`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthReport {
    pub status: String,
    pub persistence: String,
    #[serde(default)]
    pub version: String,
}

impl HealthReport {
    pub fn healthy(persistence: &str) -> Self {
        Self {
            status: HEALTHY.to_string(),
            persistence: persistence.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.status == HEALTHY
    }
}

impl fmt::Display for HealthReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (persistence {}", self.status, self.persistence)?;
        if !self.version.is_empty() {
            write!(f, ", version {}", self.version)?;
        }
        write!(f, ")")
    }
}

/// Why a server was judged unhealthy.
#[derive(Debug)]
pub enum Unhealthy {
    Unreachable { url: String, reason: String },
    HttpStatus(u16),
    Status(String),
}

impl fmt::Display for Unhealthy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Unhealthy::Unreachable { url, reason } => {
                write!(f, "unhealthy: failed to reach {url}: {reason}")
            }
            Unhealthy::HttpStatus(code) => write!(f, "unhealthy: HTTP status {code}"),
            Unhealthy::Status(status) => write!(f, "unhealthy: server reports '{status}'"),
        }
    }
}

impl std::error::Error for Unhealthy {}

/// The health endpoint under `base`, which may already name it.
fn health_url(base: &str) -> String {
    let base = base.trim_end_matches('/');
    if base.ends_with(HEALTH_PATH) {
        base.to_string()
    } else {
        format!("{base}{HEALTH_PATH}")
    }
}

async fn check(base: &str, timeout: Duration) -> Result<HealthReport, Unhealthy> {
    let url = health_url(base);
    let unreachable = |e: reqwest::Error| Unhealthy::Unreachable {
        url: url.clone(),
        reason: e.to_string(),
    };
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(unreachable)?;
    let response = client.get(&url).send().await.map_err(unreachable)?;
    if !response.status().is_success() {
        return Err(Unhealthy::HttpStatus(response.status().as_u16()));
    }
    let report: HealthReport = response.json().await.map_err(unreachable)?;
    if !report.is_healthy() {
        return Err(Unhealthy::Status(report.status));
    }
    Ok(report)
}

/// Run the health check command
pub async fn run(args: &HealthArgs) -> Result<(), Box<dyn std::error::Error>> {
    let report = check(&args.url, Duration::from_secs(args.timeout)).await?;
    println!("{report}");
    Ok(())
}
