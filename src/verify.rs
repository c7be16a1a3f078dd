//! Artifact health check.
//!
//! Exercises a loaded [`ArtifactSet`] the way a request would: shape and
//! scaler agreement, descriptor order, and a probe inference over an
//! all-zero window. Run at startup and on demand by the `health` command.
//! Artifacts that fail to load get a report too, via [`failed_load_report`].

use chrono::Utc;
use ndarray::Array2;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::artifacts::ArtifactSet;
use crate::error::ArtifactError;
use crate::features;
use crate::logging::Stage;
use crate::model::{FEATURE_COUNT, WINDOW_LEN};

/// Probe scores beyond this magnitude are implausible for REGCDI.
const PLAUSIBLE_SCORE: f64 = 10.0;

// ============================================================================
// Results
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckResult {
    pub name: String,
    pub status: HealthStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub timestamp: String,
    pub status: HealthStatus,
    pub model_version: String,
    pub input_shape: (usize, usize),
    pub probe_score: Option<f64>,
    pub checks: Vec<CheckResult>,
}

impl HealthReport {
    pub fn is_serving(&self) -> bool {
        self.status != HealthStatus::Failed
    }
}

fn check(name: &str, status: HealthStatus, detail: Option<String>) -> CheckResult {
    CheckResult {
        name: name.to_string(),
        status,
        detail,
    }
}

// ============================================================================
// Runner
// ============================================================================

/// Report for artifacts that never loaded: a single failed `artifacts_load`
/// check carrying the load error.
pub fn failed_load_report(err: &ArtifactError) -> HealthReport {
    warn!(stage = %Stage::Startup, error = %err, "health.load_failed");
    HealthReport {
        timestamp: Utc::now().to_rfc3339(),
        status: HealthStatus::Failed,
        model_version: "unknown".to_string(),
        input_shape: (0, 0),
        probe_score: None,
        checks: vec![check("artifacts_load", HealthStatus::Failed, Some(err.to_string()))],
    }
}

pub fn run_health_check(artifacts: &ArtifactSet) -> HealthReport {
    let engine = artifacts.engine();
    let scalers = artifacts.scalers();
    let mut checks = Vec::new();

    // input_shape, scaler_dims and feature_order restate what
    // ArtifactSet::from_parts enforced at load time, so a loaded set only
    // fails them if that constructor stops checking.

    let shape = engine.input_shape();
    checks.push(if shape == (WINDOW_LEN, FEATURE_COUNT) {
        check("input_shape", HealthStatus::Healthy, None)
    } else {
        check(
            "input_shape",
            HealthStatus::Failed,
            Some(format!("model expects {shape:?}, windows are ({WINDOW_LEN}, {FEATURE_COUNT})")),
        )
    });

    checks.push(if scalers.input().dims() == FEATURE_COUNT && scalers.output().dims() == 1 {
        check("scaler_dims", HealthStatus::Healthy, None)
    } else {
        check(
            "scaler_dims",
            HealthStatus::Failed,
            Some(format!(
                "input scaler has {} dims, output scaler {}",
                scalers.input().dims(),
                scalers.output().dims()
            )),
        )
    });

    checks.push(match features::order_mismatch(&artifacts.feature_config().names()) {
        None => check("feature_order", HealthStatus::Healthy, None),
        Some(msg) => check("feature_order", HealthStatus::Failed, Some(msg)),
    });

    // Descriptor and model document disagreeing on version is worth a look
    // but does not stop serving.
    let declared = artifacts.feature_config().model_version.as_deref();
    checks.push(match declared {
        Some(v) if v != engine.model_version() => check(
            "model_version",
            HealthStatus::Degraded,
            Some(format!("descriptor says {v}, model document says {}", engine.model_version())),
        ),
        _ => check("model_version", HealthStatus::Healthy, None),
    });

    let mut probe_score = None;
    let probe = scalers
        .forward_matrix(&Array2::zeros((WINDOW_LEN, FEATURE_COUNT)))
        .and_then(|scaled| engine.infer(&scaled));
    checks.push(match probe {
        Ok(raw) => {
            let score = scalers.inverse(raw);
            probe_score = Some(score);
            if !score.is_finite() {
                check("probe_inference", HealthStatus::Failed, Some(format!("probe score {score}")))
            } else if score.abs() > PLAUSIBLE_SCORE {
                check(
                    "probe_inference",
                    HealthStatus::Degraded,
                    Some(format!("probe score {score:.3} outside plausible range")),
                )
            } else {
                check("probe_inference", HealthStatus::Healthy, None)
            }
        }
        Err(e) => check("probe_inference", HealthStatus::Failed, Some(e.to_string())),
    });

    let status = checks
        .iter()
        .map(|c| c.status)
        .max()
        .unwrap_or(HealthStatus::Healthy);

    let report = HealthReport {
        timestamp: Utc::now().to_rfc3339(),
        status,
        model_version: artifacts.model_version().to_string(),
        input_shape: shape,
        probe_score: probe_score.filter(|s| s.is_finite()),
        checks,
    };

    if report.status == HealthStatus::Healthy {
        info!(stage = %Stage::Startup, model_version = %report.model_version, "health.ok");
    } else {
        for c in report.checks.iter().filter(|c| c.status != HealthStatus::Healthy) {
            warn!(
                stage = %Stage::Startup,
                check = %c.name,
                status = ?c.status,
                detail = c.detail.as_deref().unwrap_or(""),
                "health.check_failed"
            );
        }
    }
    report
}
