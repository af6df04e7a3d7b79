//! RPC Error Types
//!
//! Maps application errors to JSON-RPC error codes.

use crate::types::QueueCount;
use jobrelay_core::application::BatchReport;
use jobrelay_core::error::AppError;
use jsonrpsee::types::ErrorObjectOwned;

/// RPC Error Codes
pub mod code {
    pub const VALIDATION_ERROR: i32 = 4000;
    /// Missing resource, nothing to do, or no broker configured
    pub const NOT_FOUND: i32 = 4001;
    /// Workload already exists
    pub const CONFLICT: i32 = 4002;
    pub const INTERNAL_ERROR: i32 = 5000;
    pub const BROKER_ERROR: i32 = 5001;
    pub const ORCHESTRATOR_ERROR: i32 = 5002;
}

/// Convert AppError to JSON-RPC ErrorObject
pub fn to_rpc_error(err: AppError) -> ErrorObjectOwned {
    match err {
        AppError::Validation(msg) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, msg, None::<()>)
        }
        AppError::Domain(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        AppError::Serialization(e) => {
            ErrorObjectOwned::owned(code::VALIDATION_ERROR, e.to_string(), None::<()>)
        }
        AppError::NotFound(msg) => ErrorObjectOwned::owned(code::NOT_FOUND, msg, None::<()>),
        AppError::Conflict(msg) => ErrorObjectOwned::owned(code::CONFLICT, msg, None::<()>),
        AppError::Broker(msg) => ErrorObjectOwned::owned(code::BROKER_ERROR, msg, None::<()>),
        e @ AppError::MessageTooLarge { .. } => {
            ErrorObjectOwned::owned(code::BROKER_ERROR, e.to_string(), None::<()>)
        }
        AppError::Orchestrator(msg) => {
            ErrorObjectOwned::owned(code::ORCHESTRATOR_ERROR, msg, None::<()>)
        }
        AppError::Config(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
        AppError::Internal(msg) => ErrorObjectOwned::owned(code::INTERNAL_ERROR, msg, None::<()>),
    }
}

/// A fan-out where at least one queue failed. The data lists every failed
/// target with its error and every target that succeeded with its count.
pub fn partial_failure(operation: &str, report: &BatchReport<usize>) -> ErrorObjectOwned {
    let failures: Vec<serde_json::Value> = report
        .failures()
        .map(|(target, err)| serde_json::json!({ "target": target, "error": err.to_string() }))
        .collect();
    let succeeded: Vec<QueueCount> = report
        .successes()
        .map(|(target, count)| QueueCount {
            target: target.to_string(),
            count: *count,
        })
        .collect();
    ErrorObjectOwned::owned(
        code::BROKER_ERROR,
        format!(
            "{} failed on {} of {} targets: {}",
            operation,
            failures.len(),
            report.len(),
            report.failed_targets().join(", ")
        ),
        Some(serde_json::json!({
            "failures": failures,
            "succeeded": succeeded,
        })),
    )
}
