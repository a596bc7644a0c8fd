//! The top-level error taxonomy (§7), implemented as concrete variants
//! rather than just named "kinds". Component-level errors (`GatewayError`,
//! `MemoryError`, `CostError`, `DeciderError`) convert into this via `From`
//! where a stage needs to record one into `state.errors`; most of the time
//! stages instead format the component error directly into a string and
//! never construct a `CoreError` at all (per §7's propagation policy,
//! stages never throw out of the engine).

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum CoreError {
    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("transient I/O error: {0}")]
    Transient(String),

    #[error("malformed external data: {0}")]
    DataQuality(String),

    #[error("daily cost cap exceeded")]
    CostCapExceeded,

    #[error("cost update CAS conflict")]
    CostUpdateConflict,

    #[error("state invariant violated: {0}")]
    StateInvariantViolation(String),

    #[error("external execution error: {0}")]
    ExternalExecution(String),
}

impl From<crate::gateway::GatewayError> for CoreError {
    fn from(e: crate::gateway::GatewayError) -> Self {
        match e {
            crate::gateway::GatewayError::Transient(m) => CoreError::Transient(m),
            crate::gateway::GatewayError::DataQuality(m) => CoreError::DataQuality(m),
            crate::gateway::GatewayError::NotFound(m) => CoreError::DataQuality(m),
            crate::gateway::GatewayError::WriteConflict(_) => CoreError::CostUpdateConflict,
        }
    }
}

impl From<crate::cost::CostError> for CoreError {
    fn from(e: crate::cost::CostError) -> Self {
        match e {
            crate::cost::CostError::Gateway(g) => g.into(),
            crate::cost::CostError::CapExceeded => CoreError::CostCapExceeded,
            crate::cost::CostError::UpdateConflict(_) => CoreError::CostUpdateConflict,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_not_found_maps_to_data_quality() {
        let e: CoreError = crate::gateway::GatewayError::NotFound("pool".into()).into();
        assert!(matches!(e, CoreError::DataQuality(_)));
    }

    #[test]
    fn gateway_transient_maps_to_transient() {
        let e: CoreError = crate::gateway::GatewayError::Transient("timeout".into()).into();
        assert!(matches!(e, CoreError::Transient(_)));
    }
}
