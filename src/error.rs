use thiserror::Error;

/// Fatal conditions.  Structural hazards (full MSHR file, exhausted credits, busy bus) are not
/// errors and never show up here.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SimError {
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("unknown replacement policy '{0}', expected one of: TreePLRU, LRU, Random")]
    UnknownPolicy(String),

    #[error("protocol violation in {unit}: {detail}")]
    ProtocolViolation { unit: &'static str, detail: String },
}

impl SimError {
    pub fn protocol(unit: &'static str, detail: impl Into<String>) -> Self {
        Self::ProtocolViolation {
            unit,
            detail: detail.into(),
        }
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::ProtocolViolation { .. })
    }
}

pub type SimResult<T> = Result<T, SimError>;
