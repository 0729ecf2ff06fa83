use thiserror::Error;
use uuid::Uuid;

/// Failures that must stop a report from rendering.
///
/// Malformed per-response data never shows up here; the collection boundary
/// drops those fields instead.
#[derive(Debug, Error)]
pub enum ReportError {
    #[error("skill template defines no skill keys")]
    EmptySkillTemplate,

    #[error("skill template lists skill key `{0}` more than once")]
    DuplicateSkillKey(String),

    #[error("invalid rating scale: {0}")]
    InvalidRatingScale(String),

    #[error("unknown feedback mode `{0}`; refusing to render")]
    UnknownMode(String),

    #[error("cycle {0} not found")]
    CycleNotFound(Uuid),

    #[error("cycle {0} is not concluded yet")]
    CycleNotConcluded(Uuid),
}
