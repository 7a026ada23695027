use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    #[error("Unknown session: {0}")]
    UnknownSession(u64),
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// Why a manually injected URL was rejected. Rejections are ordinary
/// outcomes callers branch on, never faults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnqueueReason {
    BadUrl,
    OutOfScope,
    Duplicate,
    NotPage,
}

impl EnqueueReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EnqueueReason::BadUrl => "bad_url",
            EnqueueReason::OutOfScope => "out_of_scope",
            EnqueueReason::Duplicate => "duplicate",
            EnqueueReason::NotPage => "not_page",
        }
    }
}

impl std::fmt::Display for EnqueueReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueOutcome {
    pub enqueued: bool,
    pub reason: Option<EnqueueReason>,
}

impl EnqueueOutcome {
    pub fn accepted() -> Self {
        Self {
            enqueued: true,
            reason: None,
        }
    }

    pub fn rejected(reason: EnqueueReason) -> Self {
        Self {
            enqueued: false,
            reason: Some(reason),
        }
    }
}
