use thiserror::Error;

/// Infrastructure failures of the execution engine
///
/// Candidate misbehavior (timeouts, crashes, memory) is never an error here;
/// it is reported through `ExecutionStatus`.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("{what} exceeds maximum size of {limit} bytes ({actual} bytes)")]
    InputTooLarge {
        what: &'static str,
        actual: usize,
        limit: usize,
    },

    #[error("no interpreter configured")]
    NoInterpreter,

    #[error("failed to prepare execution workspace: {0}")]
    Workspace(#[source] std::io::Error),

    #[error("failed to spawn `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("child {0} pipe was not captured")]
    MissingPipe(&'static str),

    #[error("I/O error while supervising child: {0}")]
    Io(#[source] std::io::Error),

    #[error("process budget is closed")]
    PoolClosed,
}

impl EngineError {
    /// Errors that end a whole evaluation rather than a single case
    pub fn is_fatal(&self) -> bool {
        matches!(self, EngineError::PoolClosed)
    }
}
