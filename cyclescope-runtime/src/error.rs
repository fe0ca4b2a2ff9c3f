/// Usage errors surfaced by the profiler. None of them are retried.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    #[error("anchor table is full ({capacity} anchors) -- cannot track '{name}'")]
    AnchorCapacityExceeded { capacity: usize, name: String },

    #[error("end('{name}') has no matching open begin")]
    UnmatchedEnd { name: String },

    #[error("cycle counter calibration failed: {reason}")]
    CalibrationFailure { reason: String },

    #[error("this thread's default session is already borrowed (called from inside `with_session`?)")]
    SessionBusy,
}
