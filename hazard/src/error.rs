use std::error::Error;
use std::fmt;

/// Contract violations surfaced by the reclamation engine.
///
/// Both variants are programming errors on the caller's part (the spec
/// treats them as fatal in release builds): a thread that asks for more
/// hazards than it was configured with, or a container operation performed
/// by a thread that never called [`attach_thread`](crate::attach_thread).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HazardError {
    /// The calling thread has already acquired `hazards_per_thread` guards.
    GuardExhausted,
    /// The calling thread has not called `attach_thread` before touching a
    /// guarded data structure.
    NotAttached,
}

impl fmt::Display for HazardError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HazardError::GuardExhausted => {
                write!(f, "thread requested more hazard pointers than configured")
            }
            HazardError::NotAttached => {
                write!(f, "thread is not attached to the hazard-pointer registry")
            }
        }
    }
}

impl Error for HazardError {}
