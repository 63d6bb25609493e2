//! Error types shared by every crate in the workspace.
//!
//! Nothing in this workspace retries. Every variant is either a violated precondition (a bug in the
//! caller or in this library), bad input data, or a corrupt cache record, and is surfaced as-is.

use thiserror::Error;

/// Workspace-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// A bulk insert tried to descend from a root that was never allocated.
    #[error("root {0:?} is not allocated")]
    UnallocatedRoot([u32; 3]),

    /// A forest insert named a root key that the forest does not contain.
    #[error("forest has no root with key {0}")]
    UnknownRoot(u64),

    /// Input to a sortedness-dependent operation was not in non-decreasing order.
    #[error("unsorted input: {context} (saw {current} after {previous})")]
    UnsortedInput {
        context: &'static str,
        previous: u64,
        current: u64,
    },

    /// A traversal visited a different number of nodes than the tree claims to own.
    #[error("node count mismatch: visited {visited} nodes but tree holds {expected}")]
    NodeCountMismatch { visited: usize, expected: usize },

    /// An operation was called in the wrong lifecycle state, e.g. inserting after `finalize`.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Particle coordinates came in a representation other than `f32` or `f64`.
    #[error("unsupported particle coordinate representation: {0}")]
    DataType(String),

    /// The node arena cannot address any more nodes.
    #[error("octree arena is full at {0} nodes")]
    CapacityExceeded(usize),

    /// A persisted record does not describe the tree it claims to describe.
    #[error("integrity check failed: {0}")]
    Integrity(String),

    /// A configuration value is out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Bincode (de)serialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// `true` for errors caused by a violated precondition rather than by data or configuration.
    pub fn is_programming_error(&self) -> bool {
        matches!(
            self,
            Error::UnallocatedRoot(_)
                | Error::UnknownRoot(_)
                | Error::UnsortedInput { .. }
                | Error::NodeCountMismatch { .. }
                | Error::InvalidState(_)
        )
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Checks that `values` is non-decreasing, naming the offending pair on failure.
pub fn check_sorted(values: &[u64], context: &'static str) -> Result<()> {
    match values.windows(2).find(|w| w[1] < w[0]) {
        Some(w) => Err(Error::UnsortedInput {
            context,
            previous: w[0],
            current: w[1],
        }),
        None => Ok(()),
    }
}

// ████████╗███████╗███████╗████████╗
// ╚══██╔══╝██╔════╝██╔════╝╚══██╔══╝
//    ██║   █████╗  ███████╗   ██║
//    ██║   ██╔══╝  ╚════██║   ██║
//    ██║   ███████╗███████║   ██║
//    ╚═╝   ╚══════╝╚══════╝   ╚═╝

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sorted_input_passes_and_duplicates_are_allowed() {
        assert!(check_sorted(&[], "empty").is_ok());
        assert!(check_sorted(&[1, 1, 2, 9, 9], "dups").is_ok());
    }

    #[test]
    fn first_descent_is_reported() {
        match check_sorted(&[1, 5, 3, 2], "test") {
            Err(Error::UnsortedInput {
                previous, current, ..
            }) => {
                assert_eq!(previous, 5);
                assert_eq!(current, 3);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn classification() {
        assert!(Error::UnallocatedRoot([0, 0, 0]).is_programming_error());
        assert!(!Error::DataType("i32".into()).is_programming_error());
        assert!(!Error::Integrity("bad".into()).is_programming_error());
        assert!(!Error::CapacityExceeded(usize::MAX).is_programming_error());
    }
}
