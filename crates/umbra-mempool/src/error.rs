//! Error types for ancestor-package limit checking.
//!
//! These are the only recoverable failures the pool reports: the caller's
//! sole recourse is to reject the candidate transaction, so each variant is
//! a human-readable description of the limit that was hit. Every other pool
//! operation is infallible given its preconditions.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MempoolError {
    #[error("too many unconfirmed parents [limit: {limit}]")]
    TooManyParents { limit: u64 },
    #[error("too many unconfirmed ancestors [limit: {limit}]")]
    TooManyAncestors { limit: u64 },
    #[error("exceeds ancestor size limit [limit: {limit}]")]
    AncestorSizeLimit { limit: u64 },
    #[error("too many descendants for tx {txid} [limit: {limit}]")]
    TooManyDescendants { txid: String, limit: u64 },
    #[error("exceeds descendant size limit for tx {txid} [limit: {limit}]")]
    DescendantSizeLimit { txid: String, limit: u64 },
}
