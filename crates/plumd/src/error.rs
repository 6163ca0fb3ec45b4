use std::time::Duration;

use crate::directory::RecordKind;

/// Errors surfaced by the plumd library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The directory service could not be reached or answered with a failure.
    ///
    /// Fatal to `sync_all` when it happens on the house listing; leaf
    /// fetches log it and skip the affected subtree.
    #[error("Directory service unavailable ({context}): {reason}")]
    DirectoryUnavailable { context: String, reason: String },

    /// A record awaited from the directory cache never arrived.
    #[error("Timed out after {:?} waiting for {kind} record {id}", .after)]
    DirectoryTimeout {
        kind: RecordKind,
        id: String,
        after: Duration,
    },

    /// The whole directory walk overran its deadline.
    #[error("Directory sync did not finish within {0:?}")]
    SyncTimeout(Duration),

    /// A lightpad's control channel failed or answered with a non-success status.
    #[error("Lightpad {lpid} unreachable: {reason}")]
    ControlUnreachable { lpid: String, reason: String },

    /// The HTTP client for the directory or the lightpads could not be built.
    #[error("Failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),

    /// A logical load has no members to route a command through.
    #[error("Logical load {0} has no lightpads")]
    NoMembers(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn unavailable(context: impl Into<String>, reason: impl ToString) -> Self {
        Self::DirectoryUnavailable {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    pub(crate) fn unreachable(lpid: impl Into<String>, reason: impl ToString) -> Self {
        Self::ControlUnreachable {
            lpid: lpid.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
