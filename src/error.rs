//! Error types for the descrambler pipe.
//!
//! A plain closed enum rather than a `thiserror`-derived type, the same
//! register the teacher crate's own `Error<D>`/`ErrorDetails<D>` uses: the
//! error set here is small and closed, and callers are expected to match on
//! it directly rather than format a generic message.

use std::fmt;

/// Errors returned at the control boundary (spec.md §7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlError {
    /// `SetFlowDef` received a flow declaration not matching `block.mpegts.`.
    InvalidFlow,
    /// `SetKey` received control words that failed to parse or validate.
    InvalidKey,
    /// Copy-on-write allocation for an exclusive packet buffer failed.
    AllocationFailed,
    /// A CSA_BS-selecting key was installed with no `DeadlineTimer` attached.
    BackendUnavailable,
    /// Catch-all for conditions not otherwise classified.
    Unhandled,
}

impl fmt::Display for ControlError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            ControlError::InvalidFlow => "flow declaration does not match block.mpegts.",
            ControlError::InvalidKey => "control word failed to parse or validate",
            ControlError::AllocationFailed => "exclusive packet buffer allocation failed",
            ControlError::BackendUnavailable => "no timer attached for batched backend",
            ControlError::Unhandled => "unhandled control condition",
        };
        f.write_str(msg)
    }
}

impl std::error::Error for ControlError {}

/// Internal, never-surfaced reasons a packet was silently dropped.
///
/// These exist purely to give `log::warn!` call sites a readable tag; per
/// spec.md §7 they are not part of any public `Result`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DropReason {
    HeaderUnreadable,
    AdaptationInvalid,
    CopyFailed,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let msg = match self {
            DropReason::HeaderUnreadable => "header unreadable",
            DropReason::AdaptationInvalid => "adaptation field invalid",
            DropReason::CopyFailed => "copy-on-write allocation failed",
        };
        f.write_str(msg)
    }
}
