// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Sync state machine.
//!
//! Pure transition functions over [`SyncStatus`] and record versions. The
//! engine decides *when* to call them; nothing here touches the store or the
//! bus.
//!
//! ```text
//!   create/update/resync        report (version ok)
//!   ──────────────────► in_queue ──────────────────► updated_at_agent
//!                          │                         deleting_at_agent
//!                          │   apply error (version ok)
//!                          └───────────────────────► errored_at_agent
//! ```

use chrono::{DateTime, Utc};
use strato_protocol::SyncAction;

use crate::model::{SyncState, SyncStatus};

/// Record version assigned on create.
pub const INITIAL_RECORD_VERSION: i64 = 1;

/// Version assigned by an accepted update.
pub fn next_record_version(current: i64) -> i64 {
    current + 1
}

/// Status of a resource that was just (re)scheduled for dispatch.
///
/// The confirmed version and last sync time survive; any previous agent error
/// is cleared.
pub fn queued(action: SyncAction, prev: &SyncStatus, now: DateTime<Utc>) -> SyncStatus {
    SyncStatus {
        action,
        state: SyncState::InQueue,
        record_version: prev.record_version,
        sync_scheduled_at: Some(now),
        last_synced_at: prev.last_synced_at,
        error: None,
    }
}

/// Result of comparing a report's version with the stored one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VersionCheck {
    /// The report describes the current desired state.
    Current,
    /// The report describes some other snapshot.
    Stale {
        /// Version in the store.
        stored: i64,
        /// Version carried by the report.
        reported: i64,
    },
}

/// Compare the version carried by a report with the stored record version.
pub fn check_report_version(stored: i64, reported: i64) -> VersionCheck {
    if stored == reported {
        VersionCheck::Current
    } else {
        VersionCheck::Stale { stored, reported }
    }
}

/// Status after a matching status update from the agent.
pub fn apply_update_report(
    prev: &SyncStatus,
    confirmed_version: i64,
    deleting: bool,
    reported_at: DateTime<Utc>,
) -> SyncStatus {
    SyncStatus {
        action: prev.action,
        state: if deleting {
            SyncState::DeletingAtAgent
        } else {
            SyncState::UpdatedAtAgent
        },
        record_version: confirmed_version,
        sync_scheduled_at: prev.sync_scheduled_at,
        last_synced_at: Some(reported_at),
        error: None,
    }
}

/// Status after a matching apply error from the agent.
///
/// The confirmed version does not move: the agent did not reach the desired
/// state.
pub fn apply_error_report(
    prev: &SyncStatus,
    message: impl Into<String>,
    reported_at: DateTime<Utc>,
) -> SyncStatus {
    SyncStatus {
        action: prev.action,
        state: SyncState::ErroredAtAgent,
        record_version: prev.record_version,
        sync_scheduled_at: prev.sync_scheduled_at,
        last_synced_at: Some(reported_at),
        error: Some(message.into()),
    }
}

/// What to do with a delete confirmation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteDecision {
    /// Physically remove the resource.
    Remove,
    /// The agent deleted something the control plane still wants; send it again.
    Resync,
}

/// Decide on a delete confirmation.
///
/// A tombstoned resource is removed whatever the version: nothing the agent
/// could report would bring it back.
pub fn decide_delete_confirmation(stored: i64, reported: i64, tombstoned: bool) -> DeleteDecision {
    if tombstoned || check_report_version(stored, reported) == VersionCheck::Current {
        DeleteDecision::Remove
    } else {
        DeleteDecision::Resync
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn confirmed(version: i64) -> SyncStatus {
        SyncStatus {
            action: SyncAction::Apply,
            state: SyncState::UpdatedAtAgent,
            record_version: version,
            sync_scheduled_at: None,
            last_synced_at: Some(Utc::now() - Duration::minutes(5)),
            error: None,
        }
    }

    #[test]
    fn test_versions() {
        assert_eq!(INITIAL_RECORD_VERSION, 1);
        assert_eq!(next_record_version(1), 2);
        assert_eq!(next_record_version(41), 42);
    }

    #[test]
    fn test_queued_keeps_confirmed_version_and_clears_error() {
        let mut prev = confirmed(3);
        prev.state = SyncState::ErroredAtAgent;
        prev.error = Some("image pull failed".to_string());
        let now = Utc::now();

        let next = queued(SyncAction::Delete, &prev, now);
        assert_eq!(next.action, SyncAction::Delete);
        assert_eq!(next.state, SyncState::InQueue);
        assert_eq!(next.record_version, 3);
        assert_eq!(next.sync_scheduled_at, Some(now));
        assert_eq!(next.last_synced_at, prev.last_synced_at);
        assert!(next.error.is_none());
    }

    #[test]
    fn test_check_report_version() {
        assert_eq!(check_report_version(4, 4), VersionCheck::Current);
        assert_eq!(
            check_report_version(4, 3),
            VersionCheck::Stale {
                stored: 4,
                reported: 3
            }
        );
        // a report from the future is just as stale
        assert!(matches!(check_report_version(4, 5), VersionCheck::Stale { .. }));
    }

    #[test]
    fn test_apply_update_report() {
        let prev = queued(SyncAction::Apply, &confirmed(1), Utc::now());
        let at = Utc::now();

        let next = apply_update_report(&prev, 2, false, at);
        assert_eq!(next.state, SyncState::UpdatedAtAgent);
        assert_eq!(next.record_version, 2);
        assert_eq!(next.last_synced_at, Some(at));
        assert_eq!(next.sync_scheduled_at, prev.sync_scheduled_at);

        let next = apply_update_report(&prev, 2, true, at);
        assert_eq!(next.state, SyncState::DeletingAtAgent);
    }

    #[test]
    fn test_apply_error_report_keeps_version() {
        let prev = queued(SyncAction::Apply, &confirmed(1), Utc::now());
        let at = Utc::now();

        let next = apply_error_report(&prev, "quota exceeded", at);
        assert_eq!(next.state, SyncState::ErroredAtAgent);
        assert_eq!(next.record_version, 1);
        assert_eq!(next.error.as_deref(), Some("quota exceeded"));
        assert_eq!(next.last_synced_at, Some(at));
    }

    #[test]
    fn test_delete_confirmation_decision() {
        assert_eq!(decide_delete_confirmation(3, 3, false), DeleteDecision::Remove);
        assert_eq!(decide_delete_confirmation(3, 2, true), DeleteDecision::Remove);
        assert_eq!(decide_delete_confirmation(3, 2, false), DeleteDecision::Resync);
    }
}
