//! Persisted settlement records
//!
//! A settlement starts `Pending` and ends in exactly one of the terminal
//! states. Only `Completed` settlements are netted into balances.

use crate::types::{Currency, GroupId, MinorUnits, SettlementId, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Settlement status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum SettlementStatus {
    /// Awaiting payment confirmation
    Pending = 1,
    /// Payment confirmed (terminal)
    Completed = 2,
    /// Abandoned before payment (terminal)
    Cancelled = 3,
}

impl SettlementStatus {
    /// Check if status is terminal
    pub fn is_terminal(&self) -> bool {
        matches!(self, SettlementStatus::Completed | SettlementStatus::Cancelled)
    }
}

impl fmt::Display for SettlementStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SettlementStatus::Pending => "pending",
            SettlementStatus::Completed => "completed",
            SettlementStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", name)
    }
}

/// Details supplied by the payment collaborator on completion
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionMetadata {
    /// Provider-side payment reference
    pub payment_reference: Option<String>,

    /// Who confirmed the payment
    pub confirmed_by: Option<UserId>,

    /// Free-form note
    pub note: Option<String>,
}

/// Settlement record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settlement {
    /// Settlement ID
    pub id: SettlementId,

    /// Group the debt belongs to
    pub group_id: GroupId,

    /// Member who pays
    pub payer_id: UserId,

    /// Member who receives
    pub receiver_id: UserId,

    /// Amount in minor units
    pub amount: MinorUnits,

    /// Currency
    pub currency: Currency,

    /// Current status
    pub status: SettlementStatus,

    /// Actor that created the record
    pub created_by: UserId,

    /// Optional notes
    pub notes: Option<String>,

    /// Completion details (set on completion)
    pub completion: Option<CompletionMetadata>,

    /// Completed timestamp
    pub completed_at: Option<DateTime<Utc>>,

    /// Cancelled timestamp
    pub cancelled_at: Option<DateTime<Utc>>,

    /// Cancellation reason
    pub cancellation_reason: Option<String>,

    /// Created timestamp
    pub created_at: DateTime<Utc>,

    /// Last updated timestamp
    pub updated_at: DateTime<Utc>,
}

impl Settlement {
    /// Create a new pending settlement
    pub fn pending(
        group_id: GroupId,
        payer_id: UserId,
        receiver_id: UserId,
        amount: MinorUnits,
        currency: Currency,
        created_by: UserId,
        notes: Option<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: SettlementId::new(),
            group_id,
            payer_id,
            receiver_id,
            amount,
            currency,
            status: SettlementStatus::Pending,
            created_by,
            notes,
            completion: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Copy of this record moved to `Completed`
    pub fn completed(&self, metadata: CompletionMetadata, at: DateTime<Utc>) -> Self {
        Self {
            status: SettlementStatus::Completed,
            completion: Some(metadata),
            completed_at: Some(at),
            updated_at: at,
            ..self.clone()
        }
    }

    /// Copy of this record moved to `Cancelled`
    pub fn cancelled(&self, reason: impl Into<String>, at: DateTime<Utc>) -> Self {
        Self {
            status: SettlementStatus::Cancelled,
            cancelled_at: Some(at),
            cancellation_reason: Some(reason.into()),
            updated_at: at,
            ..self.clone()
        }
    }

    /// Check if the record is netted into balances
    pub fn affects_balances(&self) -> bool {
        self.status == SettlementStatus::Completed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Settlement {
        Settlement::pending(
            GroupId::new("trip"),
            UserId::new("alice"),
            UserId::new("bob"),
            1_500,
            Currency::USD,
            UserId::new("alice"),
            Some("dinner".to_string()),
        )
    }

    #[test]
    fn test_status_terminal() {
        assert!(!SettlementStatus::Pending.is_terminal());
        assert!(SettlementStatus::Completed.is_terminal());
        assert!(SettlementStatus::Cancelled.is_terminal());
    }

    #[test]
    fn test_pending_does_not_affect_balances() {
        let settlement = sample();
        assert_eq!(settlement.status, SettlementStatus::Pending);
        assert!(!settlement.affects_balances());
        assert!(settlement.completed_at.is_none());
    }

    #[test]
    fn test_completed_copy() {
        let settlement = sample();
        let now = Utc::now();
        let metadata = CompletionMetadata {
            payment_reference: Some("tx-42".to_string()),
            ..Default::default()
        };

        let done = settlement.completed(metadata.clone(), now);
        assert_eq!(done.id, settlement.id);
        assert_eq!(done.status, SettlementStatus::Completed);
        assert_eq!(done.completed_at, Some(now));
        assert_eq!(done.completion, Some(metadata));
        assert!(done.affects_balances());
    }

    #[test]
    fn test_cancelled_copy() {
        let settlement = sample();
        let now = Utc::now();

        let cancelled = settlement.cancelled("paid in cash", now);
        assert_eq!(cancelled.status, SettlementStatus::Cancelled);
        assert_eq!(cancelled.cancellation_reason.as_deref(), Some("paid in cash"));
        assert!(!cancelled.affects_balances());
    }

    #[test]
    fn test_status_serde() {
        let json = serde_json::to_string(&SettlementStatus::Cancelled).unwrap();
        assert_eq!(json, "\"cancelled\"");
    }
}
