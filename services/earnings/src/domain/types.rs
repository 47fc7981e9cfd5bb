use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::period::PayPeriod;

/// Payouts at or below this amount are not created.
pub const MINIMUM_PAYOUT_AMOUNT_CENTS: i64 = 50;

/// Metadata keys written on processor objects.
pub const META_GENERATED_BY: &str = "generated_by";
pub const META_PAYOUT_ID: &str = "payout_id";
pub const META_WORKER_ID: &str = "worker_id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PayoutStatus {
    Pending,
    Processing,
    Paid,
    Failed,
}

impl PayoutStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "PENDING",
            Self::Processing => "PROCESSING",
            Self::Paid => "PAID",
            Self::Failed => "FAILED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "PENDING" => Some(Self::Pending),
            "PROCESSING" => Some(Self::Processing),
            "PAID" => Some(Self::Paid),
            "FAILED" => Some(Self::Failed),
            _ => None,
        }
    }
}

impl fmt::Display for PayoutStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct WorkerPayout {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub week_start_date: NaiveDate,
    pub week_end_date: NaiveDate,
    pub amount_cents: i64,
    pub status: PayoutStatus,
    pub stripe_transfer_id: Option<String>,
    pub stripe_payout_id: Option<String>,
    pub job_instance_ids: Vec<Uuid>,
    pub last_failure_reason: Option<String>,
    pub retry_count: i32,
    pub last_attempt_at: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub row_version: i64,
}

impl WorkerPayout {
    /// A fresh PENDING payout for `period`.
    pub fn new(
        worker_id: Uuid,
        period: &PayPeriod,
        amount_cents: i64,
        job_instance_ids: Vec<Uuid>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::now_v7(),
            worker_id,
            week_start_date: period.start_date,
            week_end_date: period.end_date,
            amount_cents,
            status: PayoutStatus::Pending,
            stripe_transfer_id: None,
            stripe_payout_id: None,
            job_instance_ids,
            last_failure_reason: None,
            retry_count: 0,
            last_attempt_at: None,
            next_attempt_at: None,
            created_at: now,
            updated_at: now,
            row_version: 1,
        }
    }

    /// PENDING, or FAILED with an elapsed retry timer.
    pub fn is_claimable(&self, now: DateTime<Utc>) -> bool {
        match self.status {
            PayoutStatus::Pending => true,
            PayoutStatus::Failed => self.next_attempt_at.is_some_and(|at| at <= now),
            PayoutStatus::Processing | PayoutStatus::Paid => false,
        }
    }

    pub fn transfer_idempotency_key(&self) -> String {
        format!("{}-transfer-{}", self.id, self.retry_count)
    }

    pub fn payout_idempotency_key(&self) -> String {
        format!("{}-payout-{}", self.id, self.retry_count)
    }

    /// Record an external transfer id without ever clearing an existing one.
    pub fn backfill_transfer_id(&mut self, transfer_id: Option<&str>) {
        if self.stripe_transfer_id.is_none() {
            self.stripe_transfer_id = transfer_id.map(str::to_owned);
        }
    }

    pub fn backfill_payout_id(&mut self, payout_id: Option<&str>) {
        if self.stripe_payout_id.is_none() {
            self.stripe_payout_id = payout_id.map(str::to_owned);
        }
    }
}

/// Worker profile fields the payout flow needs.
#[derive(Debug, Clone, PartialEq)]
pub struct Worker {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub stripe_connect_account_id: Option<String>,
    pub is_active: bool,
    pub onboarding_complete: bool,
}

/// A completed, payable work item.
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedWorkItem {
    pub id: Uuid,
    pub worker_id: Uuid,
    pub pay_cents: i64,
    pub completed_at: DateTime<Utc>,
}

// ── Payment processor shapes ─────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ConnectedAccount {
    pub id: String,
    #[serde(default)]
    pub payouts_enabled: bool,
}

/// Platform balance → connected account.
#[derive(Debug, Clone, PartialEq)]
pub struct TransferRequest {
    pub amount_cents: i64,
    pub destination: String,
    pub metadata: BTreeMap<String, String>,
}

/// Connected account balance → worker's bank.
#[derive(Debug, Clone, PartialEq)]
pub struct PayoutRequest {
    pub amount_cents: i64,
    pub connected_account: String,
    pub metadata: BTreeMap<String, String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedTransfer {
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedPayout {
    pub id: String,
}

// ── Notifications ────────────────────────────────────────────────────────────

/// Message handed to the notification outbox.
#[derive(Debug, Clone, PartialEq)]
pub enum PayoutNotification {
    /// The worker has to fix their payment account.
    ActionRequired {
        worker_id: Uuid,
        email: String,
        first_name: String,
        payout_id: Option<Uuid>,
        amount_cents: Option<i64>,
        reason: String,
        /// Distinguishes repeated sends for the same worker.
        reference: String,
    },
    /// Finance has to look into a payout.
    PlatformIssue {
        payout_id: Uuid,
        worker_id: Uuid,
        amount_cents: i64,
        reason: String,
        reference: String,
    },
}

impl PayoutNotification {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ActionRequired { .. } => "payout_failure_action_required",
            Self::PlatformIssue { .. } => "payout_failure_platform_issue",
        }
    }

    pub fn worker_id(&self) -> Uuid {
        match self {
            Self::ActionRequired { worker_id, .. } | Self::PlatformIssue { worker_id, .. } => {
                *worker_id
            }
        }
    }

    pub fn payout_id(&self) -> Option<Uuid> {
        match self {
            Self::ActionRequired { payout_id, .. } => *payout_id,
            Self::PlatformIssue { payout_id, .. } => Some(*payout_id),
        }
    }

    pub fn reason(&self) -> &str {
        match self {
            Self::ActionRequired { reason, .. } | Self::PlatformIssue { reason, .. } => reason,
        }
    }

    pub fn idempotency_key(&self) -> String {
        let reference = match self {
            Self::ActionRequired { reference, .. } | Self::PlatformIssue { reference, .. } => {
                reference
            }
        };
        format!("{}:{}", self.kind(), reference)
    }
}

/// Outbox row written for asynchronous delivery.
#[derive(Debug, Clone)]
pub struct OutboxEvent {
    pub id: Uuid,
    pub kind: String,
    pub worker_id: Uuid,
    pub payout_id: Option<Uuid>,
    pub payload: serde_json::Value,
    pub idempotency_key: String,
}
