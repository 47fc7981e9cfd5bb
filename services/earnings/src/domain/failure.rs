//! Maps processor and internal failure codes onto retry policy.

/// Failure reason codes stored in `last_failure_reason`.
pub mod reason {
    // Worker must act.
    pub const ACCOUNT_CLOSED: &str = "account_closed";
    pub const BANK_ACCOUNT_RESTRICTED: &str = "bank_account_restricted";
    pub const INVALID_ACCOUNT_NUMBER: &str = "invalid_account_number";
    pub const PAYOUTS_NOT_ALLOWED: &str = "payouts_not_allowed";
    pub const WORKER_MISSING_STRIPE_CONNECT_ID: &str = "worker_missing_stripe_connect_id";
    pub const STRIPE_ACCOUNT_PAYOUTS_DISABLED: &str = "stripe_account_payouts_disabled";
    pub const ACCOUNT_RESTRICTED: &str = "account_restricted";
    pub const NO_ACCOUNT: &str = "no_account";
    pub const DEBIT_NOT_AUTHORIZED: &str = "debit_not_authorized";
    pub const INVALID_CURRENCY: &str = "invalid_currency";
    pub const ACCOUNT_FROZEN: &str = "account_frozen";
    pub const BANK_OWNERSHIP_CHANGED: &str = "bank_ownership_changed";
    pub const DECLINED: &str = "declined";
    pub const INCORRECT_ACCOUNT_HOLDER_NAME: &str = "incorrect_account_holder_name";
    pub const INCORRECT_ACCOUNT_HOLDER_TAX_ID: &str = "incorrect_account_holder_tax_id";

    // Platform side, retried.
    pub const BALANCE_INSUFFICIENT: &str = "balance_insufficient";
    pub const COULD_NOT_PROCESS: &str = "could_not_process";
    pub const UNKNOWN_STRIPE_ERROR_FETCHING_ACCOUNT: &str =
        "unknown_stripe_error_fetching_account";
    pub const UNKNOWN_STRIPE_TRANSFER_ERROR: &str = "unknown_stripe_transfer_error";
    pub const PAYOUT_INITIATION_FAILED: &str = "payout_initiation_failed";

    // No retry.
    pub const INSUFFICIENT_FUNDS: &str = "insufficient_funds";
    pub const WORKER_RECORD_NOT_FOUND: &str = "worker_record_not_found";
    /// Funds reached the connected account but the bank payout was never created.
    pub const PAYOUT_INITIATION_FAILED_AFTER_TRANSFER: &str =
        "payout_initiation_failed_after_transfer";
    /// Used when a failure event carries no code at all.
    pub const UNKNOWN_PAYOUT_FAILURE: &str = "unknown_payout_failure";
}

pub const USER_ACTIONABLE_REASONS: &[&str] = &[
    reason::ACCOUNT_CLOSED,
    reason::BANK_ACCOUNT_RESTRICTED,
    reason::INVALID_ACCOUNT_NUMBER,
    reason::PAYOUTS_NOT_ALLOWED,
    reason::WORKER_MISSING_STRIPE_CONNECT_ID,
    reason::STRIPE_ACCOUNT_PAYOUTS_DISABLED,
    reason::ACCOUNT_RESTRICTED,
    reason::NO_ACCOUNT,
    reason::DEBIT_NOT_AUTHORIZED,
    reason::INVALID_CURRENCY,
    reason::ACCOUNT_FROZEN,
    reason::BANK_OWNERSHIP_CHANGED,
    reason::DECLINED,
    reason::INCORRECT_ACCOUNT_HOLDER_NAME,
    reason::INCORRECT_ACCOUNT_HOLDER_TAX_ID,
];

const SYSTEM_RECOVERABLE_REASONS: &[&str] = &[
    reason::BALANCE_INSUFFICIENT,
    reason::COULD_NOT_PROCESS,
    reason::UNKNOWN_STRIPE_ERROR_FETCHING_ACCOUNT,
    reason::UNKNOWN_STRIPE_TRANSFER_ERROR,
    reason::PAYOUT_INITIATION_FAILED,
];

const FINAL_REASONS: &[&str] = &[
    reason::INSUFFICIENT_FUNDS,
    reason::WORKER_RECORD_NOT_FOUND,
    reason::PAYOUT_INITIATION_FAILED_AFTER_TRANSFER,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    UserActionable,
    SystemRecoverable,
    Final,
}

impl FailureClass {
    pub fn is_system_recoverable(self) -> bool {
        self == Self::SystemRecoverable
    }

    pub fn requires_user_action(self) -> bool {
        self == Self::UserActionable
    }
}

/// Unrecognized codes are treated as final: no retry, no notification.
pub fn classify(reason: &str) -> FailureClass {
    if USER_ACTIONABLE_REASONS.contains(&reason) {
        FailureClass::UserActionable
    } else if SYSTEM_RECOVERABLE_REASONS.contains(&reason) {
        FailureClass::SystemRecoverable
    } else {
        FailureClass::Final
    }
}

/// Whether `reason` is one of the codes this service knows how to handle.
pub fn is_recognized(reason: &str) -> bool {
    USER_ACTIONABLE_REASONS.contains(&reason)
        || SYSTEM_RECOVERABLE_REASONS.contains(&reason)
        || FINAL_REASONS.contains(&reason)
}

/// Balance shortages wait for the balance-available signal instead of a timer.
pub fn awaits_balance_signal(reason: &str) -> bool {
    reason == reason::BALANCE_INSUFFICIENT
}
