use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use crate::domain::event::PaymentIntentObject;
use crate::domain::types::META_GENERATED_BY;

/// Checks waiting to be collected; older entries are evicted first.
const MAX_PENDING_CHECKS: usize = 256;

/// Records delivery-check payment intents so an operator can confirm that
/// webhooks reach this instance.
pub struct WebhookCheckRegistry {
    tag: String,
    seen: Mutex<VecDeque<String>>,
}

impl WebhookCheckRegistry {
    pub fn new(generated_by: &str) -> Self {
        Self {
            tag: format!("webhook_check-{generated_by}"),
            seen: Mutex::new(VecDeque::new()),
        }
    }

    /// Metadata value that marks a payment intent as a delivery check for this instance.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Remember `intent` if it carries this instance's check tag.
    pub fn observe(&self, intent: &PaymentIntentObject) -> bool {
        if intent.metadata.get(META_GENERATED_BY) != Some(&self.tag) {
            return false;
        }
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        if !seen.contains(&intent.id) {
            if seen.len() >= MAX_PENDING_CHECKS {
                seen.pop_front();
            }
            seen.push_back(intent.id.clone());
        }
        true
    }

    /// Whether a check with `id` arrived; a hit is removed.
    pub fn consume(&self, id: &str) -> bool {
        let mut seen = self.seen.lock().unwrap_or_else(PoisonError::into_inner);
        match seen.iter().position(|seen_id| seen_id == id) {
            Some(index) => {
                seen.remove(index);
                true
            }
            None => false,
        }
    }
}
