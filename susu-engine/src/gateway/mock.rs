/// Mock payment gateway for tests and local development
///
/// Accepts every charge by default and hands out sequential references.
/// Tests script failures per payer to exercise the retry and pause
/// paths without a real provider.
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::debug;

use super::{ChargeReceipt, ChargeRequest, GatewayError, PaymentGateway};

/// Scripted outcome for a payer's next charges
#[derive(Debug, Clone)]
enum ScriptedOutcome {
    Decline(String),
    Unavailable(String),
}

/// Mock gateway with scriptable per-payer outcomes
pub struct MockGateway {
    /// Pending scripted failures, keyed by payer reference
    scripts: Mutex<HashMap<String, Vec<ScriptedOutcome>>>,

    /// Every charge request seen, in order
    charges: Mutex<Vec<ChargeRequest>>,

    /// Sequence for generated charge references
    counter: AtomicU64,
}

impl MockGateway {
    pub fn new() -> Self {
        Self {
            scripts: Mutex::new(HashMap::new()),
            charges: Mutex::new(Vec::new()),
            counter: AtomicU64::new(0),
        }
    }

    /// Scripts the next charge from `payer_ref` to be declined
    pub fn decline_next(&self, payer_ref: &str, reason: &str) {
        self.scripts
            .lock()
            .unwrap()
            .entry(payer_ref.to_string())
            .or_default()
            .push(ScriptedOutcome::Decline(reason.to_string()));
    }

    /// Scripts the next charge from `payer_ref` to fail at the transport level
    pub fn unavailable_next(&self, payer_ref: &str, reason: &str) {
        self.scripts
            .lock()
            .unwrap()
            .entry(payer_ref.to_string())
            .or_default()
            .push(ScriptedOutcome::Unavailable(reason.to_string()));
    }

    /// All charge requests received so far
    pub fn charges(&self) -> Vec<ChargeRequest> {
        self.charges.lock().unwrap().clone()
    }

    pub fn charge_count(&self) -> usize {
        self.charges.lock().unwrap().len()
    }
}

impl Default for MockGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    fn name(&self) -> &str {
        "mock"
    }

    async fn create_charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, GatewayError> {
        debug!(
            payer = %request.payer_ref,
            idempotency_key = %request.idempotency_key,
            "Mock gateway received charge"
        );

        self.charges.lock().unwrap().push(request.clone());

        let scripted = {
            let mut scripts = self.scripts.lock().unwrap();
            match scripts.get_mut(&request.payer_ref) {
                Some(queue) if !queue.is_empty() => Some(queue.remove(0)),
                _ => None,
            }
        };

        match scripted {
            Some(ScriptedOutcome::Decline(reason)) => Err(GatewayError::Declined(reason)),
            Some(ScriptedOutcome::Unavailable(reason)) => Err(GatewayError::Unavailable(reason)),
            None => {
                let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
                Ok(ChargeReceipt {
                    charge_ref: format!("mock_ch_{n}"),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::ChargeMetadata;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn request(payer: &str) -> ChargeRequest {
        ChargeRequest {
            payer_ref: payer.to_string(),
            payee_destination: "dst_1".to_string(),
            amount: dec!(100.00),
            fee_amount: dec!(1.30),
            idempotency_key: format!("{payer}-key"),
            metadata: ChargeMetadata {
                group_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                cycle_number: 1,
            },
        }
    }

    #[tokio::test]
    async fn test_charges_succeed_by_default() {
        let gateway = MockGateway::new();

        let receipt = gateway.create_charge(request("src_a")).await.unwrap();
        assert_eq!(receipt.charge_ref, "mock_ch_1");

        let receipt = gateway.create_charge(request("src_b")).await.unwrap();
        assert_eq!(receipt.charge_ref, "mock_ch_2");

        assert_eq!(gateway.charge_count(), 2);
    }

    #[tokio::test]
    async fn test_scripted_decline_consumes_once() {
        let gateway = MockGateway::new();
        gateway.decline_next("src_a", "insufficient_funds");

        let err = gateway.create_charge(request("src_a")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Declined(_)));
        assert!(err.is_payment_failure());

        // Script consumed; the next charge goes through
        let receipt = gateway.create_charge(request("src_a")).await.unwrap();
        assert_eq!(receipt.charge_ref, "mock_ch_1");
    }

    #[tokio::test]
    async fn test_scripted_unavailable_is_not_payment_failure() {
        let gateway = MockGateway::new();
        gateway.unavailable_next("src_a", "connection reset");

        let err = gateway.create_charge(request("src_a")).await.unwrap_err();
        assert!(matches!(err, GatewayError::Unavailable(_)));
        assert!(!err.is_payment_failure());
    }

    #[tokio::test]
    async fn test_scripts_are_per_payer() {
        let gateway = MockGateway::new();
        gateway.decline_next("src_a", "card_declined");

        // Another payer is unaffected
        assert!(gateway.create_charge(request("src_b")).await.is_ok());
        assert!(gateway.create_charge(request("src_a")).await.is_err());
    }
}
