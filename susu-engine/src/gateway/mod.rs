/// Payment gateway abstraction
///
/// This module defines the contract the engine uses to move money. The
/// concrete provider lives behind the `PaymentGateway` trait and is
/// injected into each component; no module-level gateway clients.
///
/// # Charge Flow
///
/// ```text
/// Orchestrator ──create_charge──> Gateway
///                                   │ (synchronous accept/decline)
///                <──ChargeReceipt───┘
///                                   │ (asynchronous settlement)
///                <──GatewayEvent────┘  charge.succeeded / charge.failed /
///                                      transfer.created / transfer.reversed
/// ```
///
/// Asynchronous callbacks arrive as a [`GatewayEvent`] tagged union and
/// are matched back to payment and payout rows by the stored charge or
/// transfer reference, never by probing untyped metadata.
///
/// # Idempotency
///
/// Every charge carries a deterministic idempotency key
/// (`{group}:{cycle}:{user}:attempt-{n}`). Retrying a charge that
/// already completed is a provider-side no-op, which is what makes the
/// engine's at-least-once delivery safe.

pub mod mock;

pub use mock::MockGateway;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Gateway error types
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// The charge was declined (insufficient funds, card declined, ...)
    #[error("Charge declined: {0}")]
    Declined(String),

    /// The payer has no usable funding source
    #[error("Missing funding source for payer {0}")]
    MissingFundingSource(String),

    /// Provider-side or transport failure; retryable at the job level
    #[error("Gateway unavailable: {0}")]
    Unavailable(String),

    /// The request was malformed
    #[error("Invalid charge request: {0}")]
    InvalidRequest(String),
}

impl GatewayError {
    /// Whether the failure counts against the payment's retry budget
    ///
    /// Transport-level failures ride the job queue's own retry instead
    /// of burning one of the member's collection attempts.
    pub fn is_payment_failure(&self) -> bool {
        matches!(
            self,
            GatewayError::Declined(_) | GatewayError::MissingFundingSource(_)
        )
    }
}

/// A charge from one member's funding source to the payee's destination
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Payer's funding source reference
    pub payer_ref: String,

    /// Payee's payout destination reference
    pub payee_destination: String,

    /// Contribution amount
    pub amount: Decimal,

    /// Processing fee charged on top
    pub fee_amount: Decimal,

    /// Deterministic idempotency key for this attempt
    pub idempotency_key: String,

    /// Round-trip metadata echoed back on transfer events
    pub metadata: ChargeMetadata,
}

/// Metadata attached to a charge and echoed back by the gateway
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ChargeMetadata {
    pub group_id: Uuid,
    pub user_id: Uuid,
    pub cycle_number: i32,
}

/// Synchronous result of a successfully accepted charge
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeReceipt {
    /// Provider reference for the created charge
    pub charge_ref: String,
}

/// Asynchronous gateway callback events
///
/// One tagged union consumed by a single dispatch point
/// (`CycleOrchestrator::handle_gateway_event`).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum GatewayEvent {
    /// A charge settled successfully
    ChargeSucceeded { charge_ref: String },

    /// A charge failed after being accepted
    ChargeFailed { charge_ref: String, reason: String },

    /// The pooled transfer to the payee was created
    TransferCreated {
        transfer_ref: String,
        group_id: Uuid,
        cycle_number: i32,
    },

    /// A previously created transfer was reversed
    TransferReversed { transfer_ref: String },
}

/// Payment gateway capability consumed by the engine
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Provider name, for logging
    fn name(&self) -> &str;

    /// Creates a charge against a payer's funding source, routed to the
    /// payee's payout destination
    ///
    /// Synchronous acceptance only; final settlement arrives later as a
    /// [`GatewayEvent`].
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Declined`] or
    /// [`GatewayError::MissingFundingSource`] for payer-attributable
    /// failures, [`GatewayError::Unavailable`] for transport failures.
    async fn create_charge(&self, request: ChargeRequest) -> Result<ChargeReceipt, GatewayError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_gateway_event_serde_tagging() {
        let event = GatewayEvent::ChargeSucceeded {
            charge_ref: "ch_123".to_string(),
        };

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"charge_succeeded\""));
        assert!(json.contains("\"charge_ref\":\"ch_123\""));

        let parsed: GatewayEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_gateway_event_transfer_round_trip() {
        let group_id = Uuid::new_v4();
        let event = GatewayEvent::TransferCreated {
            transfer_ref: "tr_9".to_string(),
            group_id,
            cycle_number: 2,
        };

        let json = serde_json::to_string(&event).unwrap();
        let parsed: GatewayEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn test_payment_failure_classification() {
        assert!(GatewayError::Declined("card_declined".into()).is_payment_failure());
        assert!(GatewayError::MissingFundingSource("acct_1".into()).is_payment_failure());
        assert!(!GatewayError::Unavailable("timeout".into()).is_payment_failure());
        assert!(!GatewayError::InvalidRequest("bad amount".into()).is_payment_failure());
    }

    #[test]
    fn test_charge_request_serialization() {
        let request = ChargeRequest {
            payer_ref: "src_1".to_string(),
            payee_destination: "dst_1".to_string(),
            amount: dec!(100.00),
            fee_amount: dec!(1.30),
            idempotency_key: "g:1:u:attempt-0".to_string(),
            metadata: ChargeMetadata {
                group_id: Uuid::new_v4(),
                user_id: Uuid::new_v4(),
                cycle_number: 1,
            },
        };

        let json = serde_json::to_value(&request).unwrap();
        assert_eq!(json["idempotency_key"], "g:1:u:attempt-0");
    }
}
