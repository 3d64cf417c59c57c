/// Engine error types
///
/// One enum for everything the orchestration components can fail with.
/// Handlers decide retryability from the variant: database and gateway
/// transport errors ride the job queue's retry, while not-found and
/// state-conflict variants are terminal for the job that hit them.
use uuid::Uuid;

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Database operation failed
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Gateway rejected or could not take a charge
    #[error("Gateway error: {0}")]
    Gateway(#[from] crate::gateway::GatewayError),

    /// Group does not exist
    #[error("Group not found: {0}")]
    GroupNotFound(Uuid),

    /// Payment does not exist
    #[error("Payment not found: {0}")]
    PaymentNotFound(Uuid),

    /// Membership does not exist
    #[error("Member not found: {0}")]
    MemberNotFound(Uuid),

    /// No member holds the payout slot the rotation points at
    #[error("Group {group_id} has no payee at cycle position {cycle_number}")]
    MissingPayee { group_id: Uuid, cycle_number: i32 },

    /// The operation does not apply in the group's current state
    #[error("Invalid group state: {0}")]
    InvalidGroupState(String),

    /// The operation does not apply in the payment's current state
    #[error("Invalid payment state: {0}")]
    InvalidPaymentState(String),

    /// A job row referenced something the handler could not decode
    #[error("Malformed job {job_id}: {detail}")]
    MalformedJob { job_id: Uuid, detail: String },
}

impl EngineError {
    /// Whether a job failing with this error should be re-attempted
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Database(_) => true,
            EngineError::Gateway(err) => !err.is_payment_failure(),
            EngineError::GroupNotFound(_)
            | EngineError::PaymentNotFound(_)
            | EngineError::MemberNotFound(_)
            | EngineError::MissingPayee { .. }
            | EngineError::InvalidGroupState(_)
            | EngineError::InvalidPaymentState(_)
            | EngineError::MalformedJob { .. } => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::GatewayError;

    #[test]
    fn test_retryability() {
        assert!(EngineError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(
            EngineError::Gateway(GatewayError::Unavailable("down".into())).is_retryable()
        );
        assert!(
            !EngineError::Gateway(GatewayError::Declined("nsf".into())).is_retryable()
        );
        assert!(!EngineError::GroupNotFound(Uuid::new_v4()).is_retryable());
    }
}
