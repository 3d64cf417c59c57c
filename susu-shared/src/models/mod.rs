//! Database models for the susu engine
//!
//! Each model follows the same pattern: a plain struct deriving
//! `sqlx::FromRow` plus associated query methods. State enums map to
//! PostgreSQL enum types and carry their transition rules as code.
//!
//! ## Models
//!
//! - `group`: Savings group and its cycle schedule
//! - `membership`: Group membership with payout order
//! - `payment`: One collection attempt chain per member per cycle
//! - `payout`: Funds due to the cycle's payee
//! - `cycle`: Append-only history of finalized cycles
//! - `job`: Durable delayed work items

pub mod cycle;
pub mod group;
pub mod job;
pub mod membership;
pub mod payment;
pub mod payout;

pub use cycle::{CycleRecord, NewCycleRecord};
pub use group::{next_rotation, CycleFrequency, FutureCycles, Group, GroupStatus, PauseReason};
pub use job::{JobKind, JobState, ScheduledJob};
pub use membership::{GroupMember, MemberStatus};
pub use payment::{CreatePayment, CycleSummary, Payment, PaymentStatus};
pub use payout::{Payout, PayoutStatus};
