//! Contribution-cycle orchestration for rotating savings groups
//!
//! The engine wakes groups on their cycle dates, collects each member's
//! contribution through a pluggable payment gateway, retries failures on
//! a budget, finalizes cycles once every contributor has paid, and
//! advances the payout rotation. All delayed work rides a durable
//! Postgres-backed job queue; crash recovery is a sweep that re-arms
//! whatever the queue lost.
//!
//! ## Components
//!
//! - [`scheduler`]: deterministic job keys and cycle wake-up scheduling
//! - [`orchestrator`]: collection, settlement dispatch, finalization
//! - [`retry`]: budgeted re-attempts of failed collections
//! - [`control`]: admin operations (schedule, pause, resume, retry-all)
//! - [`recovery`]: startup and interval sweeps
//! - [`worker`]: the claim/dispatch loop
//! - [`queue`]: the durable job queue itself
//! - [`gateway`]: the payment provider seam, with a scriptable mock

pub mod control;
pub mod error;
pub mod fees;
pub mod gateway;
pub mod notify;
pub mod orchestrator;
pub mod queue;
pub mod recovery;
pub mod retry;
pub mod scheduler;
pub mod worker;

pub use error::EngineError;

use std::sync::Arc;

use sqlx::PgPool;

use susu_shared::config::Config;

use crate::control::GroupControl;
use crate::gateway::PaymentGateway;
use crate::notify::Notifier;
use crate::orchestrator::CycleOrchestrator;
use crate::queue::JobQueue;
use crate::recovery::RecoverySweeper;
use crate::retry::RetryCoordinator;
use crate::scheduler::Scheduler;
use crate::worker::Worker;

/// Fully wired engine components sharing one pool and config
pub struct Engine {
    pub queue: JobQueue,
    pub scheduler: Scheduler,
    pub control: GroupControl,
    pub orchestrator: CycleOrchestrator,
    pub retry: RetryCoordinator,
    pub sweeper: RecoverySweeper,
}

impl Engine {
    /// Wires every component against the given pool, gateway, and notifier
    pub fn new(
        pool: PgPool,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn Notifier>,
        config: Arc<Config>,
    ) -> Self {
        let queue = JobQueue::new(pool.clone());
        let scheduler = Scheduler::new(queue.clone());
        let control = GroupControl::new(
            pool.clone(),
            queue.clone(),
            scheduler.clone(),
            notifier.clone(),
            config.clone(),
        );
        let orchestrator = CycleOrchestrator::new(
            pool.clone(),
            gateway.clone(),
            notifier.clone(),
            queue.clone(),
            scheduler.clone(),
            control.clone(),
            config.clone(),
        );
        let retry = RetryCoordinator::new(
            pool.clone(),
            gateway,
            notifier,
            queue.clone(),
            control.clone(),
            config.clone(),
        );
        let sweeper = RecoverySweeper::new(
            pool,
            queue.clone(),
            scheduler.clone(),
            control.clone(),
            config,
        );

        Self {
            queue,
            scheduler,
            control,
            orchestrator,
            retry,
            sweeper,
        }
    }

    /// Builds the worker loop over this engine's components
    pub fn into_worker(self, config: Arc<Config>) -> Worker {
        Worker::new(
            self.queue,
            self.orchestrator,
            self.retry,
            self.control,
            self.sweeper,
            config,
        )
    }
}
