// Persistence layer for the RWA backend
//
// Services talk to a `Store`; Postgres backs production and an in-memory
// store backs tests and local runs (`DATABASE_URL=memory`).

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgStore;

use crate::error::AppError;
use crate::models::{Payment, PaymentStatus, PaymentUpdate, Proposal, ProposalStatus, User, Vote};
use anyhow::Result;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

pub type DynStore = Arc<dyn Store>;

/// Change applied to a user inside `Store::update_user`.
pub type UserUpdate = Box<dyn FnOnce(&mut User) -> Result<(), AppError> + Send>;

#[async_trait::async_trait]
pub trait Store: Send + Sync {
    async fn ping(&self) -> bool;

    async fn get_user(&self, wallet: &str) -> Result<Option<User>, AppError>;

    /// Inserts `user` unless the wallet already exists; returns the stored user.
    async fn create_user(&self, user: &User) -> Result<User, AppError>;

    async fn save_user(&self, user: &User) -> Result<(), AppError>;

    /// Read-modify-write of one user, serialized against other updates of
    /// the same wallet. Nothing is written when `apply` fails.
    async fn update_user(&self, wallet: &str, apply: UserUpdate) -> Result<User, AppError>;

    /// Fails with `Conflict` when the user already has a payment under the
    /// same idempotency key.
    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError>;

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError>;

    async fn find_payment_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Payment>, AppError>;

    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>, AppError>;

    async fn list_payments(&self, user_id: &str) -> Result<Vec<Payment>, AppError>;

    /// Applies `update` only while the payment is in `from` and no
    /// settlement claim is held. Returns `None` otherwise.
    async fn transition_payment(
        &self,
        id: Uuid,
        from: PaymentStatus,
        update: &PaymentUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, AppError>;

    /// Takes the settlement claim on a PROCESSING payment. Only one caller wins.
    async fn claim_settlement(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Payment>, AppError>;

    async fn release_settlement(&self, id: Uuid) -> Result<(), AppError>;

    /// PROCESSING (claimed) -> `update.status`, dropping the claim.
    async fn complete_settlement(
        &self,
        id: Uuid,
        update: &PaymentUpdate,
        now: DateTime<Utc>,
    ) -> Result<Payment, AppError>;

    async fn insert_proposal(&self, proposal: &Proposal) -> Result<(), AppError>;

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, AppError>;

    async fn list_proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>, AppError>;

    /// Appends the vote and updates the tallies as one atomic step.
    /// A second vote by the same voter fails with `Conflict`.
    async fn record_vote(&self, proposal_id: Uuid, vote: &Vote) -> Result<Proposal, AppError>;

    /// ACTIVE -> PASSED/REJECTED once `voting_end` has passed, decided from
    /// the tallies under the same lock `record_vote` takes. `None` when the
    /// proposal is not ready to close or was already closed.
    async fn close_proposal(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Proposal>, AppError>;

    /// Compare-and-swap on status. Refused while an execution claim is held.
    async fn transition_proposal(
        &self,
        id: Uuid,
        from: ProposalStatus,
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError>;

    /// Takes the execution claim on a PASSED proposal. Only one caller wins.
    async fn claim_execution(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError>;

    async fn release_execution(&self, id: Uuid) -> Result<(), AppError>;

    /// PASSED (claimed) -> EXECUTED with the ledger transaction recorded.
    async fn complete_execution(
        &self,
        id: Uuid,
        tx_hash: &str,
        executor: &str,
        now: DateTime<Utc>,
    ) -> Result<Proposal, AppError>;
}

pub struct Database;

impl Database {
    /// Open the store named by `database_url`
    pub async fn init(database_url: &str) -> Result<DynStore> {
        if database_url == "memory" {
            info!("Using in-memory store");
            return Ok(Arc::new(MemoryStore::new()));
        }

        let store = PgStore::connect(database_url).await?;
        info!("Database initialized successfully");
        Ok(Arc::new(store))
    }
}
