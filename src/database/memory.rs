// In-process store with the same guarantees as the Postgres one

use super::{Store, UserUpdate};
use crate::error::AppError;
use crate::models::{Payment, PaymentStatus, PaymentUpdate, Proposal, ProposalStatus, User, Vote};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryStore {
    users: RwLock<HashMap<String, User>>,
    payments: RwLock<HashMap<Uuid, Payment>>,
    proposals: RwLock<HashMap<Uuid, Proposal>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl Store for MemoryStore {
    async fn ping(&self) -> bool {
        true
    }

    async fn get_user(&self, wallet: &str) -> Result<Option<User>, AppError> {
        Ok(self.users.read().await.get(wallet).cloned())
    }

    async fn create_user(&self, user: &User) -> Result<User, AppError> {
        let mut users = self.users.write().await;
        Ok(users
            .entry(user.wallet_address.clone())
            .or_insert_with(|| user.clone())
            .clone())
    }

    async fn save_user(&self, user: &User) -> Result<(), AppError> {
        let mut users = self.users.write().await;
        match users.get_mut(&user.wallet_address) {
            Some(existing) => {
                *existing = user.clone();
                Ok(())
            }
            None => Err(AppError::not_found(format!("user {}", user.wallet_address))),
        }
    }

    async fn update_user(&self, wallet: &str, apply: UserUpdate) -> Result<User, AppError> {
        let mut users = self.users.write().await;
        let stored = users
            .get_mut(wallet)
            .ok_or_else(|| AppError::not_found(format!("user {}", wallet)))?;
        let mut user = stored.clone();
        apply(&mut user)?;
        *stored = user.clone();
        Ok(user)
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError> {
        let mut payments = self.payments.write().await;
        if let Some(key) = &payment.idempotency_key {
            let duplicate = payments.values().any(|p| {
                p.user_id == payment.user_id && p.idempotency_key.as_deref() == Some(key.as_str())
            });
            if duplicate {
                return Err(AppError::Conflict(format!(
                    "payment with idempotency key {} already exists",
                    key
                )));
            }
        }
        payments.insert(payment.id, payment.clone());
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError> {
        Ok(self.payments.read().await.get(&id).cloned())
    }

    async fn find_payment_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Payment>, AppError> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| p.user_id == user_id && p.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>, AppError> {
        Ok(self
            .payments
            .read()
            .await
            .values()
            .find(|p| p.provider_reference.as_deref() == Some(reference))
            .cloned())
    }

    async fn list_payments(&self, user_id: &str) -> Result<Vec<Payment>, AppError> {
        let mut list: Vec<Payment> = self
            .payments
            .read()
            .await
            .values()
            .filter(|p| p.user_id == user_id)
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        from: PaymentStatus,
        update: &PaymentUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, AppError> {
        let mut payments = self.payments.write().await;
        let payment = payments
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("payment {}", id)))?;
        if payment.status != from || payment.settlement_claimed_at.is_some() {
            return Ok(None);
        }
        payment.apply(update, now);
        Ok(Some(payment.clone()))
    }

    async fn claim_settlement(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Payment>, AppError> {
        let mut payments = self.payments.write().await;
        match payments.get_mut(&id) {
            Some(p) if p.status == PaymentStatus::Processing && p.settlement_claimed_at.is_none() => {
                p.settlement_claimed_at = Some(now);
                Ok(Some(p.clone()))
            }
            Some(_) => Ok(None),
            None => Err(AppError::not_found(format!("payment {}", id))),
        }
    }

    async fn release_settlement(&self, id: Uuid) -> Result<(), AppError> {
        let mut payments = self.payments.write().await;
        if let Some(p) = payments.get_mut(&id) {
            if p.status == PaymentStatus::Processing {
                p.settlement_claimed_at = None;
            }
        }
        Ok(())
    }

    async fn complete_settlement(
        &self,
        id: Uuid,
        update: &PaymentUpdate,
        now: DateTime<Utc>,
    ) -> Result<Payment, AppError> {
        let mut payments = self.payments.write().await;
        let p = payments
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("payment {}", id)))?;
        if p.status != PaymentStatus::Processing || p.settlement_claimed_at.is_none() {
            return Err(AppError::Conflict(format!("payment {} is not claimed for settlement", id)));
        }
        p.apply(update, now);
        p.settlement_claimed_at = None;
        Ok(p.clone())
    }

    async fn insert_proposal(&self, proposal: &Proposal) -> Result<(), AppError> {
        self.proposals
            .write()
            .await
            .insert(proposal.id, proposal.clone());
        Ok(())
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, AppError> {
        Ok(self.proposals.read().await.get(&id).cloned())
    }

    async fn list_proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>, AppError> {
        let mut list: Vec<Proposal> = self
            .proposals
            .read()
            .await
            .values()
            .filter(|p| status.map_or(true, |s| p.status == s))
            .cloned()
            .collect();
        list.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(list)
    }

    async fn record_vote(&self, proposal_id: Uuid, vote: &Vote) -> Result<Proposal, AppError> {
        let mut proposals = self.proposals.write().await;
        let proposal = proposals
            .get_mut(&proposal_id)
            .ok_or_else(|| AppError::not_found(format!("proposal {}", proposal_id)))?;

        // Work on a copy so a failed vote leaves the stored proposal untouched
        let mut updated = proposal.clone();
        updated.apply_vote(vote.clone())?;
        *proposal = updated.clone();
        Ok(updated)
    }

    async fn close_proposal(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Proposal>, AppError> {
        let mut proposals = self.proposals.write().await;
        match proposals.get_mut(&id) {
            Some(p)
                if p.status == ProposalStatus::Active
                    && p.execution.claimed_at.is_none()
                    && p.voting_end <= now =>
            {
                p.status = p.outcome();
                p.updated_at = now;
                Ok(Some(p.clone()))
            }
            Some(_) => Ok(None),
            None => Err(AppError::not_found(format!("proposal {}", id))),
        }
    }

    async fn transition_proposal(
        &self,
        id: Uuid,
        from: ProposalStatus,
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let mut proposals = self.proposals.write().await;
        match proposals.get_mut(&id) {
            Some(p) if p.status == from && p.execution.claimed_at.is_none() => {
                p.status = to;
                p.updated_at = now;
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(AppError::not_found(format!("proposal {}", id))),
        }
    }

    async fn claim_execution(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let mut proposals = self.proposals.write().await;
        match proposals.get_mut(&id) {
            Some(p) if p.status == ProposalStatus::Passed && p.execution.claimed_at.is_none() => {
                p.execution.claimed_at = Some(now);
                Ok(true)
            }
            Some(_) => Ok(false),
            None => Err(AppError::not_found(format!("proposal {}", id))),
        }
    }

    async fn release_execution(&self, id: Uuid) -> Result<(), AppError> {
        let mut proposals = self.proposals.write().await;
        if let Some(p) = proposals.get_mut(&id) {
            if p.status == ProposalStatus::Passed {
                p.execution.claimed_at = None;
            }
        }
        Ok(())
    }

    async fn complete_execution(
        &self,
        id: Uuid,
        tx_hash: &str,
        executor: &str,
        now: DateTime<Utc>,
    ) -> Result<Proposal, AppError> {
        let mut proposals = self.proposals.write().await;
        let p = proposals
            .get_mut(&id)
            .ok_or_else(|| AppError::not_found(format!("proposal {}", id)))?;
        if p.status != ProposalStatus::Passed || p.execution.claimed_at.is_none() {
            return Err(AppError::Conflict(format!(
                "proposal {} is not claimed for execution",
                id
            )));
        }
        p.status = ProposalStatus::Executed;
        p.execution.executed = true;
        p.execution.tx_hash = Some(tx_hash.to_string());
        p.execution.executed_by = Some(executor.to_string());
        p.execution.executed_at = Some(now);
        p.updated_at = now;
        Ok(p.clone())
    }
}
