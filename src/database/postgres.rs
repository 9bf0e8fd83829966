// Postgres store
//
// Token amounts live in TEXT columns as decimal strings so u128 values round
// trip without loss. Vote uniqueness is enforced by the (proposal_id, voter)
// primary key; tally updates happen in the same transaction as the insert.

use super::{Store, UserUpdate};
use crate::error::AppError;
use crate::models::{
    AiUsage, Execution, Payment, PaymentStatus, PaymentUpdate, Proposal, ProposalStatus, User,
    Vote,
};
use chrono::{DateTime, Utc};
use sqlx::{
    postgres::{PgPoolOptions, PgRow},
    types::Json,
    PgPool, Postgres, Row,
};
use std::collections::HashMap;
use std::str::FromStr;
use tracing::info;
use uuid::Uuid;

const USER_COLUMNS: &str = "wallet_address, kyc_status, kyc_session_id, trust_balance, \
    staking_balance, staking_rewards, staking_lock_days, staking_started_at, staking_checkpoint, \
    ai_usage, display_name, email, country, created_at, updated_at";

const PAYMENT_COLUMNS: &str = "id, user_id, amount, currency, method, payment_type, status, \
    fee_amount, net_amount, provider_reference, checkout_url, transaction_id, seller_wallet, \
    idempotency_key, failure_reason, description, created_at, updated_at, settlement_claimed_at";

const PROPOSAL_COLUMNS: &str = "id, proposer, proposal_type, title, description, parameters, \
    status, voting_start, voting_end, votes_for, votes_against, total_votes, quorum_required, \
    executed, execution_tx, executed_by, executed_at, execution_claimed_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Connect and run embedded migrations
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        info!("Connecting to database");

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;

        info!("Running database migrations...");
        sqlx::migrate!("./migrations").run(&pool).await?;

        Ok(Self { pool })
    }
}

fn amount(row: &PgRow, column: &str) -> Result<u128, AppError> {
    let raw: String = row.try_get(column)?;
    raw.parse::<u128>()
        .map_err(|_| AppError::Internal(format!("corrupt amount in {}: {}", column, raw)))
}

fn text_enum<T: FromStr<Err = AppError>>(row: &PgRow, column: &str) -> Result<T, AppError> {
    let raw: String = row.try_get(column)?;
    raw.parse()
}

fn unique_violation(e: sqlx::Error, message: impl FnOnce() -> String) -> AppError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(message()),
        _ => AppError::Database(e),
    }
}

fn user_from_row(row: &PgRow) -> Result<User, AppError> {
    let lock_days: Option<i32> = row.try_get("staking_lock_days")?;
    let Json(ai_usage): Json<AiUsage> = row.try_get("ai_usage")?;

    Ok(User {
        wallet_address: row.try_get("wallet_address")?,
        kyc_status: text_enum(row, "kyc_status")?,
        kyc_session_id: row.try_get("kyc_session_id")?,
        trust_balance: amount(row, "trust_balance")?,
        staking_balance: amount(row, "staking_balance")?,
        staking_rewards: amount(row, "staking_rewards")?,
        staking_lock_days: lock_days.map(|d| d.max(0) as u32),
        staking_started_at: row.try_get("staking_started_at")?,
        staking_checkpoint: row.try_get("staking_checkpoint")?,
        ai_usage,
        display_name: row.try_get("display_name")?,
        email: row.try_get("email")?,
        country: row.try_get("country")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

fn payment_from_row(row: &PgRow) -> Result<Payment, AppError> {
    Ok(Payment {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        amount: row.try_get("amount")?,
        currency: row.try_get("currency")?,
        method: text_enum(row, "method")?,
        payment_type: text_enum(row, "payment_type")?,
        status: text_enum(row, "status")?,
        fee_amount: row.try_get("fee_amount")?,
        net_amount: row.try_get("net_amount")?,
        provider_reference: row.try_get("provider_reference")?,
        checkout_url: row.try_get("checkout_url")?,
        transaction_id: row.try_get("transaction_id")?,
        seller_wallet: row.try_get("seller_wallet")?,
        idempotency_key: row.try_get("idempotency_key")?,
        failure_reason: row.try_get("failure_reason")?,
        description: row.try_get("description")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
        settlement_claimed_at: row.try_get("settlement_claimed_at")?,
    })
}

fn proposal_from_row(row: &PgRow, votes: Vec<Vote>) -> Result<Proposal, AppError> {
    let Json(parameters): Json<serde_json::Value> = row.try_get("parameters")?;

    Ok(Proposal {
        id: row.try_get("id")?,
        proposer: row.try_get("proposer")?,
        proposal_type: text_enum(row, "proposal_type")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        parameters,
        status: text_enum(row, "status")?,
        voting_start: row.try_get("voting_start")?,
        voting_end: row.try_get("voting_end")?,
        votes_for: amount(row, "votes_for")?,
        votes_against: amount(row, "votes_against")?,
        total_votes: amount(row, "total_votes")?,
        quorum_required: amount(row, "quorum_required")?,
        votes,
        execution: Execution {
            executed: row.try_get("executed")?,
            tx_hash: row.try_get("execution_tx")?,
            executed_by: row.try_get("executed_by")?,
            executed_at: row.try_get("executed_at")?,
            claimed_at: row.try_get("execution_claimed_at")?,
        },
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

async fn load_votes<'e, E>(executor: E, ids: &[Uuid]) -> Result<HashMap<Uuid, Vec<Vote>>, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let rows = sqlx::query(
        "SELECT proposal_id, voter, choice, weight, cast_at FROM votes \
         WHERE proposal_id = ANY($1) ORDER BY cast_at, voter",
    )
    .bind(ids.to_vec())
    .fetch_all(executor)
    .await?;

    let mut votes: HashMap<Uuid, Vec<Vote>> = HashMap::new();
    for row in rows {
        let proposal_id: Uuid = row.try_get("proposal_id")?;
        votes.entry(proposal_id).or_default().push(Vote {
            voter: row.try_get("voter")?,
            choice: text_enum(&row, "choice")?,
            weight: amount(&row, "weight")?,
            cast_at: row.try_get("cast_at")?,
        });
    }
    Ok(votes)
}

async fn write_user<'e, E>(executor: E, user: &User) -> Result<u64, AppError>
where
    E: sqlx::Executor<'e, Database = Postgres>,
{
    let result = sqlx::query(
        "UPDATE users SET kyc_status = $2, kyc_session_id = $3, trust_balance = $4, \
         staking_balance = $5, staking_rewards = $6, staking_lock_days = $7, \
         staking_started_at = $8, staking_checkpoint = $9, ai_usage = $10, \
         display_name = $11, email = $12, country = $13, updated_at = $14 \
         WHERE wallet_address = $1",
    )
    .bind(&user.wallet_address)
    .bind(user.kyc_status.as_str())
    .bind(&user.kyc_session_id)
    .bind(user.trust_balance.to_string())
    .bind(user.staking_balance.to_string())
    .bind(user.staking_rewards.to_string())
    .bind(user.staking_lock_days.map(|d| d as i32))
    .bind(user.staking_started_at)
    .bind(user.staking_checkpoint)
    .bind(Json(&user.ai_usage))
    .bind(&user.display_name)
    .bind(&user.email)
    .bind(&user.country)
    .bind(user.updated_at)
    .execute(executor)
    .await?;
    Ok(result.rows_affected())
}

#[async_trait::async_trait]
impl Store for PgStore {
    async fn ping(&self) -> bool {
        sqlx::query("SELECT 1").fetch_one(&self.pool).await.is_ok()
    }

    async fn get_user(&self, wallet: &str) -> Result<Option<User>, AppError> {
        let sql = format!("SELECT {} FROM users WHERE wallet_address = $1", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(wallet)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(user_from_row).transpose()
    }

    async fn create_user(&self, user: &User) -> Result<User, AppError> {
        sqlx::query(
            "INSERT INTO users (wallet_address, kyc_status, trust_balance, staking_balance, \
             staking_rewards, ai_usage, created_at, updated_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             ON CONFLICT (wallet_address) DO NOTHING",
        )
        .bind(&user.wallet_address)
        .bind(user.kyc_status.as_str())
        .bind(user.trust_balance.to_string())
        .bind(user.staking_balance.to_string())
        .bind(user.staking_rewards.to_string())
        .bind(Json(&user.ai_usage))
        .bind(user.created_at)
        .bind(user.updated_at)
        .execute(&self.pool)
        .await?;

        self.get_user(&user.wallet_address)
            .await?
            .ok_or_else(|| AppError::Internal(format!("user {} vanished after insert", user.wallet_address)))
    }

    async fn save_user(&self, user: &User) -> Result<(), AppError> {
        if write_user(&self.pool, user).await? == 0 {
            return Err(AppError::not_found(format!("user {}", user.wallet_address)));
        }
        Ok(())
    }

    async fn update_user(&self, wallet: &str, apply: UserUpdate) -> Result<User, AppError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM users WHERE wallet_address = $1 FOR UPDATE",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(wallet)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found(format!("user {}", wallet)))?;
        let mut user = user_from_row(&row)?;

        apply(&mut user)?;
        write_user(&mut *tx, &user).await?;
        tx.commit().await?;
        Ok(user)
    }

    async fn insert_payment(&self, payment: &Payment) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO payments ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19)",
            PAYMENT_COLUMNS
        );
        sqlx::query(&sql)
            .bind(payment.id)
            .bind(&payment.user_id)
            .bind(payment.amount)
            .bind(&payment.currency)
            .bind(payment.method.as_str())
            .bind(payment.payment_type.as_str())
            .bind(payment.status.as_str())
            .bind(payment.fee_amount)
            .bind(payment.net_amount)
            .bind(&payment.provider_reference)
            .bind(&payment.checkout_url)
            .bind(&payment.transaction_id)
            .bind(&payment.seller_wallet)
            .bind(&payment.idempotency_key)
            .bind(&payment.failure_reason)
            .bind(&payment.description)
            .bind(payment.created_at)
            .bind(payment.updated_at)
            .bind(payment.settlement_claimed_at)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                unique_violation(e, || {
                    format!(
                        "payment with idempotency key {} already exists",
                        payment.idempotency_key.as_deref().unwrap_or_default()
                    )
                })
            })?;
        Ok(())
    }

    async fn get_payment(&self, id: Uuid) -> Result<Option<Payment>, AppError> {
        let sql = format!("SELECT {} FROM payments WHERE id = $1", PAYMENT_COLUMNS);
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn find_payment_by_idempotency_key(
        &self,
        user_id: &str,
        key: &str,
    ) -> Result<Option<Payment>, AppError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE user_id = $1 AND idempotency_key = $2",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(user_id)
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn find_payment_by_reference(&self, reference: &str) -> Result<Option<Payment>, AppError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE provider_reference = $1 LIMIT 1",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(reference)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(payment_from_row).transpose()
    }

    async fn list_payments(&self, user_id: &str) -> Result<Vec<Payment>, AppError> {
        let sql = format!(
            "SELECT {} FROM payments WHERE user_id = $1 ORDER BY created_at DESC",
            PAYMENT_COLUMNS
        );
        let rows = sqlx::query(&sql).bind(user_id).fetch_all(&self.pool).await?;
        rows.iter().map(payment_from_row).collect()
    }

    async fn transition_payment(
        &self,
        id: Uuid,
        from: PaymentStatus,
        update: &PaymentUpdate,
        now: DateTime<Utc>,
    ) -> Result<Option<Payment>, AppError> {
        let sql = format!(
            "UPDATE payments SET status = $3, \
             provider_reference = COALESCE($4, provider_reference), \
             checkout_url = COALESCE($5, checkout_url), \
             transaction_id = COALESCE($6, transaction_id), \
             failure_reason = COALESCE($7, failure_reason), \
             updated_at = $8 \
             WHERE id = $1 AND status = $2 AND settlement_claimed_at IS NULL RETURNING {}",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(from.as_str())
            .bind(update.status.as_str())
            .bind(&update.provider_reference)
            .bind(&update.checkout_url)
            .bind(&update.transaction_id)
            .bind(&update.failure_reason)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return payment_from_row(&row).map(Some);
        }
        match self.get_payment(id).await? {
            Some(_) => Ok(None),
            None => Err(AppError::not_found(format!("payment {}", id))),
        }
    }

    async fn claim_settlement(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Payment>, AppError> {
        let sql = format!(
            "UPDATE payments SET settlement_claimed_at = $2 \
             WHERE id = $1 AND status = 'PROCESSING' AND settlement_claimed_at IS NULL RETURNING {}",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(row) = row {
            return payment_from_row(&row).map(Some);
        }
        match self.get_payment(id).await? {
            Some(_) => Ok(None),
            None => Err(AppError::not_found(format!("payment {}", id))),
        }
    }

    async fn release_settlement(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE payments SET settlement_claimed_at = NULL WHERE id = $1 AND status = 'PROCESSING'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_settlement(
        &self,
        id: Uuid,
        update: &PaymentUpdate,
        now: DateTime<Utc>,
    ) -> Result<Payment, AppError> {
        let sql = format!(
            "UPDATE payments SET status = $2, \
             transaction_id = COALESCE($3, transaction_id), \
             failure_reason = COALESCE($4, failure_reason), \
             updated_at = $5, settlement_claimed_at = NULL \
             WHERE id = $1 AND status = 'PROCESSING' AND settlement_claimed_at IS NOT NULL RETURNING {}",
            PAYMENT_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(update.status.as_str())
            .bind(&update.transaction_id)
            .bind(&update.failure_reason)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AppError::Conflict(format!("payment {} is not claimed for settlement", id)))?;
        payment_from_row(&row)
    }

    async fn insert_proposal(&self, proposal: &Proposal) -> Result<(), AppError> {
        let sql = format!(
            "INSERT INTO proposals ({}) VALUES \
             ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18, $19, $20)",
            PROPOSAL_COLUMNS
        );
        sqlx::query(&sql)
            .bind(proposal.id)
            .bind(&proposal.proposer)
            .bind(proposal.proposal_type.as_str())
            .bind(&proposal.title)
            .bind(&proposal.description)
            .bind(Json(&proposal.parameters))
            .bind(proposal.status.as_str())
            .bind(proposal.voting_start)
            .bind(proposal.voting_end)
            .bind(proposal.votes_for.to_string())
            .bind(proposal.votes_against.to_string())
            .bind(proposal.total_votes.to_string())
            .bind(proposal.quorum_required.to_string())
            .bind(proposal.execution.executed)
            .bind(&proposal.execution.tx_hash)
            .bind(&proposal.execution.executed_by)
            .bind(proposal.execution.executed_at)
            .bind(proposal.execution.claimed_at)
            .bind(proposal.created_at)
            .bind(proposal.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_proposal(&self, id: Uuid) -> Result<Option<Proposal>, AppError> {
        let sql = format!("SELECT {} FROM proposals WHERE id = $1", PROPOSAL_COLUMNS);
        let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await? else {
            return Ok(None);
        };
        let mut votes = load_votes(&self.pool, &[id]).await?;
        proposal_from_row(&row, votes.remove(&id).unwrap_or_default()).map(Some)
    }

    async fn list_proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>, AppError> {
        let rows = match status {
            Some(status) => {
                let sql = format!(
                    "SELECT {} FROM proposals WHERE status = $1 ORDER BY created_at DESC",
                    PROPOSAL_COLUMNS
                );
                sqlx::query(&sql)
                    .bind(status.as_str())
                    .fetch_all(&self.pool)
                    .await?
            }
            None => {
                let sql = format!(
                    "SELECT {} FROM proposals ORDER BY created_at DESC",
                    PROPOSAL_COLUMNS
                );
                sqlx::query(&sql).fetch_all(&self.pool).await?
            }
        };

        let ids: Vec<Uuid> = rows
            .iter()
            .map(|r| r.try_get::<Uuid, _>("id"))
            .collect::<Result<_, _>>()?;
        let mut votes = load_votes(&self.pool, &ids).await?;

        rows.iter()
            .zip(ids.iter())
            .map(|(row, id)| proposal_from_row(row, votes.remove(id).unwrap_or_default()))
            .collect()
    }

    async fn record_vote(&self, proposal_id: Uuid, vote: &Vote) -> Result<Proposal, AppError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            "SELECT {} FROM proposals WHERE id = $1 FOR UPDATE",
            PROPOSAL_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(proposal_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found(format!("proposal {}", proposal_id)))?;
        let mut votes = load_votes(&mut *tx, &[proposal_id]).await?;
        let mut proposal = proposal_from_row(&row, votes.remove(&proposal_id).unwrap_or_default())?;

        proposal.apply_vote(vote.clone())?;

        sqlx::query(
            "INSERT INTO votes (proposal_id, voter, choice, weight, cast_at) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(proposal_id)
        .bind(&vote.voter)
        .bind(vote.choice.as_str())
        .bind(vote.weight.to_string())
        .bind(vote.cast_at)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            unique_violation(e, || {
                format!("{} has already voted on proposal {}", vote.voter, proposal_id)
            })
        })?;

        sqlx::query(
            "UPDATE proposals SET votes_for = $2, votes_against = $3, total_votes = $4, \
             updated_at = $5 WHERE id = $1",
        )
        .bind(proposal_id)
        .bind(proposal.votes_for.to_string())
        .bind(proposal.votes_against.to_string())
        .bind(proposal.total_votes.to_string())
        .bind(proposal.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(proposal)
    }

    async fn close_proposal(&self, id: Uuid, now: DateTime<Utc>) -> Result<Option<Proposal>, AppError> {
        let mut tx = self.pool.begin().await?;

        let sql = format!("SELECT {} FROM proposals WHERE id = $1 FOR UPDATE", PROPOSAL_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| AppError::not_found(format!("proposal {}", id)))?;
        let mut votes = load_votes(&mut *tx, &[id]).await?;
        let mut proposal = proposal_from_row(&row, votes.remove(&id).unwrap_or_default())?;

        if proposal.status != ProposalStatus::Active
            || proposal.execution.claimed_at.is_some()
            || proposal.voting_end > now
        {
            return Ok(None);
        }
        proposal.status = proposal.outcome();
        proposal.updated_at = now;

        sqlx::query("UPDATE proposals SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(proposal.status.as_str())
            .bind(now)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(proposal))
    }

    async fn transition_proposal(
        &self,
        id: Uuid,
        from: ProposalStatus,
        to: ProposalStatus,
        now: DateTime<Utc>,
    ) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE proposals SET status = $3, updated_at = $4 \
             WHERE id = $1 AND status = $2 AND execution_claimed_at IS NULL",
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim_execution(&self, id: Uuid, now: DateTime<Utc>) -> Result<bool, AppError> {
        let result = sqlx::query(
            "UPDATE proposals SET execution_claimed_at = $2 \
             WHERE id = $1 AND status = 'PASSED' AND execution_claimed_at IS NULL",
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn release_execution(&self, id: Uuid) -> Result<(), AppError> {
        sqlx::query(
            "UPDATE proposals SET execution_claimed_at = NULL WHERE id = $1 AND status = 'PASSED'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_execution(
        &self,
        id: Uuid,
        tx_hash: &str,
        executor: &str,
        now: DateTime<Utc>,
    ) -> Result<Proposal, AppError> {
        let result = sqlx::query(
            "UPDATE proposals SET status = 'EXECUTED', executed = TRUE, execution_tx = $2, \
             executed_by = $3, executed_at = $4, updated_at = $4 \
             WHERE id = $1 AND status = 'PASSED' AND execution_claimed_at IS NOT NULL",
        )
        .bind(id)
        .bind(tx_hash)
        .bind(executor)
        .bind(now)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::Conflict(format!(
                "proposal {} is not claimed for execution",
                id
            )));
        }
        self.get_proposal(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("proposal {}", id)))
    }
}

#[cfg(test)]
mod tests {
    // Run against a scratch database:
    // TEST_DATABASE_URL=postgres://localhost/rwa_test cargo test -- --ignored
    use super::*;
    use crate::models::{PaymentMethod, PaymentType, ProposalType, VoteChoice};
    use chrono::Duration;
    use rust_decimal::Decimal;

    async fn store() -> PgStore {
        let url = std::env::var("TEST_DATABASE_URL").expect("TEST_DATABASE_URL must be set");
        PgStore::connect(&url).await.unwrap()
    }

    fn proposal(status: ProposalStatus) -> Proposal {
        let now = Utc::now();
        Proposal {
            id: Uuid::new_v4(),
            proposer: "0.0.100".into(),
            proposal_type: ProposalType::OracleChange,
            title: "Swap oracle".into(),
            description: "".into(),
            parameters: serde_json::json!({ "assetType": "REAL_ESTATE", "oracle": "0.0.77" }),
            status,
            voting_start: now,
            voting_end: now + Duration::days(3),
            votes_for: 0,
            votes_against: 0,
            total_votes: 0,
            quorum_required: 10,
            votes: vec![],
            execution: Execution::default(),
            created_at: now,
            updated_at: now,
        }
    }

    fn vote(voter: &str, choice: VoteChoice, weight: u128, cast_at: DateTime<Utc>) -> Vote {
        Vote {
            voter: voter.into(),
            choice,
            weight,
            cast_at,
        }
    }

    fn escrow_payment() -> Payment {
        let now = Utc::now();
        Payment {
            id: Uuid::new_v4(),
            user_id: "0.0.1001".into(),
            amount: Decimal::from(10),
            currency: "HBAR".into(),
            method: PaymentMethod::Hbar,
            payment_type: PaymentType::Escrow,
            status: PaymentStatus::Processing,
            fee_amount: Decimal::ZERO,
            net_amount: Decimal::from(10),
            provider_reference: None,
            checkout_url: None,
            transaction_id: None,
            seller_wallet: Some("0.0.2002".into()),
            idempotency_key: None,
            failure_reason: None,
            description: None,
            created_at: now,
            updated_at: now,
            settlement_claimed_at: None,
        }
    }

    #[tokio::test]
    #[ignore]
    async fn test_duplicate_vote_is_conflict() {
        let store = store().await;
        let p = proposal(ProposalStatus::Active);
        store.insert_proposal(&p).await.unwrap();

        let ballot = vote("0.0.7", VoteChoice::For, 25, Utc::now());
        store.record_vote(p.id, &ballot).await.unwrap();
        let err = store.record_vote(p.id, &ballot).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));

        let stored = store.get_proposal(p.id).await.unwrap().unwrap();
        assert_eq!(stored.votes.len(), 1);
        assert_eq!(stored.votes_for, 25);
        assert_eq!(stored.total_votes, 25);
    }

    #[tokio::test]
    #[ignore]
    async fn test_concurrent_votes_by_one_voter() {
        let store = store().await;
        let p = proposal(ProposalStatus::Active);
        store.insert_proposal(&p).await.unwrap();

        let ballot = vote("0.0.8", VoteChoice::Against, 40, Utc::now());
        let (a, b) = tokio::join!(store.record_vote(p.id, &ballot), store.record_vote(p.id, &ballot));
        assert_eq!(a.is_ok() as u8 + b.is_ok() as u8, 1);
        assert_eq!(store.get_proposal(p.id).await.unwrap().unwrap().votes_against, 40);
    }

    #[tokio::test]
    #[ignore]
    async fn test_claim_execution_single_winner() {
        let store = store().await;
        let p = proposal(ProposalStatus::Passed);
        store.insert_proposal(&p).await.unwrap();
        let now = Utc::now();

        let (a, b) = tokio::join!(store.claim_execution(p.id, now), store.claim_execution(p.id, now));
        assert!(a.unwrap() ^ b.unwrap());
        assert!(!store
            .transition_proposal(p.id, ProposalStatus::Passed, ProposalStatus::Expired, now)
            .await
            .unwrap());

        let done = store.complete_execution(p.id, "0.0.2@1.1", "0.0.9", now).await.unwrap();
        assert_eq!(done.status, ProposalStatus::Executed);
        assert_eq!(done.execution.tx_hash.as_deref(), Some("0.0.2@1.1"));
        assert!(!store.claim_execution(p.id, now).await.unwrap());
    }

    #[tokio::test]
    #[ignore]
    async fn test_close_proposal_reads_locked_tallies() {
        let store = store().await;
        let p = proposal(ProposalStatus::Active);
        store.insert_proposal(&p).await.unwrap();

        store.record_vote(p.id, &vote("0.0.7", VoteChoice::For, 20, p.voting_end)).await.unwrap();
        store.record_vote(p.id, &vote("0.0.8", VoteChoice::Against, 30, p.voting_end)).await.unwrap();
        assert!(store.close_proposal(p.id, p.voting_start).await.unwrap().is_none());

        let closed = store.close_proposal(p.id, p.voting_end).await.unwrap().unwrap();
        assert_eq!(closed.status, ProposalStatus::Rejected);
        assert_eq!(closed.votes.len(), 2);
        assert!(store.close_proposal(p.id, p.voting_end).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore]
    async fn test_transition_payment_is_compare_and_swap() {
        let store = store().await;
        let payment = escrow_payment();
        store.insert_payment(&payment).await.unwrap();
        let now = Utc::now();
        let done = PaymentUpdate::status(PaymentStatus::Completed);

        assert!(store
            .transition_payment(payment.id, PaymentStatus::Pending, &done, now)
            .await
            .unwrap()
            .is_none());
        let moved = store
            .transition_payment(payment.id, PaymentStatus::Processing, &done, now)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(moved.status, PaymentStatus::Completed);
        assert!(store
            .transition_payment(payment.id, PaymentStatus::Processing, &done, now)
            .await
            .unwrap()
            .is_none());

        let err = store
            .transition_payment(Uuid::new_v4(), PaymentStatus::Processing, &done, now)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    #[ignore]
    async fn test_settlement_claim() {
        let store = store().await;
        let payment = escrow_payment();
        store.insert_payment(&payment).await.unwrap();
        let now = Utc::now();

        let (a, b) = tokio::join!(store.claim_settlement(payment.id, now), store.claim_settlement(payment.id, now));
        assert!(a.unwrap().is_some() ^ b.unwrap().is_some());
        assert!(store
            .transition_payment(payment.id, PaymentStatus::Processing, &PaymentUpdate::failed("x"), now)
            .await
            .unwrap()
            .is_none());

        let update = PaymentUpdate {
            transaction_id: Some("0.0.2@5.5".into()),
            ..PaymentUpdate::status(PaymentStatus::Refunded)
        };
        let done = store.complete_settlement(payment.id, &update, now).await.unwrap();
        assert_eq!(done.status, PaymentStatus::Refunded);
        assert_eq!(done.transaction_id.as_deref(), Some("0.0.2@5.5"));
        assert!(done.settlement_claimed_at.is_none());
    }
}
