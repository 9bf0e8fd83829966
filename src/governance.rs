// Governance: proposals, token-weighted voting, tallying and execution

use crate::config::{ConfigHandle, GovernanceConfig};
use crate::database::DynStore;
use crate::error::AppError;
use crate::ledger::{Ledger, LedgerReceipt};
use crate::models::{
    amount_str, validate_wallet, Execution, Proposal, ProposalStatus, ProposalType, Vote,
    VoteChoice,
};
use chrono::{DateTime, Duration, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use uuid::Uuid;

const MAX_TITLE_LEN: usize = 200;

fn after(at: DateTime<Utc>, secs: i64) -> Option<DateTime<Utc>> {
    Duration::try_seconds(secs).and_then(|d| at.checked_add_signed(d))
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProposalRequest {
    pub proposer: String,
    pub proposal_type: ProposalType,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub parameters: Value,
    pub voting_duration_days: Option<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CastVoteRequest {
    pub voter: String,
    pub choice: VoteChoice,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecuteProposalRequest {
    pub executor: String,
}

/// Proposals moved by one status sweep
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct StatusSweep {
    pub passed: Vec<Uuid>,
    pub rejected: Vec<Uuid>,
    pub expired: Vec<Uuid>,
}

impl StatusSweep {
    pub fn is_empty(&self) -> bool {
        self.passed.is_empty() && self.rejected.is_empty() && self.expired.is_empty()
    }
}

/// What a passed proposal does on-chain, parsed from its `parameters`.
#[derive(Debug, Clone, PartialEq)]
pub enum GovernanceAction {
    ParameterChange {
        parameter: String,
        value: Value,
    },
    AddAssetType {
        name: String,
        symbol: String,
        metadata: Value,
    },
    OracleChange {
        asset_type: String,
        oracle_account: String,
    },
    TreasuryAllocation {
        recipient: String,
        amount: u128,
    },
    ProtocolUpgrade {
        contract_id: String,
        bytecode_file_id: String,
        version: String,
    },
}

#[derive(Deserialize)]
struct ParameterChangeParams {
    parameter: String,
    value: Value,
}

#[derive(Deserialize)]
struct AddAssetTypeParams {
    name: String,
    symbol: String,
    #[serde(default)]
    metadata: Value,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct OracleChangeParams {
    asset_type: String,
    oracle_account: String,
}

#[derive(Deserialize)]
struct TreasuryAllocationParams {
    recipient: String,
    #[serde(with = "amount_str")]
    amount: u128,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ProtocolUpgradeParams {
    contract_id: String,
    bytecode_file_id: String,
    version: String,
}

fn params<T: DeserializeOwned>(proposal_type: ProposalType, parameters: &Value) -> Result<T, AppError> {
    serde_json::from_value(parameters.clone()).map_err(|e| {
        AppError::BadRequest(format!("invalid parameters for {}: {}", proposal_type, e))
    })
}

fn require(field: &str, value: &str) -> Result<(), AppError> {
    if value.trim().is_empty() {
        return Err(AppError::BadRequest(format!("{} must not be empty", field)));
    }
    Ok(())
}

impl GovernanceAction {
    pub fn parse(proposal_type: ProposalType, parameters: &Value) -> Result<Self, AppError> {
        let action = match proposal_type {
            ProposalType::ParameterChange => {
                let p: ParameterChangeParams = params(proposal_type, parameters)?;
                require("parameter", &p.parameter)?;
                GovernanceAction::ParameterChange {
                    parameter: p.parameter,
                    value: p.value,
                }
            }
            ProposalType::AddAssetType => {
                let p: AddAssetTypeParams = params(proposal_type, parameters)?;
                require("name", &p.name)?;
                require("symbol", &p.symbol)?;
                GovernanceAction::AddAssetType {
                    name: p.name,
                    symbol: p.symbol,
                    metadata: p.metadata,
                }
            }
            ProposalType::OracleChange => {
                let p: OracleChangeParams = params(proposal_type, parameters)?;
                require("assetType", &p.asset_type)?;
                validate_wallet(&p.oracle_account)?;
                GovernanceAction::OracleChange {
                    asset_type: p.asset_type,
                    oracle_account: p.oracle_account,
                }
            }
            ProposalType::TreasuryAllocation => {
                let p: TreasuryAllocationParams = params(proposal_type, parameters)?;
                validate_wallet(&p.recipient)?;
                if p.amount == 0 {
                    return Err(AppError::BadRequest("amount must be positive".into()));
                }
                GovernanceAction::TreasuryAllocation {
                    recipient: p.recipient,
                    amount: p.amount,
                }
            }
            ProposalType::ProtocolUpgrade => {
                let p: ProtocolUpgradeParams = params(proposal_type, parameters)?;
                require("contractId", &p.contract_id)?;
                require("bytecodeFileId", &p.bytecode_file_id)?;
                require("version", &p.version)?;
                GovernanceAction::ProtocolUpgrade {
                    contract_id: p.contract_id,
                    bytecode_file_id: p.bytecode_file_id,
                    version: p.version,
                }
            }
        };
        Ok(action)
    }
}

pub struct GovernanceService {
    store: DynStore,
    ledger: Arc<dyn Ledger>,
    config: Arc<ConfigHandle<GovernanceConfig>>,
    treasury_account: String,
    token_id: String,
}

impl GovernanceService {
    pub fn new(
        store: DynStore,
        ledger: Arc<dyn Ledger>,
        config: Arc<ConfigHandle<GovernanceConfig>>,
        treasury_account: String,
        token_id: String,
    ) -> Self {
        Self {
            store,
            ledger,
            config,
            treasury_account,
            token_id,
        }
    }

    pub fn config(&self) -> Arc<GovernanceConfig> {
        self.config.current()
    }

    /// Swap in a new rule set. Open proposals keep the quorum they were created with.
    pub fn replace_config(&self, config: GovernanceConfig) -> Result<Arc<GovernanceConfig>, AppError> {
        config.validate().map_err(AppError::BadRequest)?;
        info!(
            "Governance config replaced: threshold={}, quorum={}%",
            config.proposal_threshold, config.quorum_percentage
        );
        self.config.replace(config);
        Ok(self.config.current())
    }

    /// Voting weight is the wallet's token balance at the time of asking.
    pub async fn voting_power(&self, wallet: &str) -> Result<u128, AppError> {
        validate_wallet(wallet)?;
        Ok(self
            .store
            .get_user(wallet)
            .await?
            .map(|u| u.trust_balance)
            .unwrap_or(0))
    }

    pub async fn create_proposal(
        &self,
        req: CreateProposalRequest,
        now: DateTime<Utc>,
    ) -> Result<Proposal, AppError> {
        validate_wallet(&req.proposer)?;
        require("title", &req.title)?;
        if req.title.chars().count() > MAX_TITLE_LEN {
            return Err(AppError::BadRequest(format!(
                "title must be at most {} characters",
                MAX_TITLE_LEN
            )));
        }
        GovernanceAction::parse(req.proposal_type, &req.parameters)?;

        let config = self.config.current();
        let days = req.voting_duration_days.unwrap_or(config.default_voting_days);
        if days < config.min_voting_days || days > config.max_voting_days {
            return Err(AppError::BadRequest(format!(
                "voting duration must be between {} and {} days",
                config.min_voting_days, config.max_voting_days
            )));
        }

        let voting_end = Duration::try_days(i64::from(days))
            .and_then(|d| now.checked_add_signed(d))
            .ok_or_else(|| AppError::BadRequest(format!("voting duration of {} days is out of range", days)))?;

        let balance = self.voting_power(&req.proposer).await?;
        if balance < config.proposal_threshold {
            return Err(AppError::BadRequest(format!(
                "proposer needs at least {} tokens to create a proposal (has {})",
                config.proposal_threshold, balance
            )));
        }

        let proposal = Proposal {
            id: Uuid::new_v4(),
            proposer: req.proposer,
            proposal_type: req.proposal_type,
            title: req.title.trim().to_string(),
            description: req.description,
            parameters: req.parameters,
            status: ProposalStatus::Active,
            voting_start: now,
            voting_end,
            votes_for: 0,
            votes_against: 0,
            total_votes: 0,
            quorum_required: config.quorum_required(),
            votes: Vec::new(),
            execution: Execution::default(),
            created_at: now,
            updated_at: now,
        };

        self.store.insert_proposal(&proposal).await?;
        info!(
            "Governance: proposal {} ({}) created by {}, voting ends {}",
            proposal.id, proposal.proposal_type, proposal.proposer, proposal.voting_end
        );
        Ok(proposal)
    }

    pub async fn get_proposal(&self, id: Uuid) -> Result<Proposal, AppError> {
        self.store
            .get_proposal(id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("proposal {}", id)))
    }

    pub async fn list_proposals(&self, status: Option<ProposalStatus>) -> Result<Vec<Proposal>, AppError> {
        self.store.list_proposals(status).await
    }

    pub async fn cast_vote(
        &self,
        proposal_id: Uuid,
        req: CastVoteRequest,
        now: DateTime<Utc>,
    ) -> Result<Proposal, AppError> {
        validate_wallet(&req.voter)?;
        let proposal = self.get_proposal(proposal_id).await?;

        if proposal.status != ProposalStatus::Active {
            return Err(AppError::Conflict(format!(
                "proposal {} is not active ({})",
                proposal_id, proposal.status
            )));
        }
        if now > proposal.voting_end {
            return Err(AppError::BadRequest(format!(
                "voting on proposal {} ended at {}",
                proposal_id, proposal.voting_end
            )));
        }
        if proposal.has_voted(&req.voter) {
            return Err(AppError::Conflict(format!(
                "{} has already voted on proposal {}",
                req.voter, proposal_id
            )));
        }

        let weight = self.voting_power(&req.voter).await?;
        if weight == 0 {
            return Err(AppError::BadRequest(format!("{} has no voting power", req.voter)));
        }

        let vote = Vote {
            voter: req.voter,
            choice: req.choice,
            weight,
            cast_at: now,
        };
        let updated = self.store.record_vote(proposal_id, &vote).await?;

        info!(
            "Governance: {} voted {} with weight {} on {} (for={}, against={})",
            vote.voter, vote.choice, weight, proposal_id, updated.votes_for, updated.votes_against
        );
        Ok(updated)
    }

    /// Closes proposals whose voting window has ended and expires passed
    /// proposals that were never executed within the execution window.
    pub async fn update_proposal_statuses(&self, now: DateTime<Utc>) -> Result<StatusSweep, AppError> {
        let config = self.config.current();
        let mut sweep = StatusSweep::default();

        for candidate in self.store.list_proposals(Some(ProposalStatus::Active)).await? {
            if candidate.voting_end > now {
                continue;
            }
            // Decided from the stored tallies, not from the listing above
            let Some(proposal) = self.store.close_proposal(candidate.id, now).await? else {
                continue;
            };
            info!(
                "Governance: proposal {} closed as {} (total={}, quorum={}, for={}, against={})",
                proposal.id,
                proposal.status,
                proposal.total_votes,
                proposal.quorum_required,
                proposal.votes_for,
                proposal.votes_against
            );
            match proposal.status {
                ProposalStatus::Passed => sweep.passed.push(proposal.id),
                _ => sweep.rejected.push(proposal.id),
            }
        }

        let lapse = config
            .execution_delay_secs
            .saturating_add(config.execution_window_secs);
        for proposal in self.store.list_proposals(Some(ProposalStatus::Passed)).await? {
            match after(proposal.voting_end, lapse) {
                Some(expires_at) if expires_at <= now => {}
                Some(_) => continue,
                None => {
                    warn!("Governance: expiry of {} is out of range, skipping", proposal.id);
                    continue;
                }
            }
            if self
                .store
                .transition_proposal(proposal.id, ProposalStatus::Passed, ProposalStatus::Expired, now)
                .await?
            {
                info!("Governance: proposal {} expired unexecuted", proposal.id);
                sweep.expired.push(proposal.id);
            }
        }

        Ok(sweep)
    }

    pub async fn execute_proposal(
        &self,
        proposal_id: Uuid,
        executor: &str,
        now: DateTime<Utc>,
    ) -> Result<Proposal, AppError> {
        let proposal = self.get_proposal(proposal_id).await?;
        if proposal.status != ProposalStatus::Passed {
            return Err(AppError::Conflict(format!(
                "proposal {} is {} and cannot be executed",
                proposal_id, proposal.status
            )));
        }

        let config = self.config.current();
        let out_of_range =
            || AppError::BadRequest(format!("execution window of {} is out of range", proposal_id));
        let executable_from =
            after(proposal.voting_end, config.execution_delay_secs).ok_or_else(out_of_range)?;
        let closes_at =
            after(executable_from, config.execution_window_secs).ok_or_else(out_of_range)?;
        if now < executable_from {
            return Err(AppError::BadRequest(format!(
                "proposal {} cannot be executed before {}",
                proposal_id, executable_from
            )));
        }
        if now >= closes_at {
            return Err(AppError::BadRequest(format!(
                "execution window for proposal {} has closed",
                proposal_id
            )));
        }

        let action = GovernanceAction::parse(proposal.proposal_type, &proposal.parameters)?;

        if !self.store.claim_execution(proposal_id, now).await? {
            return Err(AppError::Conflict(format!(
                "proposal {} is already being executed",
                proposal_id
            )));
        }

        let receipt = match self.dispatch(&action).await {
            Ok(receipt) => receipt,
            Err(e) => {
                warn!("Governance: execution of {} failed: {}", proposal_id, e);
                self.store.release_execution(proposal_id).await?;
                return Err(e);
            }
        };

        // The claim stays in place if this write fails, so the action cannot run twice
        let executed = self
            .store
            .complete_execution(proposal_id, &receipt.transaction_id, executor, now)
            .await
            .map_err(|e| {
                error!(
                    "Governance: proposal {} executed as {} but recording failed: {}",
                    proposal_id, receipt.transaction_id, e
                );
                e
            })?;

        info!(
            "Governance: proposal {} executed by {} in {}",
            proposal_id, executor, receipt.transaction_id
        );
        Ok(executed)
    }

    async fn dispatch(&self, action: &GovernanceAction) -> Result<LedgerReceipt, AppError> {
        match action {
            GovernanceAction::ParameterChange { parameter, value } => {
                self.ledger.update_parameter(parameter, value).await
            }
            GovernanceAction::AddAssetType {
                name,
                symbol,
                metadata,
            } => self.ledger.register_asset_type(name, symbol, metadata).await,
            GovernanceAction::OracleChange {
                asset_type,
                oracle_account,
            } => self.ledger.set_oracle(asset_type, oracle_account).await,
            GovernanceAction::TreasuryAllocation { recipient, amount } => {
                self.ledger
                    .transfer_token(&self.token_id, &self.treasury_account, recipient, *amount)
                    .await
            }
            GovernanceAction::ProtocolUpgrade {
                contract_id,
                bytecode_file_id,
                version,
            } => {
                self.ledger
                    .upgrade_contract(contract_id, bytecode_file_id, version)
                    .await
            }
        }
    }
}

/// Runs the status sweep on a fixed interval.
pub fn spawn_status_updater(service: Arc<GovernanceService>, every: std::time::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Starting governance status updater (every {:?})", every);
        let mut ticker = tokio::time::interval(every);
        loop {
            ticker.tick().await;
            match service.update_proposal_statuses(Utc::now()).await {
                Ok(sweep) if !sweep.is_empty() => info!(
                    "Governance sweep: {} passed, {} rejected, {} expired",
                    sweep.passed.len(),
                    sweep.rejected.len(),
                    sweep.expired.len()
                ),
                Ok(_) => {}
                Err(e) => error!("Governance sweep failed: {}", e),
            }
        }
    })
}
