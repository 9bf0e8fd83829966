// Domain models for the RWA backend

use crate::error::AppError;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Serde adapter for whole-token amounts: written as decimal strings,
/// read from either a string or a JSON integer.
pub mod amount_str {
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &u128, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(value)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<u128, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Text(String),
            Number(u64),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Text(s) => s
                .trim()
                .parse::<u128>()
                .map_err(|_| de::Error::custom(format!("invalid token amount: {}", s))),
            Raw::Number(n) => Ok(u128::from(n)),
        }
    }
}

/// Enums persisted as text columns share one string form with their JSON.
macro_rules! text_enum {
    ($name:ident { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $text,)+
                }
            }
        }

        impl std::str::FromStr for $name {
            type Err = AppError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok($name::$variant),)+
                    other => Err(AppError::BadRequest(format!(
                        "unknown {} '{}'",
                        stringify!($name),
                        other
                    ))),
                }
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

/// Accepts Hedera account ids (`shard.realm.num`) and 0x-prefixed EVM addresses.
pub fn validate_wallet(address: &str) -> Result<(), AppError> {
    let invalid = || AppError::BadRequest(format!("invalid wallet address: {}", address));

    if let Some(hex_part) = address.strip_prefix("0x") {
        let bytes = hex::decode(hex_part).map_err(|_| invalid())?;
        return if bytes.len() == 20 { Ok(()) } else { Err(invalid()) };
    }

    let parts: Vec<&str> = address.split('.').collect();
    if parts.len() == 3
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()))
    {
        Ok(())
    } else {
        Err(invalid())
    }
}

// ============================================================================
// USERS
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum KycStatus {
    NotStarted,
    InProgress,
    Approved,
    Rejected,
}

text_enum!(KycStatus {
    NotStarted => "not_started",
    InProgress => "in_progress",
    Approved => "approved",
    Rejected => "rejected",
});

impl KycStatus {
    pub fn can_transition_to(&self, next: KycStatus) -> bool {
        use KycStatus::*;
        matches!(
            (self, next),
            (NotStarted, InProgress)
                | (Rejected, InProgress)
                | (InProgress, InProgress)
                | (InProgress, Approved)
                | (InProgress, Rejected)
        )
    }
}

/// AI query counters, keyed by `YYYY-MM-DD` and `YYYY-MM`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct AiUsage {
    pub daily: BTreeMap<String, u32>,
    pub monthly: BTreeMap<String, u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub wallet_address: String,
    pub kyc_status: KycStatus,
    /// Known only to the wallet that started verification and to the provider
    #[serde(skip_serializing, default)]
    pub kyc_session_id: Option<String>,
    #[serde(with = "amount_str")]
    pub trust_balance: u128,
    #[serde(with = "amount_str")]
    pub staking_balance: u128,
    /// Settled but unclaimed staking rewards
    #[serde(with = "amount_str")]
    pub staking_rewards: u128,
    pub staking_lock_days: Option<u32>,
    pub staking_started_at: Option<DateTime<Utc>>,
    /// Rewards accrue from here; moved forward whenever rewards are settled.
    pub staking_checkpoint: Option<DateTime<Utc>>,
    pub ai_usage: AiUsage,
    pub display_name: Option<String>,
    pub email: Option<String>,
    pub country: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl User {
    pub fn new(wallet_address: &str, now: DateTime<Utc>) -> Self {
        Self {
            wallet_address: wallet_address.to_string(),
            kyc_status: KycStatus::NotStarted,
            kyc_session_id: None,
            trust_balance: 0,
            staking_balance: 0,
            staking_rewards: 0,
            staking_lock_days: None,
            staking_started_at: None,
            staking_checkpoint: None,
            ai_usage: AiUsage::default(),
            display_name: None,
            email: None,
            country: None,
            created_at: now,
            updated_at: now,
        }
    }
}

// ============================================================================
// PAYMENTS
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    Hbar,
    Stripe,
    Paypal,
    BankTransfer,
    MobileMoney,
}

text_enum!(PaymentMethod {
    Hbar => "HBAR",
    Stripe => "STRIPE",
    Paypal => "PAYPAL",
    BankTransfer => "BANK_TRANSFER",
    MobileMoney => "MOBILE_MONEY",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentType {
    TokenizationFee,
    VerificationFee,
    Investment,
    Escrow,
    Settlement,
    Refund,
    PlatformFee,
}

text_enum!(PaymentType {
    TokenizationFee => "TOKENIZATION_FEE",
    VerificationFee => "VERIFICATION_FEE",
    Investment => "INVESTMENT",
    Escrow => "ESCROW",
    Settlement => "SETTLEMENT",
    Refund => "REFUND",
    PlatformFee => "PLATFORM_FEE",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    Refunded,
    Cancelled,
}

text_enum!(PaymentStatus {
    Pending => "PENDING",
    Processing => "PROCESSING",
    Completed => "COMPLETED",
    Failed => "FAILED",
    Refunded => "REFUNDED",
    Cancelled => "CANCELLED",
});

impl PaymentStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Completed
                | PaymentStatus::Failed
                | PaymentStatus::Refunded
                | PaymentStatus::Cancelled
        )
    }

    pub fn can_transition_to(&self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Processing)
                | (Pending, Completed)
                | (Pending, Failed)
                | (Pending, Cancelled)
                | (Processing, Completed)
                | (Processing, Failed)
                | (Processing, Cancelled)
                | (Processing, Refunded)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Payment {
    pub id: Uuid,
    pub user_id: String,
    pub amount: Decimal,
    pub currency: String,
    pub method: PaymentMethod,
    pub payment_type: PaymentType,
    pub status: PaymentStatus,
    pub fee_amount: Decimal,
    pub net_amount: Decimal,
    pub provider_reference: Option<String>,
    pub checkout_url: Option<String>,
    pub transaction_id: Option<String>,
    pub seller_wallet: Option<String>,
    pub idempotency_key: Option<String>,
    pub failure_reason: Option<String>,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// Set while an escrow release or refund is moving funds on the ledger
    #[serde(skip_serializing, default)]
    pub settlement_claimed_at: Option<DateTime<Utc>>,
}

/// A status change plus whatever the provider or ledger reported with it.
/// `None` fields leave the stored value untouched.
#[derive(Debug, Clone, PartialEq)]
pub struct PaymentUpdate {
    pub status: PaymentStatus,
    pub provider_reference: Option<String>,
    pub checkout_url: Option<String>,
    pub transaction_id: Option<String>,
    pub failure_reason: Option<String>,
}

impl PaymentUpdate {
    pub fn status(status: PaymentStatus) -> Self {
        Self {
            status,
            provider_reference: None,
            checkout_url: None,
            transaction_id: None,
            failure_reason: None,
        }
    }

    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            failure_reason: Some(reason.into()),
            ..Self::status(PaymentStatus::Failed)
        }
    }
}

impl Payment {
    pub fn apply(&mut self, update: &PaymentUpdate, now: DateTime<Utc>) {
        self.status = update.status;
        if let Some(r) = &update.provider_reference {
            self.provider_reference = Some(r.clone());
        }
        if let Some(u) = &update.checkout_url {
            self.checkout_url = Some(u.clone());
        }
        if let Some(t) = &update.transaction_id {
            self.transaction_id = Some(t.clone());
        }
        if let Some(f) = &update.failure_reason {
            self.failure_reason = Some(f.clone());
        }
        self.updated_at = now;
    }
}

// ============================================================================
// GOVERNANCE
// ============================================================================

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalType {
    ParameterChange,
    AddAssetType,
    OracleChange,
    TreasuryAllocation,
    ProtocolUpgrade,
}

text_enum!(ProposalType {
    ParameterChange => "PARAMETER_CHANGE",
    AddAssetType => "ADD_ASSET_TYPE",
    OracleChange => "ORACLE_CHANGE",
    TreasuryAllocation => "TREASURY_ALLOCATION",
    ProtocolUpgrade => "PROTOCOL_UPGRADE",
});

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProposalStatus {
    Draft,
    Active,
    Passed,
    Rejected,
    Executed,
    Expired,
}

text_enum!(ProposalStatus {
    Draft => "DRAFT",
    Active => "ACTIVE",
    Passed => "PASSED",
    Rejected => "REJECTED",
    Executed => "EXECUTED",
    Expired => "EXPIRED",
});

impl ProposalStatus {
    /// Status only moves forward.
    pub fn can_transition_to(&self, next: ProposalStatus) -> bool {
        use ProposalStatus::*;
        matches!(
            (self, next),
            (Draft, Active)
                | (Active, Passed)
                | (Active, Rejected)
                | (Passed, Executed)
                | (Passed, Expired)
        )
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VoteChoice {
    For,
    Against,
    Abstain,
}

text_enum!(VoteChoice {
    For => "FOR",
    Against => "AGAINST",
    Abstain => "ABSTAIN",
});

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Vote {
    pub voter: String,
    pub choice: VoteChoice,
    #[serde(with = "amount_str")]
    pub weight: u128,
    pub cast_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Execution {
    pub executed: bool,
    pub tx_hash: Option<String>,
    pub executed_by: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    /// Set while an executor holds the proposal; cleared if the ledger call fails.
    pub claimed_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Proposal {
    pub id: Uuid,
    pub proposer: String,
    pub proposal_type: ProposalType,
    pub title: String,
    pub description: String,
    pub parameters: serde_json::Value,
    pub status: ProposalStatus,
    pub voting_start: DateTime<Utc>,
    pub voting_end: DateTime<Utc>,
    #[serde(with = "amount_str")]
    pub votes_for: u128,
    #[serde(with = "amount_str")]
    pub votes_against: u128,
    #[serde(with = "amount_str")]
    pub total_votes: u128,
    #[serde(with = "amount_str")]
    pub quorum_required: u128,
    pub votes: Vec<Vote>,
    pub execution: Execution,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn has_voted(&self, voter: &str) -> bool {
        self.votes.iter().any(|v| v.voter == voter)
    }

    /// Records a vote and adds its weight to the matching tally.
    /// ABSTAIN is recorded but counted in no tally.
    pub fn apply_vote(&mut self, vote: Vote) -> Result<(), AppError> {
        if self.status != ProposalStatus::Active {
            return Err(AppError::Conflict(format!(
                "proposal {} is not active ({})",
                self.id, self.status
            )));
        }
        if vote.cast_at > self.voting_end {
            return Err(AppError::BadRequest(format!(
                "voting on proposal {} ended at {}",
                self.id, self.voting_end
            )));
        }
        if self.has_voted(&vote.voter) {
            return Err(AppError::Conflict(format!(
                "{} has already voted on proposal {}",
                vote.voter, self.id
            )));
        }

        let overflow = || AppError::Internal("vote tally overflow".to_string());
        match vote.choice {
            VoteChoice::For => {
                self.votes_for = self.votes_for.checked_add(vote.weight).ok_or_else(overflow)?;
                self.total_votes = self.total_votes.checked_add(vote.weight).ok_or_else(overflow)?;
            }
            VoteChoice::Against => {
                self.votes_against = self
                    .votes_against
                    .checked_add(vote.weight)
                    .ok_or_else(overflow)?;
                self.total_votes = self.total_votes.checked_add(vote.weight).ok_or_else(overflow)?;
            }
            VoteChoice::Abstain => {}
        }

        self.updated_at = vote.cast_at;
        self.votes.push(vote);
        Ok(())
    }

    pub fn quorum_met(&self) -> bool {
        self.total_votes >= self.quorum_required
    }

    /// Result once voting has closed.
    pub fn outcome(&self) -> ProposalStatus {
        if self.quorum_met() && self.votes_for > self.votes_against {
            ProposalStatus::Passed
        } else {
            ProposalStatus::Rejected
        }
    }
}
