// Test doubles shared by the service and route tests

use crate::auth::AuthService;
use crate::config::{
    AiUsageLimits, ConfigHandle, FeeAllocationConfig, FeeConfig, GovernanceConfig, StakingConfig,
};
use crate::database::{MemoryStore, Store};
use crate::error::AppError;
use crate::governance::GovernanceService;
use crate::kyc::{KycProvider, KycService, KycSession};
use crate::ledger::{AccountKey, Ledger, LedgerReceipt};
use crate::models::{Payment, PaymentMethod, PaymentStatus, User};
use crate::payments::providers::RailOutcome;
use crate::payments::{PaymentContext, PaymentRail, PaymentService};
use crate::staking::StakingService;
use crate::tokenomics::TokenomicsService;
use crate::users::UserService;
use crate::AppState;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Ledger that records every call and can be told to fail.
#[derive(Default)]
pub struct MockLedger {
    calls: Mutex<Vec<String>>,
    balances: Mutex<HashMap<String, u128>>,
    keys: Mutex<HashMap<String, AccountKey>>,
    fail: AtomicBool,
    seq: AtomicU64,
}

impl MockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }

    pub fn set_balance(&self, account: &str, balance: u128) {
        self.balances
            .lock()
            .unwrap()
            .insert(account.to_string(), balance);
    }

    pub fn set_public_key(&self, account: &str, key: AccountKey) {
        self.keys.lock().unwrap().insert(account.to_string(), key);
    }

    fn record(&self, call: String) -> Result<LedgerReceipt, AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Ledger(format!("{} failed: mock outage", call)));
        }
        self.calls.lock().unwrap().push(call);
        let n = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(LedgerReceipt {
            transaction_id: format!("0.0.2@1700000000.{}", n),
            status: "SUCCESS".into(),
        })
    }
}

#[async_trait::async_trait]
impl Ledger for MockLedger {
    async fn ping(&self) -> bool {
        !self.fail.load(Ordering::SeqCst)
    }

    async fn account_public_key(&self, account: &str) -> Result<AccountKey, AppError> {
        self.keys
            .lock()
            .unwrap()
            .get(account)
            .cloned()
            .ok_or_else(|| AppError::Ledger(format!("key query for {} returned 404 Not Found", account)))
    }

    async fn transfer_hbar(&self, from: &str, to: &str, tinybars: u64) -> Result<LedgerReceipt, AppError> {
        self.record(format!("hbar {}->{} {}", from, to, tinybars))
    }

    async fn transfer_token(
        &self,
        token_id: &str,
        from: &str,
        to: &str,
        amount: u128,
    ) -> Result<LedgerReceipt, AppError> {
        self.record(format!("token {} {}->{} {}", token_id, from, to, amount))
    }

    async fn token_balance(&self, _token_id: &str, account: &str) -> Result<u128, AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Ledger("balance query failed: mock outage".into()));
        }
        Ok(self
            .balances
            .lock()
            .unwrap()
            .get(account)
            .copied()
            .unwrap_or(0))
    }

    async fn update_parameter(&self, key: &str, value: &Value) -> Result<LedgerReceipt, AppError> {
        self.record(format!("parameter {}={}", key, value))
    }

    async fn register_asset_type(
        &self,
        name: &str,
        symbol: &str,
        _metadata: &Value,
    ) -> Result<LedgerReceipt, AppError> {
        self.record(format!("asset-type {} {}", name, symbol))
    }

    async fn set_oracle(&self, asset_type: &str, oracle_account: &str) -> Result<LedgerReceipt, AppError> {
        self.record(format!("oracle {} {}", asset_type, oracle_account))
    }

    async fn upgrade_contract(
        &self,
        contract_id: &str,
        bytecode_file_id: &str,
        version: &str,
    ) -> Result<LedgerReceipt, AppError> {
        self.record(format!("upgrade {} {} {}", contract_id, bytecode_file_id, version))
    }
}

/// Payment rail that answers with a fixed status.
pub struct MockRail {
    method: PaymentMethod,
    status: PaymentStatus,
    fail: AtomicBool,
    calls: AtomicUsize,
}

impl MockRail {
    pub fn new(method: PaymentMethod, status: PaymentStatus) -> Self {
        Self {
            method,
            status,
            fail: AtomicBool::new(false),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl PaymentRail for MockRail {
    fn method(&self) -> PaymentMethod {
        self.method
    }

    async fn initiate(&self, payment: &Payment, _ctx: &PaymentContext) -> Result<RailOutcome, AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Provider(format!("{} declined the request", self.method)));
        }
        Ok(RailOutcome {
            status: self.status,
            provider_reference: format!("{}_{}", self.method.as_str().to_lowercase(), payment.id.simple()),
            checkout_url: (self.method == PaymentMethod::Paypal)
                .then(|| format!("https://paypal.test/checkout/{}", payment.id)),
        })
    }
}

/// KYC provider that hands out numbered sessions.
#[derive(Default)]
pub struct MockKyc {
    sessions: AtomicUsize,
    fail: AtomicBool,
}

impl MockKyc {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_failing(&self, fail: bool) {
        self.fail.store(fail, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl KycProvider for MockKyc {
    async fn create_session(&self, wallet: &str) -> Result<KycSession, AppError> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(AppError::Provider("kyc provider unavailable".into()));
        }
        let n = self.sessions.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(KycSession {
            session_id: format!("session-{}", n),
            url: format!("https://verify.test/{}?vendor_data={}", n, wallet),
        })
    }
}

pub fn memory_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

/// Creates a user holding `balance` tokens.
pub async fn seed_user(store: &dyn Store, wallet: &str, balance: u128, now: DateTime<Utc>) -> User {
    let mut user = User::new(wallet, now);
    user.trust_balance = balance;
    store.create_user(&user).await.unwrap();
    store.save_user(&user).await.unwrap();
    user
}

/// Fully wired state over the in-memory store and mocks, for router tests.
pub struct TestApp {
    pub state: Arc<AppState>,
    pub store: Arc<MemoryStore>,
    pub ledger: Arc<MockLedger>,
    pub kyc: Arc<MockKyc>,
}

impl TestApp {
    pub const ADMIN_KEY: &'static str = "admin-test-key";
    pub const WEBHOOK_SECRET: &'static str = "hook-test-secret";
    pub const AI_DAILY_LIMIT: u32 = 3;
    pub const TREASURY: &'static str = "0.0.98";
    pub const ESCROW: &'static str = "0.0.99";
    pub const TOKEN: &'static str = "0.0.1001";

    pub fn new() -> Self {
        Self::build(Some(Self::ADMIN_KEY.to_string()))
    }

    pub fn without_admin_key() -> Self {
        Self::build(None)
    }

    fn build(admin_api_key: Option<String>) -> Self {
        let store = memory_store();
        let ledger = Arc::new(MockLedger::new());
        let kyc = Arc::new(MockKyc::new());
        let governance_config = Arc::new(ConfigHandle::new(GovernanceConfig::default()));
        let staking_config = Arc::new(StakingConfig::default());

        let payments = PaymentService::new(
            store.clone(),
            ledger.clone(),
            FeeConfig::default(),
            Self::TREASURY.into(),
            Self::ESCROW.into(),
        )
        .with_rail(Arc::new(MockRail::new(PaymentMethod::Stripe, PaymentStatus::Processing)))
        .with_rail(Arc::new(MockRail::new(PaymentMethod::Paypal, PaymentStatus::Processing)))
        .with_rail(Arc::new(MockRail::new(PaymentMethod::MobileMoney, PaymentStatus::Processing)));

        let state = AppState {
            store: store.clone(),
            ledger: ledger.clone(),
            auth: AuthService::new(ledger.clone()),
            users: UserService::new(
                store.clone(),
                ledger.clone(),
                Self::TOKEN.into(),
                AiUsageLimits {
                    daily: Self::AI_DAILY_LIMIT,
                    monthly: 100,
                },
            ),
            kyc: KycService::new(store.clone(), kyc.clone()),
            payments,
            governance: Arc::new(GovernanceService::new(
                store.clone(),
                ledger.clone(),
                governance_config.clone(),
                Self::TREASURY.into(),
                Self::TOKEN.into(),
            )),
            staking: StakingService::new(
                store.clone(),
                ledger.clone(),
                staking_config.clone(),
                Self::TOKEN.into(),
                Self::TREASURY.into(),
            ),
            tokenomics: TokenomicsService::new(
                governance_config,
                staking_config,
                FeeConfig::default(),
                FeeAllocationConfig::default(),
            ),
            admin_api_key,
            webhook_secret: Some(Self::WEBHOOK_SECRET.to_string()),
        };

        Self {
            state: Arc::new(state),
            store,
            ledger,
            kyc,
        }
    }

    /// Bearer token for a signed-in wallet.
    pub async fn login(&self, wallet: &str) -> String {
        self.state.auth.issue_session(wallet, Utc::now()).await.token
    }
}
