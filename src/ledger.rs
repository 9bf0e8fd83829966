// Hedera ledger wrapper
//
// The backend never signs transactions itself. Every call is forwarded as
// JSON to a relay that holds the operator key and the Hedera SDK client; the
// relay answers with the transaction id and receipt status. No retries: a
// failed call surfaces to the caller as `AppError::Ledger`.

use crate::config::HederaConfig;
use crate::error::AppError;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::time::Duration;
use tracing::{error, info};

/// Receipt for a transaction the network reached consensus on.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct LedgerReceipt {
    pub transaction_id: String,
    pub status: String,
}

/// Public key registered on a Hedera account. `key` is hex.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AccountKey {
    pub key_type: String,
    pub key: String,
}

#[async_trait::async_trait]
pub trait Ledger: Send + Sync {
    async fn ping(&self) -> bool;

    async fn account_public_key(&self, account: &str) -> Result<AccountKey, AppError>;

    /// Move HBAR between accounts, amount in tinybars.
    async fn transfer_hbar(&self, from: &str, to: &str, tinybars: u64) -> Result<LedgerReceipt, AppError>;

    async fn transfer_token(
        &self,
        token_id: &str,
        from: &str,
        to: &str,
        amount: u128,
    ) -> Result<LedgerReceipt, AppError>;

    async fn token_balance(&self, token_id: &str, account: &str) -> Result<u128, AppError>;

    async fn update_parameter(&self, key: &str, value: &Value) -> Result<LedgerReceipt, AppError>;

    async fn register_asset_type(
        &self,
        name: &str,
        symbol: &str,
        metadata: &Value,
    ) -> Result<LedgerReceipt, AppError>;

    async fn set_oracle(&self, asset_type: &str, oracle_account: &str) -> Result<LedgerReceipt, AppError>;

    async fn upgrade_contract(
        &self,
        contract_id: &str,
        bytecode_file_id: &str,
        version: &str,
    ) -> Result<LedgerReceipt, AppError>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RelayReceipt {
    transaction_id: Option<String>,
    status: Option<String>,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RelayBalance {
    #[serde(with = "crate::models::amount_str")]
    balance: u128,
}

/// HTTP client for the Hedera relay
pub struct HederaClient {
    http: Client,
    relay_url: String,
    network: String,
    operator_id: String,
}

impl HederaClient {
    pub fn new(config: &HederaConfig, timeout: Duration) -> Result<Self, AppError> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build ledger client: {}", e)))?;

        Ok(Self {
            http,
            relay_url: config.relay_url.trim_end_matches('/').to_string(),
            network: config.network.clone(),
            operator_id: config.operator_id.clone(),
        })
    }

    async fn submit(&self, kind: &str, transaction: Value) -> Result<LedgerReceipt, AppError> {
        let url = format!("{}/transactions/{}", self.relay_url, kind);
        info!("Hedera: submitting {} on {}", kind, self.network);

        let response = self
            .http
            .post(&url)
            .json(&json!({
                "network": self.network,
                "operator": self.operator_id,
                "transaction": transaction,
            }))
            .send()
            .await
            .map_err(|e| {
                error!("Hedera: {} request failed: {}", kind, e);
                AppError::Ledger(format!("{} failed: {}", kind, e))
            })?;

        let http_status = response.status();
        let receipt: RelayReceipt = response
            .json()
            .await
            .map_err(|e| AppError::Ledger(format!("{} returned an unreadable receipt: {}", kind, e)))?;

        if let Some(message) = receipt.error {
            error!("Hedera: {} rejected: {}", kind, message);
            return Err(AppError::Ledger(format!("{} failed: {}", kind, message)));
        }

        let status = receipt.status.unwrap_or_default();
        if !http_status.is_success() || status != "SUCCESS" {
            error!("Hedera: {} finished with status {} ({})", kind, status, http_status);
            return Err(AppError::Ledger(format!("{} failed with status {}", kind, status)));
        }

        let transaction_id = receipt
            .transaction_id
            .ok_or_else(|| AppError::Ledger(format!("{} receipt has no transaction id", kind)))?;

        info!("Hedera: {} confirmed as {}", kind, transaction_id);
        Ok(LedgerReceipt {
            transaction_id,
            status,
        })
    }
}

#[async_trait::async_trait]
impl Ledger for HederaClient {
    async fn ping(&self) -> bool {
        self.http
            .get(format!("{}/health", self.relay_url))
            .send()
            .await
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }

    async fn account_public_key(&self, account: &str) -> Result<AccountKey, AppError> {
        let url = format!("{}/accounts/{}/key", self.relay_url, account);
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Ledger(format!("key query failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Ledger(format!(
                "key query for {} returned {}",
                account,
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| AppError::Ledger(format!("unreadable key response: {}", e)))
    }

    async fn transfer_hbar(&self, from: &str, to: &str, tinybars: u64) -> Result<LedgerReceipt, AppError> {
        self.submit(
            "hbar-transfer",
            json!({ "from": from, "to": to, "tinybars": tinybars.to_string() }),
        )
        .await
    }

    async fn transfer_token(
        &self,
        token_id: &str,
        from: &str,
        to: &str,
        amount: u128,
    ) -> Result<LedgerReceipt, AppError> {
        self.submit(
            "token-transfer",
            json!({ "tokenId": token_id, "from": from, "to": to, "amount": amount.to_string() }),
        )
        .await
    }

    async fn token_balance(&self, token_id: &str, account: &str) -> Result<u128, AppError> {
        let url = format!(
            "{}/accounts/{}/tokens/{}/balance",
            self.relay_url, account, token_id
        );
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| AppError::Ledger(format!("balance query failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(AppError::Ledger(format!(
                "balance query for {} returned {}",
                account,
                response.status()
            )));
        }

        let body: RelayBalance = response
            .json()
            .await
            .map_err(|e| AppError::Ledger(format!("unreadable balance response: {}", e)))?;
        Ok(body.balance)
    }

    async fn update_parameter(&self, key: &str, value: &Value) -> Result<LedgerReceipt, AppError> {
        self.submit("parameter-update", json!({ "key": key, "value": value }))
            .await
    }

    async fn register_asset_type(
        &self,
        name: &str,
        symbol: &str,
        metadata: &Value,
    ) -> Result<LedgerReceipt, AppError> {
        self.submit(
            "asset-type",
            json!({ "name": name, "symbol": symbol, "metadata": metadata }),
        )
        .await
    }

    async fn set_oracle(&self, asset_type: &str, oracle_account: &str) -> Result<LedgerReceipt, AppError> {
        self.submit(
            "oracle-update",
            json!({ "assetType": asset_type, "oracle": oracle_account }),
        )
        .await
    }

    async fn upgrade_contract(
        &self,
        contract_id: &str,
        bytecode_file_id: &str,
        version: &str,
    ) -> Result<LedgerReceipt, AppError> {
        self.submit(
            "contract-upgrade",
            json!({ "contractId": contract_id, "bytecodeFileId": bytecode_file_id, "version": version }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Path, routing::get, routing::post, Json, Router};

    async fn spawn_relay(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router.into_make_service()).await.unwrap();
        });
        format!("http://{}", addr)
    }

    fn client(relay_url: String) -> HederaClient {
        let config = HederaConfig {
            relay_url,
            network: "testnet".into(),
            operator_id: "0.0.2".into(),
            treasury_account: "0.0.3".into(),
            escrow_account: "0.0.4".into(),
            token_id: "0.0.1001".into(),
        };
        HederaClient::new(&config, Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_submit_returns_receipt() {
        let router = Router::new().route(
            "/transactions/:kind",
            post(|Path(kind): Path<String>, Json(body): Json<Value>| async move {
                assert_eq!(body["network"], "testnet");
                assert_eq!(body["transaction"]["tinybars"], "250000000");
                Json(json!({ "transactionId": format!("0.0.2@{}.1", kind.len()), "status": "SUCCESS" }))
            }),
        );
        let ledger = client(spawn_relay(router).await);

        let receipt = ledger.transfer_hbar("0.0.10", "0.0.3", 250_000_000).await.unwrap();
        assert_eq!(receipt.status, "SUCCESS");
        assert_eq!(receipt.transaction_id, "0.0.2@13.1");
    }

    #[tokio::test]
    async fn test_non_success_receipt_is_error() {
        let router = Router::new().route(
            "/transactions/:kind",
            post(|| async { Json(json!({ "transactionId": "0.0.2@1.1", "status": "INSUFFICIENT_PAYER_BALANCE" })) }),
        );
        let ledger = client(spawn_relay(router).await);

        let err = ledger
            .transfer_token("0.0.1001", "0.0.3", "0.0.10", 5)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Ledger(ref m) if m.contains("INSUFFICIENT_PAYER_BALANCE")));
    }

    #[tokio::test]
    async fn test_token_balance() {
        let router = Router::new().route(
            "/accounts/:account/tokens/:token/balance",
            get(|| async { Json(json!({ "balance": "50000000" })) }),
        );
        let ledger = client(spawn_relay(router).await);
        assert_eq!(ledger.token_balance("0.0.1001", "0.0.10").await.unwrap(), 50_000_000);
    }

    #[tokio::test]
    async fn test_account_public_key() {
        let router = Router::new().route(
            "/accounts/:account/key",
            get(|Path(account): Path<String>| async move {
                assert_eq!(account, "0.0.10");
                Json(json!({ "keyType": "ED25519", "key": "ab".repeat(32) }))
            }),
        );
        let ledger = client(spawn_relay(router).await);
        let key = ledger.account_public_key("0.0.10").await.unwrap();
        assert_eq!(key.key_type, "ED25519");
        assert_eq!(key.key.len(), 64);

        let missing = client(spawn_relay(Router::new()).await);
        let err = missing.account_public_key("0.0.10").await.unwrap_err();
        assert!(matches!(err, AppError::Ledger(ref m) if m.contains("404")));
    }

    #[tokio::test]
    async fn test_unreachable_relay_is_ledger_error() {
        let ledger = client("http://127.0.0.1:9".into());
        let err = ledger.set_oracle("REAL_ESTATE", "0.0.77").await.unwrap_err();
        assert!(matches!(err, AppError::Ledger(_)));
        assert!(!ledger.ping().await);
    }
}
