// Governance routes

use super::{AdminGuard, WalletAuth};
use crate::config::GovernanceConfig;
use crate::error::AppError;
use crate::governance::{CastVoteRequest, CreateProposalRequest, ExecuteProposalRequest, StatusSweep};
use crate::models::{amount_str, Proposal, ProposalStatus};
use crate::AppState;
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/api/governance/proposals", get(list_proposals).post(create_proposal))
        .route("/api/governance/proposals/:id", get(get_proposal))
        .route("/api/governance/proposals/:id/vote", post(cast_vote))
        .route("/api/governance/proposals/:id/execute", post(execute_proposal))
        .route("/api/governance/update-statuses", post(update_statuses))
        .route("/api/governance/voting-power/:wallet", get(voting_power))
        .route("/api/governance/config", get(get_config).put(replace_config))
}

#[derive(Debug, Deserialize)]
struct ProposalFilter {
    status: Option<ProposalStatus>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct VotingPower {
    wallet_address: String,
    #[serde(with = "amount_str")]
    voting_power: u128,
}

async fn list_proposals(
    State(state): State<Arc<AppState>>,
    Query(filter): Query<ProposalFilter>,
) -> Result<Json<Vec<Proposal>>, AppError> {
    Ok(Json(state.governance.list_proposals(filter.status).await?))
}

async fn create_proposal(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateProposalRequest>,
) -> Result<(StatusCode, Json<Proposal>), AppError> {
    auth.require(&req.proposer)?;
    let proposal = state.governance.create_proposal(req, Utc::now()).await?;
    Ok((StatusCode::CREATED, Json(proposal)))
}

async fn get_proposal(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Proposal>, AppError> {
    Ok(Json(state.governance.get_proposal(id).await?))
}

async fn cast_vote(
    auth: WalletAuth,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<CastVoteRequest>,
) -> Result<Json<Proposal>, AppError> {
    auth.require(&req.voter)?;
    Ok(Json(state.governance.cast_vote(id, req, Utc::now()).await?))
}

async fn execute_proposal(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(req): Json<ExecuteProposalRequest>,
) -> Result<Json<Proposal>, AppError> {
    let proposal = state
        .governance
        .execute_proposal(id, &req.executor, Utc::now())
        .await?;
    Ok(Json(proposal))
}

async fn update_statuses(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
) -> Result<Json<StatusSweep>, AppError> {
    Ok(Json(state.governance.update_proposal_statuses(Utc::now()).await?))
}

async fn voting_power(
    State(state): State<Arc<AppState>>,
    Path(wallet): Path<String>,
) -> Result<Json<VotingPower>, AppError> {
    let voting_power = state.governance.voting_power(&wallet).await?;
    Ok(Json(VotingPower {
        wallet_address: wallet,
        voting_power,
    }))
}

async fn get_config(State(state): State<Arc<AppState>>) -> Json<GovernanceConfig> {
    Json(state.governance.config().as_ref().clone())
}

async fn replace_config(
    _admin: AdminGuard,
    State(state): State<Arc<AppState>>,
    Json(config): Json<GovernanceConfig>,
) -> Result<Json<GovernanceConfig>, AppError> {
    let config = state.governance.replace_config(config)?;
    Ok(Json(config.as_ref().clone()))
}

#[cfg(test)]
mod tests {
    use super::super::tests::{admin_req, auth_req, get_req, json_req, send};
    use crate::testing::{seed_user, TestApp};
    use axum::http::StatusCode;
    use chrono::Utc;
    use serde_json::json;

    const PROPOSER: &str = "0.0.7001";
    const WHALE: &str = "0.0.7002";

    fn proposal_body() -> serde_json::Value {
        json!({
            "proposer": PROPOSER,
            "proposalType": "PARAMETER_CHANGE",
            "title": "Raise the escrow fee",
            "description": "Escrow fee to 0.75%",
            "parameters": { "parameter": "escrowFeeBps", "value": 75 },
            "votingDurationDays": 7
        })
    }

    #[tokio::test]
    async fn test_proposal_lifecycle_over_http() {
        let app = TestApp::new();
        let now = Utc::now();
        seed_user(app.store.as_ref(), PROPOSER, 15_000, now).await;
        seed_user(app.store.as_ref(), WHALE, 50_000_000, now).await;
        let proposer = app.login(PROPOSER).await;
        let whale = app.login(WHALE).await;

        let (status, _) = send(&app, json_req("POST", "/api/governance/proposals", proposal_body())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, proposal) = send(&app, auth_req("POST", "/api/governance/proposals", &proposer, proposal_body())).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(proposal["status"], "ACTIVE");
        assert_eq!(proposal["quorumRequired"], "40000000");
        let id = proposal["id"].as_str().unwrap().to_string();

        let vote_uri = format!("/api/governance/proposals/{}/vote", id);
        // Voting with someone else's weight
        let (status, _) = send(&app, auth_req("POST", &vote_uri, &proposer, json!({ "voter": WHALE, "choice": "AGAINST" }))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, proposal) = send(&app, auth_req("POST", &vote_uri, &whale, json!({ "voter": WHALE, "choice": "FOR" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(proposal["votesFor"], "50000000");
        assert_eq!(proposal["totalVotes"], "50000000");

        let (status, _) = send(&app, auth_req("POST", &vote_uri, &whale, json!({ "voter": WHALE, "choice": "AGAINST" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (_, listed) = send(&app, get_req("/api/governance/proposals?status=ACTIVE")).await;
        assert_eq!(listed.as_array().unwrap().len(), 1);
        let (_, listed) = send(&app, get_req("/api/governance/proposals?status=PASSED")).await;
        assert!(listed.as_array().unwrap().is_empty());

        // Still voting, so nothing to execute
        let (status, _) = send(
            &app,
            admin_req(
                "POST",
                &format!("/api/governance/proposals/{}/execute", id),
                json!({ "executor": WHALE }),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);

        let (status, sweep) = send(&app, admin_req("POST", "/api/governance/update-statuses", json!({}))).await;
        assert_eq!(status, StatusCode::OK);
        assert!(sweep["passed"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_proposal_errors() {
        let app = TestApp::new();
        seed_user(app.store.as_ref(), PROPOSER, 500, Utc::now()).await;
        let proposer = app.login(PROPOSER).await;

        let (status, body) = send(&app, auth_req("POST", "/api/governance/proposals", &proposer, proposal_body())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());

        let (status, _) = send(
            &app,
            get_req("/api/governance/proposals/6f1c1a44-5a6e-4b43-9a8c-2f0f3f1f2b11"),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_voting_power() {
        let app = TestApp::new();
        seed_user(app.store.as_ref(), WHALE, 123_456, Utc::now()).await;
        let (status, body) = send(&app, get_req(&format!("/api/governance/voting-power/{}", WHALE))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["votingPower"], "123456");

        let (_, body) = send(&app, get_req("/api/governance/voting-power/0.0.1")).await;
        assert_eq!(body["votingPower"], "0");
    }

    #[tokio::test]
    async fn test_config_read_and_replace() {
        let app = TestApp::new();
        let (status, mut config) = send(&app, get_req("/api/governance/config")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(config["quorumPercentage"], 20);

        config["quorumPercentage"] = json!(30);
        let (status, _) = send(&app, json_req("PUT", "/api/governance/config", config.clone())).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);

        let (status, updated) = send(&app, admin_req("PUT", "/api/governance/config", config.clone())).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(updated["quorumPercentage"], 30);

        config["quorumPercentage"] = json!(0);
        let (status, _) = send(&app, admin_req("PUT", "/api/governance/config", config.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        config["quorumPercentage"] = json!(30);
        config["maxVotingDays"] = json!(u32::MAX);
        let (status, body) = send(&app, admin_req("PUT", "/api/governance/config", config.clone())).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].as_str().unwrap().contains("maxVotingDays"));

        config["maxVotingDays"] = json!(30);
        config["executionWindowSecs"] = json!(i64::MAX);
        let (status, _) = send(&app, admin_req("PUT", "/api/governance/config", config)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (_, summary) = send(&app, get_req("/api/tokenomics/summary")).await;
        assert_eq!(summary["governance"]["quorumPercentage"], 30);
    }
}
