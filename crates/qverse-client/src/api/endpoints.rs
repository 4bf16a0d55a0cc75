//! Typed helpers for the backend's REST routes
//!
//! # Routes
//! - Users & wallets: POST /users, GET /wallets/{id}/balance/{token},
//!   GET /wallets/{id}/transactions
//! - Exchange: POST /exchange/swap, GET /exchange/pools, POST /exchange/orders,
//!   GET /exchange/orderbook/{pair}
//! - Bridge: POST /bridge/transfer
//! - Oracle: GET /oracle/price/{token}
//! - Governance: GET /governance/proposals, POST /governance/proposal,
//!   POST /governance/vote
//! - Yield: GET /yield/pools, POST /yield/stake
//! - Batch: POST /batch/transfer, POST /batch/swap
//! - Ops: GET /metrics, GET /health, GET /network/status
//!
//! Path segments are inserted verbatim; callers pass identifiers, not user text.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::info;

use super::ApiClient;
use crate::error::Result;
use crate::types::PriceQuote;

impl ApiClient {
    pub async fn create_user(&self, username: &str) -> Result<Value> {
        self.post("/users", &json!({ "username": username })).await
    }

    pub async fn get_balance(&self, wallet_id: &str, token: &str) -> Result<Value> {
        self.get(&format!("/wallets/{}/balance/{}", wallet_id, token)).await
    }

    pub async fn get_transactions(&self, wallet_id: &str) -> Result<Value> {
        self.get(&format!("/wallets/{}/transactions", wallet_id)).await
    }

    pub async fn swap<B: Serialize + ?Sized>(&self, request: &B) -> Result<Value> {
        self.post("/exchange/swap", request).await
    }

    pub async fn get_pools(&self) -> Result<Value> {
        self.get("/exchange/pools").await
    }

    pub async fn create_order<B: Serialize + ?Sized>(&self, order: &B) -> Result<Value> {
        self.post("/exchange/orders", order).await
    }

    /// `pair` like `QVR-POPEO`
    pub async fn get_orderbook(&self, pair: &str) -> Result<Value> {
        self.get(&format!("/exchange/orderbook/{}", pair)).await
    }

    pub async fn bridge<B: Serialize + ?Sized>(&self, transfer: &B) -> Result<Value> {
        self.post("/bridge/transfer", transfer).await
    }

    pub async fn get_price(&self, token: &str) -> Result<PriceQuote> {
        self.get(&format!("/oracle/price/{}", token)).await
    }

    pub async fn get_proposals(&self) -> Result<Value> {
        self.get("/governance/proposals").await
    }

    pub async fn create_proposal<B: Serialize + ?Sized>(&self, proposal: &B) -> Result<Value> {
        self.post("/governance/proposal", proposal).await
    }

    pub async fn vote<B: Serialize + ?Sized>(&self, vote: &B) -> Result<Value> {
        self.post("/governance/vote", vote).await
    }

    pub async fn get_yield_pools(&self) -> Result<Value> {
        self.get("/yield/pools").await
    }

    pub async fn stake_yield<B: Serialize + ?Sized>(&self, stake: &B) -> Result<Value> {
        self.post("/yield/stake", stake).await
    }

    pub async fn batch_transfer<B: Serialize + ?Sized>(&self, batch: &B) -> Result<Value> {
        self.post("/batch/transfer", batch).await
    }

    pub async fn batch_swap<B: Serialize + ?Sized>(&self, batch: &B) -> Result<Value> {
        self.post("/batch/swap", batch).await
    }

    pub async fn get_metrics(&self) -> Result<Value> {
        self.get("/metrics").await
    }

    pub async fn network_status(&self) -> Result<Value> {
        self.get("/network/status").await
    }

    /// GET /health with the client's retry budget
    pub async fn health_check(&self) -> Result<Value> {
        info!("Checking API health at {}", self.base_url());
        let status = self.get("/health").await?;
        info!("API health: OK");
        Ok(status)
    }
}
