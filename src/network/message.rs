//! JSON payloads of the node HTTP interface
//!
//! The same types are used by the server handlers and by the peer client.

use crate::core::{Block, Transaction};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Header that stops a receiving node from relaying a submitted transaction
pub const NO_RELAY_HEADER: &str = "X-No-Relay";

/// `GET /status`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusResponse {
    pub node_id: String,
    pub height: u64,
}

/// `GET /block` response and `POST /block` body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockResponse {
    pub block: Block,
}

/// `GET /txpool` response and `POST /txpool` body
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TxPoolResponse {
    #[serde(default)]
    pub entries: HashMap<String, Transaction>,
}

/// `GET /balance`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BalanceResponse {
    pub address: String,
    pub balance: i64,
}

/// `POST /tx` response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubmitTxResponse {
    pub id: String,
}

/// `POST /mine` body; omitted fields fall back to node configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct MineRequest {
    pub miner: String,
    #[serde(default)]
    pub difficulty: Option<u32>,
    #[serde(default)]
    pub reward: Option<i64>,
}

/// `POST /mine` response
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MineResponse {
    pub height: u64,
    pub hash: String,
    pub transactions: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_shape() {
        let status = StatusResponse {
            node_id: "node1".into(),
            height: 3,
        };
        let json = serde_json::to_value(&status).unwrap();
        assert_eq!(json, serde_json::json!({"node_id": "node1", "height": 3}));
    }

    #[test]
    fn test_txpool_missing_entries_is_empty() {
        let pool: TxPoolResponse = serde_json::from_str("{}").unwrap();
        assert!(pool.entries.is_empty());
    }

    #[test]
    fn test_mine_request_defaults() {
        let req: MineRequest = serde_json::from_str(r#"{"miner": "bob"}"#).unwrap();
        assert_eq!(req.miner, "bob");
        assert_eq!(req.difficulty, None);
        assert_eq!(req.reward, None);
    }
}
