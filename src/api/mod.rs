//! HTTP interface of a node
//!
//! # Endpoints
//!
//! ## Chain
//! - `GET /status` - `{node_id, height}`
//! - `GET /block?height=N` - `{block}`, 404 if absent
//! - `POST /block` - push `{block}` through acceptance (204, or 400 on rejection)
//!
//! ## Transactions
//! - `GET /txpool` - `{entries}`
//! - `POST /txpool` - replace the pool wholesale
//! - `POST /tx` - submit one transaction (201), relayed one hop unless `X-No-Relay` is set
//!
//! ## Queries and mining
//! - `GET /balance?addr=A` - `{address, balance}`
//! - `POST /mine` - mine one block locally

pub mod handlers;
pub mod routes;

pub use handlers::{ApiError, ApiState};
pub use routes::create_router;
