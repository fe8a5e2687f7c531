//! Command implementations used by the binary

pub mod commands;

pub use commands::{
    cmd_address, cmd_init, cmd_mine, cmd_serve, cmd_tx, parse_listen_addr, AppState, CliResult,
};
