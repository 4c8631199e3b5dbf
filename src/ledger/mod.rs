mod client;
mod reader;
mod rpc;

#[cfg(test)]
pub mod fake;

pub use client::{AccountRelations, AccountSnapshot, Ledger, LedgerClient};
pub use reader::LedgerReader;
pub use rpc::SteemRpcClient;
