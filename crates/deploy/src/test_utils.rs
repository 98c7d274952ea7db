//! Shared fixtures for unit tests.

use alloy_core::primitives::Address;

use crate::{
    artifact::{Artifact, ArtifactSet},
    ledger::InMemoryLedger,
};

pub const ORDER_SET: &str = "IterableOrderedOrderSet";
pub const AUCTION: &str = "NFTAuction";
pub const PROXY: &str = "Proxy";

pub fn sender() -> Address {
    Address::repeat_byte(0x11)
}

pub fn ledger() -> InMemoryLedger {
    InMemoryLedger::new(sender())
}

/// Truffle-style inline placeholder for `library`.
pub fn placeholder(library: &str) -> String {
    format!("{:_<40}", format!("__{library}"))
}

pub fn auction_bytecode_hex() -> String {
    format!("0x6080{}6000f3", placeholder(ORDER_SET))
}

pub fn order_set_json() -> String {
    serde_json::json!({
        "contractName": ORDER_SET,
        "abi": [],
        "bytecode": "0x6080604052348015600f57600080fd5b50"
    })
    .to_string()
}

pub fn auction_json() -> String {
    serde_json::json!({
        "contractName": AUCTION,
        "abi": [
            {
                "type": "function",
                "name": "initialize",
                "inputs": [],
                "outputs": [],
                "stateMutability": "nonpayable"
            },
            {
                "type": "function",
                "name": "placeBid",
                "inputs": [{ "name": "amount", "type": "uint256", "internalType": "uint256" }],
                "outputs": [],
                "stateMutability": "payable"
            }
        ],
        "bytecode": auction_bytecode_hex()
    })
    .to_string()
}

pub fn proxy_json() -> String {
    serde_json::json!({
        "contractName": PROXY,
        "abi": [
            {
                "type": "constructor",
                "inputs": [
                    { "name": "_logic", "type": "address", "internalType": "address" },
                    { "name": "_data", "type": "bytes", "internalType": "bytes" }
                ],
                "stateMutability": "payable"
            }
        ],
        "bytecode": "0x608060405260405161"
    })
    .to_string()
}

pub fn order_set() -> Artifact {
    Artifact::from_json(&order_set_json(), ORDER_SET).expect("order set fixture")
}

pub fn auction() -> Artifact {
    Artifact::from_json(&auction_json(), AUCTION).expect("auction fixture")
}

pub fn proxy() -> Artifact {
    Artifact::from_json(&proxy_json(), PROXY).expect("proxy fixture")
}

pub fn artifacts() -> ArtifactSet {
    ArtifactSet::from_artifacts([order_set(), auction(), proxy()])
}
