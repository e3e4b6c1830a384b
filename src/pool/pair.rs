//! Constant-product pair contract access
//!
//! Reads `getReserves()` through eth_call and decodes `Swap` logs with
//! `ethers::abi`.

use async_trait::async_trait;
use ethers::abi::{self, ParamType, Token};
use ethers::types::{Address, Bytes, Log, TxHash, H256, U256};
use ethers::utils::{id, keccak256};
use serde::Serialize;
use std::sync::Arc;

use crate::error::RpcError;
use crate::rpc::ProviderFailover;

pub const GET_RESERVES_SIGNATURE: &str = "getReserves()";
pub const SWAP_EVENT_SIGNATURE: &str = "Swap(address,uint256,uint256,uint256,uint256,address)";

/// First topic of every `Swap` log
pub fn swap_topic() -> H256 {
    H256::from(keccak256(SWAP_EVENT_SIGNATURE))
}

/// Calldata for `getReserves()`
pub fn get_reserves_calldata() -> Bytes {
    Bytes::from(id(GET_RESERVES_SIGNATURE).to_vec())
}

/// Lossy conversion for ratios and gauges
pub fn u256_to_f64(value: U256) -> f64 {
    value
        .0
        .iter()
        .rev()
        .fold(0.0, |acc, limb| acc * 18_446_744_073_709_551_616.0 + *limb as f64)
}

/// Raw pool reserves as returned by the pair contract
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Reserves {
    pub reserve_base: U256,
    pub reserve_quote: U256,
    pub block_timestamp_last: u32,
}

/// Anything able to report current pool reserves
#[async_trait]
pub trait ReserveSource: Send + Sync {
    async fn get_reserves(&self) -> Result<Reserves, RpcError>;
}

/// A swap observed on the pool
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SwapEvent {
    pub sender: Address,
    pub amount_base_in: U256,
    pub amount_quote_in: U256,
    pub amount_base_out: U256,
    pub amount_quote_out: U256,
    pub recipient: Address,
    pub block_number: Option<u64>,
    pub tx_hash: Option<TxHash>,
}

/// Pair contract read through a chain's failover client
#[derive(Debug, Clone)]
pub struct PairContract {
    address: Address,
    provider: Arc<ProviderFailover>,
}

impl PairContract {
    pub fn new(address: Address, provider: Arc<ProviderFailover>) -> Self {
        Self { address, provider }
    }

    pub fn address(&self) -> Address {
        self.address
    }

    pub fn provider(&self) -> &Arc<ProviderFailover> {
        &self.provider
    }
}

#[async_trait]
impl ReserveSource for PairContract {
    async fn get_reserves(&self) -> Result<Reserves, RpcError> {
        let data = self
            .provider
            .call(self.address, get_reserves_calldata())
            .await?;
        decode_reserves(&data)
    }
}

/// Decode the `(uint112, uint112, uint32)` return data of `getReserves()`
pub fn decode_reserves(data: &[u8]) -> Result<Reserves, RpcError> {
    let tokens = abi::decode(
        &[ParamType::Uint(112), ParamType::Uint(112), ParamType::Uint(32)],
        data,
    )
    .map_err(|e| RpcError::malformed(format!("getReserves data: {}", e)))?;

    let words = uints(tokens);
    let &[reserve_base, reserve_quote, timestamp] = words.as_slice() else {
        return Err(RpcError::malformed("getReserves returned non-integer words"));
    };

    Ok(Reserves {
        reserve_base,
        reserve_quote,
        block_timestamp_last: timestamp.low_u32(),
    })
}

/// Decode a `Swap` log as delivered by a log subscription
pub fn decode_swap_log(log: &Log) -> Result<SwapEvent, RpcError> {
    match log.topics.first() {
        Some(topic) if *topic == swap_topic() => {}
        other => {
            return Err(RpcError::malformed(format!("not a Swap log: {:?}", other)));
        }
    }
    if log.topics.len() < 3 {
        return Err(RpcError::malformed("Swap log missing indexed topics"));
    }

    let tokens = abi::decode(&vec![ParamType::Uint(256); 4], &log.data)
        .map_err(|e| RpcError::malformed(format!("Swap data: {}", e)))?;
    let amounts = uints(tokens);
    let &[amount_base_in, amount_quote_in, amount_base_out, amount_quote_out] =
        amounts.as_slice()
    else {
        return Err(RpcError::malformed("Swap data has non-integer words"));
    };

    Ok(SwapEvent {
        sender: Address::from(log.topics[1]),
        amount_base_in,
        amount_quote_in,
        amount_base_out,
        amount_quote_out,
        recipient: Address::from(log.topics[2]),
        block_number: log.block_number.map(|n| n.as_u64()),
        tx_hash: log.transaction_hash,
    })
}

fn uints(tokens: Vec<Token>) -> Vec<U256> {
    tokens.into_iter().filter_map(Token::into_uint).collect()
}
