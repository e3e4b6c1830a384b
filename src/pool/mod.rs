//! Pool observation
//!
//! - [`pair`]: pair contract reads and Swap log decoding
//! - [`subscription`]: websocket Swap listener with reconnect
//! - [`price_feed`]: breaker-protected per-chain price

pub mod pair;
pub mod price_feed;
pub mod subscription;

pub use pair::{
    decode_reserves, decode_swap_log, get_reserves_calldata, swap_topic, u256_to_f64,
    PairContract, ReserveSource, Reserves, SwapEvent,
};
pub use price_feed::{PoolState, PriceFeed, SubscriptionHandle};
pub use subscription::{ws_url_from_rpc, SubscriptionConfig};
