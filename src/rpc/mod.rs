//! Chain RPC access
//!
//! - [`transport`]: a single endpoint on an ethers HTTP provider
//! - [`failover`]: primary + backup endpoints behind one client with retry

pub mod failover;
pub mod transport;

pub use failover::{gwei_to_wei, wei_to_gwei, GasCheck, ProviderFailover};
pub use transport::{HttpTransport, RpcTransport};
