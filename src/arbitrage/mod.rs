//! Opportunity detection and serialized execution

pub mod coordinator;
pub mod executor;
pub mod opportunity;

pub use coordinator::{
    ChainLeg, CheckOutcome, CoordinatorConfig, ExecutionCoordinator, ExecutionHandle,
    ExecutionOutcome, ExecutionRecord,
};
pub use executor::{
    PaperExecutor, PendingTrade, SimulationResult, TradeExecutor, TradeReceipt, TradeSettings,
};
pub use opportunity::{Direction, Opportunity};
