// Signal handling, order placement and trailing-stop management
pub mod order_controller;
pub mod position_tracker;
pub mod price_feed;
pub mod pricing;
pub mod signal_dispatcher;
pub mod trade_manager;
pub mod trailing_monitor;

pub use order_controller::{LifecycleAction, LifecycleOutcome, OrderController};
pub use position_tracker::PositionTracker;
pub use price_feed::{run_price_stream, PriceFeed};
pub use pricing::{TargetPriceCalculator, TargetPrices};
pub use signal_dispatcher::SignalDispatcher;
pub use trade_manager::TradeManager;
pub use trailing_monitor::{PositionReport, TrailingMonitor};
