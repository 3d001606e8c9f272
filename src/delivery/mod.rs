//! Delivery Module
//!
//! Outbound paths of the sync engine: sending messages and persisting
//! read state.

pub mod receipts;
pub mod send;

pub use receipts::ReadReceiptTracker;
pub use send::SendCoordinator;
