//! Projection Module
//!
//! Per-user materialized conversation state:
//!
//! - **`ledger`** - bounded memory of applied message ids
//! - **`projector`** - the synchronous reducer
//! - **`actor`** - the task that owns a projector and serializes access

pub mod actor;
pub mod ledger;
pub mod projector;

pub use actor::{ProjectorActor, ProjectorHandle};
pub use ledger::DeliveryLedger;
pub use projector::{
    ApplyEffect, ApplyReport, ConversationProjector, OpenConversation, ProjectionSnapshot, ReadBatch,
};
