//! Core types for the Tendermint consensus model.
//!
//! This crate provides the foundational types used throughout the model:
//!
//! - **Identifiers**: [`NodeId`], [`Value`], [`ValueId`], [`Round`]
//! - **Protocol types**: [`Message`], [`Stage`], [`TimeoutEvent`]
//! - **Configuration**: [`ModelConfig`] and its validation errors
//!
//! # Design Philosophy
//!
//! This crate is self-contained with minimal dependencies. It does not depend
//! on any other workspace crates, making it the foundation layer.
//!
//! Everything here is plain data: small `Copy` newtypes over interned names,
//! an `Ord` message union so messages can live in ordered sets, and a
//! validated configuration object that answers the derived queries the
//! protocol needs (proposer schedule, quorum size, the valid-value set).

mod config;
mod identifiers;
mod message;
mod timeout;

pub use config::{ConfigError, ModelConfig};
pub use identifiers::{NodeId, Round, Value, ValueId, NIL_ROUND};
pub use message::{Message, MessageKind, Stage};
pub use timeout::{TimeoutEvent, TimeoutKind};
