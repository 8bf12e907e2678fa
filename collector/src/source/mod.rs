//! Sources of new-block notifications.
//!
//! A source pushes [`crate::types::RootChainInfo`] values into the channel
//! consumed by [`crate::collector::Collector::run`].

pub mod rpc;

pub use rpc::{HEIGHT_PATH, RootChainPoller, SourceError};
