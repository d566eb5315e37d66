//! C11 — Channel Adapter Shell.
//!
//! The minimal contract a channel integration must honour, expressed as a
//! static trait plus a [`ChannelAdapterDyn`] companion for object-safe
//! storage — grounded on the `Messaging`/`MessagingDyn` pair in the
//! teacher's `messaging/traits.rs`.

pub mod telegram;

use crate::error::Result;
use std::future::Future;
use std::pin::Pin;

/// One channel-specific worker process's contract: run until a shutdown or
/// restart control command is observed. `true` means the caller should
/// bootstrap a fresh adapter and call [`ChannelAdapter::run`] again; `false`
/// means exit cleanly.
pub trait ChannelAdapter: Send + Sync + 'static {
    fn integration_type(&self) -> &'static str;

    fn run(&self, agent_id: &str) -> impl Future<Output = Result<bool>> + Send;
}

/// Object-safe companion, for code that needs `Arc<dyn ChannelAdapterDyn>`
/// rather than a concrete adapter type.
pub trait ChannelAdapterDyn: Send + Sync + 'static {
    fn integration_type(&self) -> &'static str;

    fn run<'a>(&'a self, agent_id: &'a str) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>>;
}

impl<T: ChannelAdapter> ChannelAdapterDyn for T {
    fn integration_type(&self) -> &'static str {
        ChannelAdapter::integration_type(self)
    }

    fn run<'a>(&'a self, agent_id: &'a str) -> Pin<Box<dyn Future<Output = Result<bool>> + Send + 'a>> {
        Box::pin(ChannelAdapter::run(self, agent_id))
    }
}
