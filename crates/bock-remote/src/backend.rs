//! Callbacks from the runtime client into the engine.

use async_trait::async_trait;
use bock_common::BockResult;

use crate::event::LifecycleEvent;
use crate::pipes::IoPipe;

/// The engine side of the runtime client.
///
/// The client calls [`Backend::attach_streams`] once per started process,
/// before reporting it as started, and [`Backend::state_changed`] for every
/// lifecycle event. Both may be called concurrently for different ids.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Apply a lifecycle event to container `id`.
    async fn state_changed(&self, id: &str, event: LifecycleEvent) -> BockResult<()>;

    /// Wire the I/O of container or exec session `id` to `pipes`.
    async fn attach_streams(&self, id: &str, pipes: IoPipe) -> BockResult<()>;
}
