//! Output sink contract.

use crate::error::Result;

/// Append-only destination for decoded output of one media kind.
///
/// A sink can become closed without any action from the writer (the
/// downstream consumer stopped). Writers observe that as
/// [`BridgeError::SinkClosed`](crate::BridgeError::SinkClosed) and must treat
/// it as a normal end of playback.
#[async_trait::async_trait(?Send)]
pub trait MediaSink<T: 'static> {
    /// Append one item. Items are written in timestamp order.
    async fn write(&self, item: T) -> Result<()>;

    /// Close the sink. Closing a sink whose consumer already went away
    /// reports `SinkClosed`.
    async fn close(&self) -> Result<()>;

    fn is_closed(&self) -> bool;
}
