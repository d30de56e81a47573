//! Connection handles and outbound frames.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use crate::core::Identity;
use crate::store::LogCursor;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique id of one attached client.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A message serialized once and shared by every recipient.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// JSON text to write.
    pub text: Arc<str>,
    /// Log position of the persisted event this frame mirrors, if any.
    pub cursor: Option<LogCursor>,
}

impl OutboundFrame {
    /// Serialize `message` into a frame.
    pub fn encode<T: Serialize>(message: &T, cursor: Option<LogCursor>) -> Result<Self, serde_json::Error> {
        Ok(Self {
            text: serde_json::to_string(message)?.into(),
            cursor,
        })
    }
}

/// Why a frame could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum DeliveryFailure {
    /// Queue at capacity: the client is not keeping up.
    Full,
    /// Writer already gone.
    Closed,
}

/// Hub-side end of one client's outbound queue.
///
/// Not `Clone`: the hub holding the handle is the only producer, so dropping
/// it closes the queue and ends the client's writer.
#[derive(Debug)]
pub struct ConnectionHandle {
    id: ConnectionId,
    identity: Identity,
    outbound: mpsc::Sender<OutboundFrame>,
}

impl ConnectionHandle {
    /// Create a handle with a bounded queue of `capacity` frames, returning
    /// the receiving end for the writer.
    pub fn channel(identity: Identity, capacity: usize) -> (Self, mpsc::Receiver<OutboundFrame>) {
        let (outbound, rx) = mpsc::channel(capacity.max(1));
        let handle = Self {
            id: ConnectionId::next(),
            identity,
            outbound,
        };
        (handle, rx)
    }

    /// Connection id.
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Identity the connection was admitted with.
    pub fn identity(&self) -> &Identity {
        &self.identity
    }

    /// Queue a frame without waiting.
    pub(crate) fn try_deliver(&self, frame: OutboundFrame) -> Result<(), DeliveryFailure> {
        self.outbound.try_send(frame).map_err(|e| match e {
            TrySendError::Full(_) => DeliveryFailure::Full,
            TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::UserId;

    fn identity() -> Identity {
        Identity::new(UserId(7), "Ada")
    }

    #[test]
    fn test_ids_are_unique() {
        let (a, _ra) = ConnectionHandle::channel(identity(), 4);
        let (b, _rb) = ConnectionHandle::channel(identity(), 4);
        assert_ne!(a.id(), b.id());
    }

    #[test]
    fn test_full_and_closed_queues() {
        let (handle, mut rx) = ConnectionHandle::channel(identity(), 1);
        let frame = OutboundFrame::encode(&"x", None).unwrap();

        assert_eq!(handle.try_deliver(frame.clone()), Ok(()));
        assert_eq!(handle.try_deliver(frame.clone()), Err(DeliveryFailure::Full));

        rx.close();
        assert_eq!(handle.try_deliver(frame), Err(DeliveryFailure::Closed));
    }

    #[tokio::test]
    async fn test_dropping_handle_closes_queue() {
        let (handle, mut rx) = ConnectionHandle::channel(identity(), 4);
        handle.try_deliver(OutboundFrame::encode(&"last", None).unwrap()).unwrap();
        drop(handle);

        assert_eq!(&*rx.recv().await.unwrap().text, "\"last\"");
        assert!(rx.recv().await.is_none());
    }
}
