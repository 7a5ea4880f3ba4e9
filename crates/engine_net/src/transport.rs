//! The transport capability consumed by the reconciliation engine.
//!
//! A transport moves opaque byte chunks between two replicas. How it is
//! established (channel, socket, shared memory) is up to the implementor;
//! the engine only sends encoded frames and drains whatever has arrived.

use futures::FutureExt;
use futures::future::BoxFuture;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::sync::mpsc::error::TryRecvError;
use tracing::debug;

use crate::error::NetError;
use crate::messages::CrdtMessage;

/// A bidirectional byte channel to one remote replica.
pub trait Transport: Send {
    /// A short name for logs.
    fn name(&self) -> &str;

    /// Send a buffer of concatenated frames.
    ///
    /// # Errors
    ///
    /// Returns a [`NetError`] if the buffer could not be handed to the peer.
    fn send(&mut self, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), NetError>>;

    /// Drain the chunks that have arrived since the previous call.
    ///
    /// Chunks need not align with frame boundaries. Resolves with an empty
    /// list when nothing is pending.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::Disconnected`] once the peer is gone and every
    /// chunk it sent has been drained.
    fn receive(&mut self) -> BoxFuture<'_, Result<Vec<Vec<u8>>, NetError>>;

    /// Whether `message` should be sent over this transport at all.
    fn filter(&self, _message: &CrdtMessage) -> bool {
        true
    }
}

/// One end of an in-process transport backed by unbounded tokio channels.
#[derive(Debug)]
pub struct ChannelTransport {
    name: String,
    tx: UnboundedSender<Vec<u8>>,
    rx: UnboundedReceiver<Vec<u8>>,
}

impl ChannelTransport {
    /// Create two connected ends. What one end sends, the other receives.
    #[must_use]
    pub fn pair(a: impl Into<String>, b: impl Into<String>) -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::unbounded_channel();
        let (b_tx, a_rx) = mpsc::unbounded_channel();
        (
            Self {
                name: a.into(),
                tx: a_tx,
                rx: a_rx,
            },
            Self {
                name: b.into(),
                tx: b_tx,
                rx: b_rx,
            },
        )
    }

    fn drain(&mut self) -> Result<Vec<Vec<u8>>, NetError> {
        let mut chunks = Vec::new();
        loop {
            match self.rx.try_recv() {
                Ok(chunk) => chunks.push(chunk),
                Err(TryRecvError::Empty) => return Ok(chunks),
                Err(TryRecvError::Disconnected) if chunks.is_empty() => {
                    return Err(NetError::Disconnected(self.name.clone()));
                }
                Err(TryRecvError::Disconnected) => return Ok(chunks),
            }
        }
    }
}

impl Transport for ChannelTransport {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&mut self, bytes: Vec<u8>) -> BoxFuture<'_, Result<(), NetError>> {
        let result = self
            .tx
            .send(bytes)
            .map_err(|_| NetError::Disconnected(self.name.clone()));
        async move { result }.boxed()
    }

    fn receive(&mut self) -> BoxFuture<'_, Result<Vec<Vec<u8>>, NetError>> {
        let result = self.drain();
        if let Ok(chunks) = &result
            && !chunks.is_empty()
        {
            debug!(transport = self.name, chunks = chunks.len(), "drained inbound chunks");
        }
        async move { result }.boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pair_delivers_in_order() {
        let (mut a, mut b) = ChannelTransport::pair("a", "b");
        a.send(vec![1]).await.unwrap();
        a.send(vec![2, 3]).await.unwrap();
        assert_eq!(b.receive().await.unwrap(), vec![vec![1], vec![2, 3]]);
        assert!(b.receive().await.unwrap().is_empty());
        assert!(a.receive().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_buffered_chunks_survive_disconnect() {
        let (mut a, mut b) = ChannelTransport::pair("a", "b");
        a.send(vec![7]).await.unwrap();
        drop(a);
        assert_eq!(b.receive().await.unwrap(), vec![vec![7]]);
        assert!(matches!(b.receive().await, Err(NetError::Disconnected(name)) if name == "b"));
        assert!(b.send(vec![1]).await.is_err());
    }

    #[test]
    fn test_default_filter_accepts_everything() {
        let (a, _b) = ChannelTransport::pair("a", "b");
        let message = CrdtMessage::DeleteEntity {
            entity: engine_component::Entity::ROOT,
        };
        assert!(a.filter(&message));
        assert_eq!(a.name(), "a");
    }
}
