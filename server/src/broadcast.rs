//! Snapshot fan-out
//!
//! The coordinator publishes one snapshot per tick into a `watch` channel.
//! Every joined connection holds a receiver and sends whatever is newest when
//! it gets around to it, so a slow client skips stale snapshots instead of
//! queueing them, and publishing never waits on anyone.

use shared::protocol::encode_snapshot;
use shared::Snapshot;
use std::sync::Arc;
use tokio::sync::watch;
use tokio_tungstenite::tungstenite::Utf8Bytes;

/// A snapshot together with its encoded GAME_STATE frame
#[derive(Debug)]
pub struct SnapshotFrame {
    pub snapshot: Arc<Snapshot>,
    pub text: Utf8Bytes,
}

pub type SnapshotReceiver = watch::Receiver<Option<Arc<SnapshotFrame>>>;

#[derive(Debug)]
pub struct SnapshotBroadcaster {
    tx: watch::Sender<Option<Arc<SnapshotFrame>>>,
}

impl SnapshotBroadcaster {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(None);
        Self { tx }
    }

    pub fn subscribe(&self) -> SnapshotReceiver {
        self.tx.subscribe()
    }

    /// Encodes the snapshot once and replaces whatever was published before.
    pub fn publish(&self, snapshot: Arc<Snapshot>) -> Arc<SnapshotFrame> {
        let frame = Arc::new(SnapshotFrame {
            text: Utf8Bytes::from(encode_snapshot(&snapshot)),
            snapshot,
        });
        self.tx.send_replace(Some(Arc::clone(&frame)));
        frame
    }

    pub fn latest(&self) -> Option<Arc<SnapshotFrame>> {
        self.tx.borrow().clone()
    }

    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for SnapshotBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}
