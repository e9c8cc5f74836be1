use moka::sync::Cache;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use crate::models::{ConnectionId, UserId};
use crate::ws::broker::Frame;

/// What the writer task of a connection should do next
#[derive(Debug, Clone)]
pub enum Outbound {
    Frame(Frame),
    Close,
}

#[derive(Clone)]
struct ConnCtx {
    user_id: UserId,
    tx: mpsc::Sender<Outbound>,
    abort: Arc<Notify>,
}

/// The receiving half handed to a connection when it registers
pub struct Registration {
    /// Frames to write, in order
    pub outbound: mpsc::Receiver<Outbound>,
    /// Fires when the connection must stop at once, without draining
    pub aborted: Arc<Notify>,
}

/// Live streaming connections of this process, so one connection can be
/// told to close by a handler running on behalf of another (duplicate login).
///
/// Each connection has a bounded outbound queue. A client that stops reading
/// fills it, and is then aborted rather than buffered without limit.
pub struct ConnectionHub {
    conns: Cache<ConnectionId, ConnCtx>,
    queue_capacity: usize,
}

impl ConnectionHub {
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            // No size bound: dropping an entry would silently cut off a live connection
            conns: Cache::builder().build(),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Register an authenticated connection and hand back the queue its
    /// writer task drains.
    pub fn register(&self, connection_id: ConnectionId, user_id: UserId) -> Registration {
        let (tx, outbound) = mpsc::channel(self.queue_capacity);
        let aborted = Arc::new(Notify::new());
        self.conns.insert(connection_id, ConnCtx { user_id, tx, abort: aborted.clone() });
        debug!("Connection {} registered for user {}", connection_id, user_id);
        Registration { outbound, aborted }
    }

    /// Queue a frame for one connection. False when it is gone, or when its
    /// queue overflowed and it was aborted.
    pub fn send(&self, connection_id: &ConnectionId, frame: Frame) -> bool {
        let Some(ctx) = self.conns.get(connection_id) else {
            return false;
        };
        match ctx.tx.try_send(Outbound::Frame(frame)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!(
                    "Connection {} of user {} is not reading ({} frames queued), aborting it",
                    connection_id, ctx.user_id, self.queue_capacity
                );
                self.abort(connection_id, &ctx);
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }

    /// Ask a connection to close and forget it. Frames queued before this
    /// call are still written first.
    pub fn close(&self, connection_id: &ConnectionId) -> bool {
        match self.conns.remove(connection_id) {
            Some(ctx) => {
                info!("Closing connection {} of user {}", connection_id, ctx.user_id);
                match ctx.tx.try_send(Outbound::Close) {
                    Ok(()) => true,
                    Err(TrySendError::Full(_)) => {
                        ctx.abort.notify_one();
                        true
                    }
                    Err(TrySendError::Closed(_)) => false,
                }
            }
            None => false,
        }
    }

    fn abort(&self, connection_id: &ConnectionId, ctx: &ConnCtx) {
        self.conns.invalidate(connection_id);
        ctx.abort.notify_one();
    }

    pub fn remove(&self, connection_id: &ConnectionId) {
        self.conns.invalidate(connection_id);
    }

    pub fn count(&self) -> u64 {
        self.conns.run_pending_tasks();
        self.conns.entry_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use uuid::Uuid;

    #[tokio::test]
    async fn close_is_delivered_after_pending_frames() {
        let hub = ConnectionHub::new(8);
        let id = Uuid::new_v4();
        let mut reg = hub.register(id, 5);

        assert!(hub.send(&id, Arc::from("first")));
        assert!(hub.close(&id));

        assert!(matches!(reg.outbound.recv().await, Some(Outbound::Frame(f)) if &*f == "first"));
        assert!(matches!(reg.outbound.recv().await, Some(Outbound::Close)));
        assert!(!hub.send(&id, Arc::from("late")));
        assert!(!hub.close(&id));
    }

    #[tokio::test]
    async fn a_connection_that_stops_reading_is_aborted() {
        let hub = ConnectionHub::new(2);
        let id = Uuid::new_v4();
        let reg = hub.register(id, 5);

        assert!(hub.send(&id, Arc::from("a")));
        assert!(hub.send(&id, Arc::from("b")));
        assert!(!hub.send(&id, Arc::from("c")));

        tokio::time::timeout(Duration::from_secs(1), reg.aborted.notified())
            .await
            .expect("abort was not signalled");
        assert_eq!(hub.count(), 0);
        assert!(!hub.send(&id, Arc::from("d")));
    }

    #[test]
    fn count_tracks_registrations() {
        let hub = ConnectionHub::new(8);
        let a = Uuid::new_v4();
        let _reg_a = hub.register(a, 1);
        let _reg_b = hub.register(Uuid::new_v4(), 2);
        assert_eq!(hub.count(), 2);
        hub.remove(&a);
        assert_eq!(hub.count(), 1);
        assert!(!hub.send(&a, Arc::from("gone")));
    }
}
