//! Correlation of requests sent to one player with the frame they answer with.
//!
//! A caller registers a one-shot waiter for "the next frame from player N
//! carrying chunk kind C", sends its [`Request`](ghostnet_proto::Request),
//! and awaits the receiver with a timeout. The dispatcher calls
//! [`SessionQueries::resolve`] for every parsed frame. The returned
//! [`QueryGuard`] removes the waiter when dropped, whatever the outcome.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use ghostnet_proto::{Chunk, Frame};
use tokio::sync::oneshot;

#[derive(Debug)]
struct Waiter {
    target: u32,
    chunk: &'static str,
    tx: oneshot::Sender<Frame>,
}

/// Outstanding cross-player queries, keyed by a unique token.
#[derive(Debug, Clone, Default)]
pub struct SessionQueries {
    waiters: Arc<DashMap<u64, Waiter>>,
    next_token: Arc<AtomicU64>,
}

impl SessionQueries {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for the next frame from `target` that carries chunk kind `C`.
    pub fn register<C: Chunk>(&self, target: u32) -> (QueryGuard, oneshot::Receiver<Frame>) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.insert(
            token,
            Waiter {
                target,
                chunk: C::ID,
                tx,
            },
        );
        let guard = QueryGuard {
            token,
            waiters: Arc::clone(&self.waiters),
        };
        (guard, rx)
    }

    /// Hands `frame` to every waiter it answers. Returns how many it woke.
    pub fn resolve(&self, from: u32, frame: &Frame) -> usize {
        if self.waiters.is_empty() {
            return 0;
        }

        // Collect first: removing while iterating would deadlock the shard.
        let answered: Vec<u64> = self
            .waiters
            .iter()
            .filter(|entry| entry.target == from && frame.contains(entry.chunk))
            .map(|entry| *entry.key())
            .collect();

        answered
            .into_iter()
            .filter_map(|token| self.waiters.remove(&token))
            .map(|(_, waiter)| waiter.tx.send(frame.clone()).is_ok())
            .filter(|sent| *sent)
            .count()
    }

    /// Fails every query aimed at `target`, e.g. because it disconnected.
    pub fn forget_target(&self, target: u32) {
        self.waiters.retain(|_, waiter| waiter.target != target);
    }

    /// Fails every outstanding query.
    pub fn clear(&self) {
        self.waiters.clear();
    }

    pub fn len(&self) -> usize {
        self.waiters.len()
    }

    pub fn is_empty(&self) -> bool {
        self.waiters.is_empty()
    }
}

/// Removes its waiter on drop.
#[derive(Debug)]
pub struct QueryGuard {
    token: u64,
    waiters: Arc<DashMap<u64, Waiter>>,
}

impl Drop for QueryGuard {
    fn drop(&mut self) {
        self.waiters.remove(&self.token);
    }
}
