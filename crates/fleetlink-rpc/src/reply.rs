//! Deferred results that tolerate outcomes nobody is waiting for.
//!
//! A [`LazyReply`] registers its waker only when first polled. An outcome
//! delivered earlier is kept and returned on that first poll; an outcome
//! delivered to a reply that was dropped unpolled is discarded quietly.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, Waker};

use serde_json::Value;

use crate::error::{Result, RpcError};

#[derive(Default)]
struct Slot {
    outcome: Option<Result<Value>>,
    settled: bool,
    waker: Option<Waker>,
}

fn lock(slot: &Mutex<Slot>) -> MutexGuard<'_, Slot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Create a connected resolver/reply pair.
pub fn lazy_reply() -> (ReplyResolver, LazyReply) {
    let slot = Arc::new(Mutex::new(Slot::default()));
    (
        ReplyResolver {
            slot: Arc::clone(&slot),
        },
        LazyReply { slot },
    )
}

/// Settles a [`LazyReply`]. The first outcome wins.
///
/// Dropping an unsettled resolver settles the reply as
/// [`RpcError::Disconnected`].
pub struct ReplyResolver {
    slot: Arc<Mutex<Slot>>,
}

impl ReplyResolver {
    /// Deliver an outcome. Returns `false` if one was already delivered.
    pub fn settle(&self, outcome: Result<Value>) -> bool {
        let waker = {
            let mut slot = lock(&self.slot);
            if slot.settled {
                return false;
            }
            slot.settled = true;
            slot.outcome = Some(outcome);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
        true
    }

    pub fn is_settled(&self) -> bool {
        lock(&self.slot).settled
    }
}

impl Drop for ReplyResolver {
    fn drop(&mut self) {
        self.settle(Err(RpcError::Disconnected));
    }
}

impl std::fmt::Debug for ReplyResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReplyResolver")
            .field("settled", &self.is_settled())
            .finish()
    }
}

/// The consumer side of a deferred result.
pub struct LazyReply {
    slot: Arc<Mutex<Slot>>,
}

impl LazyReply {
    /// True once an outcome has been delivered, whether or not it was taken.
    pub fn is_settled(&self) -> bool {
        lock(&self.slot).settled
    }
}

impl Future for LazyReply {
    type Output = Result<Value>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let mut slot = lock(&self.slot);
        if let Some(outcome) = slot.outcome.take() {
            return Poll::Ready(outcome);
        }
        if slot.settled {
            // Already returned once.
            return Poll::Ready(Err(RpcError::Disconnected));
        }
        match &slot.waker {
            Some(waker) if waker.will_wake(cx.waker()) => {}
            _ => slot.waker = Some(cx.waker().clone()),
        }
        Poll::Pending
    }
}

impl std::fmt::Debug for LazyReply {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LazyReply")
            .field("settled", &self.is_settled())
            .finish()
    }
}
