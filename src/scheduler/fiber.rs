//! Suspended execution contexts for fiber-mode workers
//!
//! A fiber is a boxed future polled with a no-op waker: each
//! [`Fiber::resume`] runs the worker's logic up to its next
//! [`WorkerContext::suspend`](super::worker::WorkerContext::suspend) point.
//! Suspension works at any depth of `async` calls inside the body.

use std::task::Context;

use futures::future::BoxFuture;
use futures::task::noop_waker_ref;

use super::worker::{FiberBody, WorkerContext};

pub(crate) struct Fiber {
    body: BoxFuture<'static, ()>,
    finished: bool,
}

impl Fiber {
    /// Wrap the worker's logic (or the standard loop) between its start and
    /// finish hooks. Nothing runs until the first resume.
    pub(crate) fn new(ctx: &WorkerContext, body: Option<FiberBody>) -> Self {
        let ctx = ctx.clone();
        let body = async move {
            ctx.run_before();
            match body {
                Some(body) => body.await,
                None => standard_loop(&ctx).await,
            }
            ctx.run_after();
        };

        Self {
            body: Box::pin(body),
            finished: false,
        }
    }

    /// Run until the next suspension point; returns whether the fiber is done
    pub(crate) fn resume(&mut self) -> bool {
        if self.finished {
            return true;
        }

        let mut cx = Context::from_waker(noop_waker_ref());
        if self.body.as_mut().poll(&mut cx).is_ready() {
            self.finished = true;
        }
        self.finished
    }
}

/// Run a batch, suspend, and repeat while the worker is active
pub async fn standard_loop(ctx: &WorkerContext) {
    loop {
        ctx.run_batch();
        ctx.suspend().await;
        if !ctx.is_active() {
            break;
        }
    }
}
