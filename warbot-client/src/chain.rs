//! Chained request/reply calls.
//!
//! A [`Chain`] is a pipeline of dependent calls: each stage starts only after
//! the previous one succeeded, and the first failure skips every remaining
//! stage. [`Chain::when_finished`] runs the pipeline in the background and
//! returns a [`CancelHandle`]; exactly one of the two continuations fires,
//! once, unless the handle cancels the chain first.

use crate::error::RequestError;
use parking_lot::Mutex;
use std::future::{Future, IntoFuture};
use std::pin::Pin;
use std::sync::Arc;
use tokio::task::AbortHandle;

type BoxedStage<T> = Pin<Box<dyn Future<Output = Result<T, RequestError>> + Send>>;

/// A composable, cancellable pipeline producing `T`.
#[must_use = "a chain does nothing until awaited or started with when_finished"]
pub struct Chain<T> {
    stage: BoxedStage<T>,
}

impl<T: Send + 'static> Chain<T> {
    /// Wraps a single call.
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, RequestError>> + Send + 'static,
    {
        Self {
            stage: Box::pin(future),
        }
    }

    /// A chain that succeeds immediately.
    pub fn ready(value: T) -> Self {
        Self::new(std::future::ready(Ok(value)))
    }

    /// A chain that fails immediately.
    pub fn failed(err: RequestError) -> Self {
        Self::new(std::future::ready(Err(err)))
    }

    /// Transforms this stage's result. An `Err` from `f` fails the chain.
    pub fn and_then<U, F>(self, f: F) -> Chain<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Result<U, RequestError> + Send + 'static,
    {
        let stage = self.stage;
        Chain::new(async move { stage.await.and_then(f) })
    }

    /// Starts the next call once this stage succeeds.
    pub fn then_request<U, F>(self, f: F) -> Chain<U>
    where
        U: Send + 'static,
        F: FnOnce(T) -> Chain<U> + Send + 'static,
    {
        let stage = self.stage;
        Chain::new(async move {
            let value = stage.await?;
            f(value).stage.await
        })
    }

    /// Runs the chain on the current runtime.
    ///
    /// `on_success` or `on_failure` fires exactly once when the chain
    /// completes, unless the returned handle is cancelled (or dropped) first.
    pub fn when_finished<S, E>(self, on_success: S, on_failure: E) -> CancelHandle
    where
        S: FnOnce(T) + Send + 'static,
        E: FnOnce(RequestError) + Send + 'static,
    {
        let state = Arc::new(Mutex::new(ChainState::InFlight));
        let task_state = Arc::clone(&state);
        let stage = self.stage;

        let task = tokio::spawn(async move {
            let result = stage.await;
            {
                let mut state = task_state.lock();
                if *state != ChainState::InFlight {
                    return;
                }
                *state = ChainState::Finished;
            }
            match result {
                Ok(value) => on_success(value),
                Err(err) => on_failure(err),
            }
        });

        CancelHandle {
            inner: Some(CancelInner {
                state,
                abort: task.abort_handle(),
            }),
        }
    }
}

impl<T: Send + 'static> IntoFuture for Chain<T> {
    type Output = Result<T, RequestError>;
    type IntoFuture = BoxedStage<T>;

    fn into_future(self) -> Self::IntoFuture {
        self.stage
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChainState {
    InFlight,
    Finished,
    Cancelled,
}

struct CancelInner {
    state: Arc<Mutex<ChainState>>,
    abort: AbortHandle,
}

/// Cancels a running chain. Dropping the handle cancels as well.
///
/// The handle does not keep the chain alive; a default handle refers to no
/// chain at all.
#[derive(Default)]
pub struct CancelHandle {
    inner: Option<CancelInner>,
}

impl CancelHandle {
    /// Cancels the chain if it is still in flight. Returns whether it was.
    pub fn cancel(&mut self) -> bool {
        let Some(inner) = self.inner.take() else {
            return false;
        };
        let mut state = inner.state.lock();
        if *state != ChainState::InFlight {
            return false;
        }
        *state = ChainState::Cancelled;
        inner.abort.abort();
        true
    }

    /// Returns whether the chain is still running.
    pub fn is_in_flight(&self) -> bool {
        self.inner
            .as_ref()
            .is_some_and(|inner| *inner.state.lock() == ChainState::InFlight)
    }
}

impl Drop for CancelHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

impl std::fmt::Debug for CancelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelHandle")
            .field("in_flight", &self.is_in_flight())
            .finish()
    }
}
