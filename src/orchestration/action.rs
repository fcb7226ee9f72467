//! # Service Actions
//!
//! The opaque startup work a [`LatchedService`](super::latched_service::LatchedService)
//! performs once its dependencies are done: deploying a plugin, opening a
//! connection pool, warming a cache. The scheduler only cares whether it
//! succeeded.

use crate::error::ServiceActionError;
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

pub type ServiceActionResult = Result<(), ServiceActionError>;

/// Startup work supplied by the caller.
///
/// Returning an error marks the service as failed and causes every transitive
/// dependent to be skipped. Implementations that block the thread should be
/// wrapped with [`blocking_service_fn`] instead of blocking inside an async body.
#[async_trait]
pub trait ServiceAction: Send + Sync {
    async fn execute_service(&self) -> ServiceActionResult;
}

/// Action backed by an async closure
pub struct FnAction<F, Fut> {
    f: F,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> ServiceAction for FnAction<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ServiceActionResult> + Send + 'static,
{
    async fn execute_service(&self) -> ServiceActionResult {
        (self.f)().await
    }
}

/// Wrap an async closure as a [`ServiceAction`].
///
/// ```rust
/// use latched_services::orchestration::action::service_fn;
///
/// let action = service_fn(|| async { Ok(()) });
/// # let _ = action;
/// ```
pub fn service_fn<F, Fut>(f: F) -> FnAction<F, Fut>
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = ServiceActionResult> + Send + 'static,
{
    FnAction {
        f,
        _future: PhantomData,
    }
}

/// Action backed by a blocking closure, run on tokio's blocking thread pool
pub struct BlockingFnAction<F> {
    f: std::sync::Arc<F>,
}

#[async_trait]
impl<F> ServiceAction for BlockingFnAction<F>
where
    F: Fn() -> ServiceActionResult + Send + Sync + 'static,
{
    async fn execute_service(&self) -> ServiceActionResult {
        let f = self.f.clone();
        match tokio::task::spawn_blocking(move || f()).await {
            Ok(result) => result,
            Err(join_error) if join_error.is_panic() => Err(ServiceActionError::new(format!(
                "blocking startup action panicked: {}",
                panic_message(join_error.into_panic())
            ))),
            Err(join_error) => Err(ServiceActionError::new(format!(
                "blocking startup action was cancelled: {join_error}"
            ))),
        }
    }
}

/// Wrap a blocking closure as a [`ServiceAction`].
///
/// The blocking pool grows on demand, so a slow blocking action never keeps a
/// runtime worker away from the services that are waiting on it.
pub fn blocking_service_fn<F>(f: F) -> BlockingFnAction<F>
where
    F: Fn() -> ServiceActionResult + Send + Sync + 'static,
{
    BlockingFnAction {
        f: std::sync::Arc::new(f),
    }
}

/// No-op action, useful for grouping services behind a single barrier
pub struct NoopAction;

#[async_trait]
impl ServiceAction for NoopAction {
    async fn execute_service(&self) -> ServiceActionResult {
        Ok(())
    }
}

pub(crate) fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
