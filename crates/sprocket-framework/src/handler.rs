//! Handlers as tower services.
//!
//! A plugin handler is any `Fn(HandlerContext, State<S>) -> impl Future`
//! whose output implements [`HandlerOutput`]. At registration it is wrapped
//! into a [`BoxedHandler`], a cloneable type-erased
//! `tower::Service<HandlerContext>`, so the registry can store handlers of
//! every plugin side by side.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use sprocket_core::BoxError;
use tower::util::BoxCloneSyncService;

use crate::context::HandlerContext;
use crate::plugin::State;
use crate::plugin::core::StateSlot;

/// A type-erased handler.
pub type BoxedHandler = BoxCloneSyncService<HandlerContext, (), BoxError>;

/// Something a handler can return.
///
/// Text is sent back to where the event came from; errors fail the task and
/// are logged with the plugin and event that caused them.
#[async_trait]
pub trait HandlerOutput: Send + 'static {
    async fn deliver(self, ctx: &HandlerContext) -> Result<(), BoxError>;
}

#[async_trait]
impl HandlerOutput for () {
    async fn deliver(self, _ctx: &HandlerContext) -> Result<(), BoxError> {
        Ok(())
    }
}

/// Replies with the text unless it is empty.
#[async_trait]
impl HandlerOutput for String {
    async fn deliver(self, ctx: &HandlerContext) -> Result<(), BoxError> {
        if !self.is_empty() {
            ctx.reply(&self).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl HandlerOutput for &'static str {
    async fn deliver(self, ctx: &HandlerContext) -> Result<(), BoxError> {
        self.to_string().deliver(ctx).await
    }
}

#[async_trait]
impl<T: HandlerOutput> HandlerOutput for Option<T> {
    async fn deliver(self, ctx: &HandlerContext) -> Result<(), BoxError> {
        match self {
            Some(output) => output.deliver(ctx).await,
            None => Ok(()),
        }
    }
}

#[async_trait]
impl<T, E> HandlerOutput for Result<T, E>
where
    T: HandlerOutput,
    E: Into<BoxError> + Send + 'static,
{
    async fn deliver(self, ctx: &HandlerContext) -> Result<(), BoxError> {
        match self {
            Ok(output) => output.deliver(ctx).await,
            Err(e) => Err(e.into()),
        }
    }
}

/// Wraps a plugin handler and its state into a [`BoxedHandler`].
pub(crate) fn into_service<S, F, Fut>(handler: F, state: StateSlot<S>) -> BoxedHandler
where
    S: Send + Sync + 'static,
    F: Fn(HandlerContext, State<S>) -> Fut + Send + Sync + 'static,
    Fut: Future + Send + 'static,
    Fut::Output: HandlerOutput,
{
    let handler = Arc::new(handler);
    BoxCloneSyncService::new(tower::service_fn(move |ctx: HandlerContext| {
        let handler = Arc::clone(&handler);
        let state = state.get();
        async move {
            let state = state.ok_or("plugin state is not initialised")?;
            let output = handler(ctx.clone(), state).await;
            output.deliver(&ctx).await
        }
    }))
}
