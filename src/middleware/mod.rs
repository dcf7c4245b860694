//! Handler / middleware contract
//!
//! ミドルウェアとハンドラは同じ契約を持つ。`Response` を返すか、
//! `ctx.next()` の結果を返す。

pub mod static_files;

use std::sync::Arc;

use futures::future::BoxFuture;

use crate::{context::Context, error::HandlerResult};

pub use static_files::StaticFiles;

#[async_trait::async_trait]
pub trait Handler<S>: Send + Sync
where
    S: Send + Sync + 'static,
{
    /// リクエストを処理する
    async fn handle(&self, ctx: &mut Context<S>) -> HandlerResult;
}

pub type BoxedHandler<S> = Arc<dyn Handler<S>>;

#[async_trait::async_trait]
impl<S, F> Handler<S> for F
where
    S: Send + Sync + 'static,
    F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut Context<S>) -> HandlerResult {
        (self)(ctx).await
    }
}

/// Box a closure handler.
///
/// クロージャからハンドラを作る。戻り値の型推論のため直接バウンドを書いている。
///
/// ```ignore
/// let mw = handler_fn(|ctx: &mut Context<State>| Box::pin(async move {
///     ctx.state.count += 1;
///     ctx.next().await
/// }));
/// ```
pub fn handler_fn<S, F>(f: F) -> BoxedHandler<S>
where
    S: Send + Sync + 'static,
    F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
{
    Arc::new(f)
}
