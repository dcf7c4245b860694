//! Request context and continuation dispatch
//!
//! リクエストごとに作られるコンテキスト。ハンドラチェーンは不変の配列で、
//! `cursor` が現在位置、`dispatched` がこれまでに到達した最大位置を持つ。

use std::sync::Arc;

use ahash::AHashMap as Map;
use smallvec::SmallVec;

use crate::{
    config::{AppConfig, Mode},
    error::{Error, HandlerResult, HttpError},
    middleware::BoxedHandler,
    render::{Component, Layout},
    request::{Path, Req},
    response::Res,
    utils::method::Method,
};

/// Terminal step run when `next()` walks past the end of the chain.
///
/// チェーン末尾を越えたときの動作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fallback {
    /// `HttpError(404)` を返す (ルートの not-found ハンドラに拾われる)
    NotFound,
    /// 405 レスポンス
    MethodNotAllowed,
    /// `OPTIONS` への 204 + `Allow`
    Options(Vec<Method>),
}

impl Fallback {
    fn run(&self) -> HandlerResult {
        match self {
            Fallback::NotFound => Err(HttpError::not_found().into()),
            Fallback::MethodNotAllowed => Ok(Res::new().status(405).text("Method not allowed")),
            Fallback::Options(allowed) => {
                let allow = allowed
                    .iter()
                    .map(Method::to_str)
                    .collect::<Vec<_>>()
                    .join(", ");
                Ok(Res::empty(204).with_header("Allow", &allow))
            }
        }
    }
}

/// Render state installed by segment wrappers.
///
/// セグメントのラッパーが出入りのたびに保存・復元する描画状態
pub(crate) struct Internals<S> {
    pub app: Option<Component<S>>,
    pub layouts: SmallVec<[Layout<S>; 4]>,
}

impl<S> Clone for Internals<S> {
    fn clone(&self) -> Self {
        Internals {
            app: self.app.clone(),
            layouts: self.layouts.clone(),
        }
    }
}

impl<S> Default for Internals<S> {
    fn default() -> Self {
        Internals {
            app: None,
            layouts: SmallVec::new(),
        }
    }
}

/// Per-request context handed to every handler.
///
/// リクエストごとのコンテキスト。リクエスト間で共有されることはない。
pub struct Context<S> {
    pub req: Req,
    pub params: Map<String, String>,
    /// ユーザー定義の状態
    pub state: S,
    /// ハンドラチェーンが失敗したときだけセットされる
    pub error: Option<Error>,
    pub(crate) internals: Internals<S>,
    config: Arc<AppConfig>,
    chain: Arc<[BoxedHandler<S>]>,
    fallback: Fallback,
    cursor: usize,
    dispatched: Option<usize>,
}

impl<S> Context<S>
where
    S: Send + Sync + 'static,
{
    pub(crate) fn new(
        req: Req,
        params: Map<String, String>,
        state: S,
        chain: Arc<[BoxedHandler<S>]>,
        fallback: Fallback,
        config: Arc<AppConfig>,
    ) -> Context<S> {
        Context {
            req,
            params,
            state,
            error: None,
            internals: Internals::default(),
            config,
            chain,
            fallback,
            cursor: 0,
            dispatched: None,
        }
    }

    /// Normalized request URL.
    #[inline]
    pub fn url(&self) -> &Path {
        &self.req.path
    }

    #[inline]
    pub fn method(&self) -> &Method {
        &self.req.method
    }

    /// パスパラメータを取得する
    #[inline]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    #[inline]
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    #[inline]
    pub fn mode(&self) -> Mode {
        self.config.mode
    }

    /// Invoke the rest of the chain.
    ///
    /// 一つのハンドラ呼び出しの中で二回以上呼ぶと `Error::NextCalledMultipleTimes`。
    pub async fn next(&mut self) -> HandlerResult {
        let index = self.cursor + 1;
        self.dispatch(index).await
    }

    /// `Location` ヘッダ付きのリダイレクトレスポンスを作る (既定 302)
    pub fn redirect(&self, location: &str, status: Option<u16>) -> Res {
        Res::redirect(location, status.unwrap_or(302))
    }

    /// Run the chain from its first handler.
    pub(crate) async fn run(&mut self) -> HandlerResult {
        self.dispatched = None;
        self.dispatch(0).await
    }

    async fn dispatch(&mut self, index: usize) -> HandlerResult {
        if self.dispatched.is_some_and(|last| index <= last) {
            return Err(Error::NextCalledMultipleTimes);
        }
        self.dispatched = Some(index);

        let Some(handler) = self.chain.get(index).cloned() else {
            return self.fallback.run();
        };
        let prev = self.cursor;
        self.cursor = index;
        let result = handler.handle(self).await;
        self.cursor = prev;
        result
    }
}
