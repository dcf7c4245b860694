//! App builder and request dispatcher
//!
//! `App` は登録内容をコマンドとして溜めるだけで、`handler()` で一度だけ
//! セグメント木とルートテーブルを組み立てる。組み立てた `AppHandler` は
//! 不変で、リクエスト間で共有してもロックはいらない。

use std::{future::Future, path::Path, sync::Arc};

use futures::future::BoxFuture;
use log::{debug, error, warn};

use crate::{
    commands::{Command, RouteLoader, RouteSource, apply_commands},
    config::AppConfig,
    context::{Context, Fallback},
    error::{Error, HandlerResult, PatternError},
    fs_routes::{FsRouteFile, fs_files_to_commands},
    middleware::{BoxedHandler, Handler, StaticFiles},
    render::{Component, Layout, RouteConfig, RouteDef},
    request::Req,
    response::Res,
    router::{RouteMethod, UrlPatternRouter},
    utils::method::Method,
};

pub struct App<S> {
    commands: Vec<Command<S>>,
    /// セグメント木を通らず、常にチェーンの先頭で動くミドルウェア
    globals: Vec<BoxedHandler<S>>,
    config: AppConfig,
    state: S,
    static_files: Option<StaticFiles>,
}

impl<S> App<S>
where
    S: Default + Clone + Send + Sync + 'static,
{
    pub fn new() -> App<S> {
        App::with_state(S::default())
    }
}

impl<S> App<S>
where
    S: Clone + Send + Sync + 'static,
{
    /// 初期状態を指定して初期化する。リクエストごとに clone される
    pub fn with_state(state: S) -> App<S> {
        App {
            commands: Vec::new(),
            globals: Vec::new(),
            config: AppConfig::default(),
            state,
            static_files: None,
        }
    }

    pub fn config(&mut self, config: AppConfig) -> &mut Self {
        self.config = config;
        self
    }

    /// Middleware for every path.
    pub fn use_<F>(&mut self, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.use_at("*", handler)
    }

    /// `pattern` 以下のパスに効くミドルウェアを登録する
    pub fn use_at<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        let handler: BoxedHandler<S> = Arc::new(handler);
        self.use_handlers(pattern, vec![handler])
    }

    /// Middleware that runs before everything else, for every request.
    ///
    /// 404 / 405 / OPTIONS を含むすべてのリクエストで、セグメントの
    /// ラッパーやミドルウェアより先に実行される。
    pub fn use_global<F>(&mut self, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.globals.push(Arc::new(handler));
        self
    }

    pub fn use_handlers(&mut self, pattern: &str, fns: Vec<BoxedHandler<S>>) -> &mut Self {
        self.commands.push(Command::Middleware {
            pattern: pattern.to_string(),
            fns,
        });
        self
    }

    /// Register a handler chain for `method` and `pattern`.
    pub fn on(
        &mut self,
        method: RouteMethod,
        pattern: &str,
        fns: Vec<BoxedHandler<S>>,
    ) -> &mut Self {
        self.commands.push(Command::Handler {
            pattern: pattern.to_string(),
            method,
            fns,
            prepend: false,
        });
        self
    }

    /// [`on`](Self::on) ですでに登録されたどのルートよりも先に照合させる
    pub fn on_first(
        &mut self,
        method: RouteMethod,
        pattern: &str,
        fns: Vec<BoxedHandler<S>>,
    ) -> &mut Self {
        self.commands.push(Command::Handler {
            pattern: pattern.to_string(),
            method,
            fns,
            prepend: true,
        });
        self
    }

    #[inline]
    fn register<H>(&mut self, method: RouteMethod, pattern: &str, handler: H) -> &mut Self
    where
        H: Handler<S> + 'static,
    {
        let handler: BoxedHandler<S> = Arc::new(handler);
        self.on(method, pattern, vec![handler])
    }

    pub fn get<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.register(RouteMethod::Only(Method::GET), pattern, handler)
    }

    pub fn post<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.register(RouteMethod::Only(Method::POST), pattern, handler)
    }

    pub fn put<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.register(RouteMethod::Only(Method::PUT), pattern, handler)
    }

    pub fn patch<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.register(RouteMethod::Only(Method::PATCH), pattern, handler)
    }

    pub fn delete<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.register(RouteMethod::Only(Method::DELETE), pattern, handler)
    }

    pub fn head<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.register(RouteMethod::Only(Method::HEAD), pattern, handler)
    }

    /// すべてのメソッドに反応する
    pub fn all<F>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, HandlerResult> + Send + Sync + 'static,
    {
        self.register(RouteMethod::All, pattern, handler)
    }

    /// Register a route definition rendered through layouts and the app wrapper.
    pub fn route(&mut self, pattern: &str, route: RouteDef<S>) -> &mut Self {
        self.commands.push(Command::Route {
            pattern: pattern.to_string(),
            segment: None,
            route: RouteSource::Eager(Arc::new(route)),
        });
        self
    }

    /// 最初のリクエストで一度だけ `loader` を呼んで解決するルート
    pub fn lazy_route<F, Fut>(&mut self, pattern: &str, config: RouteConfig, loader: F) -> &mut Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<RouteDef<S>, Error>> + Send + 'static,
    {
        let loader: RouteLoader<S> =
            Arc::new(move || -> BoxFuture<'static, Result<RouteDef<S>, Error>> {
                Box::pin(loader())
            });
        self.commands.push(Command::Route {
            pattern: pattern.to_string(),
            segment: None,
            route: RouteSource::Lazy { config, loader },
        });
        self
    }

    pub fn layout(&mut self, pattern: &str, layout: Layout<S>) -> &mut Self {
        self.commands.push(Command::Layout {
            pattern: pattern.to_string(),
            layout,
        });
        self
    }

    pub fn app_wrapper(&mut self, component: Component<S>) -> &mut Self {
        self.commands.push(Command::App { component });
        self
    }

    /// `pattern` 以下で起きたエラーを描画するルート
    pub fn on_error(&mut self, pattern: &str, route: RouteDef<S>) -> &mut Self {
        self.commands.push(Command::Error {
            pattern: pattern.to_string(),
            route: Arc::new(route),
        });
        self
    }

    pub fn not_found(&mut self, route: RouteDef<S>) -> &mut Self {
        self.commands.push(Command::NotFound {
            route: Arc::new(route),
        });
        self
    }

    /// Mount another app's registrations below `pattern`.
    ///
    /// 内側の `app_wrapper` と `not_found` は無視される。
    pub fn mount(&mut self, pattern: &str, app: App<S>) -> &mut Self {
        if app.static_files.is_some() {
            warn!("static files of a mounted app at {} are ignored", pattern);
        }
        if !app.globals.is_empty() {
            warn!("global middlewares of a mounted app at {} are ignored", pattern);
        }
        self.commands.push(Command::Mount {
            pattern: pattern.to_string(),
            commands: app.commands,
        });
        self
    }

    /// Register filesystem-discovered route files below `pattern`.
    pub fn fs_routes(
        &mut self,
        pattern: &str,
        files: Vec<FsRouteFile<S>>,
    ) -> Result<&mut Self, PatternError> {
        let commands = fs_files_to_commands(files)?;
        self.commands.push(Command::FsRoute {
            pattern: pattern.to_string(),
            commands,
        });
        Ok(self)
    }

    /// どのルートにも当たらなかったリクエストにディレクトリ内のファイルを返す
    pub fn static_files<P>(&mut self, dir: P) -> &mut Self
    where
        P: AsRef<Path>,
    {
        self.static_files = Some(StaticFiles::new(dir));
        self
    }

    /// Replay the registrations and build the dispatcher.
    pub fn handler(self) -> Result<AppHandler<S>, PatternError> {
        let mut router = UrlPatternRouter::new();
        for global in self.globals {
            router.add_middleware(global);
        }
        let root_middlewares = apply_commands(&mut router, self.commands, &self.config.base_path)?;
        // マッチしなかったときもグローバルが先頭
        let mut fallback_chain = router.middlewares().to_vec();
        fallback_chain.extend(root_middlewares);
        if let Some(files) = self.static_files {
            fallback_chain.push(Arc::new(files));
        }
        debug!("built app with {} routes", router.len());
        Ok(AppHandler {
            router,
            fallback_chain: Arc::from(fallback_chain),
            state: self.state,
            config: Arc::new(self.config),
        })
    }
}

impl<S> Default for App<S>
where
    S: Default + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        App::new()
    }
}

/// Immutable dispatcher produced by [`App::handler`].
pub struct AppHandler<S> {
    router: UrlPatternRouter<BoxedHandler<S>>,
    /// どのルートにもメソッドまで一致しなかったときのチェーン
    fallback_chain: Arc<[BoxedHandler<S>]>,
    state: S,
    config: Arc<AppConfig>,
}

impl<S> AppHandler<S>
where
    S: Clone + Send + Sync + 'static,
{
    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// Handle one request. Always produces a response.
    ///
    /// ハンドラチェーンのエラーはここで必ずレスポンスに変換される。
    pub async fn handle(&self, mut req: Req) -> Res {
        req.path.normalize();
        let matched = self.router.match_route(&req.method, req.path.pathname());

        let (chain, fallback) = if matched.method_match {
            let chain: Arc<[BoxedHandler<S>]> = if matched.handlers.len() == 1 {
                Arc::clone(&matched.handlers[0])
            } else {
                matched
                    .handlers
                    .iter()
                    .flat_map(|group| group.iter().cloned())
                    .collect()
            };
            (chain, Fallback::NotFound)
        } else {
            let fallback = if matched.pattern_match {
                if req.method == Method::OPTIONS {
                    let allowed = matched
                        .pattern
                        .as_deref()
                        .map(|p| self.router.allowed_methods(p))
                        .unwrap_or_default();
                    if allowed.is_empty() {
                        Fallback::NotFound
                    } else {
                        Fallback::Options(allowed)
                    }
                } else {
                    Fallback::MethodNotAllowed
                }
            } else {
                Fallback::NotFound
            };
            (Arc::clone(&self.fallback_chain), fallback)
        };

        let mut ctx = Context::new(
            req,
            matched.params,
            self.state.clone(),
            chain,
            fallback,
            Arc::clone(&self.config),
        );
        match ctx.run().await {
            Ok(res) => res,
            Err(err) => self.default_error(&mut ctx, err),
        }
    }

    fn default_error(&self, ctx: &mut Context<S>, err: Error) -> Res {
        let status = err.status();
        let head = format!("{} {}", ctx.req.method, ctx.req.path);
        if err.is_protocol_violation() {
            error!("{} - handler protocol violation: {}", head, err);
        } else if status >= 500 {
            error!("{} - {}", head, err);
        } else {
            debug!("{} - {}", head, err);
        }

        let mut body = match &err {
            Error::Http(e) => e.message.clone(),
            _ => "Internal server error".to_string(),
        };
        if self.config.is_development() {
            body.push_str(&format!("\n\n{:?}", err));
        }
        ctx.error = Some(err);
        Res::new().status(status).text(body)
    }
}
