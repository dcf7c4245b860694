//! Registration commands and their replay
//!
//! 登録内容はまずコマンド列として溜めておき、ビルド時に一度だけ
//! セグメント木とルートテーブルへ再生する。

use std::sync::{Arc, OnceLock};

use futures::future::BoxFuture;
use log::{debug, warn};
use tokio::sync::OnceCell;

use crate::{
    context::Context,
    error::{Error, HandlerResult, PatternError},
    middleware::{BoxedHandler, Handler},
    render::{Component, Layout, RouteConfig, RouteDef, RouteMethods, render_route},
    router::{RouteMethod, UrlPatternRouter},
    segment::{SegmentId, SegmentTree, TreeSlot, segment_to_middlewares},
};

/// Loads a route definition on first use.
pub type RouteLoader<S> =
    Arc<dyn Fn() -> BoxFuture<'static, Result<RouteDef<S>, Error>> + Send + Sync>;

pub enum RouteSource<S> {
    Eager(Arc<RouteDef<S>>),
    /// 最初のリクエストで一度だけ解決する
    Lazy {
        config: RouteConfig,
        loader: RouteLoader<S>,
    },
}

/// A deferred registration intent.
pub enum Command<S> {
    Middleware {
        pattern: String,
        fns: Vec<BoxedHandler<S>>,
    },
    Layout {
        pattern: String,
        layout: Layout<S>,
    },
    App {
        component: Component<S>,
    },
    Route {
        pattern: String,
        /// セグメントの位置を決めるパス。`None` なら `pattern` を使う。
        /// ファイルルートでは `(group)` を残した元のファイルパスが入る
        segment: Option<String>,
        route: RouteSource<S>,
    },
    Handler {
        pattern: String,
        method: RouteMethod,
        fns: Vec<BoxedHandler<S>>,
        /// 既存のエントリより先に照合する
        prepend: bool,
    },
    Error {
        pattern: String,
        route: Arc<RouteDef<S>>,
    },
    NotFound {
        route: Arc<RouteDef<S>>,
    },
    Mount {
        pattern: String,
        commands: Vec<Command<S>>,
    },
    FsRoute {
        pattern: String,
        commands: Vec<Command<S>>,
    },
}

impl<S> Command<S> {
    fn kind(&self) -> &'static str {
        match self {
            Command::Middleware { .. } => "middleware",
            Command::Layout { .. } => "layout",
            Command::App { .. } => "app",
            Command::Route { .. } => "route",
            Command::Handler { .. } => "handler",
            Command::Error { .. } => "error",
            Command::NotFound { .. } => "not_found",
            Command::Mount { .. } => "mount",
            Command::FsRoute { .. } => "fs_route",
        }
    }
}

/// Join a base path and a registered path.
///
/// - base の末尾の `*` と `/` は落とす
/// - `*` はマウント時は base そのもの、それ以外は `base/*`
/// - base があるときの `/` は base そのもの
pub fn merge_path(base: &str, path: &str, is_mounting: bool) -> String {
    let base = base.strip_suffix('*').unwrap_or(base);
    let base = base.strip_suffix('/').unwrap_or(base);
    let path = match path {
        "*" if is_mounting => String::new(),
        "*" => "/*".to_string(),
        "/" if !base.is_empty() => String::new(),
        "" => String::new(),
        p if p.starts_with('/') || p.starts_with('{') => p.to_string(),
        p => format!("/{}", p),
    };
    let merged = format!("{}{}", base, path);
    if merged.is_empty() && !is_mounting {
        "/".to_string()
    } else {
        merged
    }
}

/// Replay `commands` into `router` below `base_path`.
///
/// 戻り値はどのルートにもマッチしなかったときに使うルートのチェーン
/// (根のミドルウェアとマウントされたアプリのミドルウェア)。
pub fn apply_commands<S>(
    router: &mut UrlPatternRouter<BoxedHandler<S>>,
    commands: Vec<Command<S>>,
    base_path: &str,
) -> Result<Vec<BoxedHandler<S>>, PatternError>
where
    S: Send + Sync + 'static,
{
    let mut replay = Replay::new();
    replay.apply(router, commands, SegmentTree::<S>::ROOT, base_path, false)?;
    Ok(replay.finish())
}

struct Replay<S> {
    tree: SegmentTree<S>,
    slot: TreeSlot<S>,
    /// マウント用の合成セグメント名の連番
    mount_seq: usize,
    mounts: Vec<SegmentId>,
}

impl<S> Replay<S>
where
    S: Send + Sync + 'static,
{
    fn new() -> Replay<S> {
        Replay {
            tree: SegmentTree::new(),
            slot: Arc::new(OnceLock::new()),
            mount_seq: 0,
            mounts: Vec::new(),
        }
    }

    fn apply(
        &mut self,
        router: &mut UrlPatternRouter<BoxedHandler<S>>,
        commands: Vec<Command<S>>,
        root: SegmentId,
        base: &str,
        mounted: bool,
    ) -> Result<(), PatternError> {
        for command in commands {
            let kind = command.kind();
            match command {
                Command::Middleware { pattern, fns } => {
                    let seg = self.tree.get_or_create_segment(root, &pattern, true);
                    self.tree.get_mut(seg).middlewares.extend(fns);
                }
                Command::Layout { pattern, layout } => {
                    let seg = self.tree.get_or_create_segment(root, &pattern, true);
                    self.tree.get_mut(seg).layout = Some(layout);
                }
                Command::Error { pattern, route } => {
                    let seg = self.tree.get_or_create_segment(root, &pattern, true);
                    self.tree.get_mut(seg).error_route = Some(route);
                }
                Command::App { component } => {
                    if mounted {
                        warn!("{} command inside a mounted app is ignored", kind);
                        continue;
                    }
                    self.tree.get_mut(SegmentTree::<S>::ROOT).app = Some(component);
                }
                Command::NotFound { route } => {
                    if mounted {
                        warn!("{} command inside a mounted app is ignored", kind);
                        continue;
                    }
                    self.tree.get_mut(SegmentTree::<S>::ROOT).not_found = Some(route);
                }
                Command::Route {
                    pattern,
                    segment,
                    route,
                } => {
                    let seg_path = segment.as_deref().unwrap_or(&pattern);
                    let seg = self.tree.get_or_create_segment(root, seg_path, false);
                    self.add_route(router, seg, base, &pattern, route)?;
                }
                Command::Handler {
                    pattern,
                    method,
                    fns,
                    prepend,
                } => {
                    let seg = self.tree.get_or_create_segment(root, &pattern, false);
                    let mut chain = segment_to_middlewares(&self.tree, &self.slot, seg);
                    chain.extend(fns);
                    let path = merge_path(base, &pattern, false);
                    debug!("register {} {}", method, path);
                    router.add(method, &path, chain, prepend)?;
                }
                Command::Mount { pattern, commands } => {
                    let parent = self.tree.get_or_create_segment(root, &pattern, true);
                    let key = format!("$$mount{}", self.mount_seq);
                    self.mount_seq += 1;
                    let seg = self.tree.child(parent, &key);
                    self.mounts.push(seg);
                    let inner_base = merge_path(base, &pattern, true);
                    debug!("mount {} at {}", key, inner_base);
                    self.apply(router, commands, seg, &inner_base, true)?;
                }
                Command::FsRoute { pattern, commands } => {
                    let seg = self.tree.get_or_create_segment(root, &pattern, true);
                    let inner_base = merge_path(base, &pattern, true);
                    self.apply(router, commands, seg, &inner_base, mounted)?;
                }
            }
        }
        Ok(())
    }

    fn add_route(
        &mut self,
        router: &mut UrlPatternRouter<BoxedHandler<S>>,
        seg: SegmentId,
        base: &str,
        pattern: &str,
        route: RouteSource<S>,
    ) -> Result<(), PatternError> {
        let mut chain = segment_to_middlewares(&self.tree, &self.slot, seg);

        let (config, methods) = match &route {
            RouteSource::Eager(def) => {
                let methods = if def.registers_all() {
                    None
                } else {
                    Some(def.declared_methods())
                };
                (def.config.clone(), methods)
            }
            RouteSource::Lazy { config, .. } => {
                let methods = match &config.methods {
                    Some(RouteMethods::List(list)) => Some(list.clone()),
                    _ => None,
                };
                (config.clone(), methods)
            }
        };
        let registered = config.route_override.as_deref().unwrap_or(pattern);
        let path = merge_path(base, registered, false);

        let terminal: BoxedHandler<S> = match route {
            RouteSource::Eager(route) => Arc::new(RouteTerminal { route }),
            RouteSource::Lazy { loader, .. } => Arc::new(LazyRouteTerminal {
                loader,
                resolved: OnceCell::new(),
            }),
        };
        chain.push(terminal);
        let chain: Arc<[BoxedHandler<S>]> = Arc::from(chain);

        match methods {
            None => {
                debug!("register ALL {}", path);
                router.add(RouteMethod::All, &path, chain, false)?;
            }
            Some(methods) => {
                for method in methods {
                    debug!("register {} {}", method, path);
                    router.add(RouteMethod::Only(method), &path, Arc::clone(&chain), false)?;
                }
            }
        }
        Ok(())
    }

    fn finish(self) -> Vec<BoxedHandler<S>> {
        let mut root = segment_to_middlewares(&self.tree, &self.slot, SegmentTree::<S>::ROOT);
        for &mount in &self.mounts {
            root.extend(self.tree.get(mount).middlewares.iter().cloned());
        }
        debug!("segment tree frozen with {} nodes", self.tree.len());
        // 木はここで凍結され、以後は読み取り専用
        let _ = self.slot.set(Arc::new(self.tree));
        root
    }
}

struct RouteTerminal<S> {
    route: Arc<RouteDef<S>>,
}

#[async_trait::async_trait]
impl<S> Handler<S> for RouteTerminal<S>
where
    S: Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut Context<S>) -> HandlerResult {
        render_route(ctx, &self.route, None).await
    }
}

struct LazyRouteTerminal<S> {
    loader: RouteLoader<S>,
    resolved: OnceCell<Arc<RouteDef<S>>>,
}

#[async_trait::async_trait]
impl<S> Handler<S> for LazyRouteTerminal<S>
where
    S: Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut Context<S>) -> HandlerResult {
        if !self.resolved.initialized() {
            debug!("resolving lazy route for {}", ctx.req.path.pathname());
        }
        let route = self
            .resolved
            .get_or_try_init(|| async { (self.loader)().await.map(Arc::new) })
            .await?
            .clone();
        render_route(ctx, &route, None).await
    }
}
