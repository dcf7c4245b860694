//! Route definitions and page rendering
//!
//! ルート定義と、ページをレイアウト・アプリラッパーで包んで描画する処理。
//! HTML の中身はコンポーネント (ただの関数) に任せる。

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::Value;
use smallvec::SmallVec;

use crate::{
    context::Context,
    error::{Error, HandlerResult},
    response::Res,
    utils::{header::Header, method::Method},
};

/// Props handed to a component.
///
/// `children` はレイアウト・アプリラッパーに渡される内側の HTML
pub struct PageProps<'a, S> {
    pub ctx: &'a Context<S>,
    pub data: &'a Value,
    pub children: Option<String>,
}

pub type Component<S> = Arc<dyn Fn(PageProps<'_, S>) -> String + Send + Sync>;

/// 関数からコンポーネントを作る
pub fn component<S, F>(f: F) -> Component<S>
where
    F: Fn(PageProps<'_, S>) -> String + Send + Sync + 'static,
{
    Arc::new(f)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LayoutConfig {
    /// アプリラッパーを外す
    pub skip_app_wrapper: bool,
    /// 親のレイアウトを引き継がない
    pub skip_inherited_layouts: bool,
}

pub struct Layout<S> {
    pub component: Component<S>,
    pub config: LayoutConfig,
}

impl<S> Clone for Layout<S> {
    fn clone(&self) -> Self {
        Layout {
            component: Arc::clone(&self.component),
            config: self.config,
        }
    }
}

impl<S> Layout<S> {
    pub fn new(component: Component<S>) -> Layout<S> {
        Layout {
            component,
            config: LayoutConfig::default(),
        }
    }

    pub fn with_config(mut self, config: LayoutConfig) -> Layout<S> {
        self.config = config;
        self
    }
}

/// Page data returned by a route handler, rendered through the route component.
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub data: Value,
    pub status: Option<u16>,
    pub headers: Header,
}

impl Page {
    pub fn new(data: Value) -> Page {
        Page {
            data,
            status: None,
            headers: Header::new(),
        }
    }

    pub fn status(mut self, status: u16) -> Page {
        self.status = Some(status);
        self
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Page {
        self.headers.set(key, value);
        self
    }
}

/// What a route handler produces: a finished response, or page data to render.
#[derive(Debug, Clone)]
pub enum PageResponse {
    Response(Res),
    Page(Page),
}

impl From<Res> for PageResponse {
    fn from(res: Res) -> Self {
        PageResponse::Response(res)
    }
}

impl From<Page> for PageResponse {
    fn from(page: Page) -> Self {
        PageResponse::Page(page)
    }
}

pub type RouteFn<S> = Arc<
    dyn for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, Result<PageResponse, Error>>
        + Send
        + Sync,
>;

/// クロージャからルートハンドラを作る
pub fn route_fn<S, F>(f: F) -> RouteFn<S>
where
    F: for<'a> Fn(&'a mut Context<S>) -> BoxFuture<'a, Result<PageResponse, Error>>
        + Send
        + Sync
        + 'static,
{
    Arc::new(f)
}

/// Route handler kind, decided once at registration.
///
/// 単一関数 (全メソッド) か、メソッドごとのマップか
pub enum RouteHandler<S> {
    Function(RouteFn<S>),
    /// 登録順を保つ
    ByMethod(Vec<(Method, RouteFn<S>)>),
}

impl<S> Clone for RouteHandler<S> {
    fn clone(&self) -> Self {
        match self {
            RouteHandler::Function(f) => RouteHandler::Function(Arc::clone(f)),
            RouteHandler::ByMethod(map) => RouteHandler::ByMethod(map.clone()),
        }
    }
}

impl<S> RouteHandler<S> {
    /// `HEAD` は `GET` にフォールバックする
    fn lookup(&self, method: &Method) -> Option<RouteFn<S>> {
        match self {
            RouteHandler::Function(f) => Some(Arc::clone(f)),
            RouteHandler::ByMethod(map) => {
                let find = |m: &Method| {
                    map.iter()
                        .find(|(k, _)| k == m)
                        .map(|(_, f)| Arc::clone(f))
                };
                find(method).or_else(|| {
                    if *method == Method::HEAD {
                        find(&Method::GET)
                    } else {
                        None
                    }
                })
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteMethods {
    All,
    List(Vec<Method>),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RouteConfig {
    /// 登録に使うパターンを差し替える
    pub route_override: Option<String>,
    pub methods: Option<RouteMethods>,
    pub skip_app_wrapper: bool,
    pub skip_inherited_layouts: bool,
}

/// A route: optional handler, optional component and its config.
pub struct RouteDef<S> {
    pub handler: Option<RouteHandler<S>>,
    pub component: Option<Component<S>>,
    pub config: RouteConfig,
}

impl<S> Clone for RouteDef<S> {
    fn clone(&self) -> Self {
        RouteDef {
            handler: self.handler.clone(),
            component: self.component.clone(),
            config: self.config.clone(),
        }
    }
}

impl<S> Default for RouteDef<S> {
    fn default() -> Self {
        RouteDef {
            handler: None,
            component: None,
            config: RouteConfig::default(),
        }
    }
}

impl<S> RouteDef<S> {
    /// One handler for every method.
    pub fn function(handler: RouteFn<S>) -> RouteDef<S> {
        RouteDef {
            handler: Some(RouteHandler::Function(handler)),
            ..RouteDef::default()
        }
    }

    /// ハンドラなしでコンポーネントだけを描画するルート
    pub fn page(component: Component<S>) -> RouteDef<S> {
        RouteDef {
            component: Some(component),
            ..RouteDef::default()
        }
    }

    /// メソッドごとのハンドラを追加する。単一関数ハンドラは置き換えられる。
    pub fn on(mut self, method: Method, handler: RouteFn<S>) -> RouteDef<S> {
        match &mut self.handler {
            Some(RouteHandler::ByMethod(map)) => {
                map.retain(|(m, _)| *m != method);
                map.push((method, handler));
            }
            _ => self.handler = Some(RouteHandler::ByMethod(vec![(method, handler)])),
        }
        self
    }

    pub fn with_component(mut self, component: Component<S>) -> RouteDef<S> {
        self.component = Some(component);
        self
    }

    pub fn with_config(mut self, config: RouteConfig) -> RouteDef<S> {
        self.config = config;
        self
    }

    /// Whether the route is registered for every method.
    pub(crate) fn registers_all(&self) -> bool {
        match (&self.config.methods, &self.handler) {
            (Some(RouteMethods::All), _) => true,
            (Some(RouteMethods::List(_)), _) => false,
            (None, Some(RouteHandler::ByMethod(_))) => false,
            (None, _) => true,
        }
    }

    /// Methods to register when [`registers_all`](Self::registers_all) is false.
    pub(crate) fn declared_methods(&self) -> Vec<Method> {
        match (&self.config.methods, &self.handler) {
            (Some(RouteMethods::List(list)), _) => list.clone(),
            (_, Some(RouteHandler::ByMethod(map))) => {
                let mut methods: Vec<Method> = map.iter().map(|(m, _)| m.clone()).collect();
                // HEAD は GET で答える
                if methods.contains(&Method::GET) && !methods.contains(&Method::HEAD) {
                    methods.push(Method::HEAD);
                }
                methods
            }
            _ => Vec::new(),
        }
    }
}

/// Run a route's handler and turn its output into a response.
///
/// `status` はエラールートの描画で使うステータス
pub(crate) async fn render_route<S>(
    ctx: &mut Context<S>,
    route: &RouteDef<S>,
    status: Option<u16>,
) -> HandlerResult
where
    S: Send + Sync + 'static,
{
    let output = match &route.handler {
        None => PageResponse::Page(Page::default()),
        Some(handler) => match handler.lookup(&ctx.req.method) {
            Some(f) => f(ctx).await?,
            None => return Ok(Res::new().status(405).text("Method not allowed")),
        },
    };

    match output {
        PageResponse::Response(res) => Ok(res),
        PageResponse::Page(page) => {
            let Some(component) = &route.component else {
                return Err(Error::InvalidResponse(format!(
                    "route at {} returned page data but has no component",
                    ctx.req.path.pathname()
                )));
            };
            Ok(render_page(ctx, route, component, page, status))
        }
    }
}

fn render_page<S>(
    ctx: &Context<S>,
    route: &RouteDef<S>,
    component: &Component<S>,
    page: Page,
    status: Option<u16>,
) -> Res
where
    S: Send + Sync + 'static,
{
    let app = if route.config.skip_app_wrapper {
        None
    } else {
        ctx.internals.app.clone()
    };
    let layouts: SmallVec<[Layout<S>; 4]> = if route.config.skip_inherited_layouts {
        SmallVec::new()
    } else {
        ctx.internals.layouts.clone()
    };

    let props = |children| PageProps {
        ctx,
        data: &page.data,
        children,
    };
    let mut html = component(props(None));
    // 内側のレイアウトから順に包む
    for layout in layouts.iter().rev() {
        html = (layout.component)(props(Some(html)));
    }
    if let Some(app) = app {
        html = app(props(Some(html)));
    }

    let code = page.status.or(status).unwrap_or(200);
    let mut res = Res::new().status(code).html(html);
    for (key, value) in page.headers.iter() {
        res.header.set(key, value);
    }
    res
}
