use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use kumiki::{
    App, Context, HttpError, Req, Res,
    fs_routes::{FsModule, FsRouteFile},
    handler_fn,
    render::{Layout, LayoutConfig, Page, PageProps, RouteConfig, RouteDef, component, route_fn},
    utils::method::Method,
};
use serde_json::json;

#[derive(Clone, Default)]
struct State {
    text: String,
}

fn init() {
    let _ = env_logger::try_init_from_env(env_logger::Env::default().default_filter_or("debug"));
}

fn wrap(tag: &'static str) -> Layout<State> {
    Layout::new(component(move |props: PageProps<'_, State>| {
        format!("<{tag}>{}</{tag}>", props.children.unwrap_or_default())
    }))
}

fn text_page(text: &'static str) -> RouteDef<State> {
    RouteDef::page(component(move |_props: PageProps<'_, State>| text.to_string()))
}

#[tokio::test]
async fn layouts_wrap_innermost_first() {
    init();
    let mut app: App<State> = App::new();
    app.app_wrapper(component(|props: PageProps<'_, State>| {
        format!("<html>{}</html>", props.children.unwrap_or_default())
    }));
    app.layout("/", wrap("root"));
    app.layout("/blog", wrap("blog"));
    app.route("/blog/post", text_page("post"));
    app.route("/about", text_page("about"));
    let handler = app.handler().unwrap();

    let res = handler.handle(Req::get("/blog/post")).await;
    assert_eq!(res.code, 200);
    assert_eq!(res.header.get("Content-Type"), Some("text/html; charset=utf-8"));
    assert_eq!(res.body_text(), "<html><root><blog>post</blog></root></html>");

    // 兄弟の枝のレイアウトは混ざらない
    let res = handler.handle(Req::get("/about")).await;
    assert_eq!(res.body_text(), "<html><root>about</root></html>");
}

#[tokio::test]
async fn layout_config_skips_inherited() {
    init();
    let mut app: App<State> = App::new();
    app.app_wrapper(component(|props: PageProps<'_, State>| {
        format!("<html>{}</html>", props.children.unwrap_or_default())
    }));
    app.layout("/", wrap("root"));
    app.layout(
        "/bare",
        wrap("bare").with_config(LayoutConfig {
            skip_app_wrapper: true,
            skip_inherited_layouts: true,
        }),
    );
    app.route("/bare/page", text_page("page"));
    app.route(
        "/plain",
        text_page("plain").with_config(RouteConfig {
            skip_app_wrapper: true,
            skip_inherited_layouts: true,
            ..RouteConfig::default()
        }),
    );
    let handler = app.handler().unwrap();

    let res = handler.handle(Req::get("/bare/page")).await;
    assert_eq!(res.body_text(), "<bare>page</bare>");
    let res = handler.handle(Req::get("/plain")).await;
    assert_eq!(res.body_text(), "plain");
}

#[tokio::test]
async fn route_handlers_produce_pages_or_responses() {
    init();
    let mut app: App<State> = App::new();
    app.route(
        "/items/:id",
        RouteDef::function(route_fn(|ctx: &mut Context<State>| {
            Box::pin(async move {
                let id = ctx.param("id").unwrap_or_default().to_string();
                if id == "raw" {
                    return Ok(Res::new().text("raw").into());
                }
                Ok(Page::new(json!({ "id": id }))
                    .status(201)
                    .with_header("X-Item", "yes")
                    .into())
            })
        }))
        .with_component(component(|props: PageProps<'_, State>| {
            format!("item {}", props.data["id"].as_str().unwrap_or_default())
        })),
    );
    app.route(
        "/no-component",
        RouteDef::function(route_fn(|_ctx: &mut Context<State>| {
            Box::pin(async move { Ok(Page::new(json!(null)).into()) })
        })),
    );
    let handler = app.handler().unwrap();

    let res = handler.handle(Req::get("/items/7")).await;
    assert_eq!(res.code, 201);
    assert_eq!(res.header.get("X-Item"), Some("yes"));
    assert_eq!(res.body_text(), "item 7");

    let res = handler.handle(Req::post("/items/raw")).await;
    assert_eq!(res.code, 200);
    assert_eq!(res.body_text(), "raw");

    // コンポーネントがないのにページデータを返すのはバグ
    let res = handler.handle(Req::get("/no-component")).await;
    assert_eq!(res.code, 500);
}

#[tokio::test]
async fn per_method_route_handlers() {
    init();
    let mut app: App<State> = App::new();
    app.route(
        "/form",
        RouteDef::default()
            .on(
                Method::GET,
                route_fn(|_ctx: &mut Context<State>| {
                    Box::pin(async move { Ok(Res::new().text("form").into()) })
                }),
            )
            .on(
                Method::POST,
                route_fn(|_ctx: &mut Context<State>| {
                    Box::pin(async move { Ok(Res::new().status(201).text("saved").into()) })
                }),
            ),
    );
    let handler = app.handler().unwrap();

    assert_eq!(handler.handle(Req::get("/form")).await.body_text(), "form");
    assert_eq!(handler.handle(Req::post("/form")).await.code, 201);
    assert_eq!(handler.handle(Req::new(Method::HEAD, "/form")).await.code, 200);
    assert_eq!(handler.handle(Req::new(Method::DELETE, "/form")).await.code, 405);

    let res = handler.handle(Req::new(Method::OPTIONS, "/form")).await;
    assert_eq!(res.code, 204);
    assert_eq!(res.header.get("Allow"), Some("GET, POST, HEAD"));
}

#[tokio::test]
async fn error_routes_catch_below_their_segment() {
    init();
    let mut app: App<State> = App::new();
    app.on_error(
        "/admin",
        RouteDef::page(component(|props: PageProps<'_, State>| {
            let status = props.ctx.error.as_ref().map(|e| e.status()).unwrap_or_default();
            format!("admin error {}", status)
        })),
    );
    app.get("/admin/panel", |_ctx: &mut Context<State>| {
        Box::pin(async move { Err(HttpError::new(403).into()) })
    });
    app.get("/public", |_ctx: &mut Context<State>| {
        Box::pin(async move { Err(HttpError::new(403).into()) })
    });
    let handler = app.handler().unwrap();

    let res = handler.handle(Req::get("/admin/panel")).await;
    assert_eq!(res.code, 403);
    assert_eq!(res.body_text(), "admin error 403");

    // 枝の外では既定のエラーハンドラ
    let res = handler.handle(Req::get("/public")).await;
    assert_eq!(res.code, 403);
    assert_eq!(res.body_text(), "Forbidden");
}

#[tokio::test]
async fn not_found_route_wins_for_404() {
    init();
    let mut app: App<State> = App::new();
    app.not_found(RouteDef::page(component(|props: PageProps<'_, State>| {
        format!("missing {}", props.ctx.url().pathname())
    })));
    app.on_error("/admin", text_page("admin error"));
    app.get("/admin/gone", |_ctx: &mut Context<State>| {
        Box::pin(async move { Err(HttpError::not_found().into()) })
    });
    let handler = app.handler().unwrap();

    let res = handler.handle(Req::get("/nope")).await;
    assert_eq!(res.code, 404);
    assert_eq!(res.body_text(), "missing /nope");

    let res = handler.handle(Req::get("/admin/gone")).await;
    assert_eq!(res.code, 404);
    assert_eq!(res.body_text(), "missing /admin/gone");
}

#[tokio::test]
async fn lazy_route_resolves_once() {
    init();
    let loads = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&loads);

    let mut app: App<State> = App::new();
    app.lazy_route("/lazy", RouteConfig::default(), move || {
        let counter = Arc::clone(&counter);
        async move {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok::<_, kumiki::Error>(text_page("lazy"))
        }
    });
    let handler = app.handler().unwrap();
    assert_eq!(loads.load(Ordering::SeqCst), 0);

    for _ in 0..3 {
        let res = handler.handle(Req::get("/lazy")).await;
        assert_eq!(res.body_text(), "lazy");
    }
    assert_eq!(loads.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn fs_route_files_become_routes() {
    init();
    let files = vec![
        FsRouteFile::new(
            "/blog/[slug]",
            FsModule::Route(
                RouteDef::function(route_fn(|ctx: &mut Context<State>| {
                    Box::pin(async move {
                        let slug = ctx.param("slug").unwrap_or_default().to_string();
                        Ok(Page::new(json!({ "slug": slug })).into())
                    })
                }))
                .with_component(component(|props: PageProps<'_, State>| {
                    props.data["slug"].as_str().unwrap_or_default().to_string()
                })),
            ),
        ),
        FsRouteFile::new("/index", FsModule::Route(RouteDef::page(component(
            |props: PageProps<'_, State>| format!("home {}", props.ctx.state.text),
        )))),
        FsRouteFile::new("/_404", FsModule::Route(text_page("nf"))),
        FsRouteFile::new("/blog/_layout", FsModule::Layout(wrap("blog"))),
        FsRouteFile::new(
            "/_middleware",
            FsModule::Middleware(vec![handler_fn(|ctx: &mut Context<State>| {
                Box::pin(async move {
                    ctx.state.text = "mw".to_string();
                    ctx.next().await
                })
            })]),
        ),
        FsRouteFile::new(
            "/_app",
            FsModule::App(component(|props: PageProps<'_, State>| {
                format!("<html>{}</html>", props.children.unwrap_or_default())
            })),
        ),
    ];

    let mut app: App<State> = App::new();
    app.fs_routes("/", files).unwrap();
    let handler = app.handler().unwrap();

    let res = handler.handle(Req::get("/")).await;
    assert_eq!(res.body_text(), "<html>home mw</html>");

    let res = handler.handle(Req::get("/blog/hello")).await;
    assert_eq!(res.body_text(), "<html><blog>hello</blog></html>");

    let res = handler.handle(Req::get("/zzz")).await;
    assert_eq!(res.code, 404);
    assert_eq!(res.body_text(), "<html>nf</html>");
}

#[tokio::test]
async fn mounted_app_wrapper_is_ignored() {
    init();
    let mut inner: App<State> = App::new();
    inner.app_wrapper(component(|_props: PageProps<'_, State>| "inner wrapper".to_string()));
    inner.route("/page", text_page("page"));

    let mut app: App<State> = App::new();
    app.app_wrapper(component(|props: PageProps<'_, State>| {
        format!("[{}]", props.children.unwrap_or_default())
    }));
    app.mount("/sub", inner);
    let handler = app.handler().unwrap();

    let res = handler.handle(Req::get("/sub/page")).await;
    assert_eq!(res.body_text(), "[page]");
}

#[tokio::test]
async fn fs_index_and_groups_use_their_directory_segment() {
    init();
    let files = vec![
        FsRouteFile::new(
            "/blog/_middleware",
            FsModule::Middleware(vec![handler_fn(|ctx: &mut Context<State>| {
                Box::pin(async move {
                    ctx.state.text = "blog mw".to_string();
                    ctx.next().await
                })
            })]),
        ),
        FsRouteFile::new("/blog/_layout", FsModule::Layout(wrap("blog"))),
        FsRouteFile::new("/blog/_error", FsModule::Route(text_page("blog error"))),
        FsRouteFile::new(
            "/blog/index",
            FsModule::Route(RouteDef::page(component(|props: PageProps<'_, State>| {
                format!("index {}", props.ctx.state.text)
            }))),
        ),
        FsRouteFile::new(
            "/blog/broken",
            FsModule::Route(RouteDef::function(route_fn(|_ctx: &mut Context<State>| {
                Box::pin(async move { Err(HttpError::new(500).into()) })
            }))),
        ),
        FsRouteFile::new("/(marketing)/_layout", FsModule::Layout(wrap("mkt"))),
        FsRouteFile::new("/(marketing)/about", FsModule::Route(text_page("about"))),
        FsRouteFile::new("/contact", FsModule::Route(text_page("contact"))),
    ];
    let mut app: App<State> = App::new();
    app.fs_routes("/", files).unwrap();
    let handler = app.handler().unwrap();

    // index はディレクトリのミドルウェアとレイアウトを受け継ぐ
    let res = handler.handle(Req::get("/blog")).await;
    assert_eq!(res.code, 200);
    assert_eq!(res.body_text(), "<blog>index blog mw</blog>");

    let res = handler.handle(Req::get("/blog/broken")).await;
    assert_eq!(res.code, 500);
    assert_eq!(res.body_text(), "<blog>blog error</blog>");

    // グループは URL から消えるが、レイアウトはグループ内だけ
    let res = handler.handle(Req::get("/about")).await;
    assert_eq!(res.body_text(), "<mkt>about</mkt>");
    let res = handler.handle(Req::get("/contact")).await;
    assert_eq!(res.body_text(), "contact");
}

#[tokio::test]
async fn fs_optional_and_catch_all_files() {
    init();
    let echo = |name: &'static str| {
        RouteDef::function(route_fn(move |ctx: &mut Context<State>| {
            Box::pin(async move {
                let value = ctx.param(name).unwrap_or_default().to_string();
                Ok(Res::new().text(format!("{}={}", name, value)).into())
            })
        }))
    };
    let files = vec![
        FsRouteFile::new("/shop/[[id]]", FsModule::Route(echo("id"))),
        FsRouteFile::new("/docs/[...rest]", FsModule::Route(echo("rest"))),
    ];
    let mut app: App<State> = App::new();
    app.fs_routes("/", files).unwrap();
    let handler = app.handler().unwrap();

    assert_eq!(handler.handle(Req::get("/shop")).await.body_text(), "id=");
    assert_eq!(handler.handle(Req::get("/shop/9")).await.body_text(), "id=9");
    assert_eq!(handler.handle(Req::get("/shop/9/x")).await.code, 404);
    assert_eq!(handler.handle(Req::get("/docs")).await.body_text(), "rest=");
    assert_eq!(handler.handle(Req::get("/docs/a/b")).await.body_text(), "rest=a/b");
}

#[tokio::test]
async fn error_route_renders_without_child_layouts() {
    init();
    let mut app: App<State> = App::new();
    app.layout("/admin", wrap("admin"));
    app.layout("/admin/deep", wrap("deep"));
    app.on_error("/admin", text_page("oops"));
    app.route(
        "/admin/deep/page",
        RouteDef::function(route_fn(|_ctx: &mut Context<State>| {
            Box::pin(async move { Err(HttpError::new(403).into()) })
        })),
    );
    app.route("/admin/deep/ok", text_page("ok"));
    let handler = app.handler().unwrap();

    // 子のレイアウトは例外で抜けるときに外される
    let res = handler.handle(Req::get("/admin/deep/page")).await;
    assert_eq!(res.code, 403);
    assert_eq!(res.body_text(), "<admin>oops</admin>");

    let res = handler.handle(Req::get("/admin/deep/ok")).await;
    assert_eq!(res.body_text(), "<admin><deep>ok</deep></admin>");
}
