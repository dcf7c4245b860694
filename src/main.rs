use kumiki::{
    App, AppConfig, Context, HttpError, Res, ServerBuilder,
    render::{Layout, Page, PageProps, RouteDef, component, route_fn},
};
use log::error;
use serde_json::json;

#[derive(Clone, Default)]
struct State {
    request_id: u64,
}

#[tokio::main]
async fn main() {
    env_logger::builder().filter_level(log::LevelFilter::Info).init();

    let config = match AppConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("invalid configuration: {}", e);
            return;
        }
    };

    let mut app: App<State> = App::new();
    app.config(config);

    app.use_global(|ctx: &mut Context<State>| {
        Box::pin(async move {
            ctx.state.request_id = rand_id();
            let res = ctx.next().await?;
            Ok(res.with_header("X-Request-Id", &ctx.state.request_id.to_string()))
        })
    });

    app.app_wrapper(component(|props: PageProps<'_, State>| {
        format!(
            "<!DOCTYPE html><html><body>{}</body></html>",
            props.children.unwrap_or_default()
        )
    }));
    app.layout(
        "/blog",
        Layout::new(component(|props: PageProps<'_, State>| {
            format!("<main class=\"blog\">{}</main>", props.children.unwrap_or_default())
        })),
    );

    app.get("/hello", |_ctx: &mut Context<State>| {
        Box::pin(async move { Ok(Res::new().text("Hello, World!")) })
    });

    app.get("/hello/:name", |ctx: &mut Context<State>| {
        Box::pin(async move {
            let name = ctx.param("name").unwrap_or("World").to_string();
            Ok(Res::new().text(format!("Hello, {}!", name)))
        })
    });

    app.get("/json", |_ctx: &mut Context<State>| {
        Box::pin(async move {
            let res = Res::new().json_value(&json!({ "name": "kumiki", "version": "0.1" }))?;
            Ok(res)
        })
    });

    app.get("/old", |ctx: &mut Context<State>| {
        Box::pin(async move { Ok(ctx.redirect("/hello", Some(301))) })
    });

    app.route(
        "/blog/:slug",
        RouteDef::function(route_fn(|ctx: &mut Context<State>| {
            Box::pin(async move {
                let slug = ctx.param("slug").unwrap_or_default().to_string();
                if slug == "missing" {
                    return Err(HttpError::not_found().into());
                }
                Ok(Page::new(json!({ "slug": slug })).into())
            })
        }))
        .with_component(component(|props: PageProps<'_, State>| {
            format!("<h1>{}</h1>", props.data["slug"].as_str().unwrap_or_default())
        })),
    );

    app.not_found(RouteDef::page(component(|props: PageProps<'_, State>| {
        format!("<h1>Not found: {}</h1>", props.ctx.url().pathname())
    })));

    let handler = match app.handler() {
        Ok(handler) => handler,
        Err(e) => {
            error!("failed to build routes: {}", e);
            return;
        }
    };

    let server = ServerBuilder::new().bind([0, 0, 0, 0]).port(8080).build(handler);
    if let Err(e) = server.run().await {
        error!("server stopped: {}", e);
    }
}

fn rand_id() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default()
}
