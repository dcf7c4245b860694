pub mod app;
pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod fs_routes;
pub mod middleware;
pub mod render;
pub mod request;
pub mod response;
pub mod router;
pub mod segment;
pub mod server;
pub mod utils;

pub use crate::app::{App, AppHandler};
pub use crate::config::{AppConfig, Mode};
pub use crate::context::Context;
pub use crate::error::{Error, HandlerResult, HttpError};
pub use crate::middleware::{BoxedHandler, Handler, handler_fn};
pub use crate::request::Req;
pub use crate::response::Res;
pub use crate::server::ServerBuilder;
pub use tokio::main as tokio_main;
