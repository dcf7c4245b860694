//! Tokio HTTP/1.1 server feeding requests into an [`AppHandler`]
//!
//! 接続ごとにタスクを立ち上げ、keep-alive の間は同じ接続で処理を続ける。

pub mod http;

use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::Instant,
};

use log::{debug, error, info, warn};
use socket2::{Domain, Protocol, Socket, Type};
use tokio::{
    io::BufReader,
    net::{TcpListener, TcpStream},
};

use crate::{app::AppHandler, error::ServerError, utils::method::Method};

use self::http::{
    error_response, keep_alive_requested, read_request, should_close_connection, write_response,
};

pub const DEFAULT_TCP_BACKLOG: u32 = 4096;

pub struct ServerBuilder {
    bind: [u8; 4],
    port: u16,
    nodelay: bool,
    backlog: u32,
}

impl Default for ServerBuilder {
    fn default() -> Self {
        ServerBuilder::new()
    }
}

impl ServerBuilder {
    pub fn new() -> ServerBuilder {
        ServerBuilder {
            bind: [0, 0, 0, 0],
            port: 8080,
            nodelay: true,
            backlog: DEFAULT_TCP_BACKLOG,
        }
    }

    pub fn bind(mut self, bind: [u8; 4]) -> Self {
        self.bind = bind;
        self
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// TCP_NODELAY を設定する
    pub fn nodelay(mut self, nodelay: bool) -> Self {
        self.nodelay = nodelay;
        self
    }

    /// listen のバックログ
    pub fn backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    pub fn build<S>(self, handler: AppHandler<S>) -> Server<S>
    where
        S: Clone + Send + Sync + 'static,
    {
        Server {
            handler: Arc::new(handler),
            addr: SocketAddr::from((Ipv4Addr::from(self.bind), self.port)),
            nodelay: self.nodelay,
            backlog: self.backlog,
        }
    }
}

pub struct Server<S> {
    handler: Arc<AppHandler<S>>,
    addr: SocketAddr,
    nodelay: bool,
    backlog: u32,
}

impl<S> Server<S>
where
    S: Clone + Send + Sync + 'static,
{
    fn listen(&self) -> Result<TcpListener, ServerError> {
        let socket = Socket::new(Domain::IPV4, Type::STREAM, Some(Protocol::TCP))?;
        socket.set_reuse_address(true)?;
        socket.bind(&self.addr.into())?;
        socket.listen(self.backlog.min(i32::MAX as u32) as i32)?;
        socket.set_nonblocking(true)?;
        let listener: std::net::TcpListener = socket.into();
        Ok(TcpListener::from_std(listener)?)
    }

    pub async fn run(self) -> Result<(), ServerError> {
        let listener = self.listen()?;
        info!("listening on http://{}", self.addr);

        loop {
            let (stream, peer) = listener.accept().await?;
            if let Err(e) = stream.set_nodelay(self.nodelay) {
                warn!("Failed to set TCP_NODELAY for {}: {}", peer, e);
            }
            let handler = Arc::clone(&self.handler);
            tokio::spawn(async move {
                if let Err(e) = serve_connection(handler, stream).await {
                    debug!("connection {} closed with error: {}", peer, e);
                }
            });
        }
    }
}

/// 一つの接続上のリクエストを順番に処理する
async fn serve_connection<S>(
    handler: Arc<AppHandler<S>>,
    stream: TcpStream,
) -> Result<(), ServerError>
where
    S: Clone + Send + Sync + 'static,
{
    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        let parsed = match read_request(&mut reader).await {
            Ok(parsed) => parsed,
            Err(ServerError::ConnectionClosed) => return Ok(()),
            Err(ServerError::Io(e)) => return Err(ServerError::Io(e)),
            Err(e) => {
                warn!("bad request: {}", e);
                let res = error_response(&e);
                write_response(&mut writer, &res, false, false).await?;
                return Err(e);
            }
        };
        let start = Instant::now();
        let version = parsed.version;
        let req = parsed.req;
        let head_only = req.method == Method::HEAD;
        let head_info = format!("{} {} {} ", req.method, req.path, version);
        let keep_alive = keep_alive_requested(&version, &req.header);

        let res = handler.handle(req).await;
        let close = should_close_connection(keep_alive, &res);
        if let Err(e) = write_response(&mut writer, &res, head_only, !close).await {
            error!("Failed to flush response: {}", e);
            return Err(e);
        }
        debug!("processing: {:?}", start.elapsed());

        // ログ出力（レスポンスコードに応じて色分け）
        if res.code >= 500 {
            error!("{}- \x1b[31m{}\x1b[0m", head_info, res.code);
        } else if res.code >= 400 {
            warn!("{}- \x1b[33m{}\x1b[0m", head_info, res.code);
        } else if res.code >= 300 {
            info!("{}- \x1b[34m{}\x1b[0m", head_info, res.code);
        } else if res.code >= 200 {
            info!("{}- \x1b[32m{}\x1b[0m", head_info, res.code);
        } else {
            info!("{}- \x1b[36m{}\x1b[0m", head_info, res.code);
        }

        if close {
            return Ok(());
        }
    }
}
