pub mod path;

use bytes::Bytes;

use crate::utils::{header::Header, method::Method};

pub use path::Path;

/// An incoming HTTP request as the dispatcher sees it.
///
/// ディスパッチャに渡されるリクエスト
#[derive(Debug, Clone)]
pub struct Req {
    pub method: Method,
    pub path: Path,
    pub header: Header,
    pub body: Bytes,
}

impl Req {
    pub fn new(method: Method, target: &str) -> Req {
        Req {
            method,
            path: Path::new(target),
            header: Header::new(),
            body: Bytes::new(),
        }
    }

    pub fn get(target: &str) -> Req {
        Req::new(Method::GET, target)
    }

    pub fn post(target: &str) -> Req {
        Req::new(Method::POST, target)
    }

    pub fn with_header(mut self, key: &str, value: &str) -> Req {
        self.header.append(key, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Req {
        self.body = body.into();
        self
    }

    /// ボディを UTF-8 文字列として取得する
    pub fn body_text(&self) -> Result<&str, std::str::Utf8Error> {
        std::str::from_utf8(&self.body)
    }

    /// ボディを JSON として取得する
    pub fn body_json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: for<'de> serde::Deserialize<'de>,
    {
        serde_json::from_slice(&self.body)
    }
}
