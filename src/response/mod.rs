use bytes::Bytes;

use crate::utils::{collapse_slashes, header::Header, status::HttpStatusCode};

/// An HTTP response produced by a handler chain.
///
/// ハンドラチェーンが返すレスポンス
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Res {
    /// ステータスコード
    pub code: u16,
    /// ヘッダ
    pub header: Header,
    /// ボディ
    pub body: Body,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum Body {
    #[default]
    Empty,
    Text(String),
    Binary(Bytes),
}

impl Body {
    pub fn len(&self) -> usize {
        match self {
            Body::Empty => 0,
            Body::Text(text) => text.len(),
            Body::Binary(data) => data.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self {
            Body::Empty => &[],
            Body::Text(text) => text.as_bytes(),
            Body::Binary(data) => data,
        }
    }
}

impl Default for Res {
    fn default() -> Self {
        Res::new()
    }
}

impl Res {
    #[inline]
    pub fn new() -> Res {
        Res {
            code: 200,
            header: Header::new(),
            body: Body::Empty,
        }
    }

    /// ステータスコードだけのレスポンス
    #[inline]
    pub fn empty(code: u16) -> Res {
        Res::new().status(code)
    }

    /// ステータスコードをセットする
    #[inline]
    pub fn set_status(&mut self, code: u16) {
        self.code = code;
    }

    #[inline]
    pub fn set_header(&mut self, key: &str, value: &str) {
        self.header.set(key, value);
    }

    #[inline]
    pub fn status(mut self, code: u16) -> Self {
        self.code = code;
        self
    }

    #[inline]
    pub fn with_header(mut self, key: &str, value: &str) -> Self {
        self.header.set(key, value);
        self
    }

    #[inline]
    fn text_body(mut self, text: impl Into<String>, content_type: &str) -> Self {
        let text = text.into();
        self.header.set("Content-Type", content_type);
        self.header.set("Content-Length", &text.len().to_string());
        self.body = Body::Text(text);
        self
    }

    /// テキストレスポンス
    #[inline]
    pub fn text(self, text: impl Into<String>) -> Self {
        self.text_body(text, "text/plain; charset=utf-8")
    }

    /// HTMLレスポンス
    #[inline]
    pub fn html(self, text: impl Into<String>) -> Self {
        self.text_body(text, "text/html; charset=utf-8")
    }

    /// JSONレスポンス
    #[inline]
    pub fn json(self, text: impl Into<String>) -> Self {
        self.text_body(text, "application/json")
    }

    /// JSONレスポンス
    #[inline]
    pub fn json_value<T: serde::Serialize>(self, value: &T) -> Result<Self, serde_json::Error> {
        let text = serde_json::to_string(value)?;
        Ok(self.json(text))
    }

    #[inline]
    pub fn data(mut self, data: impl Into<Bytes>, content_type: &str) -> Self {
        let data = data.into();
        self.header.set("Content-Type", content_type);
        self.header.set("Content-Length", &data.len().to_string());
        self.body = Body::Binary(data);
        self
    }

    /// リダイレクトレスポンス
    ///
    /// パス形式の移動先は連続する `/` をまとめる。`//evil.example` のような
    /// プロトコル相対URLへ飛ばされないようにするため。
    pub fn redirect(location: &str, code: u16) -> Res {
        let mut target = location.to_string();
        if location != "/" && location.starts_with('/') {
            let idx = location.find(['?', '#']);
            let (pathname, search) = match idx {
                Some(i) => location.split_at(i),
                None => (location, ""),
            };
            target = format!("{}{}", collapse_slashes(pathname), search);
        }
        Res::new().status(code).with_header("Location", &target)
    }

    /// ボディを文字列として見る (テスト用途)
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(self.body.as_bytes()).into_owned()
    }

    pub fn reason(&self) -> &'static str {
        HttpStatusCode::reason_phrase(self.code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn redirect_collapses_slashes_but_keeps_query() {
        let res = Res::redirect("//evil.example//a?x=//y", 302);
        assert_eq!(res.code, 302);
        assert_eq!(res.header.get("Location"), Some("/evil.example/a?x=//y"));

        let res = Res::redirect("https://example.com//a", 307);
        assert_eq!(res.header.get("Location"), Some("https://example.com//a"));
    }

    #[test]
    fn text_sets_length_and_type() {
        let res = Res::new().status(201).text("héllo");
        assert_eq!(res.code, 201);
        assert_eq!(res.header.get("Content-Length"), Some("6"));
        assert_eq!(res.header.get("Content-Type"), Some("text/plain; charset=utf-8"));
        assert_eq!(res.body_text(), "héllo");
    }
}
