use std::borrow::Cow;

use crate::utils::{collapse_slashes, url_decode};

/// Parsed request target.
///
/// リクエストターゲット。パス名・クエリ・フラグメントに分けて保持する。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Path {
    /// パスの文字列(完全)を保持
    raw: String,
    pathname: String,
    /// `?` を含まない
    search: String,
    query: Option<Vec<(String, String)>>,
}

impl Path {
    #[inline]
    pub fn new(raw: &str) -> Path {
        let without_fragment = raw.split('#').next().unwrap_or(raw);
        let (pathname, search) = match without_fragment.split_once('?') {
            Some((p, q)) => (p, q),
            None => (without_fragment, ""),
        };
        let pathname = if pathname.starts_with('/') {
            pathname.to_string()
        } else {
            format!("/{}", pathname)
        };
        Path {
            raw: raw.to_string(),
            pathname,
            search: search.to_string(),
            query: None,
        }
    }

    /// 生の全体パスを取得する
    /// 例: "/api/v1/user?id=123&name=John"
    #[inline]
    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// パスを取得する(クエリパラメータを除去)
    #[inline]
    pub fn pathname(&self) -> &str {
        &self.pathname
    }

    #[inline]
    pub fn search(&self) -> &str {
        &self.search
    }

    /// 連続する `/` を一つにまとめる
    pub fn normalize(&mut self) {
        if let Cow::Owned(collapsed) = collapse_slashes(&self.pathname) {
            self.pathname = collapsed;
        }
    }

    /// クエリパラメータを取得する
    #[inline]
    pub fn get_query(&mut self, key: &str) -> Option<String> {
        self.query_pairs()
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.clone())
    }

    /// クエリパラメータのデコード
    /// 遅延処理をする
    pub fn query_pairs(&mut self) -> &[(String, String)] {
        if self.query.is_none() {
            let pairs = self
                .search
                .split('&')
                .filter(|s| !s.is_empty())
                .map(|s| {
                    let (key, value) = s.split_once('=').unwrap_or((s, ""));
                    (
                        url_decode(&key.replace('+', " ")).into_owned(),
                        url_decode(&value.replace('+', " ")).into_owned(),
                    )
                })
                .collect();
            self.query = Some(pairs);
        }
        self.query.as_deref().unwrap_or(&[])
    }
}

impl std::fmt::Display for Path {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.search.is_empty() {
            write!(f, "{}", self.pathname)
        } else {
            write!(f, "{}?{}", self.pathname, self.search)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_pathname_and_query() {
        let mut path = Path::new("/api//user?id=123&name=John%20Doe#top");
        assert_eq!(path.pathname(), "/api//user");
        path.normalize();
        assert_eq!(path.pathname(), "/api/user");
        assert_eq!(path.get_query("id"), Some("123".to_string()));
        assert_eq!(path.get_query("name"), Some("John Doe".to_string()));
        assert_eq!(path.get_query("missing"), None);
        assert_eq!(path.to_string(), "/api/user?id=123&name=John%20Doe");
    }
}
