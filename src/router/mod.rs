//! Ordered route table and matcher
//!
//! 登録順のルートテーブル。ワイルドカードのミドルウェアを積み上げつつ、
//! 最初にメソッドまで一致したエントリで探索を終える。

pub mod pattern;

use std::sync::Arc;

use ahash::AHashMap as Map;
use smallvec::SmallVec;

use crate::{error::PatternError, utils::method::Method};

pub use pattern::{RoutePattern, is_pattern, path_to_pattern};

/// Method an entry is registered for.
///
/// エントリが受け付けるメソッド
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    All,
    Only(Method),
}

impl RouteMethod {
    #[inline]
    pub fn accepts(&self, method: &Method) -> bool {
        match self {
            RouteMethod::All => true,
            RouteMethod::Only(m) => m == method,
        }
    }
}

impl std::fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RouteMethod::All => f.write_str("ALL"),
            RouteMethod::Only(m) => write!(f, "{}", m),
        }
    }
}

impl From<Method> for RouteMethod {
    fn from(method: Method) -> Self {
        RouteMethod::Only(method)
    }
}

#[derive(Debug, Clone)]
enum RoutePath {
    /// 完全一致 (`/*` はすべてにマッチ)
    Literal(String),
    Pattern(RoutePattern),
}

impl RoutePath {
    fn as_str(&self) -> &str {
        match self {
            RoutePath::Literal(s) => s,
            RoutePath::Pattern(p) => p.as_str(),
        }
    }
}

struct RouteEntry<T> {
    method: RouteMethod,
    path: RoutePath,
    handlers: Arc<[T]>,
}

/// Outcome of [`UrlPatternRouter::match_route`].
///
/// `handlers` はグローバルミドルウェア、ワイルドカード、一致したルートの順に並ぶ。
#[derive(Debug)]
pub struct RouteResult<T> {
    pub params: Map<String, String>,
    pub handlers: SmallVec<[Arc<[T]>; 4]>,
    /// メソッドまで一致したルートがある
    pub method_match: bool,
    /// パスは一致したがメソッドが違うルートがある (405 の判定に使う)
    pub pattern_match: bool,
    pub pattern: Option<String>,
}

impl<T> RouteResult<T> {
    fn new() -> Self {
        RouteResult {
            params: Map::default(),
            handlers: SmallVec::new(),
            method_match: false,
            pattern_match: false,
            pattern: None,
        }
    }
}

/// Insertion-ordered route table.
///
/// 登録順を保つルートテーブル。構築後はリクエスト処理中に変更されない。
pub struct UrlPatternRouter<T> {
    routes: Vec<RouteEntry<T>>,
    /// マッチのたびに先頭グループとして共有する
    middlewares: Arc<[T]>,
}

impl<T> Default for UrlPatternRouter<T> {
    fn default() -> Self {
        UrlPatternRouter::new()
    }
}

impl<T> UrlPatternRouter<T> {
    pub fn new() -> Self {
        UrlPatternRouter {
            routes: Vec::new(),
            middlewares: Arc::from(Vec::new()),
        }
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }

    /// Global middlewares, in registration order.
    pub fn middlewares(&self) -> &Arc<[T]> {
        &self.middlewares
    }

    /// Register `handlers` for `method` and `path`.
    ///
    /// `/*` 以外のリテラルは文字列比較、それ以外はパターンとしてコンパイルする。
    pub fn add(
        &mut self,
        method: RouteMethod,
        path: &str,
        handlers: impl Into<Arc<[T]>>,
        prepend: bool,
    ) -> Result<(), PatternError> {
        let route_path = if path != "/*" && is_pattern(path) {
            RoutePath::Pattern(RoutePattern::new(path)?)
        } else {
            RoutePath::Literal(path.to_string())
        };
        let entry = RouteEntry {
            method,
            path: route_path,
            handlers: handlers.into(),
        };
        if prepend {
            self.routes.insert(0, entry);
        } else {
            self.routes.push(entry);
        }
        Ok(())
    }

    /// Methods registered for exactly `pattern`, in registration order.
    ///
    /// `OPTIONS` の `Allow` ヘッダ用。`ALL` は含めない。
    pub fn allowed_methods(&self, pattern: &str) -> Vec<Method> {
        let mut allowed: Vec<Method> = Vec::new();
        for route in &self.routes {
            if route.path.as_str() != pattern {
                continue;
            }
            if let RouteMethod::Only(m) = &route.method {
                if !allowed.contains(m) {
                    allowed.push(m.clone());
                }
            }
        }
        allowed
    }

    /// Match `method` and `pathname` against the table.
    ///
    /// - `ALL` の `/*` エントリは積み上げて探索を続ける
    /// - 最初にメソッドまで一致したエントリで即座に返す
    /// - パスだけ一致したエントリは `pattern_match` を立てる
    pub fn match_route(&self, method: &Method, pathname: &str) -> RouteResult<T> {
        let mut result = RouteResult::new();
        if !self.middlewares.is_empty() {
            result.handlers.push(Arc::clone(&self.middlewares));
        }

        for route in &self.routes {
            let params = match &route.path {
                RoutePath::Literal(path) => {
                    if path == "/*" || path == pathname {
                        Some(Vec::new())
                    } else {
                        None
                    }
                }
                RoutePath::Pattern(pattern) => pattern.exec(pathname),
            };
            let Some(params) = params else {
                continue;
            };

            let is_all = route.method == RouteMethod::All;
            if !is_all {
                result.pattern_match = true;
                result.pattern = Some(route.path.as_str().to_string());
            }
            if !route.method.accepts(method) {
                continue;
            }

            result.handlers.push(Arc::clone(&route.handlers));
            if is_all && route.path.as_str() == "/*" {
                continue;
            }
            result.pattern = Some(route.path.as_str().to_string());
            result.params.extend(params);
            result.method_match = true;
            return result;
        }
        result
    }
}

impl<T: Clone> UrlPatternRouter<T> {
    /// Middleware that runs first for every request, matched or not.
    ///
    /// すべてのリクエストで最初に実行されるミドルウェアを登録する。
    pub fn add_middleware(&mut self, handler: T) {
        let mut middlewares = self.middlewares.to_vec();
        middlewares.push(handler);
        self.middlewares = Arc::from(middlewares);
    }
}
