//! Route pattern compiler
//!
//! Two stages:
//! 1. [`path_to_pattern`] turns a filesystem-style template (`blog/[slug]`,
//!    `docs/[...rest]`, `[[lang]]/about`, `(group)/page`) into a route pattern
//!    string (`/blog/:slug`, `/docs/:rest*`, `{/:lang}?/about`, `/page`).
//! 2. [`RoutePattern::new`] compiles a route pattern string into an anchored
//!    regex with one capture group per parameter.
//!
//! ルートパターンコンパイラ。ファイルシステム風のテンプレートをパターン文字列へ、
//! パターン文字列を正規表現へ変換する。

use regex::Regex;

use crate::{error::PatternError, utils::url_decode};

/// Characters that make a route path a pattern instead of a literal.
const PATTERN_CHARS: &[char] = &['*', ':', '{', '}', '+', '?', '(', ')'];

/// Whether `path` needs pattern compilation or can be compared literally.
#[inline]
pub fn is_pattern(path: &str) -> bool {
    path.contains(PATTERN_CHARS)
}

#[inline]
fn is_name_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '_' || ch == '$'
}

/// Translate a filesystem-style template into a route pattern string.
///
/// ファイルパス風テンプレートをルートパターン文字列に変換する。
///
/// ```
/// use kumiki::router::pattern::path_to_pattern;
///
/// assert_eq!(path_to_pattern("foo/[id]").unwrap(), "/foo/:id");
/// assert_eq!(path_to_pattern("foo/[[id]]").unwrap(), "/foo{/:id}?");
/// assert_eq!(path_to_pattern("foo/[...rest]").unwrap(), "/foo/:rest*");
/// assert!(path_to_pattern("foo/[a][b]").is_err());
/// ```
pub fn path_to_pattern(path: &str) -> Result<String, PatternError> {
    let trimmed = path.strip_prefix('/').unwrap_or(path);
    let mut parts: Vec<&str> = trimmed.split('/').collect();

    if parts.last() == Some(&"index") {
        if parts.len() == 1 {
            return Ok("/".to_string());
        }
        parts.pop();
    }

    let mut route = String::new();
    for part in parts {
        // Case: /[...foo]
        if part.starts_with("[...") && part.ends_with(']') && part.len() > 5 {
            route.push_str("/:");
            route.push_str(&part[4..part.len() - 1]);
            route.push('*');
            continue;
        }

        // グループはURLに現れない
        // /foo/(bar) -> /foo, /(foo)/bar -> /bar
        if part.starts_with('(') && part.ends_with(')') {
            continue;
        }

        // `[id][bar]` はどこで id が終わるか曖昧
        if part.contains("][") {
            return Err(PatternError::AdjacentParams(path.to_string()));
        }

        let chars: Vec<char> = part.chars().collect();
        let mut pattern = String::new();
        let mut group_open: i32 = 0;
        let mut optional = false;
        let mut j = 0;
        while j < chars.len() {
            match chars[j] {
                '[' => {
                    if chars.get(j + 1) == Some(&'[') {
                        // `foo-[[bar]]` は不可
                        if j > 0 {
                            return Err(PatternError::OptionalNotFullSegment(path.to_string()));
                        }
                        group_open += 1;
                        optional = true;
                        pattern.push_str("{/");
                        j += 1;
                    }
                    pattern.push(':');
                    group_open += 1;
                }
                ']' => {
                    let closes_optional = chars.get(j + 1) == Some(&']');
                    if closes_optional {
                        // `[[foo]]-bar` は不可
                        if j + 2 < chars.len() {
                            return Err(PatternError::OptionalNotFullSegment(path.to_string()));
                        }
                        group_open -= 1;
                        pattern.push_str("}?");
                        j += 1;
                    }
                    group_open -= 1;
                    if group_open < 0 {
                        return Err(PatternError::UnbalancedBrackets(path.to_string()));
                    }
                    // `[id]abc` は `{:id}abc` にして名前の終わりを明示する
                    if !closes_optional && chars.get(j + 1).is_some_and(|c| is_name_char(*c)) {
                        if let Some(colon) = pattern.rfind(':') {
                            pattern.insert(colon, '{');
                            pattern.push('}');
                        }
                    }
                }
                ch => pattern.push(ch),
            }
            j += 1;
        }
        if group_open != 0 {
            return Err(PatternError::UnbalancedBrackets(path.to_string()));
        }

        if !optional {
            route.push('/');
        }
        route.push_str(&pattern);
    }

    // Case: /(group)/index
    if route.is_empty() {
        route.push('/');
    }
    Ok(route)
}

/// A compiled route pattern.
///
/// コンパイル済みのルートパターン。構築後は不変。
#[derive(Debug, Clone)]
pub struct RoutePattern {
    source: String,
    regex: Regex,
    /// 正規表現のグループ `p0`, `p1`, ... に対応するパラメータ名
    names: Vec<String>,
    /// 全体が省略可能なパターン (`/:rest*` など) は `/` にもマッチさせる
    matches_root: bool,
}

impl PartialEq for RoutePattern {
    fn eq(&self, other: &Self) -> bool {
        self.source == other.source
    }
}

struct Compiler<'a> {
    source: &'a str,
    chars: Vec<char>,
    pos: usize,
    out: String,
    names: Vec<String>,
    depth: usize,
}

impl<'a> Compiler<'a> {
    fn new(source: &'a str) -> Self {
        Compiler {
            source,
            chars: source.chars().collect(),
            pos: 0,
            out: String::with_capacity(source.len() * 2),
            names: Vec::new(),
            depth: 0,
        }
    }

    fn err(&self, reason: impl Into<String>) -> PatternError {
        PatternError::InvalidSyntax {
            pattern: self.source.to_string(),
            reason: reason.into(),
        }
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn compile(mut self) -> Result<(String, Vec<String>), PatternError> {
        self.out.push('^');
        while let Some(ch) = self.peek() {
            self.pos += 1;
            match ch {
                ':' => self.param()?,
                '*' => {
                    self.out.push_str("(?:.*)");
                }
                '{' => {
                    self.depth += 1;
                    self.out.push_str("(?:");
                }
                '}' => {
                    if self.depth == 0 {
                        return Err(self.err("Unexpected '}'."));
                    }
                    self.depth -= 1;
                    self.out.push(')');
                    if let Some(m @ ('?' | '*' | '+')) = self.peek() {
                        self.pos += 1;
                        self.out.push(m);
                    }
                }
                '(' => {
                    let re = self.custom_regex()?;
                    self.out.push_str("(?:");
                    self.out.push_str(&re);
                    self.out.push(')');
                }
                '\\' => match self.peek() {
                    Some(next) => {
                        self.pos += 1;
                        self.out.push_str(&regex::escape(&next.to_string()));
                    }
                    None => return Err(self.err("Trailing escape character.")),
                },
                '?' | '+' | ')' => {
                    return Err(self.err(format!("Unexpected '{}'.", ch)));
                }
                _ => self.out.push_str(&regex::escape(&ch.to_string())),
            }
        }
        if self.depth != 0 {
            return Err(self.err("Unclosed '{'."));
        }
        self.out.push('$');
        Ok((self.out, self.names))
    }

    /// `(...)` の中身を読む。入れ子とエスケープに対応
    fn custom_regex(&mut self) -> Result<String, PatternError> {
        let mut depth = 1;
        let mut re = String::new();
        while let Some(ch) = self.peek() {
            self.pos += 1;
            match ch {
                '\\' => {
                    re.push(ch);
                    if let Some(next) = self.peek() {
                        self.pos += 1;
                        re.push(next);
                    }
                }
                '(' => {
                    depth += 1;
                    re.push(ch);
                }
                ')' => {
                    depth -= 1;
                    if depth == 0 {
                        if re.is_empty() {
                            return Err(self.err("Empty regex group."));
                        }
                        // 名前付きグループは外側の名前と衝突するので禁止
                        if re.contains("(?P<") || re.contains("(?<") {
                            return Err(self.err("Named groups are not allowed in a custom regex."));
                        }
                        return Ok(re);
                    }
                    re.push(ch);
                }
                _ => re.push(ch),
            }
        }
        Err(self.err("Unclosed '('."))
    }

    fn param(&mut self) -> Result<(), PatternError> {
        let start = self.pos;
        while self.peek().is_some_and(is_name_char) {
            self.pos += 1;
        }
        if self.pos == start {
            return Err(self.err("Missing parameter name after ':'."));
        }
        let name: String = self.chars[start..self.pos].iter().collect();
        if self.names.contains(&name) {
            return Err(PatternError::DuplicateParam {
                pattern: self.source.to_string(),
                name,
            });
        }

        let segment = if self.peek() == Some('(') {
            self.pos += 1;
            self.custom_regex()?
        } else {
            "[^/]+?".to_string()
        };

        let modifier = match self.peek() {
            Some(m @ ('?' | '*' | '+')) => {
                self.pos += 1;
                Some(m)
            }
            _ => None,
        };

        let group = format!("p{}", self.names.len());
        self.names.push(name);

        // 直前の `/` を修飾子の対象に含める (`/:id?` は `/` ごと省略可能)
        let prefixed = modifier.is_some() && self.depth == 0 && self.out.ends_with('/');
        if prefixed {
            self.out.pop();
        }
        let repeated = format!("{seg}(?:/{seg})*", seg = segment);
        let emitted = match modifier {
            None => format!("(?P<{}>{})", group, segment),
            Some('?') if prefixed => format!("(?:/(?P<{}>{}))?", group, segment),
            Some('?') => format!("(?P<{}>{})?", group, segment),
            Some('*') if prefixed => format!("(?:/(?P<{}>{}))?", group, repeated),
            Some('*') => format!("(?P<{}>(?:{})*)", group, repeated),
            Some(_) if prefixed => format!("/(?P<{}>{})", group, repeated),
            Some(_) => format!("(?P<{}>{})", group, repeated),
        };
        self.out.push_str(&emitted);
        Ok(())
    }
}

impl RoutePattern {
    /// Compile a route pattern string such as `/users/:id` or `/docs/:rest*`.
    pub fn new(source: &str) -> Result<RoutePattern, PatternError> {
        let (re, names) = Compiler::new(source).compile()?;
        let regex = Regex::new(&re).map_err(|e| PatternError::InvalidSyntax {
            pattern: source.to_string(),
            reason: e.to_string(),
        })?;
        let matches_root = regex.is_match("") && !regex.is_match("/");
        Ok(RoutePattern {
            source: source.to_string(),
            regex,
            names,
            matches_root,
        })
    }

    /// Compile a filesystem-style template straight away.
    pub fn from_path(path: &str) -> Result<RoutePattern, PatternError> {
        RoutePattern::new(&path_to_pattern(path)?)
    }

    #[inline]
    pub fn as_str(&self) -> &str {
        &self.source
    }

    #[inline]
    fn subject<'p>(&self, pathname: &'p str) -> &'p str {
        if self.matches_root && pathname == "/" {
            ""
        } else {
            pathname
        }
    }

    #[inline]
    pub fn is_match(&self, pathname: &str) -> bool {
        self.regex.is_match(self.subject(pathname))
    }

    /// Match `pathname` and extract its parameters.
    ///
    /// パラメータはパーセントデコードされる。マッチしなかった任意パラメータは空文字列。
    pub fn exec(&self, pathname: &str) -> Option<Vec<(String, String)>> {
        let caps = self.regex.captures(self.subject(pathname))?;
        let params = self
            .names
            .iter()
            .enumerate()
            .map(|(i, name)| {
                let value = caps
                    .name(&format!("p{}", i))
                    .map(|m| url_decode(m.as_str()).into_owned())
                    .unwrap_or_default();
                (name.clone(), value)
            })
            .collect();
        Some(params)
    }
}

impl std::fmt::Display for RoutePattern {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}
