//! Filesystem route files to registration commands
//!
//! クローラが見つけたファイル (拡張子を除いたパス) をソートし、
//! コマンド列に変換する。特殊ファイルは同じ階層の通常ルートより先に来る。

use std::{cmp::Ordering, sync::Arc};

use crate::{
    commands::{Command, RouteLoader, RouteSource},
    error::PatternError,
    middleware::BoxedHandler,
    render::{Component, Layout, RouteConfig, RouteDef},
    router::path_to_pattern,
};

/// What a discovered file exports.
pub enum FsModule<S> {
    Middleware(Vec<BoxedHandler<S>>),
    Layout(Layout<S>),
    App(Component<S>),
    Route(RouteDef<S>),
    LazyRoute {
        config: RouteConfig,
        loader: RouteLoader<S>,
    },
}

pub struct FsRouteFile<S> {
    /// ルートディレクトリからの相対パス。拡張子なし、`/` 始まり (例: `/blog/[slug]`)
    pub path: String,
    pub module: FsModule<S>,
}

impl<S> FsRouteFile<S> {
    pub fn new(path: impl Into<String>, module: FsModule<S>) -> FsRouteFile<S> {
        let path = path.into();
        let path = if path.starts_with('/') {
            path
        } else {
            format!("/{}", path)
        };
        FsRouteFile { path, module }
    }
}

/// 特殊ファイル・静的・動的・キャッチオールの順
fn route_path_score(ch: Option<u8>, next: Option<u8>) -> u8 {
    match (ch, next) {
        (Some(b'_'), Some(b'm')) => 4,
        (Some(b'_'), _) => 3,
        (Some(b'['), Some(b'.')) => 0,
        (Some(b'['), _) => 1,
        _ => 2,
    }
}

/// Order two route file paths.
///
/// `/_app` が常に先頭。同じ位置の文字が異なるだけの場合、
/// `a < b` は `Equal`、それ以外は `Greater` を返す (並べ替えない)。
pub fn sort_route_paths(a: &str, b: &str) -> Ordering {
    if a == "/_app" {
        return Ordering::Less;
    } else if b == "/_app" {
        return Ordering::Greater;
    }

    let a = a.as_bytes();
    let b = b.as_bytes();
    let mut segment_idx = 0;
    let max_len = a.len().max(b.len());
    for i in 0..max_len {
        let char_a = a.get(i).copied();
        let char_b = b.get(i).copied();
        let next_a = a.get(i + 1).copied();
        let next_b = b.get(i + 1).copied();

        if char_a == Some(b'/') || char_b == Some(b'/') {
            segment_idx = i;
            // 区切りを閉じない方がより具体的
            if char_a != Some(b'/') {
                return Ordering::Less;
            }
            if char_b != Some(b'/') {
                return Ordering::Greater;
            }
            continue;
        }

        if i == segment_idx + 1 {
            let score_a = route_path_score(char_a, next_a);
            let score_b = route_path_score(char_b, next_b);
            if score_a == score_b {
                if char_a != char_b {
                    return if char_a < char_b {
                        Ordering::Equal
                    } else {
                        Ordering::Greater
                    };
                }
                continue;
            }
            return if score_a > score_b {
                Ordering::Less
            } else {
                Ordering::Greater
            };
        }

        if char_a != char_b {
            return if char_a < char_b {
                Ordering::Equal
            } else {
                Ordering::Greater
            };
        }
    }
    Ordering::Equal
}

/// Stable insertion sort that only moves an element on `Less`.
///
/// 比較関数が全順序ではないので `slice::sort_by` は使わない。
pub fn sort_route_files<T, F>(items: &mut [T], key: F)
where
    F: Fn(&T) -> &str,
{
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && sort_route_paths(key(&items[j]), key(&items[j - 1])) == Ordering::Less {
            items.swap(j, j - 1);
            j -= 1;
        }
    }
}

/// `/blog/_layout` -> (`/blog`, `_layout`)
fn split_file_path(path: &str) -> (&str, &str) {
    match path.rfind('/') {
        Some(0) => ("/", &path[1..]),
        Some(i) => (&path[..i], &path[i + 1..]),
        None => ("/", path),
    }
}

/// Sort discovered files and translate them into commands.
///
/// セグメントは `(group)` や `[param]` を残した元のディレクトリで作る。
/// URL のパターンに変換するのは登録するルートのパスだけ。
pub fn fs_files_to_commands<S>(
    mut files: Vec<FsRouteFile<S>>,
) -> Result<Vec<Command<S>>, PatternError> {
    sort_route_files(&mut files, |f| f.path.as_str());

    let mut commands = Vec::with_capacity(files.len());
    for file in files {
        let (dir, name) = split_file_path(&file.path);
        let dir = dir.to_string();
        let command = match file.module {
            FsModule::Middleware(fns) => Command::Middleware {
                pattern: dir,
                fns,
            },
            FsModule::Layout(layout) => Command::Layout {
                pattern: dir,
                layout,
            },
            FsModule::App(component) => Command::App { component },
            FsModule::Route(route) => match name {
                "_error" | "_500" => Command::Error {
                    pattern: dir,
                    route: Arc::new(route),
                },
                "_404" => Command::NotFound {
                    route: Arc::new(route),
                },
                _ => Command::Route {
                    pattern: path_to_pattern(&file.path)?,
                    segment: Some(file.path.clone()),
                    route: RouteSource::Eager(Arc::new(route)),
                },
            },
            FsModule::LazyRoute { config, loader } => Command::Route {
                pattern: path_to_pattern(&file.path)?,
                segment: Some(file.path.clone()),
                route: RouteSource::Lazy { config, loader },
            },
        };
        commands.push(command);
    }
    Ok(commands)
}
