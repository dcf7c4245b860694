use std::path::{Path, PathBuf};

use log::debug;
use mime_guess::mime;

use crate::{
    context::Context,
    error::HandlerResult,
    middleware::Handler,
    response::Res,
    utils::{method::Method, url_decode},
};

/// Serves files below a directory for `GET`/`HEAD`, deferring via `next()`
/// for anything it cannot answer.
///
/// ディレクトリ配下のファイルを返すミドルウェア。
/// 見つからない・対象外のリクエストは `next()` に委譲する。
#[derive(Debug, Clone)]
pub struct StaticFiles {
    base: PathBuf,
}

impl StaticFiles {
    pub fn new<P>(base: P) -> StaticFiles
    where
        P: AsRef<Path>,
    {
        StaticFiles {
            base: base.as_ref().to_path_buf(),
        }
    }

    /// base 配下に解決できるパスだけを返す (symlink 脱出も拒否)
    fn safe_path_under(&self, pathname: &str) -> Option<PathBuf> {
        let decoded = url_decode(pathname);
        let relative = decoded.trim_start_matches('/');
        if relative.is_empty() || relative.contains('\0') {
            return None;
        }
        if relative.split('/').any(|seg| seg == "..") {
            return None;
        }
        let relative = Path::new(relative);
        if relative.is_absolute() {
            return None;
        }

        let base = self.base.canonicalize().ok()?;
        let canon = base.join(relative).canonicalize().ok()?;
        canon.starts_with(&base).then_some(canon)
    }
}

#[async_trait::async_trait]
impl<S> Handler<S> for StaticFiles
where
    S: Send + Sync + 'static,
{
    async fn handle(&self, ctx: &mut Context<S>) -> HandlerResult {
        if !matches!(ctx.req.method, Method::GET | Method::HEAD) {
            return ctx.next().await;
        }
        let Some(path) = self.safe_path_under(ctx.req.path.pathname()) else {
            return ctx.next().await;
        };
        match tokio::fs::metadata(&path).await {
            Ok(meta) if meta.is_file() => {}
            _ => return ctx.next().await,
        }

        let data = tokio::fs::read(&path).await?;
        let guessed = mime_guess::from_path(&path).first_or_octet_stream();
        let content_type = match guessed.type_() {
            mime::TEXT => format!("{}; charset=utf-8", guessed.essence_str()),
            _ => guessed.essence_str().to_string(),
        };
        debug!("static file: {}", path.display());
        Ok(Res::new().data(data, &content_type))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_traversal() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "a").unwrap();
        let files = StaticFiles::new(dir.path());
        assert!(files.safe_path_under("/a.txt").is_some());
        assert!(files.safe_path_under("/../a.txt").is_none());
        assert!(files.safe_path_under("/%2e%2e/a.txt").is_none());
        assert!(files.safe_path_under("/").is_none());
        assert!(files.safe_path_under("/missing.txt").is_none());
    }
}
