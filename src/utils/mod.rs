pub mod header;
pub mod method;
pub mod status;

use std::borrow::Cow;

use percent_encoding::percent_decode_str;

/// パーセントエンコーディングをデコードする
/// 不正な UTF-8 は置換文字にする
#[inline]
pub fn url_decode(input: &str) -> Cow<'_, str> {
    percent_decode_str(input).decode_utf8_lossy()
}

/// 連続する `/` を一つにまとめる
///
/// `//evil.example` のようなパスでオープンリダイレクトされるのを防ぐ
pub fn collapse_slashes(path: &str) -> Cow<'_, str> {
    if !path.contains("//") {
        return Cow::Borrowed(path);
    }
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }
    Cow::Owned(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collapses_repeated_slashes() {
        assert_eq!(collapse_slashes("/a/b"), "/a/b");
        assert_eq!(collapse_slashes("//evil.example//x"), "/evil.example/x");
        assert_eq!(collapse_slashes("///"), "/");
    }

    #[test]
    fn decodes_percent_sequences() {
        assert_eq!(url_decode("caf%C3%A9"), "café");
        assert_eq!(url_decode("a%20b"), "a b");
        assert_eq!(url_decode("plain"), "plain");
    }
}
