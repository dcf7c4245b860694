//! Minimal HTTP/1.1 codec for the bundled server
//!
//! Content-Length のボディだけを扱う。チャンク転送は受け付けない。

use bytes::Bytes;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{
    error::ServerError,
    request::Req,
    response::Res,
    utils::{header::Header, method::Method},
};

/// ヘッダ部の上限
pub const MAX_HEADER_BYTES: usize = 64 * 1024;
/// ボディの上限
pub const MAX_BODY_BYTES: usize = 16 * 1024 * 1024;

/// A parsed request plus the protocol version it came with.
pub struct ParsedRequest {
    pub req: Req,
    pub version: String,
}

/// ヘッダ部の残り `budget` バイトまでで一行読む。
///
/// 上限までに改行が来なければ `ServerError::HeaderTooLarge`。
async fn read_line<R>(
    reader: &mut R,
    buf: &mut Vec<u8>,
    budget: usize,
) -> Result<usize, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let limit = budget as u64;
    let n = (&mut *reader).take(limit).read_until(b'\n', buf).await?;
    if n as u64 == limit && buf.last() != Some(&b'\n') {
        return Err(ServerError::HeaderTooLarge);
    }
    Ok(n)
}

/// `read_until` の結果から末尾の CRLF / LF を除く
fn trim_line(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

/// Read one request from `reader`.
///
/// 接続が何も送らずに閉じられた場合は `ServerError::ConnectionClosed`。
pub async fn read_request<R>(reader: &mut R) -> Result<ParsedRequest, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let n = read_line(reader, &mut buf, MAX_HEADER_BYTES).await?;
    if n == 0 {
        return Err(ServerError::ConnectionClosed);
    }
    let mut consumed = n;

    let line = std::str::from_utf8(trim_line(&buf))
        .map_err(|_| ServerError::InvalidRequestLine("not utf-8".to_string()))?
        .to_string();
    let mut parts = line.split(' ');
    let (Some(method), Some(target), Some(version), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(ServerError::InvalidRequestLine(line));
    };
    if target.is_empty() || !matches!(version, "HTTP/1.0" | "HTTP/1.1") {
        return Err(ServerError::InvalidRequestLine(line));
    }

    let mut req = Req::new(Method::from_str(method), target);
    req.header = read_headers(reader, &mut consumed).await?;

    if let Some(encoding) = req.header.get("Transfer-Encoding") {
        if !encoding.eq_ignore_ascii_case("identity") {
            return Err(ServerError::InvalidHttpHeader(format!(
                "unsupported Transfer-Encoding: {}",
                encoding
            )));
        }
    }
    if let Some(value) = req.header.get("Content-Length") {
        let len: usize = value
            .trim()
            .parse()
            .map_err(|_| ServerError::InvalidHttpHeader(format!("Content-Length: {}", value)))?;
        if len > MAX_BODY_BYTES {
            return Err(ServerError::InvalidHttpHeader(format!("body too large: {}", len)));
        }
        let mut body = vec![0; len];
        reader.read_exact(&mut body).await?;
        req.body = Bytes::from(body);
    }

    Ok(ParsedRequest {
        req,
        version: version.to_string(),
    })
}

async fn read_headers<R>(reader: &mut R, consumed: &mut usize) -> Result<Header, ServerError>
where
    R: AsyncBufRead + Unpin,
{
    let mut header = Header::new();
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let budget = MAX_HEADER_BYTES.saturating_sub(*consumed);
        if budget == 0 {
            return Err(ServerError::HeaderTooLarge);
        }
        let n = read_line(reader, &mut buf, budget).await?;
        if n == 0 {
            return Err(ServerError::ConnectionClosed);
        }
        *consumed += n;

        let line = trim_line(&buf);
        if line.is_empty() {
            return Ok(header);
        }
        let line = std::str::from_utf8(line)
            .map_err(|_| ServerError::InvalidHttpHeader("not utf-8".to_string()))?;
        let Some((key, value)) = line.split_once(':') else {
            return Err(ServerError::InvalidHttpHeader(line.to_string()));
        };
        header.append(key.trim(), value.trim());
    }
}

/// 読み取りに失敗したリクエストへの応答
pub fn error_response(err: &ServerError) -> Res {
    match err {
        ServerError::HeaderTooLarge => Res::new()
            .status(431)
            .text("Request Header Fields Too Large"),
        _ => Res::new().status(400).text("Bad Request"),
    }
}

/// Whether the client allows reusing the connection.
pub fn keep_alive_requested(version: &str, header: &Header) -> bool {
    let conn = header.get_connection();
    // HTTP/1.0の場合、明示的なKeep-Aliveがなければclose
    if version == "HTTP/1.0" {
        return conn.is_some_and(|c| c.eq_ignore_ascii_case("keep-alive"));
    }
    !conn.is_some_and(|c| c.eq_ignore_ascii_case("close"))
}

/// Whether the connection should be closed after sending `res`.
pub fn should_close_connection(keep_alive: bool, res: &Res) -> bool {
    if !keep_alive {
        return true;
    }
    // レスポンスで "Connection: close" が指定されている場合
    res.header
        .get("Connection")
        .is_some_and(|c| c.eq_ignore_ascii_case("close"))
}

/// Serialize `res` to `writer`.
///
/// `HEAD` と 204/304 ではボディを送らない。
pub async fn write_response<W>(
    writer: &mut W,
    res: &Res,
    head_only: bool,
    keep_alive: bool,
) -> Result<(), ServerError>
where
    W: AsyncWrite + Unpin,
{
    let no_body = head_only || res.code == 204 || res.code == 304;
    let mut head = format!("HTTP/1.1 {} {}\r\n", res.code, res.reason());
    for (key, value) in res.header.iter() {
        head.push_str(&format!("{}: {}\r\n", key, value));
    }
    if res.header.get("Content-Length").is_none() && res.code != 204 && res.code != 304 {
        head.push_str(&format!("Content-Length: {}\r\n", res.body.len()));
    }
    if res.header.get("Connection").is_none() {
        head.push_str(if keep_alive {
            "Connection: keep-alive\r\n"
        } else {
            "Connection: close\r\n"
        });
    }
    head.push_str("\r\n");

    writer.write_all(head.as_bytes()).await?;
    if !no_body {
        writer.write_all(res.body.as_bytes()).await?;
    }
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::BufReader;

    #[tokio::test]
    async fn reads_request_with_body() {
        let raw: &[u8] = b"POST /echo?x=1 HTTP/1.1\r\nHost: localhost\r\nContent-Length: 5\r\n\r\nhelloGET / HTTP/1.1\r\n\r\n";
        let mut reader = BufReader::new(raw);
        let parsed = read_request(&mut reader).await.unwrap();
        assert_eq!(parsed.version, "HTTP/1.1");
        assert_eq!(parsed.req.method, Method::POST);
        assert_eq!(parsed.req.path.pathname(), "/echo");
        assert_eq!(parsed.req.header.get_host(), Some("localhost"));
        assert_eq!(&parsed.req.body[..], b"hello");

        let next = read_request(&mut reader).await.unwrap();
        assert_eq!(next.req.method, Method::GET);
        assert!(matches!(
            read_request(&mut reader).await,
            Err(ServerError::ConnectionClosed)
        ));
    }

    #[tokio::test]
    async fn rejects_bad_request_line() {
        let raw: &[u8] = b"GET /\r\n\r\n";
        let mut reader = BufReader::new(raw);
        assert!(matches!(
            read_request(&mut reader).await,
            Err(ServerError::InvalidRequestLine(_))
        ));
    }

    #[tokio::test]
    async fn stops_reading_unterminated_header_lines() {
        // 改行のない巨大な要求行
        let raw = vec![b'a'; MAX_HEADER_BYTES * 2];
        let mut reader = BufReader::new(&raw[..]);
        assert!(matches!(
            read_request(&mut reader).await,
            Err(ServerError::HeaderTooLarge)
        ));

        let mut raw = b"GET / HTTP/1.1\r\nX-Big: ".to_vec();
        raw.extend(std::iter::repeat_n(b'b', MAX_HEADER_BYTES));
        let mut reader = BufReader::new(&raw[..]);
        let err = read_request(&mut reader).await.err().unwrap();
        assert!(matches!(err, ServerError::HeaderTooLarge));
        assert_eq!(error_response(&err).code, 431);
    }

    #[tokio::test]
    async fn writes_response() {
        let res = Res::new().text("hi");
        let mut out: Vec<u8> = Vec::new();
        write_response(&mut out, &res, false, true).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("Content-Length: 2\r\n"));
        assert!(text.contains("Connection: keep-alive\r\n"));
        assert!(text.ends_with("\r\n\r\nhi"));

        let mut out: Vec<u8> = Vec::new();
        write_response(&mut out, &res, true, false).await.unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.ends_with("Connection: close\r\n\r\n"));
    }

    #[test]
    fn closes_http10_without_keep_alive() {
        let header = Header::new();
        assert!(!keep_alive_requested("HTTP/1.0", &header));
        assert!(keep_alive_requested("HTTP/1.1", &header));

        let req = Req::get("/").with_header("Connection", "close");
        assert!(!keep_alive_requested("HTTP/1.1", &req.header));

        let res = Res::new().with_header("Connection", "close");
        assert!(should_close_connection(true, &res));
        assert!(!should_close_connection(true, &Res::new()));
        assert!(should_close_connection(false, &Res::new()));
    }
}
