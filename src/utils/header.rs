/// HTTPヘッダ
/// キーの比較は大文字小文字を区別しない
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Header {
    /// ヘッダのキーと値のペア
    /// リニアサーチの方が早い
    pub headers: Vec<(String, String)>,
}

impl Header {
    pub fn new() -> Header {
        Header {
            headers: Vec::new(),
        }
    }

    /// 同名のヘッダを置き換える
    pub fn set(&mut self, key: &str, value: &str) {
        self.del(key);
        self.headers.push((key.to_string(), value.to_string()));
    }

    /// 同名のヘッダがあっても追加する (Set-Cookie など)
    pub fn append(&mut self, key: &str, value: &str) {
        self.headers.push((key.to_string(), value.to_string()));
    }

    pub fn del(&mut self, key: &str) {
        self.headers.retain(|(k, _)| !k.eq_ignore_ascii_case(key));
    }

    /// ヘッダを取得する
    /// 任意のキーに対応するヘッダを線形探索します
    pub fn get(&self, key: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    pub fn gets(&self, key: &str) -> Vec<&str> {
        self.headers
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// head: host を取得する
    pub fn get_host(&self) -> Option<&str> {
        self.get("Host")
    }

    /// head: connection を取得する
    pub fn get_connection(&self) -> Option<&str> {
        self.get("Connection")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_replaces_case_insensitively() {
        let mut header = Header::new();
        header.set("content-type", "text/plain");
        header.set("Content-Type", "text/html");
        assert_eq!(header.len(), 1);
        assert_eq!(header.get("CONTENT-TYPE"), Some("text/html"));

        header.append("Set-Cookie", "a=1");
        header.append("set-cookie", "b=2");
        assert_eq!(header.gets("Set-Cookie"), vec!["a=1", "b=2"]);
    }
}
