//! String and HTTP helper functions

use std::collections::BTreeMap;
use std::path::Path;

/// Decode `%XX` escapes in a URI component. Malformed escapes are left as-is.
pub fn http_unescape(s: &str) -> String {
    let bytes = s.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            if let (Some(hi), Some(lo)) = (
                bytes.get(i + 1).and_then(|b| (*b as char).to_digit(16)),
                bytes.get(i + 2).and_then(|b| (*b as char).to_digit(16)),
            ) {
                out.push((hi * 16 + lo) as u8);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse `key=value` pairs separated by `sep` (e.g. `&` for query strings).
/// Tokens without `=` are skipped.
pub fn parse_key_value(s: &str, sep: char) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for token in s.split(sep) {
        if let Some((key, value)) = token.split_once('=') {
            map.insert(key.to_string(), value.to_string());
        }
    }
    map
}

/// HTTP content type inferred from a file extension.
pub fn content_type_for(path: &Path) -> &'static str {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "txt" => "text/plain",
        "html" => "text/html",
        "json" => "application/json",
        "js" => "application/javascript",
        "css" => "text/css",
        "ico" => "image/x-icon",
        _ => "application/octet-stream",
    }
}
