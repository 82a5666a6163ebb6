//! The `jwt` session cookie.

use axum::http::{HeaderMap, HeaderValue, header};
use chrono::{DateTime, Utc};

pub const TOKEN_COOKIE: &str = "jwt";

const HTTP_DATE: &str = "%a, %d %b %Y %H:%M:%S GMT";

/// `Set-Cookie` value carrying a freshly issued token.
pub fn session_cookie(token: &str, expires_at: DateTime<Utc>) -> Option<HeaderValue> {
    HeaderValue::from_str(&format!(
        "{TOKEN_COOKIE}={token}; HttpOnly; Path=/; Expires={}",
        expires_at.format(HTTP_DATE)
    ))
    .ok()
}

/// `Set-Cookie` value that makes the browser drop the token.
pub fn expired_cookie() -> HeaderValue {
    HeaderValue::from_static(
        "jwt=; HttpOnly; Path=/; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT",
    )
}

/// Token from the `Cookie` header, if any. An empty value counts as absent.
pub fn read_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == TOKEN_COOKIE).then(|| value.trim().to_string())
        })
        .filter(|token| !token.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn headers(cookie: &str) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(header::COOKIE, HeaderValue::from_str(cookie).unwrap());
        headers
    }

    #[test]
    fn reads_token_among_other_cookies() {
        assert_eq!(
            read_token(&headers("theme=dark; jwt=abc.def.ghi; lang=en")),
            Some("abc.def.ghi".to_string())
        );
    }

    #[test]
    fn missing_or_empty_token_is_none() {
        assert_eq!(read_token(&HeaderMap::new()), None);
        assert_eq!(read_token(&headers("theme=dark")), None);
        assert_eq!(read_token(&headers("jwt=")), None);
        assert_eq!(read_token(&headers("jwtx=abc")), None);
    }

    #[test]
    fn session_cookie_carries_expiry() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 13, 0, 0).unwrap();
        let value = session_cookie("t0k", at).unwrap();
        assert_eq!(
            value.to_str().unwrap(),
            "jwt=t0k; HttpOnly; Path=/; Expires=Wed, 01 May 2024 13:00:00 GMT"
        );
    }

    #[test]
    fn expired_cookie_clears_value() {
        let value = expired_cookie();
        let text = value.to_str().unwrap();
        assert!(text.starts_with("jwt=;"));
        assert!(text.contains("Max-Age=0"));
    }
}
