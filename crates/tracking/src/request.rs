//! 从 HTTP 请求中提取访问信息

use std::net::IpAddr;

use axum::http::{HeaderMap, Uri};
use chrono::NaiveDate;
use sha2::{Digest, Sha256};
use url::Url;

/// 记录访问所需的请求数据
#[derive(Debug, Clone)]
pub struct HitRequest {
    pub uri: Uri,
    pub headers: HeaderMap,
    /// 对端地址
    pub peer: Option<IpAddr>,
}

impl HitRequest {
    pub fn new(uri: Uri, headers: HeaderMap, peer: Option<IpAddr>) -> Self {
        Self { uri, headers, peer }
    }

    pub fn header(&self, name: &str) -> &str {
        self.headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .unwrap_or_default()
    }

    pub fn user_agent(&self) -> &str {
        self.header("user-agent")
    }
}

const REFERRER_QUERY_PARAMS: &[&str] = &["ref", "referer", "referrer", "source", "utm_source"];

/// 浏览器预加载不算访问
pub fn is_prefetch(headers: &HeaderMap) -> bool {
    let has = |name: &str, values: &[&str]| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| values.iter().any(|x| v.trim().eq_ignore_ascii_case(x)))
    };

    has("x-moz", &["prefetch"])
        || has("x-purpose", &["prefetch", "preview"])
        || has("purpose", &["prefetch"])
}

/// 客户端 IP，代理头优先于对端地址
pub fn client_ip(headers: &HeaderMap, peer: Option<IpAddr>) -> Option<IpAddr> {
    let header = |name: &str| headers.get(name).and_then(|v| v.to_str().ok());

    let candidates = [
        header("cf-connecting-ip"),
        header("true-client-ip"),
        header("x-forwarded-for").and_then(|v| v.split(',').next()),
        header("forwarded").and_then(forwarded_for),
        header("x-real-ip"),
    ];

    candidates
        .into_iter()
        .flatten()
        .find_map(parse_ip)
        .or(peer)
}

/// `Forwarded: for=192.0.2.60;proto=http` 中第一个 `for`
fn forwarded_for(value: &str) -> Option<&str> {
    value
        .split([',', ';'])
        .map(str::trim)
        .find_map(|part| {
            let (key, value) = part.split_once('=')?;
            key.trim().eq_ignore_ascii_case("for").then_some(value.trim())
        })
}

fn parse_ip(value: &str) -> Option<IpAddr> {
    let value = value.trim().trim_matches('"');

    if let Ok(ip) = value.parse() {
        return Some(ip);
    }

    // [2001:db8::1]:4711
    if let Some(rest) = value.strip_prefix('[') {
        return rest.split(']').next()?.parse().ok();
    }

    // 192.0.2.60:4711
    value.rsplit_once(':')?.0.parse().ok()
}

/// `Accept-Language` 第一项的主语言标签
pub fn language(headers: &HeaderMap) -> String {
    let Some(value) = headers.get("accept-language").and_then(|v| v.to_str().ok()) else {
        return String::new();
    };

    let first = value.split(',').next().unwrap_or_default();
    let tag = first.split(';').next().unwrap_or_default();
    let primary = tag.split(['-', '_']).next().unwrap_or_default().trim();

    if primary == "*" || primary.len() > 10 {
        return String::new();
    }

    primary.to_lowercase()
}

/// 来源地址，去掉查询串与片段；屏蔽名单中的域名（含子域名）返回空串
pub fn referrer(headers: &HeaderMap, uri: &Uri, blacklist: &[String]) -> String {
    let from_header = headers
        .get("referer")
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string);

    let from_query = || {
        let query = uri.query()?;
        url::form_urlencoded::parse(query.as_bytes())
            .find(|(k, v)| REFERRER_QUERY_PARAMS.contains(&k.as_ref()) && !v.trim().is_empty())
            .map(|(_, v)| v.trim().to_string())
    };

    let Some(raw) = from_header.or_else(from_query) else {
        return String::new();
    };

    match Url::parse(&raw) {
        Ok(mut url) => {
            if url.host_str().is_some_and(|host| is_blacklisted(host, blacklist)) {
                return String::new();
            }
            url.set_query(None);
            url.set_fragment(None);
            url.to_string()
        }
        // `?ref=newsletter` 这类名称原样保留
        Err(_) if is_blacklisted(&raw, blacklist) => String::new(),
        Err(_) => raw,
    }
}

fn is_blacklisted(host: &str, blacklist: &[String]) -> bool {
    let host = host.trim_end_matches('.').to_lowercase();

    blacklist.iter().any(|domain| {
        let domain = domain.trim().to_lowercase();
        !domain.is_empty()
            && (host == domain
                || host
                    .strip_suffix(domain.as_str())
                    .is_some_and(|rest| rest.ends_with('.')))
    })
}

/// hex(SHA-256(salt, user agent, ip, date))
pub fn fingerprint(salt: &str, user_agent: &str, ip: &str, day: NaiveDate) -> String {
    let mut hasher = Sha256::new();
    hasher.update(salt.as_bytes());
    hasher.update(user_agent.as_bytes());
    hasher.update(ip.as_bytes());
    hasher.update(day.format("%Y%m%d").to_string().as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    fn headers(pairs: &[(&'static str, &'static str)]) -> HeaderMap {
        let mut headers = HeaderMap::new();
        for (name, value) in pairs {
            headers.insert(*name, HeaderValue::from_static(value));
        }
        headers
    }

    fn blacklist() -> Vec<String> {
        vec!["marvinblum.de".to_string()]
    }

    #[test]
    fn test_client_ip_header_order() {
        let peer: Option<IpAddr> = "10.0.0.1".parse().ok();

        let h = headers(&[("x-real-ip", "203.0.113.9"), ("x-forwarded-for", "198.51.100.7, 10.0.0.2")]);
        assert_eq!(client_ip(&h, peer).unwrap().to_string(), "198.51.100.7");

        let h = headers(&[("cf-connecting-ip", "192.0.2.1"), ("x-forwarded-for", "198.51.100.7")]);
        assert_eq!(client_ip(&h, peer).unwrap().to_string(), "192.0.2.1");

        let h = headers(&[("forwarded", "for=\"[2001:db8::1]:4711\";proto=https")]);
        assert_eq!(client_ip(&h, peer).unwrap().to_string(), "2001:db8::1");

        let h = headers(&[("forwarded", "proto=http;for=192.0.2.60:80")]);
        assert_eq!(client_ip(&h, peer).unwrap().to_string(), "192.0.2.60");

        let h = headers(&[("x-forwarded-for", "garbage")]);
        assert_eq!(client_ip(&h, peer), peer);
        assert_eq!(client_ip(&HeaderMap::new(), None), None);
    }

    #[test]
    fn test_language() {
        assert_eq!(language(&headers(&[("accept-language", "de-DE,de;q=0.9,en;q=0.8")])), "de");
        assert_eq!(language(&headers(&[("accept-language", "EN;q=0.5")])), "en");
        assert_eq!(language(&headers(&[("accept-language", "*")])), "");
        assert_eq!(language(&HeaderMap::new()), "");
    }

    #[test]
    fn test_referrer_from_header() {
        let uri: Uri = "/blog".parse().unwrap();
        let h = headers(&[("referer", "https://news.ycombinator.com/item?id=1#top")]);

        assert_eq!(referrer(&h, &uri, &blacklist()), "https://news.ycombinator.com/item");
    }

    #[test]
    fn test_referrer_from_query() {
        let uri: Uri = "/blog?utm_source=newsletter".parse().unwrap();
        assert_eq!(referrer(&HeaderMap::new(), &uri, &blacklist()), "newsletter");

        let uri: Uri = "/?ref=https%3A%2F%2Fexample.com%2Fpost%3Fa%3D1".parse().unwrap();
        assert_eq!(referrer(&HeaderMap::new(), &uri, &blacklist()), "https://example.com/post");

        let uri: Uri = "/".parse().unwrap();
        assert_eq!(referrer(&HeaderMap::new(), &uri, &blacklist()), "");
    }

    #[test]
    fn test_referrer_blacklist_includes_subdomains() {
        let uri: Uri = "/".parse().unwrap();

        for own in ["https://marvinblum.de/blog", "https://www.marvinblum.de/", "https://MarvinBlum.de"] {
            let h = headers(&[("referer", own)]);
            assert_eq!(referrer(&h, &uri, &blacklist()), "", "{}", own);
        }

        let h = headers(&[("referer", "https://notmarvinblum.de/")]);
        assert_eq!(referrer(&h, &uri, &blacklist()), "https://notmarvinblum.de/");
    }

    #[test]
    fn test_prefetch() {
        assert!(is_prefetch(&headers(&[("x-moz", "prefetch")])));
        assert!(is_prefetch(&headers(&[("x-purpose", "preview")])));
        assert!(is_prefetch(&headers(&[("purpose", "Prefetch")])));
        assert!(!is_prefetch(&headers(&[("purpose", "navigate")])));
        assert!(!is_prefetch(&HeaderMap::new()));
    }

    #[test]
    fn test_fingerprint_changes_daily() {
        let day = NaiveDate::from_ymd_opt(2021, 1, 1).unwrap();
        let next = NaiveDate::from_ymd_opt(2021, 1, 2).unwrap();

        let a = fingerprint("salt", "ua", "192.0.2.1", day);
        assert_eq!(a.len(), 64);
        assert_eq!(a, fingerprint("salt", "ua", "192.0.2.1", day));
        assert_ne!(a, fingerprint("salt", "ua", "192.0.2.1", next));
        assert_ne!(a, fingerprint("other", "ua", "192.0.2.1", day));
    }
}
