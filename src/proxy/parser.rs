//! Proxy list parsing

use crate::proxy::models::{ProxyEndpoint, ProxyScheme};
use once_cell::sync::Lazy;
use regex::Regex;

/// `scheme://[user:pass@]host:port[/]`
static URL_FORMAT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(https?|socks[45])://(?:([^:@]+):([^@]+)@)?([^:/@]+):(\d+)/?$")
        .expect("Invalid proxy URL regex")
});

/// `user:pass@host:port`
static AUTH_AT_FORMAT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^([^:@]+):([^@]+)@([^:@]+):(\d+)$").expect("Invalid user@host regex"));

/// Parser for newline-delimited proxy lists
pub struct ProxyParser;

impl ProxyParser {
    /// Parse one line of a proxy list.
    ///
    /// The provider format is `ip:port:username:password`; `ip:port`,
    /// `user:pass@ip:port` and `scheme://[user:pass@]ip:port` are accepted too.
    pub fn parse_line(line: &str) -> Option<ProxyEndpoint> {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            return None;
        }

        if let Some(caps) = URL_FORMAT.captures(line) {
            let scheme = ProxyScheme::from_name(&caps[1])?;
            let port: u16 = caps[5].parse().ok()?;
            let endpoint = ProxyEndpoint::new(&caps[4], port).with_scheme(scheme);
            return Some(match (caps.get(2), caps.get(3)) {
                (Some(user), Some(pass)) => endpoint.with_auth(user.as_str(), pass.as_str()),
                _ => endpoint,
            });
        }

        if let Some(caps) = AUTH_AT_FORMAT.captures(line) {
            let port: u16 = caps[4].parse().ok()?;
            return Some(ProxyEndpoint::new(&caps[3], port).with_auth(&caps[1], &caps[2]));
        }

        let parts: Vec<&str> = line.split(':').collect();
        match parts.as_slice() {
            [host, port] => Some(ProxyEndpoint::new(*host, port.parse().ok()?)),
            [host, port, user, pass] => {
                Some(ProxyEndpoint::new(*host, port.parse().ok()?).with_auth(*user, *pass))
            }
            _ => None,
        }
    }

    /// Parse every usable line, keeping list order
    pub fn parse_list(content: &str) -> Vec<ProxyEndpoint> {
        content.lines().filter_map(Self::parse_line).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_provider_format() {
        let proxy = ProxyParser::parse_line("192.168.1.1:8080:user:pass").unwrap();
        assert_eq!(proxy.host, "192.168.1.1");
        assert_eq!(proxy.port, 8080);
        let auth = proxy.auth.unwrap();
        assert_eq!(auth.username, "user");
        assert_eq!(auth.password, "pass");
    }

    #[test]
    fn test_parse_simple_format() {
        let proxy = ProxyParser::parse_line("192.168.1.1:8080").unwrap();
        assert!(proxy.auth.is_none());
        assert_eq!(proxy.scheme, ProxyScheme::Http);
    }

    #[test]
    fn test_parse_auth_at_format() {
        let proxy = ProxyParser::parse_line("user:pass@192.168.1.1:8080").unwrap();
        assert_eq!(proxy.host, "192.168.1.1");
        assert!(proxy.auth.is_some());
    }

    #[test]
    fn test_parse_url_format() {
        let proxy = ProxyParser::parse_line("socks5://u:p@10.0.0.1:1080").unwrap();
        assert_eq!(proxy.scheme, ProxyScheme::Socks5);
        assert_eq!(proxy.port, 1080);
        assert_eq!(proxy.auth.unwrap().username, "u");
    }

    #[test]
    fn test_parse_list_handles_crlf_and_comments() {
        let content = "1.1.1.1:80:a:b\r\n# comment\r\n\r\n2.2.2.2:81:c:d\r\nbroken\r\n";
        let proxies = ProxyParser::parse_list(content);
        assert_eq!(proxies.len(), 2);
        assert_eq!(proxies[0].host, "1.1.1.1");
        assert_eq!(proxies[1].port, 81);
    }

    #[test]
    fn test_parse_invalid_lines() {
        assert!(ProxyParser::parse_line("192.168.1.1").is_none());
        assert!(ProxyParser::parse_line("192.168.1.1:abc").is_none());
        assert!(ProxyParser::parse_line("a:1:b").is_none());
    }
}
