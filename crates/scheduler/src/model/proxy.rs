use serde::{Deserialize, Serialize};

/// Network egress proxy a monitor may probe through
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proxy {
    pub id: String,
    /// `http`, `https`, `socks5` ...
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub auth: bool,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Proxy {
    /// Proxy URL without credentials, e.g. `socks5://10.0.0.1:1080`
    pub fn url(&self) -> String {
        format!("{}://{}:{}", self.protocol, self.host, self.port)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_proxy_url() {
        let proxy = Proxy {
            id: "p1".into(),
            protocol: "socks5".into(),
            host: "10.0.0.1".into(),
            port: 1080,
            auth: false,
            username: None,
            password: None,
        };
        assert_eq!(proxy.url(), "socks5://10.0.0.1:1080");
    }
}
