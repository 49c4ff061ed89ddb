//! Service base URLs.

use btr_bridge::{BridgeError, Result};
use std::fmt;
use url::Url;

/// Roblox web services the registry talks to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Service {
    Api,
    Badges,
    Catalog,
    Friends,
    Games,
    Inventory,
    Thumbnails,
    Www,
}

impl Service {
    pub fn as_str(&self) -> &'static str {
        match self {
            Service::Api => "api",
            Service::Badges => "badges",
            Service::Catalog => "catalog",
            Service::Friends => "friends",
            Service::Games => "games",
            Service::Inventory => "inventory",
            Service::Thumbnails => "thumbnails",
            Service::Www => "www",
        }
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where each service lives.
///
/// - [`ApiHosts::roblox`]: `https://<service>.roblox.com/<path>`
/// - [`ApiHosts::single`]: `<base>/<service>/<path>`, for pointing every
///   service at one local server
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ApiHosts {
    base: Option<String>,
}

impl ApiHosts {
    pub fn roblox() -> Self {
        Self { base: None }
    }

    pub fn single(base: impl Into<String>) -> Self {
        Self {
            base: Some(base.into().trim_end_matches('/').to_string()),
        }
    }

    /// Absolute URL of `path` on `service`. `path` has no leading slash.
    pub fn url(&self, service: Service, path: &str) -> Result<Url> {
        let raw = match &self.base {
            None => format!("https://{}.roblox.com/{}", service, path),
            Some(base) => format!("{}/{}/{}", base, service, path),
        };
        Url::parse(&raw).map_err(|e| BridgeError::Config {
            message: format!("Invalid URL {}: {}", raw, e),
        })
    }
}
