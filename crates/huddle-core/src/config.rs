use std::path::Path;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::errors::HuddleError;

const DEFAULT_DOMAIN: &str = "meet.jitsi";
const DEFAULT_MUC: &str = "muc.meet.jitsi";

/// Options handed verbatim to the conferencing backend when a connection
/// is created. Field names follow the deployment's `config.json` wire format.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    /// HTTP signaling endpoint (BOSH).
    #[serde(default)]
    pub bosh: Option<String>,
    #[serde(default)]
    pub hosts: Hosts,
    #[serde(default)]
    pub service_url: Option<String>,
    #[serde(default)]
    pub websocket: Option<String>,
    #[serde(default)]
    pub websocket_keep_alive_url: Option<String>,
    #[serde(default)]
    pub p2p: P2pPolicy,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Hosts {
    pub domain: String,
    pub muc: String,
}

impl Default for Hosts {
    fn default() -> Self {
        Self {
            domain: DEFAULT_DOMAIN.to_string(),
            muc: DEFAULT_MUC.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
pub struct P2pPolicy {
    #[serde(default)]
    pub enabled: bool,
}

impl ConnectionConfig {
    /// Derive the endpoints of a deployment reachable at `base_url` for `room`.
    ///
    /// `https://host:8443` yields `wss://host:8443/xmpp-websocket`,
    /// `https://host:8443/http-bind` and the room-scoped service and
    /// keep-alive URLs. Peer-to-peer is disabled.
    pub fn for_deployment(base_url: &str, room: &str) -> Result<Self, HuddleError> {
        let base = Url::parse(base_url.trim())
            .map_err(|e| HuddleError::Config(format!("invalid deployment URL '{base_url}': {e}")))?;

        let (http, ws) = match base.scheme() {
            "https" => ("https", "wss"),
            "http" => ("http", "ws"),
            other => {
                return Err(HuddleError::Config(format!(
                    "unsupported deployment scheme '{other}'"
                )));
            }
        };

        let host = base
            .host_str()
            .ok_or_else(|| HuddleError::Config(format!("deployment URL '{base_url}' has no host")))?;
        let authority = match base.port() {
            Some(port) => format!("{host}:{port}"),
            None => host.to_string(),
        };
        let room = urlencoding::encode(room);

        Ok(Self {
            bosh: Some(format!("{http}://{authority}/http-bind")),
            hosts: Hosts::default(),
            service_url: Some(format!("{ws}://{authority}/xmpp-websocket?room={room}")),
            websocket: Some(format!("{ws}://{authority}/xmpp-websocket")),
            websocket_keep_alive_url: Some(format!("{http}://{authority}/_unlock?room={room}")),
            p2p: P2pPolicy { enabled: false },
        })
    }

    /// Read a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, HuddleError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| HuddleError::Config(format!("cannot read {}: {e}", path.display())))?;
        let config: Self = serde_json::from_str(&contents)
            .map_err(|e| HuddleError::Config(format!("cannot parse {}: {e}", path.display())))?;
        config.validate()?;
        Ok(config)
    }

    /// Download the JSON configuration published by a deployment.
    pub async fn fetch(config_url: &str) -> Result<Self, HuddleError> {
        tracing::info!("fetching connection config from {config_url}");

        let resp = reqwest::get(config_url)
            .await
            .map_err(|e| HuddleError::Http(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(HuddleError::Http(format!(
                "config endpoint returned status {}",
                resp.status()
            )));
        }

        let config: Self = resp
            .json()
            .await
            .map_err(|e| HuddleError::Config(format!("invalid config response: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Room a loaded config was generated for, read from the `room` query
    /// parameter of `serviceUrl` or `websocketKeepAliveUrl`.
    pub fn room_hint(&self) -> Option<String> {
        [&self.service_url, &self.websocket_keep_alive_url]
            .into_iter()
            .flatten()
            .filter_map(|u| Url::parse(u).ok())
            .find_map(|u| {
                u.query_pairs()
                    .find(|(k, _)| k == "room")
                    .map(|(_, v)| v.into_owned())
            })
    }

    pub fn validate(&self) -> Result<(), HuddleError> {
        if self.hosts.domain.trim().is_empty() {
            return Err(HuddleError::Config("hosts.domain is empty".into()));
        }
        if self.bosh.is_none() && self.websocket.is_none() && self.service_url.is_none() {
            return Err(HuddleError::Config(
                "no signaling endpoint (bosh, websocket or serviceUrl) configured".into(),
            ));
        }

        for (name, value) in [
            ("bosh", &self.bosh),
            ("serviceUrl", &self.service_url),
            ("websocket", &self.websocket),
            ("websocketKeepAliveUrl", &self.websocket_keep_alive_url),
        ] {
            if let Some(value) = value {
                Url::parse(value)
                    .map_err(|e| HuddleError::Config(format!("{name} '{value}' is not a URL: {e}")))?;
            }
        }

        if let Some(ws) = &self.websocket {
            if !(ws.starts_with("wss://") || ws.starts_with("ws://")) {
                return Err(HuddleError::Config(format!(
                    "websocket '{ws}' must use ws:// or wss://"
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn derives_local_deployment_endpoints() {
        let cfg = ConnectionConfig::for_deployment("https://localhost:8443", "room1").unwrap();
        assert_eq!(cfg.bosh.as_deref(), Some("https://localhost:8443/http-bind"));
        assert_eq!(
            cfg.service_url.as_deref(),
            Some("wss://localhost:8443/xmpp-websocket?room=room1")
        );
        assert_eq!(cfg.websocket.as_deref(), Some("wss://localhost:8443/xmpp-websocket"));
        assert_eq!(
            cfg.websocket_keep_alive_url.as_deref(),
            Some("https://localhost:8443/_unlock?room=room1")
        );
        assert_eq!(cfg.hosts, Hosts::default());
        assert!(!cfg.p2p.enabled);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn plain_http_deployment_uses_ws() {
        let cfg = ConnectionConfig::for_deployment("http://meet.example.com/", "r").unwrap();
        assert_eq!(cfg.websocket.as_deref(), Some("ws://meet.example.com/xmpp-websocket"));
    }

    #[test]
    fn room_is_percent_encoded() {
        let cfg = ConnectionConfig::for_deployment("https://meet.example.com", "team sync&x").unwrap();
        assert_eq!(
            cfg.service_url.as_deref(),
            Some("wss://meet.example.com/xmpp-websocket?room=team%20sync%26x")
        );
    }

    #[test]
    fn rejects_bad_deployment_urls() {
        assert!(ConnectionConfig::for_deployment("not a url", "r").is_err());
        assert!(ConnectionConfig::for_deployment("ftp://meet.example.com", "r").is_err());
    }

    #[test]
    fn partial_json_uses_serde_defaults() {
        let cfg: ConnectionConfig =
            serde_json::from_str(r#"{"websocket":"wss://meet.example.com/xmpp-websocket"}"#).unwrap();
        assert_eq!(cfg.hosts.domain, "meet.jitsi");
        assert_eq!(cfg.hosts.muc, "muc.meet.jitsi");
        assert!(!cfg.p2p.enabled);
        assert!(cfg.bosh.is_none());
    }

    #[test]
    fn camel_case_wire_names() {
        let cfg = ConnectionConfig::for_deployment("https://localhost:8443", "room1").unwrap();
        let json = serde_json::to_value(&cfg).unwrap();
        assert!(json.get("serviceUrl").is_some());
        assert!(json.get("websocketKeepAliveUrl").is_some());
        assert_eq!(json["p2p"]["enabled"], false);
    }

    #[test]
    fn validate_requires_an_endpoint() {
        let cfg: ConnectionConfig = serde_json::from_str("{}").unwrap();
        assert!(matches!(cfg.validate(), Err(HuddleError::Config(_))));
    }

    #[test]
    fn validate_rejects_http_websocket() {
        let cfg: ConnectionConfig =
            serde_json::from_str(r#"{"websocket":"https://meet.example.com/xmpp-websocket"}"#).unwrap();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let cfg = ConnectionConfig::for_deployment("https://localhost:8443", "room1").unwrap();
        fs::write(&path, serde_json::to_string_pretty(&cfg).unwrap()).unwrap();

        assert_eq!(ConnectionConfig::load(&path).unwrap(), cfg);
    }

    #[test]
    fn load_reports_missing_and_corrupt_files() {
        let dir = tempfile::tempdir().unwrap();
        assert!(ConnectionConfig::load(dir.path().join("missing.json")).is_err());

        let path = dir.path().join("config.json");
        fs::write(&path, "not json!!!").unwrap();
        assert!(matches!(ConnectionConfig::load(&path), Err(HuddleError::Config(_))));
    }

    #[test]
    fn room_hint_reads_query() {
        let cfg = ConnectionConfig::for_deployment("https://localhost:8443", "weekly sync").unwrap();
        assert_eq!(cfg.room_hint().as_deref(), Some("weekly sync"));

        let bare = ConnectionConfig {
            service_url: None,
            websocket_keep_alive_url: None,
            ..cfg
        };
        assert_eq!(bare.room_hint(), None);
    }
}
