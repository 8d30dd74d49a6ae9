//! OpenWrt ubus JSON-RPC client
//!
//! Talks to the router's `/ubus` HTTP endpoint: `session.login` first, then
//! `luci-rpc` and `hostapd.*` calls with the granted session token.

use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use thiserror::Error;
use tracing::trace;

/// Null session used for the login call itself.
const NULL_SESSION: &str = "00000000000000000000000000000000";

#[derive(Error, Debug)]
pub enum UbusError {
    #[error("http request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("login rejected for user {username:?}")]
    LoginFailed { username: String },
    #[error("ubus call {object}.{method} returned status {code}")]
    CallFailed {
        object: String,
        method: String,
        code: i64,
    },
    #[error("unexpected ubus payload: {0}")]
    BadPayload(#[from] serde_json::Error),
}

/// DHCPv4 lease as returned by `luci-rpc getDHCPLeases`.
#[derive(Debug, Clone, Deserialize)]
pub struct UbusLease {
    pub macaddr: String,
    #[serde(default)]
    pub ipaddr: Option<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

/// DHCPv6 lease as returned by `luci-rpc getDHCPLeases`.
#[derive(Debug, Clone, Deserialize)]
pub struct UbusLease6 {
    #[serde(default)]
    pub macaddr: Option<String>,
    #[serde(default)]
    pub ip6addrs: Vec<String>,
    #[serde(default)]
    pub hostname: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct LeasesPayload {
    #[serde(default)]
    dhcp_leases: Vec<UbusLease>,
    #[serde(default)]
    dhcp6_leases: Vec<UbusLease6>,
}

/// Per-MAC hint from `luci-rpc getHostHints`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UbusHostHint {
    #[serde(default)]
    pub ipaddrs: Vec<String>,
    #[serde(default)]
    pub ip6addrs: Vec<String>,
    #[serde(default)]
    pub name: Option<String>,
}

/// Associated station from `hostapd.<iface> get_clients`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UbusWifiClient {
    #[serde(default)]
    pub signal: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
struct ClientsPayload {
    #[serde(default)]
    clients: BTreeMap<String, UbusWifiClient>,
}

#[derive(Debug, Deserialize)]
struct RpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<Value>,
}

/// JSON-RPC client for one router's ubus endpoint.
#[derive(Debug, Clone)]
pub struct UbusClient {
    client: reqwest::Client,
    url: String,
    username: String,
    password: String,
}

impl UbusClient {
    /// `base_url` is the router root, e.g. `http://192.168.1.1`.
    pub fn new(
        base_url: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        let base = base_url.into();
        Self {
            client: reqwest::Client::new(),
            url: format!("{}/ubus", base.trim_end_matches('/')),
            username: username.into(),
            password: password.into(),
        }
    }

    async fn rpc(&self, method: &str, params: Value) -> Result<Value, UbusError> {
        let body = json!({
            "jsonrpc": "2.0",
            "id": 1,
            "method": method,
            "params": params,
        });
        trace!(url = %self.url, method, "ubus request");

        let response: RpcResponse = self
            .client
            .post(&self.url)
            .json(&body)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if let Some(error) = response.error {
            return Err(UbusError::CallFailed {
                object: "rpc".to_string(),
                method: method.to_string(),
                code: error.get("code").and_then(Value::as_i64).unwrap_or(-1),
            });
        }
        Ok(response.result.unwrap_or(Value::Null))
    }

    /// ubus calls return `[status, payload]`; status 0 is success.
    async fn call(
        &self,
        session: &str,
        object: &str,
        method: &str,
        args: Value,
    ) -> Result<Value, UbusError> {
        let result = self
            .rpc("call", json!([session, object, method, args]))
            .await?;

        let code = result
            .get(0)
            .and_then(Value::as_i64)
            .unwrap_or(-1);
        if code != 0 {
            return Err(UbusError::CallFailed {
                object: object.to_string(),
                method: method.to_string(),
                code,
            });
        }
        Ok(result.get(1).cloned().unwrap_or(Value::Null))
    }

    /// Authenticate and return a session token for subsequent calls.
    pub async fn login(&self) -> Result<String, UbusError> {
        let payload = self
            .call(
                NULL_SESSION,
                "session",
                "login",
                json!({ "username": self.username, "password": self.password }),
            )
            .await
            .map_err(|err| match err {
                UbusError::CallFailed { .. } => UbusError::LoginFailed {
                    username: self.username.clone(),
                },
                other => other,
            })?;

        payload
            .get("ubus_rpc_session")
            .and_then(Value::as_str)
            .map(|s| s.to_string())
            .ok_or(UbusError::LoginFailed {
                username: self.username.clone(),
            })
    }

    /// `luci-rpc getDHCPLeases`: v4 and v6 lease tables.
    pub async fn dhcp_leases(
        &self,
        session: &str,
    ) -> Result<(Vec<UbusLease>, Vec<UbusLease6>), UbusError> {
        let payload = self
            .call(session, "luci-rpc", "getDHCPLeases", json!({}))
            .await?;
        let leases: LeasesPayload = serde_json::from_value(payload)?;
        Ok((leases.dhcp_leases, leases.dhcp6_leases))
    }

    /// `luci-rpc getHostHints`: hostname/IP hints keyed by MAC.
    pub async fn host_hints(
        &self,
        session: &str,
    ) -> Result<BTreeMap<String, UbusHostHint>, UbusError> {
        let payload = self
            .call(session, "luci-rpc", "getHostHints", json!({}))
            .await?;
        Ok(serde_json::from_value(payload)?)
    }

    /// Enumerate `hostapd.*` objects, yielding the wireless interface names.
    pub async fn hostapd_interfaces(&self, session: &str) -> Result<Vec<String>, UbusError> {
        let result = self.rpc("list", json!([session, "hostapd.*"])).await?;

        let names = match result {
            Value::Object(map) => map
                .keys()
                .filter_map(|k| k.strip_prefix("hostapd."))
                .map(|s| s.to_string())
                .collect(),
            _ => Vec::new(),
        };
        Ok(names)
    }

    /// `hostapd.<iface> get_clients`: stations keyed by MAC.
    pub async fn wifi_clients(
        &self,
        session: &str,
        interface: &str,
    ) -> Result<BTreeMap<String, UbusWifiClient>, UbusError> {
        let payload = self
            .call(
                session,
                &format!("hostapd.{interface}"),
                "get_clients",
                json!({}),
            )
            .await?;
        let clients: ClientsPayload = serde_json::from_value(payload)?;
        Ok(clients.clients)
    }
}
