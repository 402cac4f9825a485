//! Settings types.
//!
//! Every section is `#[serde(default)]` so a partial settings file only
//! needs to name what it overrides.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ParleySettings {
    /// Listener and per-connection socket settings.
    pub server: ServerSettings,
    /// Dispatch actor settings.
    pub hub: HubSettings,
    /// Cross-instance transport settings.
    pub bridge: BridgeSettings,
    /// Persistence settings.
    pub store: StoreSettings,
    /// Credential validation settings.
    pub auth: AuthSettings,
    /// Log output settings.
    pub logging: LoggingSettings,
}

impl ParleySettings {
    /// Reject values the relay cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.hub.queue_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.queueCapacity must be greater than 0".into(),
            ));
        }
        if self.hub.mailbox_capacity == 0 {
            return Err(SettingsError::InvalidValue(
                "hub.mailboxCapacity must be greater than 0".into(),
            ));
        }
        if self.server.max_frame_bytes == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxFrameBytes must be greater than 0".into(),
            ));
        }
        if self.server.write_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "server.writeTimeoutMs must be greater than 0".into(),
            ));
        }
        if self.server.pong_timeout_ms < 1000 {
            return Err(SettingsError::InvalidValue(
                "server.pongTimeoutMs must be at least 1000".into(),
            ));
        }
        if self.bridge.transport == TransportKind::Redis && self.bridge.redis_url.is_empty() {
            return Err(SettingsError::InvalidValue(
                "bridge.redisUrl is required when bridge.transport is \"redis\"".into(),
            ));
        }
        Ok(())
    }
}

/// Listener and socket settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Listen port (`0` auto-assigns).
    pub port: u16,
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_bytes: usize,
    /// Deadline for every socket write, in milliseconds.
    pub write_timeout_ms: u64,
    /// Read deadline; extended by every inbound frame or pong, in milliseconds.
    pub pong_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            max_frame_bytes: 512,
            write_timeout_ms: 10_000,
            pong_timeout_ms: 60_000,
        }
    }
}

/// What the hub does when a group's member set cannot be resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipFallback {
    /// Deliver nothing and log an error.
    #[default]
    Drop,
    /// Deliver to every locally registered connection.
    BroadcastAll,
}

/// How the recipient copy of a private message is routed.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrivateRouting {
    /// Deliver through this instance's hub only.
    #[default]
    Local,
    /// Publish on `private:<recipient>` so any instance can deliver it.
    Bridge,
}

/// Dispatch actor settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HubSettings {
    /// Per-connection outbound queue capacity. A full queue evicts.
    pub queue_capacity: usize,
    /// Capacity of the hub's own command mailbox.
    pub mailbox_capacity: usize,
    /// Behaviour when group membership cannot be resolved.
    pub membership_fallback: MembershipFallback,
    /// Routing for the recipient copy of private messages.
    pub private_routing: PrivateRouting,
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            queue_capacity: 256,
            mailbox_capacity: 1024,
            membership_fallback: MembershipFallback::default(),
            private_routing: PrivateRouting::default(),
        }
    }
}

/// Which pub/sub transport backs the bridge.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    /// In-process transport; a single instance only.
    #[default]
    Memory,
    /// Redis `PUBLISH` / `PSUBSCRIBE`.
    Redis,
}

/// Cross-instance transport settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BridgeSettings {
    /// Transport implementation.
    pub transport: TransportKind,
    /// Redis connection URL (used when `transport` is `redis`).
    pub redis_url: String,
    /// Buffer size of the in-process transport.
    pub memory_buffer: usize,
}

impl Default for BridgeSettings {
    fn default() -> Self {
        Self {
            transport: TransportKind::default(),
            redis_url: "redis://127.0.0.1:6379".to_string(),
            memory_buffer: 1024,
        }
    }
}

/// Persistence settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StoreSettings {
    /// SQLite database path (relative paths resolve against `~/.parley`).
    pub db_path: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            db_path: "parley.db".to_string(),
        }
    }
}

/// Credential validation settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuthSettings {
    /// HMAC secret for HS256 tokens.
    pub jwt_secret: String,
    /// Lifetime of minted tokens, in seconds.
    pub token_ttl_secs: u64,
}

impl Default for AuthSettings {
    fn default() -> Self {
        Self {
            jwt_secret: "change-me".to_string(),
            token_ttl_secs: 24 * 60 * 60,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter directive (overridden by `RUST_LOG`).
    pub level: String,
    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_camel_case() {
        let json = serde_json::to_value(ParleySettings::default()).unwrap();
        assert_eq!(json["server"]["maxFrameBytes"], 512);
        assert_eq!(json["hub"]["membershipFallback"], "drop");
        assert_eq!(json["hub"]["privateRouting"], "local");
        assert_eq!(json["bridge"]["transport"], "memory");
    }

    #[test]
    fn partial_section_keeps_defaults() {
        let s: ParleySettings =
            serde_json::from_str(r#"{"hub":{"queueCapacity":8}}"#).unwrap();
        assert_eq!(s.hub.queue_capacity, 8);
        assert_eq!(s.hub.mailbox_capacity, 1024);
        assert_eq!(s.server.port, 8080);
    }

    #[test]
    fn fallback_parses_snake_case() {
        let f: MembershipFallback = serde_json::from_str("\"broadcast_all\"").unwrap();
        assert_eq!(f, MembershipFallback::BroadcastAll);
    }

    #[test]
    fn zero_queue_capacity_rejected() {
        let mut s = ParleySettings::default();
        s.hub.queue_capacity = 0;
        assert!(matches!(s.validate(), Err(SettingsError::InvalidValue(_))));
    }

    #[test]
    fn zero_write_timeout_rejected() {
        let mut s = ParleySettings::default();
        s.server.write_timeout_ms = 0;
        let Err(SettingsError::InvalidValue(msg)) = s.validate() else {
            panic!("expected InvalidValue");
        };
        assert!(msg.contains("writeTimeoutMs"));
        s.server.write_timeout_ms = 1;
        assert!(s.validate().is_ok());
    }

    #[test]
    fn redis_requires_url() {
        let mut s = ParleySettings::default();
        s.bridge.transport = TransportKind::Redis;
        s.bridge.redis_url.clear();
        assert!(s.validate().is_err());
        s.bridge.redis_url = "redis://localhost".into();
        assert!(s.validate().is_ok());
    }
}
