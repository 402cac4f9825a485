//! Runtime server configuration, derived from [`ParleySettings`].

use std::time::Duration;

use parley_settings::{MembershipFallback, ParleySettings, PrivateRouting};

/// Configuration for the relay server.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Host to bind.
    pub host: String,
    /// Port to bind (`0` auto-assigns).
    pub port: u16,
    /// Largest inbound frame accepted, in bytes.
    pub max_frame_bytes: usize,
    /// Deadline for every socket write.
    pub write_timeout: Duration,
    /// Read deadline, extended by every inbound frame or pong.
    pub pong_timeout: Duration,
    /// Per-connection outbound queue capacity.
    pub queue_capacity: usize,
    /// Hub mailbox capacity.
    pub mailbox_capacity: usize,
    /// What group fan-out does when membership is unavailable.
    pub membership_fallback: MembershipFallback,
    /// Routing for the recipient copy of private messages.
    pub private_routing: PrivateRouting,
}

impl ServerConfig {
    /// Build from loaded settings.
    pub fn from_settings(settings: &ParleySettings) -> Self {
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            max_frame_bytes: settings.server.max_frame_bytes,
            write_timeout: Duration::from_millis(settings.server.write_timeout_ms),
            pong_timeout: Duration::from_millis(settings.server.pong_timeout_ms),
            queue_capacity: settings.hub.queue_capacity,
            mailbox_capacity: settings.hub.mailbox_capacity,
            membership_fallback: settings.hub.membership_fallback,
            private_routing: settings.hub.private_routing,
        }
    }

    /// Interval between server pings: nine tenths of the pong timeout, so a
    /// healthy peer always answers before the read deadline.
    pub fn ping_interval(&self) -> Duration {
        self.pong_timeout * 9 / 10
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let mut config = Self::from_settings(&ParleySettings::default());
        config.host = "127.0.0.1".into();
        config.port = 0;
        config
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_binds_loopback_ephemeral() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.host, "127.0.0.1");
        assert_eq!(cfg.port, 0);
        assert_eq!(cfg.max_frame_bytes, 512);
        assert_eq!(cfg.queue_capacity, 256);
    }

    #[test]
    fn ping_interval_is_nine_tenths_of_pong_timeout() {
        let cfg = ServerConfig::default();
        assert_eq!(cfg.pong_timeout, Duration::from_secs(60));
        assert_eq!(cfg.ping_interval(), Duration::from_secs(54));
    }

    #[test]
    fn from_settings_copies_hub_policy() {
        let mut settings = ParleySettings::default();
        settings.hub.membership_fallback = MembershipFallback::BroadcastAll;
        settings.hub.private_routing = PrivateRouting::Bridge;
        settings.server.write_timeout_ms = 250;
        let cfg = ServerConfig::from_settings(&settings);
        assert_eq!(cfg.membership_fallback, MembershipFallback::BroadcastAll);
        assert_eq!(cfg.private_routing, PrivateRouting::Bridge);
        assert_eq!(cfg.write_timeout, Duration::from_millis(250));
        assert_eq!(cfg.port, 8080);
    }
}
