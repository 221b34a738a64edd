//! Codec for the feeder topic scheme `<namespace>/<hardware id>/<category>/<action>`.
//!
//! Pure string handling, no I/O. Topics outside the configured namespace or
//! with fewer than three segments are not applicable and decode to `None`.

use std::fmt::{self, Display, Formatter};

pub const DEFAULT_NAMESPACE: &str = "feedlypet";

/// A decoded inbound topic. Borrows from the raw topic string.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TopicPath<'a> {
    pub namespace: &'a str,
    pub hardware_id: &'a str,
    pub category: &'a str,
    pub action: Option<&'a str>,
}

impl<'a> TopicPath<'a> {
    pub fn parse(namespace: &str, topic: &'a str) -> Option<Self> {
        let mut segments = topic.split('/');
        let ns = segments.next()?;
        let hardware_id = segments.next()?;
        let category = segments.next()?;
        if ns != namespace {
            return None;
        }

        Some(Self {
            namespace: ns,
            hardware_id,
            category,
            action: segments.next(),
        })
    }

    /// Classifies the category/action pair. Unrecognized combinations are
    /// ignored traffic, not errors.
    pub fn route(&self) -> Option<InboundRoute> {
        match (self.category, self.action) {
            ("status", Some("online")) => Some(InboundRoute::DeviceStatus),
            ("status", Some("food")) => Some(InboundRoute::FoodLevel),
            ("event", Some("feeding")) => Some(InboundRoute::FeedingEvent),
            ("error", _) => Some(InboundRoute::DeviceError),
            _ => None,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InboundRoute {
    DeviceStatus,
    FoodLevel,
    FeedingEvent,
    DeviceError,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    Feed,
    Config,
}

impl Display for CommandKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            CommandKind::Feed => f.write_str("feed"),
            CommandKind::Config => f.write_str("config"),
        }
    }
}

/// Canonical outbound command topic for a device.
pub fn command_topic(namespace: &str, hardware_id: &str, kind: CommandKind) -> String {
    format!("{namespace}/{hardware_id}/command/{kind}")
}

/// The wildcard filters covering all inbound traffic for one deployment.
pub fn subscription_filters(namespace: &str) -> [String; 4] {
    [
        format!("{namespace}/+/status/online"),
        format!("{namespace}/+/status/food"),
        format!("{namespace}/+/event/feeding"),
        format!("{namespace}/+/error"),
    ]
}
