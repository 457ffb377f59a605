//! Directive and radio-request wire formats
//!
//! Directives arrive as flat JSON objects over either transport:
//! ```json
//! {"sessionId": "...", "action": "SWITCH_WIFI", "ssid": "...", "password": "...", "reason": "..."}
//! ```
//! Radio requests go the other way and ask the peer (or the fallback
//! relay) to power a radio on or off.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Errors raised while decoding a directive
#[derive(Error, Debug)]
pub enum DirectiveError {
    #[error("Directive is not valid UTF-8 JSON: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("Unknown directive action: {0}")]
    UnknownAction(String),
}

/// The two radios the agent manages
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RadioKind {
    /// Low-power radio carrying the control channel (Bluetooth)
    Control,
    /// Higher-power radio joined on demand (Wi-Fi)
    Data,
}

impl fmt::Display for RadioKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioKind::Control => write!(f, "control"),
            RadioKind::Data => write!(f, "data"),
        }
    }
}

/// What a directive asks the agent to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveKind {
    PrepareControlRadio,
    ControlRadioReady,
    ControlRadioOff,
    EnableDataRadio,
    DataRadioReady,
    DisableDataRadio,
    DataRadioOff,
    JoinNetwork,
    ReleaseAll,
}

impl DirectiveKind {
    /// Parse a wire action string
    pub fn from_action(action: &str) -> Option<Self> {
        match action {
            "PREPARE_BT" => Some(Self::PrepareControlRadio),
            "BT_READY" => Some(Self::ControlRadioReady),
            "BT_DISABLED" => Some(Self::ControlRadioOff),
            "PREPARE_WIFI" => Some(Self::EnableDataRadio),
            "WIFI_READY" => Some(Self::DataRadioReady),
            "DISABLE_WIFI" => Some(Self::DisableDataRadio),
            "WIFI_DISABLED" => Some(Self::DataRadioOff),
            "SWITCH_WIFI" => Some(Self::JoinNetwork),
            "RELEASE" => Some(Self::ReleaseAll),
            _ => None,
        }
    }

    /// Wire action string
    pub fn action(&self) -> &'static str {
        match self {
            Self::PrepareControlRadio => "PREPARE_BT",
            Self::ControlRadioReady => "BT_READY",
            Self::ControlRadioOff => "BT_DISABLED",
            Self::EnableDataRadio => "PREPARE_WIFI",
            Self::DataRadioReady => "WIFI_READY",
            Self::DisableDataRadio => "DISABLE_WIFI",
            Self::DataRadioOff => "WIFI_DISABLED",
            Self::JoinNetwork => "SWITCH_WIFI",
            Self::ReleaseAll => "RELEASE",
        }
    }
}

/// Flat wire representation shared by both transports
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct DirectiveWire {
    #[serde(rename = "sessionId", default)]
    session_id: String,
    action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    ssid: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    password: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    reason: Option<String>,
}

/// A decoded instruction driving radio-plane transitions
#[derive(Clone, PartialEq, Eq)]
pub struct Directive {
    pub correlation_id: String,
    pub kind: DirectiveKind,
    pub network_name: Option<String>,
    pub network_secret: Option<String>,
    pub reason: Option<String>,
}

impl Directive {
    /// Create a directive without network credentials
    pub fn new(correlation_id: impl Into<String>, kind: DirectiveKind) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            kind,
            network_name: None,
            network_secret: None,
            reason: None,
        }
    }

    /// Attach network credentials
    pub fn with_network(mut self, name: impl Into<String>, secret: impl Into<String>) -> Self {
        self.network_name = Some(name.into());
        self.network_secret = Some(secret.into());
        self
    }

    /// Attach a free-form reason
    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Decode a directive from its JSON wire form
    pub fn parse(raw: &[u8]) -> Result<Self, DirectiveError> {
        let wire: DirectiveWire = serde_json::from_slice(raw)?;
        let kind = DirectiveKind::from_action(&wire.action)
            .ok_or_else(|| DirectiveError::UnknownAction(wire.action.clone()))?;

        Ok(Self {
            correlation_id: wire.session_id,
            kind,
            network_name: non_empty(wire.ssid),
            network_secret: non_empty(wire.password),
            reason: non_empty(wire.reason),
        })
    }

    /// Encode to the JSON wire form
    pub fn to_json(&self) -> Vec<u8> {
        let wire = DirectiveWire {
            session_id: self.correlation_id.clone(),
            action: self.kind.action().to_string(),
            ssid: self.network_name.clone(),
            password: self.network_secret.clone(),
            reason: self.reason.clone(),
        };
        // A struct of strings always serializes
        serde_json::to_vec(&wire).unwrap_or_default()
    }

    /// Network name and secret, when both are present
    pub fn credentials(&self) -> Option<(&str, &str)> {
        match (&self.network_name, &self.network_secret) {
            (Some(name), Some(secret)) => Some((name.as_str(), secret.as_str())),
            _ => None,
        }
    }
}

impl fmt::Debug for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Directive")
            .field("correlation_id", &self.correlation_id)
            .field("kind", &self.kind)
            .field("network_name", &self.network_name)
            .field(
                "network_secret",
                &self.network_secret.as_ref().map(|_| "<redacted>"),
            )
            .field("reason", &self.reason)
            .finish()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

/// A request asking the peer to toggle one of our radios
///
/// There is deliberately no variant for turning the control radio off: it
/// carries the control channel itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RadioRequest {
    EnableControlRadio,
    EnableDataRadio,
    DisableDataRadio,
}

#[derive(Serialize)]
struct RadioRequestWire<'a> {
    action: &'a str,
    reason: &'a str,
    #[serde(rename = "sessionId")]
    session_id: &'a str,
}

impl RadioRequest {
    /// Wire action string understood by the peer
    pub fn action(&self) -> &'static str {
        match self {
            RadioRequest::EnableControlRadio => "enable_bt",
            RadioRequest::EnableDataRadio => "enable_wifi",
            RadioRequest::DisableDataRadio => "disable_wifi",
        }
    }

    /// Radio this request concerns
    pub fn radio(&self) -> RadioKind {
        match self {
            RadioRequest::EnableControlRadio => RadioKind::Control,
            RadioRequest::EnableDataRadio | RadioRequest::DisableDataRadio => RadioKind::Data,
        }
    }

    /// Encode to the JSON wire form
    pub fn to_json(&self, session_id: &str, reason: &str) -> Vec<u8> {
        let wire = RadioRequestWire {
            action: self.action(),
            reason,
            session_id,
        };
        serde_json::to_vec(&wire).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_switch_wifi() {
        let raw = br#"{"sessionId":"s-42","action":"SWITCH_WIFI","ssid":"X","password":"Y"}"#;
        let directive = Directive::parse(raw).unwrap();

        assert_eq!(directive.correlation_id, "s-42");
        assert_eq!(directive.kind, DirectiveKind::JoinNetwork);
        assert_eq!(directive.credentials(), Some(("X", "Y")));
        assert_eq!(directive.reason, None);
    }

    #[test]
    fn test_parse_without_session_id() {
        let directive = Directive::parse(br#"{"action":"PREPARE_BT"}"#).unwrap();
        assert_eq!(directive.kind, DirectiveKind::PrepareControlRadio);
        assert!(directive.correlation_id.is_empty());
    }

    #[test]
    fn test_empty_fields_are_absent() {
        let raw = br#"{"sessionId":"a","action":"SWITCH_WIFI","ssid":"","password":"p"}"#;
        let directive = Directive::parse(raw).unwrap();
        assert_eq!(directive.network_name, None);
        assert_eq!(directive.credentials(), None);
    }

    #[test]
    fn test_unknown_action() {
        let err = Directive::parse(br#"{"sessionId":"a","action":"SELF_DESTRUCT"}"#).unwrap_err();
        assert!(matches!(err, DirectiveError::UnknownAction(a) if a == "SELF_DESTRUCT"));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            Directive::parse(b"{not json"),
            Err(DirectiveError::Malformed(_))
        ));
        assert!(matches!(
            Directive::parse(br#"{"sessionId":"a"}"#),
            Err(DirectiveError::Malformed(_))
        ));
    }

    #[test]
    fn test_every_action_maps_back() {
        for action in [
            "PREPARE_BT",
            "BT_READY",
            "BT_DISABLED",
            "PREPARE_WIFI",
            "WIFI_READY",
            "DISABLE_WIFI",
            "WIFI_DISABLED",
            "SWITCH_WIFI",
            "RELEASE",
        ] {
            let kind = DirectiveKind::from_action(action).unwrap();
            assert_eq!(kind.action(), action);
        }
    }

    #[test]
    fn test_debug_redacts_secret() {
        let directive = Directive::new("s", DirectiveKind::JoinNetwork).with_network("Net", "hunter2");
        let printed = format!("{:?}", directive);
        assert!(printed.contains("Net"));
        assert!(!printed.contains("hunter2"));
    }

    #[test]
    fn test_directive_json_is_parseable() {
        let directive = Directive::new("s-1", DirectiveKind::DataRadioReady)
            .with_network("Lab", "pw")
            .with_reason("peer enabled wifi");
        let parsed = Directive::parse(&directive.to_json()).unwrap();
        assert_eq!(parsed, directive);
    }

    #[test]
    fn test_radio_request_wire() {
        let raw = RadioRequest::EnableDataRadio.to_json("edge-001", "SWITCH_WIFI s-9");
        let value: serde_json::Value = serde_json::from_slice(&raw).unwrap();
        assert_eq!(value["action"], "enable_wifi");
        assert_eq!(value["reason"], "SWITCH_WIFI s-9");
        assert_eq!(value["sessionId"], "edge-001");
        assert_eq!(RadioRequest::EnableControlRadio.radio(), RadioKind::Control);
    }
}
