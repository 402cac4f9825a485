//! Envelope codec: decodes inbound client frames into a typed command and
//! serializes outbound acks, events, and errors.
//!
//! Inbound frames are JSON objects:
//!
//! ```json
//! {"type":"private","to":"u_b","body":"hi","tempId":"t1"}
//! {"type":"group","groupId":7,"body":"yo","tempId":"t2"}
//! ```
//!
//! Decoding is lenient about *absent* fields (they default to
//! empty / zero) and strict about *mistyped* ones (a string `groupId` is
//! `invalid_json`), so a required-but-missing field surfaces as
//! `missing_fields` rather than a parse error.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::collab::{GroupMessage, PrivateMessage};
use crate::ids::{GroupId, MessageId, UserId};

/// An encoded outbound frame, shared between every queue it is fanned out to.
pub type Payload = Arc<str>;

/// Fixed error codes. Never carries text derived from internal failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// The frame was not a JSON object of the expected shape.
    InvalidJson,
    /// A required field was empty or absent.
    MissingFields,
    /// The sender is not a member of the target group.
    NotAMember,
    /// The persistence collaborator refused or failed the write.
    SendFailed,
    /// The `type` discriminator named no known command.
    UnsupportedType,
}

impl ErrorCode {
    /// Wire spelling of the code.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InvalidJson => "invalid_json",
            Self::MissingFields => "missing_fields",
            Self::NotAMember => "not_a_member",
            Self::SendFailed => "send_failed",
            Self::UnsupportedType => "unsupported_type",
        }
    }

    /// Pre-rendered error frame for this code.
    pub fn frame(self) -> &'static str {
        match self {
            Self::InvalidJson => r#"{"type":"error","error":"invalid_json"}"#,
            Self::MissingFields => r#"{"type":"error","error":"missing_fields"}"#,
            Self::NotAMember => r#"{"type":"error","error":"not_a_member"}"#,
            Self::SendFailed => r#"{"type":"error","error":"send_failed"}"#,
            Self::UnsupportedType => r#"{"type":"error","error":"unsupported_type"}"#,
        }
    }

    /// Encoded error frame as a shareable payload.
    pub fn payload(self) -> Payload {
        Arc::from(self.frame())
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Typed inbound command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Envelope {
    /// Direct message to one user.
    Private {
        /// Recipient identity (non-empty).
        to: UserId,
        /// Message body (non-empty).
        body: String,
        /// Client correlation token, echoed verbatim in the ack.
        temp_id: String,
    },
    /// Message to every member of a group.
    Group {
        /// Target group (non-zero).
        group_id: GroupId,
        /// Message body (non-empty).
        body: String,
        /// Client correlation token, echoed verbatim in the ack.
        temp_id: String,
    },
    /// A well-formed frame whose `type` is not a known command.
    Unsupported {
        /// The `type` value that was received (empty when absent).
        kind: String,
    },
}

#[derive(Deserialize)]
struct RawEnvelope {
    #[serde(rename = "type")]
    kind: Option<String>,
    to: Option<String>,
    body: Option<String>,
    #[serde(rename = "tempId")]
    temp_id: Option<String>,
    #[serde(rename = "groupId")]
    group_id: Option<u64>,
}

/// Decode one inbound text frame.
///
/// Errors are limited to [`ErrorCode::InvalidJson`] and
/// [`ErrorCode::MissingFields`]; unknown types decode to
/// [`Envelope::Unsupported`].
pub fn decode(raw: &str) -> Result<Envelope, ErrorCode> {
    let env: RawEnvelope = serde_json::from_str(raw).map_err(|_| ErrorCode::InvalidJson)?;
    let body = env.body.unwrap_or_default();
    let temp_id = env.temp_id.unwrap_or_default();

    match env.kind.as_deref().unwrap_or_default() {
        "private" => {
            let to = env.to.unwrap_or_default();
            if to.is_empty() || body.is_empty() {
                return Err(ErrorCode::MissingFields);
            }
            Ok(Envelope::Private {
                to: UserId::from(to),
                body,
                temp_id,
            })
        }
        "group" => {
            let group_id = env.group_id.unwrap_or_default();
            if group_id == 0 || body.is_empty() {
                return Err(ErrorCode::MissingFields);
            }
            Ok(Envelope::Group {
                group_id: GroupId::new(group_id),
                body,
                temp_id,
            })
        }
        other => Ok(Envelope::Unsupported {
            kind: other.to_owned(),
        }),
    }
}

/// Outbound frame, tagged by `type`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum OutboundFrame {
    /// Acknowledges a persisted private message to its sender.
    PrivateAck {
        /// Echo of the client correlation token.
        temp_id: String,
        /// Persisted message ID.
        id: MessageId,
        /// Sender.
        from: UserId,
        /// Recipient.
        to: UserId,
        /// Body as persisted.
        body: String,
        /// Persisted timestamp, Unix seconds.
        ts: i64,
    },
    /// A private message event, delivered to recipient and echoed to sender.
    Private {
        /// Persisted message ID.
        id: MessageId,
        /// Sender.
        from: UserId,
        /// Recipient.
        to: UserId,
        /// Body as persisted.
        body: String,
        /// Persisted timestamp, Unix seconds.
        ts: i64,
        /// Read flag; always `false` on a fresh event.
        read: bool,
    },
    /// Acknowledges a persisted group message to its sender.
    GroupAck {
        /// Echo of the client correlation token.
        temp_id: String,
        /// Persisted message ID.
        id: MessageId,
        /// Target group.
        group_id: GroupId,
        /// Sender.
        from: UserId,
        /// Body as persisted.
        body: String,
        /// Persisted timestamp, Unix seconds.
        ts: i64,
    },
    /// A group message event, fanned out to every connected member.
    Group {
        /// Persisted message ID.
        id: MessageId,
        /// Target group.
        group_id: GroupId,
        /// Sender.
        from: UserId,
        /// Sender display identity, omitted when the lookup failed.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        from_email: Option<String>,
        /// Body as persisted.
        body: String,
        /// Persisted timestamp, Unix seconds.
        ts: i64,
    },
    /// A request could not be honoured.
    Error {
        /// Fixed error code.
        error: ErrorCode,
    },
}

impl OutboundFrame {
    /// Ack for a persisted private message.
    pub fn private_ack(temp_id: impl Into<String>, msg: &PrivateMessage) -> Self {
        Self::PrivateAck {
            temp_id: temp_id.into(),
            id: msg.id,
            from: msg.sender.clone(),
            to: msg.recipient.clone(),
            body: msg.body.clone(),
            ts: msg.created_at.timestamp(),
        }
    }

    /// Event for a persisted private message.
    pub fn private_event(msg: &PrivateMessage) -> Self {
        Self::Private {
            id: msg.id,
            from: msg.sender.clone(),
            to: msg.recipient.clone(),
            body: msg.body.clone(),
            ts: msg.created_at.timestamp(),
            read: false,
        }
    }

    /// Ack for a persisted group message.
    pub fn group_ack(temp_id: impl Into<String>, msg: &GroupMessage) -> Self {
        Self::GroupAck {
            temp_id: temp_id.into(),
            id: msg.id,
            group_id: msg.group_id,
            from: msg.sender.clone(),
            body: msg.body.clone(),
            ts: msg.created_at.timestamp(),
        }
    }

    /// Event for a persisted group message.
    pub fn group_event(msg: &GroupMessage, from_email: Option<String>) -> Self {
        Self::Group {
            id: msg.id,
            group_id: msg.group_id,
            from: msg.sender.clone(),
            from_email,
            body: msg.body.clone(),
            ts: msg.created_at.timestamp(),
        }
    }

    /// Error frame.
    pub fn error(code: ErrorCode) -> Self {
        Self::Error { error: code }
    }

    /// Serialize to a shareable payload.
    pub fn encode(&self) -> Payload {
        if let Self::Error { error } = self {
            return error.payload();
        }
        match serde_json::to_string(self) {
            Ok(json) => Arc::from(json),
            Err(e) => {
                tracing::error!(error = %e, "failed to serialize outbound frame");
                ErrorCode::SendFailed.payload()
            }
        }
    }
}
