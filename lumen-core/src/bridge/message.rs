//! Host bridge message types.
//!
//! Requests arrive as `{"callbackId", "method", "params"}` objects with
//! string parameters; replies are tagged by `type`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StreamError;

// ── HostMethod ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostMethod {
    StartRequest,
    StopRequest,
    OpenUrl,
    Pair,
}

impl HostMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HostMethod::StartRequest => "startRequest",
            HostMethod::StopRequest => "stopRequest",
            HostMethod::OpenUrl => "openUrl",
            HostMethod::Pair => "pair",
        }
    }
}

impl FromStr for HostMethod {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "startRequest" => Ok(HostMethod::StartRequest),
            "stopRequest" => Ok(HostMethod::StopRequest),
            "openUrl" => Ok(HostMethod::OpenUrl),
            "pair" => Ok(HostMethod::Pair),
            other => Err(StreamError::InvalidRequest(format!(
                "unknown method {other}"
            ))),
        }
    }
}

impl fmt::Display for HostMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ── HostRequest ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HostRequest {
    pub callback_id: i32,
    pub method: String,
    #[serde(default)]
    pub params: Vec<String>,
}

impl HostRequest {
    pub fn new(callback_id: i32, method: impl Into<String>, params: &[&str]) -> Self {
        Self {
            callback_id,
            method: method.into(),
            params: params.iter().map(|p| p.to_string()).collect(),
        }
    }

    pub fn param(&self, index: usize, name: &str) -> Result<&str, StreamError> {
        self.params
            .get(index)
            .map(String::as_str)
            .ok_or_else(|| StreamError::InvalidRequest(format!("missing parameter {name}")))
    }

    pub fn int_param<T: FromStr>(&self, index: usize, name: &str) -> Result<T, StreamError> {
        let raw = self.param(index, name)?;
        raw.trim()
            .parse()
            .map_err(|_| StreamError::InvalidRequest(format!("{name} is not a number: {raw}")))
    }
}

// ── StreamRequest ────────────────────────────────────────────────

/// Parameters of a `startRequest`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamRequest {
    pub host: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Kilobits per second.
    pub bitrate_kbps: u32,
    pub server_major_version: i32,
}

impl TryFrom<&HostRequest> for StreamRequest {
    type Error = StreamError;

    fn try_from(request: &HostRequest) -> Result<Self, Self::Error> {
        Ok(Self {
            host: request.param(0, "host")?.to_string(),
            width: request.int_param(1, "width")?,
            height: request.int_param(2, "height")?,
            fps: request.int_param(3, "fps")?,
            bitrate_kbps: request.int_param(4, "bitrate")?,
            server_major_version: request.int_param(5, "serverMajorVersion")?,
        })
    }
}

// ── HostMessage ──────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum HostMessage {
    Resolve {
        #[serde(rename = "callbackId")]
        callback_id: i32,
        ret: Value,
    },
    Reject {
        #[serde(rename = "callbackId")]
        callback_id: i32,
        error: String,
    },
    /// Free-form status or diagnostic line.
    Status { message: String },
    StreamTerminated,
}

impl HostMessage {
    /// Resolve with an empty object.
    pub fn resolved(callback_id: i32) -> Self {
        HostMessage::Resolve {
            callback_id,
            ret: Value::Object(Default::default()),
        }
    }

    pub fn status(message: impl Into<String>) -> Self {
        HostMessage::Status {
            message: message.into(),
        }
    }

    pub fn to_json(&self) -> Result<String, StreamError> {
        Ok(serde_json::to_string(self)?)
    }
}
