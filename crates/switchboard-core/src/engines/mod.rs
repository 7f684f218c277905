//! Engine kinds and their static capabilities.
//!
//! Each engine is an external CLI that streams newline-delimited JSON records.
//! The per-engine modules own three things:
//! - how to build the command line for one prompt (`spawn`)
//! - the wire types of the engine's stream dialect (`types`)
//! - translation of that dialect into
//!   [`StreamRecord`](crate::conversation::StreamRecord) (`decode`)

pub mod claude;
pub mod gemini;
pub mod locator;

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::config::EngineSettings;
use crate::conversation::{DecodeError, StreamRecord};
use crate::process::PromptDelivery;

pub use locator::EngineLocator;

/// A supported command-line engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    Claude,
    Gemini,
}

impl EngineKind {
    pub const ALL: [EngineKind; 2] = [EngineKind::Claude, EngineKind::Gemini];

    pub fn as_str(&self) -> &'static str {
        match self {
            EngineKind::Claude => "claude",
            EngineKind::Gemini => "gemini",
        }
    }

    /// Executable name searched for on PATH.
    pub fn binary_name(&self) -> &'static str {
        self.as_str()
    }

    /// Static capability table. Never queried at runtime.
    pub fn capabilities(&self) -> EngineCapabilities {
        match self {
            EngineKind::Claude => EngineCapabilities {
                native_tools: true,
                resumable: true,
            },
            EngineKind::Gemini => EngineCapabilities {
                native_tools: false,
                resumable: true,
            },
        }
    }

    /// Build the argument list (and stdin payload, if any) for one prompt.
    pub fn invocation(&self, request: &LaunchRequest<'_>) -> EngineInvocation {
        match self {
            EngineKind::Claude => claude::build_invocation(request),
            EngineKind::Gemini => gemini::build_invocation(request),
        }
    }

    /// Decode one raw stdout line in this engine's dialect.
    ///
    /// `Ok(None)` means the line carried nothing (blank line).
    pub fn decode_line(&self, line: &str) -> Result<Option<StreamRecord>, DecodeError> {
        match self {
            EngineKind::Claude => claude::decode_line(line),
            EngineKind::Gemini => gemini::decode_line(line),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "claude" => Ok(EngineKind::Claude),
            "gemini" => Ok(EngineKind::Gemini),
            other => Err(format!("unknown engine: {other}")),
        }
    }
}

/// What an engine can do, looked up once per call from [`EngineKind::capabilities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineCapabilities {
    /// Engine accepts structured tool calls and results in its own protocol.
    pub native_tools: bool,
    /// Engine can continue a prior conversation by id.
    pub resumable: bool,
}

/// Inputs for building one engine invocation.
#[derive(Debug, Clone)]
pub struct LaunchRequest<'a> {
    pub prompt: &'a str,
    pub delivery: PromptDelivery,
    pub settings: &'a EngineSettings,
    /// Engine-side conversation id to continue, if any.
    pub resume: Option<&'a str>,
}

/// Arguments plus optional stdin payload for a single engine run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineInvocation {
    pub args: Vec<String>,
    pub stdin_payload: Option<String>,
}
