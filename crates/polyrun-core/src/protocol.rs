//! Message protocol between a coordinator and its host.
//!
//! Both directions are JSON-shaped tagged unions keyed on `type`, so a message
//! serializes to e.g. `{"type":"result","output":"hi\n","id":1}`.

use serde::{Deserialize, Serialize};

use crate::core_types::SourceFile;

/// Correlation id of a run request. Never reused within a process lifetime.
pub type RequestId = u64;

/// Tag distinguishing successive host instances of one coordinator.
pub type Generation = u64;

/// Coordinator → host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostCommand {
    Run {
        id: RequestId,
        code: String,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        files: Vec<SourceFile>,
    },
    /// Re-attempt initialization.
    Reload,
}

/// Host → coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum HostMessage {
    Loading {
        message: String,
    },
    Ready,
    LoadError {
        error: String,
    },
    PackageLoading {
        packages: Vec<String>,
        id: RequestId,
    },
    PackagesLoaded {
        id: RequestId,
    },
    Result {
        output: String,
        id: RequestId,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        stdout: Option<String>,
        id: RequestId,
    },
}

impl HostMessage {
    /// Correlation id for request-scoped messages.
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            HostMessage::PackageLoading { id, .. }
            | HostMessage::PackagesLoaded { id }
            | HostMessage::Result { id, .. }
            | HostMessage::Error { id, .. } => Some(*id),
            HostMessage::Loading { .. } | HostMessage::Ready | HostMessage::LoadError { .. } => {
                None
            }
        }
    }
}

/// A host message stamped with the generation of the host that sent it.
#[derive(Debug, Clone, PartialEq)]
pub struct HostEnvelope {
    pub generation: Generation,
    pub message: HostMessage,
}
