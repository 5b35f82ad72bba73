//! Channel names for real-time fan-out.
//!
//! A channel is `"<resource>:<id>"`, e.g. `workflow_run:9b2c…` or
//! `project:p1`. The reserved name `global` has no suffix and addresses
//! every connected client; the ledger publishes run-level changes there. Ids
//! may contain colons, so parsing splits on the first colon only.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Reserved channel name reaching every client
pub const GLOBAL_CHANNEL: &str = "global";

pub const RESOURCE_WORKFLOW_RUN: &str = "workflow_run";
pub const RESOURCE_PROJECT: &str = "project";
pub const RESOURCE_TERMINAL: &str = "terminal";

/// Errors from building or parsing a channel name
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    #[error("Channel name is empty")]
    Empty,

    #[error("Channel name has no ':' separator: {0}")]
    MissingSeparator(String),

    #[error("Channel name has an empty resource: {0}")]
    EmptyResource(String),

    #[error("Channel name has an empty id: {0}")]
    EmptyId(String),

    #[error("Channel resource may not contain ':': {0}")]
    InvalidResource(String),
}

/// A parsed broadcast channel
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Channel {
    resource: String,
    id: String,
}

impl Channel {
    /// Build a channel from its parts.
    ///
    /// The resource must be non-empty and colon-free; the id must be
    /// non-empty unless the resource is the reserved global name.
    pub fn new(resource: impl Into<String>, id: impl Into<String>) -> Result<Self, ChannelError> {
        let resource = resource.into();
        let id = id.into();

        if resource.is_empty() {
            return Err(ChannelError::EmptyResource(format!(":{id}")));
        }
        if resource.contains(':') {
            return Err(ChannelError::InvalidResource(resource));
        }
        if id.is_empty() && resource != GLOBAL_CHANNEL {
            return Err(ChannelError::EmptyId(format!("{resource}:")));
        }

        Ok(Self { resource, id })
    }

    /// The reserved all-clients channel
    pub fn global() -> Self {
        Self {
            resource: GLOBAL_CHANNEL.to_string(),
            id: String::new(),
        }
    }

    pub fn workflow_run(run_id: Uuid) -> Self {
        Self {
            resource: RESOURCE_WORKFLOW_RUN.to_string(),
            id: run_id.to_string(),
        }
    }

    pub fn project(project_id: &str) -> Result<Self, ChannelError> {
        Self::new(RESOURCE_PROJECT, project_id)
    }

    pub fn terminal(terminal_id: &str) -> Result<Self, ChannelError> {
        Self::new(RESOURCE_TERMINAL, terminal_id)
    }

    /// Parse a channel name, splitting on the first colon
    pub fn parse(name: &str) -> Result<Self, ChannelError> {
        if name.is_empty() {
            return Err(ChannelError::Empty);
        }
        if name == GLOBAL_CHANNEL {
            return Ok(Self::global());
        }

        let (resource, id) = name
            .split_once(':')
            .ok_or_else(|| ChannelError::MissingSeparator(name.to_string()))?;

        if resource.is_empty() {
            return Err(ChannelError::EmptyResource(name.to_string()));
        }
        if id.is_empty() {
            return Err(ChannelError::EmptyId(name.to_string()));
        }

        Ok(Self {
            resource: resource.to_string(),
            id: id.to_string(),
        })
    }

    pub fn resource(&self) -> &str {
        &self.resource
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_global(&self) -> bool {
        self.resource == GLOBAL_CHANNEL && self.id.is_empty()
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_global() {
            f.write_str(GLOBAL_CHANNEL)
        } else {
            write!(f, "{}:{}", self.resource, self.id)
        }
    }
}

impl FromStr for Channel {
    type Err = ChannelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for Channel {
    type Error = ChannelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<Channel> for String {
    fn from(channel: Channel) -> Self {
        channel.to_string()
    }
}
