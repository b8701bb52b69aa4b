// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    #[error("hub destroyed")]
    Destroyed,

    #[error("timed out waiting for {0}")]
    Timeout(String),

    #[error("lock on {resource} not held by {agent}")]
    LockNotHeld { resource: String, agent: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("access denied to region {region} for {agent}")]
    AccessDenied { region: String, agent: String },

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("channel capacity exceeded for {0}")]
    ChannelFull(String),
}
