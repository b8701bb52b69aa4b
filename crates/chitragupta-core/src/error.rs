// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use thiserror::Error;

use chitragupta_model::ProviderError;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("no provider configured for agent {0}")]
    NoProvider(String),

    #[error("aborted")]
    Aborted,

    #[error("agent depth limit exceeded (max {0})")]
    DepthExceeded(usize),

    #[error("agent fan-out limit exceeded (max {0})")]
    FanoutExceeded(usize),

    #[error("input request {0} timed out")]
    InputTimeout(String),

    #[error("input request {request_id} denied{}", reason.as_deref().map(|r| format!(": {r}")).unwrap_or_default())]
    InputDenied {
        request_id: String,
        reason: Option<String>,
    },

    #[error(transparent)]
    Provider(#[from] ProviderError),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
