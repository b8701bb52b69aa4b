// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: Apache-2.0
use std::sync::Arc;

use futures::StreamExt;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use chitragupta_model::{
    synthetic_done_stream, BreakerRegistry, ErrorType, EventStream, ModelContext, ProviderError,
    ProviderRegistry, StreamEvent, StreamOptions,
};

use crate::types::{Decision, EscalationStep};

/// Open the event stream a decision calls for.
///
/// Skip-LLM decisions yield the synthetic `start`/`done` pair without any
/// provider call.  Otherwise the selected tier is attempted first and, when
/// `auto_escalate` is set, each stronger tier in the chain after a
/// retryable failure.  Per-tier the order is fixed: breaker allow →
/// attempt → classify → escalate decision → breaker record.
pub async fn open_stream(
    registry: Arc<ProviderRegistry>,
    breakers: Arc<BreakerRegistry>,
    decision: &Decision,
    context: ModelContext,
    options: StreamOptions,
    auto_escalate: bool,
) -> EventStream {
    if decision.skip_llm {
        return synthetic_done_stream();
    }

    let mut tiers = vec![EscalationStep {
        provider_id: decision.provider_id.clone(),
        model_id: decision.model_id.clone(),
    }];
    tiers.extend(decision.escalation_chain.iter().cloned());

    let (tx, rx) = mpsc::channel::<StreamEvent>(64);
    tokio::spawn(drive_tiers(
        registry, breakers, tiers, context, options, auto_escalate, tx,
    ));
    Box::pin(tokio_stream::wrappers::ReceiverStream::new(rx))
}

async fn drive_tiers(
    registry: Arc<ProviderRegistry>,
    breakers: Arc<BreakerRegistry>,
    tiers: Vec<EscalationStep>,
    context: ModelContext,
    options: StreamOptions,
    auto_escalate: bool,
    tx: mpsc::Sender<StreamEvent>,
) {
    let mut start_forwarded = false;
    let last_index = tiers.len() - 1;
    let mut last_error: Option<ProviderError> = None;

    for (i, tier) in tiers.iter().enumerate() {
        let is_last = i == last_index;
        let Some(def) = registry.get(&tier.provider_id) else {
            debug!(provider = %tier.provider_id, "tier provider not registered; skipping");
            continue;
        };
        let breaker = breakers.for_provider(&tier.provider_id);
        if !breaker.allow_request() {
            debug!(provider = %tier.provider_id, "circuit open; skipping tier");
            continue;
        }

        let stream = def
            .provider
            .stream(&tier.model_id, context.clone(), options.clone())
            .await;
        let mut stream = match stream {
            Ok(s) => s,
            Err(e) => {
                breaker.record_failure();
                if e.retryable && auto_escalate && !is_last {
                    warn!(provider = %tier.provider_id, error = %e, "tier failed to open; escalating");
                    last_error = Some(e);
                    continue;
                }
                let _ = tx.send(StreamEvent::Error(e)).await;
                return;
            }
        };

        let mut escalated = false;
        while let Some(ev) = stream.next().await {
            match ev {
                StreamEvent::Start { message_id } => {
                    // Only the first tier's Start reaches the consumer so
                    // the stream grammar holds across escalations.
                    if !start_forwarded {
                        start_forwarded = true;
                        if tx
                            .send(StreamEvent::Start { message_id })
                            .await
                            .is_err()
                        {
                            return;
                        }
                    }
                }
                StreamEvent::Error(e) => {
                    breaker.record_failure();
                    if e.retryable && auto_escalate && !is_last {
                        warn!(provider = %tier.provider_id, error = %e, "stream failed; escalating");
                        last_error = Some(e);
                        escalated = true;
                        break;
                    }
                    let _ = tx.send(StreamEvent::Error(e)).await;
                    return;
                }
                StreamEvent::Done { .. } => {
                    breaker.record_success();
                    let _ = tx.send(ev).await;
                    return;
                }
                other => {
                    if tx.send(other).await.is_err() {
                        return;
                    }
                }
            }
        }
        if escalated {
            continue;
        }
        // Stream ended without Done or Error: a protocol violation by the
        // provider.  Treat like a retryable network failure.
        breaker.record_failure();
        let truncated = ProviderError::new(
            &tier.provider_id,
            ErrorType::Network,
            "stream ended without done",
        );
        if auto_escalate && !is_last {
            last_error = Some(truncated);
            continue;
        }
        let _ = tx.send(StreamEvent::Error(truncated)).await;
        return;
    }

    let err = last_error.unwrap_or_else(|| {
        ProviderError::new("marga", ErrorType::Unknown, "no usable escalation tier")
    });
    let _ = tx.send(StreamEvent::Error(err)).await;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use chitragupta_config::{BreakerConfig, RoutingConfig};
    use chitragupta_model::{FailingProvider, ScriptedProvider, Usage};
    use futures::StreamExt;

    use super::*;
    use crate::pipeline::{RouteRequest, RoutingPipeline};
    use crate::types::TaskType;

    fn registries() -> (Arc<ProviderRegistry>, Arc<BreakerRegistry>) {
        (
            Arc::new(ProviderRegistry::new()),
            Arc::new(BreakerRegistry::new(BreakerConfig::default())),
        )
    }

    fn decision_with_chain(selected: &str, chain: &[&str]) -> Decision {
        let mut d = RoutingPipeline::new(RoutingConfig::default())
            .decide(&RouteRequest::message("What is the capital of France?"));
        d.provider_id = selected.to_string();
        d.model_id = "m".to_string();
        d.escalation_chain = chain
            .iter()
            .map(|p| EscalationStep {
                provider_id: p.to_string(),
                model_id: "m".to_string(),
            })
            .collect();
        d
    }

    #[tokio::test]
    async fn skip_llm_yields_synthetic_done_with_zero_usage() {
        // Scenario: a search request streams without any provider call.
        let (reg, brk) = registries();
        let d = RoutingPipeline::new(RoutingConfig::default())
            .decide(&RouteRequest::message("search for all files named *.ts"));
        assert!(d.skip_llm);
        let events: Vec<StreamEvent> = open_stream(
            reg,
            brk,
            &d,
            ModelContext::default(),
            StreamOptions::default(),
            true,
        )
        .await
        .collect()
        .await;
        assert_eq!(events.len(), 2);
        assert!(matches!(events[0], StreamEvent::Start { .. }));
        match &events[1] {
            StreamEvent::Done { usage, .. } => {
                assert_eq!(*usage, Usage::default());
            }
            other => panic!("expected Done, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn escalates_from_failing_local_to_cloud() {
        // Scenario: the local tier errors, the cloud tier answers.
        let (reg, brk) = registries();
        reg.register(Arc::new(FailingProvider::new(
            "p-local",
            ErrorType::ServerError,
        )));
        reg.register(Arc::new(ScriptedProvider::always_text(
            "p-cloud",
            "bonjour from the cloud",
        )));
        let d = decision_with_chain("p-local", &["p-cloud"]);
        let events: Vec<StreamEvent> = open_stream(
            reg,
            brk,
            &d,
            ModelContext::default(),
            StreamOptions::default(),
            true,
        )
        .await
        .collect()
        .await;
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, StreamEvent::Text { text } if text.contains("cloud"))));
        // Grammar holds: exactly one Start.
        let starts = events
            .iter()
            .filter(|e| matches!(e, StreamEvent::Start { .. }))
            .count();
        assert_eq!(starts, 1);
    }

    #[tokio::test]
    async fn no_escalation_when_disabled() {
        let (reg, brk) = registries();
        reg.register(Arc::new(FailingProvider::new(
            "p-local",
            ErrorType::ServerError,
        )));
        reg.register(Arc::new(ScriptedProvider::always_text("p-cloud", "hi")));
        let d = decision_with_chain("p-local", &["p-cloud"]);
        let events: Vec<StreamEvent> = open_stream(
            reg,
            brk,
            &d,
            ModelContext::default(),
            StreamOptions::default(),
            false,
        )
        .await
        .collect()
        .await;
        assert!(matches!(events.last(), Some(StreamEvent::Error(_))));
    }

    #[tokio::test]
    async fn fatal_error_does_not_escalate() {
        let (reg, brk) = registries();
        reg.register(Arc::new(FailingProvider::new("p-local", ErrorType::Auth)));
        reg.register(Arc::new(ScriptedProvider::always_text("p-cloud", "hi")));
        let d = decision_with_chain("p-local", &["p-cloud"]);
        let events: Vec<StreamEvent> = open_stream(
            reg,
            brk,
            &d,
            ModelContext::default(),
            StreamOptions::default(),
            true,
        )
        .await
        .collect()
        .await;
        match events.last() {
            Some(StreamEvent::Error(e)) => assert_eq!(e.error_type, ErrorType::Auth),
            other => panic!("expected auth error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn all_tiers_exhausted_reports_last_error() {
        let (reg, brk) = registries();
        reg.register(Arc::new(FailingProvider::new("a", ErrorType::ServerError)));
        reg.register(Arc::new(FailingProvider::new("b", ErrorType::Overloaded)));
        let d = decision_with_chain("a", &["b"]);
        let events: Vec<StreamEvent> = open_stream(
            reg,
            brk,
            &d,
            ModelContext::default(),
            StreamOptions::default(),
            true,
        )
        .await
        .collect()
        .await;
        match events.last() {
            Some(StreamEvent::Error(e)) => assert_eq!(e.error_type, ErrorType::Overloaded),
            other => panic!("expected error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unregistered_tier_is_skipped() {
        let (reg, brk) = registries();
        reg.register(Arc::new(ScriptedProvider::always_text("real", "answer")));
        let d = decision_with_chain("ghost", &["real"]);
        let events: Vec<StreamEvent> = open_stream(
            reg,
            brk,
            &d,
            ModelContext::default(),
            StreamOptions::default(),
            true,
        )
        .await
        .collect()
        .await;
        assert!(matches!(events.last(), Some(StreamEvent::Done { .. })));
    }

    #[test]
    fn tool_exec_decision_resolution() {
        let p = RoutingPipeline::new(RoutingConfig::default());
        let req = RouteRequest {
            message: "run the migration script tool",
            tools_available: true,
            ..Default::default()
        };
        let d = p.decide(&req);
        assert_eq!(d.task_type, TaskType::ToolExec);
    }
}
