//! Engagement fan-out: replies to comments and messages to likers.
//!
//! Every reply or message is an independent unit keyed by its target. Units
//! run concurrently up to the configured cap; a failed unit never aborts its
//! siblings. Units with an `ok` entry from an earlier call are reported as
//! already sent without touching any provider.

use futures::stream::{self, StreamExt};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::engine::{Orchestrator, decode, replayable};
use super::fingerprint::fingerprint;
use super::policy::Attempted;
use super::transitions;
use crate::domain::{
    Comment, ContentKind, EngagementReport, EngagementTarget, HistoryEntry, Liker, RunState,
    StageName, StyleHints, UnitOutcome, UnitStatus,
};
use crate::error::{Result, WorkflowError};
use crate::providers::{GatewayOutcome, GenerationRequest, ProviderError};

/// Trigger passed to the generator for liker messages
const LIKER_TRIGGER: &str = "post_like";

/// Payload of an engage call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngageRequest {
    pub reply_to_comments: bool,
    pub message_likers: bool,
    /// Overrides the configured liker cap
    pub max_likers: Option<usize>,
    pub hints: StyleHints,
    /// Bump to scan again for new comments/likers with otherwise identical settings
    pub round: u32,
}

impl Default for EngageRequest {
    fn default() -> Self {
        Self {
            reply_to_comments: true,
            message_likers: false,
            max_likers: None,
            hints: StyleHints::default(),
            round: 0,
        }
    }
}

impl EngageRequest {
    pub fn replies() -> Self {
        Self::default()
    }

    pub fn messages() -> Self {
        Self {
            reply_to_comments: false,
            message_likers: true,
            ..Default::default()
        }
    }

    pub fn both() -> Self {
        Self {
            reply_to_comments: true,
            message_likers: true,
            ..Default::default()
        }
    }
}

impl Orchestrator {
    /// Reply to comments and/or message likers of the run's post
    pub async fn engage(&self, run_id: &str, request: &EngageRequest) -> Result<EngagementReport> {
        let stage = StageName::Engaging;
        if !request.reply_to_comments && !request.message_likers {
            return Err(WorkflowError::InvalidRequest(
                "Engage request selects neither replies nor messages".to_string(),
            ));
        }

        let lock = self.run_lock(run_id)?;
        let _guard = lock.lock().await;

        let mut history = self.get_run(run_id)?;
        let fp = fingerprint(stage, request)?;
        if let Some(entry) = replayable(&history, stage, &fp) {
            info!("Run {}: engagement already completed for this request", run_id);
            return decode(entry);
        }
        self.ensure_active(&mut history, stage)?;
        transitions::check(&history, stage, false)?;

        let post_id = history
            .run
            .post_id
            .clone()
            .ok_or_else(|| WorkflowError::InvalidRequest(format!("Run {} has no published post", run_id)))?;

        let mut run = history.run.clone();
        self.enter(&mut run, stage)?;

        let mut report = EngagementReport::new(run_id);
        let mut targets = Vec::new();

        if request.reply_to_comments {
            match self.list_comments(run_id, &post_id).await? {
                Ok(comments) => targets.extend(comments.into_iter().map(EngagementTarget::Reply)),
                Err(e) => report.listing_errors.push(format!("comments: {}", e)),
            }
        }
        if request.message_likers {
            let cap = request.max_likers.unwrap_or(self.config.max_likers);
            match self.list_likers(run_id, &post_id).await? {
                Ok(likers) => targets.extend(likers.into_iter().take(cap).map(EngagementTarget::Message)),
                Err(e) => report.listing_errors.push(format!("likers: {}", e)),
            }
        }

        let concurrency = self.config.engagement_concurrency.max(1);
        let history = &history;
        let post_id = post_id.as_str();
        let outcomes: Vec<Result<UnitOutcome>> = stream::iter(targets)
            .map(move |target| async move {
                match history.ok_for_target(stage, &target.key()) {
                    Some(done) => Ok(UnitOutcome::already_sent(
                        &target,
                        done.result_str("text").map(str::to_string),
                    )),
                    None => self.engage_unit(run_id, post_id, target, &request.hints).await,
                }
            })
            .buffered(concurrency)
            .collect()
            .await;
        report.outcomes = outcomes.into_iter().collect::<Result<Vec<_>>>()?;

        run.engagement.extend(
            report
                .outcomes
                .iter()
                .filter(|o| o.status != UnitStatus::AlreadySent)
                .cloned(),
        );

        let result = serde_json::to_value(&report)?;
        if report.has_failures() {
            let detail = format!(
                "{} of {} engagement units failed{}",
                report.failed_count(),
                report.outcomes.len(),
                if report.listing_errors.is_empty() {
                    String::new()
                } else {
                    format!("; {}", report.listing_errors.join("; "))
                }
            );
            warn!("Run {}: {}", run_id, detail);
            run.last_error = Some(detail.clone());
            run.transition(RunState::PartiallyFailed);
            self.history.save_run(&run)?;
            self.history.append(
                HistoryEntry::error(run_id, stage, 0, detail).with_result(result),
            )?;
        } else {
            run.transition(RunState::Completed);
            self.history.save_run(&run)?;
            self.history.append(
                HistoryEntry::ok(run_id, stage)
                    .with_fingerprint(fp)
                    .with_result(result),
            )?;
            info!(
                "Run {}: engagement complete ({} units)",
                run_id,
                report.outcomes.len()
            );
        }

        Ok(report)
    }

    async fn list_comments(
        &self,
        run_id: &str,
        post_id: &str,
    ) -> Result<std::result::Result<Vec<Comment>, ProviderError>> {
        let gateway = &self.providers.gateway;
        let outcome = self
            .call_with_retry(
                run_id,
                StageName::Engaging,
                Some("list:comments"),
                &self.config.policies.engagement_network,
                move |_| async move { gateway.list_comments(run_id, post_id).await },
            )
            .await?;
        self.listing_result(run_id, "list:comments", outcome)
    }

    async fn list_likers(&self, run_id: &str, post_id: &str) -> Result<std::result::Result<Vec<Liker>, ProviderError>> {
        let gateway = &self.providers.gateway;
        let outcome = self
            .call_with_retry(
                run_id,
                StageName::Engaging,
                Some("list:likers"),
                &self.config.policies.engagement_network,
                move |_| async move { gateway.list_likers(run_id, post_id).await },
            )
            .await?;
        self.listing_result(run_id, "list:likers", outcome)
    }

    /// Listing failures are recorded against the run but are not units
    fn listing_result<T>(
        &self,
        run_id: &str,
        target: &str,
        outcome: Attempted<Vec<T>>,
    ) -> Result<std::result::Result<Vec<T>, ProviderError>> {
        match outcome {
            Attempted::Success { value, .. } => Ok(Ok(value)),
            Attempted::Failed { error, attempts } => {
                warn!("Run {}: {} failed after {} attempt(s): {}", run_id, target, attempts, error);
                self.history.append(
                    HistoryEntry::error(run_id, StageName::Engaging, attempts, error.to_string()).with_target(target),
                )?;
                Ok(Err(error))
            }
        }
    }

    /// Generate the text for one unit, then perform its gateway effect
    async fn engage_unit(
        &self,
        run_id: &str,
        post_id: &str,
        target: EngagementTarget,
        hints: &StyleHints,
    ) -> Result<UnitOutcome> {
        let stage = StageName::Engaging;
        let key = target.key();

        let generation = match &target {
            EngagementTarget::Reply(comment) => GenerationRequest {
                run_id: run_id.to_string(),
                source_text: comment.text.clone(),
                kind: ContentKind::Comment,
                hints: hints.clone(),
            },
            EngagementTarget::Message(liker) => {
                let mut hints = hints.clone();
                if hints.trigger.is_none() {
                    hints = hints.with_trigger(LIKER_TRIGGER);
                }
                GenerationRequest {
                    run_id: run_id.to_string(),
                    source_text: format!("User: {}", liker.name),
                    kind: ContentKind::Message,
                    hints,
                }
            }
        };

        let generator = &self.providers.generator;
        let generation = &generation;
        let generated = self
            .call_with_retry(
                run_id,
                stage,
                Some(key.as_str()),
                &self.config.policies.engagement_generation,
                move |_| async move {
                    let generated = generator.generate(generation).await?;
                    if generated.text.trim().is_empty() {
                        return Err(ProviderError::GenerationRejected("Generator returned no text".to_string()));
                    }
                    Ok(generated)
                },
            )
            .await?;

        let text = match generated {
            Attempted::Success { value, .. } => value.text,
            Attempted::Failed { error, attempts } => return self.unit_failed(run_id, &target, error, attempts),
        };

        let gateway = &self.providers.gateway;
        let target_ref = &target;
        let text_ref = text.as_str();
        let sent = self
            .call_with_retry(
                run_id,
                stage,
                Some(key.as_str()),
                &self.config.policies.engagement_network,
                move |_| async move {
                    match target_ref {
                        EngagementTarget::Reply(comment) => gateway.reply(run_id, post_id, &comment.id, text_ref).await,
                        EngagementTarget::Message(liker) => gateway.message(run_id, &liker.id, text_ref).await,
                    }
                },
            )
            .await?;

        match sent {
            Attempted::Success { value, attempts } => {
                let duplicate = matches!(value, GatewayOutcome::AlreadyDone(()));
                self.history.append(
                    HistoryEntry::ok(run_id, stage)
                        .with_target(key)
                        .with_attempt(attempts)
                        .with_result(json!({ "text": text, "duplicate": duplicate })),
                )?;
                Ok(if duplicate {
                    UnitOutcome::already_sent(&target, Some(text))
                } else {
                    UnitOutcome::sent(&target, text)
                })
            }
            Attempted::Failed { error, attempts } => self.unit_failed(run_id, &target, error, attempts),
        }
    }

    fn unit_failed(
        &self,
        run_id: &str,
        target: &EngagementTarget,
        error: ProviderError,
        attempts: u32,
    ) -> Result<UnitOutcome> {
        warn!("Run {}: {} failed: {}", run_id, target.key(), error);
        self.history.append(
            HistoryEntry::error(run_id, StageName::Engaging, attempts, error.to_string()).with_target(target.key()),
        )?;
        Ok(UnitOutcome::failed(target, error.to_string()))
    }
}
