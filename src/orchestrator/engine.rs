//! The workflow orchestrator.
//!
//! Each stage call follows the same shape:
//! 1. Serialize on the run's lock and load the run from history
//! 2. Return the stored result if the payload fingerprint matches the
//!    stage's last `ok` entry; otherwise refuse cancelled runs
//! 3. Check the prior state, enter the stage and persist the snapshot
//! 4. Call the leaf with retry and timeout, logging `retrying` entries
//! 5. Persist the result to the run, then append the `ok` entry; or append
//!    an `error` entry and fail the run

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use log::{debug, info, warn};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::engage::EngageRequest;
use super::fingerprint::fingerprint;
use super::policy::{Attempted, Clock, RetryPolicy, StagePolicies, TokioClock, retry_with};
use super::transitions;
use crate::domain::{
    ContentKind, DraftId, EntryStatus, GeneratedContent, HistoryEntry, PostId, Run, RunHistory, RunOptions, RunState,
    RunStatus, RunSummary, SourceDescriptor, StageName, StyleHints,
};
use crate::error::{Result, WorkflowError};
use crate::history::HistoryStore;
use crate::id::{generate_run_id, is_valid_run_id};
use crate::providers::{
    ContentGenerator, EngagementGateway, GenerationRequest, ImageGenerator, ProviderError, SourceAdapter,
};

/// The leaf components a run calls through
#[derive(Clone)]
pub struct Providers {
    pub sources: Arc<dyn SourceAdapter>,
    pub generator: Arc<dyn ContentGenerator>,
    /// None when no image provider is configured
    pub images: Option<Arc<dyn ImageGenerator>>,
    pub gateway: Arc<dyn EngagementGateway>,
}

/// Orchestrator settings
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    pub policies: StagePolicies,
    /// When image generation fails for a run that asked for an image,
    /// continue text-only instead of failing the run
    pub publish_without_image: bool,
    /// Concurrent reply/message units during engagement
    pub engagement_concurrency: usize,
    /// Likers messaged per engage call unless the request overrides it
    pub max_likers: usize,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            policies: StagePolicies::default(),
            publish_without_image: false,
            engagement_concurrency: 5,
            max_likers: 10,
        }
    }
}

/// Payload of the content generation stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GenerateRequest {
    pub kind: ContentKind,
    #[serde(default)]
    pub hints: StyleHints,
    /// Append a superseding revision instead of replaying the stored one
    #[serde(default)]
    pub regenerate: bool,
}

impl GenerateRequest {
    pub fn post(hints: StyleHints) -> Self {
        Self {
            kind: ContentKind::Post,
            hints,
            regenerate: false,
        }
    }

    pub fn regenerate(mut self) -> Self {
        self.regenerate = true;
        self
    }
}

/// Payload of a whole-pipeline call
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Client-supplied idempotency key; generated when absent
    pub run_id: Option<String>,
    pub source: SourceDescriptor,
    #[serde(default)]
    pub options: RunOptions,
    #[serde(default)]
    pub hints: StyleHints,
    #[serde(default)]
    pub engage: EngageRequest,
}

impl PipelineRequest {
    pub fn new(source: SourceDescriptor) -> Self {
        Self {
            run_id: None,
            source,
            options: RunOptions::default(),
            hints: StyleHints::default(),
            engage: EngageRequest::default(),
        }
    }

    pub fn with_run_id(mut self, run_id: impl Into<String>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    pub fn with_options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_hints(mut self, hints: StyleHints) -> Self {
        self.hints = hints;
        self
    }
}

/// Draws from the id space more than once before giving up
const GENERATED_ID_ATTEMPTS: usize = 5;

/// Source of ids for runs started without one
pub type IdSource = Arc<dyn Fn() -> String + Send + Sync>;

/// Drives runs through their stages
pub struct Orchestrator {
    pub(super) providers: Providers,
    pub(super) history: Arc<dyn HistoryStore>,
    pub(super) clock: Arc<dyn Clock>,
    pub(super) config: OrchestratorConfig,
    id_source: IdSource,
    run_locks: Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Stored result of the last `ok` entry for `stage`, if it has the same fingerprint
pub(super) fn replayable<'a>(history: &'a RunHistory, stage: StageName, fp: &str) -> Option<&'a HistoryEntry> {
    history
        .latest_ok(stage)
        .filter(|e| e.fingerprint.as_deref() == Some(fp))
}

pub(super) fn decode<T: DeserializeOwned>(entry: &HistoryEntry) -> Result<T> {
    let value = entry
        .result
        .clone()
        .ok_or_else(|| WorkflowError::Storage(format!("History entry {} has no result", entry.id)))?;
    Ok(serde_json::from_value(value)?)
}

fn non_empty(text: String, what: &str) -> std::result::Result<String, ProviderError> {
    if text.trim().is_empty() {
        Err(ProviderError::Invalid(format!("{} is empty", what)))
    } else {
        Ok(text)
    }
}

impl Orchestrator {
    pub fn new(providers: Providers, history: Arc<dyn HistoryStore>) -> Self {
        Self {
            providers,
            history,
            clock: Arc::new(TokioClock),
            config: OrchestratorConfig::default(),
            id_source: Arc::new(generate_run_id),
            run_locks: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the clock retries sleep on
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Replace the generator for ids of runs started without one
    pub fn with_id_source(mut self, id_source: IdSource) -> Self {
        self.id_source = id_source;
        self
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    //=== Lookups ===

    pub fn get_run(&self, run_id: &str) -> Result<RunHistory> {
        self.history
            .get_run(run_id)?
            .ok_or_else(|| WorkflowError::RunNotFound(run_id.to_string()))
    }

    pub fn list_recent(&self, limit: usize) -> Result<Vec<RunSummary>> {
        self.history.list_recent(limit)
    }

    pub fn list_between(&self, from_ms: i64, to_ms: i64) -> Result<Vec<RunSummary>> {
        self.history.list_between(from_ms, to_ms)
    }

    //=== Shared stage machinery ===

    pub(super) fn run_lock(&self, run_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .run_locks
            .lock()
            .map_err(|e| WorkflowError::Storage(format!("lock poisoned: {}", e)))?;
        Ok(locks.entry(run_id.to_string()).or_default().clone())
    }

    /// Refuse to start new work on a cancelled run, applying a pending cancel
    /// request. A published run keeps its status; only engagement is refused.
    pub(super) fn ensure_active(&self, history: &mut RunHistory, stage: StageName) -> Result<()> {
        if history.run.status == RunStatus::Cancelled {
            return Err(WorkflowError::Cancelled(history.run.id.clone()));
        }
        if history.run.state.is_absorbing() {
            return Ok(());
        }
        let Some(request) = history.cancel_request() else {
            return Ok(());
        };
        let reason = request.result_str("reason").unwrap_or("cancelled").to_string();

        let run = &mut history.run;
        if run.state.is_published() {
            if stage == StageName::Engaging {
                info!("Run {}: engagement stopped by cancel request ({})", run.id, reason);
                self.settle_engagement(run)?;
                return Err(WorkflowError::Cancelled(run.id.clone()));
            }
            return Ok(());
        }
        info!("Run {}: applying cancel request ({})", run.id, reason);
        run.cancel(reason);
        self.history.save_run(run)?;
        Err(WorkflowError::Cancelled(run.id.clone()))
    }

    /// Close an engagement stage that will not run again
    fn settle_engagement(&self, run: &mut Run) -> Result<()> {
        if run.state == RunState::Engaging {
            run.transition(RunState::Completed);
            self.history.save_run(run)?;
        }
        Ok(())
    }

    /// State a successful publish leaves the run in
    fn published_state(run: &Run) -> RunState {
        if run.options.auto_engage {
            RunState::Engaging
        } else {
            RunState::Completed
        }
    }

    /// Move the run into the stage's state and persist the snapshot
    pub(super) fn enter(&self, run: &mut Run, stage: StageName) -> Result<()> {
        if let Some(state) = stage.state() {
            if run.state != state {
                debug!("Run {}: {} -> {}", run.id, run.state, state);
                run.transition(state);
                self.history.save_run(run)?;
            }
        }
        Ok(())
    }

    /// Retry a leaf call under `policy`, appending a `retrying` entry per failed attempt
    pub(super) async fn call_with_retry<T, F, Fut>(
        &self,
        run_id: &str,
        stage: StageName,
        target: Option<&str>,
        policy: &RetryPolicy,
        call: F,
    ) -> Result<Attempted<T>>
    where
        F: FnMut(u32) -> Fut,
        Fut: std::future::Future<Output = std::result::Result<T, ProviderError>>,
    {
        retry_with(policy, self.clock.as_ref(), call, |attempt, error, delay| {
            let mut entry = HistoryEntry::retrying(run_id, stage, attempt, error.to_string())
                .with_result(json!({ "delay_ms": delay.as_millis() as u64 }));
            if let Some(target) = target {
                entry = entry.with_target(target);
            }
            self.history.append(entry).map(|_| ())
        })
        .await
    }

    /// Record a stage failure and move the run to Failed
    pub(super) fn fail_stage(
        &self,
        run: &mut Run,
        stage: StageName,
        error: ProviderError,
        attempts: u32,
    ) -> Result<WorkflowError> {
        let detail = error.to_string();
        self.history
            .append(HistoryEntry::error(&run.id, stage, attempts, detail.clone()))?;
        run.fail(format!("{}: {}", stage, detail));
        self.history.save_run(run)?;
        warn!(
            "Run {} failed at {} after {} attempt(s): {}",
            run.id, stage, attempts, detail
        );

        Ok(if error.is_retryable() {
            WorkflowError::TransientProvider {
                run_id: run.id.clone(),
                stage,
                attempts,
                detail,
            }
        } else {
            WorkflowError::PermanentProvider {
                run_id: run.id.clone(),
                stage,
                detail,
            }
        })
    }

    /// Append the `ok` entry that closes a stage call
    fn complete(
        &self,
        run_id: &str,
        stage: StageName,
        attempts: u32,
        fp: &str,
        result: serde_json::Value,
    ) -> Result<HistoryEntry> {
        self.history.append(
            HistoryEntry::ok(run_id, stage)
                .with_attempt(attempts)
                .with_fingerprint(fp)
                .with_result(result),
        )
    }

    //=== Run lifecycle ===

    /// Create a run, or return the existing one for a client-supplied id
    /// unchanged. Generated ids never resolve to an existing run.
    pub async fn start_run(&self, run_id: Option<String>, options: RunOptions) -> Result<Run> {
        let Some(run_id) = run_id else {
            return self.start_generated_run(options).await;
        };
        if !is_valid_run_id(&run_id) {
            return Err(WorkflowError::InvalidRequest(format!("Invalid run id: {:?}", run_id)));
        }

        let lock = self.run_lock(&run_id)?;
        let _guard = lock.lock().await;

        let run = Run::new(run_id.clone(), options);
        if self.create(&run)? {
            return Ok(run);
        }

        let existing = self.get_run(&run_id)?.run;
        if existing.options != run.options {
            warn!("Run {} already exists; ignoring new options", run_id);
        }
        debug!("Run {} already exists in state {}", run_id, existing.state);
        Ok(existing)
    }

    async fn start_generated_run(&self, options: RunOptions) -> Result<Run> {
        for _ in 0..GENERATED_ID_ATTEMPTS {
            let run_id = (self.id_source)();
            let lock = self.run_lock(&run_id)?;
            let _guard = lock.lock().await;

            let run = Run::new(run_id.clone(), options.clone());
            if self.create(&run)? {
                return Ok(run);
            }
            warn!("Generated run id {} is taken; drawing another", run_id);
        }
        Err(WorkflowError::Storage(format!(
            "No free run id after {} attempts",
            GENERATED_ID_ATTEMPTS
        )))
    }

    /// Insert the run and its `created` entry; false when the id exists
    fn create(&self, run: &Run) -> Result<bool> {
        if !self.history.create_run(run)? {
            return Ok(false);
        }
        self.history.append(
            HistoryEntry::ok(&run.id, StageName::Created).with_result(json!({ "options": run.options })),
        )?;
        info!("Run {} created", run.id);
        Ok(true)
    }

    /// Record a cancel request. Takes effect immediately when no stage is
    /// executing, otherwise before the next stage begins. A published run
    /// keeps its status; the request only stops further engagement.
    pub async fn cancel(&self, run_id: &str, reason: &str) -> Result<Run> {
        let history = self.get_run(run_id)?;
        if matches!(history.run.status, RunStatus::Failed | RunStatus::Cancelled) {
            info!("Run {} is already {}; cancel ignored", run_id, history.run.status);
            return Ok(history.run);
        }

        self.history.append(
            HistoryEntry::ok(run_id, StageName::Cancellation).with_result(json!({ "reason": reason })),
        )?;

        let lock = self.run_lock(run_id)?;
        match lock.try_lock() {
            Ok(_guard) => {
                let mut run = self.get_run(run_id)?.run;
                if run.state.is_published() {
                    self.settle_engagement(&mut run)?;
                    info!("Run {} is published; no further engagement: {}", run_id, reason);
                    return Ok(run);
                }
                run.cancel(reason);
                self.history.save_run(&run)?;
                info!("Run {} cancelled: {}", run_id, reason);
                Ok(run)
            }
            Err(_) => {
                info!("Run {} is mid-stage; cancel takes effect before the next stage", run_id);
                Ok(self.get_run(run_id)?.run)
            }
        }
    }

    //=== Stages ===

    pub async fn read_source(&self, run_id: &str, descriptor: &SourceDescriptor) -> Result<String> {
        let stage = StageName::ReadingSource;
        let lock = self.run_lock(run_id)?;
        let _guard = lock.lock().await;

        let mut history = self.get_run(run_id)?;
        let fp = fingerprint(stage, descriptor)?;
        if let Some(entry) = replayable(&history, stage, &fp) {
            debug!("Run {}: replaying {}", run_id, stage);
            if let Some(text) = entry.result_str("text") {
                return Ok(text.to_string());
            }
        }
        self.ensure_active(&mut history, stage)?;
        transitions::check(&history, stage, false)?;

        let mut run = history.run;
        self.enter(&mut run, stage)?;
        info!("Run {}: reading {}", run_id, descriptor.describe());

        let sources = &self.providers.sources;
        let outcome = self
            .call_with_retry(run_id, stage, None, &self.config.policies.source, move |_| async move {
                let text = sources.read(run_id, descriptor).await?;
                non_empty(text, "Source text")
            })
            .await?;

        match outcome {
            Attempted::Success { value: text, attempts } => {
                run.source_kind = Some(descriptor.kind());
                run.source_text = Some(text.clone());
                run.touch();
                self.history.save_run(&run)?;
                self.complete(
                    run_id,
                    stage,
                    attempts,
                    &fp,
                    json!({ "kind": descriptor.kind(), "text": text }),
                )?;
                Ok(text)
            }
            Attempted::Failed { error, attempts } => Err(self.fail_stage(&mut run, stage, error, attempts)?),
        }
    }

    pub async fn generate_content(&self, run_id: &str, request: &GenerateRequest) -> Result<GeneratedContent> {
        let stage = StageName::GeneratingContent;
        let lock = self.run_lock(run_id)?;
        let _guard = lock.lock().await;

        let mut history = self.get_run(run_id)?;
        let fp = fingerprint(stage, &json!({ "kind": request.kind, "hints": request.hints }))?;
        if !request.regenerate {
            if let Some(entry) = replayable(&history, stage, &fp) {
                debug!("Run {}: replaying {}", run_id, stage);
                return decode(entry);
            }
        }
        self.ensure_active(&mut history, stage)?;
        transitions::check(&history, stage, request.regenerate)?;

        let mut run = history.run;
        let source_text = run
            .source_text
            .clone()
            .ok_or_else(|| WorkflowError::InvalidRequest(format!("Run {} has no source text", run_id)))?;
        self.enter(&mut run, stage)?;

        let generation = GenerationRequest {
            run_id: run_id.to_string(),
            source_text,
            kind: request.kind,
            hints: request.hints.clone(),
        };
        let generator = &self.providers.generator;
        let generation = &generation;
        let outcome = self
            .call_with_retry(run_id, stage, None, &self.config.policies.content, move |_| async move {
                let generated = generator.generate(generation).await?;
                if generated.text.trim().is_empty() {
                    return Err(ProviderError::GenerationRejected("Generator returned no text".to_string()));
                }
                Ok(generated)
            })
            .await?;

        match outcome {
            Attempted::Success {
                value: generated,
                attempts,
            } => {
                let content = GeneratedContent::new(run_id, run.next_revision(), request.kind, generated);
                run.contents.push(content.clone());
                run.touch();
                self.history.save_run(&run)?;
                self.complete(run_id, stage, attempts, &fp, serde_json::to_value(&content)?)?;
                info!(
                    "Run {}: generated {} revision {} ({} chars)",
                    run_id,
                    content.kind,
                    content.revision,
                    content.text.chars().count()
                );
                Ok(content)
            }
            Attempted::Failed { error, attempts } => Err(self.fail_stage(&mut run, stage, error, attempts)?),
        }
    }

    /// Produce an image for the current content. Returns None when the run
    /// did not ask for an image, or when the text-only fallback applied.
    pub async fn generate_image(&self, run_id: &str) -> Result<Option<GeneratedContent>> {
        let stage = StageName::GeneratingImage;
        let lock = self.run_lock(run_id)?;
        let _guard = lock.lock().await;

        let mut history = self.get_run(run_id)?;
        if !history.run.options.generate_image {
            transitions::check_skip(&history, stage)?;
            debug!("Run {}: image generation not requested", run_id);
            return Ok(None);
        }

        // The content the image is generated for: the latest revision without one
        let base = history
            .run
            .contents
            .iter()
            .rev()
            .find(|c| c.image.is_none())
            .cloned();
        let Some(base) = base else {
            self.ensure_active(&mut history, stage)?;
            transitions::check(&history, stage, false)?;
            return Err(WorkflowError::InvalidRequest(format!(
                "Run {} has no content to illustrate",
                run_id
            )));
        };

        let prompt = base.image_prompt_or_text().to_string();
        let fp = fingerprint(stage, &json!({ "revision": base.revision, "prompt": prompt }))?;
        if let Some(entry) = replayable(&history, stage, &fp) {
            debug!("Run {}: replaying {}", run_id, stage);
            if entry.result.as_ref().is_some_and(|r| r.get("text_only").is_some()) {
                return Ok(None);
            }
            return decode(entry).map(Some);
        }
        self.ensure_active(&mut history, stage)?;
        transitions::check(&history, stage, false)?;

        let mut run = history.run;
        self.enter(&mut run, stage)?;

        let outcome = match &self.providers.images {
            Some(images) => {
                let prompt = prompt.as_str();
                self.call_with_retry(run_id, stage, None, &self.config.policies.image, move |_| async move {
                    images.generate(run_id, prompt).await
                })
                .await?
            }
            None => Attempted::Failed {
                error: ProviderError::MissingCredentials("No image generator configured".to_string()),
                attempts: 0,
            },
        };

        match outcome {
            Attempted::Success { value: image, attempts } => {
                let content = base.with_image(run.next_revision(), image);
                run.contents.push(content.clone());
                run.touch();
                self.history.save_run(&run)?;
                self.complete(run_id, stage, attempts, &fp, serde_json::to_value(&content)?)?;
                info!("Run {}: image ready at {}", run_id, content.image.as_ref().map_or("", |i| i.url.as_str()));
                Ok(Some(content))
            }
            Attempted::Failed { error, attempts } if self.config.publish_without_image => {
                let detail = error.to_string();
                warn!("Run {}: image failed ({}), continuing text-only", run_id, detail);
                self.history
                    .append(HistoryEntry::error(run_id, stage, attempts, detail.clone()))?;
                run.touch();
                self.history.save_run(&run)?;
                self.complete(
                    run_id,
                    stage,
                    attempts,
                    &fp,
                    json!({ "text_only": true, "reason": detail }),
                )?;
                Ok(None)
            }
            Attempted::Failed { error, attempts } => Err(self.fail_stage(&mut run, stage, error, attempts)?),
        }
    }

    /// Create the run's draft. Keyed by run id: at most one draft per run.
    pub async fn create_draft(&self, run_id: &str) -> Result<DraftId> {
        let stage = StageName::Drafting;
        let lock = self.run_lock(run_id)?;
        let _guard = lock.lock().await;

        let mut history = self.get_run(run_id)?;
        let fp = fingerprint(stage, &json!({ "run_id": run_id }))?;
        if let Some(id) = replayable(&history, stage, &fp).and_then(|e| e.result_str("draft_id")) {
            debug!("Run {}: draft {} already exists", run_id, id);
            return Ok(id.to_string());
        }
        self.ensure_active(&mut history, stage)?;
        transitions::check(&history, stage, false)?;

        let mut run = history.run;
        self.enter(&mut run, stage)?;

        // Persisted on an earlier attempt that never recorded its entry
        if let Some(existing) = run.draft_id.clone() {
            self.complete(run_id, stage, 0, &fp, json!({ "draft_id": existing, "duplicate": true }))?;
            return Ok(existing);
        }

        let content = run
            .current_content()
            .cloned()
            .ok_or_else(|| WorkflowError::InvalidRequest(format!("Run {} has no content to draft", run_id)))?;
        let gateway = &self.providers.gateway;
        let content = &content;
        let outcome = self
            .call_with_retry(run_id, stage, None, &self.config.policies.draft, move |_| async move {
                gateway.create_draft(run_id, content).await
            })
            .await?;

        match outcome {
            Attempted::Success { value, attempts } => {
                let duplicate = value.is_duplicate();
                let draft_id = value.into_inner();
                if duplicate {
                    info!("Run {}: gateway already had draft {}", run_id, draft_id);
                }
                run.draft_id = Some(draft_id.clone());
                run.touch();
                self.history.save_run(&run)?;
                self.complete(
                    run_id,
                    stage,
                    attempts,
                    &fp,
                    json!({ "draft_id": draft_id, "duplicate": duplicate }),
                )?;
                Ok(draft_id)
            }
            Attempted::Failed { error, attempts } => Err(self.fail_stage(&mut run, stage, error, attempts)?),
        }
    }

    /// Publish the run's draft. Keyed by run id: at most one post per run.
    pub async fn publish(&self, run_id: &str) -> Result<PostId> {
        let stage = StageName::Publishing;
        let lock = self.run_lock(run_id)?;
        let _guard = lock.lock().await;

        let mut history = self.get_run(run_id)?;
        let fp = fingerprint(stage, &json!({ "run_id": run_id }))?;
        if let Some(id) = replayable(&history, stage, &fp).and_then(|e| e.result_str("post_id")) {
            debug!("Run {}: post {} already published", run_id, id);
            return Ok(id.to_string());
        }
        self.ensure_active(&mut history, stage)?;
        transitions::check(&history, stage, false)?;

        let mut run = history.run;
        self.enter(&mut run, stage)?;

        if let Some(existing) = run.post_id.clone() {
            run.transition(Self::published_state(&run));
            self.history.save_run(&run)?;
            self.complete(run_id, stage, 0, &fp, json!({ "post_id": existing, "duplicate": true }))?;
            return Ok(existing);
        }

        let draft_id = run
            .draft_id
            .clone()
            .ok_or_else(|| WorkflowError::InvalidRequest(format!("Run {} has no draft", run_id)))?;
        let gateway = &self.providers.gateway;
        let draft = draft_id.as_str();
        let outcome = self
            .call_with_retry(run_id, stage, None, &self.config.policies.publish, move |_| async move {
                gateway.publish(run_id, draft).await
            })
            .await?;

        match outcome {
            Attempted::Success { value, attempts } => {
                let duplicate = value.is_duplicate();
                let post_id = value.into_inner();
                if duplicate {
                    info!("Run {}: draft {} was already published as {}", run_id, draft_id, post_id);
                }
                run.post_id = Some(post_id.clone());
                run.transition(Self::published_state(&run));
                self.history.save_run(&run)?;
                self.complete(
                    run_id,
                    stage,
                    attempts,
                    &fp,
                    json!({ "post_id": post_id, "draft_id": draft_id, "duplicate": duplicate }),
                )?;
                info!("Run {}: published post {}", run_id, post_id);
                Ok(post_id)
            }
            Attempted::Failed { error, attempts } => Err(self.fail_stage(&mut run, stage, error, attempts)?),
        }
    }

    //=== Pipeline ===

    /// Run every stage in order. Stage failures and cancellation end the
    /// pipeline early and are reported through the returned history.
    pub async fn run_pipeline(&self, request: &PipelineRequest) -> Result<RunHistory> {
        let run = self.start_run(request.run_id.clone(), request.options.clone()).await?;
        let run_id = run.id;

        match self.drive(&run_id, request).await {
            Ok(()) => {}
            Err(e) if e.is_stage_failure() || matches!(e, WorkflowError::Cancelled(_)) => {
                info!("Run {} stopped: {}", run_id, e);
            }
            Err(e) => return Err(e),
        }
        self.get_run(&run_id)
    }

    async fn drive(&self, run_id: &str, request: &PipelineRequest) -> Result<()> {
        let run = self.get_run(run_id)?.run;
        if run.state.is_absorbing() || run.status == RunStatus::Cancelled {
            debug!("Run {} is {}; nothing to drive", run_id, run.status);
            return Ok(());
        }

        self.read_source(run_id, &request.source).await?;
        self.generate_content(run_id, &GenerateRequest::post(request.hints.clone()))
            .await?;
        self.generate_image(run_id).await?;
        self.create_draft(run_id).await?;
        self.publish(run_id).await?;

        // Options fixed at creation win over the request's
        if run.options.auto_engage {
            self.engage(run_id, &request.engage).await?;
        }
        Ok(())
    }

    /// Count of retrying entries across the run
    pub fn retry_count(&self, run_id: &str) -> Result<usize> {
        Ok(self
            .get_run(run_id)?
            .entries
            .iter()
            .filter(|e| e.status == EntryStatus::Retrying)
            .count())
    }
}
