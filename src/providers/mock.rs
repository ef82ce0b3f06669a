//! Scriptable in-process providers.
//!
//! Used by the test suites and by `linkflow run --dry-run`. Failures are
//! queued per operation and consumed one per call; counters record how often
//! each leaf was invoked.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;

use super::{
    ContentGenerator, EngagementGateway, GatewayOutcome, GenerationRequest, ImageGenerator, ProviderError,
    SourceAdapter,
};
use crate::domain::{
    Comment, ContentKind, DraftId, GeneratedContent, GeneratedText, ImageRef, Liker, PostId, SourceDescriptor,
    preview,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Queue of scripted failures plus an optional failure returned on every call
#[derive(Debug, Default)]
struct FailureScript {
    queue: VecDeque<ProviderError>,
    always: Option<ProviderError>,
}

impl FailureScript {
    fn next(&mut self) -> Option<ProviderError> {
        self.queue.pop_front().or_else(|| self.always.clone())
    }
}

/// Source stub: echoes inline text, or returns a fixed body for any descriptor
#[derive(Debug, Default)]
pub struct StubSource {
    text: Option<String>,
    script: Mutex<FailureScript>,
    stalls: Mutex<VecDeque<Duration>>,
    calls: AtomicU32,
}

impl StubSource {
    /// Echo plain-text descriptors; other kinds are not found
    pub fn echo() -> Self {
        Self::default()
    }

    /// Return `text` for every descriptor
    pub fn with_text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }

    pub fn fail_next(&self, err: ProviderError) {
        lock(&self.script).queue.push_back(err);
    }

    pub fn fail_next_n(&self, n: usize, err: ProviderError) {
        let mut script = lock(&self.script);
        for _ in 0..n {
            script.queue.push_back(err.clone());
        }
    }

    pub fn fail_always(&self, err: ProviderError) {
        lock(&self.script).always = Some(err);
    }

    /// Stall the next call for `delay` before answering
    pub fn stall_next(&self, delay: Duration) {
        lock(&self.stalls).push_back(delay);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for StubSource {
    async fn read(&self, _run_id: &str, descriptor: &SourceDescriptor) -> Result<String, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let stall = lock(&self.stalls).pop_front();
        if let Some(delay) = stall {
            tokio::time::sleep(delay).await;
        }
        if let Some(err) = lock(&self.script).next() {
            return Err(err);
        }
        match (&self.text, descriptor) {
            (Some(text), _) => Ok(text.clone()),
            (None, SourceDescriptor::PlainText { text }) => Ok(text.clone()),
            (None, other) => Err(ProviderError::SourceNotFound(other.describe())),
        }
    }
}

/// Deterministic content generator
#[derive(Debug, Default)]
pub struct StubContentGenerator {
    script: Mutex<FailureScript>,
    /// Permanent failures for inputs containing a marker
    poisoned: Mutex<Vec<(String, ProviderError)>>,
    /// Return empty text for the next call
    empty_next: Mutex<bool>,
    calls: AtomicU32,
    kind_calls: Mutex<HashMap<ContentKind, u32>>,
}

impl StubContentGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, err: ProviderError) {
        lock(&self.script).queue.push_back(err);
    }

    pub fn fail_next_n(&self, n: usize, err: ProviderError) {
        let mut script = lock(&self.script);
        for _ in 0..n {
            script.queue.push_back(err.clone());
        }
    }

    pub fn fail_always(&self, err: ProviderError) {
        lock(&self.script).always = Some(err);
    }

    /// Fail every request whose input text contains `marker`
    pub fn fail_when_contains(&self, marker: impl Into<String>, err: ProviderError) {
        lock(&self.poisoned).push((marker.into(), err));
    }

    pub fn return_empty_next(&self) {
        *lock(&self.empty_next) = true;
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, kind: ContentKind) -> u32 {
        lock(&self.kind_calls).get(&kind).copied().unwrap_or(0)
    }
}

#[async_trait]
impl ContentGenerator for StubContentGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<GeneratedText, ProviderError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *lock(&self.kind_calls).entry(request.kind).or_insert(0) += 1;

        if let Some(err) = lock(&self.script).next() {
            return Err(err);
        }
        let poisoned = lock(&self.poisoned)
            .iter()
            .find(|(marker, _)| request.source_text.contains(marker.as_str()))
            .map(|(_, err)| err.clone());
        if let Some(err) = poisoned {
            return Err(err);
        }
        if std::mem::take(&mut *lock(&self.empty_next)) {
            return Ok(GeneratedText::plain(""));
        }

        let generated = match request.kind {
            ContentKind::Post => GeneratedText {
                text: format!("Post #{}: {}", n, request.source_text),
                hashtags: vec!["Launch".to_string(), "Leadership".to_string()],
                image_prompt: Some(format!("Illustration of {}", preview(&request.source_text, 40))),
            },
            ContentKind::Comment => GeneratedText::plain(format!("Thanks for sharing: {}", request.source_text)),
            ContentKind::Message => GeneratedText::plain(format!(
                "Thanks for the like! ({})",
                request.source_text
            )),
        };
        Ok(generated)
    }
}

/// Image generator returning predictable URLs
#[derive(Debug, Default)]
pub struct StubImageGenerator {
    script: Mutex<FailureScript>,
    calls: AtomicU32,
    prompts: Mutex<Vec<String>>,
}

impl StubImageGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next(&self, err: ProviderError) {
        lock(&self.script).queue.push_back(err);
    }

    pub fn fail_always(&self, err: ProviderError) {
        lock(&self.script).always = Some(err);
    }

    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn prompts(&self) -> Vec<String> {
        lock(&self.prompts).clone()
    }
}

#[async_trait]
impl ImageGenerator for StubImageGenerator {
    async fn generate(&self, run_id: &str, prompt: &str) -> Result<ImageRef, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        lock(&self.prompts).push(prompt.to_string());
        if let Some(err) = lock(&self.script).next() {
            return Err(err);
        }
        Ok(ImageRef::remote(format!("https://images.test/{}.png", run_id)))
    }
}

/// Gateway operations that can be scripted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayOp {
    CreateDraft,
    Publish,
    ListComments,
    Reply,
    ListLikers,
    Message,
}

#[derive(Debug, Default)]
struct GatewayState {
    /// run id -> draft id
    drafts: HashMap<String, DraftId>,
    /// draft id -> post id
    posts: HashMap<DraftId, PostId>,
    /// idempotency key -> text sent
    replies: HashMap<String, String>,
    messages: HashMap<String, String>,
    comments: Vec<Comment>,
    likers: Vec<Liker>,
    failures: HashMap<GatewayOp, VecDeque<ProviderError>>,
    /// Operations whose next call performs the action but loses the response
    lost_responses: HashSet<GatewayOp>,
    /// comment or liker id -> error returned on every attempt
    target_failures: HashMap<String, ProviderError>,
    calls: HashMap<GatewayOp, u32>,
    next_id: u32,
}

impl GatewayState {
    fn next_id(&mut self, prefix: &str) -> String {
        self.next_id += 1;
        format!("{}-{}", prefix, self.next_id)
    }

    /// Count the call and pop a scripted failure
    fn enter(&mut self, op: GatewayOp) -> Result<(), ProviderError> {
        *self.calls.entry(op).or_insert(0) += 1;
        match self.failures.get_mut(&op).and_then(|q| q.pop_front()) {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// After performing: report a lost response once if scripted
    fn exit<T>(&mut self, op: GatewayOp, outcome: GatewayOutcome<T>) -> Result<GatewayOutcome<T>, ProviderError> {
        if self.lost_responses.remove(&op) {
            return Err(ProviderError::Timeout(Duration::ZERO));
        }
        Ok(outcome)
    }
}

/// In-memory LinkedIn stand-in with remote-side idempotency
#[derive(Debug, Default)]
pub struct MockGateway {
    state: Mutex<GatewayState>,
    unit_delay: Duration,
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_comments(self, comments: Vec<Comment>) -> Self {
        lock(&self.state).comments = comments;
        self
    }

    pub fn with_likers(self, likers: Vec<Liker>) -> Self {
        lock(&self.state).likers = likers;
        self
    }

    /// Sleep inside each reply/message call, to observe concurrency
    pub fn with_unit_delay(mut self, delay: Duration) -> Self {
        self.unit_delay = delay;
        self
    }

    pub fn fail_next(&self, op: GatewayOp, err: ProviderError) {
        self.fail_next_n(op, 1, err);
    }

    pub fn fail_next_n(&self, op: GatewayOp, n: usize, err: ProviderError) {
        let mut state = lock(&self.state);
        let queue = state.failures.entry(op).or_default();
        for _ in 0..n {
            queue.push_back(err.clone());
        }
    }

    /// Perform the next `op` remotely but fail the response
    pub fn lose_next_response(&self, op: GatewayOp) {
        lock(&self.state).lost_responses.insert(op);
    }

    /// Every reply to this comment id / message to this liker id fails
    pub fn fail_target(&self, id: impl Into<String>, err: ProviderError) {
        lock(&self.state).target_failures.insert(id.into(), err);
    }

    pub fn calls(&self, op: GatewayOp) -> u32 {
        lock(&self.state).calls.get(&op).copied().unwrap_or(0)
    }

    /// Total leaf calls across all operations
    pub fn total_calls(&self) -> u32 {
        lock(&self.state).calls.values().sum()
    }

    pub fn drafts_created(&self) -> usize {
        lock(&self.state).drafts.len()
    }

    pub fn posts_published(&self) -> usize {
        lock(&self.state).posts.len()
    }

    pub fn replies_sent(&self) -> usize {
        lock(&self.state).replies.len()
    }

    pub fn messages_sent(&self) -> usize {
        lock(&self.state).messages.len()
    }

    pub fn reply_text(&self, run_id: &str, comment_id: &str) -> Option<String> {
        lock(&self.state)
            .replies
            .get(&format!("{}:comment:{}", run_id, comment_id))
            .cloned()
    }

    /// Highest number of reply/message calls observed in flight at once
    pub fn peak_concurrency(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }

    async fn unit_call(
        &self,
        op: GatewayOp,
        target_id: &str,
        key: String,
        text: &str,
    ) -> Result<GatewayOutcome<()>, ProviderError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        if !self.unit_delay.is_zero() {
            tokio::time::sleep(self.unit_delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let mut state = lock(&self.state);
        state.enter(op)?;
        if let Some(err) = state.target_failures.get(target_id) {
            return Err(err.clone());
        }
        let sent = match op {
            GatewayOp::Reply => &mut state.replies,
            _ => &mut state.messages,
        };
        if sent.contains_key(&key) {
            return Ok(GatewayOutcome::AlreadyDone(()));
        }
        sent.insert(key, text.to_string());
        state.exit(op, GatewayOutcome::Performed(()))
    }
}

#[async_trait]
impl EngagementGateway for MockGateway {
    async fn create_draft(
        &self,
        run_id: &str,
        _content: &GeneratedContent,
    ) -> Result<GatewayOutcome<DraftId>, ProviderError> {
        let mut state = lock(&self.state);
        state.enter(GatewayOp::CreateDraft)?;
        if let Some(existing) = state.drafts.get(run_id) {
            return Ok(GatewayOutcome::AlreadyDone(existing.clone()));
        }
        let id = state.next_id("draft");
        state.drafts.insert(run_id.to_string(), id.clone());
        state.exit(GatewayOp::CreateDraft, GatewayOutcome::Performed(id))
    }

    async fn publish(&self, _run_id: &str, draft_id: &str) -> Result<GatewayOutcome<PostId>, ProviderError> {
        let mut state = lock(&self.state);
        state.enter(GatewayOp::Publish)?;
        if !state.drafts.values().any(|d| d == draft_id) {
            return Err(ProviderError::Invalid(format!("Unknown draft {}", draft_id)));
        }
        if let Some(existing) = state.posts.get(draft_id) {
            return Ok(GatewayOutcome::AlreadyDone(existing.clone()));
        }
        let id = state.next_id("post");
        state.posts.insert(draft_id.to_string(), id.clone());
        state.exit(GatewayOp::Publish, GatewayOutcome::Performed(id))
    }

    async fn list_comments(&self, _run_id: &str, _post_id: &str) -> Result<Vec<Comment>, ProviderError> {
        let mut state = lock(&self.state);
        state.enter(GatewayOp::ListComments)?;
        Ok(state.comments.clone())
    }

    async fn reply(
        &self,
        run_id: &str,
        _post_id: &str,
        comment_id: &str,
        text: &str,
    ) -> Result<GatewayOutcome<()>, ProviderError> {
        let key = format!("{}:comment:{}", run_id, comment_id);
        self.unit_call(GatewayOp::Reply, comment_id, key, text).await
    }

    async fn list_likers(&self, _run_id: &str, _post_id: &str) -> Result<Vec<Liker>, ProviderError> {
        let mut state = lock(&self.state);
        state.enter(GatewayOp::ListLikers)?;
        Ok(state.likers.clone())
    }

    async fn message(&self, run_id: &str, liker_id: &str, text: &str) -> Result<GatewayOutcome<()>, ProviderError> {
        let key = format!("{}:liker:{}", run_id, liker_id);
        self.unit_call(GatewayOp::Message, liker_id, key, text).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::StyleHints;

    fn post_request(text: &str) -> GenerationRequest {
        GenerationRequest {
            run_id: "run-1".to_string(),
            source_text: text.to_string(),
            kind: ContentKind::Post,
            hints: StyleHints::default(),
        }
    }

    fn content() -> GeneratedContent {
        GeneratedContent::new("run-1", 1, ContentKind::Post, GeneratedText::plain("hello"))
    }

    #[tokio::test]
    async fn test_stub_source_echo_and_failures() {
        let source = StubSource::echo();
        source.fail_next(ProviderError::SourceUnavailable("offline".into()));
        let desc = SourceDescriptor::PlainText { text: "hi".into() };

        assert!(source.read("run-1", &desc).await.is_err());
        assert_eq!(source.read("run-1", &desc).await.unwrap(), "hi");
        assert_eq!(source.calls(), 2);

        let note = SourceDescriptor::AppleNotes { note_title: "x".into() };
        let err = source.read("run-1", &note).await.unwrap_err();
        assert!(matches!(err, ProviderError::SourceNotFound(_)));
    }

    #[tokio::test]
    async fn test_stub_generator_poisoned_marker() {
        let generator = StubContentGenerator::new();
        generator.fail_when_contains("spam", ProviderError::GenerationRejected("policy".into()));

        assert!(generator.generate(&post_request("buy spam now")).await.is_err());
        let ok = generator.generate(&post_request("launch")).await.unwrap();
        assert!(ok.text.ends_with("launch"));
        assert!(ok.image_prompt.is_some());
        assert_eq!(generator.calls_for(ContentKind::Post), 2);
    }

    #[tokio::test]
    async fn test_mock_gateway_dedups_draft_and_publish() {
        let gateway = MockGateway::new();
        let draft = gateway.create_draft("run-1", &content()).await.unwrap();
        assert!(!draft.is_duplicate());
        let again = gateway.create_draft("run-1", &content()).await.unwrap();
        assert!(again.is_duplicate());
        assert_eq!(again.clone().into_inner(), draft.clone().into_inner());

        let draft_id = draft.into_inner();
        let post = gateway.publish("run-1", &draft_id).await.unwrap();
        let repeat = gateway.publish("run-1", &draft_id).await.unwrap();
        assert!(repeat.is_duplicate());
        assert_eq!(post.into_inner(), repeat.into_inner());
        assert_eq!(gateway.posts_published(), 1);
    }

    #[tokio::test]
    async fn test_mock_gateway_lost_response_still_performs() {
        let gateway = MockGateway::new();
        gateway.lose_next_response(GatewayOp::CreateDraft);
        assert!(gateway.create_draft("run-1", &content()).await.is_err());
        assert_eq!(gateway.drafts_created(), 1);
        assert!(gateway.create_draft("run-1", &content()).await.unwrap().is_duplicate());
    }

    #[tokio::test]
    async fn test_mock_gateway_target_failure() {
        let gateway = MockGateway::new();
        gateway.fail_target("c-2", ProviderError::Invalid("comment deleted".into()));
        assert!(gateway.reply("run-1", "p-1", "c-1", "thanks").await.is_ok());
        assert!(gateway.reply("run-1", "p-1", "c-2", "thanks").await.is_err());
        assert_eq!(gateway.reply_text("run-1", "c-1").as_deref(), Some("thanks"));
        assert_eq!(gateway.calls(GatewayOp::Reply), 2);
    }
}
