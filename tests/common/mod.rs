//! Shared fixtures: an orchestrator wired to scriptable stubs.

#![allow(dead_code)]

use std::sync::Arc;

use linkflow::domain::{Comment, Liker, RunOptions, SourceDescriptor};
use linkflow::history::{HistoryStore, MemoryHistoryStore};
use linkflow::orchestrator::RecordingClock;
use linkflow::providers::{MockGateway, StubContentGenerator, StubImageGenerator, StubSource};
use linkflow::{Orchestrator, OrchestratorConfig, PipelineRequest, Providers};

pub struct Harness {
    pub source: Arc<StubSource>,
    pub generator: Arc<StubContentGenerator>,
    pub images: Arc<StubImageGenerator>,
    pub gateway: Arc<MockGateway>,
    pub clock: Arc<RecordingClock>,
    pub orchestrator: Orchestrator,
}

impl Harness {
    pub fn new() -> Self {
        Self::with(MockGateway::new(), OrchestratorConfig::default())
    }

    pub fn with_gateway(gateway: MockGateway) -> Self {
        Self::with(gateway, OrchestratorConfig::default())
    }

    pub fn with(gateway: MockGateway, config: OrchestratorConfig) -> Self {
        Self::with_store(gateway, config, Arc::new(MemoryHistoryStore::new()))
    }

    pub fn with_store(gateway: MockGateway, config: OrchestratorConfig, history: Arc<dyn HistoryStore>) -> Self {
        let source = Arc::new(StubSource::echo());
        let generator = Arc::new(StubContentGenerator::new());
        let images = Arc::new(StubImageGenerator::new());
        let gateway = Arc::new(gateway);
        let clock = Arc::new(RecordingClock::new());

        let providers = Providers {
            sources: source.clone(),
            generator: generator.clone(),
            images: Some(images.clone()),
            gateway: gateway.clone(),
        };
        let orchestrator = Orchestrator::new(providers, history)
            .with_config(config)
            .with_clock(clock.clone());

        Self {
            source,
            generator,
            images,
            gateway,
            clock,
            orchestrator,
        }
    }

    /// Leaf calls made so far across every stub
    pub fn leaf_calls(&self) -> (u32, u32, u32, u32) {
        (
            self.source.calls(),
            self.generator.calls(),
            self.images.calls(),
            self.gateway.total_calls(),
        )
    }
}

pub fn text(text: &str) -> SourceDescriptor {
    SourceDescriptor::PlainText { text: text.to_string() }
}

pub fn request(run_id: &str, source: &str, generate_image: bool, auto_engage: bool) -> PipelineRequest {
    PipelineRequest::new(text(source))
        .with_run_id(run_id)
        .with_options(RunOptions {
            generate_image,
            auto_engage,
        })
}

pub fn comments(n: usize) -> Vec<Comment> {
    (1..=n)
        .map(|i| Comment {
            id: format!("c{}", i),
            author: format!("Author {}", i),
            text: format!("Great post number {}", i),
        })
        .collect()
}

pub fn likers(n: usize) -> Vec<Liker> {
    (1..=n)
        .map(|i| Liker {
            id: format!("l{}", i),
            name: format!("Liker {}", i),
            profile_url: None,
        })
        .collect()
}
