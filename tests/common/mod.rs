//! Stub collaborators shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use stylemorph::errors::InferenceError;
use stylemorph::models::{AnalysisResult, ImageRef, PresentationTag, RecommendedItem};
use stylemorph::services::image_synthesizer::GenerationRequest;
use stylemorph::services::{ClothingImageGenerator, ImageBackend, StyleAnalyzer};

pub const JPEG_BYTES: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10];

pub fn item(description: &str) -> RecommendedItem {
    RecommendedItem {
        category: "Top".to_string(),
        description: description.to_string(),
        rationale: "Balances the shoulders".to_string(),
        colors: None,
        material_and_pattern: None,
    }
}

pub fn analysis(descriptions: &[&str]) -> AnalysisResult {
    AnalysisResult {
        summary: "Whole body visible; athletic build.".to_string(),
        presentation: PresentationTag::NonBinary,
        items: descriptions.iter().map(|d| item(d)).collect(),
        tips: vec!["Keep the silhouette clean".to_string()],
    }
}

/// Returns queued results in order, one per call.
pub struct ScriptedAnalyzer {
    results: Mutex<VecDeque<Result<AnalysisResult, InferenceError>>>,
    pub calls: AtomicUsize,
}

impl ScriptedAnalyzer {
    pub fn new(results: Vec<Result<AnalysisResult, InferenceError>>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl StyleAnalyzer for ScriptedAnalyzer {
    async fn analyze(&self, _image_data: &[u8]) -> Result<AnalysisResult, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let next = self.results.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(InferenceError::Transport("script exhausted".to_string())))
    }
}

/// Behaviour keyed on the description: `slow` sleeps, `fail` fails, anything else succeeds.
pub struct KeywordGenerator {
    pub delay: Duration,
    pub slow_delay: Duration,
    pub calls: AtomicUsize,
    pub completed: AtomicUsize,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub starts: Mutex<Vec<Instant>>,
}

impl KeywordGenerator {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            slow_delay: Duration::from_millis(300),
            calls: AtomicUsize::new(0),
            completed: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            starts: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl ClothingImageGenerator for KeywordGenerator {
    async fn generate(&self, description: &str) -> Result<ImageRef, InferenceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.starts.lock().unwrap().push(Instant::now());
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = if description.contains("slow") {
            self.slow_delay
        } else {
            self.delay
        };
        tokio::time::sleep(delay).await;

        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.completed.fetch_add(1, Ordering::SeqCst);

        if description.contains("fail") {
            Err(InferenceError::GenerationExhausted {
                attempts: 3,
                last_status: Some(504),
                detail: "Gateway Timeout | Status: 504".to_string(),
            })
        } else {
            Ok(ImageRef::remote(format!(
                "https://images.example/{}",
                description.replace(' ', "-")
            )))
        }
    }
}

/// Image backend that always times out for prompts starting with `bad`.
pub struct PromptBackend {
    pub calls: Mutex<Vec<String>>,
}

impl PromptBackend {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls_matching(&self, prefix: &str) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|p| p.starts_with(prefix))
            .count()
    }
}

#[async_trait]
impl ImageBackend for PromptBackend {
    async fn render(&self, request: &GenerationRequest) -> Result<Bytes, InferenceError> {
        self.calls.lock().unwrap().push(request.prompt.clone());
        if request.prompt.starts_with("bad") {
            Err(InferenceError::Timeout {
                status: Some(504),
                message: "Gateway Timeout".to_string(),
            })
        } else {
            Ok(Bytes::from_static(JPEG_BYTES))
        }
    }
}
