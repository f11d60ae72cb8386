//! Shared fixtures for unit tests

use std::collections::VecDeque;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use lopdf::{dictionary, Document, Object};

use crate::ocr::{TransformError, TransformRequest, Transformer};
use crate::trigger::RerunTrigger;
use crate::ui::Notifier;

/// Write a one-page PDF. `label` goes into the title so that documents with
/// different labels hash differently.
pub fn write_pdf(path: &Path, label: &str, keywords: Option<&str>) {
    let mut doc = Document::with_version("1.5");
    let pages_id = doc.new_object_id();
    let page_id = doc.add_object(dictionary! {
        "Type" => "Page",
        "Parent" => pages_id,
        "MediaBox" => vec![0.into(), 0.into(), 595.into(), 842.into()],
    });
    doc.objects.insert(
        pages_id,
        Object::Dictionary(dictionary! {
            "Type" => "Pages",
            "Kids" => vec![page_id.into()],
            "Count" => 1,
        }),
    );
    let catalog_id = doc.add_object(dictionary! {
        "Type" => "Catalog",
        "Pages" => pages_id,
    });
    doc.trailer.set("Root", catalog_id);

    let mut info = dictionary! {
        "Title" => Object::string_literal(label),
    };
    if let Some(keywords) = keywords {
        info.set("Keywords", Object::string_literal(keywords));
    }
    let info_id = doc.add_object(info);
    doc.trailer.set("Info", info_id);

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    doc.save(path).unwrap();
}

/// Copy `input` to `output` with `keywords` embedded, the way the OCR engine
/// stamps its output.
pub fn stamp_keywords(input: &Path, output: &Path, keywords: &str) {
    let mut doc = Document::load(input).unwrap();
    let info_id = doc.add_object(dictionary! {
        "Keywords" => Object::string_literal(keywords),
    });
    doc.trailer.set("Info", info_id);
    doc.save(output).unwrap();
}

/// Notifier that keeps every message
#[derive(Default)]
pub struct RecordingNotifier {
    messages: Mutex<Vec<(String, bool)>>,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<(String, bool)> {
        self.messages.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.messages().iter().any(|(m, _)| m.contains(needle))
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, message: &str, urgent: bool) {
        self.messages
            .lock()
            .unwrap()
            .push((message.to_string(), urgent));
    }
}

/// Trigger that counts re-run requests
#[derive(Default)]
pub struct RecordingTrigger {
    requests: AtomicUsize,
}

impl RecordingTrigger {
    pub fn requests(&self) -> usize {
        self.requests.load(Ordering::SeqCst)
    }
}

impl RerunTrigger for RecordingTrigger {
    fn request_rerun(&self) {
        self.requests.fetch_add(1, Ordering::SeqCst);
    }
}

/// Transformer that replays queued results (`Ok(0)` once the queue is empty)
/// and records every request, plus how many staging artifacts sat next to
/// the input at the time. Success writes the input plus embedded keywords to
/// the output; any other result leaves a partial output behind.
#[derive(Default)]
pub struct ScriptedTransformer {
    results: Mutex<VecDeque<Result<i32, TransformError>>>,
    calls: Mutex<Vec<TransformRequest>>,
    artifacts: Mutex<Vec<usize>>,
}

impl ScriptedTransformer {
    pub fn new(results: impl IntoIterator<Item = Result<i32, TransformError>>) -> Self {
        Self {
            results: Mutex::new(results.into_iter().collect()),
            calls: Mutex::default(),
            artifacts: Mutex::default(),
        }
    }

    pub fn calls(&self) -> Vec<TransformRequest> {
        self.calls.lock().unwrap().clone()
    }

    /// Staging artifacts in the input directory, per call
    pub fn artifacts_seen(&self) -> Vec<usize> {
        self.artifacts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transformer for ScriptedTransformer {
    fn name(&self) -> &'static str {
        "scripted"
    }

    async fn transform(&self, request: &TransformRequest) -> Result<i32, TransformError> {
        self.calls.lock().unwrap().push(request.clone());
        let staged = request
            .input
            .parent()
            .and_then(|dir| std::fs::read_dir(dir).ok())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .filter(|e| e.file_name().to_string_lossy().ends_with(".pdf.tmp"))
                    .count()
            })
            .unwrap_or(0);
        self.artifacts.lock().unwrap().push(staged);
        let result = self.results.lock().unwrap().pop_front().unwrap_or(Ok(0));

        match result {
            Ok(0) => stamp_keywords(&request.input, &request.output, &request.identity.keywords()),
            _ => std::fs::write(&request.output, b"partial").unwrap(),
        }
        result
    }
}
