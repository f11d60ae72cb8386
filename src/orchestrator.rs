//! Run orchestrator
//!
//! One invocation: recovery sweep, backup mirror, decrypt pass, then every
//! document in turn through identity resolution, ledger lookup and the staged
//! transform. Documents are processed strictly one at a time.

use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{Local, NaiveDate};
use tracing::Instrument;

use crate::backup::{BackupIndex, BackupMirror, BackupReport};
use crate::config::Config;
use crate::error::{PipelineError, Result};
use crate::identity::{self, Identity};
use crate::ledger::{Ledger, LedgerEntry};
use crate::library::{DocumentEntry, LibraryScanner};
use crate::ocr::{Decryptor, Disposition, FailureKind, TransformRequest, Transformer};
use crate::recovery::{self, SweepReport};
use crate::settings::RuntimeSettings;
use crate::staging::StagedDocument;
use crate::trigger::{status_line, RerunTrigger};
use crate::ui::Notifier;

/// Stops the per-document loop at the next document boundary
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// What happened to the ledger after a successful transform
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LedgerWrite {
    /// First success for this identity
    Appended,
    /// Problematic record refreshed in place
    Updated,
    /// Forced rescan of a known document
    Unchanged,
}

/// Result of one document
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DocumentOutcome {
    /// Already processed
    Skipped { processed_on: Option<NaiveDate> },
    Transformed { ledger: LedgerWrite },
    /// The engine ran but exited non-zero
    SoftFailure { code: i32 },
    Failed(Disposition),
    /// Filesystem or ledger error around the transform
    Errored(String),
}

impl DocumentOutcome {
    /// The transform was attempted
    fn attempted(&self) -> bool {
        !matches!(self, Self::Skipped { .. } | Self::Errored(_))
    }

    fn stops_run(&self) -> Option<FailureKind> {
        match self {
            Self::Failed(disposition) if disposition.is_fatal() => Some(disposition.kind()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentReport {
    pub path: PathBuf,
    pub outcome: DocumentOutcome,
}

/// Summary of one invocation
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    /// 1-based invocation counter
    pub run: u64,
    /// First invocation skipped because `run_on_startup` is off
    pub deferred: bool,
    pub sweep: SweepReport,
    pub backup: BackupReport,
    pub decrypted: usize,
    pub documents: Vec<DocumentReport>,
    /// Failure kind that stopped the loop early
    pub stopped: Option<FailureKind>,
    pub cancelled: bool,
}

impl RunReport {
    fn count(&self, pred: impl Fn(&DocumentOutcome) -> bool) -> usize {
        self.documents.iter().filter(|d| pred(&d.outcome)).count()
    }

    pub fn transformed(&self) -> usize {
        self.count(|o| matches!(o, DocumentOutcome::Transformed { .. }))
    }

    pub fn skipped(&self) -> usize {
        self.count(|o| matches!(o, DocumentOutcome::Skipped { .. }))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| {
            matches!(
                o,
                DocumentOutcome::SoftFailure { .. }
                    | DocumentOutcome::Failed(_)
                    | DocumentOutcome::Errored(_)
            )
        })
    }

    pub fn outcome(&self, name: &str) -> Option<&DocumentOutcome> {
        self.documents
            .iter()
            .find(|d| d.path.file_name().is_some_and(|n| n == name))
            .map(|d| &d.outcome)
    }
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.deferred {
            return write!(f, "Run {}: deferred until the next scheduled run", self.run);
        }
        write!(
            f,
            "Run {}: {} transformed, {} skipped, {} failed; swept {} removed / {} restored; backed up {}",
            self.run,
            self.transformed(),
            self.skipped(),
            self.failed(),
            self.sweep.removed,
            self.sweep.restored,
            self.backup.copied
        )?;
        if let Some(kind) = self.stopped {
            write!(f, "; stopped on {}", kind)?;
        }
        if self.cancelled {
            write!(f, "; cancelled")?;
        }
        Ok(())
    }
}

#[derive(Debug)]
struct RunState {
    run_count: u64,
    is_first_invocation: bool,
}

/// Sequences one pipeline run at a time
pub struct RunOrchestrator {
    config: Config,
    ledger: Ledger,
    transformer: Arc<dyn Transformer>,
    decryptor: Arc<dyn Decryptor>,
    notifier: Arc<dyn Notifier>,
    trigger: Arc<dyn RerunTrigger>,
    state: RunState,
    cancel: CancelFlag,
}

impl RunOrchestrator {
    pub fn new(
        config: Config,
        transformer: Arc<dyn Transformer>,
        decryptor: Arc<dyn Decryptor>,
        notifier: Arc<dyn Notifier>,
        trigger: Arc<dyn RerunTrigger>,
    ) -> Self {
        let ledger = Ledger::new(&config.ledger.path).with_retry(config.ledger.retry_policy());
        Self {
            config,
            ledger,
            transformer,
            decryptor,
            notifier,
            trigger,
            state: RunState {
                run_count: 0,
                is_first_invocation: true,
            },
            cancel: CancelFlag::default(),
        }
    }

    pub fn ledger(&self) -> &Ledger {
        &self.ledger
    }

    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    /// Run the pipeline once
    pub async fn run(&mut self) -> Result<RunReport> {
        if let Some(next) = self.trigger.next_run() {
            self.notifier.status(&status_line(next));
        }

        let first = std::mem::replace(&mut self.state.is_first_invocation, false);
        if first && !self.config.pipeline.run_on_startup {
            tracing::info!("Startup run disabled, waiting for the schedule");
            return Ok(RunReport {
                run: self.state.run_count,
                deferred: true,
                ..RunReport::default()
            });
        }

        self.state.run_count += 1;
        let mut report = RunReport {
            run: self.state.run_count,
            ..RunReport::default()
        };
        tracing::info!("==================== Run {} ====================", report.run);

        let settings = self.load_settings();
        let pipeline = &self.config.pipeline;
        let backup_root = pipeline.backup_root();

        let mirror = match BackupMirror::new(
            &pipeline.working_dir,
            &backup_root,
            pipeline.backup_policy,
        ) {
            Ok(mirror) => mirror,
            Err(e) => {
                tracing::error!("{}", e);
                self.notifier.notify(&e.to_string(), true);
                tokio::time::sleep(pipeline.fatal_pause()).await;
                return Err(PipelineError::Config(e));
            }
        };
        let scanner = LibraryScanner::new(&pipeline.working_dir, Some(backup_root.clone()));

        report.sweep = recovery::sweep(&scanner);

        let documents = scanner.documents();
        report.backup = mirror.mirror(&documents)?;

        match self.decryptor.decrypt(&documents).await {
            Ok(0) => {}
            Ok(n) => {
                tracing::info!("Decrypted {} document(s)", n);
                report.decrypted = n;
            }
            Err(e) => {
                tracing::warn!("Decrypt pass failed: {}", e);
                self.notifier.notify(&e.to_string(), false);
            }
        }

        if documents.is_empty() {
            self.notifier.notify(
                &format!(
                    "No files to OCR in '{}'",
                    self.config.pipeline.working_dir.display()
                ),
                false,
            );
            return Ok(report);
        }

        let mut backups = BackupIndex::new(&backup_root);
        let mut attempted = 0usize;
        for document in &documents {
            if self.cancel.is_cancelled() {
                tracing::info!("Run cancelled");
                report.cancelled = true;
                break;
            }

            let span = tracing::info_span!("document", name = %document.name);
            let outcome = self
                .process(document, &settings, &mut backups)
                .instrument(span.clone())
                .await;
            span.in_scope(|| finish(document, &outcome));

            if outcome.attempted() {
                attempted += 1;
                if attempted % self.config.pipeline.clean_after == 0 {
                    report.sweep += recovery::sweep(&scanner);
                }
            }

            let stop = outcome.stops_run();
            report.documents.push(DocumentReport {
                path: document.path.clone(),
                outcome,
            });
            if let Some(kind) = stop {
                tracing::error!("Stopping run after {} failure", kind);
                report.stopped = Some(kind);
                break;
            }
        }

        report.sweep += recovery::sweep(&scanner);
        tracing::info!("{}", report);
        Ok(report)
    }

    fn load_settings(&self) -> RuntimeSettings {
        let defaults = self.config.defaults;
        RuntimeSettings::load_or(&self.config.pipeline.settings_path, defaults).unwrap_or_else(
            |e| {
                tracing::warn!("{}, using defaults", e);
                defaults
            },
        )
    }

    async fn process(
        &self,
        document: &DocumentEntry,
        settings: &RuntimeSettings,
        backups: &mut BackupIndex,
    ) -> DocumentOutcome {
        match self.try_process(document, settings, backups).await {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!("{:?}", e);
                self.notifier.notify(
                    &format!(
                        "Error processing '{}'. Please refer to the log output.",
                        document.name
                    ),
                    true,
                );
                DocumentOutcome::Errored(e.to_string())
            }
        }
    }

    async fn try_process(
        &self,
        document: &DocumentEntry,
        settings: &RuntimeSettings,
        backups: &mut BackupIndex,
    ) -> Result<DocumentOutcome> {
        let identity = identity::resolve(&document.path)?;
        let entry = self.ledger.lookup(identity.token())?;
        let processed_on = entry.as_ref().and_then(|e| e.last_processed);
        let problematic = entry.as_ref().is_some_and(|e| e.problematic);
        tracing::debug!(
            identity = %identity,
            source = ?identity.source(),
            ?processed_on,
            problematic,
            "Resolved"
        );

        if processed_on.is_some() && !problematic && !settings.force_rescan {
            return Ok(DocumentOutcome::Skipped { processed_on });
        }

        if document.size_kb() > self.config.pipeline.large_file_kb {
            self.notifier.notify(
                &format!(
                    "'{}' may take longer to process: large file size.",
                    document.name
                ),
                false,
            );
        }

        let staged = StagedDocument::stage(&document.path)?;
        let request = TransformRequest {
            input: staged.staging().to_path_buf(),
            output: document.path.clone(),
            identity: identity.clone(),
            problematic,
            sidecar: settings.output_txt,
        };
        tracing::info!("Transforming with {}", self.transformer.name());

        match self.transformer.transform(&request).await {
            Ok(0) => {
                staged.commit();
                let ledger = self
                    .record_success(&identity, entry.as_ref(), &document.name)
                    .await?;
                match backups.restore_times(&identity, &document.path) {
                    Ok(true) => tracing::debug!("Restored original timestamps"),
                    Ok(false) => {}
                    Err(e) => tracing::warn!("Could not restore timestamps: {}", e),
                }
                Ok(DocumentOutcome::Transformed { ledger })
            }
            Ok(code) => {
                staged.restore()?;
                self.notifier.notify(
                    &format!("Error processing '{}'. Exit code {}.", document.name, code),
                    true,
                );
                Ok(DocumentOutcome::SoftFailure { code })
            }
            Err(e) => {
                let disposition = e.classify();
                let kind = disposition.kind();
                let policy = kind.policy();

                if kind == FailureKind::Unclassified {
                    tracing::error!("{:?}", e);
                } else {
                    tracing::warn!("{}", e);
                }

                if policy.restore {
                    staged.restore()?;
                } else {
                    staged.abandon();
                }
                self.notifier
                    .notify(&kind.notice(&document.name, disposition.detail()), policy.urgent);
                if policy.request_rerun {
                    self.trigger.request_rerun();
                }
                if policy.pause {
                    tokio::time::sleep(self.config.pipeline.fatal_pause()).await;
                }
                Ok(DocumentOutcome::Failed(disposition))
            }
        }
    }

    async fn record_success(
        &self,
        identity: &Identity,
        entry: Option<&LedgerEntry>,
        name: &str,
    ) -> Result<LedgerWrite> {
        let record = LedgerEntry::new(identity.token(), Local::now().date_naive(), name, false);
        let notifier = self.notifier.as_ref();

        match entry {
            None => {
                self.ledger.append(&record, notifier).await?;
                Ok(LedgerWrite::Appended)
            }
            Some(existing) if existing.problematic || existing.last_processed.is_none() => {
                self.ledger.upsert(&record, notifier).await?;
                Ok(LedgerWrite::Updated)
            }
            Some(_) => Ok(LedgerWrite::Unchanged),
        }
    }
}

/// Per-document closing log line
fn finish(document: &DocumentEntry, outcome: &DocumentOutcome) {
    match outcome {
        DocumentOutcome::Skipped {
            processed_on: Some(date),
        } => tracing::info!("'{}' was processed on {}. Skipped.", document.name, date),
        DocumentOutcome::Skipped { processed_on: None } => {
            tracing::info!("'{}' skipped", document.name)
        }
        DocumentOutcome::Transformed { ledger } => {
            tracing::info!("'{}' transformed (ledger: {:?})", document.name, ledger)
        }
        DocumentOutcome::SoftFailure { code } => {
            tracing::warn!("'{}' failed with exit code {}", document.name, code)
        }
        DocumentOutcome::Failed(disposition) => tracing::warn!(
            "'{}' failed ({}): {}",
            document.name,
            disposition.kind(),
            disposition.detail()
        ),
        DocumentOutcome::Errored(e) => tracing::error!("'{}' errored: {}", document.name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backup::set_file_times;
    use crate::config::DecryptConfig;
    use crate::identity::{content_hash, IdentitySource};
    use crate::ocr::{CommandDecryptor, TransformError};
    use crate::test_support::{write_pdf, RecordingNotifier, RecordingTrigger, ScriptedTransformer};
    use std::fs;
    use std::path::Path;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    struct Harness {
        _dir: TempDir,
        working: PathBuf,
        config: Config,
        transformer: Arc<ScriptedTransformer>,
        notifier: Arc<RecordingNotifier>,
        trigger: Arc<RecordingTrigger>,
    }

    impl Harness {
        fn new(results: Vec<std::result::Result<i32, TransformError>>) -> Self {
            let dir = TempDir::new().unwrap();
            let working = dir.path().join("scans");
            fs::create_dir_all(&working).unwrap();

            let mut config = Config::default();
            config.pipeline.working_dir = working.clone();
            config.pipeline.settings_path = dir.path().join("settings.json");
            config.pipeline.fatal_pause_ms = 0;
            config.ledger.path = dir.path().join("ledger.csv");
            config.ledger.retry_interval_secs = 0;
            config.ledger.max_attempts = 3;

            Self {
                _dir: dir,
                working,
                config,
                transformer: Arc::new(ScriptedTransformer::new(results)),
                notifier: Arc::new(RecordingNotifier::default()),
                trigger: Arc::new(RecordingTrigger::default()),
            }
        }

        fn orchestrator(&self) -> RunOrchestrator {
            RunOrchestrator::new(
                self.config.clone(),
                self.transformer.clone(),
                Arc::new(CommandDecryptor::new(&DecryptConfig {
                    command: Vec::new(),
                    timeout_secs: 1,
                })),
                self.notifier.clone(),
                self.trigger.clone(),
            )
        }

        fn doc(&self, name: &str) -> PathBuf {
            self.working.join(name)
        }

        fn ledger(&self) -> Vec<LedgerEntry> {
            Ledger::new(&self.config.ledger.path).entries().unwrap()
        }

        fn set_force_rescan(&self, on: bool) {
            RuntimeSettings {
                force_rescan: on,
                ..RuntimeSettings::default()
            }
            .save(&self.config.pipeline.settings_path)
            .unwrap();
        }
    }

    fn staging(path: &Path) -> PathBuf {
        crate::staging::staging_path(path)
    }

    #[tokio::test]
    async fn test_scenario_idempotence_recovery_and_problematic() {
        let h = Harness::new(vec![]);
        let a = h.doc("A.pdf");
        write_pdf(&a, "A", None);
        let h1 = content_hash(&a).unwrap();
        let today = Local::now().date_naive();
        let mut orchestrator = h.orchestrator();

        // Run 1: first success appends one record and stamps the identity
        let report = orchestrator.run().await.unwrap();
        assert_eq!(
            report.outcome("A.pdf"),
            Some(&DocumentOutcome::Transformed {
                ledger: LedgerWrite::Appended
            })
        );
        assert_eq!(h.ledger(), vec![LedgerEntry::new(&h1, today, "A.pdf", false)]);
        let embedded = identity::resolve(&a).unwrap();
        assert_eq!(embedded.token(), h1);
        assert_eq!(embedded.source(), IdentitySource::Embedded);
        assert!(!staging(&a).exists());
        assert!(h.working.join("backup/A.pdf").exists());

        // Run 2: nothing to do
        let report = orchestrator.run().await.unwrap();
        assert_eq!(h.transformer.calls().len(), 1);
        assert_eq!(
            report.outcome("A.pdf"),
            Some(&DocumentOutcome::Skipped {
                processed_on: Some(today)
            })
        );
        assert_eq!(h.ledger().len(), 1);

        // Interrupted run left only the staging artifact
        fs::rename(&a, staging(&a)).unwrap();
        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.sweep.restored, 1);
        assert!(a.exists());
        assert_eq!(h.transformer.calls().len(), 1);

        // Problematic: reprocessed, record refreshed in place
        assert!(orchestrator
            .ledger()
            .mark_problematic(&h1, h.notifier.as_ref())
            .await
            .unwrap());
        let report = orchestrator.run().await.unwrap();
        assert_eq!(
            report.outcome("A.pdf"),
            Some(&DocumentOutcome::Transformed {
                ledger: LedgerWrite::Updated
            })
        );
        let calls = h.transformer.calls();
        assert_eq!(calls.len(), 2);
        assert!(calls[1].problematic);
        assert_eq!(h.ledger(), vec![LedgerEntry::new(&h1, today, "A.pdf", false)]);
        assert_eq!(report.run, 4);
    }

    #[tokio::test]
    async fn test_force_rescan_leaves_ledger_alone() {
        let h = Harness::new(vec![]);
        write_pdf(&h.doc("A.pdf"), "A", None);
        let mut orchestrator = h.orchestrator();
        orchestrator.run().await.unwrap();
        let before = h.ledger();

        h.set_force_rescan(true);
        let report = orchestrator.run().await.unwrap();

        assert_eq!(h.transformer.calls().len(), 2);
        assert_eq!(
            report.outcome("A.pdf"),
            Some(&DocumentOutcome::Transformed {
                ledger: LedgerWrite::Unchanged
            })
        );
        assert_eq!(h.ledger(), before);
    }

    #[tokio::test]
    async fn test_interrupted_document_is_processed_again() {
        let h = Harness::new(vec![]);
        let b = h.doc("B.pdf");
        write_pdf(&b, "B", None);
        fs::rename(&b, staging(&b)).unwrap();

        let report = h.orchestrator().run().await.unwrap();

        assert_eq!(report.sweep.restored, 1);
        assert_eq!(report.transformed(), 1);
        assert!(b.exists());
        assert_eq!(h.ledger().len(), 1);
    }

    #[tokio::test]
    async fn test_soft_failure_restores_original() {
        let h = Harness::new(vec![Ok(2)]);
        let a = h.doc("A.pdf");
        write_pdf(&a, "A", None);
        let original = fs::read(&a).unwrap();

        let report = h.orchestrator().run().await.unwrap();

        assert_eq!(
            report.outcome("A.pdf"),
            Some(&DocumentOutcome::SoftFailure { code: 2 })
        );
        assert_eq!(fs::read(&a).unwrap(), original);
        assert!(!staging(&a).exists());
        assert!(h.notifier.contains("Error processing 'A.pdf'. Exit code 2."));
        assert!(h.ledger().is_empty());
    }

    #[tokio::test]
    async fn test_transient_failure_restores_and_requests_rerun() {
        let h = Harness::new(vec![Err(TransformError::Transient("timed out".into()))]);
        let a = h.doc("A.pdf");
        write_pdf(&a, "A", None);
        write_pdf(&h.doc("B.pdf"), "B", None);
        let original = fs::read(&a).unwrap();

        let report = h.orchestrator().run().await.unwrap();

        assert_eq!(h.transformer.calls().len(), 2);
        assert_eq!(h.trigger.requests(), 1);
        assert_eq!(fs::read(&a).unwrap(), original);
        assert_eq!(report.transformed(), 1);
        assert_eq!(report.stopped, None);
        assert!(h
            .notifier
            .messages()
            .contains(&("Error processing 'A.pdf'. Restarting the job...".to_string(), true)));
    }

    #[tokio::test]
    async fn test_encrypted_input_is_skipped() {
        let h = Harness::new(vec![Err(TransformError::EncryptedInput("encrypted".into()))]);
        let a = h.doc("A.pdf");
        write_pdf(&a, "A", None);
        write_pdf(&h.doc("B.pdf"), "B", None);

        let report = h.orchestrator().run().await.unwrap();

        assert!(matches!(
            report.outcome("A.pdf"),
            Some(DocumentOutcome::Failed(Disposition::Recoverable {
                kind: FailureKind::EncryptedInput,
                ..
            }))
        ));
        assert_eq!(report.transformed(), 1);
        assert_eq!(h.trigger.requests(), 0);
        assert!(a.exists());
        assert!(h.notifier.contains("PDF is encrypted"));
    }

    #[tokio::test]
    async fn test_missing_dependency_stops_run() {
        let h = Harness::new(vec![Err(TransformError::MissingDependency(
            "tesseract not found".into(),
        ))]);
        let a = h.doc("A.pdf");
        write_pdf(&a, "A", None);
        write_pdf(&h.doc("B.pdf"), "B", None);
        let original = fs::read(&a).unwrap();

        let report = h.orchestrator().run().await.unwrap();

        assert_eq!(h.transformer.calls().len(), 1);
        assert_eq!(report.stopped, Some(FailureKind::MissingDependency));
        // Left staged, then put back by the closing sweep
        assert_eq!(report.sweep.restored, 1);
        assert_eq!(fs::read(&a).unwrap(), original);
        assert!(h.ledger().is_empty());
        assert!(h.notifier.contains("tesseract not found"));
    }

    #[tokio::test]
    async fn test_unclassified_failure_stops_run() {
        let h = Harness::new(vec![Err(TransformError::Unclassified("boom".into()))]);
        let a = h.doc("A.pdf");
        write_pdf(&a, "A", None);
        write_pdf(&h.doc("B.pdf"), "B", None);
        let original = fs::read(&a).unwrap();

        let report = h.orchestrator().run().await.unwrap();

        assert_eq!(h.transformer.calls().len(), 1);
        assert_eq!(report.stopped, Some(FailureKind::Unclassified));
        assert_eq!(fs::read(&a).unwrap(), original);
        assert!(h
            .notifier
            .messages()
            .iter()
            .any(|(m, urgent)| *urgent && m.contains("Please refer to the log")));
    }

    #[tokio::test]
    async fn test_empty_listing_notifies() {
        let h = Harness::new(vec![]);
        let report = h.orchestrator().run().await.unwrap();
        assert!(report.documents.is_empty());
        assert!(h.notifier.contains("No files to OCR in"));
    }

    #[tokio::test]
    async fn test_first_invocation_deferred_without_run_on_startup() {
        let mut h = Harness::new(vec![]);
        h.config.pipeline.run_on_startup = false;
        write_pdf(&h.doc("A.pdf"), "A", None);
        let mut orchestrator = h.orchestrator();

        let report = orchestrator.run().await.unwrap();
        assert!(report.deferred);
        assert!(h.transformer.calls().is_empty());

        let report = orchestrator.run().await.unwrap();
        assert_eq!(report.run, 1);
        assert_eq!(report.transformed(), 1);
    }

    #[tokio::test]
    async fn test_same_root_is_fatal() {
        let mut h = Harness::new(vec![]);
        h.config.pipeline.backup_dir = PathBuf::from(".");
        write_pdf(&h.doc("A.pdf"), "A", None);

        let err = h.orchestrator().run().await.unwrap_err();

        assert!(matches!(err, PipelineError::Config(_)));
        assert!(h.transformer.calls().is_empty());
        assert!(h.notifier.contains("cannot be the same"));
    }

    #[tokio::test]
    async fn test_original_timestamps_restored_from_backup() {
        let h = Harness::new(vec![]);
        let a = h.doc("A.pdf");
        write_pdf(&a, "A", None);
        let past = SystemTime::now() - Duration::from_secs(86_400 * 90);
        set_file_times(&a, past, past).unwrap();

        h.orchestrator().run().await.unwrap();

        assert_eq!(fs::metadata(&a).unwrap().modified().unwrap(), past);
    }

    #[tokio::test]
    async fn test_sidecar_follows_settings() {
        let h = Harness::new(vec![]);
        write_pdf(&h.doc("A.pdf"), "A", None);
        RuntimeSettings {
            output_txt: true,
            ..RuntimeSettings::default()
        }
        .save(&h.config.pipeline.settings_path)
        .unwrap();

        h.orchestrator().run().await.unwrap();

        assert!(h.transformer.calls()[0].sidecar);
    }

    #[tokio::test]
    async fn test_legacy_md5_identity_restores_timestamps() {
        let h = Harness::new(vec![]);
        let token = "900150983cd24fb0d6963f7d28e17f72";
        let copy = h.working.join("backup/A.pdf");
        fs::create_dir_all(copy.parent().unwrap()).unwrap();
        fs::write(&copy, b"abc").unwrap();
        let past = SystemTime::now() - Duration::from_secs(86_400 * 90);
        set_file_times(&copy, past, past).unwrap();

        let a = h.doc("A.pdf");
        write_pdf(&a, "A", Some(&format!("md5 {}", token)));
        let yesterday = Local::now().date_naive().pred_opt().unwrap();
        Ledger::new(&h.config.ledger.path)
            .append(
                &LedgerEntry::new(token, yesterday, "A.pdf", true),
                h.notifier.as_ref(),
            )
            .await
            .unwrap();

        let report = h.orchestrator().run().await.unwrap();

        assert_eq!(
            report.outcome("A.pdf"),
            Some(&DocumentOutcome::Transformed {
                ledger: LedgerWrite::Updated
            })
        );
        assert_eq!(h.transformer.calls()[0].identity.keywords(), format!("md5 {}", token));
        assert_eq!(fs::metadata(&a).unwrap().modified().unwrap(), past);
    }

    #[tokio::test]
    async fn test_housekeeping_runs_every_clean_after_documents() {
        let mut h = Harness::new(vec![]);
        h.config.pipeline.clean_after = 1;
        write_pdf(&h.doc("A.pdf"), "A", None);
        write_pdf(&h.doc("B.pdf"), "B", None);

        let report = h.orchestrator().run().await.unwrap();

        // A's artifact was swept before B was staged
        assert_eq!(h.transformer.artifacts_seen(), vec![1, 1]);
        assert_eq!(report.sweep.removed, 2);
        assert!(!staging(&h.doc("A.pdf")).exists());
        assert!(!staging(&h.doc("B.pdf")).exists());
    }

    #[tokio::test]
    async fn test_artifacts_accumulate_until_housekeeping() {
        let mut h = Harness::new(vec![]);
        h.config.pipeline.clean_after = 10;
        write_pdf(&h.doc("A.pdf"), "A", None);
        write_pdf(&h.doc("B.pdf"), "B", None);

        let report = h.orchestrator().run().await.unwrap();

        assert_eq!(h.transformer.artifacts_seen(), vec![1, 2]);
        assert_eq!(report.sweep.removed, 2);
    }

    #[tokio::test]
    async fn test_large_file_notice() {
        let mut h = Harness::new(vec![]);
        h.config.pipeline.large_file_kb = 1;
        write_pdf(&h.doc("small.pdf"), "s", None);
        write_pdf(&h.doc("big.pdf"), &"x".repeat(4_000), None);

        let report = h.orchestrator().run().await.unwrap();

        assert_eq!(report.transformed(), 2);
        assert!(h
            .notifier
            .contains("'big.pdf' may take longer to process: large file size."));
        assert!(!h.notifier.contains("'small.pdf' may take longer"));
    }

    #[tokio::test]
    async fn test_io_error_notice_keeps_detail_in_log() {
        let mut h = Harness::new(vec![]);
        let ledger_dir = h.working.parent().unwrap().join("ledger-dir");
        fs::create_dir_all(&ledger_dir).unwrap();
        h.config.ledger.path = ledger_dir;
        write_pdf(&h.doc("A.pdf"), "A", None);

        let report = h.orchestrator().run().await.unwrap();

        assert!(matches!(
            report.outcome("A.pdf"),
            Some(DocumentOutcome::Errored(_))
        ));
        assert_eq!(
            h.notifier.messages(),
            vec![(
                "Error processing 'A.pdf'. Please refer to the log output.".to_string(),
                true
            )]
        );
    }

    #[tokio::test]
    async fn test_cancelled_run_processes_nothing() {
        let h = Harness::new(vec![]);
        write_pdf(&h.doc("A.pdf"), "A", None);
        let mut orchestrator = h.orchestrator();
        orchestrator.cancel_flag().cancel();

        let report = orchestrator.run().await.unwrap();

        assert!(report.cancelled);
        assert!(h.transformer.calls().is_empty());
    }
}
