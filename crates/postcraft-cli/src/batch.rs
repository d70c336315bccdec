//! `postcraft run`: generate cards and copy for every record in a dataset.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use tracing::{error, info, warn};

use postcraft_core::config::schema::{BatchConfig, FilesConfig};
use postcraft_core::utils::{sanitize_folder_name, truncate_string};
use postcraft_providers::{Dispatcher, TaskKind};

use crate::content::{clean_copy, clean_svg, clean_title};
use crate::progress::Progress;

const MAX_FOLDER_LEN: usize = 100;

// ─────────────────────────────────────────────
// Inputs
// ─────────────────────────────────────────────

/// System prompts for the three tasks.
#[derive(Clone, Debug)]
pub struct Prompts {
    pub svg: String,
    pub title: String,
    pub body: String,
}

impl Prompts {
    pub fn load(files: &FilesConfig) -> Result<Self> {
        Ok(Self {
            svg: read_prompt(&files.svg_prompt)?,
            title: read_prompt(&files.title_prompt)?,
            body: read_prompt(&files.body_prompt)?,
        })
    }

    fn for_task(&self, task: TaskKind) -> &str {
        match task {
            TaskKind::Svg => &self.svg,
            TaskKind::Title => &self.title,
            TaskKind::Body => &self.body,
        }
    }
}

fn read_prompt(path: &str) -> Result<String> {
    let path = crate::helpers::expand_tilde(path);
    let prompt = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read prompt file {}", path.display()))?;
    if prompt.trim().is_empty() {
        bail!("prompt file {} is empty", path.display());
    }
    Ok(prompt.trim().to_string())
}

/// One dataset entry. Only `full_text` is used; other fields are ignored.
#[derive(Clone, Debug, Default, Deserialize)]
pub struct Record {
    #[serde(default)]
    pub full_text: String,
}

/// Load the dataset: a JSON array of records.
pub fn load_dataset(path: &Path) -> Result<Vec<Record>> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read dataset {}", path.display()))?;
    serde_json::from_str(&raw)
        .with_context(|| format!("dataset {} is not a JSON array of records", path.display()))
}

// ─────────────────────────────────────────────
// Runner
// ─────────────────────────────────────────────

#[derive(Clone, Debug)]
pub struct BatchOptions {
    pub output_dir: PathBuf,
    pub start: usize,
    pub count: Option<usize>,
    /// Save progress after this many processed records.
    pub save_interval: usize,
    /// Pause between records.
    pub record_delay: Duration,
}

impl BatchOptions {
    pub fn new(output_dir: PathBuf, batch: &BatchConfig) -> Self {
        Self {
            output_dir,
            start: 0,
            count: None,
            save_interval: batch.progress_save_interval,
            record_delay: Duration::from_millis(batch.record_delay_ms),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub processed: usize,
    pub completed: usize,
    pub unresolved: usize,
    /// Already completed in an earlier run.
    pub skipped: usize,
    pub interrupted: bool,
}

enum RecordOutcome {
    Completed { folder: String },
    Unresolved { step: String },
}

pub struct BatchRunner {
    dispatcher: Arc<Dispatcher>,
    prompts: Prompts,
    options: BatchOptions,
    stop: Arc<AtomicBool>,
}

impl BatchRunner {
    pub fn new(dispatcher: Arc<Dispatcher>, prompts: Prompts, options: BatchOptions) -> Self {
        Self {
            dispatcher,
            prompts,
            options,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag checked between records; set it to stop after the current one.
    pub fn stop_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.stop)
    }

    pub async fn run(&self, records: &[Record]) -> Result<BatchSummary> {
        let progress_path = Progress::path_in(&self.options.output_dir);
        let mut progress = Progress::load(&progress_path);
        let mut summary = BatchSummary::default();

        let start = self.options.start.min(records.len());
        let end = self
            .options
            .count
            .map_or(records.len(), |n| start.saturating_add(n).min(records.len()));
        info!(
            total = records.len(),
            start,
            end,
            output = %self.options.output_dir.display(),
            "Starting batch"
        );

        for (index, record) in records.iter().enumerate().take(end).skip(start) {
            if self.stop.load(Ordering::SeqCst) {
                warn!(index, "Stop requested, ending batch");
                summary.interrupted = true;
                break;
            }
            if progress.is_completed(index) {
                summary.skipped += 1;
                continue;
            }
            if summary.processed > 0 && !self.options.record_delay.is_zero() {
                tokio::time::sleep(self.options.record_delay).await;
            }

            summary.processed += 1;
            match self.process_record(index, record, &progress).await {
                RecordOutcome::Completed { folder } => {
                    info!(index, folder = %folder, "Record completed");
                    progress.mark_completed(index, folder);
                    summary.completed += 1;
                }
                RecordOutcome::Unresolved { step } => {
                    warn!(index, step = %step, "Record unresolved");
                    progress.mark_unresolved(index, step);
                    summary.unresolved += 1;
                }
            }

            if self.options.save_interval > 0 && summary.processed % self.options.save_interval == 0
            {
                progress.save(&progress_path)?;
            }
        }

        progress.save(&progress_path)?;
        info!(
            processed = summary.processed,
            completed = summary.completed,
            unresolved = summary.unresolved,
            skipped = summary.skipped,
            "Batch finished"
        );
        Ok(summary)
    }

    async fn process_record(
        &self,
        index: usize,
        record: &Record,
        progress: &Progress,
    ) -> RecordOutcome {
        let text = record.full_text.trim();
        if text.is_empty() {
            warn!(index, "Record has no full_text");
            return RecordOutcome::Unresolved {
                step: "input".to_string(),
            };
        }
        info!(index, text = %truncate_string(text, 50), "Processing record");

        let mut generated: [String; 3] = Default::default();
        for (slot, task) in generated.iter_mut().zip(TaskKind::ALL) {
            match self
                .dispatcher
                .generate(task.as_str(), self.prompts.for_task(task), text)
                .await
            {
                Ok(generation) => {
                    info!(
                        index,
                        task = %task,
                        provider = %generation.provider,
                        calls = generation.attempts,
                        "Task done"
                    );
                    *slot = generation.text;
                }
                Err(e) => {
                    error!(index, task = %task, error = %e, "Task failed");
                    return RecordOutcome::Unresolved {
                        step: task.to_string(),
                    };
                }
            }
        }

        // TaskKind::ALL order.
        let [svg, title, body] = generated;
        let svg = clean_svg(&svg);
        let title = clean_title(&title);
        let body = clean_copy(&body);

        let folder = choose_folder(&self.options.output_dir, &title, index, progress);
        match write_outputs(&self.options.output_dir.join(&folder), &svg, &title, &body) {
            Ok(()) => RecordOutcome::Completed { folder },
            Err(e) => {
                error!(index, folder = %folder, error = %format!("{e:#}"), "Writing outputs failed");
                RecordOutcome::Unresolved {
                    step: "write".to_string(),
                }
            }
        }
    }
}

/// Pick a folder name for `index`: the sanitized title, with an `_N` suffix
/// when another record already owns that name.
pub fn choose_folder(output_dir: &Path, title: &str, index: usize, progress: &Progress) -> String {
    let base = if title.trim().is_empty() {
        format!("record_{index}")
    } else {
        sanitize_folder_name(title, MAX_FOLDER_LEN)
    };

    let taken = |name: &str| match progress.folder_owner(name) {
        Some(owner) => owner != index,
        None => output_dir.join(name).exists(),
    };

    if !taken(&base) {
        return base;
    }
    (1..)
        .map(|n| format!("{base}_{n}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or(base)
}

fn write_outputs(folder: &Path, svg: &str, title: &str, body: &str) -> Result<()> {
    std::fs::create_dir_all(folder)
        .with_context(|| format!("failed to create {}", folder.display()))?;
    for (name, contents) in [("generated.svg", svg), ("title.txt", title), ("body.txt", body)] {
        let path = folder.join(name);
        std::fs::write(&path, contents)
            .with_context(|| format!("failed to write {}", path.display()))?;
    }
    Ok(())
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use postcraft_core::config::schema::TasksConfig;
    use postcraft_core::config::{ChainEntry, TaskConfig};
    use postcraft_providers::{
        LlmProvider, ProviderError, ProviderRegistry, RateLimiter, RetryPolicy, TaskRouter,
        UsageStats,
    };
    use std::sync::atomic::AtomicUsize;

    /// Answers according to which prompt it was given; fails on posts containing "FAIL".
    struct ScriptedProvider {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl LlmProvider for ScriptedProvider {
        async fn generate(
            &self,
            system_prompt: &str,
            user_content: &str,
            _model: &str,
        ) -> Result<String, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if user_content.contains("FAIL") {
                return Err(ProviderError::Authentication {
                    status: 401,
                    message: "nope".into(),
                });
            }
            let reply = match system_prompt {
                "SVG PROMPT" => "```svg\n<svg><text font-family=\"'Space Mono'\">hi</text></svg>\n```"
                    .to_string(),
                "TITLE PROMPT" => format!("标题：\n{}", user_content.to_uppercase()),
                _ => "正文:\n\nfirst line\n\nsecond line".to_string(),
            };
            Ok(reply)
        }

        fn name(&self) -> &str {
            "mock"
        }

        fn display_name(&self) -> &str {
            "Mock"
        }
    }

    fn prompts() -> Prompts {
        Prompts {
            svg: "SVG PROMPT".into(),
            title: "TITLE PROMPT".into(),
            body: "BODY PROMPT".into(),
        }
    }

    fn runner(output_dir: &Path) -> (BatchRunner, Arc<ScriptedProvider>) {
        let chain = || TaskConfig::new(vec![ChainEntry::new("mock", "mock-model")]);
        let tasks = TasksConfig {
            title: chain(),
            body: chain(),
            svg: chain(),
        };
        let provider = Arc::new(ScriptedProvider {
            calls: AtomicUsize::new(0),
        });
        let mut registry = ProviderRegistry::new();
        registry.insert("mock", Arc::clone(&provider) as Arc<dyn LlmProvider>);

        let dispatcher = Dispatcher::new(
            TaskRouter::from_config(&tasks),
            registry,
            Arc::new(RateLimiter::new(Duration::ZERO)),
            Arc::new(UsageStats::new()),
            RetryPolicy::default(),
        );
        let options = BatchOptions {
            output_dir: output_dir.to_path_buf(),
            start: 0,
            count: None,
            save_interval: 2,
            record_delay: Duration::ZERO,
        };
        (
            BatchRunner::new(Arc::new(dispatcher), prompts(), options),
            provider,
        )
    }

    fn records(texts: &[&str]) -> Vec<Record> {
        texts
            .iter()
            .map(|t| Record {
                full_text: t.to_string(),
            })
            .collect()
    }

    #[tokio::test]
    async fn test_batch_writes_outputs() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _) = runner(dir.path());

        let summary = runner.run(&records(&["hello world"])).await.unwrap();
        assert_eq!(summary.completed, 1);

        let folder = dir.path().join("HELLO WORLD");
        let svg = std::fs::read_to_string(folder.join("generated.svg")).unwrap();
        assert!(svg.starts_with("<svg>"));
        assert!(svg.contains("'Courier New', monospace"));
        assert_eq!(
            std::fs::read_to_string(folder.join("title.txt")).unwrap(),
            "HELLO WORLD"
        );
        assert_eq!(
            std::fs::read_to_string(folder.join("body.txt")).unwrap(),
            "first line\nsecond line"
        );

        let progress = Progress::load(&Progress::path_in(dir.path()));
        assert!(progress.is_completed(0));
        assert_eq!(progress.folders.get(&0).map(String::as_str), Some("HELLO WORLD"));
    }

    #[tokio::test]
    async fn test_failed_record_is_unresolved_and_batch_continues() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, provider) = runner(dir.path());

        let summary = runner
            .run(&records(&["please FAIL", "fine post"]))
            .await
            .unwrap();

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.completed, 1);
        assert_eq!(summary.unresolved, 1);
        // The failing record stops at its first task: 1 call + 3 for the good one.
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);

        let progress = Progress::load(&Progress::path_in(dir.path()));
        assert_eq!(progress.unresolved.get(&0).map(String::as_str), Some("svg"));
        assert!(progress.is_completed(1));
        assert_eq!(runner.dispatcher.stats().snapshot().failed, 1);
    }

    #[tokio::test]
    async fn test_completed_records_are_skipped_on_rerun() {
        let dir = tempfile::tempdir().unwrap();
        let data = records(&["one", "two"]);

        let (first, _) = runner(dir.path());
        first.run(&data).await.unwrap();

        let (second, provider) = runner(dir.path());
        let summary = second.run(&data).await.unwrap();
        assert_eq!(summary.skipped, 2);
        assert_eq!(summary.processed, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_same_title_gets_suffixed_folder() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, _) = runner(dir.path());

        runner.run(&records(&["same", "same"])).await.unwrap();
        assert!(dir.path().join("SAME").join("body.txt").exists());
        assert!(dir.path().join("SAME_1").join("body.txt").exists());
    }

    #[tokio::test]
    async fn test_start_and_count_limit_range() {
        let dir = tempfile::tempdir().unwrap();
        let (mut runner, _) = runner(dir.path());
        runner.options.start = 1;
        runner.options.count = Some(1);

        let summary = runner.run(&records(&["a", "b", "c"])).await.unwrap();
        assert_eq!(summary.processed, 1);

        let progress = Progress::load(&Progress::path_in(dir.path()));
        assert_eq!(progress.completed.iter().copied().collect::<Vec<_>>(), vec![1]);
    }

    #[tokio::test]
    async fn test_empty_record_is_unresolved() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, provider) = runner(dir.path());

        let summary = runner.run(&records(&["   "])).await.unwrap();
        assert_eq!(summary.unresolved, 1);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stop_flag_ends_batch_and_saves_progress() {
        let dir = tempfile::tempdir().unwrap();
        let (runner, provider) = runner(dir.path());
        runner.stop_flag().store(true, Ordering::SeqCst);

        let summary = runner.run(&records(&["a", "b"])).await.unwrap();
        assert!(summary.interrupted);
        assert_eq!(summary.processed, 0);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
        assert!(Progress::path_in(dir.path()).exists());
    }

    #[test]
    fn test_choose_folder() {
        let dir = tempfile::tempdir().unwrap();
        let mut progress = Progress::default();

        assert_eq!(choose_folder(dir.path(), "a/b", 0, &progress), "a_b");
        assert_eq!(choose_folder(dir.path(), "  ", 7, &progress), "record_7");

        progress.mark_completed(0, "a_b");
        assert_eq!(choose_folder(dir.path(), "a/b", 0, &progress), "a_b");
        assert_eq!(choose_folder(dir.path(), "a/b", 1, &progress), "a_b_1");

        std::fs::create_dir_all(dir.path().join("manual")).unwrap();
        assert_eq!(choose_folder(dir.path(), "manual", 2, &progress), "manual_1");
    }

    #[test]
    fn test_load_dataset() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("posts.json");
        std::fs::write(
            &path,
            r#"[{"full_text": "first", "id": 1}, {"id": 2}, {"full_text": "third"}]"#,
        )
        .unwrap();

        let records = load_dataset(&path).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].full_text, "first");
        assert_eq!(records[1].full_text, "");

        std::fs::write(&path, r#"{"full_text": "not an array"}"#).unwrap();
        assert!(load_dataset(&path).is_err());
    }

    #[test]
    fn test_prompts_load() {
        let dir = tempfile::tempdir().unwrap();
        let write = |name: &str, text: &str| {
            let path = dir.path().join(name);
            std::fs::write(&path, text).unwrap();
            path.to_string_lossy().to_string()
        };
        let files = FilesConfig {
            svg_prompt: write("svg.txt", "Design a card.\n"),
            title_prompt: write("title.txt", "Write a title."),
            body_prompt: write("body.txt", "Write the body."),
            ..Default::default()
        };

        let prompts = Prompts::load(&files).unwrap();
        assert_eq!(prompts.svg, "Design a card.");

        let empty = FilesConfig {
            body_prompt: write("empty.txt", "  \n"),
            ..files
        };
        let err = Prompts::load(&empty).unwrap_err();
        assert!(err.to_string().contains("is empty"));
    }
}
