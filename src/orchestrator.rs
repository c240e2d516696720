//! The pipeline orchestrator.
//!
//! One [`Pipeline`] drives both strategies through the same state machine:
//!
//! ```text
//! Idle ─load─▶ MediaLoaded ─────────────(direct)──────────────┐
//!                  │                                           ▼
//!                  └─ocr─▶ OcrComplete ─save text─▶ extract ─▶ Extracted ─save json─▶ Persisted
//! any stage error or Ctrl-C ─▶ Failed
//! ```
//!
//! Stages run one at a time and each is awaited to completion; there is
//! exactly one extraction call per run and no retry anywhere. Every stage is
//! raced against a shutdown future so an interrupt ends the run as
//! [`HsdsError::Cancelled`] instead of a stage failure.
//!
//! The OCR text is written before extraction starts, so it survives an
//! extraction failure. A failure writing the JSON record does not discard the
//! record: it is returned in [`RunOutput`] next to the error.

use crate::config::{OcrPreset, Settings, Strategy};
use crate::error::HsdsError;
use crate::pipeline::extract::Extractor;
use crate::pipeline::media::load_image;
use crate::pipeline::ocr::{run_ocr, HttpOcrEngine, OcrEngine, OcrText};
use crate::pipeline::report;
use crate::progress::{PipelineObserver, PipelineState, Stage};
use crate::schema::StructuredRecord;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Timings and sizes collected during a run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunStats {
    pub load_ms: u64,
    pub ocr_ms: Option<u64>,
    pub ocr_chars: Option<usize>,
    pub extract_ms: u64,
    pub total_ms: u64,
}

/// Result of a run that got as far as a valid record.
#[derive(Debug)]
pub struct RunOutput {
    pub record: StructuredRecord,
    pub strategy: Strategy,
    /// `Persisted`, or `Failed` when writing the JSON file failed.
    pub state: PipelineState,
    pub json_path: PathBuf,
    /// Where the OCR text went (two-stage only).
    pub ocr_path: Option<PathBuf>,
    /// Set when the record was extracted but could not be written.
    pub persist_error: Option<HsdsError>,
    pub stats: RunStats,
}

impl RunOutput {
    /// Treat a persistence failure as an error.
    pub fn into_result(mut self) -> Result<RunOutput, HsdsError> {
        match self.persist_error.take() {
            Some(e) => Err(e),
            None => Ok(self),
        }
    }
}

/// Result of an OCR-only run.
#[derive(Debug)]
pub struct OcrOnlyOutput {
    pub text: OcrText,
    pub preset: OcrPreset,
    pub path: PathBuf,
    pub elapsed_ms: u64,
}

/// Flyer → record pipeline, parameterised by [`Strategy`].
pub struct Pipeline {
    settings: Settings,
    extractor: Extractor,
    ocr: Option<Arc<dyn OcrEngine>>,
}

impl Pipeline {
    /// Assemble a pipeline from parts. Add an OCR engine with
    /// [`Pipeline::with_ocr_engine`] for [`Strategy::OcrThenText`].
    pub fn new(settings: Settings, extractor: Extractor) -> Self {
        Self {
            settings,
            extractor,
            ocr: None,
        }
    }

    pub fn with_ocr_engine(mut self, engine: Arc<dyn OcrEngine>) -> Self {
        self.ocr = Some(engine);
        self
    }

    /// Build the extractor (credential check included) and, for the
    /// two-stage strategy, the HTTP OCR engine.
    pub fn from_settings(settings: Settings) -> Result<Self, HsdsError> {
        let extractor = Extractor::from_settings(&settings)?;
        let pipeline = Self::new(settings, extractor);
        Ok(match pipeline.settings.strategy {
            Strategy::Direct => pipeline,
            Strategy::OcrThenText => {
                let engine = HttpOcrEngine::new(
                    pipeline.settings.ocr_endpoint.clone(),
                    pipeline.settings.ocr_timeout_secs,
                )?;
                pipeline.with_ocr_engine(Arc::new(engine))
            }
        })
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Run until done or until Ctrl-C.
    pub async fn run(&self, image_path: impl AsRef<Path>) -> Result<RunOutput, HsdsError> {
        self.run_until(image_path, ctrl_c()).await
    }

    /// Run until done or until `shutdown` resolves.
    pub async fn run_until<F>(
        &self,
        image_path: impl AsRef<Path>,
        shutdown: F,
    ) -> Result<RunOutput, HsdsError>
    where
        F: Future<Output = ()>,
    {
        let total_start = Instant::now();
        let image_path = image_path.as_ref();
        let strategy = self.settings.strategy;
        tokio::pin!(shutdown);

        let mut run = Tracker::new(self.settings.progress_callback.as_deref());
        let mut stats = RunStats::default();
        info!("Starting {} pipeline: {}", strategy, image_path.display());

        // ── Idle → MediaLoaded ───────────────────────────────────────────
        let (image, ms) = run
            .stage(Stage::LoadMedia, &mut shutdown, load_image(image_path))
            .await?;
        stats.load_ms = ms;
        run.advance(PipelineState::MediaLoaded);

        // ── MediaLoaded → (OcrComplete) → Extracted ──────────────────────
        let mut ocr_path = None;
        let record = match strategy {
            Strategy::Direct => {
                let (record, ms) = run
                    .stage(
                        Stage::Extract,
                        &mut shutdown,
                        self.extractor.extract_from_image(image),
                    )
                    .await?;
                stats.extract_ms = ms;
                record
            }
            Strategy::OcrThenText => {
                let Some(engine) = self.ocr.as_deref() else {
                    return Err(run.fail(
                        Stage::Ocr,
                        HsdsError::InvalidConfig(
                            "the ocr-then-text strategy needs an OCR engine".into(),
                        ),
                    ));
                };

                let (text, ms) = run
                    .stage(
                        Stage::Ocr,
                        &mut shutdown,
                        run_ocr(
                            engine,
                            &image,
                            self.settings.ocr_preset,
                            &self.settings.ocr_model,
                        ),
                    )
                    .await?;
                drop(image);
                stats.ocr_ms = Some(ms);
                stats.ocr_chars = Some(text.char_count());
                run.advance(PipelineState::OcrComplete);

                // The OCR artifact goes to disk before extraction can fail.
                let path = &self.settings.ocr_output;
                run.stage(Stage::Persist, &mut shutdown, report::save_ocr_text(&text, path))
                    .await?;
                if let Some(cb) = run.observer {
                    cb.on_ocr_saved(path, text.char_count());
                }
                ocr_path = Some(path.clone());

                let (record, ms) = run
                    .stage(
                        Stage::Extract,
                        &mut shutdown,
                        self.extractor.extract_from_text(text),
                    )
                    .await?;
                stats.extract_ms = ms;
                record
            }
        };
        run.advance(PipelineState::Extracted);

        // ── Extracted → Persisted ────────────────────────────────────────
        let json_path = self.settings.json_output.clone();
        let persist_error = match run
            .stage(
                Stage::Persist,
                &mut shutdown,
                report::save_json(&record, &json_path),
            )
            .await
        {
            Ok(((), _)) => {
                run.advance(PipelineState::Persisted);
                None
            }
            Err(e) if e.is_cancellation() => return Err(e),
            Err(e) => {
                warn!("Record extracted but not saved: {}", e);
                Some(e)
            }
        };

        stats.total_ms = total_start.elapsed().as_millis() as u64;
        info!(
            "Pipeline finished in {}ms with state {:?}",
            stats.total_ms, run.state
        );

        Ok(RunOutput {
            record,
            strategy,
            state: run.state,
            json_path,
            ocr_path,
            persist_error,
            stats,
        })
    }
}

/// Load an image, run OCR on it and save the text as
/// `ocr_result_<preset>.txt` next to the configured OCR output.
pub async fn run_ocr_only<F>(
    settings: &Settings,
    engine: &dyn OcrEngine,
    image_path: impl AsRef<Path>,
    shutdown: F,
) -> Result<OcrOnlyOutput, HsdsError>
where
    F: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut run = Tracker::new(settings.progress_callback.as_deref());

    let (image, _) = run
        .stage(Stage::LoadMedia, &mut shutdown, load_image(image_path.as_ref()))
        .await?;
    run.advance(PipelineState::MediaLoaded);

    let preset = settings.ocr_preset;
    let (text, elapsed_ms) = run
        .stage(
            Stage::Ocr,
            &mut shutdown,
            run_ocr(engine, &image, preset, &settings.ocr_model),
        )
        .await?;
    run.advance(PipelineState::OcrComplete);

    let path = ocr_result_path(settings);
    run.stage(Stage::Persist, &mut shutdown, report::save_ocr_text(&text, &path))
        .await?;
    run.advance(PipelineState::Persisted);

    Ok(OcrOnlyOutput {
        text,
        preset,
        path,
        elapsed_ms,
    })
}

/// `ocr_result_<preset>.txt` in the directory of the OCR output.
pub fn ocr_result_path(settings: &Settings) -> PathBuf {
    let dir = settings
        .ocr_output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    dir.join(format!("ocr_result_{}.txt", settings.ocr_preset))
}

/// Resolves on Ctrl-C. If no handler can be installed, never resolves.
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Cannot listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

/// Race `work` against `shutdown`; shutdown wins ties.
async fn guarded<T, S, W>(shutdown: &mut Pin<&mut S>, work: W) -> Result<T, HsdsError>
where
    S: Future<Output = ()>,
    W: Future<Output = Result<T, HsdsError>>,
{
    tokio::select! {
        biased;
        _ = shutdown.as_mut() => Err(HsdsError::Cancelled),
        result = work => result,
    }
}

/// State and observer bookkeeping for one run.
struct Tracker<'a> {
    state: PipelineState,
    observer: Option<&'a dyn PipelineObserver>,
}

impl<'a> Tracker<'a> {
    fn new(observer: Option<&'a dyn PipelineObserver>) -> Self {
        Self {
            state: PipelineState::Idle,
            observer,
        }
    }

    /// Terminal states are final; later transitions are dropped.
    fn advance(&mut self, to: PipelineState) {
        if self.state.is_terminal() {
            warn!("Ignoring transition {:?} → {:?} after the run ended", self.state, to);
            return;
        }
        debug!("State {:?} → {:?}", self.state, to);
        if let Some(cb) = self.observer {
            cb.on_transition(self.state, to);
        }
        self.state = to;
    }

    fn fail(&mut self, stage: Stage, err: HsdsError) -> HsdsError {
        if err.is_cancellation() {
            warn!("Run cancelled during stage '{}'", stage);
        } else if let Some(cb) = self.observer {
            cb.on_stage_error(stage, &err.to_string());
        }
        self.advance(PipelineState::Failed);
        err
    }

    async fn stage<T, S, W>(
        &mut self,
        stage: Stage,
        shutdown: &mut Pin<&mut S>,
        work: W,
    ) -> Result<(T, u64), HsdsError>
    where
        S: Future<Output = ()>,
        W: Future<Output = Result<T, HsdsError>>,
    {
        if let Some(cb) = self.observer {
            cb.on_stage_start(stage);
        }
        let start = Instant::now();
        match guarded(shutdown, work).await {
            Ok(value) => {
                let elapsed_ms = start.elapsed().as_millis() as u64;
                if let Some(cb) = self.observer {
                    cb.on_stage_complete(stage, elapsed_ms);
                }
                Ok((value, elapsed_ms))
            }
            Err(e) => Err(self.fail(stage, e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn guarded_prefers_shutdown() {
        let shutdown = std::future::ready(());
        tokio::pin!(shutdown);
        let result: Result<u8, _> = guarded(&mut shutdown, async { Ok(1) }).await;
        assert!(matches!(result, Err(HsdsError::Cancelled)));
    }

    #[tokio::test]
    async fn guarded_passes_work_through() {
        let shutdown = std::future::pending::<()>();
        tokio::pin!(shutdown);
        let result = guarded(&mut shutdown, async { Ok::<_, HsdsError>(7) }).await;
        assert_eq!(result.unwrap(), 7);
    }

    #[derive(Default)]
    struct Transitions(std::sync::Mutex<Vec<(PipelineState, PipelineState)>>);

    impl PipelineObserver for Transitions {
        fn on_transition(&self, from: PipelineState, to: PipelineState) {
            self.0.lock().unwrap().push((from, to));
        }
    }

    #[test]
    fn tracker_stops_at_terminal_state() {
        let seen = Transitions::default();
        let mut run = Tracker::new(Some(&seen));
        run.advance(PipelineState::MediaLoaded);
        let err = run.fail(Stage::Extract, HsdsError::Cancelled);
        assert!(err.is_cancellation());
        run.advance(PipelineState::Persisted);

        assert_eq!(run.state, PipelineState::Failed);
        assert_eq!(
            *seen.0.lock().unwrap(),
            vec![
                (PipelineState::Idle, PipelineState::MediaLoaded),
                (PipelineState::MediaLoaded, PipelineState::Failed),
            ]
        );
    }

    #[test]
    fn ocr_result_path_uses_preset() {
        let settings = Settings::builder()
            .ocr_output("out/dir/ocr.txt")
            .ocr_preset(OcrPreset::Gundam)
            .build()
            .unwrap();
        assert_eq!(
            ocr_result_path(&settings),
            PathBuf::from("out/dir/ocr_result_gundam.txt")
        );

        let bare = Settings::builder().ocr_output("ocr.txt").build().unwrap();
        assert_eq!(ocr_result_path(&bare), PathBuf::from("./ocr_result_tiny.txt"));
    }

    #[test]
    fn into_result_surfaces_persistence_error() {
        let record: StructuredRecord = serde_json::from_str(
            r#"{"organization":{"name":"A","description":"B"},"services_at_locations":[]}"#,
        )
        .unwrap();
        let output = RunOutput {
            record,
            strategy: Strategy::Direct,
            state: PipelineState::Failed,
            json_path: PathBuf::from("x.json"),
            ocr_path: None,
            persist_error: Some(HsdsError::OutputWriteFailed {
                path: PathBuf::from("x.json"),
                source: std::io::Error::other("disk full"),
            }),
            stats: RunStats::default(),
        };
        assert!(output.into_result().unwrap_err().is_persistence());
    }
}
