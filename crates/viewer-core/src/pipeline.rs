//! Sequential, cancellable rendering of every page of one epoch.

use crate::events::{EventSink, PanelEventKind};
use crate::renderer::{PageKey, PageRenderer, RenderRequest, RenderTask, TaskState};
use crate::RenderedPage;
use crate::{DocumentHandle, ErrorKind, RenderError, SharedEngine, SurfaceSet};
use pdf_engine::PdfEngine;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tokio::task::JoinHandle;
use twinpage_scheduler::{CancellationToken, Epoch, EpochTokens};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EpochPhase {
    #[default]
    Idle,
    Loading,
    Rendering,
    Ready,
    Failed,
    Cancelled,
}

impl EpochPhase {
    /// Whether the epoch has stopped making progress.
    pub fn is_settled(self) -> bool {
        matches!(self, Self::Ready | Self::Failed | Self::Cancelled)
    }
}

#[derive(Debug, Default)]
struct PipelineState {
    epoch: Option<Epoch>,
    phase: EpochPhase,
    pages: BTreeMap<PageKey, RenderTask>,
    error: Option<String>,
}

impl PipelineState {
    fn enter(&mut self, epoch: Option<Epoch>, phase: EpochPhase) {
        self.epoch = epoch;
        self.phase = phase;
        self.pages.clear();
        self.error = None;
    }
}

/// Renders the pages of the current epoch in order, one at a time.
///
/// The rendered-page set only ever holds entries of the current epoch; it is
/// cleared wholesale whenever a new epoch begins.
pub struct RenderPipeline<E> {
    renderer: PageRenderer<E>,
    scale: f32,
    tokens: EpochTokens,
    state: Arc<Mutex<PipelineState>>,
}

impl<E> Clone for RenderPipeline<E> {
    fn clone(&self) -> Self {
        Self {
            renderer: self.renderer.clone(),
            scale: self.scale,
            tokens: self.tokens.clone(),
            state: self.state.clone(),
        }
    }
}

impl<E: PdfEngine> RenderPipeline<E> {
    pub fn new(engine: SharedEngine<E>, scale: f32, band_rows: u32) -> Self {
        Self {
            renderer: PageRenderer::new(engine, band_rows),
            scale,
            tokens: EpochTokens::new(),
            state: Arc::default(),
        }
    }

    pub fn scale(&self) -> f32 {
        self.scale
    }

    /// Forget the current epoch while its successor is being opened.
    pub fn begin_loading(&self) {
        self.lock_state().enter(None, EpochPhase::Loading);
    }

    /// Make `epoch` current and return its cancellation token.
    ///
    /// Entering a new epoch clears the page set and cancels the tokens of
    /// every older epoch. For the current epoch the live token is returned, or
    /// a fresh one if it was cancelled.
    pub fn begin_epoch(&self, epoch: Epoch) -> CancellationToken {
        {
            let mut state = self.lock_state();
            if state.epoch != Some(epoch) {
                state.enter(Some(epoch), EpochPhase::Loading);
                tracing::info!(%epoch, "render epoch started");
            }
        }

        let token = self.tokens.issue(epoch);
        if !token.is_cancelled() {
            return token;
        }

        self.tokens.retire(epoch);
        self.tokens.issue(epoch)
    }

    /// Render every page of `handle` not yet completed for its epoch.
    pub async fn run(
        &self,
        handle: &DocumentHandle,
        surfaces: &SurfaceSet,
        events: &EventSink,
    ) -> EpochPhase {
        let token = self.begin_epoch(handle.epoch());
        self.run_with_token(handle, surfaces, events, &token).await
    }

    pub(crate) async fn run_with_token(
        &self,
        handle: &DocumentHandle,
        surfaces: &SurfaceSet,
        events: &EventSink,
        token: &CancellationToken,
    ) -> EpochPhase {
        let epoch = handle.epoch();
        if !self.transition(epoch, EpochPhase::Rendering) {
            tracing::debug!(%epoch, "epoch superseded before rendering started");
            return EpochPhase::Cancelled;
        }

        for page in 1..=handle.page_count() {
            let key = PageKey { epoch, page };
            if self.page_state(key) == TaskState::Completed {
                continue;
            }

            let mut task = RenderTask::new(key, token.clone());
            task.start();
            self.track(task);

            let request =
                RenderRequest { handle, page, scale: self.scale, target: surfaces, cancel: token };
            let result = self.renderer.render(request).await;
            self.settle(key, &result);

            match result {
                Ok(rendered) => {
                    tracing::debug!(
                        %epoch,
                        page,
                        width = rendered.viewport.width_px,
                        height = rendered.viewport.height_px,
                        "page rendered"
                    );
                    events.emit(Some(epoch), PanelEventKind::PageRendered { page });
                }
                Err(RenderError::Cancelled) => {
                    tracing::debug!(%epoch, page, "epoch cancelled");
                    events.emit(Some(epoch), PanelEventKind::RenderCancelled { page });
                    self.finish(epoch, EpochPhase::Cancelled, None);
                    return EpochPhase::Cancelled;
                }
                Err(err) => {
                    tracing::warn!(%epoch, page, error = %err, "render failed");
                    let message = err.to_string();
                    events.emit(
                        Some(epoch),
                        PanelEventKind::Error { kind: ErrorKind::Render, message: message.clone() },
                    );
                    self.finish(epoch, EpochPhase::Failed, Some(message));
                    return EpochPhase::Failed;
                }
            }
        }

        self.finish(epoch, EpochPhase::Ready, None);
        tracing::info!(%epoch, pages = handle.page_count(), "epoch ready");
        EpochPhase::Ready
    }

    /// Trip the token of every epoch this pipeline has issued and mark the
    /// page being rendered as cancelled.
    pub fn cancel(&self) {
        let cancelled = self.tokens.cancel_all();
        let mut state = self.lock_state();
        let interrupted =
            state.pages.values_mut().map(RenderTask::cancel).filter(|cancelled| *cancelled).count();
        tracing::debug!(cancelled, interrupted, "pipeline cancelled");
    }

    /// Record that the document for the next epoch could not be opened.
    pub fn fail_load(&self, message: impl Into<String>) {
        let mut state = self.lock_state();
        state.enter(None, EpochPhase::Failed);
        state.error = Some(message.into());
    }

    pub fn phase(&self) -> EpochPhase {
        self.lock_state().phase
    }

    pub fn epoch(&self) -> Option<Epoch> {
        self.lock_state().epoch
    }

    /// Message of the failure that halted the current epoch.
    pub fn error(&self) -> Option<String> {
        self.lock_state().error.clone()
    }

    /// Completed pages of the current epoch, in increasing order.
    pub fn completed_pages(&self) -> Vec<u32> {
        self.lock_state()
            .pages
            .iter()
            .filter(|(_, task)| task.state() == TaskState::Completed)
            .map(|(key, _)| key.page)
            .collect()
    }

    /// State of the render task for `key`; pages never attempted are pending.
    pub fn page_state(&self, key: PageKey) -> TaskState {
        self.lock_state().pages.get(&key).map_or(TaskState::Pending, RenderTask::state)
    }

    fn track(&self, task: RenderTask) {
        let mut state = self.lock_state();
        if state.epoch == Some(task.key().epoch) {
            state.pages.insert(task.key(), task);
        }
    }

    fn settle(&self, key: PageKey, result: &Result<RenderedPage, RenderError>) {
        if let Some(task) = self.lock_state().pages.get_mut(&key) {
            task.settle(result);
        }
    }

    fn transition(&self, epoch: Epoch, phase: EpochPhase) -> bool {
        let mut state = self.lock_state();
        if state.epoch != Some(epoch) {
            return false;
        }
        state.phase = phase;
        true
    }

    fn finish(&self, epoch: Epoch, phase: EpochPhase, error: Option<String>) {
        let mut state = self.lock_state();
        if state.epoch == Some(epoch) {
            state.phase = phase;
            state.error = error;
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, PipelineState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Scoped ownership of a spawned pipeline run.
///
/// `release` cancels the run and waits until it has stopped; once it returns
/// the run writes no more pixels. Dropping the guard cancels and aborts the
/// run without waiting.
#[derive(Debug)]
pub struct RenderGuard {
    epoch: Epoch,
    token: CancellationToken,
    task: Option<JoinHandle<EpochPhase>>,
    outcome: Option<EpochPhase>,
}

impl RenderGuard {
    pub fn spawn<E>(
        pipeline: RenderPipeline<E>,
        handle: Arc<DocumentHandle>,
        surfaces: SurfaceSet,
        events: EventSink,
    ) -> Self
    where
        E: PdfEngine + Send + 'static,
    {
        let epoch = handle.epoch();
        let token = pipeline.begin_epoch(epoch);
        let run_token = token.clone();
        let task = tokio::spawn(async move {
            pipeline.run_with_token(&handle, &surfaces, &events, &run_token).await
        });

        Self { epoch, token, task: Some(task), outcome: None }
    }

    pub fn epoch(&self) -> Epoch {
        self.epoch
    }

    /// Wait for the run to settle without cancelling it.
    pub async fn wait(&mut self) -> EpochPhase {
        if let Some(task) = self.task.take() {
            let phase = match task.await {
                Ok(phase) => phase,
                Err(err) => {
                    tracing::warn!(epoch = %self.epoch, error = %err, "render task did not finish");
                    EpochPhase::Cancelled
                }
            };
            self.outcome = Some(phase);
        }

        self.outcome.unwrap_or(EpochPhase::Cancelled)
    }

    /// Cancel the run and wait until it has stopped.
    pub async fn release(mut self) -> EpochPhase {
        self.token.cancel();
        self.wait().await
    }
}

impl Drop for RenderGuard {
    fn drop(&mut self) {
        self.token.cancel();
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{drain, open, shared_engine, FlakyEngine};
    use crate::PanelEvent;
    use doc_model::PanelSide;
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    fn sink() -> (EventSink, UnboundedReceiver<PanelEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (EventSink::new(PanelSide::Left, tx), rx)
    }

    fn kinds(rx: &mut UnboundedReceiver<PanelEvent>) -> Vec<PanelEventKind> {
        drain(rx).into_iter().map(|event| event.kind).collect()
    }

    fn rendered(pages: impl IntoIterator<Item = u32>) -> Vec<PanelEventKind> {
        pages.into_iter().map(|page| PanelEventKind::PageRendered { page }).collect()
    }

    #[tokio::test]
    async fn completes_pages_in_order() {
        let engine = shared_engine();
        let (_dir, handle, _loader) = open(engine.clone(), 4).await;
        let surfaces = SurfaceSet::new();
        surfaces.reset(Some(handle.epoch()));
        let (events, mut rx) = sink();
        let pipeline = RenderPipeline::new(engine, 0.25, 32);

        let phase = pipeline.run(&handle, &surfaces, &events).await;

        assert_eq!(phase, EpochPhase::Ready);
        assert_eq!(pipeline.phase(), EpochPhase::Ready);
        assert_eq!(pipeline.completed_pages(), vec![1, 2, 3, 4]);
        assert_eq!(kinds(&mut rx), rendered(1..=4));
        assert_eq!(surfaces.pages(), vec![1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn rerun_skips_completed_pages() {
        let engine = shared_engine();
        let (_dir, handle, _loader) = open(engine.clone(), 2).await;
        let surfaces = SurfaceSet::new();
        surfaces.reset(Some(handle.epoch()));
        let (events, mut rx) = sink();
        let pipeline = RenderPipeline::new(engine, 0.25, 64);

        pipeline.run(&handle, &surfaces, &events).await;
        drain(&mut rx);
        let phase = pipeline.run(&handle, &surfaces, &events).await;

        assert_eq!(phase, EpochPhase::Ready);
        assert!(kinds(&mut rx).is_empty(), "nothing is rendered twice");
    }

    #[tokio::test]
    async fn cancel_after_first_page_stops_the_epoch() {
        let engine = shared_engine();
        let (_dir, handle, _loader) = open(engine.clone(), 5).await;
        let surfaces = SurfaceSet::new();
        surfaces.reset(Some(handle.epoch()));
        let (events, mut rx) = sink();
        let pipeline = RenderPipeline::new(engine, 0.25, 16);
        let token = pipeline.begin_epoch(handle.epoch());

        let cancel_after_first = async {
            while pipeline.completed_pages().is_empty() {
                tokio::task::yield_now().await;
            }
            pipeline.cancel();
        };
        let (phase, ()) = tokio::join!(
            pipeline.run_with_token(&handle, &surfaces, &events, &token),
            cancel_after_first
        );

        assert_eq!(phase, EpochPhase::Cancelled);
        assert_eq!(pipeline.phase(), EpochPhase::Cancelled);
        assert_eq!(pipeline.completed_pages(), vec![1]);
        assert_eq!(
            kinds(&mut rx),
            vec![
                PanelEventKind::PageRendered { page: 1 },
                PanelEventKind::RenderCancelled { page: 2 }
            ]
        );
        assert!(surfaces.page(3).is_none(), "no surface past the cancelled page");
        let page = |page| pipeline.page_state(PageKey { epoch: handle.epoch(), page });
        assert_eq!(page(1), TaskState::Completed);
        assert_eq!(page(2), TaskState::Cancelled);
        assert_eq!(page(3), TaskState::Pending);
    }

    #[tokio::test]
    async fn run_after_cancel_resumes_with_fresh_token() {
        let engine = shared_engine();
        let (_dir, handle, _loader) = open(engine.clone(), 2).await;
        let surfaces = SurfaceSet::new();
        surfaces.reset(Some(handle.epoch()));
        let (events, _rx) = sink();
        let pipeline = RenderPipeline::new(engine, 0.25, 64);

        pipeline.begin_epoch(handle.epoch());
        pipeline.cancel();
        let phase = pipeline.run(&handle, &surfaces, &events).await;

        assert_eq!(phase, EpochPhase::Ready);
    }

    #[tokio::test]
    async fn render_failure_halts_the_epoch() {
        let engine = Arc::new(Mutex::new(FlakyEngine::failing_on(2)));
        let (_dir, handle, _loader) = open(engine.clone(), 3).await;
        let surfaces = SurfaceSet::new();
        surfaces.reset(Some(handle.epoch()));
        let (events, mut rx) = sink();
        let pipeline = RenderPipeline::new(engine, 0.25, 64);

        let phase = pipeline.run(&handle, &surfaces, &events).await;

        assert_eq!(phase, EpochPhase::Failed);
        assert_eq!(pipeline.completed_pages(), vec![1]);
        assert!(pipeline.error().is_some_and(|message| message.contains("page 2")));
        let kinds = kinds(&mut rx);
        assert_eq!(kinds.len(), 2);
        assert_eq!(kinds[0], PanelEventKind::PageRendered { page: 1 });
        assert!(matches!(kinds[1], PanelEventKind::Error { kind: ErrorKind::Render, .. }));
        let failed = PageKey { epoch: handle.epoch(), page: 2 };
        assert_eq!(pipeline.page_state(failed), TaskState::Pending, "failed page can be retried");
    }

    #[tokio::test]
    async fn new_epoch_clears_page_set() {
        let engine = shared_engine();
        let (_dir, first, mut loader) = open(engine.clone(), 2).await;
        let surfaces = SurfaceSet::new();
        surfaces.reset(Some(first.epoch()));
        let (events, _rx) = sink();
        let pipeline = RenderPipeline::new(engine, 0.25, 64);
        pipeline.run(&first, &surfaces, &events).await;

        let second = loader.open(first.path()).await.expect("reopen");
        let old_token = pipeline.tokens.get(first.epoch()).expect("token");
        pipeline.begin_epoch(second.epoch());

        assert!(old_token.is_cancelled());
        assert_eq!(pipeline.epoch(), Some(second.epoch()));
        assert_eq!(pipeline.phase(), EpochPhase::Loading);
        assert!(pipeline.completed_pages().is_empty());
        let old_page = PageKey { epoch: first.epoch(), page: 1 };
        assert_eq!(pipeline.page_state(old_page), TaskState::Pending);
    }

    #[tokio::test]
    async fn guard_release_drains_the_run() {
        let engine = shared_engine();
        let (_dir, handle, _loader) = open(engine.clone(), 6).await;
        let surfaces = SurfaceSet::new();
        surfaces.reset(Some(handle.epoch()));
        let (events, _rx) = sink();
        let pipeline = RenderPipeline::new(engine, 1.0, 8);

        let guard =
            RenderGuard::spawn(pipeline.clone(), Arc::new(handle), surfaces.clone(), events);
        let phase = guard.release().await;

        assert_eq!(phase, EpochPhase::Cancelled);
        let settled = surfaces.pages();
        tokio::task::yield_now().await;
        assert_eq!(surfaces.pages(), settled, "no writes after release");
        assert!(pipeline.completed_pages().len() < 6);
    }

    #[tokio::test]
    async fn guard_wait_runs_to_completion() {
        let engine = shared_engine();
        let (_dir, handle, _loader) = open(engine.clone(), 2).await;
        let surfaces = SurfaceSet::new();
        surfaces.reset(Some(handle.epoch()));
        let (events, _rx) = sink();
        let pipeline = RenderPipeline::new(engine, 0.25, 64);

        let mut guard = RenderGuard::spawn(pipeline.clone(), Arc::new(handle), surfaces, events);

        assert_eq!(guard.wait().await, EpochPhase::Ready);
        assert_eq!(guard.wait().await, EpochPhase::Ready);
        assert_eq!(pipeline.completed_pages(), vec![1, 2]);
    }
}
