use crate::run::{capture_viewport_only, run_capture, FinalCapture};
use crate::{cdp, CancelHandle, CaptureOptions, Error, Result, RunContext, Selection};
use std::sync::mpsc::{self, Sender};
use std::thread;
use tokio::sync::oneshot;

enum Command {
    Capture(CaptureOptions, oneshot::Sender<Result<Option<FinalCapture>>>),
    CaptureViewport(
        CaptureOptions,
        Option<Selection>,
        oneshot::Sender<Result<FinalCapture>>,
    ),
    SelectArea(oneshot::Sender<Result<Option<Selection>>>),
    Close(oneshot::Sender<Result<()>>),
}

/// An async-friendly capture session backed by a dedicated worker thread.
///
/// The worker thread owns a synchronous `CdpBridge` instance and executes
/// commands sent from async tasks so callers can use an async interface
/// without requiring the bridge to be `Send` across threads.
///
/// Cancellation deliberately does not go through the command channel: the
/// worker is busy inside a run when a cancel matters, so [`Session::cancel`]
/// flips a shared flag the run observes at its next step boundary.
#[derive(Clone)]
pub struct Session {
    cmd_tx: Sender<Command>,
    cancel: CancelHandle,
}

impl Session {
    /// Attach to a page (spawns a background thread that owns the bridge).
    pub async fn connect(url: &str) -> Result<Self> {
        let url = url.to_string();

        let (cmd_tx, cmd_rx) = mpsc::channel::<Command>();
        let (init_tx, init_rx): (
            oneshot::Sender<Result<CancelHandle>>,
            oneshot::Receiver<Result<CancelHandle>>,
        ) = oneshot::channel();

        thread::spawn(move || {
            // Initialize the bridge on the worker thread
            let mut bridge = match cdp::CdpBridge::launch(&url) {
                Ok(b) => b,
                Err(err) => {
                    let _ = init_tx.send(Err(err));
                    return;
                }
            };

            let ctx = RunContext::new();
            let _ = init_tx.send(Ok(ctx.cancel_handle()));

            // Command loop
            while let Ok(cmd) = cmd_rx.recv() {
                match cmd {
                    Command::Capture(options, resp) => {
                        ctx.reset();
                        let res = run_capture(&mut bridge, &ctx, &options);
                        let _ = resp.send(res);
                    }
                    Command::CaptureViewport(options, selection, resp) => {
                        ctx.reset();
                        let res =
                            capture_viewport_only(&mut bridge, &ctx, selection.as_ref(), &options);
                        let _ = resp.send(res);
                    }
                    Command::SelectArea(resp) => {
                        let res = crate::bridge::PageBridge::select_area_once(&mut bridge);
                        let _ = resp.send(res);
                    }
                    Command::Close(resp) => {
                        let res = bridge.close();
                        let _ = resp.send(res);
                        break;
                    }
                }
            }
        });

        // Wait for the worker to report initialization success or failure
        let cancel = init_rx
            .await
            .map_err(|e| Error::Other(format!("Worker init canceled: {}", e)))??;

        Ok(Self { cmd_tx, cancel })
    }

    /// Run a full-page capture with the given options.
    pub async fn capture(&self, options: CaptureOptions) -> Result<Option<FinalCapture>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Capture(options, tx));
        rx.await
            .map_err(|e| Error::Other(format!("Capture canceled: {}", e)))?
    }

    /// Capture only the visible viewport, optionally cropped to `selection`.
    pub async fn capture_viewport(
        &self,
        options: CaptureOptions,
        selection: Option<Selection>,
    ) -> Result<FinalCapture> {
        let (tx, rx) = oneshot::channel();
        let _ = self
            .cmd_tx
            .send(Command::CaptureViewport(options, selection, tx));
        rx.await
            .map_err(|e| Error::Other(format!("CaptureViewport canceled: {}", e)))?
    }

    /// Ask the page for an interactive rectangle selection.
    pub async fn select_area(&self) -> Result<Option<Selection>> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::SelectArea(tx));
        rx.await
            .map_err(|e| Error::Other(format!("SelectArea canceled: {}", e)))?
    }

    /// Request cancellation of the run in progress. Takes effect at the next
    /// step boundary; the partial result is returned by the pending
    /// `capture` call.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// The shared cancel flag, for wiring into signal handlers.
    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Shut down the background worker and close the page.
    pub async fn close(self) -> Result<()> {
        let (tx, rx) = oneshot::channel();
        let _ = self.cmd_tx.send(Command::Close(tx));
        rx.await
            .map_err(|e| Error::Other(format!("Close canceled: {}", e)))?
    }
}
