// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The event dispatcher.
//!
//! The dispatcher forwards events from rerun tasks to the callback, and turns signals and the
//! global timeout into cancellation requests.

use crate::{
    model::TestId,
    reporter::events::{CancelReason, RerunEvent, RerunEventKind},
    signal::SignalHandler,
};
use chrono::Local;
use debug_ignore::DebugIgnore;
use std::{collections::HashSet, future, time::Duration};
use tokio::{
    sync::{mpsc::UnboundedReceiver, watch},
    time::Instant,
};
use tracing::{debug, warn};

#[derive(Debug)]
pub(super) struct DispatcherContext<F> {
    callback: DebugIgnore<F>,
    stopwatch: Instant,
    running: HashSet<TestId>,
    cancel_reported: bool,
}

impl<F> DispatcherContext<F>
where
    F: FnMut(RerunEvent) + Send,
{
    pub(super) fn new(callback: F) -> Self {
        Self {
            callback: DebugIgnore(callback),
            stopwatch: Instant::now(),
            running: HashSet::new(),
            cancel_reported: false,
        }
    }

    /// Runs the dispatcher until all rerun tasks have dropped their senders.
    pub(super) async fn run(
        &mut self,
        mut event_rx: UnboundedReceiver<RerunEventKind>,
        signal_handler: &mut SignalHandler,
        cancel_tx: &watch::Sender<Option<CancelReason>>,
        global_timeout: Option<Duration>,
    ) {
        let mut cancel_rx = cancel_tx.subscribe();
        // A cancellation requested before the run started isn't seen by changed().
        let initial = *cancel_rx.borrow_and_update();
        if let Some(reason) = initial {
            self.begin_cancel(reason);
        }

        let timeout_fut = async move {
            match global_timeout {
                Some(timeout) => tokio::time::sleep(timeout).await,
                None => future::pending().await,
            }
        };
        let mut timeout_fut = std::pin::pin!(timeout_fut);

        let mut signals_done = false;
        let mut timeout_done = false;
        let mut cancel_done = self.cancel_reported;

        loop {
            tokio::select! {
                biased;

                reason = signal_handler.recv(), if !signals_done => {
                    match reason {
                        Some(reason) => {
                            debug!(reason = reason.to_static_str(), "received signal");
                            request_cancel(cancel_tx, reason);
                        }
                        None => signals_done = true,
                    }
                }
                () = &mut timeout_fut, if !timeout_done => {
                    timeout_done = true;
                    warn!("global timeout reached, not starting any more reruns");
                    request_cancel(cancel_tx, CancelReason::GlobalTimeout);
                }
                res = cancel_rx.changed(), if !cancel_done => {
                    if res.is_err() {
                        // The sender is owned by the runner, so this only happens at shutdown.
                        cancel_done = true;
                        continue;
                    }
                    let reason = *cancel_rx.borrow_and_update();
                    if let Some(reason) = reason {
                        cancel_done = true;
                        self.begin_cancel(reason);
                    }
                }
                event = event_rx.recv() => {
                    match event {
                        Some(kind) => self.handle_event(kind),
                        // All rerun tasks have finished.
                        None => break,
                    }
                }
            }
        }
    }

    /// Sends an event to the callback, stamping it with the current time.
    pub(super) fn emit(&mut self, kind: RerunEventKind) {
        (self.callback.0)(RerunEvent {
            timestamp: Local::now().fixed_offset(),
            elapsed: self.stopwatch.elapsed(),
            kind,
        });
    }

    fn handle_event(&mut self, kind: RerunEventKind) {
        match &kind {
            RerunEventKind::PolicyResolved { test_id, .. } => {
                self.running.insert(test_id.clone());
            }
            RerunEventKind::TestFinished { verdict, .. } => {
                self.running.remove(verdict.test_id());
            }
            _ => {}
        }
        self.emit(kind);
    }

    fn begin_cancel(&mut self, reason: CancelReason) {
        if self.cancel_reported {
            return;
        }
        self.cancel_reported = true;
        let running = self.running.len();
        debug!(reason = reason.to_static_str(), running, "cancelling run");
        self.emit(RerunEventKind::RunBeginCancel { reason, running });
    }
}

/// Records a cancellation reason. The first reason wins.
pub(super) fn request_cancel(cancel_tx: &watch::Sender<Option<CancelReason>>, reason: CancelReason) {
    cancel_tx.send_if_modified(|current| {
        if current.is_some() {
            false
        } else {
            *current = Some(reason);
            true
        }
    });
}
