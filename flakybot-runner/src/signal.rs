// Copyright (c) The flakybot Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Turns interrupt and termination signals into cancellation requests.

use crate::{errors::SignalHandlerSetupError, reporter::events::CancelReason};
use debug_ignore::DebugIgnore;
use futures::stream::{self, BoxStream, StreamExt};

/// The kind of signal handling to set up for a run.
///
/// A `SignalHandlerKind` can be passed into
/// [`RerunRunnerBuilder::build`](crate::runner::RerunRunnerBuilder::build).
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub enum SignalHandlerKind {
    /// Cancel the run on Ctrl-C, and on Unix on SIGTERM and SIGHUP as well.
    Standard,

    /// Ignore signals. Useful for tests.
    Noop,
}

impl SignalHandlerKind {
    /// Must be called from within a Tokio runtime.
    pub(crate) fn build(self) -> Result<SignalHandler, SignalHandlerSetupError> {
        let reasons = match self {
            Self::Standard => imp::cancel_reasons()?,
            Self::Noop => stream::empty().boxed(),
        };
        Ok(SignalHandler {
            reasons: DebugIgnore(reasons),
        })
    }
}

/// A stream of cancellation reasons, one per signal received.
#[derive(Debug)]
pub(crate) struct SignalHandler {
    reasons: DebugIgnore<BoxStream<'static, CancelReason>>,
}

impl SignalHandler {
    /// Waits for the next signal and returns the cancellation it requests.
    ///
    /// Returns `None` once no more signals can be received.
    pub(crate) async fn recv(&mut self) -> Option<CancelReason> {
        self.reasons.next().await
    }
}

#[cfg(unix)]
mod imp {
    use super::*;
    use tokio::signal::unix::{SignalKind, signal};

    pub(super) fn cancel_reasons() -> std::io::Result<BoxStream<'static, CancelReason>> {
        let handled = [
            (SignalKind::interrupt(), CancelReason::Interrupt),
            (SignalKind::terminate(), CancelReason::Signal),
            (SignalKind::hangup(), CancelReason::Signal),
        ];

        let mut streams = Vec::with_capacity(handled.len());
        for (kind, reason) in handled {
            let signal = signal(kind)?;
            let reasons = stream::unfold(signal, move |mut signal| async move {
                signal.recv().await.map(|()| (reason, signal))
            });
            streams.push(reasons.boxed());
        }

        Ok(stream::select_all(streams).boxed())
    }
}

#[cfg(windows)]
mod imp {
    use super::*;
    use tokio::signal::windows::ctrl_c;

    pub(super) fn cancel_reasons() -> std::io::Result<BoxStream<'static, CancelReason>> {
        let ctrl_c = ctrl_c()?;
        let reasons = stream::unfold(ctrl_c, |mut ctrl_c| async move {
            ctrl_c
                .recv()
                .await
                .map(|()| (CancelReason::Interrupt, ctrl_c))
        });
        Ok(reasons.boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn noop_never_cancels() {
        let mut handler = SignalHandlerKind::Noop.build().expect("noop handler built");
        assert_eq!(handler.recv().await, None);
    }

    #[tokio::test]
    async fn standard_waits_for_signals() {
        let mut handler = SignalHandlerKind::Standard
            .build()
            .expect("standard handler built");
        let next = tokio::time::timeout(std::time::Duration::from_millis(10), handler.recv()).await;
        assert!(next.is_err(), "no signal was sent: {next:?}");
    }
}
