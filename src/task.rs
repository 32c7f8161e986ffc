//! Session task group and the logging context its tasks run in.

use std::future::Future;
use tokio::task::{AbortHandle, JoinSet};
use tracing::instrument::{Instrumented, WithDispatch, WithSubscriber};
use tracing::{info_span, Dispatch, Instrument, Span};

/// Logging sink of a session. With an explicit [`Dispatch`] every session
/// task logs there; otherwise tasks use the dispatcher current at spawn time.
#[derive(Clone, Default)]
pub(crate) struct LogContext {
    dispatch: Option<Dispatch>,
}

impl LogContext {
    pub fn new(dispatch: Option<Dispatch>) -> Self {
        Self { dispatch }
    }

    pub fn dispatch(&self) -> Dispatch {
        match &self.dispatch {
            Some(dispatch) => dispatch.clone(),
            None => tracing::dispatcher::get_default(Dispatch::clone),
        }
    }

    /// Builds a span under this context's dispatcher.
    pub fn span(&self, make: impl FnOnce() -> Span) -> Span {
        tracing::dispatcher::with_default(&self.dispatch(), make)
    }

    pub fn scope<F: Future>(&self, span: Span, future: F) -> WithDispatch<Instrumented<F>> {
        future.instrument(span).with_subscriber(self.dispatch())
    }
}

/// Fixed set of tasks owned by one session, cancelled as a unit.
pub(crate) struct TaskGroup {
    set: JoinSet<()>,
    log: LogContext,
    span: Span,
}

impl TaskGroup {
    pub fn new(log: LogContext, span: Span) -> Self {
        Self {
            set: JoinSet::new(),
            log,
            span,
        }
    }

    pub fn spawn<F>(&mut self, name: &'static str, task: F) -> AbortHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let parent = self.span.clone();
        let span = self.log.span(|| info_span!(parent: &parent, "task", name));
        self.set.spawn(self.log.scope(span, task))
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Aborts every task and waits until they are gone.
    pub async fn shutdown(&mut self) {
        self.set.shutdown().await;
    }
}
