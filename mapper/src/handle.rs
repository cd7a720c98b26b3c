use crate::TaskError;
use futures::{
    channel::oneshot,
    future::BoxFuture,
    stream::{AbortHandle, Abortable},
    FutureExt as _,
};
use std::{
    any::Any,
    future::Future,
    panic::AssertUnwindSafe,
    pin::Pin,
    task::{Context, Poll},
};
use tracing::error;

/// Where the output of a task is read from.
enum Output<T> {
    /// The task runs elsewhere and sends its output over a channel.
    Spawned(oneshot::Receiver<Result<T, TaskError>>),
    /// The task is polled by whoever polls the handle.
    Inline(BoxFuture<'static, Result<T, TaskError>>),
}

/// Handle to a task started by a [`Spawner`](crate::Spawner).
///
/// Resolves to the task's output, to [`TaskError::Exited`] if the task panicked, or to
/// [`TaskError::Aborted`] if it was aborted before completing. Dropping the handle aborts the
/// task.
pub struct Handle<T>
where
    T: Send + 'static,
{
    aborter: AbortHandle,
    output: Output<T>,
}

impl<T> Handle<T>
where
    T: Send + 'static,
{
    /// Wraps `f` into a future that can be handed to an executor, returning it along with the
    /// [`Handle`] that will receive its output.
    pub(crate) fn init_future<F>(f: F) -> (impl Future<Output = ()> + Send + 'static, Self)
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (sender, receiver) = oneshot::channel();
        let (aborter, abort_registration) = AbortHandle::new_pair();

        // Wrap the future to handle panics
        let wrapped = async move {
            let result = AssertUnwindSafe(f).catch_unwind().await.map_err(panicked);
            let _ = sender.send(result);
        };

        // An aborted task drops the sender, which the receiver observes as cancellation
        let abortable = Abortable::new(wrapped, abort_registration).map(|_| ());
        (
            abortable,
            Self {
                aborter,
                output: Output::Spawned(receiver),
            },
        )
    }

    /// Wraps `f` into a [`Handle`] that polls it directly.
    pub(crate) fn init_inline<F>(f: F) -> Self
    where
        F: Future<Output = T> + Send + 'static,
    {
        let (aborter, abort_registration) = AbortHandle::new_pair();
        let wrapped = Abortable::new(AssertUnwindSafe(f).catch_unwind(), abort_registration)
            .map(|result| match result {
                Ok(result) => result.map_err(panicked),
                Err(_) => Err(TaskError::Aborted),
            });
        Self {
            aborter,
            output: Output::Inline(wrapped.boxed()),
        }
    }

    /// Abort the task.
    ///
    /// A task that already completed is unaffected; awaiting the handle of a task that had
    /// not completed yields [`TaskError::Aborted`].
    pub fn abort(&self) {
        self.aborter.abort();
    }
}

impl<T> Drop for Handle<T>
where
    T: Send + 'static,
{
    fn drop(&mut self) {
        self.aborter.abort();
    }
}

impl<T> Future for Handle<T>
where
    T: Send + 'static,
{
    type Output = Result<T, TaskError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().output {
            Output::Spawned(receiver) => match receiver.poll_unpin(cx) {
                Poll::Ready(Ok(result)) => Poll::Ready(result),
                Poll::Ready(Err(_)) => Poll::Ready(Err(TaskError::Aborted)),
                Poll::Pending => Poll::Pending,
            },
            Output::Inline(future) => future.poll_unpin(cx),
        }
    }
}

/// Logs the payload of a caught panic.
fn panicked(err: Box<dyn Any + Send>) -> TaskError {
    let err = extract_panic_message(&*err);
    error!(?err, "task panicked");
    TaskError::Exited
}

fn extract_panic_message(err: &(dyn Any + Send)) -> String {
    if let Some(s) = err.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = err.downcast_ref::<String>() {
        s.clone()
    } else {
        format!("{err:?}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{reschedule, traced};
    use futures::{channel::oneshot, executor::block_on, future::pending};

    #[test]
    fn inline_handle_resolves() {
        let handle = Handle::init_inline(async { 42 });
        assert_eq!(block_on(handle), Ok(42));
    }

    #[test]
    fn inline_handle_catches_panic() {
        traced();
        let handle = Handle::init_inline(async {
            reschedule().await;
            panic!("boom");
        });
        assert_eq!(block_on(handle), Err::<(), _>(TaskError::Exited));
    }

    #[test]
    fn inline_handle_abort() {
        let handle = Handle::init_inline(pending::<()>());
        handle.abort();
        assert_eq!(block_on(handle), Err(TaskError::Aborted));
    }

    #[test]
    fn spawned_handle_resolves() {
        let (task, handle) = Handle::init_future(async { "done" });
        block_on(task);
        assert_eq!(block_on(handle), Ok("done"));
    }

    #[test]
    fn spawned_handle_abort_before_run() {
        let (task, handle) = Handle::init_future(async { "never" });
        handle.abort();
        block_on(task);
        assert_eq!(block_on(handle), Err(TaskError::Aborted));
    }

    #[test]
    fn dropping_handle_aborts_task() {
        let (sender, receiver) = oneshot::channel::<()>();
        let (task, handle) = Handle::init_future(async move {
            // Keep the sender alive until the task is dropped
            pending::<()>().await;
            drop(sender);
        });
        drop(handle);
        block_on(task);

        // The task future completed without running to the end, dropping the sender
        assert!(block_on(receiver).is_err());
    }
}
