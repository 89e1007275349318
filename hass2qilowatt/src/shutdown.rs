use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::time::Duration;

/// Owner side: cancelling (or dropping) it wakes the token immediately.
pub(crate) struct CancelHandle {
    sender: Option<Sender<()>>,
}

/// Worker side: a sleep that ends early once cancelled.
pub(crate) struct CancellationToken {
    receiver: Receiver<()>,
}

pub(crate) fn cancellation() -> (CancelHandle, CancellationToken) {
    let (sender, receiver) = mpsc::channel();
    (
        CancelHandle {
            sender: Some(sender),
        },
        CancellationToken { receiver },
    )
}

impl CancelHandle {
    pub(crate) fn cancel(&mut self) {
        self.sender.take();
    }
}

impl CancellationToken {
    /// Sleeps for `timeout`. Returns `true` if cancelled before or during it.
    pub(crate) fn sleep(&self, timeout: Duration) -> bool {
        !matches!(
            self.receiver.recv_timeout(timeout),
            Err(RecvTimeoutError::Timeout)
        )
    }
}
