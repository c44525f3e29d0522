// Signal channel between a controller and one worker instance

use tokio_util::sync::CancellationToken;

/// Instruction delivered to a running worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Signal {
    Cancel,
    Pause,
}

/// Two single-shot signals (cancel, pause) owned by one worker instance
///
/// Sending never blocks and may happen any number of times, including after
/// the worker has exited. A fresh channel is created for every worker start.
#[derive(Debug, Clone, Default)]
pub struct SignalChannel {
    cancel: CancellationToken,
    pause: CancellationToken,
}

impl SignalChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise a signal, returning `true` if it was not raised before
    pub fn send(&self, signal: Signal) -> bool {
        let token = match signal {
            Signal::Cancel => &self.cancel,
            Signal::Pause => &self.pause,
        };
        let first = !token.is_cancelled();
        token.cancel();
        first
    }

    pub fn request_cancel(&self) -> bool {
        self.send(Signal::Cancel)
    }

    pub fn request_pause(&self) -> bool {
        self.send(Signal::Pause)
    }

    /// Non-blocking check; cancel wins over pause
    pub fn try_recv(&self) -> Option<Signal> {
        if self.cancel.is_cancelled() {
            Some(Signal::Cancel)
        } else if self.pause.is_cancelled() {
            Some(Signal::Pause)
        } else {
            None
        }
    }

    /// Wait until either signal is raised; cancel wins over pause
    pub async fn recv(&self) -> Signal {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Signal::Cancel,
            _ = self.pause.cancelled() => Signal::Pause,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_signals_are_idempotent() {
        let signals = SignalChannel::new();
        assert_eq!(signals.try_recv(), None);

        assert!(signals.request_pause());
        assert!(!signals.request_pause());
        assert_eq!(signals.try_recv(), Some(Signal::Pause));

        assert!(signals.request_cancel());
        assert!(!signals.request_cancel());
        assert_eq!(signals.try_recv(), Some(Signal::Cancel));
    }

    #[tokio::test]
    async fn test_recv_wakes_on_send() {
        let signals = SignalChannel::new();
        let receiver = signals.clone();
        let waiter = tokio::spawn(async move { receiver.recv().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        signals.request_pause();
        assert_eq!(waiter.await.unwrap(), Signal::Pause);
    }

    #[tokio::test]
    async fn test_send_to_finished_worker_does_not_block() {
        let signals = SignalChannel::new();
        let receiver = signals.clone();
        tokio::spawn(async move { drop(receiver) }).await.unwrap();

        assert!(signals.request_cancel());
        assert!(signals.request_pause());
        assert_eq!(signals.recv().await, Signal::Cancel);
    }
}
