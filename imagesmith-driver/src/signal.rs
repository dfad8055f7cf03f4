//! Single-shot completion signals and value streams.
//!
//! Every asynchronous driver operation hands back a [`Completion`]: it
//! delivers at most one error and then closes, and closing without an error
//! means success. Create operations pair it with a [`ValueStream`] carrying
//! at most one created value.
//!
//! Both are built on `tokio::sync::oneshot`, so a dropped receiver never
//! holds more than one buffered item.
//!
//! # Cancel Safety
//! Dropping a signal abandons the operation's outcome; the producer's send
//! then fails silently.

use std::fmt;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use uuid::Uuid;

use crate::DriverError;

/// Identity of a signal, shared by its sending and receiving halves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SignalId(Uuid);

impl SignalId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SignalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug)]
enum CompletionState {
    Pending(oneshot::Receiver<DriverError>),
    Settled(Result<(), DriverError>),
}

/// Receiving half of a completion signal.
#[derive(Debug)]
pub struct Completion {
    id: SignalId,
    state: CompletionState,
}

/// Sending half of a completion signal. Consuming methods make a second
/// outcome impossible; dropping it closes the signal successfully.
#[derive(Debug)]
pub struct CompletionSender {
    id: SignalId,
    tx: oneshot::Sender<DriverError>,
}

impl Completion {
    /// Create a connected sender/receiver pair.
    #[must_use]
    pub fn channel() -> (CompletionSender, Completion) {
        let id = SignalId::new();
        let (tx, rx) = oneshot::channel();
        (
            CompletionSender { id, tx },
            Completion { id, state: CompletionState::Pending(rx) },
        )
    }

    /// A signal that is already closed without an error.
    #[must_use]
    pub fn succeeded() -> Self {
        let (tx, rx) = Self::channel();
        tx.succeed();
        rx
    }

    /// A signal that has already delivered `err`.
    #[must_use]
    pub fn failed(err: DriverError) -> Self {
        let (tx, rx) = Self::channel();
        tx.fail(err);
        rx
    }

    #[must_use]
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Wait for the signal to close.
    ///
    /// # Errors
    /// Returns the error the operation delivered, if any.
    pub async fn wait(self) -> Result<(), DriverError> {
        match self.state {
            CompletionState::Settled(outcome) => outcome,
            CompletionState::Pending(rx) => match rx.await {
                Ok(err) => Err(err),
                Err(_closed) => Ok(()),
            },
        }
    }

    /// Non-blocking check. `None` while the operation is still running.
    pub fn try_wait(&mut self) -> Option<Result<(), DriverError>> {
        if let CompletionState::Pending(rx) = &mut self.state {
            let outcome = match rx.try_recv() {
                Ok(err) => Err(err),
                Err(TryRecvError::Closed) => Ok(()),
                Err(TryRecvError::Empty) => return None,
            };
            self.state = CompletionState::Settled(outcome);
        }
        match &self.state {
            CompletionState::Settled(outcome) => Some(outcome.clone()),
            CompletionState::Pending(_) => None,
        }
    }

    /// Wait at most `after` for the signal to close.
    ///
    /// # Errors
    /// Returns [`DriverError::Timeout`] if the deadline passes first, or the
    /// error the operation delivered.
    pub async fn wait_timeout(self, after: Duration) -> Result<(), DriverError> {
        let id = self.id;
        tokio::time::timeout(after, self.wait())
            .await
            .map_err(|_| DriverError::Timeout { operation: format!("signal {id}"), after })?
    }
}

impl CompletionSender {
    #[must_use]
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Close the signal without an error.
    pub fn succeed(self) {
        drop(self);
    }

    /// Deliver `err` and close the signal.
    pub fn fail(self, err: DriverError) {
        if self.tx.send(err).is_err() {
            tracing::debug!(signal = %self.id, "completion abandoned before failure was delivered");
        }
    }
}

/// Receiving half of a single-value stream.
#[derive(Debug)]
pub struct ValueStream<T> {
    id: SignalId,
    rx: Option<oneshot::Receiver<T>>,
}

/// Sending half of a single-value stream. `send` consumes it, so a stream
/// never yields more than one value.
#[derive(Debug)]
pub struct ValueSender<T> {
    id: SignalId,
    tx: oneshot::Sender<T>,
}

impl<T> ValueStream<T> {
    /// Create a connected sender/receiver pair.
    #[must_use]
    pub fn channel() -> (ValueSender<T>, ValueStream<T>) {
        let id = SignalId::new();
        let (tx, rx) = oneshot::channel();
        (ValueSender { id, tx }, ValueStream { id, rx: Some(rx) })
    }

    /// A stream holding `value`, already closed behind it.
    #[must_use]
    pub fn ready(value: T) -> Self {
        let (tx, rx) = Self::channel();
        tx.send(value);
        rx
    }

    /// A stream that is closed without ever yielding.
    #[must_use]
    pub fn empty() -> Self {
        let (tx, rx) = Self::channel();
        drop(tx);
        rx
    }

    #[must_use]
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Next value, or `None` once the stream is closed.
    pub async fn next(&mut self) -> Option<T> {
        let rx = self.rx.take()?;
        rx.await.ok()
    }

    /// The one value this stream must yield.
    ///
    /// # Errors
    /// Returns [`DriverError::ProtocolViolation`] if the stream closes empty.
    pub async fn single(mut self) -> Result<T, DriverError> {
        let id = self.id;
        self.next().await.ok_or_else(|| {
            DriverError::ProtocolViolation(format!("value stream {id} closed without a value"))
        })
    }
}

impl<T> ValueSender<T> {
    #[must_use]
    pub fn id(&self) -> SignalId {
        self.id
    }

    /// Yield `value` and close the stream.
    pub fn send(self, value: T) {
        if self.tx.send(value).is_err() {
            tracing::debug!(signal = %self.id, "value stream abandoned before value was delivered");
        }
    }
}

/// The value-plus-completion pair returned by operations that produce a
/// resource.
#[derive(Debug)]
pub struct PendingValue<T> {
    pub values: ValueStream<T>,
    pub completion: Completion,
}

impl<T> PendingValue<T> {
    #[must_use]
    pub fn new(values: ValueStream<T>, completion: Completion) -> Self {
        Self { values, completion }
    }

    /// Already finished with `value`.
    #[must_use]
    pub fn ready(value: T) -> Self {
        Self::new(ValueStream::ready(value), Completion::succeeded())
    }

    /// Already finished with `err` and no value.
    #[must_use]
    pub fn failed(err: DriverError) -> Self {
        Self::new(ValueStream::empty(), Completion::failed(err))
    }

    /// Wait for completion, then take the produced value.
    ///
    /// # Errors
    /// Returns the completion error, or [`DriverError::ProtocolViolation`]
    /// when a successful operation produced no value.
    pub async fn resolve(self) -> Result<T, DriverError> {
        self.completion.wait().await?;
        self.values.single().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dropped_sender_means_success() {
        let (tx, rx) = Completion::channel();
        drop(tx);
        assert_eq!(rx.wait().await, Ok(()));
    }

    #[tokio::test]
    async fn failed_signal_delivers_its_error() {
        let err = DriverError::Rejected("quota".to_owned());
        assert_eq!(Completion::failed(err.clone()).wait().await, Err(err));
    }

    #[tokio::test]
    async fn halves_share_identity() {
        let (tx, rx) = Completion::channel();
        assert_eq!(tx.id(), rx.id());
        let (vtx, vrx) = ValueStream::<u8>::channel();
        assert_eq!(vtx.id(), vrx.id());
        assert_ne!(rx.id(), vrx.id());
    }

    #[test]
    fn try_wait_settles_once() {
        let (tx, mut rx) = Completion::channel();
        assert_eq!(rx.try_wait(), None, "open signal must not report an outcome");
        tx.fail(DriverError::Transport("reset".to_owned()));
        let first = rx.try_wait();
        assert!(matches!(first, Some(Err(DriverError::Transport(_)))));
        assert_eq!(rx.try_wait(), first, "a settled signal keeps its outcome");
    }

    #[tokio::test]
    async fn wait_after_try_wait_returns_settled_outcome() {
        let mut rx = Completion::failed(DriverError::PasswordNotRetrieved);
        assert!(rx.try_wait().is_some());
        assert_eq!(rx.wait().await, Err(DriverError::PasswordNotRetrieved));
    }

    #[tokio::test]
    async fn open_signal_times_out() {
        let (_tx, rx) = Completion::channel();
        let result = rx.wait_timeout(Duration::from_millis(10)).await;
        assert!(matches!(result, Err(DriverError::Timeout { .. })), "got {result:?}");
    }

    #[tokio::test]
    async fn value_stream_yields_once_then_closes() {
        let mut stream = ValueStream::ready(7u32);
        assert_eq!(stream.next().await, Some(7));
        assert_eq!(stream.next().await, None);
    }

    #[tokio::test]
    async fn empty_stream_is_protocol_violation() {
        let result = ValueStream::<u32>::empty().single().await;
        assert!(matches!(result, Err(DriverError::ProtocolViolation(_))));
    }

    #[tokio::test]
    async fn pending_value_prefers_completion_error() {
        let err = DriverError::failed("create disk", "quota exceeded");
        let result = PendingValue::<u32>::failed(err.clone()).resolve().await;
        assert_eq!(result, Err(err));
        assert_eq!(PendingValue::ready("disk").resolve().await, Ok("disk"));
    }

    #[tokio::test]
    async fn sending_to_dropped_receiver_is_harmless() {
        let (tx, rx) = Completion::channel();
        drop(rx);
        tx.fail(DriverError::Transport("late".to_owned()));
        let (vtx, vrx) = ValueStream::channel();
        drop(vrx);
        vtx.send(1u8);
    }
}
