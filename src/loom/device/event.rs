use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use instant::Instant;

use super::QueueError;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventId;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EventOptions {
    /// Records the instant the event is signaled.
    pub timing: bool,
}

#[derive(Debug, Default)]
struct EventState {
    occurred: bool,
    recorded_at: Option<Instant>,
    /// Completion senders of pending waits, drained by the signal.
    waiters: Vec<flume::Sender<()>>,
}

#[derive(Debug)]
struct EventInner {
    id: uid::Id<EventId>,
    options: EventOptions,
    state: Mutex<EventState>,
}

/// A one-shot completion token, signaled by a queue once the work recorded before it has run.
///
/// Clones refer to the same event.
#[derive(Debug, Clone)]
pub struct QueueEvent {
    inner: Arc<EventInner>,
}

impl QueueEvent {
    pub fn new(options: EventOptions) -> Self {
        let inner = EventInner {
            id: uid::Id::new(),
            options,
            state: Default::default(),
        };
        Self {
            inner: Arc::new(inner),
        }
    }

    #[inline]
    pub fn id(&self) -> uid::Id<EventId> {
        self.inner.id
    }

    #[inline]
    pub fn options(&self) -> EventOptions {
        self.inner.options
    }

    pub fn occurred(&self) -> bool {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .occurred
    }

    pub(crate) fn signal(&self) {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.occurred {
            return;
        }
        state.occurred = true;
        state.recorded_at = self.inner.options.timing.then(Instant::now);
        let waiters = std::mem::take(&mut state.waiters);
        drop(state);

        for sender in waiters {
            _ = sender.send(());
        }
    }

    /// Returns `None` if the event already occurred, or else a receiver completed by the signal.
    fn waiter(&self) -> Option<flume::Receiver<()>> {
        let mut state = self
            .inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if state.occurred {
            return None;
        }
        let (sender, receiver) = flume::bounded(1);
        state.waiters.push(sender);
        Some(receiver)
    }

    /// Blocks the calling thread until the event is signaled.
    pub fn wait(&self, timeout: Option<Duration>) -> Result<(), QueueError> {
        let Some(receiver) = self.waiter() else {
            return Ok(());
        };
        match timeout {
            None => receiver.recv().map_err(|_| QueueError::Disconnected),
            Some(timeout) => receiver.recv_timeout(timeout).map_err(|err| match err {
                flume::RecvTimeoutError::Timeout => QueueError::TimedOut(timeout),
                flume::RecvTimeoutError::Disconnected => QueueError::Disconnected,
            }),
        }
    }

    /// Completes once the event is signaled.
    pub async fn signaled(&self) {
        if let Some(receiver) = self.waiter() {
            _ = receiver.recv_async().await;
        }
    }

    /// Like [`QueueEvent::wait`] without blocking the thread.
    pub async fn wait_async(&self, timeout: Option<Duration>) -> Result<(), QueueError> {
        match timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.signaled())
                .await
                .map_err(|_| QueueError::TimedOut(timeout)),
            None => {
                self.signaled().await;
                Ok(())
            }
        }
    }

    /// The instant the event was signaled, if timing is enabled.
    pub fn recorded_at(&self) -> Option<Instant> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .recorded_at
    }

    /// Time between the signals of `earlier` and this event.
    pub fn elapsed_since(&self, earlier: &QueueEvent) -> Option<Duration> {
        let now = self.recorded_at()?;
        let earlier = earlier.recorded_at()?;
        Some(now.saturating_duration_since(earlier))
    }
}

#[cfg(test)]
mod tests {
    use std::{error::Error, time::Duration};

    use super::{EventOptions, QueueEvent};
    use crate::loom::device::QueueError;

    #[test]
    fn test_wait() -> Result<(), Box<dyn Error>> {
        let event = QueueEvent::new(Default::default());
        assert!(!event.occurred());
        let timeout = Duration::from_millis(10);
        assert!(matches!(
            event.wait(Some(timeout)),
            Err(QueueError::TimedOut(x)) if x == timeout
        ));

        let signal = event.clone();
        let handle = std::thread::spawn(move || signal.signal());
        event.wait(None)?;
        assert!(event.occurred());
        assert!(event.recorded_at().is_none());
        handle.join().unwrap();
        Ok(())
    }

    #[test]
    fn test_wait_many() -> Result<(), Box<dyn Error>> {
        let event = QueueEvent::new(Default::default());
        let handles = (0..4)
            .map(|_| {
                let event = event.clone();
                std::thread::spawn(move || event.wait(Some(Duration::from_secs(10))))
            })
            .collect::<Vec<_>>();
        std::thread::sleep(Duration::from_millis(5));
        event.signal();
        event.signal();
        for handle in handles {
            handle.join().unwrap()?;
        }
        event.wait(Some(Duration::ZERO))?;
        Ok(())
    }

    #[tokio::test]
    async fn test_wait_async() -> Result<(), Box<dyn Error>> {
        let event = QueueEvent::new(Default::default());
        let timeout = Duration::from_millis(10);
        assert!(matches!(
            event.wait_async(Some(timeout)).await,
            Err(QueueError::TimedOut(_))
        ));

        let signal = event.clone();
        let (result, _) = futures::join!(event.wait_async(None), async move {
            tokio::task::yield_now().await;
            signal.signal();
        });
        result?;
        assert!(event.occurred());
        event.signaled().await;
        Ok(())
    }

    #[test]
    fn test_timing() {
        let options = EventOptions { timing: true };
        let first = QueueEvent::new(options);
        let second = QueueEvent::new(options);
        assert!(second.elapsed_since(&first).is_none());

        first.signal();
        std::thread::sleep(Duration::from_millis(2));
        second.signal();
        let elapsed = second.elapsed_since(&first).unwrap();
        assert!(elapsed >= Duration::from_millis(1));
        assert_ne!(first.id(), second.id());
    }
}
