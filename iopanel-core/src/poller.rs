use iopanel_driver_modbus::ModbusChannelClient;
use iopanel_sdk::{ChannelState, PollerError, ReadError};
use std::{
    fmt,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
    time::Duration,
};
use tokio::{
    task::JoinHandle,
    time::{interval_at, Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Outcome of one poll cycle.
pub type PollResult = Result<Vec<ChannelState>, ReadError>;

type PollCallback = Box<dyn FnMut(PollResult) + Send>;
type Subscriber = Arc<Mutex<Option<PollCallback>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollerState {
    Idle,
    Running,
    Stopping,
}

impl fmt::Display for PollerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Stopping => "Stopping",
        };
        f.write_str(s)
    }
}

struct PollTask {
    cancel: CancellationToken,
    subscriber: Subscriber,
    handle: JoinHandle<()>,
}

impl PollTask {
    /// Detach the callback. Blocks while a delivery is in progress, so no
    /// delivery can happen once this returns.
    fn revoke(&self) {
        self.subscriber
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }
}

struct PollerInner {
    state: PollerState,
    task: Option<PollTask>,
}

/// Repeating read-all task with cooperative cancellation.
///
/// Reads are issued one after another from a single task, so a read never
/// starts while the previous one is outstanding. Ticks that elapse during a
/// slow read are skipped rather than queued. Every outcome, success or
/// failure, is delivered exactly once to the registered callback.
pub struct Poller {
    inner: Mutex<PollerInner>,
}

impl Default for Poller {
    fn default() -> Self {
        Self::new()
    }
}

impl Poller {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(PollerInner {
                state: PollerState::Idle,
                task: None,
            }),
        }
    }

    fn inner(&self) -> MutexGuard<'_, PollerInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn state(&self) -> PollerState {
        self.inner().state
    }

    #[inline]
    pub fn is_running(&self) -> bool {
        self.state() == PollerState::Running
    }

    /// Start polling `count` channels every `interval`.
    ///
    /// The first read happens one interval after the call. Must be called
    /// from within a tokio runtime.
    pub fn start<F>(
        &self,
        client: Arc<ModbusChannelClient>,
        count: u16,
        interval: Duration,
        on_result: F,
    ) -> Result<(), PollerError>
    where
        F: FnMut(PollResult) + Send + 'static,
    {
        if interval.is_zero() {
            return Err(PollerError::InvalidInterval);
        }

        let mut inner = self.inner();
        match inner.state {
            PollerState::Running => return Err(PollerError::AlreadyRunning),
            PollerState::Stopping => return Err(PollerError::Stopping),
            PollerState::Idle => {}
        }

        let cancel = CancellationToken::new();
        let subscriber: Subscriber = Arc::new(Mutex::new(Some(Box::new(on_result))));
        let handle = tokio::spawn(Self::run(
            client,
            count,
            interval,
            cancel.clone(),
            Arc::clone(&subscriber),
        ));

        inner.task = Some(PollTask {
            cancel,
            subscriber,
            handle,
        });
        inner.state = PollerState::Running;
        info!(count, interval_ms = interval.as_millis() as u64, "Poller started");
        Ok(())
    }

    async fn run(
        client: Arc<ModbusChannelClient>,
        count: u16,
        period: Duration,
        cancel: CancellationToken,
        subscriber: Subscriber,
    ) {
        let origin = Instant::now() + period;
        let mut ticker = interval_at(origin, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            // The in-flight read is never aborted; stop waits for it
            let result = client.read_all_channels(count).await;
            if let Err(e) = &result {
                debug!(error = %e, "Poll read failed");
            }

            let delivered = {
                let mut guard = subscriber.lock().unwrap_or_else(PoisonError::into_inner);
                match guard.as_mut() {
                    Some(on_result) => {
                        on_result(result);
                        true
                    }
                    None => false,
                }
            };
            if !delivered {
                break;
            }

            // Deadlines that passed during the read are dropped, not fired late
            ticker.reset_at(next_deadline(origin, period, Instant::now()));
        }
        debug!("Poll task exited");
    }

    /// Stop polling and wait for the task to quiesce.
    ///
    /// The callback is detached before waiting, so it is never invoked once
    /// this returns, even if a read in flight completes afterwards. A no-op
    /// when idle.
    pub async fn stop(&self) {
        let task = {
            let mut inner = self.inner();
            if inner.state != PollerState::Running {
                return;
            }
            let task = inner.task.take();
            if let Some(task) = &task {
                task.revoke();
                task.cancel.cancel();
            }
            inner.state = PollerState::Stopping;
            task
        };

        let _idle = ResetOnDrop(self);
        if let Some(task) = task {
            if let Err(e) = task.handle.await {
                warn!(error = %e, "Poll task terminated abnormally");
            }
        }
        info!("Poller stopped");
    }
}

/// First tick on the `origin + k * period` grid strictly after `now`.
fn next_deadline(origin: Instant, period: Duration, now: Instant) -> Instant {
    if now < origin {
        return origin;
    }
    let elapsed = now.duration_since(origin).as_nanos();
    let steps = elapsed / period.as_nanos() + 1;
    u32::try_from(steps)
        .ok()
        .and_then(|k| period.checked_mul(k))
        .and_then(|offset| origin.checked_add(offset))
        .unwrap_or(now + period)
}

/// Returns the poller to `Idle` even if `stop` is abandoned mid-wait.
struct ResetOnDrop<'a>(&'a Poller);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.inner().state = PollerState::Idle;
    }
}

impl Drop for Poller {
    fn drop(&mut self) {
        let inner = self.inner.get_mut().unwrap_or_else(PoisonError::into_inner);
        if let Some(task) = inner.task.take() {
            task.revoke();
            task.cancel.cancel();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use iopanel_driver_modbus::{transport::mock::MockDevice, ChannelClientConfig};
    use iopanel_sdk::{Endpoint, ErrorKind};

    fn client(device: &MockDevice) -> Arc<ModbusChannelClient> {
        Arc::new(ModbusChannelClient::new(
            ChannelClientConfig::default(),
            Arc::new(device.connector()),
        ))
    }

    #[tokio::test]
    async fn test_zero_interval_is_rejected() {
        let poller = Poller::new();
        let err = poller
            .start(client(&MockDevice::new()), 12, Duration::ZERO, |_| {})
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInterval);
        assert_eq!(poller.state(), PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_twice_is_rejected() {
        let device = MockDevice::new();
        let client = client(&device);
        let poller = Poller::new();
        poller
            .start(Arc::clone(&client), 12, Duration::from_millis(100), |_| {})
            .unwrap();
        assert_eq!(
            poller
                .start(client, 12, Duration::from_millis(100), |_| {})
                .unwrap_err(),
            PollerError::AlreadyRunning
        );
        poller.stop().await;
        assert_eq!(poller.state(), PollerState::Idle);
    }

    #[test]
    fn test_next_deadline_skips_elapsed_ticks() {
        let origin = Instant::now();
        let period = Duration::from_millis(100);
        let at = |ms| origin + Duration::from_millis(ms);

        assert_eq!(next_deadline(origin, period, at(0)), at(100));
        assert_eq!(next_deadline(origin, period, at(5)), at(100));
        assert_eq!(next_deadline(origin, period, at(350)), at(400));
        // a read ending exactly on a tick skips that tick as well
        assert_eq!(next_deadline(origin, period, at(400)), at(500));
        assert_eq!(next_deadline(at(200), period, at(50)), at(200));
    }

    #[tokio::test]
    async fn test_stop_when_idle_is_noop() {
        let poller = Poller::new();
        poller.stop().await;
        assert_eq!(poller.state(), PollerState::Idle);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_are_delivered_too() {
        let device = MockDevice::new();
        let client = client(&device);
        let poller = Poller::new();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        // never connected, every cycle reports NotConnected
        poller
            .start(client, 12, Duration::from_millis(50), move |r| {
                let _ = tx.send(r);
            })
            .unwrap();
        for _ in 0..3 {
            assert_eq!(rx.recv().await.unwrap(), Err(ReadError::NotConnected));
        }
        poller.stop().await;
        assert_eq!(device.io_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restart_after_stop() {
        let device = MockDevice::new();
        let client = client(&device);
        client.connect(Endpoint::new("127.0.0.1", 5020)).await.unwrap();
        let poller = Poller::new();

        for _ in 0..2 {
            let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
            poller
                .start(Arc::clone(&client), 12, Duration::from_millis(100), move |r| {
                    let _ = tx.send(r);
                })
                .unwrap();
            assert!(rx.recv().await.unwrap().is_ok());
            poller.stop().await;
        }
        assert_eq!(device.read_count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_cancels_task() {
        let device = MockDevice::new();
        let client = client(&device);
        client.connect(Endpoint::new("127.0.0.1", 5020)).await.unwrap();

        let poller = Poller::new();
        poller
            .start(Arc::clone(&client), 12, Duration::from_millis(100), |_| {})
            .unwrap();
        drop(poller);

        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(device.read_count(), 0);
    }
}
