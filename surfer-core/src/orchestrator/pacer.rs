use crate::driver::DriverError;
use parking_lot::Mutex;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Owner side of a Run's stop flag.
#[derive(Debug)]
pub struct StopSignal {
    tx: watch::Sender<bool>,
}

impl StopSignal {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(false);
        Self { tx }
    }

    pub fn stop(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_stopped(&self) -> bool {
        *self.tx.borrow()
    }

    pub fn probe(&self) -> StopProbe {
        StopProbe {
            rx: self.tx.subscribe(),
        }
    }
}

impl Default for StopSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Read side of a stop flag, observed at suspension points.
#[derive(Debug, Clone)]
pub struct StopProbe {
    rx: watch::Receiver<bool>,
}

impl StopProbe {
    /// A probe that never fires.
    pub fn never() -> Self {
        let (_, rx) = watch::channel(false);
        Self { rx }
    }

    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once stop is requested. Pends forever if the signal is
    /// dropped without stopping.
    pub async fn stopped(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|stopped| *stopped).await.is_err() {
            std::future::pending::<()>().await;
        }
    }

    pub fn check(&self) -> Result<(), DriverError> {
        if self.is_stopped() {
            Err(DriverError::Cancelled)
        } else {
            Ok(())
        }
    }

    /// Sleeps for `duration` unless stop is requested first.
    pub async fn sleep(&self, duration: Duration) -> Result<(), DriverError> {
        self.check()?;
        tokio::select! {
            _ = tokio::time::sleep(duration) => Ok(()),
            _ = self.stopped() => Err(DriverError::Cancelled),
        }
    }
}

/// Enforces a minimum interval between paginated navigations.
#[derive(Debug)]
pub struct Pacer {
    min_interval: Duration,
    last: Mutex<Option<Instant>>,
    stop: StopProbe,
}

impl Pacer {
    pub fn new(min_interval: Duration, stop: StopProbe) -> Self {
        Self {
            min_interval,
            last: Mutex::new(None),
            stop,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Waits until the minimum interval since the previous call has passed.
    /// The first call returns immediately.
    pub async fn pace(&self) -> Result<(), DriverError> {
        self.stop.check()?;

        let wait = self
            .last
            .lock()
            .map(|last| (last + self.min_interval).saturating_duration_since(Instant::now()))
            .unwrap_or(Duration::ZERO);

        if !wait.is_zero() {
            self.stop.sleep(wait).await?;
        }

        *self.last.lock() = Some(Instant::now());
        Ok(())
    }
}
