//! Keep-alive broadcaster.
//!
//! Packs stop streaming unless they see the keep-alive command every few
//! seconds. The broadcaster runs in its own task: each cycle it resets every
//! channel, writes the command on the shared bus, then sleeps.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::channel::ChannelBank;
use crate::protocol::keep_alive;
use crate::run::RunSwitch;
use crate::transport::Transport;

/// Default keep-alive cadence.
pub const DEFAULT_INTERVAL: Duration = Duration::from_millis(4900);

/// Periodic channel reset + keep-alive writer.
pub struct Broadcaster<T> {
    bus: Arc<Mutex<T>>,
    channels: ChannelBank,
    interval: Duration,
}

impl<T: Transport + 'static> Broadcaster<T> {
    /// Creates a broadcaster with the default cadence.
    #[must_use]
    pub const fn new(bus: Arc<Mutex<T>>, channels: ChannelBank) -> Self {
        Self {
            bus,
            channels,
            interval: DEFAULT_INTERVAL,
        }
    }

    /// Sets the cadence.
    #[must_use]
    pub const fn interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Runs one cycle: reset all channels, then write the keep-alive.
    pub async fn cycle(&self) {
        self.channels.reset_all().await;

        let mut bus = self.bus.lock().await;
        if let Err(e) = bus.send(keep_alive()).await {
            tracing::warn!("keep-alive write failed: {}", e);
        }
    }

    /// Runs cycles until the run switch is released.
    ///
    /// Returns the number of cycles run.
    pub async fn run(self, run: RunSwitch) -> u64 {
        tracing::info!(
            "keep-alive broadcaster started ({} ms cadence)",
            self.interval.as_millis()
        );
        let mut cycles = 0u64;
        while run.is_enabled() {
            self.cycle().await;
            cycles += 1;
            tokio::time::sleep(self.interval).await;
        }
        tracing::info!("keep-alive broadcaster stopped after {} cycles", cycles);
        cycles
    }

    /// Spawns [`Self::run`] as a separate task.
    pub fn spawn(self, run: RunSwitch) -> JoinHandle<u64> {
        tokio::spawn(self.run(run))
    }
}

#[cfg(test)]
mod tests {
    use std::future::Future;
    use std::pin::Pin;

    use bytes::Bytes;
    use tokio::time::Instant;

    use super::*;
    use crate::channel::Channel;
    use crate::channel::tests::MemorySource;
    use crate::error::{Error, Result};

    /// Records every write along with the channel cursors seen at that moment.
    struct RecordingBus {
        channels: ChannelBank,
        writes: Arc<std::sync::Mutex<Vec<(Instant, Bytes, Vec<usize>)>>>,
        fail: bool,
    }

    impl Transport for RecordingBus {
        fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async { Ok(()) })
        }

        fn send(&mut self, data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
            Box::pin(async move {
                let mut cursors = Vec::new();
                for channel in self.channels.iter() {
                    cursors.push(channel.lock().await.cursor());
                }
                self.writes
                    .lock()
                    .unwrap()
                    .push((Instant::now(), data, cursors));
                if self.fail {
                    Err(Error::NotConnected)
                } else {
                    Ok(())
                }
            })
        }

        fn is_connected(&self) -> bool {
            true
        }
    }

    fn setup(fail: bool) -> (
        Broadcaster<RecordingBus>,
        Vec<MemorySource>,
        Arc<std::sync::Mutex<Vec<(Instant, Bytes, Vec<usize>)>>>,
    ) {
        let sources: Vec<MemorySource> = (0..2).map(|_| MemorySource::default()).collect();
        let feeds = sources.iter().map(MemorySource::handle).collect();
        let bank = ChannelBank::new(
            sources
                .into_iter()
                .enumerate()
                .map(|(i, s)| Channel::new(format!("B0{}", i + 1), s))
                .collect(),
        );
        let writes = Arc::new(std::sync::Mutex::new(Vec::new()));
        let bus = RecordingBus {
            channels: bank.clone(),
            writes: Arc::clone(&writes),
            fail,
        };
        let broadcaster = Broadcaster::new(Arc::new(Mutex::new(bus)), bank);
        (broadcaster, feeds, writes)
    }

    #[tokio::test]
    async fn test_cycle_resets_before_write() {
        let (broadcaster, feeds, writes) = setup(false);
        for (feed, channel) in feeds.iter().zip(broadcaster.channels.iter()) {
            feed.push(&[0x11; 12]);
            assert!(channel.lock().await.drain().unwrap().is_none());
        }

        broadcaster.cycle().await;

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len(), 1);
        assert_eq!(&writes[0].1[..], &crate::protocol::KEEP_ALIVE[..]);
        assert_eq!(writes[0].2, vec![0, 0]);
    }

    #[tokio::test]
    async fn test_write_failure_is_absorbed() {
        let (broadcaster, _feeds, writes) = setup(true);
        broadcaster.cycle().await;
        broadcaster.cycle().await;
        assert_eq!(writes.lock().unwrap().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cadence_and_stop() {
        let (broadcaster, feeds, writes) = setup(false);
        let broadcaster = broadcaster.interval(Duration::from_millis(4900));
        let bank = broadcaster.channels.clone();
        let run = RunSwitch::new();
        let handle = broadcaster.spawn(run.clone());

        for _ in 0..3 {
            // Partial frames pile up between cycles.
            for (feed, channel) in feeds.iter().zip(bank.iter()) {
                feed.push(&[0x22; 7]);
                assert!(channel.lock().await.drain().unwrap().is_none());
            }
            tokio::time::sleep(Duration::from_millis(4900)).await;
        }
        run.stop();
        let cycles = handle.await.unwrap();

        let writes = writes.lock().unwrap();
        assert_eq!(writes.len() as u64, cycles);
        assert!(writes.len() >= 3);
        for pair in writes.windows(2) {
            assert!(pair[1].0 - pair[0].0 >= Duration::from_millis(4900));
        }
        for (_, data, cursors) in writes.iter() {
            assert_eq!(&data[..], &crate::protocol::KEEP_ALIVE[..]);
            assert!(cursors.iter().all(|&c| c == 0));
        }
    }
}
