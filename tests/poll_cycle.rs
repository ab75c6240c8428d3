//! End-to-end poll cycles over in-memory sources.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use futures::future::BoxFuture;
use packwatch::protocol::PAYLOAD_LEN;
use packwatch::{
    Broadcaster, Channel, ChannelBank, Clock, DecoderSource, Frame, LogSink, MetricsSink,
    NetContext, Poller, Result, RunSwitch, SerialSource, Transport,
};

#[derive(Clone, Default)]
struct Metrics(Arc<Mutex<Vec<String>>>);

impl MetricsSink for Metrics {
    fn post<'a>(&'a self, batch: &'a str) -> BoxFuture<'a, Result<()>> {
        self.0.lock().unwrap().push(batch.to_owned());
        Box::pin(async { Ok(()) })
    }
}

#[derive(Clone, Default)]
struct Log(Arc<Mutex<Vec<String>>>);

impl LogSink for Log {
    fn send(&self, message: &str) {
        self.0.lock().unwrap().push(message.to_owned());
    }
}

struct FixedMinute(u32);

impl Clock for FixedMinute {
    fn minute(&self) -> u32 {
        self.0
    }
}

#[derive(Clone, Default)]
struct NullBus(Arc<Mutex<usize>>);

impl Transport for NullBus {
    fn connect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn disconnect(&mut self) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        Box::pin(async { Ok(()) })
    }

    fn send(&mut self, _data: Bytes) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        *self.0.lock().unwrap() += 1;
        Box::pin(async { Ok(()) })
    }

    fn is_connected(&self) -> bool {
        true
    }
}

fn frame(soc: u8, cycles: u16) -> Bytes {
    let mut payload = [0u8; PAYLOAD_LEN];
    payload[3] = 0b0010_1001;
    payload[5] = soc;
    payload[11..13].copy_from_slice(&cycles.to_le_bytes());
    payload[13] = 0x7C;
    payload[21..23].copy_from_slice(&13_250u16.to_le_bytes());
    payload[25..27].copy_from_slice(&2_000i16.to_be_bytes());
    payload[29..31].copy_from_slice(&3_320u16.to_le_bytes());
    payload[31..33].copy_from_slice(&3_300u16.to_le_bytes());
    Bytes::copy_from_slice(Frame::seal(&payload).as_bytes())
}

#[tokio::test]
async fn test_serial_and_decoder_channels_share_a_cycle() {
    let (serial_tx, serial) = SerialSource::channel(8);
    let (feed, decoder) = DecoderSource::channel(64);
    let bank = ChannelBank::new(vec![Channel::new("B01", serial), Channel::new("B02", decoder)]);

    let metrics = Metrics::default();
    let log = Log::default();
    let net = NetContext::new(metrics.clone(), Some(Box::new(log.clone())));
    let mut poller = Poller::with_clock(bank, net, FixedMinute(5));

    let first = frame(81, 310);
    serial_tx.send(first.slice(..10)).await.unwrap();
    serial_tx.send(first.slice(10..)).await.unwrap();
    for &byte in frame(64, 12).iter() {
        feed.push(u32::from(byte) << 24).await.unwrap();
    }

    let cycle = poller.poll_once().await;
    assert_eq!(cycle.frames, 2);
    assert_eq!(cycle.log_line, "(B01) (B02) ");
    poller.forward(&cycle).await;

    let batches = metrics.0.lock().unwrap().clone();
    assert_eq!(batches.len(), 1);
    assert_eq!(
        batches[0],
        "battery_data,unit=B01 soc=81i,cycles=310i,volts=13.250,amps=2.000,power=26.500,high=3.320,low=3.300,discharge=0i\n\
         battery_data,unit=B02 soc=64i,cycles=12i,volts=13.250,amps=2.000,power=26.500,high=3.320,low=3.300,discharge=0i\n"
    );
    assert_eq!(
        *log.0.lock().unwrap(),
        vec!["(B01) (B02) ".to_string(), "Posting data Success".to_string()]
    );
}

#[tokio::test]
async fn test_corrupt_frame_is_dropped_and_stream_recovers() {
    let (serial_tx, serial) = SerialSource::channel(8);
    let bank = ChannelBank::new(vec![Channel::new("B01", serial)]);
    let metrics = Metrics::default();
    let log = Log::default();
    let mut poller = Poller::with_clock(
        bank.clone(),
        NetContext::new(metrics.clone(), Some(Box::new(log.clone()))),
        FixedMinute(0),
    );

    let mut bad = frame(50, 1).to_vec();
    bad[7] ^= 0x01;
    let expected = format!("(B01) Bad CRC: {}", hex::encode(&bad));
    serial_tx.send(Bytes::from(bad)).await.unwrap();

    let cycle = poller.poll_once().await;
    assert_eq!(cycle.frames, 0);
    poller.forward(&cycle).await;
    assert_eq!(*log.0.lock().unwrap(), vec![expected]);
    let stats = bank.get(0).unwrap().lock().await.stats();
    assert_eq!(stats.checksum_errors, 1);

    serial_tx.send(frame(51, 1)).await.unwrap();
    let cycle = poller.poll_once().await;
    assert_eq!(cycle.frames, 1);
    assert!(cycle.batch.contains("soc=51i"));
}

#[tokio::test(start_paused = true)]
async fn test_broadcaster_and_poller_run_together() {
    let (serial_tx, serial) = SerialSource::channel(8);
    let bank = ChannelBank::new(vec![Channel::new("B01", serial)]);
    let bus = NullBus::default();
    let writes = Arc::clone(&bus.0);
    let run = RunSwitch::new();

    let broadcaster = Broadcaster::new(Arc::new(tokio::sync::Mutex::new(bus)), bank.clone())
        .interval(Duration::from_millis(4900))
        .spawn(run.clone());

    let metrics = Metrics::default();
    let poller = Poller::with_clock(bank, NetContext::new(metrics.clone(), None), FixedMinute(9))
        .idle(Duration::from_millis(100));
    let polling = tokio::spawn(poller.run(run.clone()));

    // Land a frame just after a keep-alive so the next reset cannot split it.
    tokio::time::sleep(Duration::from_millis(5000)).await;
    serial_tx.send(frame(99, 7)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(1000)).await;

    run.stop();
    polling.await.unwrap();
    let cycles = broadcaster.await.unwrap();

    assert_eq!(*writes.lock().unwrap() as u64, cycles);
    assert!(cycles >= 2);
    let batches = metrics.0.lock().unwrap();
    assert_eq!(batches.len(), 1);
    assert!(batches[0].starts_with("battery_data,unit=B01 soc=99i"));
}
