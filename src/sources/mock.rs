//! Simulated collaborators
//!
//! In-memory stand-ins for sensors, middleware ports and cameras, used by
//! `robolog --simulate` and by the test suites.
//!
//! # Signal Patterns
//!
//! - [`SignalPattern::Constant`] - Fixed value
//! - [`SignalPattern::Sine`] - Sinusoid with frequency, amplitude and offset
//! - [`SignalPattern::Counter`] - Incrementing counter with wrap-around
//! - [`SignalPattern::Sawtooth`] - Linear ramp that resets every period
//! - [`SignalPattern::Square`] - Alternates between `+amplitude` and `-amplitude`
//!
//! # Enabling
//!
//! Only available with the `mock-sources` feature (on by default).

use super::{
    BindingSpec, DataSource, ExogenousData, ExogenousTransport, FrameSource, ProducerTransport,
    Reading, TextLogEntry, TextLogReceiver,
};
use crate::clock::Clock;
use crate::sync::lock;
use crate::types::{Frame, ImageKind};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Pattern for generating simulated values
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SignalPattern {
    Constant(f64),
    Sine {
        frequency: f64,
        amplitude: f64,
        offset: f64,
    },
    Counter { step: f64, min: f64, max: f64 },
    Sawtooth { period: f64, amplitude: f64 },
    Square { period: f64, amplitude: f64 },
}

impl Default for SignalPattern {
    fn default() -> Self {
        SignalPattern::Sine {
            frequency: 1.0,
            amplitude: 1.0,
            offset: 0.0,
        }
    }
}

/// A pattern plus its running state
#[derive(Debug, Clone)]
struct PatternState {
    pattern: SignalPattern,
    counter_value: f64,
}

impl PatternState {
    fn new(pattern: SignalPattern) -> Self {
        let counter_value = match pattern {
            SignalPattern::Counter { min, step, .. } => min - step,
            _ => 0.0,
        };
        Self {
            pattern,
            counter_value,
        }
    }

    fn generate(&mut self, elapsed_secs: f64) -> f64 {
        match self.pattern {
            SignalPattern::Constant(v) => v,
            SignalPattern::Sine {
                frequency,
                amplitude,
                offset,
            } => offset + amplitude * (2.0 * std::f64::consts::PI * frequency * elapsed_secs).sin(),
            SignalPattern::Counter { step, min, max } => {
                self.counter_value += step;
                if self.counter_value > max {
                    self.counter_value = min;
                } else if self.counter_value < min {
                    self.counter_value = max;
                }
                self.counter_value
            }
            SignalPattern::Sawtooth { period, amplitude } => {
                let t = elapsed_secs.rem_euclid(period);
                amplitude * (t / period)
            }
            SignalPattern::Square { period, amplitude } => {
                let t = elapsed_secs.rem_euclid(period);
                if t < period / 2.0 {
                    amplitude
                } else {
                    -amplitude
                }
            }
        }
    }
}

/// Pattern-driven sensor
pub struct SimulatedSource {
    channel: String,
    labels: Vec<String>,
    patterns: Vec<PatternState>,
    clock: Arc<dyn Clock>,
    start: f64,
    /// Produce nothing on every n-th read
    dropout_every: Option<u64>,
    reads: u64,
}

impl SimulatedSource {
    pub fn new(channel: impl Into<String>, patterns: Vec<SignalPattern>, clock: Arc<dyn Clock>) -> Self {
        let start = clock.now();
        Self {
            channel: channel.into(),
            labels: Vec::new(),
            patterns: patterns.into_iter().map(PatternState::new).collect(),
            clock,
            start,
            dropout_every: None,
            reads: 0,
        }
    }

    /// Constant vector source
    pub fn constant(channel: impl Into<String>, values: &[f64], clock: Arc<dyn Clock>) -> Self {
        Self::new(
            channel,
            values.iter().map(|v| SignalPattern::Constant(*v)).collect(),
            clock,
        )
    }

    pub fn with_labels<I, S>(mut self, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.labels = labels.into_iter().map(Into::into).collect();
        self
    }

    /// Fail every `n`-th read (n > 0)
    pub fn with_dropout(mut self, n: u64) -> Self {
        self.dropout_every = (n > 0).then_some(n);
        self
    }
}

impl DataSource for SimulatedSource {
    fn channel(&self) -> String {
        self.channel.clone()
    }

    fn labels(&self) -> Vec<String> {
        self.labels.clone()
    }

    fn try_read(&mut self) -> Option<Reading> {
        self.reads += 1;
        if let Some(n) = self.dropout_every {
            if self.reads % n == 0 {
                return None;
            }
        }
        let now = self.clock.now();
        let elapsed = now - self.start;
        let values = self.patterns.iter_mut().map(|p| p.generate(elapsed)).collect();
        Some(Reading::new(values).at(now))
    }
}

/// In-memory registry of text-log producers
#[derive(Default)]
pub struct InMemoryProducerTransport {
    producers: Mutex<BTreeSet<String>>,
    connects: Mutex<HashMap<String, u64>>,
    refuse: Mutex<BTreeSet<String>>,
}

impl InMemoryProducerTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_producer(&self, name: &str) {
        lock(&self.producers).insert(name.to_string());
    }

    pub fn remove_producer(&self, name: &str) {
        lock(&self.producers).remove(name);
    }

    /// Make every connection attempt to `name` fail
    pub fn refuse(&self, name: &str) {
        lock(&self.refuse).insert(name.to_string());
    }

    /// Number of connection attempts made for `name`
    pub fn connect_attempts(&self, name: &str) -> u64 {
        lock(&self.connects).get(name).copied().unwrap_or(0)
    }
}

impl ProducerTransport for InMemoryProducerTransport {
    fn list_active_producers(&self) -> BTreeSet<String> {
        lock(&self.producers).clone()
    }

    fn connect(&self, producer: &str, _local_port: &str) -> bool {
        *lock(&self.connects).entry(producer.to_string()).or_insert(0) += 1;
        !lock(&self.refuse).contains(producer)
    }

    fn exists(&self, producer: &str) -> bool {
        lock(&self.producers).contains(producer)
    }
}

/// Sending half of an in-memory log receiver
#[derive(Clone)]
pub struct LogSender {
    tx: Sender<TextLogEntry>,
}

impl LogSender {
    pub fn send(&self, entry: TextLogEntry) {
        let _ = self.tx.send(entry);
    }
}

/// Text-log receiver fed through a crossbeam channel
pub struct InMemoryLogReceiver {
    rx: Receiver<TextLogEntry>,
}

impl InMemoryLogReceiver {
    pub fn channel() -> (LogSender, Self) {
        let (tx, rx) = unbounded();
        (LogSender { tx }, Self { rx })
    }
}

impl TextLogReceiver for InMemoryLogReceiver {
    fn drain(&mut self) -> Vec<TextLogEntry> {
        self.rx.try_iter().collect()
    }
}

#[derive(Debug, Clone, Default)]
struct RemoteSignal {
    online: bool,
    schema: Option<BTreeMap<String, Vec<String>>>,
    data: Option<ExogenousData>,
}

/// In-memory exogenous signal producers, keyed by remote name
#[derive(Default)]
pub struct InMemoryExogenousTransport {
    remotes: Mutex<HashMap<String, RemoteSignal>>,
    negotiations: AtomicU64,
}

impl InMemoryExogenousTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bring a remote online (or take it offline)
    pub fn set_online(&self, remote: &str, online: bool) {
        lock(&self.remotes)
            .entry(remote.to_string())
            .or_default()
            .online = online;
    }

    pub fn set_schema(&self, remote: &str, schema: BTreeMap<String, Vec<String>>) {
        lock(&self.remotes)
            .entry(remote.to_string())
            .or_default()
            .schema = Some(schema);
    }

    pub fn set_data(&self, remote: &str, data: ExogenousData) {
        lock(&self.remotes)
            .entry(remote.to_string())
            .or_default()
            .data = Some(data);
    }

    /// Number of schema negotiations performed
    pub fn negotiations(&self) -> u64 {
        self.negotiations.load(Ordering::SeqCst)
    }
}

impl ExogenousTransport for InMemoryExogenousTransport {
    fn connect(&self, binding: &BindingSpec) -> bool {
        lock(&self.remotes)
            .get(&binding.remote)
            .is_some_and(|r| r.online)
    }

    fn negotiate_schema(&self, binding: &BindingSpec) -> Option<BTreeMap<String, Vec<String>>> {
        self.negotiations.fetch_add(1, Ordering::SeqCst);
        lock(&self.remotes)
            .get(&binding.remote)
            .and_then(|r| r.schema.clone())
    }

    fn read(&self, binding: &BindingSpec) -> Option<ExogenousData> {
        lock(&self.remotes)
            .get(&binding.remote)
            .filter(|r| r.online)
            .and_then(|r| r.data.clone())
    }
}

/// Gradient frames of fixed size
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    grabs: AtomicU64,
    /// Fail every n-th grab
    fail_every: Option<u64>,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            grabs: AtomicU64::new(0),
            fail_every: None,
        }
    }

    pub fn with_failures(mut self, n: u64) -> Self {
        self.fail_every = (n > 0).then_some(n);
        self
    }

    pub fn grabs(&self) -> u64 {
        self.grabs.load(Ordering::SeqCst)
    }
}

impl FrameSource for SyntheticFrameSource {
    fn grab(&self, _camera: &str, kind: ImageKind) -> Option<Frame> {
        let n = self.grabs.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(every) = self.fail_every {
            if n % every == 0 {
                return None;
            }
        }
        let pixels = (self.width * self.height) as usize;
        let shade = (n % 256) as u8;
        Some(match kind {
            ImageKind::Rgb => Frame::rgb(
                self.width,
                self.height,
                (0..pixels)
                    .flat_map(|i| [shade, (i % 256) as u8, 255 - shade])
                    .collect(),
            ),
            ImageKind::Depth => Frame::depth(
                self.width,
                self.height,
                (0..pixels).map(|i| (i % 1000) as f32 * 0.001).collect(),
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::sources::ExogenousKind;

    #[test]
    fn test_patterns() {
        let mut counter = PatternState::new(SignalPattern::Counter {
            step: 1.0,
            min: 0.0,
            max: 2.0,
        });
        let values: Vec<f64> = (0..4).map(|_| counter.generate(0.0)).collect();
        assert_eq!(values, vec![0.0, 1.0, 2.0, 0.0]);

        let mut square = PatternState::new(SignalPattern::Square {
            period: 1.0,
            amplitude: 2.0,
        });
        assert_eq!(square.generate(0.25), 2.0);
        assert_eq!(square.generate(0.75), -2.0);

        let mut saw = PatternState::new(SignalPattern::Sawtooth {
            period: 2.0,
            amplitude: 4.0,
        });
        assert_eq!(saw.generate(1.0), 2.0);
    }

    #[test]
    fn test_simulated_source_dropout() {
        let clock = Arc::new(ManualClock::new(5.0));
        let mut source = SimulatedSource::constant("a", &[1.0, 2.0], clock.clone()).with_dropout(3);
        let results: Vec<bool> = (0..6).map(|_| source.try_read().is_some()).collect();
        assert_eq!(results, vec![true, true, false, true, true, false]);

        clock.advance(1.0);
        let reading = source.try_read().unwrap();
        assert_eq!(reading.values, vec![1.0, 2.0]);
        assert_eq!(reading.capture_time, Some(6.0));
    }

    #[test]
    fn test_producer_transport() {
        let transport = InMemoryProducerTransport::new();
        transport.add_producer("/log/a");
        transport.refuse("/log/b");
        assert!(transport.exists("/log/a"));
        assert!(transport.connect("/log/a", "/in"));
        assert!(!transport.connect("/log/b", "/in"));
        assert_eq!(transport.connect_attempts("/log/a"), 1);
        transport.remove_producer("/log/a");
        assert!(transport.list_active_producers().is_empty());
    }

    #[test]
    fn test_log_receiver_drains() {
        let (tx, mut rx) = InMemoryLogReceiver::channel();
        tx.send(TextLogEntry::new("yarp", "log", "p", "1", "a"));
        tx.send(TextLogEntry::new("yarp", "log", "p", "1", "b"));
        assert_eq!(rx.drain().len(), 2);
        assert!(rx.drain().is_empty());
    }

    #[test]
    fn test_exogenous_transport() {
        let transport = InMemoryExogenousTransport::new();
        let binding = BindingSpec {
            kind: ExogenousKind::Vector,
            remote: "/ctrl/out".into(),
            local: "/logger/ctrl:i".into(),
            signal_name: "ctrl".into(),
            carrier: "udp".into(),
        };
        assert!(!transport.connect(&binding));
        transport.set_online("/ctrl/out", true);
        assert!(transport.connect(&binding));
        assert!(transport.read(&binding).is_none());
        transport.set_data("/ctrl/out", ExogenousData::Vector(vec![1.0]));
        assert_eq!(transport.read(&binding), Some(ExogenousData::Vector(vec![1.0])));
        assert!(transport.negotiate_schema(&binding).is_none());
        assert_eq!(transport.negotiations(), 1);
    }

    #[test]
    fn test_synthetic_frames() {
        let source = SyntheticFrameSource::new(4, 3).with_failures(2);
        let first = source.grab("head", ImageKind::Rgb).unwrap();
        assert!(first.is_consistent());
        assert!(source.grab("head", ImageKind::Rgb).is_none());
        let depth = source.grab("head", ImageKind::Depth).unwrap();
        assert!(depth.is_consistent());
        assert_eq!(source.grabs(), 3);
    }
}
