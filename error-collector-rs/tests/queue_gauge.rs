//! The queue length gauge must always end at the collector's real length,
//! even when notices and harvests race.
//!
//! Lives in its own test binary because it installs a global recorder.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;

use error_collector::{monitoring, CapturedError, ErrorCollector};
use metrics::{
    Counter, Gauge, GaugeFn, Histogram, Key, KeyName, Recorder, SharedString, Unit,
};
use once_cell::sync::Lazy;
use serde_json::Map;

/// Last value written to the queue length gauge, stored as f64 bits
#[derive(Default)]
struct LastValue(AtomicU64);

impl LastValue {
    fn get(&self) -> f64 {
        f64::from_bits(self.0.load(Ordering::SeqCst))
    }
}

impl GaugeFn for LastValue {
    fn increment(&self, value: f64) {
        self.set(self.get() + value);
    }

    fn decrement(&self, value: f64) {
        self.set(self.get() - value);
    }

    fn set(&self, value: f64) {
        self.0.store(value.to_bits(), Ordering::SeqCst);
    }
}

static QUEUE_GAUGE: Lazy<Arc<LastValue>> = Lazy::new(|| Arc::new(LastValue::default()));

struct QueueGaugeRecorder;

impl Recorder for QueueGaugeRecorder {
    fn describe_counter(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_gauge(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn describe_histogram(&self, _key: KeyName, _unit: Option<Unit>, _description: SharedString) {}

    fn register_counter(&self, _key: &Key) -> Counter {
        Counter::noop()
    }

    fn register_gauge(&self, key: &Key) -> Gauge {
        if key.name() == monitoring::QUEUE_LENGTH {
            Gauge::from_arc(Arc::clone(&QUEUE_GAUGE))
        } else {
            Gauge::noop()
        }
    }

    fn register_histogram(&self, _key: &Key) -> Histogram {
        Histogram::noop()
    }
}

fn exception(message: &str) -> CapturedError {
    CapturedError::new("Exception", message)
}

#[test]
fn test_queue_gauge_tracks_length_under_contention() {
    metrics::set_boxed_recorder(Box::new(QueueGaugeRecorder)).unwrap();

    let collector = Arc::new(ErrorCollector::new(10_000));
    let producers: Vec<_> = (0..4)
        .map(|_| {
            let collector = Arc::clone(&collector);
            thread::spawn(move || {
                for _ in 0..250 {
                    collector.notice_error("path", None, Map::new(), &exception("message"));
                }
            })
        })
        .collect();

    let harvester = {
        let collector = Arc::clone(&collector);
        thread::spawn(move || {
            for _ in 0..50 {
                collector.harvest_errors(None);
                thread::yield_now();
            }
        })
    };

    for producer in producers {
        producer.join().unwrap();
    }
    harvester.join().unwrap();

    assert_eq!(QUEUE_GAUGE.get(), collector.len() as f64);

    collector.harvest_errors(None);
    assert_eq!(QUEUE_GAUGE.get(), 0.0);

    collector.notice_error("path", None, Map::new(), &exception("message"));
    assert_eq!(QUEUE_GAUGE.get(), 1.0);
}
