use biometrics::{Collector, Counter, Moments};

pub(crate) static CLIENT_REQUESTS: Counter = Counter::new("deepchat.client.requests");
pub(crate) static CLIENT_REQUEST_ERRORS: Counter = Counter::new("deepchat.client.request_errors");
pub(crate) static CLIENT_REQUEST_DURATION: Moments =
    Moments::new("deepchat.client.request_duration_seconds");

pub(crate) static STREAM_CHUNKS: Counter = Counter::new("deepchat.stream.chunks");
pub(crate) static STREAM_ERRORS: Counter = Counter::new("deepchat.stream.errors");
pub(crate) static STREAM_BYTES: Counter = Counter::new("deepchat.stream.bytes");
pub(crate) static STREAM_TTFB: Moments = Moments::new("deepchat.stream.ttfb_seconds");
pub(crate) static STREAM_DURATION: Moments = Moments::new("deepchat.stream.duration_seconds");

pub(crate) static SUBMISSIONS: Counter = Counter::new("deepchat.app.submissions");
pub(crate) static SUBMISSIONS_REJECTED: Counter = Counter::new("deepchat.app.submissions_rejected");
pub(crate) static SUBMISSIONS_FAILED: Counter = Counter::new("deepchat.app.submissions_failed");
pub(crate) static SESSION_SWITCHES: Counter = Counter::new("deepchat.app.session_switches");

pub(crate) static PERSISTENCE_READ_FAILURES: Counter =
    Counter::new("deepchat.persistence.read_failures");
pub(crate) static PERSISTENCE_WRITE_FAILURES: Counter =
    Counter::new("deepchat.persistence.write_failures");
pub(crate) static PERSISTENCE_CORRUPT_PAYLOADS: Counter =
    Counter::new("deepchat.persistence.corrupt_payloads");

/// Register this crate's biometrics with the provided collector.
pub fn register_biometrics(collector: Collector) {
    collector.register_counter(&CLIENT_REQUESTS);
    collector.register_counter(&CLIENT_REQUEST_ERRORS);
    collector.register_moments(&CLIENT_REQUEST_DURATION);

    collector.register_counter(&STREAM_CHUNKS);
    collector.register_counter(&STREAM_ERRORS);
    collector.register_counter(&STREAM_BYTES);
    collector.register_moments(&STREAM_TTFB);
    collector.register_moments(&STREAM_DURATION);

    collector.register_counter(&SUBMISSIONS);
    collector.register_counter(&SUBMISSIONS_REJECTED);
    collector.register_counter(&SUBMISSIONS_FAILED);
    collector.register_counter(&SESSION_SWITCHES);

    collector.register_counter(&PERSISTENCE_READ_FAILURES);
    collector.register_counter(&PERSISTENCE_WRITE_FAILURES);
    collector.register_counter(&PERSISTENCE_CORRUPT_PAYLOADS);
}
