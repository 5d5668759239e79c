//! Prometheus recording of poll results.
//!
//! The [`Recorder`] is the only stateful piece of the exporter. The poll
//! loop hands it each [`PollResult`] by value; the HTTP server reads the
//! rendered exposition text and the latest snapshot concurrently.

use std::sync::RwLock;

use chrono::{DateTime, Utc};
use prometheus::{Counter, Encoder, Gauge, IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use tracing::debug;

use crate::extract::{Connectivity, Field, PollResult, PollState};

const PREFIX: &str = "btsmarthub2";

fn name(metric: &str) -> String {
    format!("{}_{}", PREFIX, metric)
}

/// Owns the metric registry and the most recent poll.
pub struct Recorder {
    registry: Registry,
    polls: IntCounter,
    connected: Gauge,
    status_codes: IntCounterVec,
    errors: IntCounterVec,
    last_good_poll: Gauge,
    last_poll: Gauge,
    last_error_time: Gauge,
    poll_duration: Counter,
    parse_duration: Counter,
    speed_up: Gauge,
    speed_down: Gauge,
    bytes_up: Gauge,
    bytes_down: Gauge,
    sys_uptime: Gauge,
    conn_uptime: Gauge,
    latest: RwLock<Option<PollResult>>,
}

impl Recorder {
    /// Creates a recorder with every metric registered in a fresh registry.
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let polls = IntCounter::new(name("polls_total"), "Number of polls we have attempted")?;
        let connected = Gauge::new(name("connected"), "Whether the Broadband is connected")?;
        let status_codes = IntCounterVec::new(
            Opts::new(name("status_code_total"), "A count of each status code encountered"),
            &["status_code"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new(name("errors_total"), "A count of poll errors by kind"),
            &["kind"],
        )?;
        let last_good_poll = Gauge::new(
            name("lastgoodpoll_seconds"),
            "The UNIX timestamp in seconds of the last good poll",
        )?;
        let last_poll = Gauge::new(
            name("lastpoll_seconds"),
            "The UNIX timestamp in seconds of the last poll",
        )?;
        let last_error_time = Gauge::new(
            name("lasterrortime_seconds"),
            "The UNIX timestamp in seconds of the last error",
        )?;
        let poll_duration = Counter::new(
            name("poll_duration_seconds_total"),
            "The total duration of polling",
        )?;
        let parse_duration = Counter::new(
            name("parse_duration_seconds_total"),
            "The total duration of parsing",
        )?;
        let speed_up = Gauge::new(name("bb_speed_up"), "The upload broadband speed in bps")?;
        let speed_down = Gauge::new(name("bb_speed_down"), "The download broadband speed in bps")?;
        let bytes_up = Gauge::new(name("bb_bytes_up"), "The number of bytes uploaded")?;
        let bytes_down = Gauge::new(name("bb_bytes_down"), "The number of bytes downloaded")?;
        let sys_uptime = Gauge::new(
            name("sysuptime_seconds"),
            "The sysuptime of the BB router in seconds",
        )?;
        let conn_uptime = Gauge::new(
            name("connuptime_seconds"),
            "The connuptime of the BB connection in seconds",
        )?;

        registry.register(Box::new(polls.clone()))?;
        registry.register(Box::new(connected.clone()))?;
        registry.register(Box::new(status_codes.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(last_good_poll.clone()))?;
        registry.register(Box::new(last_poll.clone()))?;
        registry.register(Box::new(last_error_time.clone()))?;
        registry.register(Box::new(poll_duration.clone()))?;
        registry.register(Box::new(parse_duration.clone()))?;
        registry.register(Box::new(speed_up.clone()))?;
        registry.register(Box::new(speed_down.clone()))?;
        registry.register(Box::new(bytes_up.clone()))?;
        registry.register(Box::new(bytes_down.clone()))?;
        registry.register(Box::new(sys_uptime.clone()))?;
        registry.register(Box::new(conn_uptime.clone()))?;

        Ok(Self {
            registry,
            polls,
            connected,
            status_codes,
            errors,
            last_good_poll,
            last_poll,
            last_error_time,
            poll_duration,
            parse_duration,
            speed_up,
            speed_down,
            bytes_up,
            bytes_down,
            sys_uptime,
            conn_uptime,
            latest: RwLock::new(None),
        })
    }

    /// Folds one poll into the metrics and keeps it as the latest snapshot.
    ///
    /// A gauge is only set from a field that was actually decoded; fields
    /// that failed, or were never reached because extraction stopped early,
    /// leave their gauge at its previous value. A disconnected poll zeroes
    /// the connection uptime and both speeds but leaves the byte counters
    /// alone.
    pub fn record(&self, result: PollResult) {
        self.polls.inc();

        if let Some(code) = result.status_code {
            let code = code.to_string();
            self.status_codes.with_label_values(&[code.as_str()]).inc();
        }

        let polled_at = result.timing.map(|t| t.polled_at).unwrap_or_else(Utc::now);
        self.last_poll.set(unix_seconds(polled_at));
        if let Some(timing) = result.timing {
            self.poll_duration.inc_by(timing.poll_duration.as_secs_f64());
            self.parse_duration.inc_by(timing.parse_duration.as_secs_f64());
        }

        for error in &result.errors {
            self.errors.with_label_values(&[error.kind().as_str()]).inc();
        }
        if !result.errors.is_empty() {
            self.last_error_time.set(unix_seconds(polled_at));
        }

        match result.state {
            PollState::Disconnected => {
                self.connected.set(0.0);
                self.conn_uptime.set(0.0);
                self.speed_up.set(0.0);
                self.speed_down.set(0.0);
            }
            PollState::Connected | PollState::Unknown | PollState::StructuralError => {
                self.record_fields(&result);
            }
            PollState::ParseFailed | PollState::FetchFailed => {}
        }

        if result.is_good() {
            self.last_good_poll.set(unix_seconds(polled_at));
        }

        debug!(
            state = ?result.state,
            errors = result.errors.len(),
            "Recorded poll"
        );

        match self.latest.write() {
            Ok(mut latest) => *latest = Some(result),
            Err(poisoned) => *poisoned.into_inner() = Some(result),
        }
    }

    fn record_fields(&self, result: &PollResult) {
        let decoded = |field: Field| result.is_decoded(field);

        // Connectivity is known once link_status was classified, even if its
        // uptime did not scan.
        if result.was_read(Field::LinkStatus) {
            let up = if result.connectivity == Connectivity::Connected { 1.0 } else { 0.0 };
            self.connected.set(up);
        }
        if decoded(Field::LinkStatus) {
            self.conn_uptime.set(result.connection_uptime_seconds as f64);
        }
        if decoded(Field::SysUptime) {
            self.sys_uptime.set(result.system_uptime_seconds as f64);
        }
        if decoded(Field::StatusRate) {
            self.speed_up.set(result.upload_rate_bps as f64);
            self.speed_down.set(result.download_rate_bps as f64);
        }
        if decoded(Field::WanConnVolumeList) {
            self.bytes_up.set(result.upload_bytes_total as f64);
            self.bytes_down.set(result.download_bytes_total as f64);
        }
    }

    /// The most recently recorded poll, if any.
    pub fn latest(&self) -> Option<PollResult> {
        match self.latest.read() {
            Ok(latest) => latest.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Renders every metric in the Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder.encode(&self.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| prometheus::Error::Msg(e.to_string()))
    }
}

fn unix_seconds(at: DateTime<Utc>) -> f64 {
    at.timestamp_micros() as f64 / 1_000_000.0
}
