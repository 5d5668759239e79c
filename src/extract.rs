//! Status extraction from the hub's `wan_conn.xml`.
//!
//! [`extract`] turns one response body into one self-contained
//! [`PollResult`]. It is a pure function: no I/O, no shared state, and no
//! failure is ever fatal. Every problem found along the way is attached to
//! the result as a [`PollError`] naming the offending field.
//!
//! # Field Policy
//!
//! | Node | Decoding | When absent |
//! |------|----------|-------------|
//! | `<status>` | container | stop, structural error |
//! | `link_status` | prefix classification | stop, structural error |
//! | `sysuptime` | plain integer | structural error, continue |
//! | `status_rate` | bracketed, arity 4 | structural error, continue |
//! | `wan_conn_volume_list` | bracketed, arity 3 | structural error, continue |
//!
//! A `disconnected;` link status ends extraction early: the hub does not
//! report throughput for a link that is down.

use std::collections::HashMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use serde::{Serialize, Serializer};
use tracing::{debug, warn};

use crate::error::{DecodeError, PollError};
use crate::field::{self, LinkStatus};

/// Link media the hub is known to report for a live connection.
const KNOWN_MEDIA: [&str; 2] = ["vdsl", "adsl"];

/// The nodes read from the status document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Field {
    Status,
    LinkStatus,
    SysUptime,
    StatusRate,
    WanConnVolumeList,
}

impl Field {
    /// Element name in the XML.
    pub fn node_name(self) -> &'static str {
        match self {
            Field::Status => "status",
            Field::LinkStatus => "link_status",
            Field::SysUptime => "sysuptime",
            Field::StatusRate => "status_rate",
            Field::WanConnVolumeList => "wan_conn_volume_list",
        }
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.node_name())
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Connectivity {
    Connected,
    Disconnected,
    #[default]
    Unknown,
}

/// Where a single poll ended up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollState {
    Connected,
    Disconnected,
    /// `link_status` carried a value we do not recognize.
    Unknown,
    ParseFailed,
    StructuralError,
    FetchFailed,
}

/// When the poll happened and how long it took.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PollTiming {
    pub polled_at: DateTime<Utc>,
    #[serde(serialize_with = "as_seconds")]
    pub poll_duration: Duration,
    #[serde(serialize_with = "as_seconds")]
    pub parse_duration: Duration,
}

/// Immutable snapshot of one poll.
///
/// Numeric fields default to zero and are only meaningful when
/// [`PollResult::is_decoded`] holds for the field they come from.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PollResult {
    pub state: PollState,
    pub connectivity: Connectivity,
    /// Reported link medium, e.g. `vdsl`.
    pub medium: Option<String>,
    pub connection_uptime_seconds: u64,
    pub system_uptime_seconds: u64,
    pub upload_rate_bps: u64,
    pub download_rate_bps: u64,
    pub upload_bytes_total: u64,
    pub download_bytes_total: u64,
    /// HTTP status of the poll, absent when the request never completed.
    pub status_code: Option<u16>,
    pub errors: Vec<PollError>,
    pub timing: Option<PollTiming>,
    /// Fields whose value was read.
    #[serde(skip)]
    read: Vec<Field>,
}

impl PollResult {
    fn new(state: PollState, status_code: Option<u16>) -> Self {
        PollResult {
            state,
            connectivity: Connectivity::Unknown,
            medium: None,
            connection_uptime_seconds: 0,
            system_uptime_seconds: 0,
            upload_rate_bps: 0,
            download_rate_bps: 0,
            upload_bytes_total: 0,
            download_bytes_total: 0,
            status_code,
            errors: Vec::new(),
            timing: None,
            read: Vec::new(),
        }
    }

    /// A poll whose HTTP request failed before a body was read.
    pub fn fetch_failed(error: PollError, status_code: Option<u16>) -> Self {
        let mut result = PollResult::new(PollState::FetchFailed, status_code);
        result.errors.push(error);
        result
    }

    pub fn with_timing(mut self, timing: PollTiming) -> Self {
        self.timing = Some(timing);
        self
    }

    /// The first error of the poll, if any.
    pub fn decode_error(&self) -> Option<&PollError> {
        self.errors.first()
    }

    pub fn has_error(&self, field: Field) -> bool {
        self.errors.iter().any(|e| e.field() == Some(field))
    }

    /// Whether extraction got as far as reading and classifying `field`.
    /// A field read this way may still carry an error.
    pub fn was_read(&self, field: Field) -> bool {
        self.read.contains(&field)
    }

    /// Whether `field` was read and decoded without error. Fields that were
    /// never reached, because extraction stopped early, are not.
    pub fn is_decoded(&self, field: Field) -> bool {
        self.was_read(field) && !self.has_error(field)
    }

    /// Connected, with every field decoded.
    pub fn is_good(&self) -> bool {
        self.state == PollState::Connected && self.errors.is_empty()
    }

    fn fail(&mut self, state: PollState, error: PollError) {
        self.state = state;
        self.errors.push(error);
    }

    fn mark_read(&mut self, field: Field) {
        self.read.push(field);
    }

    fn field_error(&mut self, field: Field, source: DecodeError) {
        warn!("Failed to decode <{}>: {}", field, source);
        self.errors.push(PollError::Field { field, source });
    }

    fn missing(&mut self, field: Field) {
        warn!("No <{}> in status document", field);
        self.fail(PollState::StructuralError, PollError::MissingNode(field));
    }
}

/// The `<status>` node of a parsed document: each descendant element's name
/// mapped to its `value` attribute. Only the first occurrence of a name is
/// kept.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct StatusDocument {
    nodes: HashMap<String, Option<String>>,
}

impl StatusDocument {
    /// Parses `xml` and returns its first `<status>` node.
    ///
    /// # Returns
    /// - `Ok(Some(StatusDocument))` when a `<status>` element exists
    /// - `Ok(None)` for well-formed XML without one
    /// - `Err(PollError::Parse)` if the document is not well-formed, including
    ///   one that ends with elements still open
    pub fn parse(xml: &str) -> Result<Option<Self>, PollError> {
        let mut reader = Reader::from_str(xml);
        let mut depth = 0usize;
        let mut status_depth: Option<usize> = None;
        let mut document: Option<StatusDocument> = None;

        loop {
            match reader.read_event() {
                Ok(Event::Start(e)) => {
                    depth += 1;
                    if is_status(&e) && document.is_none() {
                        document = Some(StatusDocument::default());
                        status_depth = Some(depth);
                    } else if let (Some(_), Some(doc)) = (status_depth, document.as_mut()) {
                        doc.visit(&e)?;
                    }
                }
                Ok(Event::Empty(e)) => {
                    if is_status(&e) && document.is_none() {
                        document = Some(StatusDocument::default());
                    } else if let (Some(_), Some(doc)) = (status_depth, document.as_mut()) {
                        doc.visit(&e)?;
                    }
                }
                Ok(Event::End(_)) => {
                    if status_depth == Some(depth) {
                        status_depth = None;
                    }
                    depth = depth.saturating_sub(1);
                }
                Ok(Event::Eof) if depth > 0 => {
                    return Err(PollError::Parse(format!(
                        "unexpected end of document with {} element(s) still open",
                        depth
                    )));
                }
                Ok(Event::Eof) => break,
                Err(e) => return Err(PollError::Parse(e.to_string())),
                _ => {}
            }
        }

        Ok(document)
    }

    /// `None` if the node is absent, `Some(None)` if it has no `value`.
    pub fn value(&self, field: Field) -> Option<Option<&str>> {
        self.nodes.get(field.node_name()).map(|v| v.as_deref())
    }

    fn visit(&mut self, element: &BytesStart<'_>) -> Result<(), PollError> {
        let name = String::from_utf8_lossy(element.local_name().as_ref()).into_owned();
        if self.nodes.contains_key(&name) {
            return Ok(());
        }

        let mut value = None;
        for attr in element.attributes() {
            let attr = attr.map_err(|e| PollError::Parse(e.to_string()))?;
            if attr.key.local_name().as_ref() == b"value" {
                let text = attr
                    .unescape_value()
                    .map_err(|e| PollError::Parse(e.to_string()))?;
                value = Some(text.into_owned());
            }
        }
        self.nodes.insert(name, value);
        Ok(())
    }
}

fn is_status(element: &BytesStart<'_>) -> bool {
    element.local_name().as_ref() == Field::Status.node_name().as_bytes()
}

/// Extracts a [`PollResult`] from one response body.
///
/// # Arguments
/// * `body` - The raw XML returned by the hub
/// * `status_code` - HTTP status the body came with
pub fn extract(body: &str, status_code: u16) -> PollResult {
    let mut result = PollResult::new(PollState::Connected, Some(status_code));

    let document = match StatusDocument::parse(body) {
        Ok(Some(document)) => document,
        Ok(None) => {
            result.missing(Field::Status);
            return result;
        }
        Err(e) => {
            warn!("Failed to parse status document: {}", e);
            result.fail(PollState::ParseFailed, e);
            return result;
        }
    };

    let Some(link_status) = required_value(&document, Field::LinkStatus, &mut result) else {
        return result;
    };
    match field::decode_link_status(link_status) {
        Ok(LinkStatus::Connected { medium, uptime }) => {
            if KNOWN_MEDIA.contains(&medium.as_str()) {
                result.connectivity = Connectivity::Connected;
            } else {
                warn!("Connected over unrecognized medium '{}'", medium);
                result.state = PollState::Unknown;
            }
            match field::parse_integer(&uptime) {
                Ok(seconds) => result.connection_uptime_seconds = seconds,
                Err(e) => result.field_error(Field::LinkStatus, e),
            }
            result.medium = Some(medium);
            result.mark_read(Field::LinkStatus);
        }
        Ok(LinkStatus::Disconnected { medium }) => {
            result.mark_read(Field::LinkStatus);
            result.state = PollState::Disconnected;
            result.connectivity = Connectivity::Disconnected;
            result.medium = Some(medium);
            debug!("Link is down, skipping remaining fields");
            return result;
        }
        Ok(LinkStatus::Unrecognized(text)) => {
            warn!("Unexpected link_status value: {}", text);
            result.state = PollState::Unknown;
            result.mark_read(Field::LinkStatus);
        }
        Err(e) => {
            result.state = PollState::Unknown;
            result.field_error(Field::LinkStatus, e);
        }
    }

    if let Some(raw) = required_value(&document, Field::SysUptime, &mut result) {
        match field::parse_integer(raw) {
            Ok(seconds) => {
                result.system_uptime_seconds = seconds;
                result.mark_read(Field::SysUptime);
            }
            Err(e) => result.field_error(Field::SysUptime, e),
        }
    }

    if let Some(raw) = required_value(&document, Field::StatusRate, &mut result) {
        match field::decode_status_rate(raw) {
            Ok(rates) => {
                result.upload_rate_bps = rates.upload_bps;
                result.download_rate_bps = rates.download_bps;
                result.mark_read(Field::StatusRate);
            }
            Err(e) => result.field_error(Field::StatusRate, e),
        }
    }

    if let Some(raw) = required_value(&document, Field::WanConnVolumeList, &mut result) {
        match field::decode_volume_list(raw) {
            Ok(volumes) => {
                result.download_bytes_total = volumes.download_bytes;
                result.upload_bytes_total = volumes.upload_bytes;
                result.mark_read(Field::WanConnVolumeList);
            }
            Err(e) => result.field_error(Field::WanConnVolumeList, e),
        }
    }

    result
}

/// Looks up a node's value, recording a structural error when it is absent.
fn required_value<'a>(
    document: &'a StatusDocument,
    field: Field,
    result: &mut PollResult,
) -> Option<&'a str> {
    match document.value(field) {
        Some(Some(value)) => Some(value),
        Some(None) => {
            warn!("<{}> has no value attribute", field);
            result.fail(PollState::StructuralError, PollError::MissingValue(field));
            None
        }
        None => {
            result.missing(field);
            None
        }
    }
}

fn as_seconds<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64())
}
