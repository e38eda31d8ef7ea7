//! Prometheus text exposition parsing.
//!
//! Turns a raw `/metrics` payload into a [`Snapshot`]. Only the metric
//! families in the updater table are kept; everything else is ignored so new
//! series on the backend never break the parse.
//!
//! ```
//! use scrapewatch::data::exposition::parse;
//!
//! let snapshot = parse(concat!(
//!     "# TYPE go_app_cpu_usage_percent gauge\n",
//!     "go_app_cpu_usage_percent 12.5\n",
//!     "http_requests_total{handler=\"/search\",method=\"GET\",status=\"200\"} 100\n",
//! ));
//!
//! assert_eq!(snapshot.cpu_percent, Some(12.5));
//! assert_eq!(snapshot.totals.requests_total, Some(100.0));
//! ```

use thiserror::Error;
use tracing::debug;

use super::round_to;
use super::snapshot::{RouteKey, Snapshot, StatusKey};

const BYTES_PER_GIB: f64 = (1u64 << 30) as f64;

/// Applies one sample to the snapshot field its metric name maps to.
type FieldUpdater = fn(&mut Snapshot, &Sample<'_>);

/// Metric name to field updater. Adding a metric is a new row here.
const METRICS: &[(&str, FieldUpdater)] = &[
    ("go_app_cpu_usage_percent", set_cpu_percent),
    ("go_app_ram_bytes", set_memory_gib),
    ("http_requests_total", add_requests),
    ("http_errors_total", add_errors),
    ("http_request_duration_seconds_sum", add_duration_sum),
    ("http_request_duration_seconds_count", add_duration_count),
];

/// Why a single exposition line was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LineError {
    #[error("missing metric name")]
    MissingName,

    #[error("missing sample value")]
    MissingValue,

    #[error("invalid sample value {0:?}")]
    InvalidValue(String),

    #[error("non-finite sample value {0:?}")]
    NonFinite(String),

    #[error("malformed label set at byte {0}")]
    MalformedLabels(usize),

    #[error("unterminated label set")]
    UnterminatedLabels,
}

/// One sample line, borrowed from the payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Sample<'a> {
    pub name: &'a str,
    pub labels: Vec<(&'a str, &'a str)>,
    pub value: f64,
}

impl<'a> Sample<'a> {
    /// Value of the first label with the given name.
    pub fn label(&self, key: &str) -> Option<&'a str> {
        self.labels.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
    }

    fn route_key(&self) -> Option<RouteKey> {
        let handler = self.label("handler")?;
        Some(RouteKey::new(handler, self.label("method").unwrap_or_default()))
    }

    fn status_key(&self) -> Option<StatusKey> {
        let route = self.route_key()?;
        Some(StatusKey {
            route,
            status: self.label("status").unwrap_or_default().to_string(),
        })
    }
}

/// A line that did not parse, with its 1-based line number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedLine {
    pub line_number: usize,
    pub error: LineError,
}

/// Result of a parse together with the lines that were skipped.
#[derive(Debug, Clone, Default)]
pub struct ParseReport {
    pub snapshot: Snapshot,
    pub skipped: Vec<SkippedLine>,
}

/// Parse an exposition payload into a snapshot.
///
/// Malformed lines are skipped; they never abort the parse.
pub fn parse(text: &str) -> Snapshot {
    parse_with_report(text).snapshot
}

/// Parse an exposition payload, also returning every skipped line.
pub fn parse_with_report(text: &str) -> ParseReport {
    let mut report = ParseReport::default();

    for (index, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        match parse_line(line) {
            Ok(sample) => {
                if let Some(update) = updater_for(sample.name) {
                    update(&mut report.snapshot, &sample);
                }
            }
            Err(error) => {
                debug!(line = index + 1, %error, "skipping exposition line");
                report.skipped.push(SkippedLine {
                    line_number: index + 1,
                    error,
                });
            }
        }
    }

    report.snapshot.fill_totals();
    report
}

fn updater_for(name: &str) -> Option<FieldUpdater> {
    METRICS
        .iter()
        .find(|(metric, _)| *metric == name)
        .map(|(_, update)| *update)
}

/// Tokenize a single trimmed, non-comment line.
///
/// Grammar: `name value [timestamp]` or `name{k="v",...} value [timestamp]`.
pub fn parse_line(line: &str) -> Result<Sample<'_>, LineError> {
    let bytes = line.as_bytes();
    let name_end = bytes
        .iter()
        .position(|&b| b == b'{' || b.is_ascii_whitespace())
        .unwrap_or(bytes.len());

    let name = &line[..name_end];
    if name.is_empty() {
        return Err(LineError::MissingName);
    }

    let (labels, rest) = if bytes.get(name_end) == Some(&b'{') {
        let (labels, end) = parse_labels(line, name_end + 1)?;
        (labels, &line[end..])
    } else {
        (Vec::new(), &line[name_end..])
    };

    // A trailing timestamp, if any, is ignored.
    let token = rest.split_whitespace().next().ok_or(LineError::MissingValue)?;
    let value = parse_value(token)?;

    Ok(Sample {
        name,
        labels,
        value,
    })
}

/// Scan a label block starting just after `{`.
///
/// Returns the labels and the byte offset just past the closing `}`.
fn parse_labels(line: &str, start: usize) -> Result<(Vec<(&str, &str)>, usize), LineError> {
    let bytes = line.as_bytes();
    let mut labels = Vec::new();
    let mut pos = start;

    loop {
        pos = skip_whitespace(bytes, pos);
        match bytes.get(pos) {
            None => return Err(LineError::UnterminatedLabels),
            // Empty block, or a trailing comma.
            Some(b'}') => return Ok((labels, pos + 1)),
            Some(_) => {}
        }

        let key_start = pos;
        while let Some(&b) = bytes.get(pos) {
            if matches!(b, b'=' | b',' | b'}' | b'"') || b.is_ascii_whitespace() {
                break;
            }
            pos += 1;
        }
        let key = &line[key_start..pos];
        if key.is_empty() {
            return Err(LineError::MalformedLabels(pos));
        }

        pos = skip_whitespace(bytes, pos);
        if bytes.get(pos) != Some(&b'=') {
            return Err(LineError::MalformedLabels(pos));
        }

        pos = skip_whitespace(bytes, pos + 1);
        if bytes.get(pos) != Some(&b'"') {
            return Err(LineError::MalformedLabels(pos));
        }

        let open = pos;
        pos += 1;
        loop {
            match bytes.get(pos) {
                None => return Err(LineError::UnterminatedLabels),
                // The escaped character never closes the value.
                Some(b'\\') => pos += 2,
                Some(b'"') => break,
                Some(_) => pos += 1,
            }
        }
        labels.push((key, unquote(&line[open..=pos])));

        pos = skip_whitespace(bytes, pos + 1);
        match bytes.get(pos) {
            Some(b',') => pos += 1,
            Some(b'}') => return Ok((labels, pos + 1)),
            None => return Err(LineError::UnterminatedLabels),
            Some(_) => return Err(LineError::MalformedLabels(pos)),
        }
    }
}

/// Strip exactly one leading and one trailing double quote.
fn unquote(raw: &str) -> &str {
    let raw = raw.strip_prefix('"').unwrap_or(raw);
    raw.strip_suffix('"').unwrap_or(raw)
}

fn skip_whitespace(bytes: &[u8], mut pos: usize) -> usize {
    while bytes.get(pos).is_some_and(|b| b.is_ascii_whitespace()) {
        pos += 1;
    }
    pos
}

fn parse_value(token: &str) -> Result<f64, LineError> {
    let value = match token {
        "+Inf" | "Inf" => f64::INFINITY,
        "-Inf" => f64::NEG_INFINITY,
        "NaN" => f64::NAN,
        _ => token
            .parse::<f64>()
            .map_err(|_| LineError::InvalidValue(token.to_string()))?,
    };

    if !value.is_finite() {
        return Err(LineError::NonFinite(token.to_string()));
    }
    Ok(value)
}

fn set_cpu_percent(snapshot: &mut Snapshot, sample: &Sample<'_>) {
    snapshot.cpu_percent = Some(sample.value);
}

fn set_memory_gib(snapshot: &mut Snapshot, sample: &Sample<'_>) {
    snapshot.memory_gib = Some(round_to(sample.value / BYTES_PER_GIB, 2));
}

fn add_requests(snapshot: &mut Snapshot, sample: &Sample<'_>) {
    match sample.status_key() {
        Some(key) => *snapshot.request_counters.entry(key).or_default() += sample.value,
        None => accumulate(&mut snapshot.totals.requests_total, sample.value),
    }
}

fn add_errors(snapshot: &mut Snapshot, sample: &Sample<'_>) {
    match sample.route_key() {
        Some(key) => *snapshot.error_counters.entry(key).or_default() += sample.value,
        None => accumulate(&mut snapshot.totals.errors_total, sample.value),
    }
}

fn add_duration_sum(snapshot: &mut Snapshot, sample: &Sample<'_>) {
    match sample.route_key() {
        Some(key) => snapshot.durations.entry(key).or_default().sum += sample.value,
        None => accumulate(&mut snapshot.totals.duration_sum_total, sample.value),
    }
}

fn add_duration_count(snapshot: &mut Snapshot, sample: &Sample<'_>) {
    match sample.route_key() {
        Some(key) => snapshot.durations.entry(key).or_default().count += sample.value,
        None => accumulate(&mut snapshot.totals.duration_count_total, sample.value),
    }
}

fn accumulate(slot: &mut Option<f64>, value: f64) {
    *slot.get_or_insert(0.0) += value;
}
