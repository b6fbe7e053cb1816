//! Deduplication and pointer advancement.
//!
//! The [`PositionEngine`] decides which records of a page are strictly newer
//! than the stored pointer and what the next pointer should be.
//!
//! For [`LogOrder::Chronological`] feeds the pointer moves to the newest
//! record seen. For [`LogOrder::ReverseChronological`] feeds the pointer moves
//! to the *oldest* record that was newer than the previous pointer, and a page
//! containing any record at or before the pointer marks the feed exhausted.

use crate::record::{scalar_text, FieldPath, LogEntry};
use chrono::{DateTime, NaiveDate, NaiveDateTime, SecondsFormat, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::fmt;
use tracing::warn;

const TIE_SEPARATOR: char = '|';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LogOrder {
    /// Oldest record first.
    Chronological,
    /// Newest record first.
    ReverseChronological,
}

/// How a connector's pointer values are compared.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerFormat {
    /// RFC 3339 timestamps; naive datetimes and bare dates are read as UTC.
    Iso8601,
    EpochSeconds,
    EpochMillis,
    /// Plain string comparison, for vendor ids that sort lexically.
    Lexical,
}

impl PointerFormat {
    fn parse(&self, raw: &str) -> Option<OrderKey> {
        let raw = raw.trim();
        if raw.is_empty() {
            return None;
        }
        match self {
            PointerFormat::Iso8601 => parse_timestamp(raw).map(OrderKey::Time),
            PointerFormat::EpochSeconds | PointerFormat::EpochMillis => raw
                .parse::<f64>()
                .ok()
                .filter(|n| n.is_finite())
                .map(OrderKey::Number),
            PointerFormat::Lexical => Some(OrderKey::Text(raw.to_string())),
        }
    }

    /// Renders a point in time as a pointer in this format.
    pub fn render(&self, at: DateTime<Utc>) -> String {
        match self {
            PointerFormat::Iso8601 | PointerFormat::Lexical => {
                at.to_rfc3339_opts(SecondsFormat::Millis, true)
            }
            PointerFormat::EpochSeconds => at.timestamp().to_string(),
            PointerFormat::EpochMillis => at.timestamp_millis().to_string(),
        }
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(Utc.from_utc_datetime(&naive));
        }
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

#[derive(Debug, Clone, PartialEq)]
enum OrderKey {
    Time(DateTime<Utc>),
    Number(f64),
    Text(String),
}

impl OrderKey {
    fn compare(&self, other: &OrderKey) -> Ordering {
        match (self, other) {
            (OrderKey::Time(a), OrderKey::Time(b)) => a.cmp(b),
            (OrderKey::Number(a), OrderKey::Number(b)) => a.total_cmp(b),
            (OrderKey::Text(a), OrderKey::Text(b)) => a.cmp(b),
            // One format per engine; mixed variants cannot be produced.
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }

    fn rank(&self) -> u8 {
        match self {
            OrderKey::Time(_) => 0,
            OrderKey::Number(_) => 1,
            OrderKey::Text(_) => 2,
        }
    }
}

/// Stored resume position: the pointer value plus an optional tie-break id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pointer {
    value: String,
    tie: Option<String>,
}

impl Pointer {
    pub fn new(value: impl Into<String>) -> Self {
        Self {
            value: value.into(),
            tie: None,
        }
    }

    pub fn with_tie(mut self, tie: impl Into<String>) -> Self {
        self.tie = Some(tie.into());
        self
    }

    /// The primary value, suitable for a vendor's "since" filter.
    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn tie(&self) -> Option<&str> {
        self.tie.as_deref()
    }

    /// Encodes the pointer for the cache as `value` or `value|tie`.
    pub fn encode(&self) -> String {
        match &self.tie {
            Some(tie) => format!("{}{}{}", self.value, TIE_SEPARATOR, tie),
            None => self.value.clone(),
        }
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encode())
    }
}

/// A record's (or pointer's) place in the ordering.
#[derive(Debug, Clone, PartialEq)]
pub struct Position {
    key: OrderKey,
    pointer: Pointer,
}

impl Position {
    pub fn pointer(&self) -> &Pointer {
        &self.pointer
    }
}

/// Why a record could not be placed in the ordering.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PositionError {
    Missing,
    Unparsable(String),
}

impl fmt::Display for PositionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PositionError::Missing => f.write_str("pointer field missing"),
            PositionError::Unparsable(raw) => write!(f, "unparsable pointer value '{}'", raw),
        }
    }
}

/// Outcome of filtering one page against a pointer.
#[derive(Debug, Clone, Default)]
pub struct Filtered {
    /// Records to emit, in page order.
    pub fresh: Vec<LogEntry>,
    /// Newest position among fresh records that had one.
    pub newest: Option<Position>,
    /// Oldest position among fresh records that had one.
    pub oldest: Option<Position>,
    /// Records at or before the pointer, dropped as already processed.
    pub stale: usize,
    /// Fresh records without a usable position, passed through.
    pub unpositioned: usize,
}

#[derive(Debug, Clone)]
pub struct PositionEngine {
    pointer_path: FieldPath,
    tie_break: Option<FieldPath>,
    format: PointerFormat,
    order: LogOrder,
    server_filtered: bool,
}

impl PositionEngine {
    pub fn new(pointer_path: impl Into<FieldPath>, format: PointerFormat, order: LogOrder) -> Self {
        Self {
            pointer_path: pointer_path.into(),
            tie_break: None,
            format,
            order,
            server_filtered: false,
        }
    }

    /// Orders records sharing a pointer value by this field, compared as text.
    pub fn with_tie_break(mut self, path: impl Into<FieldPath>) -> Self {
        self.tie_break = Some(path.into());
        self
    }

    /// The vendor already filters by pointer; pass every record through.
    pub fn server_filtered(mut self, server_filtered: bool) -> Self {
        self.server_filtered = server_filtered;
        self
    }

    pub fn order(&self) -> LogOrder {
        self.order
    }

    pub fn format(&self) -> PointerFormat {
        self.format
    }

    pub fn pointer_path(&self) -> &FieldPath {
        &self.pointer_path
    }

    /// Reads a pointer previously produced by [`Pointer::encode`].
    pub fn decode_pointer(&self, raw: &str) -> Pointer {
        if self.tie_break.is_some() {
            if let Some((value, tie)) = raw.split_once(TIE_SEPARATOR) {
                return Pointer::new(value).with_tie(tie);
            }
        }
        Pointer::new(raw)
    }

    /// The first-run pointer: `now - backfill` in this engine's format.
    pub fn default_pointer(&self, now: DateTime<Utc>, backfill: chrono::Duration) -> Pointer {
        Pointer::new(self.format.render(now - backfill))
    }

    pub fn position_of(&self, entry: &LogEntry) -> Result<Position, PositionError> {
        let value = entry.get(&self.pointer_path).ok_or(PositionError::Missing)?;
        let raw = scalar_text(value).ok_or_else(|| PositionError::Unparsable(value.to_string()))?;
        let key = self
            .format
            .parse(&raw)
            .ok_or_else(|| PositionError::Unparsable(raw.clone()))?;

        let tie = self
            .tie_break
            .as_ref()
            .and_then(|path| entry.get(path))
            .and_then(scalar_text);

        Ok(Position {
            key,
            pointer: Pointer { value: raw, tie },
        })
    }

    pub fn position_of_pointer(&self, pointer: &Pointer) -> Option<Position> {
        let key = self.format.parse(&pointer.value)?;
        Some(Position {
            key,
            pointer: pointer.clone(),
        })
    }

    /// Total order over positions: value first, then tie-break id.
    pub fn compare(&self, a: &Position, b: &Position) -> Ordering {
        a.key
            .compare(&b.key)
            .then_with(|| a.pointer.tie.cmp(&b.pointer.tie))
    }

    /// True when `candidate` sorts strictly after `boundary`.
    ///
    /// Equal values only count as newer when both sides carry a tie-break id.
    pub fn is_newer(&self, candidate: &Position, boundary: &Position) -> bool {
        match candidate.key.compare(&boundary.key) {
            Ordering::Greater => true,
            Ordering::Less => false,
            Ordering::Equal => match (&candidate.pointer.tie, &boundary.pointer.tie) {
                (Some(c), Some(b)) => c > b,
                _ => false,
            },
        }
    }

    /// Splits a page into records newer than `pointer` and stale ones.
    ///
    /// Pure in `(pointer, entries)`. Records without a usable pointer value
    /// are kept and logged rather than dropped.
    pub fn filter(&self, pointer: &Pointer, entries: Vec<LogEntry>) -> Filtered {
        let boundary = self.position_of_pointer(pointer);
        if boundary.is_none() && !self.server_filtered {
            warn!(
                pointer = %pointer,
                "stored pointer is not comparable, passing every record through"
            );
        }

        let mut filtered = Filtered::default();
        for entry in entries {
            let position = match self.position_of(&entry) {
                Ok(position) => position,
                Err(reason) => {
                    warn!(
                        field = %self.pointer_path,
                        reason = %reason,
                        "record has no usable pointer value, passing it through"
                    );
                    filtered.unpositioned += 1;
                    filtered.fresh.push(entry);
                    continue;
                }
            };

            let fresh = self.server_filtered
                || boundary
                    .as_ref()
                    .map_or(true, |boundary| self.is_newer(&position, boundary));
            if !fresh {
                filtered.stale += 1;
                continue;
            }

            if filtered
                .newest
                .as_ref()
                .map_or(true, |n| self.compare(&position, n) == Ordering::Greater)
            {
                filtered.newest = Some(position.clone());
            }
            if filtered
                .oldest
                .as_ref()
                .map_or(true, |o| self.compare(&position, o) == Ordering::Less)
            {
                filtered.oldest = Some(position);
            }
            filtered.fresh.push(entry);
        }
        filtered
    }

    /// True when no further (older) page can hold new records.
    ///
    /// Only reverse-chronological feeds can stop early: the page reached
    /// records at or before the pointer.
    pub fn is_exhausted(&self, filtered: &Filtered) -> bool {
        self.order == LogOrder::ReverseChronological && filtered.stale > 0
    }

    /// Folds a filtered page into the run's pending next position.
    pub fn advance(&self, current: Option<Position>, filtered: &Filtered) -> Option<Position> {
        let (candidate, wanted) = match self.order {
            LogOrder::Chronological => (filtered.newest.as_ref(), Ordering::Greater),
            LogOrder::ReverseChronological => (filtered.oldest.as_ref(), Ordering::Less),
        };
        match (current, candidate) {
            (None, candidate) => candidate.cloned(),
            (Some(current), None) => Some(current),
            (Some(current), Some(candidate)) => {
                if self.compare(candidate, &current) == wanted {
                    Some(candidate.clone())
                } else {
                    Some(current)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entries(values: Vec<Value>) -> Vec<LogEntry> {
        values
            .into_iter()
            .map(|v| LogEntry::from_value(v).unwrap())
            .collect()
    }

    fn iso_engine(order: LogOrder) -> PositionEngine {
        PositionEngine::new("published", PointerFormat::Iso8601, order)
    }

    #[test]
    fn test_chronological_filter_keeps_strictly_newer() {
        let engine = iso_engine(LogOrder::Chronological);
        let pointer = Pointer::new("2024-01-02T00:00:00.000Z");
        let page = entries(vec![
            json!({"published": "2024-01-01T00:00:00.000Z"}),
            json!({"published": "2024-01-02T00:00:00.000Z"}),
            json!({"published": "2024-01-03T00:00:00.000Z"}),
        ]);

        let filtered = engine.filter(&pointer, page);
        assert_eq!(filtered.fresh.len(), 1);
        assert_eq!(filtered.stale, 2);
        assert_eq!(
            filtered.newest.unwrap().pointer().value(),
            "2024-01-03T00:00:00.000Z"
        );
        assert!(!engine.is_exhausted(&engine.filter(&pointer, vec![])));
    }

    #[test]
    fn test_timestamps_compare_temporally_not_lexically() {
        let engine = iso_engine(LogOrder::Chronological);
        // Same instant expressed with an offset: not newer.
        let pointer = Pointer::new("2024-01-01T12:00:00Z");
        let page = entries(vec![
            json!({"published": "2024-01-01T13:00:00+01:00"}),
            json!({"published": "2024-01-01T12:00:00.001Z"}),
        ]);
        let filtered = engine.filter(&pointer, page);
        assert_eq!(filtered.fresh.len(), 1);
        assert_eq!(filtered.stale, 1);
    }

    #[test]
    fn test_date_only_and_naive_timestamps() {
        let engine = iso_engine(LogOrder::Chronological);
        let pointer = Pointer::new("2024-01-01");
        let page = entries(vec![
            json!({"published": "2024-01-01"}),
            json!({"published": "2024-01-01 00:00:01"}),
        ]);
        let filtered = engine.filter(&pointer, page);
        assert_eq!(filtered.fresh.len(), 1);
    }

    #[test]
    fn test_epoch_values_may_be_numbers_or_strings() {
        let engine = PositionEngine::new(
            "@timestamp",
            PointerFormat::EpochMillis,
            LogOrder::Chronological,
        );
        let pointer = Pointer::new("1700000000000");
        let page = entries(vec![
            json!({"@timestamp": 1700000000001_i64}),
            json!({"@timestamp": "1700000000002"}),
            json!({"@timestamp": 999}),
        ]);
        let filtered = engine.filter(&pointer, page);
        assert_eq!(filtered.fresh.len(), 2);
        assert_eq!(filtered.newest.unwrap().pointer().value(), "1700000000002");
    }

    #[test]
    fn test_missing_or_unparsable_records_fail_open() {
        let engine = iso_engine(LogOrder::Chronological);
        let pointer = Pointer::new("2024-01-01T00:00:00Z");
        let page = entries(vec![
            json!({"id": 1}),
            json!({"published": "yesterday"}),
            json!({"published": {"nested": true}}),
        ]);
        let filtered = engine.filter(&pointer, page);
        assert_eq!(filtered.fresh.len(), 3);
        assert_eq!(filtered.unpositioned, 3);
        assert!(filtered.newest.is_none());
    }

    #[test]
    fn test_unparsable_pointer_passes_everything() {
        let engine = iso_engine(LogOrder::Chronological);
        let filtered = engine.filter(
            &Pointer::new("garbage"),
            entries(vec![json!({"published": "2020-01-01T00:00:00Z"})]),
        );
        assert_eq!(filtered.fresh.len(), 1);
    }

    #[test]
    fn test_server_filtered_passes_stale_records() {
        let engine = iso_engine(LogOrder::Chronological).server_filtered(true);
        let pointer = Pointer::new("2024-01-02T00:00:00Z");
        let filtered = engine.filter(
            &pointer,
            entries(vec![json!({"published": "2024-01-01T00:00:00Z"})]),
        );
        assert_eq!(filtered.fresh.len(), 1);
        assert_eq!(filtered.stale, 0);
    }

    #[test]
    fn test_tie_break_orders_same_timestamp() {
        let engine = PositionEngine::new("date", PointerFormat::Iso8601, LogOrder::Chronological)
            .with_tie_break("id");
        let pointer = engine.decode_pointer("2024-03-01|evt-0005");
        assert_eq!(pointer.tie(), Some("evt-0005"));

        let page = entries(vec![
            json!({"date": "2024-03-01", "id": "evt-0004"}),
            json!({"date": "2024-03-01", "id": "evt-0005"}),
            json!({"date": "2024-03-01", "id": "evt-0006"}),
            json!({"date": "2024-03-02", "id": "evt-0001"}),
        ]);
        let filtered = engine.filter(&pointer, page);
        assert_eq!(filtered.fresh.len(), 2);
        assert_eq!(filtered.stale, 2);
        assert_eq!(filtered.oldest.unwrap().pointer().encode(), "2024-03-01|evt-0006");
        assert_eq!(filtered.newest.unwrap().pointer().encode(), "2024-03-02|evt-0001");
    }

    #[test]
    fn test_tie_separator_ignored_without_tie_break() {
        let engine = PositionEngine::new("id", PointerFormat::Lexical, LogOrder::Chronological);
        let pointer = engine.decode_pointer("a|b");
        assert_eq!(pointer.value(), "a|b");
        assert_eq!(pointer.tie(), None);
    }

    #[test]
    fn test_filtering_is_idempotent() {
        let engine = iso_engine(LogOrder::ReverseChronological);
        let pointer = Pointer::new("2024-01-02T00:00:00Z");
        let page = entries(vec![
            json!({"published": "2024-01-04T00:00:00Z"}),
            json!({"published": "2024-01-03T00:00:00Z"}),
            json!({"id": "no timestamp"}),
            json!({"published": "2024-01-02T00:00:00Z"}),
            json!({"published": "2024-01-01T00:00:00Z"}),
        ]);

        let once = engine.filter(&pointer, page);
        let twice = engine.filter(&pointer, once.fresh.clone());
        assert_eq!(once.fresh, twice.fresh);
        assert_eq!(twice.stale, 0);
    }

    #[test]
    fn test_reverse_order_advances_to_oldest_new_entry() {
        let engine = iso_engine(LogOrder::ReverseChronological);
        let pointer = Pointer::new("2024-01-01T00:00:00Z");

        let first = engine.filter(
            &pointer,
            entries(vec![
                json!({"published": "2024-01-05T00:00:00Z"}),
                json!({"published": "2024-01-04T00:00:00Z"}),
            ]),
        );
        assert!(!engine.is_exhausted(&first));
        let next = engine.advance(None, &first);

        let second = engine.filter(
            &pointer,
            entries(vec![
                json!({"published": "2024-01-03T00:00:00Z"}),
                json!({"published": "2024-01-01T00:00:00Z"}),
            ]),
        );
        assert!(engine.is_exhausted(&second));
        let next = engine.advance(next, &second).unwrap();
        assert_eq!(next.pointer().value(), "2024-01-03T00:00:00Z");
    }

    #[test]
    fn test_chronological_advance_is_monotonic() {
        let engine = iso_engine(LogOrder::Chronological);
        let pointer = Pointer::new("2024-01-01T00:00:00Z");

        let later = engine.filter(
            &pointer,
            entries(vec![json!({"published": "2024-01-09T00:00:00Z"})]),
        );
        let earlier = engine.filter(
            &pointer,
            entries(vec![json!({"published": "2024-01-05T00:00:00Z"})]),
        );
        let next = engine.advance(None, &later);
        let next = engine.advance(next, &earlier).unwrap();
        assert_eq!(next.pointer().value(), "2024-01-09T00:00:00Z");

        let empty = engine.filter(&pointer, vec![]);
        assert!(engine.advance(None, &empty).is_none());
    }

    #[test]
    fn test_default_pointer_rendering() {
        let now = Utc.with_ymd_and_hms(2024, 5, 8, 12, 0, 0).unwrap();
        let week = chrono::Duration::days(7);

        let iso = iso_engine(LogOrder::Chronological).default_pointer(now, week);
        assert_eq!(iso.value(), "2024-05-01T12:00:00.000Z");

        let secs = PositionEngine::new("ts", PointerFormat::EpochSeconds, LogOrder::Chronological)
            .default_pointer(now, week);
        assert_eq!(secs.value(), (now - week).timestamp().to_string());

        let millis = PositionEngine::new("ts", PointerFormat::EpochMillis, LogOrder::Chronological)
            .default_pointer(now, week);
        assert_eq!(millis.value(), (now - week).timestamp_millis().to_string());
    }
}
