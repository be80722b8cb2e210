//! Rows stored in segments.

use crate::trie::key::RECENCY_YEARS;
use crate::trie::KeyReader;
use chrono::{DateTime, Datelike, Days, Months, NaiveDate};
use serde::{Deserialize, Serialize};

/// Internal document id, the key every trie is built over.
pub type Iid = [u8; 16];

/// Timestamp in microseconds since the Unix epoch.
pub type InstantMicros = i64;

/// Open-ended end of valid time.
pub const END_OF_TIME: InstantMicros = i64::MAX;

/// What happened to a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Op {
    /// A new document version; the payload is opaque to the index.
    Put(Vec<u8>),
    /// The document was deleted for the valid-time range.
    Delete,
    /// All history of the document was erased.
    Erase,
}

/// One row: an operation on a document at a system time, effective over a
/// valid-time range.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Document id.
    pub iid: Iid,
    /// System time the event was written.
    pub system_from: InstantMicros,
    /// Start of the valid-time range.
    pub valid_from: InstantMicros,
    /// End of the valid-time range, exclusive.
    pub valid_to: InstantMicros,
    /// The operation.
    pub op: Op,
}

impl Event {
    /// A put valid from `system_from` onwards.
    pub fn put(iid: Iid, system_from: InstantMicros, doc: impl Into<Vec<u8>>) -> Self {
        Self { iid, system_from, valid_from: system_from, valid_to: END_OF_TIME, op: Op::Put(doc.into()) }
    }

    /// A delete valid from `system_from` onwards.
    pub fn delete(iid: Iid, system_from: InstantMicros) -> Self {
        Self { iid, system_from, valid_from: system_from, valid_to: END_OF_TIME, op: Op::Delete }
    }

    /// An erase of the whole document history.
    pub fn erase(iid: Iid, system_from: InstantMicros) -> Self {
        Self { iid, system_from, valid_from: i64::MIN, valid_to: END_OF_TIME, op: Op::Erase }
    }

    /// Restricts the valid-time range.
    pub fn with_valid_time(mut self, valid_from: InstantMicros, valid_to: InstantMicros) -> Self {
        self.valid_from = valid_from;
        self.valid_to = valid_to;
        self
    }

    /// Recency bucket of this event: `None` while its valid time is open-ended.
    pub fn recency(&self, partition: RecencyPartition) -> Option<NaiveDate> {
        if self.valid_to == END_OF_TIME {
            None
        } else {
            partition.to_partition(self.valid_to)
        }
    }
}

impl AsRef<[u8]> for Event {
    fn as_ref(&self) -> &[u8] {
        &self.iid
    }
}

/// A [`KeyReader`] that can also hand out the full row.
pub trait EventReader: KeyReader {
    /// Returns row `idx`.
    fn event(&self, idx: u32) -> &Event;
}

impl EventReader for [Event] {
    fn event(&self, idx: u32) -> &Event {
        &self[idx as usize]
    }
}

impl EventReader for Vec<Event> {
    fn event(&self, idx: u32) -> &Event {
        &self[idx as usize]
    }
}

/// Width of the time buckets historical rows are grouped into.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecencyPartition {
    /// Buckets end on Mondays.
    Week,
    /// Buckets end on the first of each month.
    Month,
    /// Buckets end on the first of January, April, July and October.
    Quarter,
    /// Buckets end on the first of January.
    Year,
}

impl RecencyPartition {
    /// Returns the bucket boundary for a row whose valid time ends at `valid_to`.
    ///
    /// The boundary is the first bucket start strictly after the last valid
    /// instant, `valid_to - 1`. Boundaries before year 0 collapse into the
    /// first bucket of year 0. Returns `None`, treating the row as current,
    /// when the boundary falls after year 9999 or the instant is out of range.
    pub fn to_partition(&self, valid_to: InstantMicros) -> Option<NaiveDate> {
        let boundary = self.boundary_after(valid_to)?;
        if boundary.year() > *RECENCY_YEARS.end() {
            return None;
        }
        if boundary.year() < *RECENCY_YEARS.start() {
            return NaiveDate::from_ymd_opt(*RECENCY_YEARS.start(), 1, 1);
        }
        Some(boundary)
    }

    fn boundary_after(&self, valid_to: InstantMicros) -> Option<NaiveDate> {
        let date = DateTime::from_timestamp_micros(valid_to.checked_sub(1)?)?.date_naive();

        match self {
            RecencyPartition::Week => {
                let days_left = 7 - date.weekday().num_days_from_monday();
                date.checked_add_days(Days::new(days_left as u64))
            }
            RecencyPartition::Month => {
                date.with_day(1)?.checked_add_months(Months::new(1))
            }
            RecencyPartition::Quarter => {
                let quarter_start = NaiveDate::from_ymd_opt(date.year(), (date.month0() / 3) * 3 + 1, 1)?;
                quarter_start.checked_add_months(Months::new(3))
            }
            RecencyPartition::Year => NaiveDate::from_ymd_opt(date.year() + 1, 1, 1),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn micros(y: i32, m: u32, d: u32) -> InstantMicros {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_micros()
    }

    fn date(y: i32, m: u32, d: u32) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(y, m, d)
    }

    #[test]
    fn test_week_partition() {
        // 2024-01-03 is a Wednesday
        assert_eq!(RecencyPartition::Week.to_partition(micros(2024, 1, 3) + 1), date(2024, 1, 8));
        // ending exactly at Monday midnight belongs to that Monday
        assert_eq!(RecencyPartition::Week.to_partition(micros(2024, 1, 8)), date(2024, 1, 8));
        // one microsecond into Monday rolls to the following week
        assert_eq!(RecencyPartition::Week.to_partition(micros(2024, 1, 8) + 1), date(2024, 1, 15));
    }

    #[test]
    fn test_month_quarter_year_partitions() {
        let valid_to = micros(2023, 11, 15);
        assert_eq!(RecencyPartition::Month.to_partition(valid_to), date(2023, 12, 1));
        assert_eq!(RecencyPartition::Quarter.to_partition(valid_to), date(2024, 1, 1));
        assert_eq!(RecencyPartition::Year.to_partition(valid_to), date(2024, 1, 1));

        assert_eq!(RecencyPartition::Quarter.to_partition(micros(2023, 4, 1)), date(2023, 4, 1));
        assert_eq!(RecencyPartition::Month.to_partition(micros(2023, 12, 31)), date(2024, 1, 1));
    }

    #[test]
    fn test_partition_stays_within_key_years() {
        assert_eq!(RecencyPartition::Year.to_partition(micros(9998, 6, 1)), date(9999, 1, 1));
        assert_eq!(RecencyPartition::Year.to_partition(micros(9999, 6, 1)), None);
        assert_eq!(RecencyPartition::Week.to_partition(micros(10_001, 3, 4)), None);

        assert_eq!(RecencyPartition::Month.to_partition(micros(-5, 1, 2)), date(0, 1, 1));
        assert_eq!(RecencyPartition::Month.to_partition(micros(0, 1, 2)), date(0, 2, 1));
        assert_eq!(RecencyPartition::Week.to_partition(micros(-200_000, 1, 1)), date(0, 1, 1));
    }

    #[test]
    fn test_event_recency() {
        let iid = [1u8; 16];
        assert_eq!(Event::put(iid, 10, b"doc".to_vec()).recency(RecencyPartition::Week), None);

        let closed = Event::put(iid, 10, b"doc".to_vec()).with_valid_time(0, micros(2024, 1, 3) + 1);
        assert_eq!(closed.recency(RecencyPartition::Week), date(2024, 1, 8));
    }

    #[test]
    fn test_events_as_key_reader() {
        let events = vec![Event::delete([2u8; 16], 1), Event::erase([1u8; 16], 2)];
        assert_eq!(events.key(1), &[1u8; 16]);
        assert_eq!(events.event(0).op, Op::Delete);
        assert_eq!(events.row_count(), 2);
    }
}
