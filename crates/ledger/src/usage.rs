use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use chrono_tz::Tz;
use models::Operation;

/// One usage record as fetched for reporting.
#[derive(Debug, Clone)]
pub struct UsageRow {
    pub timestamp: DateTime<Utc>,
    pub spus: f64,
    pub operation: Operation,
}

/// One reporting bucket: a calendar day in the requested timezone, its SPU
/// total, and (when grouping per operation) which operation it covers.
#[derive(Debug, Clone, PartialEq, serde::Serialize)]
pub struct DataPoint {
    pub date: NaiveDate,
    pub spus: f64,
    pub operation: Option<Operation>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct UsageReport {
    pub data_points: Vec<DataPoint>,
    pub total_spus: f64,
}

/// The UTC instant at which `date` begins in `tz`. Ambiguous local times
/// (DST transitions) resolve to the earlier instant.
pub fn day_start_utc(date: NaiveDate, tz: Tz) -> DateTime<Utc> {
    let local_midnight = date.and_hms_opt(0, 0, 0).expect("midnight is valid");
    tz.from_local_datetime(&local_midnight)
        .earliest()
        // A timezone that skips midnight itself: fall forward one hour.
        .unwrap_or_else(|| {
            tz.from_local_datetime(&(local_midnight + chrono::Duration::hours(1)))
                .earliest()
                .expect("1am resolves in every timezone")
        })
        .with_timezone(&Utc)
}

/// Bucket usage records by calendar day in `tz`, optionally grouped by
/// operation. Points are ordered by (date, operation).
pub fn bucket_by_day(rows: &[UsageRow], tz: Tz, per_operation: bool) -> UsageReport {
    use std::collections::BTreeMap;

    let mut buckets: BTreeMap<(NaiveDate, Option<Operation>), f64> = BTreeMap::new();
    let mut total_spus = 0.0;

    for row in rows {
        let date = row.timestamp.with_timezone(&tz).date_naive();
        let key = (date, per_operation.then_some(row.operation));
        *buckets.entry(key).or_insert(0.0) += row.spus;
        total_spus += row.spus;
    }

    let mut data_points: Vec<DataPoint> = buckets
        .into_iter()
        .map(|((date, operation), spus)| DataPoint {
            date,
            spus,
            operation,
        })
        .collect();
    // Order per-operation points alphabetically within each day.
    data_points.sort_by(|a, b| {
        (a.date, a.operation.map(|o| o.as_str())).cmp(&(b.date, b.operation.map(|o| o.as_str())))
    });

    UsageReport {
        data_points,
        total_spus,
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn row(ts: &str, spus: f64, operation: Operation) -> UsageRow {
        UsageRow {
            timestamp: ts.parse().unwrap(),
            spus,
            operation,
        }
    }

    #[test]
    fn test_utc_bucketing_splits_across_midnight() {
        let rows = vec![
            row("2025-01-15T23:00:00Z", 100.0, Operation::Llm),
            row("2025-01-16T01:00:00Z", 200.0, Operation::Llm),
        ];

        let report = bucket_by_day(&rows, chrono_tz::UTC, false);
        assert_eq!(report.total_spus, 300.0);
        assert_eq!(report.data_points.len(), 2);
        assert_eq!(
            report.data_points[0].date,
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
        );
        assert_eq!(report.data_points[0].spus, 100.0);
        assert_eq!(report.data_points[0].operation, None);
        assert_eq!(
            report.data_points[1].date,
            NaiveDate::from_ymd_opt(2025, 1, 16).unwrap()
        );
        assert_eq!(report.data_points[1].spus, 200.0);
    }

    #[test]
    fn test_los_angeles_merges_the_same_records() {
        let rows = vec![
            row("2025-01-15T23:00:00Z", 100.0, Operation::Llm),
            row("2025-01-16T01:00:00Z", 200.0, Operation::Llm),
        ];

        // 23:00Z and 01:00Z are 15:00 and 17:00 in Los Angeles: one day.
        let report = bucket_by_day(&rows, chrono_tz::America::Los_Angeles, false);
        assert_eq!(report.data_points.len(), 1);
        assert_eq!(
            report.data_points[0].date,
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
        );
        assert_eq!(report.data_points[0].spus, 300.0);
        assert_eq!(report.total_spus, 300.0);
    }

    #[test]
    fn test_paris_rolls_late_evening_forward() {
        // 23:00Z on Jan 15 is already Jan 16 in Paris.
        let rows = vec![row("2025-01-15T23:00:00Z", 7.0, Operation::Ocr)];
        let report = bucket_by_day(&rows, chrono_tz::Europe::Paris, false);
        assert_eq!(
            report.data_points[0].date,
            NaiveDate::from_ymd_opt(2025, 1, 16).unwrap()
        );
    }

    #[test]
    fn test_per_operation_grouping_orders_within_day() {
        let rows = vec![
            row("2025-01-15T10:00:00Z", 30.0, Operation::Llm),
            row("2025-01-15T11:00:00Z", 5.0, Operation::ClaudeLog),
            row("2025-01-16T10:00:00Z", 15.0, Operation::Llm),
            row("2025-01-16T11:00:00Z", 8.0, Operation::TelemetryTrace),
        ];

        let report = bucket_by_day(&rows, chrono_tz::UTC, true);
        let got: Vec<(NaiveDate, Option<Operation>, f64)> = report
            .data_points
            .iter()
            .map(|p| (p.date, p.operation, p.spus))
            .collect();

        let jan15 = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        let jan16 = NaiveDate::from_ymd_opt(2025, 1, 16).unwrap();
        assert_eq!(
            got,
            vec![
                (jan15, Some(Operation::ClaudeLog), 5.0),
                (jan15, Some(Operation::Llm), 30.0),
                (jan16, Some(Operation::Llm), 15.0),
                (jan16, Some(Operation::TelemetryTrace), 8.0),
            ]
        );
        assert_eq!(report.total_spus, 58.0);
    }

    #[test]
    fn test_day_start_utc() {
        let jan15 = NaiveDate::from_ymd_opt(2025, 1, 15).unwrap();
        assert_eq!(
            day_start_utc(jan15, chrono_tz::UTC),
            "2025-01-15T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(
            day_start_utc(jan15, chrono_tz::America::Los_Angeles),
            "2025-01-15T08:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
    }
}
