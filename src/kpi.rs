use crate::errors::{AppError, AppResult};
use crate::models::{DailyMetricRecord, DateRange, KpiReport, KpiValue, MetricValues, TrendDirection, TrendResult};
use std::collections::BTreeMap;
use std::fmt::Write as _;

/// Band, in percent, inside which a change counts as stable.
pub const STABLE_BAND_PERCENT: f64 = 5.0;

const CSV_HEADER: &str = "Date,Impressions,Clicks,CTR,Conversions,Spend,CPC,CPM";

/// Period-over-period trend. A zero baseline is reported as stable with no change.
pub fn trend(current: f64, previous: f64) -> TrendResult {
    if previous == 0.0 || !previous.is_finite() || !current.is_finite() {
        return TrendResult {
            change_percent: 0.0,
            trend: TrendDirection::Stable,
        };
    }
    let change_percent = (current - previous) / previous * 100.0;
    let trend = if change_percent > STABLE_BAND_PERCENT {
        TrendDirection::Up
    } else if change_percent < -STABLE_BAND_PERCENT {
        TrendDirection::Down
    } else {
        TrendDirection::Stable
    };
    TrendResult { change_percent, trend }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Totals {
    pub values: MetricValues,
}

impl Totals {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a DailyMetricRecord>) -> Self {
        let mut values = MetricValues::default();
        for record in records {
            values.impressions += record.impressions;
            values.clicks += record.clicks;
            values.spend += record.spend;
            values.conversions += record.conversions;
        }
        Self { values }
    }

    /// Percentage, from the summed counts rather than an average of daily ratios.
    pub fn ctr(&self) -> f64 {
        if self.values.impressions > 0 {
            self.values.clicks as f64 / self.values.impressions as f64 * 100.0
        } else {
            0.0
        }
    }

    pub fn cpc(&self) -> f64 {
        if self.values.clicks > 0 {
            self.values.spend / self.values.clicks as f64
        } else {
            0.0
        }
    }
}

fn kpi(current: f64, previous: f64) -> KpiValue {
    let TrendResult { change_percent, trend } = trend(current, previous);
    KpiValue {
        current,
        previous,
        change_percent,
        trend,
    }
}

/// Rejects ranges that end before they start. Fields are public and deserializable, so
/// [`DateRange::new`] is not the only way to build one.
pub fn check_range(range: &DateRange) -> AppResult<()> {
    if !range.is_ordered() {
        return Err(AppError::Validation(format!(
            "Date range starts after it ends ({} > {})",
            range.start, range.end
        )));
    }
    Ok(())
}

pub fn comparison_window(range: &DateRange) -> AppResult<DateRange> {
    check_range(range)?;
    range.previous().ok_or_else(|| {
        AppError::Validation(format!("No comparison window exists before {}", range.start))
    })
}

/// Compares `range` with the equal-length window right before it. `records` should hold a
/// single object's rows (normally the campaign), any days outside both windows are ignored.
pub fn compare_windows(records: &[DailyMetricRecord], range: DateRange) -> AppResult<KpiReport> {
    let previous_range = comparison_window(&range)?;
    let current = Totals::from_records(records.iter().filter(|record| range.contains(record.date)));
    let previous = Totals::from_records(records.iter().filter(|record| previous_range.contains(record.date)));

    Ok(KpiReport {
        current_range: range,
        previous_range,
        impressions: kpi(current.values.impressions as f64, previous.values.impressions as f64),
        clicks: kpi(current.values.clicks as f64, previous.values.clicks as f64),
        ctr: kpi(current.ctr(), previous.ctr()),
        spend: kpi(current.values.spend, previous.values.spend),
        cpc: kpi(current.cpc(), previous.cpc()),
        conversions: kpi(current.values.conversions as f64, previous.values.conversions as f64),
    })
}

/// One line per day, oldest first. Rows for the same day are summed.
pub fn render_csv(records: &[DailyMetricRecord]) -> String {
    let mut by_day: BTreeMap<_, Vec<&DailyMetricRecord>> = BTreeMap::new();
    for record in records {
        by_day.entry(record.date).or_default().push(record);
    }

    let mut out = String::from(CSV_HEADER);
    out.push('\n');
    for (day, rows) in by_day {
        let totals = Totals::from_records(rows);
        let cpm = if totals.values.impressions > 0 {
            totals.values.spend / totals.values.impressions as f64 * 1_000.0
        } else {
            0.0
        };
        let _ = writeln!(
            out,
            "{},{},{},{:.2},{},{:.2},{:.2},{:.2}",
            day.format("%Y-%m-%d"),
            totals.values.impressions,
            totals.values.clicks,
            totals.ctr(),
            totals.values.conversions,
            totals.values.spend,
            totals.cpc(),
            cpm
        );
    }
    out
}
