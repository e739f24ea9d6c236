//! Sales status derivation and anomaly detection
//!
//! Pure functions only: no I/O and no clock access. Callers pass `today`
//! explicitly so that classification is reproducible in tests.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

use super::constants::{open_ended_date, CHANNEL_SUMMARY_SEPARATOR};
use super::product::Row;

/// Sales status of a master record or a channel window
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SalesStatus {
    Current,
    Pending,
    Stopped,
    Abnormal,
}

impl SalesStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SalesStatus::Current => "current",
            SalesStatus::Pending => "pending",
            SalesStatus::Stopped => "stopped",
            SalesStatus::Abnormal => "abnormal",
        }
    }

    /// Parses the lowercase label produced by [`SalesStatus::as_str`]
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "current" => Some(SalesStatus::Current),
            "pending" => Some(SalesStatus::Pending),
            "stopped" => Some(SalesStatus::Stopped),
            "abnormal" => Some(SalesStatus::Abnormal),
            _ => None,
        }
    }
}

impl fmt::Display for SalesStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a raw wire date.
///
/// Accepts `YYYYMMDD`, `YYYY-MM-DD` and `YYYY/MM/DD`, optionally followed by a
/// time component which is ignored. Anything else yields `None`.
pub fn parse_sale_date(raw: &str) -> Option<NaiveDate> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    // Drop a trailing time part ("2024-01-01 00:00:00" / "2024-01-01T00:00:00")
    let date_part = trimmed
        .split(|c: char| c == ' ' || c == 'T')
        .next()
        .unwrap_or(trimmed);

    ["%Y%m%d", "%Y-%m-%d", "%Y/%m/%d"]
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

/// Renders a raw wire date for display (`YYYY-MM-DD`), or the raw text if it
/// does not parse.
pub fn display_sale_date(raw: &str) -> String {
    match parse_sale_date(raw) {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => raw.trim().to_string(),
    }
}

/// Classifies a sale window against `today`.
///
/// Rules, in order:
/// 1. missing or unparseable bound → abnormal
/// 2. start after end → abnormal
/// 3. end is the open-ended sentinel → current
/// 4. today after end → stopped
/// 5. today before start → pending
/// 6. otherwise current
pub fn classify(today: NaiveDate, start: Option<NaiveDate>, end: Option<NaiveDate>) -> SalesStatus {
    let (Some(start), Some(end)) = (start, end) else {
        return SalesStatus::Abnormal;
    };
    if start > end {
        return SalesStatus::Abnormal;
    }
    if end == open_ended_date() {
        return SalesStatus::Current;
    }
    if today > end {
        SalesStatus::Stopped
    } else if today < start {
        SalesStatus::Pending
    } else {
        SalesStatus::Current
    }
}

/// Classifies a sale window given in raw wire format
pub fn compute_status(today: NaiveDate, start: &str, end: &str) -> SalesStatus {
    classify(today, parse_sale_date(start), parse_sale_date(end))
}

/// One reason a row is considered special
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Anomaly {
    /// Master stopped while these channels are still selling
    StoppedMasterSellingChannels { channels: Vec<String> },
    /// Master current while every channel is stopped or pending
    CurrentMasterInactiveChannels,
    ChannelEndsAfterMaster {
        channel: String,
        channel_end: String,
        master_end: String,
    },
    ChannelStartsBeforeMaster {
        channel: String,
        channel_start: String,
        master_start: String,
    },
    AbnormalMasterWindow,
}

impl fmt::Display for Anomaly {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Anomaly::StoppedMasterSellingChannels { channels } => write!(
                f,
                "master sale is stopped but channel(s) {} are still on sale",
                channels.join(", ")
            ),
            Anomaly::CurrentMasterInactiveChannels => {
                f.write_str("master is on sale but every channel is stopped or pending")
            }
            Anomaly::ChannelEndsAfterMaster {
                channel,
                channel_end,
                master_end,
            } => write!(
                f,
                "channel {channel} sale end {channel_end} is later than master sale end {master_end}"
            ),
            Anomaly::ChannelStartsBeforeMaster {
                channel,
                channel_start,
                master_start,
            } => write!(
                f,
                "channel {channel} sale start {channel_start} is earlier than master sale start {master_start}"
            ),
            Anomaly::AbnormalMasterWindow => f.write_str("master sale window is abnormal"),
        }
    }
}

/// Evaluates every anomaly rule independently against an enriched row.
///
/// Error rows and rows without a master status never produce anomalies.
pub fn detect_anomaly(row: &Row) -> Vec<Anomaly> {
    let Some(main_status) = row.main_status else {
        return Vec::new();
    };
    let mut reasons = Vec::new();

    if main_status == SalesStatus::Stopped {
        let selling: Vec<String> = row
            .channels
            .iter()
            .filter(|ch| ch.status == SalesStatus::Current)
            .map(|ch| ch.code.clone())
            .collect();
        if !selling.is_empty() {
            reasons.push(Anomaly::StoppedMasterSellingChannels { channels: selling });
        }
    }

    if main_status == SalesStatus::Current
        && !row.channels.is_empty()
        && row
            .channels
            .iter()
            .all(|ch| matches!(ch.status, SalesStatus::Stopped | SalesStatus::Pending))
    {
        reasons.push(Anomaly::CurrentMasterInactiveChannels);
    }

    let master_start = parse_sale_date(&row.sale_start);
    let master_end = parse_sale_date(&row.sale_end);

    if let Some(master_end) = master_end {
        for ch in &row.channels {
            if let Some(channel_end) = parse_sale_date(&ch.sale_end) {
                if channel_end > master_end {
                    reasons.push(Anomaly::ChannelEndsAfterMaster {
                        channel: ch.code.clone(),
                        channel_end: channel_end.format("%Y-%m-%d").to_string(),
                        master_end: master_end.format("%Y-%m-%d").to_string(),
                    });
                }
            }
        }
    }

    if let Some(master_start) = master_start {
        for ch in &row.channels {
            if let Some(channel_start) = parse_sale_date(&ch.sale_start) {
                if channel_start < master_start {
                    reasons.push(Anomaly::ChannelStartsBeforeMaster {
                        channel: ch.code.clone(),
                        channel_start: channel_start.format("%Y-%m-%d").to_string(),
                        master_start: master_start.format("%Y-%m-%d").to_string(),
                    });
                }
            }
        }
    }

    if main_status == SalesStatus::Abnormal {
        reasons.push(Anomaly::AbnormalMasterWindow);
    }

    reasons
}

/// Joins anomaly explanations into a single human-readable reason
pub fn anomaly_reason(anomalies: &[Anomaly]) -> String {
    anomalies
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(CHANNEL_SUMMARY_SEPARATOR)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::product::{Channel, Descriptor, Row};
    use rstest::rstest;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    fn row(start: &str, end: &str, today: NaiveDate, channels: Vec<Channel>) -> Row {
        Row {
            no: 1,
            code: "000123".into(),
            name: "Test plan".into(),
            currency: "CNY".into(),
            unit: "per policy".into(),
            coverage_type: "life".into(),
            sale_start: start.into(),
            sale_end: end.into(),
            main_status: Some(compute_status(today, start, end)),
            descriptor: Descriptor::Resolved("D1".into()),
            channels,
            anomalies: Vec::new(),
            loading: false,
            error_kind: None,
        }
    }

    #[rstest]
    #[case("2024-01-01", "2024-12-31", SalesStatus::Current)]
    #[case("2024-01-01", "2023-12-31", SalesStatus::Abnormal)]
    #[case("2023-01-01", "2023-12-31", SalesStatus::Stopped)]
    #[case("2025-01-01", "2025-12-31", SalesStatus::Pending)]
    #[case("20240101", "20241231", SalesStatus::Current)]
    #[case("2024/06/01", "2024/06/01", SalesStatus::Current)]
    #[case("", "2024-12-31", SalesStatus::Abnormal)]
    #[case("2024-01-01", "not a date", SalesStatus::Abnormal)]
    #[case("2020-01-01", "9999-12-31", SalesStatus::Current)]
    #[case("2030-01-01", "99991231", SalesStatus::Current)]
    fn status_table(#[case] start: &str, #[case] end: &str, #[case] expected: SalesStatus) {
        assert_eq!(compute_status(day("2024-06-01"), start, end), expected);
    }

    #[test]
    fn inverted_window_is_abnormal_even_with_sentinel_start() {
        // start beyond the sentinel cannot happen on real data but must not be "current"
        let today = day("2024-06-01");
        assert_eq!(
            classify(today, Some(NaiveDate::MAX), Some(open_ended_date())),
            SalesStatus::Abnormal
        );
    }

    #[test]
    fn open_ended_is_current_regardless_of_today() {
        for today in ["1900-01-01", "2024-06-01", "9999-12-31"] {
            assert_eq!(
                compute_status(day(today), "2000-01-01", "9999-12-31"),
                SalesStatus::Current
            );
        }
    }

    #[test]
    fn parse_accepts_trailing_time() {
        assert_eq!(parse_sale_date("2024-03-05 00:00:00"), Some(day("2024-03-05")));
        assert_eq!(parse_sale_date("2024-03-05T08:00:00"), Some(day("2024-03-05")));
        assert_eq!(display_sale_date("20240305"), "2024-03-05");
        assert_eq!(display_sale_date("garbage"), "garbage");
    }

    #[test]
    fn stopped_master_with_current_channel_is_special() {
        let today = day("2024-06-01");
        let channels = vec![Channel::new("AGENCY", "2023-01-01", "2023-06-30", today)
            .with_status(SalesStatus::Current)];
        let r = row("2023-01-01", "2023-12-31", today, channels);
        let reasons = detect_anomaly(&r);
        assert!(matches!(
            reasons.first(),
            Some(Anomaly::StoppedMasterSellingChannels { channels }) if channels == &vec!["AGENCY".to_string()]
        ));
    }

    #[test]
    fn current_master_with_only_inactive_channels_is_special() {
        let today = day("2024-06-01");
        let channels = vec![
            Channel::new("AGENCY", "2024-01-01", "2024-03-31", today),
            Channel::new("ONLINE", "2024-09-01", "2024-10-31", today),
        ];
        let r = row("2024-01-01", "2024-12-31", today, channels);
        assert_eq!(detect_anomaly(&r), vec![Anomaly::CurrentMasterInactiveChannels]);
    }

    #[test]
    fn current_master_without_channels_is_not_special() {
        let today = day("2024-06-01");
        let r = row("2024-01-01", "2024-12-31", today, Vec::new());
        assert!(detect_anomaly(&r).is_empty());
    }

    #[test]
    fn channel_window_outside_master_reports_both_dates() {
        let today = day("2024-06-01");
        let channels = vec![Channel::new("BANCA", "2023-12-01", "2025-01-31", today)];
        let r = row("2024-01-01", "2024-12-31", today, channels);
        let reasons = detect_anomaly(&r);
        assert_eq!(reasons.len(), 2);
        let text = anomaly_reason(&reasons);
        assert!(text.contains("BANCA"));
        assert!(text.contains("2025-01-31"));
        assert!(text.contains("2024-12-31"));
        assert!(text.contains("2023-12-01"));
        assert!(text.contains("2024-01-01"));
    }

    #[test]
    fn abnormal_master_is_always_special() {
        let today = day("2024-06-01");
        let r = row("2024-12-31", "2024-01-01", today, Vec::new());
        assert_eq!(detect_anomaly(&r), vec![Anomaly::AbnormalMasterWindow]);
    }

    #[test]
    fn status_labels_round_trip() {
        for status in [
            SalesStatus::Current,
            SalesStatus::Pending,
            SalesStatus::Stopped,
            SalesStatus::Abnormal,
        ] {
            assert_eq!(SalesStatus::from_label(status.as_str()), Some(status));
        }
        assert_eq!(SalesStatus::from_label("unknown"), None);
    }
}
