use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::fmt;

use super::constants::{
    CHANNEL_SUMMARY_SEPARATOR, COVERAGE_TYPE_LABELS, CURRENCY_LABELS, UNIT_LABELS,
};
use super::status::{anomaly_reason, compute_status, display_sale_date, Anomaly, SalesStatus};

/// Catalog master record as returned by the master query endpoint
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawRecord {
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub currency_code: String,
    #[serde(default)]
    pub unit_code: String,
    #[serde(default)]
    pub coverage_type_code: String,
    #[serde(default)]
    pub sale_start: String,
    #[serde(default)]
    pub sale_end: String,
}

/// Descriptor lookup record; one code may yield several
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DescriptorRecord {
    pub code: String,
    #[serde(default)]
    pub descriptor: String,
}

/// Channel sales window record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRecord {
    /// Master catalog code this window belongs to
    pub code: String,
    pub channel: String,
    #[serde(default)]
    pub sale_start: String,
    #[serde(default)]
    pub sale_end: String,
}

/// Code → label tables used to derive display fields
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LabelTables {
    pub currency: HashMap<String, String>,
    pub unit: HashMap<String, String>,
    pub coverage_type: HashMap<String, String>,
}

impl Default for LabelTables {
    fn default() -> Self {
        fn table(pairs: &[(&str, &str)]) -> HashMap<String, String> {
            pairs
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect()
        }
        Self {
            currency: table(CURRENCY_LABELS),
            unit: table(UNIT_LABELS),
            coverage_type: table(COVERAGE_TYPE_LABELS),
        }
    }
}

impl LabelTables {
    /// Looks up a label, falling back to the raw code when it is unknown
    fn label(map: &HashMap<String, String>, code: &str) -> String {
        map.get(code.trim())
            .cloned()
            .unwrap_or_else(|| code.trim().to_string())
    }

    pub fn currency(&self, code: &str) -> String {
        Self::label(&self.currency, code)
    }

    pub fn unit(&self, code: &str) -> String {
        Self::label(&self.unit, code)
    }

    pub fn coverage_type(&self, code: &str) -> String {
        Self::label(&self.coverage_type, code)
    }
}

/// Resolution state of the per-code descriptor lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "value", rename_all = "snake_case")]
pub enum Descriptor {
    Loading,
    Resolved(String),
    /// Lookup succeeded but returned no usable value
    Missing,
    /// Lookup returned several conflicting values
    Ambiguous,
    Failed,
}

impl Descriptor {
    /// Collapses lookup records into a single descriptor.
    ///
    /// Distinct non-blank values are counted; more than one is ambiguous.
    pub fn from_records(records: &[DescriptorRecord]) -> Self {
        let distinct: BTreeSet<&str> = records
            .iter()
            .map(|r| r.descriptor.trim())
            .filter(|d| !d.is_empty())
            .collect();
        let mut values = distinct.into_iter();
        match (values.next(), values.next()) {
            (None, _) => Descriptor::Missing,
            (Some(only), None) => Descriptor::Resolved(only.to_string()),
            (Some(_), Some(_)) => Descriptor::Ambiguous,
        }
    }

    pub fn is_loading(&self) -> bool {
        matches!(self, Descriptor::Loading)
    }
}

impl fmt::Display for Descriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Descriptor::Loading => f.write_str("loading..."),
            Descriptor::Resolved(value) => f.write_str(value),
            Descriptor::Missing => f.write_str("-"),
            Descriptor::Ambiguous => f.write_str("ambiguous"),
            Descriptor::Failed => f.write_str("query failed"),
        }
    }
}

/// Why a row could not be resolved at all
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RowErrorKind {
    NotFound,
    QueryFailed { message: String },
}

impl fmt::Display for RowErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowErrorKind::NotFound => f.write_str("not found"),
            RowErrorKind::QueryFailed { .. } => f.write_str("query failed"),
        }
    }
}

/// One channel sales window attached to a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub code: String,
    /// Raw wire dates
    pub sale_start: String,
    pub sale_end: String,
    pub status: SalesStatus,
}

impl Channel {
    pub fn new(code: &str, sale_start: &str, sale_end: &str, today: NaiveDate) -> Self {
        Self {
            code: code.to_string(),
            sale_start: sale_start.to_string(),
            sale_end: sale_end.to_string(),
            status: compute_status(today, sale_start, sale_end),
        }
    }

    pub fn from_record(record: &ChannelRecord, today: NaiveDate) -> Self {
        Self::new(&record.channel, &record.sale_start, &record.sale_end, today)
    }

    pub fn display_start(&self) -> String {
        display_sale_date(&self.sale_start)
    }

    pub fn display_end(&self) -> String {
        display_sale_date(&self.sale_end)
    }

    #[cfg(test)]
    pub(crate) fn with_status(mut self, status: SalesStatus) -> Self {
        self.status = status;
        self
    }
}

impl fmt::Display for Channel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}~{} ({})",
            self.code,
            self.display_start(),
            self.display_end(),
            self.status
        )
    }
}

/// Enriched result row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// 1-based position in the raw result set
    pub no: u32,
    /// Catalog code, kept verbatim (leading zeros are significant)
    pub code: String,
    pub name: String,
    pub currency: String,
    pub unit: String,
    pub coverage_type: String,
    /// Raw master sale window
    pub sale_start: String,
    pub sale_end: String,
    /// `None` only for error rows
    pub main_status: Option<SalesStatus>,
    pub descriptor: Descriptor,
    pub channels: Vec<Channel>,
    pub anomalies: Vec<Anomaly>,
    pub loading: bool,
    pub error_kind: Option<RowErrorKind>,
}

impl Row {
    /// Builds a row awaiting enrichment. The master status is computed eagerly.
    pub fn skeleton(no: u32, record: &RawRecord, labels: &LabelTables, today: NaiveDate) -> Self {
        Self {
            no,
            code: record.code.clone(),
            name: record.name.clone(),
            currency: labels.currency(&record.currency_code),
            unit: labels.unit(&record.unit_code),
            coverage_type: labels.coverage_type(&record.coverage_type_code),
            sale_start: record.sale_start.clone(),
            sale_end: record.sale_end.clone(),
            main_status: Some(compute_status(today, &record.sale_start, &record.sale_end)),
            descriptor: Descriptor::Loading,
            channels: Vec::new(),
            anomalies: Vec::new(),
            loading: true,
            error_kind: None,
        }
    }

    /// Builds a placeholder for a code that could not be resolved
    pub fn failed(no: u32, code: &str, kind: RowErrorKind) -> Self {
        Self {
            no,
            code: code.to_string(),
            name: String::new(),
            currency: String::new(),
            unit: String::new(),
            coverage_type: String::new(),
            sale_start: String::new(),
            sale_end: String::new(),
            main_status: None,
            descriptor: Descriptor::Missing,
            channels: Vec::new(),
            anomalies: Vec::new(),
            loading: false,
            error_kind: Some(kind),
        }
    }

    pub fn is_error(&self) -> bool {
        self.error_kind.is_some()
    }

    /// A row is special once enrichment finished and at least one rule fired
    pub fn is_special(&self) -> bool {
        !self.loading && !self.anomalies.is_empty()
    }

    pub fn special_reason(&self) -> String {
        anomaly_reason(&self.anomalies)
    }

    pub fn display_start(&self) -> String {
        display_sale_date(&self.sale_start)
    }

    pub fn display_end(&self) -> String {
        display_sale_date(&self.sale_end)
    }

    /// Rendered channel list as shown in the channel column
    pub fn channel_summary(&self) -> String {
        self.channels
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(CHANNEL_SUMMARY_SEPARATOR)
    }

    pub fn status_label(&self) -> String {
        match (&self.error_kind, self.main_status) {
            (Some(kind), _) => kind.to_string(),
            (None, Some(status)) => status.to_string(),
            (None, None) => String::new(),
        }
    }

    /// Every text a keyword search is matched against
    pub fn search_fields(&self) -> Vec<String> {
        vec![
            self.no.to_string(),
            self.code.clone(),
            self.name.clone(),
            self.currency.clone(),
            self.unit.clone(),
            self.coverage_type.clone(),
            self.display_start(),
            self.display_end(),
            self.status_label(),
            self.descriptor.to_string(),
            self.channel_summary(),
            self.special_reason(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
    }

    fn record() -> RawRecord {
        RawRecord {
            code: "000451".into(),
            name: "Family Care".into(),
            currency_code: "01".into(),
            unit_code: "9".into(),
            coverage_type_code: "H".into(),
            sale_start: "20240101".into(),
            sale_end: "99991231".into(),
        }
    }

    #[test]
    fn skeleton_maps_labels_and_keeps_code_verbatim() {
        let row = Row::skeleton(3, &record(), &LabelTables::default(), today());
        assert_eq!(row.code, "000451");
        assert_eq!(row.currency, "CNY");
        assert_eq!(row.unit, "9", "unknown codes fall back to the raw value");
        assert_eq!(row.coverage_type, "health");
        assert_eq!(row.main_status, Some(SalesStatus::Current));
        assert!(row.loading);
        assert!(row.descriptor.is_loading());
        assert!(!row.is_special());
    }

    #[test]
    fn descriptor_collapses_conflicting_values() {
        let rec = |d: &str| DescriptorRecord {
            code: "1".into(),
            descriptor: d.into(),
        };
        assert_eq!(Descriptor::from_records(&[]), Descriptor::Missing);
        assert_eq!(Descriptor::from_records(&[rec("  ")]), Descriptor::Missing);
        assert_eq!(
            Descriptor::from_records(&[rec("A1"), rec("A1 ")]),
            Descriptor::Resolved("A1".into())
        );
        assert_eq!(
            Descriptor::from_records(&[rec("A1"), rec("B2")]),
            Descriptor::Ambiguous
        );
    }

    #[test]
    fn channel_summary_renders_every_window() {
        let mut row = Row::skeleton(1, &record(), &LabelTables::default(), today());
        row.channels = vec![
            Channel::new("AGENCY", "20240101", "20241231", today()),
            Channel::new("ONLINE", "20250101", "99991231", today()),
        ];
        assert_eq!(
            row.channel_summary(),
            "AGENCY 2024-01-01~2024-12-31 (current); ONLINE 2025-01-01~9999-12-31 (current)"
        );
    }

    #[test]
    fn failed_row_reports_error_kind_as_status() {
        let row = Row::failed(2, "0099", RowErrorKind::NotFound);
        assert!(row.is_error());
        assert!(!row.loading);
        assert_eq!(row.status_label(), "not found");
        assert!(row.channels.is_empty());
    }
}
