//! Catalog constants shared across the engine
//!
//! Values here mirror the contract of the backing catalog system: the
//! open-ended sale date, the fixed channel list and the default code→label
//! tables used to render display fields.

use chrono::NaiveDate;

/// Open-ended sale end date used by the catalog to mean "no defined end"
pub const OPEN_ENDED_YEAR: i32 = 9999;
pub const OPEN_ENDED_MONTH: u32 = 12;
pub const OPEN_ENDED_DAY: u32 = 31;

/// Wire form of the open-ended sentinel
pub const OPEN_ENDED_RAW: &str = "9999-12-31";

/// Returns the open-ended sentinel as a calendar date
pub fn open_ended_date() -> NaiveDate {
    // 9999-12-31 is always representable by chrono
    NaiveDate::from_ymd_opt(OPEN_ENDED_YEAR, OPEN_ENDED_MONTH, OPEN_ENDED_DAY)
        .unwrap_or(NaiveDate::MAX)
}

/// Channels queried when a channel-mode request names no subset
pub const DEFAULT_CHANNELS: &[&str] = &[
    "AGENCY", "BANCA", "BROKER", "DIRECT", "ONLINE", "TELE", "GROUP",
];

/// Default currency code → label table
pub const CURRENCY_LABELS: &[(&str, &str)] = &[
    ("01", "CNY"),
    ("02", "HKD"),
    ("13", "USD"),
    ("14", "JPY"),
    ("27", "EUR"),
    ("38", "GBP"),
];

/// Default premium unit code → label table
pub const UNIT_LABELS: &[(&str, &str)] = &[
    ("1", "per policy"),
    ("2", "per insured"),
    ("3", "per unit"),
    ("4", "per thousand"),
];

/// Default coverage type code → label table
pub const COVERAGE_TYPE_LABELS: &[(&str, &str)] = &[
    ("L", "life"),
    ("H", "health"),
    ("A", "accident"),
    ("P", "property"),
    ("M", "mixed"),
];

/// Separator used when rendering a channel summary
pub const CHANNEL_SUMMARY_SEPARATOR: &str = "; ";
