//! Row collection and derived views
//!
//! The store owns every row of the current result set plus the view
//! parameters. Views are recomputed from scratch on each call:
//! special-only filter, status filter, keyword search, stable sort, then
//! pagination.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

use crate::domain::{parse_sale_date, Row, SalesStatus};

pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Sortable columns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortKey {
    No,
    Code,
    Name,
    Currency,
    Unit,
    CoverageType,
    SaleStart,
    SaleEnd,
    Status,
    Descriptor,
    Channels,
    Special,
}

impl SortKey {
    pub const ALL: [SortKey; 12] = [
        SortKey::No,
        SortKey::Code,
        SortKey::Name,
        SortKey::Currency,
        SortKey::Unit,
        SortKey::CoverageType,
        SortKey::SaleStart,
        SortKey::SaleEnd,
        SortKey::Status,
        SortKey::Descriptor,
        SortKey::Channels,
        SortKey::Special,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            SortKey::No => "no",
            SortKey::Code => "code",
            SortKey::Name => "name",
            SortKey::Currency => "currency",
            SortKey::Unit => "unit",
            SortKey::CoverageType => "coverage_type",
            SortKey::SaleStart => "sale_start",
            SortKey::SaleEnd => "sale_end",
            SortKey::Status => "status",
            SortKey::Descriptor => "descriptor",
            SortKey::Channels => "channels",
            SortKey::Special => "special",
        }
    }

    fn value(&self, row: &Row) -> Option<SortValue> {
        let text = |s: &str| (!s.is_empty()).then(|| SortValue::Text(s.to_string()));
        match self {
            SortKey::No => Some(SortValue::Number(row.no)),
            SortKey::Code => text(&row.code),
            SortKey::Name => text(&row.name),
            SortKey::Currency => text(&row.currency),
            SortKey::Unit => text(&row.unit),
            SortKey::CoverageType => text(&row.coverage_type),
            SortKey::SaleStart => parse_sale_date(&row.sale_start).map(SortValue::Date),
            SortKey::SaleEnd => parse_sale_date(&row.sale_end).map(SortValue::Date),
            SortKey::Status => row.main_status.map(SortValue::Status),
            SortKey::Descriptor if row.descriptor.is_loading() => None,
            SortKey::Descriptor => text(&row.descriptor.to_string()),
            SortKey::Channels => text(&row.channel_summary()),
            SortKey::Special => text(&row.special_reason()),
        }
    }
}

impl std::str::FromStr for SortKey {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().replace('-', "_");
        SortKey::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == wanted)
            .ok_or_else(|| format!("unknown sort key: {s}"))
    }
}

/// Comparable cell value; a row yields `None` when the cell is empty
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum SortValue {
    Number(u32),
    Date(NaiveDate),
    Status(SalesStatus),
    Text(String),
}

/// Missing values go last in either direction
fn compare_cells(a: &Option<SortValue>, b: &Option<SortValue>, ascending: bool) -> Ordering {
    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Greater,
        (Some(_), None) => Ordering::Less,
        (Some(x), Some(y)) if ascending => x.cmp(y),
        (Some(x), Some(y)) => y.cmp(x),
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewParams {
    pub search_keyword: String,
    pub special_only: bool,
    /// Error rows never match a status filter
    pub status_filter: Option<SalesStatus>,
    /// `None` keeps result-set order
    pub sort_key: Option<SortKey>,
    pub sort_ascending: bool,
    /// 1-based
    pub page_number: usize,
    pub page_size: usize,
    pub show_all: bool,
}

impl Default for ViewParams {
    fn default() -> Self {
        Self {
            search_keyword: String::new(),
            special_only: false,
            status_filter: None,
            sort_key: None,
            sort_ascending: true,
            page_number: 1,
            page_size: DEFAULT_PAGE_SIZE,
            show_all: false,
        }
    }
}

/// One page of the derived view
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct View {
    pub rows: Vec<Row>,
    /// Rows left after filtering, across all pages
    pub total_count: usize,
    pub total_pages: usize,
    pub page_number: usize,
}

impl View {
    pub fn empty() -> Self {
        Self {
            rows: Vec::new(),
            total_count: 0,
            total_pages: 1,
            page_number: 1,
        }
    }
}

/// Flat, display-ready rendering of a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExportRow {
    pub no: u32,
    pub code: String,
    pub name: String,
    pub currency: String,
    pub unit: String,
    pub coverage_type: String,
    pub sale_start: String,
    pub sale_end: String,
    pub status: String,
    pub descriptor: String,
    pub channels: String,
    pub special: bool,
    pub special_reason: String,
}

impl From<&Row> for ExportRow {
    fn from(row: &Row) -> Self {
        Self {
            no: row.no,
            code: row.code.clone(),
            name: row.name.clone(),
            currency: row.currency.clone(),
            unit: row.unit.clone(),
            coverage_type: row.coverage_type.clone(),
            sale_start: row.display_start(),
            sale_end: row.display_end(),
            status: row.status_label(),
            descriptor: row.descriptor.to_string(),
            channels: row.channel_summary(),
            special: row.is_special(),
            special_reason: row.special_reason(),
        }
    }
}

/// Stable identity of a row across splices
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RowHandle {
    id: u64,
    /// Position when the handle was taken
    index: usize,
}

/// Row scheduled for enrichment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnrichTarget {
    pub handle: RowHandle,
    pub code: String,
    pub is_error: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreCounts {
    pub total: usize,
    pub loading: usize,
    pub errors: usize,
    pub special: usize,
}

#[derive(Debug, Default)]
pub struct ResultStore {
    rows: Vec<Row>,
    ids: Vec<u64>,
    next_id: u64,
    params: ViewParams,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_params(params: ViewParams) -> Self {
        Self {
            params,
            ..Self::default()
        }
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn row(&self, index: usize) -> Option<&Row> {
        self.rows.get(index)
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn params(&self) -> &ViewParams {
        &self.params
    }

    pub fn counts(&self) -> StoreCounts {
        StoreCounts {
            total: self.rows.len(),
            loading: self.rows.iter().filter(|r| r.loading).count(),
            errors: self.rows.iter().filter(|r| r.is_error()).count(),
            special: self.rows.iter().filter(|r| r.is_special()).count(),
        }
    }

    fn allocate_ids(&mut self, count: usize) -> Vec<u64> {
        let start = self.next_id;
        self.next_id += count as u64;
        (start..self.next_id).collect()
    }

    /// Installs a new result set and goes back to the first page
    pub fn replace_rows(&mut self, rows: Vec<Row>) {
        self.ids = self.allocate_ids(rows.len());
        self.rows = rows;
        self.params.page_number = 1;
    }

    pub fn handle(&self, index: usize) -> Option<RowHandle> {
        self.ids.get(index).map(|&id| RowHandle { id, index })
    }

    /// Current position of a handle's row, if it is still in the store
    pub fn locate(&self, handle: RowHandle) -> Option<usize> {
        if self.ids.get(handle.index) == Some(&handle.id) {
            return Some(handle.index);
        }
        self.ids.iter().position(|&id| id == handle.id)
    }

    /// Applies `update` to the row behind `handle` and returns its current
    /// index with a copy of the updated row
    pub fn update_row<F>(&mut self, handle: RowHandle, update: F) -> Option<(usize, Row)>
    where
        F: FnOnce(&mut Row),
    {
        let index = self.locate(handle)?;
        let row = &mut self.rows[index];
        update(row);
        Some((index, row.clone()))
    }

    /// Targets for every row matching `filter`, in index order
    pub fn enrichment_targets<F>(&self, filter: F) -> Vec<EnrichTarget>
    where
        F: Fn(&Row) -> bool,
    {
        self.rows
            .iter()
            .zip(&self.ids)
            .enumerate()
            .filter(|(_, (row, _))| filter(row))
            .map(|(index, (row, &id))| EnrichTarget {
                handle: RowHandle { id, index },
                code: row.code.clone(),
                is_error: row.is_error(),
            })
            .collect()
    }

    /// Replaces the row behind `handle` with `replacement` and renumbers
    /// every row. Returns targets for the inserted rows.
    pub fn splice(&mut self, handle: RowHandle, replacement: Vec<Row>) -> Option<Vec<EnrichTarget>> {
        let index = self.locate(handle)?;
        let ids = self.allocate_ids(replacement.len());

        let targets = replacement
            .iter()
            .zip(&ids)
            .enumerate()
            .map(|(offset, (row, &id))| EnrichTarget {
                handle: RowHandle {
                    id,
                    index: index + offset,
                },
                code: row.code.clone(),
                is_error: row.is_error(),
            })
            .collect();

        self.rows.splice(index..=index, replacement);
        self.ids.splice(index..=index, ids);
        self.renumber();
        Some(targets)
    }

    fn renumber(&mut self) {
        for (i, row) in self.rows.iter_mut().enumerate() {
            row.no = i as u32 + 1;
        }
    }

    // View parameters

    pub fn set_search_keyword(&mut self, keyword: impl Into<String>) {
        self.params.search_keyword = keyword.into();
        self.params.page_number = 1;
    }

    /// Same key flips the direction, a new key starts ascending
    pub fn toggle_sort(&mut self, key: SortKey) {
        if self.params.sort_key == Some(key) {
            self.params.sort_ascending = !self.params.sort_ascending;
        } else {
            self.params.sort_key = Some(key);
            self.params.sort_ascending = true;
        }
    }

    pub fn set_page(&mut self, page_number: usize) {
        self.params.page_number = page_number.max(1);
    }

    pub fn set_page_size(&mut self, page_size: usize) {
        self.params.page_size = page_size.max(1);
        self.params.page_number = 1;
    }

    pub fn set_show_all(&mut self, show_all: bool) {
        self.params.show_all = show_all;
    }

    pub fn set_special_only(&mut self, special_only: bool) {
        self.params.special_only = special_only;
        self.params.page_number = 1;
    }

    pub fn set_status_filter(&mut self, status: Option<SalesStatus>) {
        self.params.status_filter = status;
        self.params.page_number = 1;
    }

    // Derived views

    pub fn view(&self) -> View {
        self.view_with(&self.params)
    }

    pub fn view_with(&self, params: &ViewParams) -> View {
        let sorted = self.filtered_sorted(params);
        let total_count = sorted.len();

        if params.show_all {
            return View {
                rows: sorted.into_iter().cloned().collect(),
                total_count,
                total_pages: 1,
                page_number: 1,
            };
        }

        let page_size = params.page_size.max(1);
        let page_number = params.page_number.max(1);
        let rows = sorted
            .into_iter()
            .skip((page_number - 1).saturating_mul(page_size))
            .take(page_size)
            .cloned()
            .collect();

        View {
            rows,
            total_count,
            total_pages: total_count.div_ceil(page_size).max(1),
            page_number,
        }
    }

    /// Filtered and sorted rows ignoring pagination
    pub fn export_rows(&self, params: &ViewParams) -> Vec<ExportRow> {
        self.filtered_sorted(params)
            .into_iter()
            .map(ExportRow::from)
            .collect()
    }

    fn filtered_sorted(&self, params: &ViewParams) -> Vec<&Row> {
        let keyword = params.search_keyword.trim().to_lowercase();

        let mut rows: Vec<&Row> = self
            .rows
            .iter()
            .filter(|row| !params.special_only || row.is_special())
            .filter(|row| match params.status_filter {
                Some(status) => !row.is_error() && row.main_status == Some(status),
                None => true,
            })
            .filter(|row| {
                keyword.is_empty()
                    || row
                        .search_fields()
                        .iter()
                        .any(|field| field.to_lowercase().contains(&keyword))
            })
            .collect();

        if let Some(key) = params.sort_key {
            let mut keyed: Vec<(Option<SortValue>, &Row)> =
                rows.into_iter().map(|row| (key.value(row), row)).collect();
            keyed.sort_by(|(a, _), (b, _)| compare_cells(a, b, params.sort_ascending));
            rows = keyed.into_iter().map(|(_, row)| row).collect();
        }

        rows
    }
}
