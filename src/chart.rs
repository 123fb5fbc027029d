use crate::shared_strings::SharedStringTable;
use crate::types::{CellRange, CellValue, SheetId, XlsxError};
use crate::utility::cell_to_rowcol;
use crate::worksheet::ObjectPosition;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChartType {
    Area,
    Bar,
    Column,
    Line,
    Pie,
    Doughnut,
    Scatter,
    Radar,
    Stock,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LegendPosition {
    #[default]
    Right,
    Left,
    Top,
    Bottom,
    None,
}

/// A literal value cached in a chart series.
#[derive(Debug, Clone, PartialEq)]
pub enum CachedValue {
    Number(f64),
    Text(String),
    Empty,
}

/// A series reference such as `Sheet1!$A$1:$A$5` plus its cached values.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartRange {
    formula: String,
    user_data: Option<Vec<CachedValue>>,
    cache: Option<Vec<CachedValue>>,
}

impl ChartRange {
    pub fn new(formula: &str) -> Self {
        Self {
            formula: formula.strip_prefix('=').unwrap_or(formula).to_string(),
            user_data: None,
            cache: None,
        }
    }

    pub fn formula(&self) -> &str {
        &self.formula
    }

    /// Values resolved during assembly, or the user's own data.
    pub fn cache(&self) -> Option<&[CachedValue]> {
        self.cache.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ChartSeries {
    values: Option<ChartRange>,
    categories: Option<ChartRange>,
    name: Option<String>,
    name_range: Option<ChartRange>,
}

impl ChartSeries {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_values(mut self, range: &str) -> Self {
        self.values = Some(ChartRange::new(range));
        self
    }

    pub fn set_categories(mut self, range: &str) -> Self {
        self.categories = Some(ChartRange::new(range));
        self
    }

    /// A name starting with `=` refers to a cell; anything else is literal.
    pub fn set_name(mut self, name: &str) -> Self {
        if name.starts_with('=') {
            self.name_range = Some(ChartRange::new(name));
            self.name = None;
        } else {
            self.name = Some(name.to_string());
            self.name_range = None;
        }
        self
    }

    /// Literal data for the values range; no lookup is done for it.
    pub fn set_values_data(mut self, data: Vec<CachedValue>) -> Self {
        if let Some(values) = self.values.as_mut() {
            values.user_data = Some(data);
        }
        self
    }

    pub fn set_categories_data(mut self, data: Vec<CachedValue>) -> Self {
        if let Some(categories) = self.categories.as_mut() {
            categories.user_data = Some(data);
        }
        self
    }

    pub fn values(&self) -> Option<&ChartRange> {
        self.values.as_ref()
    }

    pub fn categories(&self) -> Option<&ChartRange> {
        self.categories.as_ref()
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn name_range(&self) -> Option<&ChartRange> {
        self.name_range.as_ref()
    }

    /// Ranges needing cached data, in categories, values, name order.
    fn ranges_mut(&mut self) -> impl Iterator<Item = &mut ChartRange> {
        [self.categories.as_mut(), self.values.as_mut(), self.name_range.as_mut()]
            .into_iter()
            .flatten()
    }
}

/// Where a chart is shown.
#[derive(Debug, Clone, PartialEq)]
pub enum ChartContainer {
    Embedded { sheet: SheetId, position: ObjectPosition },
    Standalone(SheetId),
}

#[derive(Debug, Clone, PartialEq)]
pub struct Chart {
    pub chart_type: ChartType,
    pub title: Option<String>,
    pub x_axis_title: Option<String>,
    pub y_axis_title: Option<String>,
    pub show_legend: bool,
    pub legend_position: LegendPosition,
    series: Vec<ChartSeries>,
    combined: Option<Box<Chart>>,
    pub(crate) container: Option<ChartContainer>,
    pub(crate) id: Option<u32>,
}

impl Chart {
    pub fn new(chart_type: ChartType) -> Self {
        Self {
            chart_type,
            title: None,
            x_axis_title: None,
            y_axis_title: None,
            show_legend: true,
            legend_position: LegendPosition::Right,
            series: Vec::new(),
            combined: None,
            container: None,
            id: None,
        }
    }

    pub fn add_series(&mut self, series: ChartSeries) -> &mut Self {
        self.series.push(series);
        self
    }

    pub fn set_title(&mut self, title: impl Into<String>) -> &mut Self {
        self.title = Some(title.into());
        self
    }

    pub fn set_legend_position(&mut self, position: LegendPosition) -> &mut Self {
        self.show_legend = position != LegendPosition::None;
        self.legend_position = position;
        self
    }

    /// Draw a second chart on the same plot area (e.g. a line over columns).
    pub fn combine(&mut self, chart: Chart) -> &mut Self {
        self.combined = Some(Box::new(chart));
        self
    }

    pub fn series(&self) -> &[ChartSeries] {
        &self.series
    }

    pub fn combined(&self) -> Option<&Chart> {
        self.combined.as_deref()
    }

    pub fn container(&self) -> Option<&ChartContainer> {
        self.container.as_ref()
    }

    /// Chart part number assigned during assembly.
    pub fn id(&self) -> Option<u32> {
        self.id
    }

    pub fn is_placed(&self) -> bool {
        self.container.is_some()
    }

    fn ranges_mut(&mut self) -> Vec<&mut ChartRange> {
        let mut ranges: Vec<&mut ChartRange> =
            self.series.iter_mut().flat_map(ChartSeries::ranges_mut).collect();
        if let Some(combined) = self.combined.as_deref_mut() {
            ranges.extend(combined.ranges_mut());
        }
        ranges
    }
}

/// Read access to sheet cells for chart caches.
pub trait CellSource {
    fn find_sheet(&self, name: &str) -> Option<SheetId>;

    /// Raw values across `range`, row by row, one entry per cell.
    fn read_range(&self, sheet: SheetId, range: &CellRange) -> Vec<Option<CellValue>>;
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ParsedRange {
    Span { sheet: String, range: CellRange },
    Union,
    TwoDimensional,
    Invalid,
}

/// Split `Sheet!A1:B1` into sheet name and a one-dimensional span.
pub(crate) fn parse_chart_range(text: &str) -> ParsedRange {
    let text = text
        .strip_prefix('(')
        .and_then(|inner| inner.strip_suffix(')'))
        .unwrap_or(text);

    let Some(bang) = text.rfind('!').filter(|&bang| bang > 0) else {
        return ParsedRange::Invalid;
    };
    let (sheet, cells) = (&text[..bang], &text[bang + 1..]);

    let (first, last) = cells.split_once(':').unwrap_or((cells, cells));
    let (Some((first_row, first_col)), Some((last_row, last_col))) =
        (cell_to_rowcol(first), cell_to_rowcol(last))
    else {
        return ParsedRange::Invalid;
    };

    if first_row != last_row && first_col != last_col {
        return ParsedRange::TwoDimensional;
    }

    if is_union(sheet) {
        return ParsedRange::Union;
    }

    let sheet = sheet.strip_prefix('\'').unwrap_or(sheet);
    let sheet = sheet.strip_suffix('\'').unwrap_or(sheet);
    if sheet.is_empty() {
        return ParsedRange::Invalid;
    }

    ParsedRange::Span {
        sheet: sheet.replace("''", "'"),
        range: CellRange::new(first_row, first_col, last_row, last_col),
    }
}

/// A comma outside quotes in the sheet part means a multi-area reference.
fn is_union(sheet: &str) -> bool {
    let mut quoted = false;
    for c in sheet.chars() {
        match c {
            '\'' => quoted = !quoted,
            ',' if !quoted => return true,
            _ => {}
        }
    }
    false
}

fn to_cached(value: Option<CellValue>, strings: &SharedStringTable) -> CachedValue {
    match value {
        Some(CellValue::Number(n)) => CachedValue::Number(n),
        Some(CellValue::Bool(b)) => CachedValue::Number(if b { 1.0 } else { 0.0 }),
        Some(CellValue::SharedString(index)) => match strings.get(index) {
            Some(text) if !strings.is_rich(index) => CachedValue::Text(text.to_string()),
            _ => CachedValue::Empty,
        },
        Some(CellValue::Formula { cached_value, .. }) => match cached_value {
            None => CachedValue::Number(0.0),
            Some(result) => match result.parse::<f64>() {
                Ok(n) => CachedValue::Number(n),
                Err(_) => CachedValue::Text(result),
            },
        },
        Some(CellValue::Blank) | None => CachedValue::Empty,
    }
}

/// Fills chart series caches from worksheet data, memoized by range text
/// for one assembly run.
#[derive(Debug, Default)]
pub struct ChartDataResolver {
    memo: HashMap<String, Vec<CachedValue>>,
}

impl ChartDataResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fill(
        &mut self,
        charts: &mut [Chart],
        cells: &(impl CellSource + ?Sized),
        strings: &SharedStringTable,
    ) -> Result<(), XlsxError> {
        for chart in charts.iter_mut().filter(|chart| chart.is_placed()) {
            for range in chart.ranges_mut() {
                if let Some(data) = &range.user_data {
                    self.memo.entry(range.formula.clone()).or_insert_with(|| data.clone());
                    range.cache = Some(data.clone());
                    continue;
                }

                if let Some(data) = self.memo.get(&range.formula) {
                    range.cache = Some(data.clone());
                    continue;
                }

                if let Some(data) = self.resolve(&range.formula, cells, strings)? {
                    self.memo.insert(range.formula.clone(), data.clone());
                    range.cache = Some(data);
                }
            }
        }

        tracing::debug!(ranges = self.memo.len(), "cached chart series data");
        Ok(())
    }

    /// Literal values for one range; `None` when the range is not supported.
    pub fn resolve(
        &self,
        text: &str,
        cells: &(impl CellSource + ?Sized),
        strings: &SharedStringTable,
    ) -> Result<Option<Vec<CachedValue>>, XlsxError> {
        match parse_chart_range(text) {
            ParsedRange::Invalid => {
                tracing::warn!(range = text, "skipping unparseable chart range");
                Ok(None)
            }
            ParsedRange::TwoDimensional => {
                tracing::warn!(range = text, "skipping two-dimensional chart range");
                Ok(None)
            }
            ParsedRange::Union => Ok(Some(Vec::new())),
            ParsedRange::Span { sheet, range } => {
                let Some(sheet_id) = cells.find_sheet(&sheet) else {
                    return Err(XlsxError::Reference(format!(
                        "Unknown worksheet reference '{}' in chart range '{}'",
                        sheet, text
                    )));
                };

                Ok(Some(
                    cells
                        .read_range(sheet_id, &range)
                        .into_iter()
                        .map(|value| to_cached(value, strings))
                        .collect(),
                ))
            }
        }
    }

    pub fn clear(&mut self) {
        self.memo.clear();
    }
}
