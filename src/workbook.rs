use crate::chart::{Chart, ChartContainer, ChartDataResolver};
use crate::defined_names::DefinedNameRegistry;
use crate::image::ImageCatalog;
use crate::pipeline::{self, Packager};
use crate::properties::{CustomProperty, CustomPropertyType, DocProperties};
use crate::shared_strings::SharedStringTable;
use crate::styles::{FontStyle, Format, FormatTable};
use crate::types::{ChartId, FormatId, SheetId, XlsxError};
use crate::validation::{validate_cell_coords, validate_sheet_name, validate_tab_ratio, validate_unique_sheet_name};
use crate::worksheet::{ObjectPosition, SheetKind, SheetWriter, Worksheet};
use crate::writer::ZipPackager;
use std::path::Path;

/// Tab bar width as a percentage of the window.
pub const DEFAULT_TAB_RATIO: f64 = 60.0;
/// Workbook window size in twips.
pub const DEFAULT_WINDOW_WIDTH: u32 = 16095;
pub const DEFAULT_WINDOW_HEIGHT: u32 = 9660;

/// Workbook-wide settings.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkbookOptions {
    pub default_font: FontStyle,
    pub tab_ratio: f64,
    pub window_width: u32,
    pub window_height: u32,
}

impl Default for WorkbookOptions {
    fn default() -> Self {
        Self {
            default_font: FontStyle::default(),
            tab_ratio: DEFAULT_TAB_RATIO,
            window_width: DEFAULT_WINDOW_WIDTH,
            window_height: DEFAULT_WINDOW_HEIGHT,
        }
    }
}

/// The workbook aggregate. Owns every sheet, format, string, name, image
/// and chart until [`Workbook::finalize`] hands them to a [`Packager`].
#[derive(Debug)]
pub struct Workbook {
    pub(crate) sheets: Vec<Worksheet>,
    pub(crate) formats: FormatTable,
    pub(crate) strings: SharedStringTable,
    pub(crate) names: DefinedNameRegistry,
    pub(crate) catalog: ImageCatalog,
    pub(crate) charts: Vec<Chart>,
    pub(crate) chart_resolver: ChartDataResolver,
    pub(crate) properties: DocProperties,
    pub(crate) custom_properties: Vec<CustomProperty>,
    pub(crate) options: WorkbookOptions,
    pub(crate) active_sheet: usize,
    pub(crate) vba_project: Option<Vec<u8>>,
    pub(crate) vba_codename: Option<String>,
    pub(crate) has_comments: bool,
    pub(crate) has_metadata: bool,
    worksheet_count: usize,
    chartsheet_count: usize,
    finalized: bool,
}

impl Default for Workbook {
    fn default() -> Self {
        Self::new()
    }
}

impl Workbook {
    pub fn new() -> Self {
        Self::with_options(WorkbookOptions::default())
    }

    pub fn with_options(options: WorkbookOptions) -> Self {
        Self {
            sheets: Vec::new(),
            formats: FormatTable::with_default_font(options.default_font.clone()),
            strings: SharedStringTable::new(),
            names: DefinedNameRegistry::new(),
            catalog: ImageCatalog::new(),
            charts: Vec::new(),
            chart_resolver: ChartDataResolver::new(),
            properties: DocProperties::default(),
            custom_properties: Vec::new(),
            options,
            active_sheet: 0,
            vba_project: None,
            vba_codename: None,
            has_comments: false,
            has_metadata: false,
            worksheet_count: 0,
            chartsheet_count: 0,
            finalized: false,
        }
    }

    // ----- sheets -----

    /// Add a worksheet named `SheetN`.
    pub fn add_worksheet(&mut self) -> Result<SheetId, XlsxError> {
        let name = format!("Sheet{}", self.worksheet_count + 1);
        self.push_sheet(name, SheetKind::Worksheet)
    }

    pub fn add_worksheet_with_name(&mut self, name: &str) -> Result<SheetId, XlsxError> {
        self.push_sheet(name.to_string(), SheetKind::Worksheet)
    }

    /// Add a chartsheet named `ChartN`.
    pub fn add_chartsheet(&mut self) -> Result<SheetId, XlsxError> {
        let name = format!("Chart{}", self.chartsheet_count + 1);
        self.push_sheet(name, SheetKind::Chartsheet)
    }

    pub fn add_chartsheet_with_name(&mut self, name: &str) -> Result<SheetId, XlsxError> {
        self.push_sheet(name.to_string(), SheetKind::Chartsheet)
    }

    fn push_sheet(&mut self, name: String, kind: SheetKind) -> Result<SheetId, XlsxError> {
        validate_sheet_name(&name)?;
        validate_unique_sheet_name(&name, self.sheets.iter().map(Worksheet::name))?;

        match kind {
            SheetKind::Worksheet => self.worksheet_count += 1,
            SheetKind::Chartsheet => self.chartsheet_count += 1,
        }
        self.sheets.push(Worksheet::new(name, kind));
        Ok(SheetId(self.sheets.len() - 1))
    }

    /// Writer for one sheet's cells and objects.
    pub fn worksheet(&mut self, id: SheetId) -> Result<SheetWriter<'_>, XlsxError> {
        let sheet = self
            .sheets
            .get_mut(id.index())
            .ok_or_else(|| XlsxError::Reference(format!("Unknown sheet index {}", id.index())))?;

        Ok(SheetWriter { sheet, strings: &mut self.strings, formats: &mut self.formats })
    }

    pub fn worksheet_by_name(&mut self, name: &str) -> Result<SheetWriter<'_>, XlsxError> {
        let id = self
            .sheet_id(name)
            .ok_or_else(|| XlsxError::Reference(format!("Unknown sheet '{}'", name)))?;
        self.worksheet(id)
    }

    pub fn sheet_id(&self, name: &str) -> Option<SheetId> {
        self.sheets.iter().position(|sheet| sheet.name() == name).map(SheetId)
    }

    pub fn sheet(&self, id: SheetId) -> Option<&Worksheet> {
        self.sheets.get(id.index())
    }

    pub fn sheets(&self) -> &[Worksheet] {
        &self.sheets
    }

    /// Requested active sheet. Hidden sheets fall back to the first
    /// visible one when the workbook is assembled.
    pub fn activate(&mut self, id: SheetId) -> Result<(), XlsxError> {
        if id.index() >= self.sheets.len() {
            return Err(XlsxError::Reference(format!("Unknown sheet index {}", id.index())));
        }
        self.active_sheet = id.index();
        Ok(())
    }

    // ----- formats -----

    pub fn add_format(&mut self, format: Format) -> FormatId {
        self.formats.register(format)
    }

    pub fn format(&self, id: FormatId) -> Option<&Format> {
        self.formats.get(id)
    }

    pub fn formats(&self) -> &FormatTable {
        &self.formats
    }

    /// Override palette slot `index` (8-64).
    pub fn set_custom_color(&mut self, index: u32, red: i32, green: i32, blue: i32) -> Result<(), XlsxError> {
        self.formats.set_custom_color(index, red, green, blue)
    }

    pub fn strings(&self) -> &SharedStringTable {
        &self.strings
    }

    // ----- charts -----

    /// Register a chart. It is only written once inserted into a sheet.
    pub fn add_chart(&mut self, chart: Chart) -> ChartId {
        self.charts.push(chart);
        ChartId(self.charts.len() - 1)
    }

    pub fn chart(&self, id: ChartId) -> Option<&Chart> {
        self.charts.get(id.0)
    }

    pub fn chart_mut(&mut self, id: ChartId) -> Option<&mut Chart> {
        self.charts.get_mut(id.0)
    }

    pub fn insert_chart(&mut self, sheet: SheetId, row: u32, col: u16, chart: ChartId) -> Result<(), XlsxError> {
        self.insert_chart_with_position(sheet, ObjectPosition::new(row, col), chart)
    }

    pub fn insert_chart_with_position(
        &mut self,
        sheet: SheetId,
        position: ObjectPosition,
        chart: ChartId,
    ) -> Result<(), XlsxError> {
        validate_cell_coords(position.row, position.col, "Chart")?;
        let target = self.placement_target(sheet, chart, SheetKind::Worksheet)?;
        target.charts.push(chart);
        self.charts[chart.0].container = Some(ChartContainer::Embedded { sheet, position });
        Ok(())
    }

    /// Show `chart` as the whole content of a chartsheet.
    pub fn set_chartsheet_chart(&mut self, sheet: SheetId, chart: ChartId) -> Result<(), XlsxError> {
        let target = self.placement_target(sheet, chart, SheetKind::Chartsheet)?;
        if !target.charts.is_empty() {
            return Err(XlsxError::Validation(format!(
                "Chartsheet '{}' already holds a chart",
                target.name()
            )));
        }
        target.charts.push(chart);
        self.charts[chart.0].container = Some(ChartContainer::Standalone(sheet));
        Ok(())
    }

    fn placement_target(&mut self, sheet: SheetId, chart: ChartId, kind: SheetKind) -> Result<&mut Worksheet, XlsxError> {
        let Some(existing) = self.charts.get(chart.0) else {
            return Err(XlsxError::Reference(format!("Unknown chart index {}", chart.0)));
        };
        if existing.is_placed() {
            return Err(XlsxError::Validation("Chart has already been inserted".to_string()));
        }

        let target = self
            .sheets
            .get_mut(sheet.index())
            .ok_or_else(|| XlsxError::Reference(format!("Unknown sheet index {}", sheet.index())))?;
        if target.kind() != kind {
            return Err(XlsxError::Validation(format!(
                "Sheet '{}' is a {:?}, expected a {:?}",
                target.name(),
                target.kind(),
                kind
            )));
        }
        Ok(target)
    }

    // ----- names and properties -----

    /// `define_name("Rate", "=Sheet1!$A$1")`, or `Sheet1!Rate` for a
    /// sheet-local name.
    pub fn define_name(&mut self, name: &str, range: &str) -> Result<(), XlsxError> {
        self.names.define(name, range, &self.sheets)
    }

    pub fn set_property(&mut self, key: &str, value: &str) -> Result<(), XlsxError> {
        self.properties.set(key, value)
    }

    pub fn set_properties(&mut self, properties: DocProperties) {
        self.properties = properties;
    }

    pub fn properties(&self) -> &DocProperties {
        &self.properties
    }

    /// Custom property with its type inferred from `value`.
    pub fn set_custom_property(&mut self, name: &str, value: &str) -> Result<(), XlsxError> {
        self.custom_properties.push(CustomProperty::new(name, value, None)?);
        Ok(())
    }

    pub fn set_custom_property_with_type(
        &mut self,
        name: &str,
        value: &str,
        kind: CustomPropertyType,
    ) -> Result<(), XlsxError> {
        self.custom_properties.push(CustomProperty::new(name, value, Some(kind))?);
        Ok(())
    }

    pub fn set_tab_ratio(&mut self, ratio: f64) -> Result<(), XlsxError> {
        validate_tab_ratio(ratio)?;
        self.options.tab_ratio = ratio;
        Ok(())
    }

    /// Window size in pixels. Zero keeps the default for that dimension.
    pub fn set_size(&mut self, width: u32, height: u32) {
        self.options.window_width = pixels_to_twips(width, DEFAULT_WINDOW_WIDTH);
        self.options.window_height = pixels_to_twips(height, DEFAULT_WINDOW_HEIGHT);
    }

    pub fn options(&self) -> &WorkbookOptions {
        &self.options
    }

    /// Attach a `vbaProject.bin` extracted from an existing macro workbook.
    pub fn set_vba_project(&mut self, path: impl AsRef<Path>) -> Result<(), XlsxError> {
        let path = path.as_ref();
        let data = std::fs::read(path).map_err(|e| {
            XlsxError::Package(format!("Couldn't read VBA project '{}': {}", path.display(), e))
        })?;
        self.vba_project = Some(data);
        Ok(())
    }

    pub fn set_vba_name(&mut self, name: &str) {
        self.vba_codename = Some(name.to_string());
    }

    // ----- output -----

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    /// Run every assembly phase and hand the result to `packager`. Once a
    /// run has succeeded further calls do nothing.
    pub fn finalize(&mut self, packager: &mut dyn Packager) -> Result<(), XlsxError> {
        if self.finalized {
            tracing::debug!("workbook already finalized");
            return Ok(());
        }

        pipeline::run(self, packager)?;
        self.finalized = true;
        Ok(())
    }

    /// Assemble and write the `.xlsx` file.
    pub fn save(&mut self, path: impl AsRef<Path>) -> Result<(), XlsxError> {
        let mut packager = ZipPackager::new(path.as_ref());
        self.finalize(&mut packager)
    }

    /// Assemble and return the `.xlsx` bytes.
    pub fn save_to_buffer(&mut self) -> Result<Vec<u8>, XlsxError> {
        let mut packager = ZipPackager::in_memory();
        self.finalize(&mut packager)?;
        packager
            .into_bytes()
            .ok_or_else(|| XlsxError::Package("Workbook has already been saved".to_string()))
    }
}

fn pixels_to_twips(pixels: u32, default: u32) -> u32 {
    if pixels == 0 {
        default
    } else {
        u32::try_from(u64::from(pixels) * 1440 / 96).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chart::{ChartSeries, ChartType};

    #[test]
    fn test_default_sheet_names() {
        let mut workbook = Workbook::new();
        let first = workbook.add_worksheet().unwrap();
        let chart = workbook.add_chartsheet().unwrap();
        let second = workbook.add_worksheet().unwrap();

        let names: Vec<_> = workbook.sheets().iter().map(Worksheet::name).collect();
        assert_eq!(names, vec!["Sheet1", "Chart1", "Sheet2"]);
        assert_eq!((first.index(), chart.index(), second.index()), (0, 1, 2));
        assert_eq!(workbook.sheet_id("Chart1"), Some(chart));
    }

    #[test]
    fn test_sheet_name_errors() {
        let mut workbook = Workbook::new();
        workbook.add_worksheet_with_name("Data").unwrap();
        assert!(matches!(workbook.add_worksheet_with_name("DATA"), Err(XlsxError::Validation(_))));
        assert!(matches!(workbook.add_worksheet_with_name("a/b"), Err(XlsxError::Validation(_))));

        // Default numbering counts every worksheet, named or not.
        assert_eq!(workbook.add_worksheet().unwrap().index(), 1);
        assert_eq!(workbook.sheets()[1].name(), "Sheet2");
    }

    #[test]
    fn test_chart_placement_rules() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().unwrap();
        let chartsheet = workbook.add_chartsheet().unwrap();

        let mut line = Chart::new(ChartType::Line);
        line.add_series(ChartSeries::new().set_values("=Sheet1!$A$1:$A$3"));
        let chart = workbook.add_chart(line);

        assert!(matches!(
            workbook.insert_chart(chartsheet, 0, 0, chart),
            Err(XlsxError::Validation(_))
        ));
        workbook.insert_chart(sheet, 2, 3, chart).unwrap();
        assert!(matches!(workbook.insert_chart(sheet, 10, 3, chart), Err(XlsxError::Validation(_))));

        assert_eq!(
            workbook.chart(chart).and_then(Chart::container),
            Some(&ChartContainer::Embedded { sheet, position: ObjectPosition::new(2, 3) })
        );

        let pie = workbook.add_chart(Chart::new(ChartType::Pie));
        workbook.set_chartsheet_chart(chartsheet, pie).unwrap();
        let bar = workbook.add_chart(Chart::new(ChartType::Bar));
        assert!(workbook.set_chartsheet_chart(chartsheet, bar).is_err());
        assert!(matches!(
            workbook.insert_chart(sheet, 0, 0, ChartId(99)),
            Err(XlsxError::Reference(_))
        ));
    }

    #[test]
    fn test_window_settings() {
        let mut workbook = Workbook::new();
        workbook.set_size(1200, 0);
        assert_eq!(workbook.options().window_width, 18000);
        assert_eq!(workbook.options().window_height, DEFAULT_WINDOW_HEIGHT);

        workbook.set_size(4_000_000, u32::MAX);
        assert_eq!(workbook.options().window_width, 60_000_000);
        assert_eq!(workbook.options().window_height, u32::MAX);

        assert!(workbook.set_tab_ratio(101.0).is_err());
        workbook.set_tab_ratio(35.5).unwrap();
        assert_eq!(workbook.options().tab_ratio, 35.5);
    }

    #[test]
    fn test_properties_are_validated() {
        let mut workbook = Workbook::new();
        workbook.set_property("author", "Ana").unwrap();
        assert!(workbook.set_property("owner", "Ana").is_err());
        workbook.set_custom_property("Checked by", "Eve").unwrap();
        workbook
            .set_custom_property_with_type("Date completed", "2016-12-12T23:00:00Z", CustomPropertyType::Date)
            .unwrap();
        assert_eq!(workbook.custom_properties.len(), 2);
        assert_eq!(workbook.properties().author.as_deref(), Some("Ana"));
    }

    #[test]
    fn test_default_font_option() {
        let options = WorkbookOptions {
            default_font: FontStyle { name: "Arial".to_string(), size: 10.0, ..FontStyle::default() },
            ..WorkbookOptions::default()
        };
        let workbook = Workbook::with_options(options);
        let default = workbook.formats().default_format();
        assert_eq!(workbook.format(default).map(|f| f.font().name.as_str()), Some("Arial"));
    }

    #[test]
    fn test_missing_vba_project() {
        let mut workbook = Workbook::new();
        assert!(matches!(
            workbook.set_vba_project("/nonexistent/vbaProject.bin"),
            Err(XlsxError::Package(_))
        ));
    }
}
