//! The fixed sequence of phases that turns a populated [`Workbook`] into an
//! [`Assembled`] tree ready for packaging.
//!
//! Every phase consumes the previous phase's value, so the order cannot be
//! changed or a phase skipped.

use crate::chart::Chart;
use crate::defined_names::DefinedName;
use crate::image::MediaEntry;
use crate::properties::{CustomProperty, DocProperties};
use crate::shared_strings::SharedStringTable;
use crate::styles::{Palette, ResolvedStyles};
use crate::types::{ChartId, XlsxError};
use crate::validation::validate_table_names;
use crate::workbook::{Workbook, WorkbookOptions};
use crate::worksheet::{HeaderVmlIds, PlacedImage, SheetKind, VmlIds, Worksheet, COMMENTS_PER_BLOCK};
use std::marker::PhantomData;

const DEFAULT_SHEET_NAME: &str = "Sheet1";
const DEFAULT_VBA_CODENAME: &str = "ThisWorkbook";

/// Serializes an assembled workbook.
pub trait Packager {
    fn package(&mut self, workbook: &Assembled<'_>) -> Result<(), XlsxError>;
}

pub struct Populated;
pub struct SheetsEnsured;
pub struct Activated;
pub struct VmlPrepared;
pub struct NamesCollected;
pub struct DrawingsPrepared;
pub struct ChartsCached;
pub struct TablesNumbered;
pub struct MetadataScanned;

/// A workbook part way through assembly. `S` names the last phase run.
pub struct AssemblyPipeline<'a, S> {
    workbook: &'a mut Workbook,
    _phase: PhantomData<S>,
}

impl<'a, S> AssemblyPipeline<'a, S> {
    fn advance<T>(self) -> AssemblyPipeline<'a, T> {
        AssemblyPipeline { workbook: self.workbook, _phase: PhantomData }
    }
}

impl<'a> AssemblyPipeline<'a, Populated> {
    pub fn new(workbook: &'a mut Workbook) -> Self {
        Self { workbook, _phase: PhantomData }
    }

    /// A workbook always has at least one sheet.
    pub fn ensure_sheets(self) -> Result<AssemblyPipeline<'a, SheetsEnsured>, XlsxError> {
        let _span = tracing::debug_span!("ensure_sheets").entered();
        if self.workbook.sheets.is_empty() {
            self.workbook.add_worksheet_with_name(DEFAULT_SHEET_NAME)?;
            tracing::debug!("added default worksheet");
        }
        Ok(self.advance())
    }
}

impl<'a> AssemblyPipeline<'a, SheetsEnsured> {
    /// Exactly one sheet ends up active, selected and visible.
    pub fn activate(self) -> AssemblyPipeline<'a, Activated> {
        let _span = tracing::debug_span!("activate").entered();
        let workbook = &mut *self.workbook;
        let sheets = &mut workbook.sheets;

        let requested = workbook.active_sheet;
        let active = match sheets.get(requested) {
            Some(sheet) if !sheet.hidden => requested,
            _ => sheets.iter().position(|sheet| !sheet.hidden).unwrap_or(0),
        };

        for sheet in sheets.iter_mut() {
            sheet.active = false;
        }
        if let Some(sheet) = sheets.get_mut(active) {
            sheet.active = true;
            sheet.selected = true;
            sheet.hidden = false;
        }
        workbook.active_sheet = active;

        tracing::debug!(active, "activated sheet");
        self.advance()
    }
}

impl<'a> AssemblyPipeline<'a, Activated> {
    /// Number comment and button VML parts and the header/footer image VML.
    pub fn prepare_vml(self) -> AssemblyPipeline<'a, VmlPrepared> {
        let _span = tracing::debug_span!("prepare_vml").entered();
        let workbook = &mut *self.workbook;
        let has_vba = workbook.vba_project.is_some();

        let mut comment_id = 0;
        let mut vml_drawing_id = 0;
        let mut data_id = 1;
        let mut header_id = 0;
        let mut shape_id = COMMENTS_PER_BLOCK as u32;
        let mut has_button = false;
        workbook.has_comments = false;

        for sheet in workbook.sheets.iter_mut() {
            sheet.assembly.vml = None;
            sheet.assembly.header_vml = None;

            if sheet.has_vml() {
                let sheet_comment_id = if sheet.has_comments() {
                    comment_id += 1;
                    workbook.has_comments = true;
                    Some(comment_id)
                } else {
                    None
                };
                vml_drawing_id += 1;

                let blocks = sheet.comment_blocks();
                let mut data = data_id.to_string();
                for block in 1..=blocks {
                    data.push(',');
                    data.push_str(&(data_id + block).to_string());
                }

                sheet.assembly.vml = Some(VmlIds {
                    comment_id: sheet_comment_id,
                    vml_drawing_id,
                    data_id: data,
                    shape_id,
                });

                data_id += 1 + blocks;
                shape_id += COMMENTS_PER_BLOCK as u32 * (1 + blocks);

                if has_vba && !sheet.buttons.is_empty() {
                    has_button = true;
                    if sheet.vba_codename.is_none() {
                        sheet.vba_codename = Some(sheet.name.clone());
                    }
                }
            }

            if sheet.has_header_vml() {
                header_id += 1;
                vml_drawing_id += 1;
                sheet.assembly.header_vml = Some(HeaderVmlIds { header_id, vml_drawing_id });
            }
        }

        if has_button && workbook.vba_codename.is_none() {
            workbook.vba_codename = Some(DEFAULT_VBA_CODENAME.to_string());
        }

        tracing::debug!(comment_parts = comment_id, vml_parts = vml_drawing_id, "prepared vml");
        self.advance()
    }
}

impl<'a> AssemblyPipeline<'a, VmlPrepared> {
    pub fn collect_names(self) -> AssemblyPipeline<'a, NamesCollected> {
        let _span = tracing::debug_span!("collect_names").entered();
        let workbook = &mut *self.workbook;
        workbook.names.collect(&workbook.sheets);
        workbook.names.sort();
        let named_ranges = workbook.names.derive_named_ranges().len();

        tracing::debug!(named_ranges, "sorted defined names");
        self.advance()
    }
}

impl<'a> AssemblyPipeline<'a, NamesCollected> {
    /// Number drawings and charts, probe every image and share media ids
    /// between identical images.
    pub fn prepare_drawings(self) -> Result<AssemblyPipeline<'a, DrawingsPrepared>, XlsxError> {
        let _span = tracing::debug_span!("prepare_drawings").entered();
        let Workbook { sheets, catalog, charts, .. } = &mut *self.workbook;

        catalog.clear();
        for chart in charts.iter_mut() {
            chart.id = None;
        }

        let mut drawing_id = 0;
        let mut chart_ref_id = 0;

        for sheet in sheets.iter_mut() {
            let assembly = &mut sheet.assembly;
            assembly.drawing_id = None;
            assembly.images.clear();
            assembly.chart_ids.clear();
            assembly.shape_ids.clear();
            assembly.header_images.clear();
            assembly.footer_images.clear();
            assembly.background = None;

            if !sheet.charts.is_empty() || !sheet.images.is_empty() || !sheet.shapes.is_empty() {
                drawing_id += 1;
                sheet.assembly.drawing_id = Some(drawing_id);
            }

            if let Some(image) = &sheet.background {
                let (media_id, record) = catalog.add(image)?;
                sheet.assembly.background = Some(PlacedImage { media_id, record });
            }

            for (image, _) in &sheet.images {
                let (media_id, record) = catalog.add(image)?;
                sheet.assembly.images.push(PlacedImage { media_id, record });
            }

            for &ChartId(index) in &sheet.charts {
                let Some(chart) = charts.get_mut(index) else {
                    return Err(XlsxError::Reference(format!(
                        "Sheet '{}' refers to unknown chart {}",
                        sheet.name, index
                    )));
                };
                chart_ref_id += 1;
                chart.id = Some(chart_ref_id);
                sheet.assembly.chart_ids.push(chart_ref_id);
            }

            sheet.assembly.shape_ids = (1..=sheet.shapes.len() as u32).collect();

            for image in sheet.header_images.iter().flatten() {
                let (media_id, record) = catalog.add(image)?;
                sheet.assembly.header_images.push(PlacedImage { media_id, record });
            }
            for image in sheet.footer_images.iter().flatten() {
                let (media_id, record) = catalog.add(image)?;
                sheet.assembly.footer_images.push(PlacedImage { media_id, record });
            }
        }

        let dropped = charts.iter().filter(|chart| chart.id.is_none()).count();
        tracing::debug!(
            drawings = drawing_id,
            charts = chart_ref_id,
            dropped_charts = dropped,
            media = catalog.len(),
            "prepared drawings"
        );
        Ok(self.advance())
    }
}

impl<'a> AssemblyPipeline<'a, DrawingsPrepared> {
    pub fn cache_chart_data(self) -> Result<AssemblyPipeline<'a, ChartsCached>, XlsxError> {
        let _span = tracing::debug_span!("cache_chart_data").entered();
        let Workbook { sheets, strings, charts, chart_resolver, .. } = &mut *self.workbook;

        chart_resolver.clear();
        chart_resolver.fill(charts, sheets.as_slice(), strings)?;
        Ok(self.advance())
    }
}

impl<'a> AssemblyPipeline<'a, ChartsCached> {
    /// Table ids run across the workbook; names must be unique ignoring case.
    pub fn number_tables(self) -> Result<AssemblyPipeline<'a, TablesNumbered>, XlsxError> {
        let _span = tracing::debug_span!("number_tables").entered();
        let mut table_id = 0;

        for sheet in self.workbook.sheets.iter_mut() {
            sheet.assembly.table_ids.clear();
            sheet.assembly.table_names.clear();

            for table in &sheet.tables {
                table_id += 1;
                let name = table.name.clone().unwrap_or_else(|| format!("Table{}", table_id));
                sheet.assembly.table_ids.push(table_id);
                sheet.assembly.table_names.push(name);
            }
        }

        validate_table_names(
            self.workbook
                .sheets
                .iter()
                .flat_map(|sheet| sheet.assembly.table_names.iter().map(String::as_str)),
        )?;

        tracing::debug!(tables = table_id, "numbered tables");
        Ok(self.advance())
    }
}

impl<'a> AssemblyPipeline<'a, TablesNumbered> {
    pub fn scan_metadata(self) -> AssemblyPipeline<'a, MetadataScanned> {
        let _span = tracing::debug_span!("scan_metadata").entered();
        let workbook = &mut *self.workbook;
        workbook.has_metadata = workbook.sheets.iter().any(Worksheet::has_dynamic_arrays);

        tracing::debug!(has_metadata = workbook.has_metadata, "scanned metadata");
        self.advance()
    }
}

impl<'a> AssemblyPipeline<'a, MetadataScanned> {
    pub fn resolve_styles(self) -> Assembled<'a> {
        let _span = tracing::debug_span!("resolve_styles").entered();
        let styles = self.workbook.formats.resolve();

        tracing::debug!(
            xfs = styles.xfs.len(),
            dxfs = styles.dxfs.len(),
            fonts = styles.fonts.len(),
            fills = styles.fills.len(),
            "resolved styles"
        );
        Assembled { workbook: self.workbook, styles }
    }
}

/// Everything a packager needs, fully numbered and resolved.
pub struct Assembled<'a> {
    workbook: &'a Workbook,
    styles: ResolvedStyles,
}

impl<'a> Assembled<'a> {
    /// Final phase: hand the tree to the packager.
    pub fn package(&self, packager: &mut dyn Packager) -> Result<(), XlsxError> {
        let _span = tracing::debug_span!("package").entered();
        packager.package(self)
    }

    pub fn sheets(&self) -> &'a [Worksheet] {
        &self.workbook.sheets
    }

    pub fn worksheets(&self) -> impl Iterator<Item = &'a Worksheet> {
        self.sheets().iter().filter(|sheet| sheet.kind() == SheetKind::Worksheet)
    }

    pub fn chartsheets(&self) -> impl Iterator<Item = &'a Worksheet> {
        self.sheets().iter().filter(|sheet| sheet.kind() == SheetKind::Chartsheet)
    }

    pub fn active_sheet(&self) -> usize {
        self.workbook.active_sheet
    }

    pub fn styles(&self) -> &ResolvedStyles {
        &self.styles
    }

    pub fn palette(&self) -> &'a Palette {
        self.workbook.formats.palette()
    }

    pub fn strings(&self) -> &'a SharedStringTable {
        &self.workbook.strings
    }

    /// Sorted defined names.
    pub fn defined_names(&self) -> &'a [DefinedName] {
        self.workbook.names.names()
    }

    pub fn named_ranges(&self) -> &'a [String] {
        self.workbook.names.named_ranges()
    }

    pub fn media(&self) -> &'a [MediaEntry] {
        self.workbook.catalog.media()
    }

    /// Placed charts ordered by their assigned ids. Charts never inserted
    /// into a sheet are left out.
    pub fn charts(&self) -> Vec<&'a Chart> {
        let mut charts: Vec<&Chart> = self.workbook.charts.iter().filter(|chart| chart.id.is_some()).collect();
        charts.sort_by_key(|chart| chart.id);
        charts
    }

    pub fn properties(&self) -> &'a DocProperties {
        &self.workbook.properties
    }

    pub fn custom_properties(&self) -> &'a [CustomProperty] {
        &self.workbook.custom_properties
    }

    pub fn options(&self) -> &'a WorkbookOptions {
        &self.workbook.options
    }

    pub fn has_comments(&self) -> bool {
        self.workbook.has_comments
    }

    pub fn has_metadata(&self) -> bool {
        self.workbook.has_metadata
    }

    pub fn vba_project(&self) -> Option<&'a [u8]> {
        self.workbook.vba_project.as_deref()
    }

    pub fn vba_codename(&self) -> Option<&'a str> {
        self.workbook.vba_codename.as_deref()
    }
}

/// Run every phase in order and package the result.
pub fn run(workbook: &mut Workbook, packager: &mut dyn Packager) -> Result<(), XlsxError> {
    let _span = tracing::debug_span!("assemble").entered();

    let assembled = AssemblyPipeline::new(workbook)
        .ensure_sheets()?
        .activate()
        .prepare_vml()
        .collect_names()
        .prepare_drawings()?
        .cache_chart_data()?
        .number_tables()?
        .scan_metadata()
        .resolve_styles();

    assembled.package(packager)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image::tests::png_bytes;
    use crate::image::Image;
    use crate::worksheet::{HeaderFooterPosition, Shape, Table};
    use crate::types::CellRange;
    use pretty_assertions::assert_eq;

    struct Recorder {
        calls: usize,
        sheet_names: Vec<String>,
    }

    impl Packager for Recorder {
        fn package(&mut self, workbook: &Assembled<'_>) -> Result<(), XlsxError> {
            self.calls += 1;
            self.sheet_names = workbook.sheets().iter().map(|s| s.name().to_string()).collect();
            Ok(())
        }
    }

    fn recorder() -> Recorder {
        Recorder { calls: 0, sheet_names: Vec::new() }
    }

    #[test]
    fn test_phases_in_order() {
        let mut workbook = Workbook::new();
        let assembled = AssemblyPipeline::new(&mut workbook)
            .ensure_sheets()
            .unwrap()
            .activate()
            .prepare_vml()
            .collect_names()
            .prepare_drawings()
            .unwrap()
            .cache_chart_data()
            .unwrap()
            .number_tables()
            .unwrap()
            .scan_metadata()
            .resolve_styles();

        assert_eq!(assembled.sheets().len(), 1);
        assert!(assembled.sheets()[0].is_active());
        assert_eq!(assembled.styles().xfs.len(), 1);

        let mut packager = recorder();
        assembled.package(&mut packager).unwrap();
        assert_eq!(packager.sheet_names, vec!["Sheet1".to_string()]);
    }

    #[test]
    fn test_hidden_active_sheet_falls_back() {
        let mut workbook = Workbook::new();
        let first = workbook.add_worksheet().unwrap();
        let second = workbook.add_worksheet().unwrap();
        workbook.add_worksheet().unwrap();
        workbook.worksheet(first).unwrap().hide();
        workbook.worksheet(second).unwrap().hide();
        workbook.activate(first).unwrap();

        workbook.finalize(&mut recorder()).unwrap();

        let states: Vec<_> = workbook.sheets().iter().map(|s| (s.is_active(), s.is_hidden())).collect();
        assert_eq!(states, vec![(false, true), (false, true), (true, false)]);
        assert_eq!(workbook.active_sheet, 2);
        assert!(workbook.sheets()[2].is_selected());
    }

    #[test]
    fn test_all_hidden_unhides_first() {
        let mut workbook = Workbook::new();
        let only = workbook.add_worksheet().unwrap();
        workbook.worksheet(only).unwrap().hide();

        workbook.finalize(&mut recorder()).unwrap();
        assert!(workbook.sheets()[0].is_active());
        assert!(!workbook.sheets()[0].is_hidden());
    }

    #[test]
    fn test_header_vml_follows_comment_vml() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().unwrap();
        {
            let mut writer = workbook.worksheet(sheet).unwrap();
            writer.write_comment(0, 0, "note").unwrap();
            writer.set_header_image(HeaderFooterPosition::Left, Image::new_from_buffer("logo.png", png_bytes(4, 4, None)));
        }

        workbook.finalize(&mut recorder()).unwrap();
        let assembly = workbook.sheets()[0].assembly();
        assert_eq!(
            assembly.vml,
            Some(VmlIds { comment_id: Some(1), vml_drawing_id: 1, data_id: "1".to_string(), shape_id: 1024 })
        );
        assert_eq!(assembly.header_vml, Some(HeaderVmlIds { header_id: 1, vml_drawing_id: 2 }));
        assert!(workbook.has_comments);
        // Header images do not open a drawing part.
        assert_eq!(assembly.drawing_id, None);
        assert_eq!(assembly.header_images.len(), 1);
    }

    #[test]
    fn test_shapes_get_a_drawing() {
        let mut workbook = Workbook::new();
        workbook.add_worksheet().unwrap();
        let shaped = workbook.add_worksheet().unwrap();
        workbook
            .worksheet(shaped)
            .unwrap()
            .insert_shape(1, 1, Shape::textbox("hi"))
            .unwrap()
            .insert_shape(5, 1, Shape::textbox("there"))
            .unwrap();

        workbook.finalize(&mut recorder()).unwrap();
        let assembly = workbook.sheets()[1].assembly();
        assert_eq!(assembly.drawing_id, Some(1));
        assert_eq!(assembly.shape_ids, vec![1, 2]);
    }

    #[test]
    fn test_default_table_names_follow_ids() {
        let mut workbook = Workbook::new();
        let a = workbook.add_worksheet().unwrap();
        let b = workbook.add_worksheet().unwrap();
        workbook.worksheet(a).unwrap().add_table(Table::new(CellRange::new(0, 0, 3, 1))).unwrap();
        workbook
            .worksheet(b)
            .unwrap()
            .add_table(Table::new(CellRange::new(0, 0, 3, 1)).set_name("Sales"))
            .unwrap()
            .add_table(Table::new(CellRange::new(5, 0, 9, 1)))
            .unwrap();

        workbook.finalize(&mut recorder()).unwrap();
        assert_eq!(workbook.sheets()[0].assembly().table_names, vec!["Table1".to_string()]);
        assert_eq!(workbook.sheets()[1].assembly().table_ids, vec![2, 3]);
        assert_eq!(
            workbook.sheets()[1].assembly().table_names,
            vec!["Sales".to_string(), "Table3".to_string()]
        );
    }

    #[test]
    fn test_default_name_can_collide_with_explicit_name() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().unwrap();
        workbook
            .worksheet(sheet)
            .unwrap()
            .add_table(Table::new(CellRange::new(0, 0, 3, 1)).set_name("table2"))
            .unwrap()
            .add_table(Table::new(CellRange::new(5, 0, 9, 1)))
            .unwrap();

        let mut packager = recorder();
        assert!(matches!(workbook.finalize(&mut packager), Err(XlsxError::Reference(_))));
        assert_eq!(packager.calls, 0);
    }

    #[test]
    fn test_buttons_get_vba_codenames() {
        let dir = tempfile::tempdir().unwrap();
        let project = dir.path().join("vbaProject.bin");
        std::fs::write(&project, b"\xd0\xcf\x11\xe0macros").unwrap();

        let mut workbook = Workbook::new();
        let plain = workbook.add_worksheet().unwrap();
        let controls = workbook.add_worksheet_with_name("Controls").unwrap();
        let named = workbook.add_worksheet().unwrap();
        workbook.worksheet(plain).unwrap().write_comment(0, 0, "no macros here").unwrap();
        workbook.worksheet(controls).unwrap().insert_button(1, 1, "Run", Some("Macro1")).unwrap();
        workbook
            .worksheet(named)
            .unwrap()
            .insert_button(0, 0, "Go", None)
            .unwrap()
            .set_vba_name("Launcher");
        workbook.set_vba_project(&project).unwrap();

        let mut packager = recorder();
        workbook.finalize(&mut packager).unwrap();

        let codenames: Vec<_> = workbook.sheets().iter().map(|s| s.vba_codename()).collect();
        assert_eq!(codenames, vec![None, Some("Controls"), Some("Launcher")]);
        assert_eq!(workbook.vba_codename.as_deref(), Some("ThisWorkbook"));
        assert_eq!(workbook.vba_project.as_deref(), Some(b"\xd0\xcf\x11\xe0macros".as_slice()));
    }

    #[test]
    fn test_buttons_without_vba_project_keep_no_codename() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().unwrap();
        workbook.worksheet(sheet).unwrap().insert_button(0, 0, "Run", None).unwrap();

        workbook.finalize(&mut recorder()).unwrap();
        assert_eq!(workbook.sheets()[0].vba_codename(), None);
        assert_eq!(workbook.vba_codename, None);
    }
}
