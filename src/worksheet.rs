use crate::chart::CellSource;
use crate::image::{Image, ImageRecord};
use crate::shared_strings::SharedStringTable;
use crate::styles::{FontScript, FormatTable, Underline};
use crate::types::{datetime_to_excel_serial, Cell, CellRange, CellValue, ChartId, FormatId, SheetId, XlsxError};
use crate::validation::{
    validate_cell_coords, validate_range, validate_string_len, validate_table_name, validate_table_range,
    MAX_COLS, MAX_ROWS,
};
use crate::xml::escape_str;
use chrono::NaiveDateTime;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Comments per VML shape-id block.
pub const COMMENTS_PER_BLOCK: usize = 1024;

static DYNAMIC_FUNCTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(ANCHORARRAY|FILTER|LAMBDA|RANDARRAY|SEQUENCE|SINGLE|SORT|SORTBY|UNIQUE|XLOOKUP|XMATCH)\(")
        .expect("static regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SheetKind {
    Worksheet,
    Chartsheet,
}

/// Top-left anchor of a drawing object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ObjectPosition {
    pub row: u32,
    pub col: u16,
    pub x_offset: u32,
    pub y_offset: u32,
}

impl ObjectPosition {
    pub fn new(row: u32, col: u16) -> Self {
        Self { row, col, x_offset: 0, y_offset: 0 }
    }

    pub fn with_offset(mut self, x_offset: u32, y_offset: u32) -> Self {
        self.x_offset = x_offset;
        self.y_offset = y_offset;
        self
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Comment {
    pub row: u32,
    pub col: u16,
    pub text: String,
    pub author: Option<String>,
    pub visible: bool,
}

/// A form-control button, drawn in the sheet's VML part.
#[derive(Debug, Clone, PartialEq)]
pub struct Button {
    pub row: u32,
    pub col: u16,
    pub caption: String,
    pub macro_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Shape {
    pub text: Option<String>,
    pub width: u32,
    pub height: u32,
}

impl Shape {
    pub fn textbox(text: impl Into<String>) -> Self {
        Self { text: Some(text.into()), width: 480, height: 288 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeaderFooterPosition {
    Left,
    Center,
    Right,
}

impl HeaderFooterPosition {
    fn slot(self) -> usize {
        match self {
            HeaderFooterPosition::Left => 0,
            HeaderFooterPosition::Center => 1,
            HeaderFooterPosition::Right => 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    pub name: Option<String>,
    pub range: CellRange,
    pub style_name: Option<String>,
    pub show_first_column: bool,
    pub show_last_column: bool,
    pub show_row_stripes: bool,
    pub show_column_stripes: bool,
    pub show_header_row: bool,
    pub show_totals_row: bool,
    pub column_names: Vec<String>,
}

impl Table {
    pub fn new(range: CellRange) -> Self {
        Self {
            name: None,
            range,
            style_name: Some("TableStyleMedium9".to_string()),
            show_first_column: false,
            show_last_column: false,
            show_row_stripes: true,
            show_column_stripes: false,
            show_header_row: true,
            show_totals_row: false,
            column_names: Vec::new(),
        }
    }

    pub fn set_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn set_style(mut self, style_name: impl Into<String>) -> Self {
        self.style_name = Some(style_name.into());
        self
    }

    pub fn set_header_row(mut self, show: bool) -> Self {
        self.show_header_row = show;
        self
    }

    pub fn set_columns(mut self, names: Vec<String>) -> Self {
        self.column_names = names;
        self
    }
}

/// Comment and button VML ids for one sheet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VmlIds {
    pub comment_id: Option<u32>,
    pub vml_drawing_id: u32,
    /// `o:idmap` data, comma separated when comments span several blocks.
    pub data_id: String,
    pub shape_id: u32,
}

/// Header/footer image VML ids for one sheet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderVmlIds {
    pub header_id: u32,
    pub vml_drawing_id: u32,
}

/// A probed image and the media id it shares with identical images.
#[derive(Debug, Clone, PartialEq)]
pub struct PlacedImage {
    pub media_id: u32,
    pub record: ImageRecord,
}

/// Ids assigned to a sheet while the workbook is assembled.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SheetAssembly {
    pub vml: Option<VmlIds>,
    pub header_vml: Option<HeaderVmlIds>,
    pub drawing_id: Option<u32>,
    /// Sheet images, in insertion order.
    pub images: Vec<PlacedImage>,
    pub chart_ids: Vec<u32>,
    /// Ordinals of shapes within the sheet drawing.
    pub shape_ids: Vec<u32>,
    pub header_images: Vec<PlacedImage>,
    pub footer_images: Vec<PlacedImage>,
    pub background: Option<PlacedImage>,
    pub table_ids: Vec<u32>,
    pub table_names: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct Worksheet {
    pub(crate) name: String,
    pub(crate) kind: SheetKind,
    pub(crate) cells: BTreeMap<(u32, u16), Cell>,
    pub(crate) hidden: bool,
    pub(crate) selected: bool,
    pub(crate) active: bool,
    pub(crate) autofilter: Option<CellRange>,
    pub(crate) print_area: Option<CellRange>,
    pub(crate) repeat_rows: Option<(u32, u32)>,
    pub(crate) repeat_cols: Option<(u16, u16)>,
    pub(crate) comments: Vec<Comment>,
    pub(crate) buttons: Vec<Button>,
    pub(crate) images: Vec<(Image, ObjectPosition)>,
    pub(crate) shapes: Vec<(Shape, ObjectPosition)>,
    pub(crate) charts: Vec<ChartId>,
    pub(crate) header_images: [Option<Image>; 3],
    pub(crate) footer_images: [Option<Image>; 3],
    pub(crate) background: Option<Image>,
    pub(crate) tables: Vec<Table>,
    pub(crate) has_dynamic_arrays: bool,
    pub(crate) vba_codename: Option<String>,
    pub(crate) assembly: SheetAssembly,
}

impl Worksheet {
    pub(crate) fn new(name: String, kind: SheetKind) -> Self {
        Self {
            name,
            kind,
            cells: BTreeMap::new(),
            hidden: false,
            selected: false,
            active: false,
            autofilter: None,
            print_area: None,
            repeat_rows: None,
            repeat_cols: None,
            comments: Vec::new(),
            buttons: Vec::new(),
            images: Vec::new(),
            shapes: Vec::new(),
            charts: Vec::new(),
            header_images: [None, None, None],
            footer_images: [None, None, None],
            background: None,
            tables: Vec::new(),
            has_dynamic_arrays: false,
            vba_codename: None,
            assembly: SheetAssembly::default(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> SheetKind {
        self.kind
    }

    pub fn is_hidden(&self) -> bool {
        self.hidden
    }

    pub fn is_selected(&self) -> bool {
        self.selected
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn cell(&self, row: u32, col: u16) -> Option<&Cell> {
        self.cells.get(&(row, col))
    }

    pub fn cells(&self) -> impl Iterator<Item = (&(u32, u16), &Cell)> {
        self.cells.iter()
    }

    pub fn autofilter(&self) -> Option<CellRange> {
        self.autofilter
    }

    pub fn print_area(&self) -> Option<CellRange> {
        self.print_area
    }

    pub fn repeat_rows(&self) -> Option<(u32, u32)> {
        self.repeat_rows
    }

    pub fn repeat_cols(&self) -> Option<(u16, u16)> {
        self.repeat_cols
    }

    pub fn comments(&self) -> &[Comment] {
        &self.comments
    }

    pub fn buttons(&self) -> &[Button] {
        &self.buttons
    }

    pub fn tables(&self) -> &[Table] {
        &self.tables
    }

    pub fn charts(&self) -> &[ChartId] {
        &self.charts
    }

    pub fn has_dynamic_arrays(&self) -> bool {
        self.has_dynamic_arrays
    }

    pub fn vba_codename(&self) -> Option<&str> {
        self.vba_codename.as_deref()
    }

    pub fn assembly(&self) -> &SheetAssembly {
        &self.assembly
    }

    /// Comments or buttons need the sheet's VML drawing.
    pub fn has_vml(&self) -> bool {
        !self.comments.is_empty() || !self.buttons.is_empty()
    }

    pub fn has_comments(&self) -> bool {
        !self.comments.is_empty()
    }

    pub fn has_header_vml(&self) -> bool {
        self.header_images.iter().chain(&self.footer_images).any(Option::is_some)
    }

    /// Extra 1024-shape blocks the comments need beyond the first.
    pub fn comment_blocks(&self) -> u32 {
        (self.comments.len() / COMMENTS_PER_BLOCK) as u32
    }

    pub(crate) fn header_images(&self) -> impl Iterator<Item = &Image> {
        self.header_images.iter().flatten()
    }

    pub(crate) fn footer_images(&self) -> impl Iterator<Item = &Image> {
        self.footer_images.iter().flatten()
    }

    fn insert_cell(&mut self, row: u32, col: u16, value: CellValue, xf_index: Option<u32>) {
        self.cells.insert((row, col), Cell { value, xf_index });
    }
}

impl CellSource for [Worksheet] {
    fn find_sheet(&self, name: &str) -> Option<SheetId> {
        self.iter().position(|sheet| sheet.name == name).map(SheetId)
    }

    fn read_range(&self, sheet: SheetId, range: &CellRange) -> Vec<Option<CellValue>> {
        let Some(sheet) = self.get(sheet.index()) else {
            return Vec::new();
        };

        let mut values = Vec::with_capacity(range.num_rows() as usize * range.num_cols() as usize);
        for row in range.first_row..=range.last_row {
            for col in range.first_col..=range.last_col {
                values.push(sheet.cell(row, col).map(|cell| cell.value.clone()));
            }
        }
        values
    }
}

/// Mutable view of one sheet together with the workbook tables its cell
/// writers need.
pub struct SheetWriter<'a> {
    pub(crate) sheet: &'a mut Worksheet,
    pub(crate) strings: &'a mut SharedStringTable,
    pub(crate) formats: &'a mut FormatTable,
}

impl<'a> SheetWriter<'a> {
    pub fn name(&self) -> &str {
        &self.sheet.name
    }

    fn check_cell(&self, row: u32, col: u16) -> Result<(), XlsxError> {
        if self.sheet.kind == SheetKind::Chartsheet {
            return Err(XlsxError::Validation(format!(
                "Chartsheet '{}' cannot hold cell data",
                self.sheet.name
            )));
        }
        validate_cell_coords(row, col, &self.sheet.name)
    }

    fn xf(&mut self, format: Option<FormatId>) -> Result<Option<u32>, XlsxError> {
        format.map(|id| self.formats.xf_index(id)).transpose()
    }

    pub fn write_string(
        &mut self,
        row: u32,
        col: u16,
        text: &str,
        format: Option<FormatId>,
    ) -> Result<&mut Self, XlsxError> {
        self.check_cell(row, col)?;
        validate_string_len(text, &self.sheet.name)?;

        let xf = self.xf(format)?;
        let index = self.strings.intern(text);
        self.sheet.insert_cell(row, col, CellValue::SharedString(index), xf);
        Ok(self)
    }

    pub fn write_number(
        &mut self,
        row: u32,
        col: u16,
        number: f64,
        format: Option<FormatId>,
    ) -> Result<&mut Self, XlsxError> {
        self.check_cell(row, col)?;
        let xf = self.xf(format)?;
        self.sheet.insert_cell(row, col, CellValue::Number(number), xf);
        Ok(self)
    }

    pub fn write_boolean(
        &mut self,
        row: u32,
        col: u16,
        value: bool,
        format: Option<FormatId>,
    ) -> Result<&mut Self, XlsxError> {
        self.check_cell(row, col)?;
        let xf = self.xf(format)?;
        self.sheet.insert_cell(row, col, CellValue::Bool(value), xf);
        Ok(self)
    }

    /// Dates are stored as serial numbers; pass a date number format to
    /// display them as dates.
    pub fn write_datetime(
        &mut self,
        row: u32,
        col: u16,
        datetime: &NaiveDateTime,
        format: Option<FormatId>,
    ) -> Result<&mut Self, XlsxError> {
        self.write_number(row, col, datetime_to_excel_serial(datetime), format)
    }

    /// Formulas using dynamic-array functions are stored as dynamic formulas.
    pub fn write_formula(
        &mut self,
        row: u32,
        col: u16,
        formula: &str,
        format: Option<FormatId>,
    ) -> Result<&mut Self, XlsxError> {
        self.write_formula_with_result(row, col, formula, None, format)
    }

    pub fn write_formula_with_result(
        &mut self,
        row: u32,
        col: u16,
        formula: &str,
        result: Option<&str>,
        format: Option<FormatId>,
    ) -> Result<&mut Self, XlsxError> {
        self.check_cell(row, col)?;
        let formula = formula.strip_prefix('=').unwrap_or(formula);
        let xf = self.xf(format)?;
        if DYNAMIC_FUNCTION.is_match(formula) {
            self.sheet.has_dynamic_arrays = true;
        }

        self.sheet.insert_cell(
            row,
            col,
            CellValue::Formula {
                formula: formula.to_string(),
                cached_value: result.map(str::to_string),
            },
            xf,
        );
        Ok(self)
    }

    pub fn write_dynamic_formula(
        &mut self,
        row: u32,
        col: u16,
        formula: &str,
        format: Option<FormatId>,
    ) -> Result<&mut Self, XlsxError> {
        self.write_formula(row, col, formula, format)?;
        self.sheet.has_dynamic_arrays = true;
        Ok(self)
    }

    /// Text runs with their own fonts, stored as one shared string.
    pub fn write_rich_string(
        &mut self,
        row: u32,
        col: u16,
        segments: &[(Option<FormatId>, &str)],
        format: Option<FormatId>,
    ) -> Result<&mut Self, XlsxError> {
        self.check_cell(row, col)?;
        if segments.is_empty() || segments.iter().all(|(_, text)| text.is_empty()) {
            return Err(XlsxError::Validation(format!(
                "{}: rich string at ({}, {}) has no text",
                self.sheet.name, row, col
            )));
        }

        let plain: String = segments.iter().map(|(_, text)| *text).collect();
        validate_string_len(&plain, &self.sheet.name)?;
        if let Some(id) = segments.iter().filter_map(|(id, _)| *id).find(|id| self.formats.get(*id).is_none()) {
            return Err(XlsxError::Reference(format!("Unknown format id {} in rich string run", id.0)));
        }

        let mut runs = String::with_capacity(plain.len() + segments.len() * 64);
        for (run_format, text) in segments.iter().filter(|(_, text)| !text.is_empty()) {
            runs.push_str("<r>");
            if let Some(font) = run_format.and_then(|id| self.formats.get(id)).map(|f| f.font()) {
                runs.push_str("<rPr>");
                if font.bold { runs.push_str("<b/>"); }
                if font.italic { runs.push_str("<i/>"); }
                if font.strikeout { runs.push_str("<strike/>"); }
                match font.underline {
                    Underline::None => {}
                    Underline::Single => runs.push_str("<u/>"),
                    Underline::Double => runs.push_str("<u val=\"double\"/>"),
                    Underline::SingleAccounting => runs.push_str("<u val=\"singleAccounting\"/>"),
                    Underline::DoubleAccounting => runs.push_str("<u val=\"doubleAccounting\"/>"),
                }
                match font.script {
                    FontScript::None => {}
                    FontScript::Superscript => runs.push_str("<vertAlign val=\"superscript\"/>"),
                    FontScript::Subscript => runs.push_str("<vertAlign val=\"subscript\"/>"),
                }
                runs.push_str(&format!("<sz val=\"{}\"/>", font.size));
                match font.color {
                    Some(color) => runs.push_str(&format!("<color rgb=\"{}\"/>", color.argb_hex())),
                    None => runs.push_str("<color theme=\"1\"/>"),
                }
                runs.push_str(&format!("<rFont val=\"{}\"/><family val=\"2\"/>", escape_str(&font.name)));
                if font.name == "Calibri" {
                    runs.push_str("<scheme val=\"minor\"/>");
                }
                runs.push_str("</rPr>");
            }
            if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
                runs.push_str("<t xml:space=\"preserve\">");
            } else {
                runs.push_str("<t>");
            }
            runs.push_str(&escape_str(text));
            runs.push_str("</t></r>");
        }

        let xf = self.xf(format)?;
        let index = self.strings.intern_rich(&runs);
        self.sheet.insert_cell(row, col, CellValue::SharedString(index), xf);
        Ok(self)
    }

    /// A blank cell only carries formatting, so one without a format is skipped.
    pub fn write_blank(
        &mut self,
        row: u32,
        col: u16,
        format: Option<FormatId>,
    ) -> Result<&mut Self, XlsxError> {
        self.check_cell(row, col)?;
        if format.is_some() {
            let xf = self.xf(format)?;
            self.sheet.insert_cell(row, col, CellValue::Blank, xf);
        }
        Ok(self)
    }

    pub fn write_comment(&mut self, row: u32, col: u16, text: &str) -> Result<&mut Self, XlsxError> {
        self.write_comment_with_author(row, col, text, None)
    }

    pub fn write_comment_with_author(
        &mut self,
        row: u32,
        col: u16,
        text: &str,
        author: Option<&str>,
    ) -> Result<&mut Self, XlsxError> {
        validate_cell_coords(row, col, &self.sheet.name)?;
        validate_string_len(text, "Comment")?;
        self.sheet.comments.push(Comment {
            row,
            col,
            text: text.to_string(),
            author: author.map(str::to_string),
            visible: false,
        });
        Ok(self)
    }

    pub fn insert_button(
        &mut self,
        row: u32,
        col: u16,
        caption: &str,
        macro_name: Option<&str>,
    ) -> Result<&mut Self, XlsxError> {
        validate_cell_coords(row, col, &self.sheet.name)?;
        self.sheet.buttons.push(Button {
            row,
            col,
            caption: caption.to_string(),
            macro_name: macro_name.map(str::to_string),
        });
        Ok(self)
    }

    pub fn insert_image(&mut self, row: u32, col: u16, image: Image) -> Result<&mut Self, XlsxError> {
        validate_cell_coords(row, col, &self.sheet.name)?;
        self.sheet.images.push((image, ObjectPosition::new(row, col)));
        Ok(self)
    }

    pub fn insert_shape(&mut self, row: u32, col: u16, shape: Shape) -> Result<&mut Self, XlsxError> {
        validate_cell_coords(row, col, &self.sheet.name)?;
        self.sheet.shapes.push((shape, ObjectPosition::new(row, col)));
        Ok(self)
    }

    pub fn set_background(&mut self, image: Image) -> &mut Self {
        self.sheet.background = Some(image);
        self
    }

    pub fn set_header_image(&mut self, position: HeaderFooterPosition, image: Image) -> &mut Self {
        self.sheet.header_images[position.slot()] = Some(image);
        self
    }

    pub fn set_footer_image(&mut self, position: HeaderFooterPosition, image: Image) -> &mut Self {
        self.sheet.footer_images[position.slot()] = Some(image);
        self
    }

    pub fn add_table(&mut self, table: Table) -> Result<&mut Self, XlsxError> {
        validate_table_range(&table.range, table.show_header_row)?;
        if let Some(name) = &table.name {
            validate_table_name(name)?;
        }
        if !table.column_names.is_empty() && table.column_names.len() != table.range.num_cols() as usize {
            return Err(XlsxError::Validation(format!(
                "Table has {} column names for {} columns",
                table.column_names.len(),
                table.range.num_cols()
            )));
        }
        self.sheet.tables.push(table);
        Ok(self)
    }

    pub fn autofilter(&mut self, range: CellRange) -> Result<&mut Self, XlsxError> {
        validate_range(&range, "Autofilter")?;
        self.sheet.autofilter = Some(range);
        Ok(self)
    }

    pub fn set_print_area(&mut self, range: CellRange) -> Result<&mut Self, XlsxError> {
        validate_range(&range, "Print area")?;
        // The whole sheet is the default print area.
        if range == CellRange::new(0, 0, MAX_ROWS - 1, MAX_COLS - 1) {
            self.sheet.print_area = None;
        } else {
            self.sheet.print_area = Some(range);
        }
        Ok(self)
    }

    pub fn repeat_rows(&mut self, first_row: u32, last_row: u32) -> Result<&mut Self, XlsxError> {
        validate_cell_coords(first_row.max(last_row), 0, "Repeat rows")?;
        self.sheet.repeat_rows = Some((first_row.min(last_row), first_row.max(last_row)));
        Ok(self)
    }

    pub fn repeat_columns(&mut self, first_col: u16, last_col: u16) -> Result<&mut Self, XlsxError> {
        validate_cell_coords(0, first_col.max(last_col), "Repeat columns")?;
        self.sheet.repeat_cols = Some((first_col.min(last_col), first_col.max(last_col)));
        Ok(self)
    }

    pub fn select(&mut self) -> &mut Self {
        self.sheet.selected = true;
        self
    }

    /// Hidden sheets are never chosen as the active sheet.
    pub fn hide(&mut self) -> &mut Self {
        self.sheet.hidden = true;
        self.sheet.selected = false;
        self
    }

    /// VBA code name for the sheet; defaults to the sheet name when a
    /// macro project needs one.
    pub fn set_vba_name(&mut self, name: &str) -> &mut Self {
        self.sheet.vba_codename = Some(name.to_string());
        self
    }
}
