use crate::types::{Color, FormatId, XlsxError};
use crate::validation::validate_palette_color;
use crate::xml::escape_str;
use std::collections::HashMap;

/// First index available to user-defined number formats.
pub const FIRST_CUSTOM_NUM_FORMAT: u16 = 164;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Underline {
    #[default]
    None,
    Single,
    Double,
    SingleAccounting,
    DoubleAccounting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum FontScript {
    #[default]
    None,
    Superscript,
    Subscript,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FontStyle {
    pub name: String,
    pub size: f64,
    pub color: Option<Color>,
    pub bold: bool,
    pub italic: bool,
    pub underline: Underline,
    pub strikeout: bool,
    pub script: FontScript,
}

impl Default for FontStyle {
    fn default() -> Self {
        Self {
            name: "Calibri".to_string(),
            size: 11.0,
            color: None,
            bold: false,
            italic: false,
            underline: Underline::None,
            strikeout: false,
            script: FontScript::None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FontKey {
    name: String,
    size_bits: u64,
    color: Option<Color>,
    bold: bool,
    italic: bool,
    underline: Underline,
    strikeout: bool,
    script: FontScript,
}

impl FontStyle {
    fn key(&self) -> FontKey {
        FontKey {
            name: self.name.clone(),
            size_bits: self.size.to_bits(),
            color: self.color,
            bold: self.bold,
            italic: self.italic,
            underline: self.underline,
            strikeout: self.strikeout,
            script: self.script,
        }
    }

    /// Differential fonts only carry the attributes a rule changes.
    fn has_dxf_override(&self) -> bool {
        self.color.is_some()
            || self.bold
            || self.italic
            || self.underline != Underline::None
            || self.strikeout
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum PatternType {
    #[default]
    None,
    Solid,
    MediumGray,
    DarkGray,
    LightGray,
    DarkHorizontal,
    DarkVertical,
    DarkDown,
    DarkUp,
    DarkGrid,
    DarkTrellis,
    LightHorizontal,
    LightVertical,
    LightDown,
    LightUp,
    LightGrid,
    LightTrellis,
    Gray125,
    Gray0625,
}

impl PatternType {
    pub fn as_str(&self) -> &'static str {
        match self {
            PatternType::None => "none",
            PatternType::Solid => "solid",
            PatternType::MediumGray => "mediumGray",
            PatternType::DarkGray => "darkGray",
            PatternType::LightGray => "lightGray",
            PatternType::DarkHorizontal => "darkHorizontal",
            PatternType::DarkVertical => "darkVertical",
            PatternType::DarkDown => "darkDown",
            PatternType::DarkUp => "darkUp",
            PatternType::DarkGrid => "darkGrid",
            PatternType::DarkTrellis => "darkTrellis",
            PatternType::LightHorizontal => "lightHorizontal",
            PatternType::LightVertical => "lightVertical",
            PatternType::LightDown => "lightDown",
            PatternType::LightUp => "lightUp",
            PatternType::LightGrid => "lightGrid",
            PatternType::LightTrellis => "lightTrellis",
            PatternType::Gray125 => "gray125",
            PatternType::Gray0625 => "gray0625",
        }
    }

    fn is_none_or_solid(self) -> bool {
        matches!(self, PatternType::None | PatternType::Solid)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FillStyle {
    pub pattern_type: PatternType,
    pub fg_color: Option<Color>,
    pub bg_color: Option<Color>,
}

impl FillStyle {
    const GRAY125: FillStyle = FillStyle {
        pattern_type: PatternType::Gray125,
        fg_color: None,
        bg_color: None,
    };

    fn is_default(&self) -> bool {
        *self == FillStyle::default()
    }

    /// Cell-style fills are stored the way Excel expects solid fills:
    /// the visible color lives in the foreground slot.
    fn normalized(&self) -> FillStyle {
        let mut fill = *self;

        if fill.pattern_type == PatternType::Solid && fill.fg_color.is_some() && fill.bg_color.is_some() {
            std::mem::swap(&mut fill.fg_color, &mut fill.bg_color);
        }

        if fill.pattern_type.is_none_or_solid() && fill.bg_color.is_some() && fill.fg_color.is_none() {
            fill.fg_color = fill.bg_color.take();
            fill.pattern_type = PatternType::Solid;
        }

        if fill.pattern_type.is_none_or_solid() && fill.bg_color.is_none() && fill.fg_color.is_some() {
            fill.pattern_type = PatternType::Solid;
        }

        fill
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BorderLineStyle {
    #[default]
    None,
    Thin,
    Medium,
    Dashed,
    Dotted,
    Thick,
    Double,
    Hair,
    MediumDashed,
    DashDot,
    MediumDashDot,
    DashDotDot,
    MediumDashDotDot,
    SlantDashDot,
}

impl BorderLineStyle {
    pub fn as_str(&self) -> &'static str {
        match self {
            BorderLineStyle::None => "none",
            BorderLineStyle::Thin => "thin",
            BorderLineStyle::Medium => "medium",
            BorderLineStyle::Dashed => "dashed",
            BorderLineStyle::Dotted => "dotted",
            BorderLineStyle::Thick => "thick",
            BorderLineStyle::Double => "double",
            BorderLineStyle::Hair => "hair",
            BorderLineStyle::MediumDashed => "mediumDashed",
            BorderLineStyle::DashDot => "dashDot",
            BorderLineStyle::MediumDashDot => "mediumDashDot",
            BorderLineStyle::DashDotDot => "dashDotDot",
            BorderLineStyle::MediumDashDotDot => "mediumDashDotDot",
            BorderLineStyle::SlantDashDot => "slantDashDot",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BorderSide {
    pub style: BorderLineStyle,
    pub color: Option<Color>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BorderStyle {
    pub left: BorderSide,
    pub right: BorderSide,
    pub top: BorderSide,
    pub bottom: BorderSide,
}

impl BorderStyle {
    fn sides(&self) -> [(&'static str, &BorderSide); 4] {
        [("left", &self.left), ("right", &self.right), ("top", &self.top), ("bottom", &self.bottom)]
    }

    fn has_dxf_override(&self) -> bool {
        self.sides()
            .iter()
            .any(|(_, side)| side.style != BorderLineStyle::None || side.color.is_some())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HorizontalAlignment {
    Left,
    Center,
    Right,
    Fill,
    Justify,
    CenterContinuous,
    Distributed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerticalAlignment {
    Top,
    Center,
    Bottom,
    Justify,
    Distributed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct AlignmentStyle {
    pub horizontal: Option<HorizontalAlignment>,
    pub vertical: Option<VerticalAlignment>,
    pub wrap_text: bool,
    pub text_rotation: Option<i16>,
    pub indent: u8,
}

impl AlignmentStyle {
    fn is_default(&self) -> bool {
        *self == AlignmentStyle::default()
    }
}

/// A cell format as registered by the user. Role indices are filled in by
/// [`FormatTable::xf_index`] and [`FormatTable::dxf_index`].
#[derive(Debug, Clone, PartialEq)]
pub struct Format {
    pub(crate) font: FontStyle,
    pub(crate) fill: FillStyle,
    pub(crate) border: BorderStyle,
    pub(crate) alignment: AlignmentStyle,
    pub(crate) num_format: String,
    pub(crate) locked: bool,
    pub(crate) hidden: bool,
    pub(crate) xf_index: Option<u32>,
    pub(crate) dxf_index: Option<u32>,
}

impl Default for Format {
    fn default() -> Self {
        Self {
            font: FontStyle::default(),
            fill: FillStyle::default(),
            border: BorderStyle::default(),
            alignment: AlignmentStyle::default(),
            num_format: "General".to_string(),
            locked: true,
            hidden: false,
            xf_index: None,
            dxf_index: None,
        }
    }
}

impl Format {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_font_name(mut self, name: impl Into<String>) -> Self {
        self.font.name = name.into();
        self
    }

    pub fn set_font_size(mut self, size: f64) -> Self {
        self.font.size = size;
        self
    }

    pub fn set_font_color(mut self, color: Color) -> Self {
        self.font.color = Some(color);
        self
    }

    pub fn set_bold(mut self) -> Self {
        self.font.bold = true;
        self
    }

    pub fn set_italic(mut self) -> Self {
        self.font.italic = true;
        self
    }

    pub fn set_underline(mut self, underline: Underline) -> Self {
        self.font.underline = underline;
        self
    }

    pub fn set_font_strikeout(mut self) -> Self {
        self.font.strikeout = true;
        self
    }

    pub fn set_font_script(mut self, script: FontScript) -> Self {
        self.font.script = script;
        self
    }

    pub fn set_pattern(mut self, pattern: PatternType) -> Self {
        self.fill.pattern_type = pattern;
        self
    }

    pub fn set_background_color(mut self, color: Color) -> Self {
        self.fill.bg_color = Some(color);
        self
    }

    pub fn set_foreground_color(mut self, color: Color) -> Self {
        self.fill.fg_color = Some(color);
        self
    }

    /// Same line style on all four edges.
    pub fn set_border(mut self, style: BorderLineStyle) -> Self {
        self.border.left.style = style;
        self.border.right.style = style;
        self.border.top.style = style;
        self.border.bottom.style = style;
        self
    }

    pub fn set_border_color(mut self, color: Color) -> Self {
        self.border.left.color = Some(color);
        self.border.right.color = Some(color);
        self.border.top.color = Some(color);
        self.border.bottom.color = Some(color);
        self
    }

    pub fn set_border_left(mut self, side: BorderSide) -> Self {
        self.border.left = side;
        self
    }

    pub fn set_border_right(mut self, side: BorderSide) -> Self {
        self.border.right = side;
        self
    }

    pub fn set_border_top(mut self, side: BorderSide) -> Self {
        self.border.top = side;
        self
    }

    pub fn set_border_bottom(mut self, side: BorderSide) -> Self {
        self.border.bottom = side;
        self
    }

    pub fn set_align(mut self, align: HorizontalAlignment) -> Self {
        self.alignment.horizontal = Some(align);
        self
    }

    pub fn set_vertical_align(mut self, align: VerticalAlignment) -> Self {
        self.alignment.vertical = Some(align);
        self
    }

    pub fn set_text_wrap(mut self) -> Self {
        self.alignment.wrap_text = true;
        self
    }

    pub fn set_rotation(mut self, degrees: i16) -> Self {
        self.alignment.text_rotation = Some(degrees);
        self
    }

    pub fn set_indent(mut self, level: u8) -> Self {
        self.alignment.indent = level;
        self
    }

    /// Built-in index as digits (`"14"`), `"General"`, or a custom format code.
    pub fn set_num_format(mut self, code: impl Into<String>) -> Self {
        self.num_format = code.into();
        self
    }

    pub fn set_unlocked(mut self) -> Self {
        self.locked = false;
        self
    }

    pub fn set_hidden(mut self) -> Self {
        self.hidden = true;
        self
    }

    pub fn font(&self) -> &FontStyle {
        &self.font
    }

    pub fn fill(&self) -> &FillStyle {
        &self.fill
    }

    pub fn num_format(&self) -> &str {
        &self.num_format
    }

    pub fn xf_index(&self) -> Option<u32> {
        self.xf_index
    }

    pub fn dxf_index(&self) -> Option<u32> {
        self.dxf_index
    }

    fn key(&self) -> FormatKey {
        FormatKey {
            font: self.font.key(),
            fill: self.fill,
            border: self.border,
            alignment: self.alignment,
            num_format: self.num_format.clone(),
            locked: self.locked,
            hidden: self.hidden,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct FormatKey {
    font: FontKey,
    fill: FillStyle,
    border: BorderStyle,
    alignment: AlignmentStyle,
    num_format: String,
    locked: bool,
    hidden: bool,
}

/// Map a number-format token to a built-in index, if it names one.
/// Built-in ids stop below 164; larger all-digit tokens are custom codes.
fn builtin_num_format(token: &str) -> Option<u16> {
    if token == "General" {
        return Some(0);
    }
    if token == "0" {
        return Some(1);
    }
    if token.is_empty() || !token.bytes().all(|b| b.is_ascii_digit()) || token.starts_with('0') {
        return None;
    }
    token
        .parse::<u16>()
        .ok()
        .filter(|&index| index < FIRST_CUSTOM_NUM_FORMAT)
}

/// Shared index namespace for custom number-format codes.
struct NumFormatIds {
    ids: HashMap<String, u16>,
    next: u16,
}

impl NumFormatIds {
    fn new() -> Self {
        Self { ids: HashMap::new(), next: FIRST_CUSTOM_NUM_FORMAT }
    }

    fn index_for(&mut self, code: &str, is_xf: bool, resolved: &mut ResolvedStyles) -> u16 {
        if let Some(index) = builtin_num_format(code) {
            return index;
        }
        if let Some(&index) = self.ids.get(code) {
            return index;
        }

        let index = self.next;
        self.next += 1;
        self.ids.insert(code.to_string(), index);
        // Only cell styles are listed in the numFmts table.
        if is_xf {
            resolved.custom_format_count += 1;
            resolved.num_formats.push((index, code.to_string()));
        }
        index
    }
}

/// Excel's default 56-color palette (indices 8-63).
const DEFAULT_PALETTE: [u32; 56] = [
    0x000000, 0xFFFFFF, 0xFF0000, 0x00FF00, 0x0000FF, 0xFFFF00, 0xFF00FF, 0x00FFFF,
    0x800000, 0x008000, 0x000080, 0x808000, 0x800080, 0x008080, 0xC0C0C0, 0x808080,
    0x9999FF, 0x993366, 0xFFFFCC, 0xCCFFFF, 0x660066, 0xFF8080, 0x0066CC, 0xCCCCFF,
    0x000080, 0xFF00FF, 0xFFFF00, 0x00FFFF, 0x800080, 0x800000, 0x008080, 0x0000FF,
    0x00CCFF, 0xCCFFFF, 0xCCFFCC, 0xFFFF99, 0x99CCFF, 0xFF99CC, 0xCC99FF, 0xFFCC99,
    0x3366FF, 0x33CCCC, 0x99CC00, 0xFFCC00, 0xFF9900, 0xFF6600, 0x666699, 0x969696,
    0x003366, 0x339966, 0x003300, 0x333300, 0x993300, 0x993366, 0x333399, 0x333333,
];

const PALETTE_OFFSET: u32 = 8;

/// Indexed color palette; only written when a color was customized.
#[derive(Debug, Clone, PartialEq)]
pub struct Palette {
    colors: Vec<Color>,
    customized: bool,
}

impl Default for Palette {
    fn default() -> Self {
        Self {
            colors: DEFAULT_PALETTE.iter().map(|&rgb| Color::rgb(rgb)).collect(),
            customized: false,
        }
    }
}

impl Palette {
    pub fn set(&mut self, index: u32, red: i32, green: i32, blue: i32) -> Result<(), XlsxError> {
        validate_palette_color(index, red, green, blue)?;

        let slot = (index - PALETTE_OFFSET) as usize;
        if slot >= self.colors.len() {
            self.colors.resize(slot + 1, Color::BLACK);
        }
        self.colors[slot] = Color::from_components(red as u8, green as u8, blue as u8);
        self.customized = true;
        Ok(())
    }

    pub fn get(&self, index: u32) -> Option<Color> {
        index
            .checked_sub(PALETTE_OFFSET)
            .and_then(|slot| self.colors.get(slot as usize).copied())
    }

    pub fn is_customized(&self) -> bool {
        self.customized
    }

    pub fn colors(&self) -> &[Color] {
        &self.colors
    }
}

/// Resolved cell-style (`cellXfs`) entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedXf {
    pub font_index: u32,
    pub fill_index: u32,
    pub border_index: u32,
    pub num_format_index: u16,
    pub alignment: AlignmentStyle,
    pub locked: bool,
    pub hidden: bool,
    /// True when this entry introduced its font rather than reusing one.
    pub new_font: bool,
    pub new_fill: bool,
    pub new_border: bool,
}

/// Resolved differential (`dxfs`) entry.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedDxf {
    pub font: FontStyle,
    pub fill: FillStyle,
    pub border: BorderStyle,
    pub num_format_index: u16,
    pub num_format: String,
    pub has_dxf_font: bool,
    pub has_dxf_fill: bool,
    pub has_dxf_border: bool,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ResolvedStyles {
    pub fonts: Vec<FontStyle>,
    pub fills: Vec<FillStyle>,
    pub borders: Vec<BorderStyle>,
    /// Custom number formats introduced by cell styles, as `(index, code)`.
    pub num_formats: Vec<(u16, String)>,
    pub xfs: Vec<ResolvedXf>,
    pub dxfs: Vec<ResolvedDxf>,
    pub custom_format_count: usize,
}

impl ResolvedStyles {
    /// Effective fill used by a cell-style index.
    pub fn xf_fill(&self, xf_index: u32) -> Option<&FillStyle> {
        let xf = self.xfs.get(xf_index as usize)?;
        self.fills.get(xf.fill_index as usize)
    }
}

/// Owns every registered format and hands out the xf/dxf index spaces.
#[derive(Debug, Clone)]
pub struct FormatTable {
    formats: Vec<Format>,
    xf_keys: HashMap<FormatKey, u32>,
    dxf_keys: HashMap<FormatKey, u32>,
    xf_count: u32,
    dxf_count: u32,
    palette: Palette,
}

impl Default for FormatTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FormatTable {
    /// A table holding the default format at xf index 0.
    pub fn new() -> Self {
        Self::with_default_font(FontStyle::default())
    }

    /// Like [`Self::new`], with `font` as the workbook default font.
    pub fn with_default_font(font: FontStyle) -> Self {
        let mut table = Self {
            formats: Vec::new(),
            xf_keys: HashMap::new(),
            dxf_keys: HashMap::new(),
            xf_count: 0,
            dxf_count: 0,
            palette: Palette::default(),
        };
        let default = table.register(Format { font, ..Format::default() });
        table.assign_xf(default.0);
        table
    }

    /// Append a format without assigning any index.
    pub fn register(&mut self, format: Format) -> FormatId {
        self.formats.push(format);
        FormatId(self.formats.len() - 1)
    }

    pub fn default_format(&self) -> FormatId {
        FormatId(0)
    }

    pub fn get(&self, id: FormatId) -> Option<&Format> {
        self.formats.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.formats.len()
    }

    pub fn is_empty(&self) -> bool {
        self.formats.is_empty()
    }

    /// Cell-style index for `id`, assigned on first use. A format whose
    /// attributes match an already indexed format shares that index.
    pub fn xf_index(&mut self, id: FormatId) -> Result<u32, XlsxError> {
        self.check_id(id)?;
        Ok(self.assign_xf(id.0))
    }

    /// Differential index for `id`, assigned on first use by a conditional rule.
    pub fn dxf_index(&mut self, id: FormatId) -> Result<u32, XlsxError> {
        self.check_id(id)?;
        Ok(self.assign_dxf(id.0))
    }

    fn check_id(&self, id: FormatId) -> Result<(), XlsxError> {
        if id.0 < self.formats.len() {
            Ok(())
        } else {
            Err(XlsxError::Reference(format!(
                "Unknown format id {} (this table has {} formats)",
                id.0,
                self.formats.len()
            )))
        }
    }

    fn assign_xf(&mut self, slot: usize) -> u32 {
        let format = &self.formats[slot];
        if let Some(index) = format.xf_index {
            return index;
        }

        let key = format.key();
        if let Some(&index) = self.xf_keys.get(&key) {
            return index;
        }

        let index = self.xf_count;
        self.xf_count += 1;
        self.xf_keys.insert(key, index);
        self.formats[slot].xf_index = Some(index);
        index
    }

    fn assign_dxf(&mut self, slot: usize) -> u32 {
        let format = &self.formats[slot];
        if let Some(index) = format.dxf_index {
            return index;
        }

        let key = format.key();
        if let Some(&index) = self.dxf_keys.get(&key) {
            return index;
        }

        let index = self.dxf_count;
        self.dxf_count += 1;
        self.dxf_keys.insert(key, index);
        self.formats[slot].dxf_index = Some(index);
        index
    }

    pub fn xf_count(&self) -> u32 {
        self.xf_count
    }

    pub fn dxf_count(&self) -> u32 {
        self.dxf_count
    }

    pub fn palette(&self) -> &Palette {
        &self.palette
    }

    pub fn set_custom_color(&mut self, index: u32, red: i32, green: i32, blue: i32) -> Result<(), XlsxError> {
        self.palette.set(index, red, green, blue)
    }

    fn partition(&self) -> (Vec<&Format>, Vec<&Format>) {
        let mut xf_slots: Vec<Option<&Format>> = vec![None; self.xf_count as usize];
        let mut dxf_slots: Vec<Option<&Format>> = vec![None; self.dxf_count as usize];

        for format in &self.formats {
            if let Some(index) = format.xf_index {
                xf_slots[index as usize] = Some(format);
            }
            if let Some(index) = format.dxf_index {
                dxf_slots[index as usize] = Some(format);
            }
        }

        (
            xf_slots.into_iter().flatten().collect(),
            dxf_slots.into_iter().flatten().collect(),
        )
    }

    /// Build the deduplicated font, fill, border and number-format tables.
    pub fn resolve(&self) -> ResolvedStyles {
        let (xf_formats, dxf_formats) = self.partition();
        let mut resolved = ResolvedStyles::default();

        // Fonts
        let mut font_ids: HashMap<FontKey, u32> = HashMap::new();
        let mut xf_fonts = Vec::with_capacity(xf_formats.len());
        for format in &xf_formats {
            let key = format.font.key();
            match font_ids.get(&key) {
                Some(&index) => xf_fonts.push((index, false)),
                None => {
                    let index = resolved.fonts.len() as u32;
                    font_ids.insert(key, index);
                    resolved.fonts.push(format.font.clone());
                    xf_fonts.push((index, true));
                }
            }
        }

        // Number formats: cell styles first, then differential styles.
        let mut num_formats = NumFormatIds::new();
        let xf_num_formats: Vec<u16> = xf_formats
            .iter()
            .map(|format| num_formats.index_for(&format.num_format, true, &mut resolved))
            .collect();
        let dxf_num_formats: Vec<u16> = dxf_formats
            .iter()
            .map(|format| num_formats.index_for(&format.num_format, false, &mut resolved))
            .collect();

        // Borders
        let mut border_ids: HashMap<BorderStyle, u32> = HashMap::new();
        let mut xf_borders = Vec::with_capacity(xf_formats.len());
        for format in &xf_formats {
            match border_ids.get(&format.border) {
                Some(&index) => xf_borders.push((index, false)),
                None => {
                    let index = resolved.borders.len() as u32;
                    border_ids.insert(format.border, index);
                    resolved.borders.push(format.border);
                    xf_borders.push((index, true));
                }
            }
        }

        // Fills: 0 and 1 are reserved for "none" and "gray125".
        let mut fill_ids: HashMap<FillStyle, u32> = HashMap::new();
        for seed in [FillStyle::default(), FillStyle::GRAY125] {
            fill_ids.insert(seed, resolved.fills.len() as u32);
            resolved.fills.push(seed);
        }
        let mut xf_fills = Vec::with_capacity(xf_formats.len());
        for format in &xf_formats {
            let fill = format.fill.normalized();
            match fill_ids.get(&fill) {
                Some(&index) => xf_fills.push((index, false)),
                None => {
                    let index = resolved.fills.len() as u32;
                    fill_ids.insert(fill, index);
                    resolved.fills.push(fill);
                    xf_fills.push((index, true));
                }
            }
        }

        resolved.xfs = xf_formats
            .iter()
            .enumerate()
            .map(|(i, format)| ResolvedXf {
                font_index: xf_fonts[i].0,
                fill_index: xf_fills[i].0,
                border_index: xf_borders[i].0,
                num_format_index: xf_num_formats[i],
                alignment: format.alignment,
                locked: format.locked,
                hidden: format.hidden,
                new_font: xf_fonts[i].1,
                new_fill: xf_fills[i].1,
                new_border: xf_borders[i].1,
            })
            .collect();

        resolved.dxfs = dxf_formats
            .iter()
            .zip(dxf_num_formats)
            .map(|(format, num_format_index)| ResolvedDxf {
                font: format.font.clone(),
                fill: format.fill,
                border: format.border,
                num_format_index,
                num_format: format.num_format.clone(),
                has_dxf_font: format.font.has_dxf_override(),
                has_dxf_fill: !format.fill.is_default(),
                has_dxf_border: format.border.has_dxf_override(),
            })
            .collect();

        tracing::debug!(
            fonts = resolved.fonts.len(),
            fills = resolved.fills.len(),
            borders = resolved.borders.len(),
            xfs = resolved.xfs.len(),
            dxfs = resolved.dxfs.len(),
            custom_num_formats = resolved.custom_format_count,
            "resolved style tables"
        );

        resolved
    }
}

pub fn generate_styles_xml(styles: &ResolvedStyles, palette: &Palette) -> String {
    let mut xml = String::with_capacity(2000 + styles.fonts.len() * 200 + styles.xfs.len() * 120);

    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<styleSheet xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\">\n");

    if !styles.num_formats.is_empty() {
        xml.push_str(&format!("<numFmts count=\"{}\">\n", styles.num_formats.len()));
        for (index, code) in &styles.num_formats {
            xml.push_str(&format!(
                "  <numFmt numFmtId=\"{}\" formatCode=\"{}\"/>\n",
                index,
                escape_str(code)
            ));
        }
        xml.push_str("</numFmts>\n");
    }

    xml.push_str(&format!("<fonts count=\"{}\">\n", styles.fonts.len()));
    for font in &styles.fonts {
        xml.push_str("  <font>");
        write_font_body(&mut xml, font, false);
        xml.push_str("</font>\n");
    }
    xml.push_str("</fonts>\n");

    xml.push_str(&format!("<fills count=\"{}\">\n", styles.fills.len()));
    for fill in &styles.fills {
        xml.push_str("  <fill>");
        write_pattern_fill(&mut xml, fill, false);
        xml.push_str("</fill>\n");
    }
    xml.push_str("</fills>\n");

    xml.push_str(&format!("<borders count=\"{}\">\n", styles.borders.len()));
    for border in &styles.borders {
        xml.push_str("  <border>");
        write_border_sides(&mut xml, border);
        xml.push_str("<diagonal/>");
        xml.push_str("</border>\n");
    }
    xml.push_str("</borders>\n");

    xml.push_str("<cellStyleXfs count=\"1\">\n");
    xml.push_str("  <xf numFmtId=\"0\" fontId=\"0\" fillId=\"0\" borderId=\"0\"/>\n");
    xml.push_str("</cellStyleXfs>\n");

    xml.push_str(&format!("<cellXfs count=\"{}\">\n", styles.xfs.len()));
    for xf in &styles.xfs {
        xml.push_str(&format!(
            "  <xf numFmtId=\"{}\" fontId=\"{}\" fillId=\"{}\" borderId=\"{}\" xfId=\"0\"",
            xf.num_format_index, xf.font_index, xf.fill_index, xf.border_index
        ));

        let apply_protection = !xf.locked || xf.hidden;
        if xf.num_format_index > 0 { xml.push_str(" applyNumberFormat=\"1\""); }
        if xf.font_index > 0 { xml.push_str(" applyFont=\"1\""); }
        if xf.fill_index > 0 { xml.push_str(" applyFill=\"1\""); }
        if xf.border_index > 0 { xml.push_str(" applyBorder=\"1\""); }
        if !xf.alignment.is_default() { xml.push_str(" applyAlignment=\"1\""); }
        if apply_protection { xml.push_str(" applyProtection=\"1\""); }

        if xf.alignment.is_default() && !apply_protection {
            xml.push_str("/>\n");
            continue;
        }

        xml.push('>');
        if !xf.alignment.is_default() {
            write_alignment(&mut xml, &xf.alignment);
        }
        if apply_protection {
            xml.push_str("<protection");
            if !xf.locked { xml.push_str(" locked=\"0\""); }
            if xf.hidden { xml.push_str(" hidden=\"1\""); }
            xml.push_str("/>");
        }
        xml.push_str("</xf>\n");
    }
    xml.push_str("</cellXfs>\n");

    xml.push_str("<cellStyles count=\"1\">\n");
    xml.push_str("  <cellStyle name=\"Normal\" xfId=\"0\" builtinId=\"0\"/>\n");
    xml.push_str("</cellStyles>\n");

    xml.push_str(&format!("<dxfs count=\"{}\">\n", styles.dxfs.len()));
    for dxf in &styles.dxfs {
        xml.push_str("  <dxf>");

        // OOXML order: font, numFmt, fill, alignment, border
        if dxf.has_dxf_font {
            xml.push_str("<font>");
            write_font_body(&mut xml, &dxf.font, true);
            xml.push_str("</font>");
        }

        if dxf.num_format_index > 0 {
            xml.push_str(&format!(
                "<numFmt numFmtId=\"{}\" formatCode=\"{}\"/>",
                dxf.num_format_index,
                escape_str(&dxf.num_format)
            ));
        }

        if dxf.has_dxf_fill {
            xml.push_str("<fill>");
            write_pattern_fill(&mut xml, &dxf.fill, true);
            xml.push_str("</fill>");
        }

        if dxf.has_dxf_border {
            xml.push_str("<border>");
            write_border_sides(&mut xml, &dxf.border);
            xml.push_str("</border>");
        }

        xml.push_str("</dxf>\n");
    }
    xml.push_str("</dxfs>\n");

    xml.push_str("<tableStyles count=\"0\" defaultTableStyle=\"TableStyleMedium9\" defaultPivotStyle=\"PivotStyleLight16\"/>\n");

    if palette.is_customized() {
        xml.push_str("<colors><indexedColors>");
        for color in palette.colors() {
            xml.push_str(&format!("<rgbColor rgb=\"{}\"/>", color.argb_hex()));
        }
        xml.push_str("</indexedColors></colors>\n");
    }

    xml.push_str("</styleSheet>");
    xml
}

fn write_font_body(xml: &mut String, font: &FontStyle, differential: bool) {
    if font.bold { xml.push_str("<b/>"); }
    if font.italic { xml.push_str("<i/>"); }
    if font.strikeout { xml.push_str("<strike/>"); }
    match font.underline {
        Underline::None => {}
        Underline::Single => xml.push_str("<u/>"),
        Underline::Double => xml.push_str("<u val=\"double\"/>"),
        Underline::SingleAccounting => xml.push_str("<u val=\"singleAccounting\"/>"),
        Underline::DoubleAccounting => xml.push_str("<u val=\"doubleAccounting\"/>"),
    }
    match font.script {
        FontScript::None => {}
        FontScript::Superscript => xml.push_str("<vertAlign val=\"superscript\"/>"),
        FontScript::Subscript => xml.push_str("<vertAlign val=\"subscript\"/>"),
    }
    if let Some(color) = font.color {
        xml.push_str(&format!("<color rgb=\"{}\"/>", color.argb_hex()));
    }
    if differential {
        return;
    }
    xml.push_str(&format!("<sz val=\"{}\"/>", font.size));
    if font.color.is_none() {
        xml.push_str("<color theme=\"1\"/>");
    }
    xml.push_str(&format!("<name val=\"{}\"/><family val=\"2\"/>", escape_str(&font.name)));
    if font.name == "Calibri" {
        xml.push_str("<scheme val=\"minor\"/>");
    }
}

fn write_pattern_fill(xml: &mut String, fill: &FillStyle, differential: bool) {
    if fill.pattern_type == PatternType::None && fill.fg_color.is_none() && fill.bg_color.is_none() {
        xml.push_str("<patternFill patternType=\"none\"/>");
        return;
    }

    if differential && fill.pattern_type.is_none_or_solid() {
        xml.push_str("<patternFill>");
    } else {
        xml.push_str(&format!("<patternFill patternType=\"{}\">", fill.pattern_type.as_str()));
    }
    if let Some(fg) = fill.fg_color {
        xml.push_str(&format!("<fgColor rgb=\"{}\"/>", fg.argb_hex()));
    }
    match fill.bg_color {
        Some(bg) => xml.push_str(&format!("<bgColor rgb=\"{}\"/>", bg.argb_hex())),
        None if !differential => xml.push_str("<bgColor indexed=\"64\"/>"),
        None => {}
    }
    xml.push_str("</patternFill>");
}

fn write_border_sides(xml: &mut String, border: &BorderStyle) {
    for (name, side) in border.sides() {
        write_border_side(xml, name, side);
    }
}

fn write_border_side(xml: &mut String, name: &str, side: &BorderSide) {
    if side.style == BorderLineStyle::None {
        xml.push_str(&format!("<{}/>", name));
        return;
    }

    xml.push_str(&format!("<{} style=\"{}\">", name, side.style.as_str()));
    match side.color {
        Some(color) => xml.push_str(&format!("<color rgb=\"{}\"/>", color.argb_hex())),
        None => xml.push_str("<color auto=\"1\"/>"),
    }
    xml.push_str(&format!("</{}>", name));
}

fn write_alignment(xml: &mut String, align: &AlignmentStyle) {
    xml.push_str("<alignment");
    if let Some(h) = align.horizontal {
        xml.push_str(&format!(" horizontal=\"{}\"", match h {
            HorizontalAlignment::Left => "left",
            HorizontalAlignment::Center => "center",
            HorizontalAlignment::Right => "right",
            HorizontalAlignment::Fill => "fill",
            HorizontalAlignment::Justify => "justify",
            HorizontalAlignment::CenterContinuous => "centerContinuous",
            HorizontalAlignment::Distributed => "distributed",
        }));
    }
    if let Some(v) = align.vertical {
        xml.push_str(&format!(" vertical=\"{}\"", match v {
            VerticalAlignment::Top => "top",
            VerticalAlignment::Center => "center",
            VerticalAlignment::Bottom => "bottom",
            VerticalAlignment::Justify => "justify",
            VerticalAlignment::Distributed => "distributed",
        }));
    }
    if let Some(rotation) = align.text_rotation {
        xml.push_str(&format!(" textRotation=\"{}\"", rotation));
    }
    if align.wrap_text {
        xml.push_str(" wrapText=\"1\"");
    }
    if align.indent > 0 {
        xml.push_str(&format!(" indent=\"{}\"", align.indent));
    }
    xml.push_str("/>");
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn xf(table: &mut FormatTable, format: Format) -> u32 {
        let id = table.register(format);
        table.xf_index(id).expect("known format")
    }

    #[test]
    fn test_default_format_is_xf_zero() {
        let table = FormatTable::new();
        assert_eq!(table.xf_count(), 1);
        assert_eq!(table.get(table.default_format()).and_then(Format::xf_index), Some(0));

        let resolved = table.resolve();
        assert_eq!(resolved.fonts.len(), 1);
        assert_eq!(resolved.borders.len(), 1);
        assert_eq!(resolved.fills.len(), 2);
        assert_eq!(resolved.xfs[0].fill_index, 0);
    }

    #[test]
    fn test_identical_formats_share_xf() {
        let mut table = FormatTable::new();
        let a = xf(&mut table, Format::new().set_bold());
        let b = xf(&mut table, Format::new().set_bold());
        let c = xf(&mut table, Format::new().set_italic());

        assert_eq!(a, 1);
        assert_eq!(b, 1);
        assert_eq!(c, 2);
        assert_eq!(table.xf_count(), 3);
        assert_eq!(table.resolve().xfs.len(), 3);
    }

    #[test]
    fn test_unused_format_gets_no_index() {
        let mut table = FormatTable::new();
        let id = table.register(Format::new().set_bold());
        assert_eq!(table.get(id).and_then(Format::xf_index), None);
        assert_eq!(table.resolve().xfs.len(), 1);
    }

    #[test]
    fn test_solid_fill_colors_swap() {
        let mut table = FormatTable::new();
        let index = xf(
            &mut table,
            Format::new()
                .set_pattern(PatternType::Solid)
                .set_foreground_color(Color::RED)
                .set_background_color(Color::BLUE),
        );

        let resolved = table.resolve();
        let fill = resolved.xf_fill(index).expect("fill");
        assert_eq!(fill.fg_color, Some(Color::BLUE));
        assert_eq!(fill.bg_color, Some(Color::RED));
    }

    #[test]
    fn test_background_only_promoted_to_solid_foreground() {
        let mut table = FormatTable::new();
        let index = xf(&mut table, Format::new().set_background_color(Color::YELLOW));

        let resolved = table.resolve();
        assert_eq!(
            resolved.xf_fill(index),
            Some(&FillStyle {
                pattern_type: PatternType::Solid,
                fg_color: Some(Color::YELLOW),
                bg_color: None,
            })
        );
    }

    #[test]
    fn test_foreground_only_forced_solid() {
        let mut table = FormatTable::new();
        let index = xf(&mut table, Format::new().set_foreground_color(Color::GREEN));
        let fill = *table.resolve().xf_fill(index).expect("fill");
        assert_eq!(fill.pattern_type, PatternType::Solid);
        assert_eq!(fill.bg_color, None);
    }

    #[test]
    fn test_colorless_solid_fill_is_not_the_empty_fill() {
        let mut table = FormatTable::new();
        let solid = xf(&mut table, Format::new().set_pattern(PatternType::Solid));
        let none = xf(&mut table, Format::new().set_pattern(PatternType::None).set_bold());

        let resolved = table.resolve();
        assert_eq!(resolved.xfs[solid as usize].fill_index, 2);
        assert_eq!(resolved.xfs[none as usize].fill_index, 0);
        assert_eq!(resolved.fills.len(), 3);
    }

    #[test]
    fn test_reserved_fills_precede_user_fills() {
        let mut table = FormatTable::new();
        // A user fill identical to gray125 reuses the reserved slot.
        let gray = xf(&mut table, Format::new().set_pattern(PatternType::Gray125));
        let red = xf(&mut table, Format::new().set_background_color(Color::RED));

        let resolved = table.resolve();
        assert_eq!(resolved.fills[0], FillStyle::default());
        assert_eq!(resolved.fills[1].pattern_type, PatternType::Gray125);
        assert_eq!(resolved.xfs[gray as usize].fill_index, 1);
        assert!(!resolved.xfs[gray as usize].new_fill);
        assert_eq!(resolved.xfs[red as usize].fill_index, 2);
        assert!(resolved.xfs[red as usize].new_fill);
    }

    #[test]
    fn test_shared_custom_number_format_counted_once() {
        let mut table = FormatTable::new();
        let a = xf(&mut table, Format::new().set_num_format("0.000").set_bold());
        let b = xf(&mut table, Format::new().set_num_format("0.000").set_italic());

        let resolved = table.resolve();
        assert_eq!(resolved.xfs[a as usize].num_format_index, 164);
        assert_eq!(resolved.xfs[b as usize].num_format_index, 164);
        assert_eq!(resolved.custom_format_count, 1);
        assert_eq!(resolved.num_formats, vec![(164, "0.000".to_string())]);
    }

    #[test]
    fn test_builtin_number_format_tokens() {
        let mut table = FormatTable::new();
        let zero = xf(&mut table, Format::new().set_num_format("0"));
        let date = xf(&mut table, Format::new().set_num_format("14"));
        let padded = xf(&mut table, Format::new().set_num_format("014"));
        let double_zero = xf(&mut table, Format::new().set_num_format("00"));
        let too_big = xf(&mut table, Format::new().set_num_format("200"));

        let resolved = table.resolve();
        assert_eq!(resolved.xfs[0].num_format_index, 0);
        assert_eq!(resolved.xfs[zero as usize].num_format_index, 1);
        assert_eq!(resolved.xfs[date as usize].num_format_index, 14);
        assert_eq!(resolved.xfs[padded as usize].num_format_index, 164);
        assert_eq!(resolved.xfs[double_zero as usize].num_format_index, 165);
        assert_eq!(resolved.xfs[too_big as usize].num_format_index, 166);
        assert_eq!(resolved.custom_format_count, 3);
    }

    #[test]
    fn test_dxf_only_custom_format_not_counted() {
        let mut table = FormatTable::new();
        let cell = xf(&mut table, Format::new().set_num_format("0.0%"));
        let rule = table.register(Format::new().set_num_format("#,##0.0"));
        let dxf = table.dxf_index(rule).expect("known format");

        let resolved = table.resolve();
        assert_eq!(resolved.xfs[cell as usize].num_format_index, 164);
        assert_eq!(resolved.dxfs[dxf as usize].num_format_index, 165);
        assert_eq!(resolved.custom_format_count, 1);
    }

    #[test]
    fn test_fonts_dedup_and_flags() {
        let mut table = FormatTable::new();
        let a = xf(&mut table, Format::new().set_bold().set_num_format("0.00"));
        let b = xf(&mut table, Format::new().set_bold().set_num_format("0.0"));

        let resolved = table.resolve();
        assert_eq!(resolved.fonts.len(), 2);
        assert_eq!(resolved.xfs[a as usize].font_index, 1);
        assert!(resolved.xfs[a as usize].new_font);
        assert_eq!(resolved.xfs[b as usize].font_index, 1);
        assert!(!resolved.xfs[b as usize].new_font);
    }

    #[test]
    fn test_dxf_override_flags() {
        let mut table = FormatTable::new();
        let font_rule = table.register(Format::new().set_font_color(Color::RED));
        let fill_rule = table.register(
            Format::new()
                .set_pattern(PatternType::Solid)
                .set_foreground_color(Color::RED)
                .set_background_color(Color::BLUE),
        );
        let border_rule = table.register(Format::new().set_border(BorderLineStyle::Thin));
        let font_dxf = table.dxf_index(font_rule).expect("known format");
        let fill_dxf = table.dxf_index(fill_rule).expect("known format");
        let border_dxf = table.dxf_index(border_rule).expect("known format");

        let resolved = table.resolve();
        let font = &resolved.dxfs[font_dxf as usize];
        assert!(font.has_dxf_font && !font.has_dxf_fill && !font.has_dxf_border);

        // Differential fills keep their colors as given.
        let fill = &resolved.dxfs[fill_dxf as usize];
        assert!(fill.has_dxf_fill);
        assert_eq!(fill.fill.fg_color, Some(Color::RED));
        assert_eq!(fill.fill.bg_color, Some(Color::BLUE));

        assert!(resolved.dxfs[border_dxf as usize].has_dxf_border);
        // Differential formats never add to the cell font table.
        assert_eq!(resolved.fonts.len(), 1);
    }

    #[test]
    fn test_format_in_both_roles() {
        let mut table = FormatTable::new();
        let id = table.register(Format::new().set_italic());
        assert_eq!(table.xf_index(id).expect("known format"), 1);
        assert_eq!(table.dxf_index(id).expect("known format"), 0);

        let resolved = table.resolve();
        assert_eq!(resolved.xfs.len(), 2);
        assert_eq!(resolved.dxfs.len(), 1);
    }

    #[test]
    fn test_foreign_format_id_is_rejected() {
        let mut other = FormatTable::new();
        let foreign = other.register(Format::new().set_bold());

        let mut table = FormatTable::new();
        assert!(matches!(table.xf_index(foreign), Err(XlsxError::Reference(_))));
        assert!(matches!(table.dxf_index(foreign), Err(XlsxError::Reference(_))));
        assert_eq!(table.xf_count(), 1);
    }

    #[test]
    fn test_palette() {
        let mut table = FormatTable::new();
        assert!(!table.palette().is_customized());
        assert_eq!(table.palette().get(10), Some(Color::RED));

        table.set_custom_color(40, 0x12, 0x34, 0x56).expect("valid color");
        table.set_custom_color(64, 1, 2, 3).expect("valid color");
        assert!(table.palette().is_customized());
        assert_eq!(table.palette().get(40), Some(Color::rgb(0x123456)));
        assert_eq!(table.palette().colors().len(), 57);
        assert!(table.set_custom_color(65, 0, 0, 0).is_err());
        assert!(table.set_custom_color(8, 300, 0, 0).is_err());
    }

    #[test]
    fn test_styles_xml() {
        let mut table = FormatTable::new();
        xf(&mut table, Format::new().set_bold().set_num_format("0.000"));
        let rule = table.register(Format::new().set_font_color(Color::RED));
        table.dxf_index(rule).expect("known format");

        let xml = generate_styles_xml(&table.resolve(), table.palette());
        assert!(xml.contains("<numFmts count=\"1\">"));
        assert!(xml.contains("<numFmt numFmtId=\"164\" formatCode=\"0.000\"/>"));
        assert!(xml.contains("<fonts count=\"2\">"));
        assert!(xml.contains("<fills count=\"2\">"));
        assert!(xml.contains("<cellXfs count=\"2\">"));
        assert!(xml.contains("<dxfs count=\"1\">"));
        assert!(xml.contains("<dxf><font><color rgb=\"FFFF0000\"/></font></dxf>"));
        assert!(!xml.contains("<colors>"));
    }
}
