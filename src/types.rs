use chrono::{NaiveDateTime, Timelike};
use thiserror::Error;

/// Handle to a sheet owned by a [`crate::Workbook`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SheetId(pub(crate) usize);

impl SheetId {
    /// Zero-based position of the sheet in the workbook.
    pub fn index(self) -> usize {
        self.0
    }
}

/// Handle to a format registered with the workbook's format table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FormatId(pub(crate) usize);

/// Handle to a chart owned by the workbook.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChartId(pub(crate) usize);

#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Blank,
    /// Index into the shared string table.
    SharedString(u32),
    Number(f64),
    Bool(bool),
    Formula {
        formula: String,
        cached_value: Option<String>,
    },
}

#[derive(Debug, Clone, PartialEq)]
pub struct Cell {
    pub value: CellValue,
    pub xf_index: Option<u32>,
}

/// RGB color stored as `0xRRGGBB`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Color(u32);

impl Color {
    pub const BLACK: Color = Color(0x000000);
    pub const WHITE: Color = Color(0xFFFFFF);
    pub const RED: Color = Color(0xFF0000);
    pub const GREEN: Color = Color(0x00FF00);
    pub const BLUE: Color = Color(0x0000FF);
    pub const YELLOW: Color = Color(0xFFFF00);
    pub const GRAY: Color = Color(0x808080);

    pub const fn rgb(value: u32) -> Self {
        Color(value & 0x00FF_FFFF)
    }

    pub fn from_components(red: u8, green: u8, blue: u8) -> Self {
        Color(((red as u32) << 16) | ((green as u32) << 8) | blue as u32)
    }

    pub fn value(self) -> u32 {
        self.0
    }

    /// `FFRRGGBB` form used by the styles part.
    pub fn argb_hex(self) -> String {
        format!("FF{:06X}", self.0)
    }
}

/// Inclusive zero-based cell range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellRange {
    pub first_row: u32,
    pub first_col: u16,
    pub last_row: u32,
    pub last_col: u16,
}

impl CellRange {
    pub fn new(first_row: u32, first_col: u16, last_row: u32, last_col: u16) -> Self {
        Self {
            first_row: first_row.min(last_row),
            first_col: first_col.min(last_col),
            last_row: first_row.max(last_row),
            last_col: first_col.max(last_col),
        }
    }

    pub fn num_rows(&self) -> u32 {
        self.last_row - self.first_row + 1
    }

    pub fn num_cols(&self) -> u16 {
        self.last_col - self.first_col + 1
    }
}

const UNIX_EPOCH_SERIAL: f64 = 25_569.0;

/// Excel serial date (1900 date system) for a naive datetime.
#[inline]
pub fn datetime_to_excel_serial(dt: &NaiveDateTime) -> f64 {
    let seconds = dt.and_utc().timestamp() as f64 + dt.nanosecond() as f64 / 1e9;
    UNIX_EPOCH_SERIAL + seconds / 86_400.0
}

#[derive(Debug, Error)]
pub enum XlsxError {
    /// A builder call was given a value Excel would reject.
    #[error("Validation error: {0}")]
    Validation(String),
    /// A name or reference could not be resolved against the workbook.
    #[error("Reference error: {0}")]
    Reference(String),
    /// An image could not be identified or its header is inconsistent.
    #[error("Image format error: {0}")]
    Format(String),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Package error: {0}")]
    Package(String),
}

pub type Result<T, E = XlsxError> = std::result::Result<T, E>;

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn test_color_hex() {
        assert_eq!(Color::RED.argb_hex(), "FFFF0000");
        assert_eq!(Color::from_components(0x12, 0x34, 0x56).argb_hex(), "FF123456");
        assert_eq!(Color::rgb(0xFF00_0000 | 0x0A0B0C).value(), 0x0A0B0C);
    }

    #[test]
    fn test_excel_serial() {
        let dt = NaiveDate::from_ymd_opt(2024, 1, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .expect("valid date");
        assert!((datetime_to_excel_serial(&dt) - 45292.5).abs() < 1e-9);
    }

    #[test]
    fn test_cell_range_normalizes() {
        let range = CellRange::new(5, 3, 1, 0);
        assert_eq!(range, CellRange { first_row: 1, first_col: 0, last_row: 5, last_col: 3 });
        assert_eq!(range.num_rows(), 5);
        assert_eq!(range.num_cols(), 4);
    }
}
