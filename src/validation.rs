//! Validation of builder input against Excel's limits.
use crate::types::{CellRange, XlsxError};
use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

// Excel hard limits
pub const MAX_ROWS: u32 = 1_048_576;
pub const MAX_COLS: u16 = 16_384;
pub const MAX_STRING_LEN: usize = 32_767;
pub const MAX_PROPERTY_LEN: usize = 255;
const MAX_SHEET_NAME_LEN: usize = 31;
const INVALID_SHEET_CHARS: &str = "[]:*?/\\";

// Leading character may not be punctuation or a digit.
static NAME_BAD_FIRST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r##"^[-0-9 !"#$%&'()*+,.:;<=>?@\[\]^`{}~]"##).expect("static regex")
});

// Later characters may not be punctuation other than `.` and `_`.
static NAME_BAD_REST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r##"^.+[- !"#$%&'()*+,\\:;<=>?@\[\]^`{}~]"##).expect("static regex")
});

static NAME_LIKE_CELL: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z][a-zA-Z]?[a-dA-D]?[0-9]+$").expect("static regex"));

static NAME_LIKE_R1C1: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(?:[rcRC]|[rcRC][0-9]+[rcRC][0-9]+)$").expect("static regex")
});

/// Validate sheet name meets Excel requirements
pub fn validate_sheet_name(name: &str) -> Result<(), XlsxError> {
    if name.is_empty() {
        return Err(XlsxError::Validation("Sheet name cannot be empty".to_string()));
    }

    let len = name.chars().count();
    if len > MAX_SHEET_NAME_LEN {
        return Err(XlsxError::Validation(format!(
            "Sheet name '{}' exceeds {} characters (has {})",
            name, MAX_SHEET_NAME_LEN, len
        )));
    }

    for c in INVALID_SHEET_CHARS.chars() {
        if name.contains(c) {
            return Err(XlsxError::Validation(format!(
                "Sheet name '{}' contains invalid character '{}'",
                name, c
            )));
        }
    }

    if name.starts_with('\'') || name.ends_with('\'') {
        return Err(XlsxError::Validation(format!(
            "Sheet name '{}' cannot start or end with an apostrophe",
            name
        )));
    }

    // Check for control characters
    if name.chars().any(|c| c.is_control()) {
        return Err(XlsxError::Validation(format!(
            "Sheet name '{}' contains control characters",
            name
        )));
    }

    Ok(())
}

/// Sheet names are unique case-insensitively.
pub fn validate_unique_sheet_name<'a>(
    name: &str,
    existing: impl IntoIterator<Item = &'a str>,
) -> Result<(), XlsxError> {
    let lower = name.to_lowercase();
    if existing.into_iter().any(|other| other.to_lowercase() == lower) {
        return Err(XlsxError::Validation(format!(
            "Duplicate sheet name '{}' (sheet names are case-insensitive)",
            name
        )));
    }
    Ok(())
}

/// Validate cell coordinates are within Excel limits
pub fn validate_cell_coords(row: u32, col: u16, context: &str) -> Result<(), XlsxError> {
    if row >= MAX_ROWS {
        return Err(XlsxError::Validation(format!(
            "{}: Row {} is out of range (must be 0-{})",
            context,
            row,
            MAX_ROWS - 1
        )));
    }

    if col >= MAX_COLS {
        return Err(XlsxError::Validation(format!(
            "{}: Column {} is out of range (must be 0-{})",
            context,
            col,
            MAX_COLS - 1
        )));
    }

    Ok(())
}

pub fn validate_range(range: &CellRange, context: &str) -> Result<(), XlsxError> {
    validate_cell_coords(range.first_row, range.first_col, context)?;
    validate_cell_coords(range.last_row, range.last_col, context)
}

/// Validate a defined name against Excel's naming rules.
pub fn validate_defined_name(name: &str) -> Result<(), XlsxError> {
    if name.is_empty() {
        return Err(XlsxError::Validation("Defined name cannot be empty".to_string()));
    }

    if NAME_BAD_FIRST.is_match(name) || NAME_BAD_REST.is_match(name) {
        return Err(XlsxError::Validation(format!(
            "Invalid characters in name '{}' used in defined name",
            name
        )));
    }

    if NAME_LIKE_CELL.is_match(name) {
        return Err(XlsxError::Validation(format!(
            "Invalid name '{}' looks like a cell name in defined name",
            name
        )));
    }

    if NAME_LIKE_R1C1.is_match(name) {
        return Err(XlsxError::Validation(format!(
            "Invalid name '{}' looks like an R1C1 cell reference in defined name",
            name
        )));
    }

    Ok(())
}

/// Validate table configuration
pub fn validate_table_name(name: &str) -> Result<(), XlsxError> {
    let Some(first) = name.chars().next() else {
        return Err(XlsxError::Validation("Table name cannot be empty".to_string()));
    };

    // Table names must be valid Excel identifiers
    if !first.is_alphabetic() && first != '_' {
        return Err(XlsxError::Validation(format!(
            "Table name '{}' must start with letter or underscore",
            name
        )));
    }

    if !name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.') {
        return Err(XlsxError::Validation(format!(
            "Table name '{}' contains invalid characters",
            name
        )));
    }

    if NAME_LIKE_CELL.is_match(name) || NAME_LIKE_R1C1.is_match(name) {
        return Err(XlsxError::Validation(format!(
            "Table name '{}' looks like a cell reference",
            name
        )));
    }

    Ok(())
}

pub fn validate_table_range(range: &CellRange, has_header: bool) -> Result<(), XlsxError> {
    validate_range(range, "Table")?;

    // Table must have at least header row + 1 data row
    if has_header && range.last_row <= range.first_row {
        return Err(XlsxError::Validation(format!(
            "Table at row {}: must have at least 2 rows when a header row is shown",
            range.first_row
        )));
    }

    Ok(())
}

/// Validate all tables don't have name collisions
pub fn validate_table_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<(), XlsxError> {
    let mut seen = HashSet::new();

    for name in names {
        if !seen.insert(name.to_lowercase()) {
            return Err(XlsxError::Reference(format!(
                "Duplicate table name '{}' (table names are case-insensitive)",
                name
            )));
        }
    }

    Ok(())
}

/// Custom palette slots are 8-64; components are 0-255.
pub fn validate_palette_color(index: u32, red: i32, green: i32, blue: i32) -> Result<(), XlsxError> {
    if !(8..=64).contains(&index) {
        return Err(XlsxError::Validation(format!(
            "Color index {} outside range: 8 <= index <= 64",
            index
        )));
    }

    for component in [red, green, blue] {
        if !(0..=255).contains(&component) {
            return Err(XlsxError::Validation(format!(
                "Color component {} outside range: 0 <= color <= 255",
                component
            )));
        }
    }

    Ok(())
}

pub fn validate_tab_ratio(ratio: f64) -> Result<(), XlsxError> {
    if !(0.0..=100.0).contains(&ratio) {
        return Err(XlsxError::Validation(format!(
            "Tab ratio {} outside range: 0 <= ratio <= 100",
            ratio
        )));
    }
    Ok(())
}

pub fn validate_string_len(text: &str, context: &str) -> Result<(), XlsxError> {
    let len = text.chars().count();
    if len > MAX_STRING_LEN {
        return Err(XlsxError::Validation(format!(
            "{}: string length {} exceeds Excel's limit of {}",
            context, len, MAX_STRING_LEN
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_sheet_name() {
        assert!(validate_sheet_name("Sheet1").is_ok());
        assert!(validate_sheet_name("").is_err());
        assert!(validate_sheet_name(&"A".repeat(32)).is_err());
        assert!(validate_sheet_name("Invalid:Name").is_err());
        assert!(validate_sheet_name("'Quoted").is_err());
    }

    #[test]
    fn test_duplicate_sheet_names() {
        assert!(validate_unique_sheet_name("sheet1", ["Sheet1"]).is_err());
        assert!(validate_unique_sheet_name("Sheet2", ["Sheet1"]).is_ok());
    }

    #[test]
    fn test_cell_coords_overflow() {
        assert!(validate_cell_coords(MAX_ROWS, 0, "test").is_err());
        assert!(validate_cell_coords(1, MAX_COLS, "test").is_err());
        assert!(validate_cell_coords(1, 0, "test").is_ok());
    }

    #[test]
    fn test_defined_name_rules() {
        for ok in ["Sales", "_Total", "\\Backslash", "tax.rate", "Name1", "ABCD1", "R1C"] {
            assert!(validate_defined_name(ok).is_ok(), "{ok} should be valid");
        }

        // Leading special character.
        assert!(validate_defined_name("1Sales").is_err());
        assert!(validate_defined_name(".Sales").is_err());
        // Special character after the first.
        assert!(validate_defined_name("Sales Tax").is_err());
        assert!(validate_defined_name("Sales-").is_err());
        // Cell-reference shaped.
        assert!(validate_defined_name("A1").is_err());
        assert!(validate_defined_name("XFD1048576").is_err());
        assert!(validate_defined_name("abc12").is_err());
        // R1C1 shaped.
        assert!(validate_defined_name("R").is_err());
        assert!(validate_defined_name("c").is_err());
        assert!(validate_defined_name("R1C1").is_err());
    }

    #[test]
    fn test_table_names() {
        assert!(validate_table_name("Sales_2024").is_ok());
        assert!(validate_table_name("2024Sales").is_err());
        assert!(validate_table_name("Sales Table").is_err());
        assert!(validate_table_name("B2").is_err());
        assert!(validate_table_names(["Sales", "Costs"]).is_ok());
        assert!(matches!(
            validate_table_names(["Sales", "SALES"]),
            Err(XlsxError::Reference(_))
        ));
    }

    #[test]
    fn test_palette_and_tab_ratio() {
        assert!(validate_palette_color(8, 0, 0, 0).is_ok());
        assert!(validate_palette_color(64, 255, 255, 255).is_ok());
        assert!(validate_palette_color(7, 0, 0, 0).is_err());
        assert!(validate_palette_color(65, 0, 0, 0).is_err());
        assert!(validate_palette_color(10, 256, 0, 0).is_err());
        assert!(validate_palette_color(10, 0, -1, 0).is_err());
        assert!(validate_tab_ratio(0.0).is_ok());
        assert!(validate_tab_ratio(100.0).is_ok());
        assert!(validate_tab_ratio(100.5).is_err());
        assert!(validate_tab_ratio(-1.0).is_err());
    }
}
