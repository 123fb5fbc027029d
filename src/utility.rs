//! A1-style reference helpers shared by defined names, chart ranges and the
//! part writers.

use crate::validation::{MAX_COLS, MAX_ROWS};

/// Zero-allocation column letter writing - returns length written
#[inline(always)]
pub fn write_col_letter(col: u16, buf: &mut [u8; 4]) -> usize {
    let mut col = col as usize;
    if col < 26 {
        buf[0] = b'A' + col as u8;
        return 1;
    }

    let mut stack = [0u8; 4];
    let mut stack_len = 0;

    while col >= 26 {
        stack[stack_len] = b'A' + (col % 26) as u8;
        stack_len += 1;
        col = col / 26 - 1;
    }
    stack[stack_len] = b'A' + col as u8;
    stack_len += 1;

    for i in 0..stack_len {
        buf[i] = stack[stack_len - 1 - i];
    }

    stack_len
}

pub fn col_to_name(col: u16) -> String {
    let mut buf = [0u8; 4];
    let len = write_col_letter(col, &mut buf);
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

/// `(0, 0)` -> `A1`
pub fn rowcol_to_cell(row: u32, col: u16) -> String {
    format!("{}{}", col_to_name(col), row + 1)
}

/// `(0, 0)` -> `$A$1`
pub fn rowcol_to_cell_abs(row: u32, col: u16) -> String {
    format!("${}${}", col_to_name(col), row + 1)
}

/// Parse `A1`, `$A$1`, `a1` into zero-based `(row, col)`.
pub fn cell_to_rowcol(cell: &str) -> Option<(u32, u16)> {
    let bytes = cell.trim().as_bytes();
    let mut pos = 0;
    if bytes.get(pos) == Some(&b'$') {
        pos += 1;
    }

    let mut col: u32 = 0;
    let letters_start = pos;
    while let Some(b) = bytes.get(pos).filter(|b| b.is_ascii_alphabetic()) {
        col = col * 26 + (b.to_ascii_uppercase() - b'A') as u32 + 1;
        if col > MAX_COLS as u32 {
            return None;
        }
        pos += 1;
    }
    if pos == letters_start {
        return None;
    }

    if bytes.get(pos) == Some(&b'$') {
        pos += 1;
    }

    let digits = &bytes[pos..];
    if digits.is_empty() || !digits.iter().all(u8::is_ascii_digit) {
        return None;
    }
    let row: u32 = std::str::from_utf8(digits).ok()?.parse().ok()?;
    if row == 0 || row > MAX_ROWS {
        return None;
    }

    Some((row - 1, (col - 1) as u16))
}

/// Absolute range such as `$A$1:$B$4`, collapsed to one cell when the
/// corners match.
pub fn range_abs(first_row: u32, first_col: u16, last_row: u32, last_col: u16) -> String {
    let first = rowcol_to_cell_abs(first_row, first_col);
    if first_row == last_row && first_col == last_col {
        first
    } else {
        format!("{}:{}", first, rowcol_to_cell_abs(last_row, last_col))
    }
}

/// Area reference used by print areas: whole columns become `$A:$D`,
/// whole rows become `$1:$10`.
pub fn area_reference(first_row: u32, first_col: u16, last_row: u32, last_col: u16) -> String {
    let (start, end, row_col_only) = if first_row == 0 && last_row == MAX_ROWS - 1 {
        (format!("${}", col_to_name(first_col)), format!("${}", col_to_name(last_col)), true)
    } else if first_col == 0 && last_col == MAX_COLS - 1 {
        (format!("${}", first_row + 1), format!("${}", last_row + 1), true)
    } else {
        (rowcol_to_cell_abs(first_row, first_col), rowcol_to_cell_abs(last_row, last_col), false)
    };

    if start == end && !row_col_only {
        start
    } else {
        format!("{}:{}", start, end)
    }
}

/// Quote sheet names for use in formulas
/// Example: "My Sheet" -> "'My Sheet'"
///          "Quote's Sheet" -> "'Quote''s Sheet'"
pub fn quote_sheet_name(name: &str) -> String {
    if name.starts_with('\'') && name.ends_with('\'') && name.len() > 1 {
        return name.to_string();
    }

    let needs_quoting = name.chars().any(|c| !c.is_alphanumeric() && c != '_' && c != '.')
        || name.chars().next().is_some_and(|c| c.is_ascii_digit())
        || cell_to_rowcol(name).is_some();

    if needs_quoting {
        format!("'{}'", name.replace('\'', "''"))
    } else {
        name.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_col_names() {
        assert_eq!(col_to_name(0), "A");
        assert_eq!(col_to_name(25), "Z");
        assert_eq!(col_to_name(26), "AA");
        assert_eq!(col_to_name(701), "ZZ");
        assert_eq!(col_to_name(16_383), "XFD");
    }

    #[test]
    fn test_cell_to_rowcol() {
        assert_eq!(cell_to_rowcol("A1"), Some((0, 0)));
        assert_eq!(cell_to_rowcol("$B$3"), Some((2, 1)));
        assert_eq!(cell_to_rowcol("xfd1048576"), Some((1_048_575, 16_383)));
        assert_eq!(cell_to_rowcol("A0"), None);
        assert_eq!(cell_to_rowcol("1A"), None);
        assert_eq!(cell_to_rowcol("XFE1"), None);
        assert_eq!(cell_to_rowcol(""), None);
    }

    #[test]
    fn test_ranges() {
        assert_eq!(range_abs(0, 0, 3, 1), "$A$1:$B$4");
        assert_eq!(range_abs(2, 2, 2, 2), "$C$3");
        assert_eq!(area_reference(0, 0, MAX_ROWS - 1, 3), "$A:$D");
        assert_eq!(area_reference(0, 0, 9, MAX_COLS - 1), "$1:$10");
        assert_eq!(area_reference(0, 0, 0, 0), "$A$1");
    }

    #[test]
    fn test_quote_sheet_name() {
        assert_eq!(quote_sheet_name("Sheet1"), "Sheet1");
        assert_eq!(quote_sheet_name("My Sheet"), "'My Sheet'");
        assert_eq!(quote_sheet_name("Quote's"), "'Quote''s'");
        assert_eq!(quote_sheet_name("Sheet!"), "'Sheet!'");
        assert_eq!(quote_sheet_name("2024"), "'2024'");
        assert_eq!(quote_sheet_name("A1"), "'A1'");
    }
}
