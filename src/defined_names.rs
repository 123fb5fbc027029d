//! Workbook defined names: user names plus the `_xlnm.` names Excel
//! derives from autofilters, print areas and print titles.

use crate::types::XlsxError;
use crate::utility::{area_reference, quote_sheet_name, range_abs};
use crate::validation::{validate_defined_name, MAX_COLS, MAX_ROWS};
use crate::worksheet::Worksheet;
use std::cmp::Ordering;

/// Scope value of a workbook-global name.
pub const GLOBAL_SCOPE: i32 = -1;

const RESERVED_PREFIX: &str = "_xlnm.";
const FILTER_DATABASE: &str = "_xlnm._FilterDatabase";
const PRINT_AREA: &str = "_xlnm.Print_Area";
const PRINT_TITLES: &str = "_xlnm.Print_Titles";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DefinedName {
    pub name: String,
    /// Sheet ordinal, or [`GLOBAL_SCOPE`].
    pub scope: i32,
    pub range: String,
    pub hidden: bool,
}

impl DefinedName {
    fn new(name: &str, scope: i32, range: String, hidden: bool) -> Self {
        Self { name: name.to_string(), scope, range, hidden }
    }

    pub fn is_global(&self) -> bool {
        self.scope == GLOBAL_SCOPE
    }
}

fn normalized_name(name: &str) -> String {
    name.strip_prefix(RESERVED_PREFIX).unwrap_or(name).to_lowercase()
}

fn normalized_scope_name(range: &str) -> String {
    range.strip_prefix('\'').unwrap_or(range).to_lowercase()
}

fn compare(a: &DefinedName, b: &DefinedName) -> Ordering {
    normalized_name(&a.name)
        .cmp(&normalized_name(&b.name))
        .then_with(|| normalized_scope_name(&a.range).cmp(&normalized_scope_name(&b.range)))
}

/// Excel assigns internal ids to same-scope names in this order, so any
/// other order produces a workbook that references the wrong ranges.
pub fn sort_defined_names(names: &mut [DefinedName]) {
    names.sort_by(compare);
}

#[derive(Debug, Clone, Default)]
pub struct DefinedNameRegistry {
    user_names: Vec<DefinedName>,
    names: Vec<DefinedName>,
    named_ranges: Vec<String>,
}

impl DefinedNameRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a user name. `Sheet1!Name` makes it local to that sheet.
    pub fn define(&mut self, name: &str, range: &str, sheets: &[Worksheet]) -> Result<(), XlsxError> {
        let range = range.strip_prefix('=').unwrap_or(range);

        let (name, scope) = match name.rsplit_once('!') {
            Some((sheet_name, local_name)) => {
                let unquoted = sheet_name
                    .strip_prefix('\'')
                    .and_then(|s| s.strip_suffix('\''))
                    .map(|s| s.replace("''", "'"))
                    .unwrap_or_else(|| sheet_name.to_string());

                let Some(index) = sheets.iter().position(|sheet| sheet.name() == unquoted) else {
                    return Err(XlsxError::Reference(format!(
                        "Unknown sheet name '{}' in defined name '{}'",
                        unquoted, name
                    )));
                };
                (local_name, index as i32)
            }
            None => (name, GLOBAL_SCOPE),
        };

        validate_defined_name(name)?;

        let lower = name.to_lowercase();
        if self
            .user_names
            .iter()
            .any(|existing| existing.scope == scope && existing.name.to_lowercase() == lower)
        {
            return Err(XlsxError::Validation(format!(
                "Defined name '{}' is already defined in this scope",
                name
            )));
        }

        self.user_names.push(DefinedName::new(name, scope, range.to_string(), false));
        Ok(())
    }

    /// Rebuild the full name list from user names and sheet settings.
    pub fn collect(&mut self, sheets: &[Worksheet]) {
        self.names = self.user_names.clone();

        for (index, sheet) in sheets.iter().enumerate() {
            let scope = index as i32;
            let quoted = quote_sheet_name(sheet.name());

            if let Some(filter) = sheet.autofilter() {
                let range = range_abs(filter.first_row, filter.first_col, filter.last_row, filter.last_col);
                self.names
                    .push(DefinedName::new(FILTER_DATABASE, scope, format!("{}!{}", quoted, range), true));
            }

            if let Some(area) = sheet.print_area() {
                let range = area_reference(area.first_row, area.first_col, area.last_row, area.last_col);
                self.names
                    .push(DefinedName::new(PRINT_AREA, scope, format!("{}!{}", quoted, range), false));
            }

            let cols = sheet.repeat_cols().map(|(first, last)| {
                format!("{}!{}", quoted, area_reference(0, first, MAX_ROWS - 1, last))
            });
            let rows = sheet.repeat_rows().map(|(first, last)| {
                format!("{}!{}", quoted, area_reference(first, 0, last, MAX_COLS - 1))
            });
            let titles = match (cols, rows) {
                (Some(cols), Some(rows)) => Some(format!("{},{}", cols, rows)),
                (cols, rows) => cols.or(rows),
            };
            if let Some(range) = titles {
                self.names.push(DefinedName::new(PRINT_TITLES, scope, range, false));
            }
        }

        tracing::debug!(
            user = self.user_names.len(),
            total = self.names.len(),
            "collected defined names"
        );
    }

    pub fn sort(&mut self) {
        sort_defined_names(&mut self.names);
    }

    /// Names listed in `docProps/app.xml`. The filter database is skipped;
    /// reserved and sheet-local names are qualified by their sheet.
    pub fn derive_named_ranges(&mut self) -> &[String] {
        self.named_ranges = self
            .names
            .iter()
            .filter(|defined| defined.name != FILTER_DATABASE)
            .filter_map(|defined| {
                let (sheet_name, _) = defined.range.split_once('!')?;
                if sheet_name.is_empty() {
                    return None;
                }

                if let Some(suffix) = defined.name.strip_prefix(RESERVED_PREFIX) {
                    Some(format!("{}!{}", sheet_name, suffix))
                } else if !defined.is_global() {
                    Some(format!("{}!{}", sheet_name, defined.name))
                } else {
                    Some(defined.name.clone())
                }
            })
            .collect();
        &self.named_ranges
    }

    pub fn names(&self) -> &[DefinedName] {
        &self.names
    }

    pub fn named_ranges(&self) -> &[String] {
        &self.named_ranges
    }

    pub fn user_names(&self) -> &[DefinedName] {
        &self.user_names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::CellRange;
    use crate::worksheet::{SheetKind, SheetWriter};
    use crate::{FormatTable, SharedStringTable};
    use pretty_assertions::assert_eq;

    fn sheets(names: &[&str]) -> Vec<Worksheet> {
        names
            .iter()
            .map(|name| Worksheet::new(name.to_string(), SheetKind::Worksheet))
            .collect()
    }

    fn name(name: &str, scope: i32, range: &str) -> DefinedName {
        DefinedName::new(name, scope, range.to_string(), false)
    }

    #[test]
    fn test_sort_is_case_insensitive() {
        let mut names = vec![name("Zebra", -1, "Sheet1!$A$1"), name("apple", -1, "Sheet1!$A$1")];
        sort_defined_names(&mut names);
        let sorted: Vec<_> = names.iter().map(|n| n.name.as_str()).collect();
        assert_eq!(sorted, vec!["apple", "Zebra"]);
    }

    #[test]
    fn test_sort_ignores_reserved_prefix_and_quote() {
        let mut names = vec![
            name("_xlnm.Print_Area", 1, "'Sheet 2'!$A$1:$B$2"),
            name("Print_Area", -1, "Sheet1!$A$1"),
            name("_xlnm.Print_Area", 0, "Data!$A$1:$B$2"),
            name("Alpha", -1, "Sheet1!$A$1"),
        ];
        sort_defined_names(&mut names);
        let order: Vec<_> = names.iter().map(|n| (n.name.as_str(), n.scope)).collect();
        assert_eq!(
            order,
            vec![("Alpha", -1), ("_xlnm.Print_Area", 0), ("_xlnm.Print_Area", 1), ("Print_Area", -1)]
        );
    }

    #[test]
    fn test_define_local_and_global() {
        let sheets = sheets(&["Sheet1", "My Data"]);
        let mut registry = DefinedNameRegistry::new();

        registry.define("Sales", "=Sheet1!$A$1:$A$10", &sheets).expect("global");
        registry.define("'My Data'!Rate", "='My Data'!$B$1", &sheets).expect("local");
        assert!(registry.define("Sheet1!sales", "=Sheet1!$B$1", &sheets).is_ok());

        assert_eq!(registry.user_names()[0], name("Sales", -1, "Sheet1!$A$1:$A$10"));
        assert_eq!(registry.user_names()[1], name("Rate", 1, "'My Data'!$B$1"));

        assert!(matches!(
            registry.define("Nope!Rate", "=Sheet1!$A$1", &sheets),
            Err(XlsxError::Reference(_))
        ));
        assert!(matches!(
            registry.define("SALES", "=Sheet1!$A$1", &sheets),
            Err(XlsxError::Validation(_))
        ));
        assert!(matches!(
            registry.define("A1", "=Sheet1!$A$1", &sheets),
            Err(XlsxError::Validation(_))
        ));
    }

    #[test]
    fn test_collect_structural_names() {
        let mut sheets = sheets(&["Sheet1", "Q1 Report"]);
        let mut strings = SharedStringTable::new();
        let mut formats = FormatTable::new();
        {
            let mut writer = SheetWriter { sheet: &mut sheets[1], strings: &mut strings, formats: &mut formats };
            writer.autofilter(CellRange::new(0, 0, 50, 3)).expect("filter");
            writer.set_print_area(CellRange::new(0, 0, 20, 5)).expect("area");
            writer.repeat_rows(0, 0).expect("rows");
            writer.repeat_columns(0, 1).expect("cols");
        }

        let mut registry = DefinedNameRegistry::new();
        registry.define("Total", "=Sheet1!$B$10", &sheets).expect("name");
        registry.collect(&sheets);
        registry.sort();

        assert_eq!(
            registry.names(),
            &[
                DefinedName::new("_xlnm._FilterDatabase", 1, "'Q1 Report'!$A$1:$D$51".to_string(), true),
                name("_xlnm.Print_Area", 1, "'Q1 Report'!$A$1:$F$21"),
                name("_xlnm.Print_Titles", 1, "'Q1 Report'!$A:$B,'Q1 Report'!$1:$1"),
                name("Total", -1, "Sheet1!$B$10"),
            ]
        );

        assert_eq!(
            registry.derive_named_ranges(),
            &[
                "'Q1 Report'!Print_Area".to_string(),
                "'Q1 Report'!Print_Titles".to_string(),
                "Total".to_string(),
            ]
        );
    }

    #[test]
    fn test_print_titles_rows_only() {
        let mut sheets = sheets(&["Sheet1"]);
        let mut strings = SharedStringTable::new();
        let mut formats = FormatTable::new();
        SheetWriter { sheet: &mut sheets[0], strings: &mut strings, formats: &mut formats }
            .repeat_rows(2, 0)
            .expect("rows");

        let mut registry = DefinedNameRegistry::new();
        registry.collect(&sheets);
        assert_eq!(registry.names(), &[name("_xlnm.Print_Titles", 0, "Sheet1!$1:$3")]);
    }

    #[test]
    fn test_local_user_name_is_qualified() {
        let sheets = sheets(&["Sheet1", "Sheet2"]);
        let mut registry = DefinedNameRegistry::new();
        registry.define("Sheet2!Rate", "=Sheet2!$A$1", &sheets).expect("local");
        registry.define("Const", "=0.5", &sheets).expect("constant");
        registry.collect(&sheets);
        registry.sort();

        // Names without a sheet reference are not listed.
        assert_eq!(registry.derive_named_ranges(), &["Sheet2!Rate".to_string()]);
    }
}
