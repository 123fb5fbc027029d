//! Workbook assembly for `.xlsx` packages.
//!
//! A [`Workbook`] collects sheets, formats, shared strings, defined names,
//! images and charts. [`Workbook::finalize`] runs the assembly phases in a
//! fixed order (default sheet, activation, VML ids, defined names, drawings
//! and media, chart caches, table ids, metadata, styles) and hands the
//! resolved tree to a [`Packager`]. [`ZipPackager`] writes the archive.
//!
//! ```no_run
//! use jetxl_assembly::{Format, Workbook};
//!
//! # fn main() -> Result<(), jetxl_assembly::XlsxError> {
//! let mut workbook = Workbook::new();
//! let bold = workbook.add_format(Format::new().set_bold());
//! let sheet = workbook.add_worksheet()?;
//! workbook
//!     .worksheet(sheet)?
//!     .write_string(0, 0, "Region", Some(bold))?
//!     .write_number(1, 0, 42.0, None)?;
//! workbook.save("report.xlsx")?;
//! # Ok(())
//! # }
//! ```

pub mod chart;
pub mod defined_names;
pub mod image;
pub mod pipeline;
pub mod properties;
pub mod shared_strings;
pub mod styles;
pub mod types;
pub mod utility;
pub mod validation;
pub mod workbook;
pub mod worksheet;
pub mod writer;
pub mod xml;

pub use chart::{CachedValue, Chart, ChartContainer, ChartDataResolver, ChartSeries, ChartType, LegendPosition};
pub use defined_names::{DefinedName, DefinedNameRegistry, GLOBAL_SCOPE};
pub use image::{Image, ImageCatalog, ImageRecord, ImageType, MediaEntry};
pub use pipeline::{Assembled, AssemblyPipeline, Packager};
pub use properties::{CustomProperty, CustomPropertyType, CustomValue, DocProperties};
pub use shared_strings::SharedStringTable;
pub use styles::{
    AlignmentStyle, BorderLineStyle, BorderSide, BorderStyle, FillStyle, FontScript, FontStyle, Format,
    FormatTable, HorizontalAlignment, PatternType, ResolvedStyles, Underline, VerticalAlignment,
};
pub use types::{Cell, CellRange, CellValue, ChartId, Color, FormatId, Result, SheetId, XlsxError};
pub use workbook::{Workbook, WorkbookOptions};
pub use worksheet::{
    Button, Comment, HeaderFooterPosition, ObjectPosition, PlacedImage, Shape, SheetAssembly, SheetKind,
    SheetWriter, Table, Worksheet,
};
pub use writer::ZipPackager;
