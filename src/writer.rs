use crate::pipeline::{Assembled, Packager};
use crate::styles::generate_styles_xml;
use crate::types::XlsxError;
use crate::worksheet::{SheetKind, Worksheet};
use crate::xml;
use mtzip::{level::CompressionLevel, ZipArchive};
use rayon::prelude::*;
use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};

#[derive(Debug)]
enum Target {
    File(PathBuf),
    Memory(Option<Vec<u8>>),
}

/// Writes the workbook-level parts, the cell data of every sheet and the
/// media list into an `.xlsx` zip archive.
#[derive(Debug)]
pub struct ZipPackager {
    target: Target,
    num_threads: usize,
}

impl ZipPackager {
    /// Package to `path`. The file is replaced atomically.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { target: Target::File(path.into()), num_threads: 1 }
    }

    /// Package into memory; read the archive with [`Self::into_bytes`].
    pub fn in_memory() -> Self {
        Self { target: Target::Memory(None), num_threads: 1 }
    }

    /// Render sheet parts on `num_threads` threads.
    pub fn with_threads(mut self, num_threads: usize) -> Self {
        self.num_threads = num_threads.max(1);
        self
    }

    /// Archive bytes of an in-memory package, once written.
    pub fn into_bytes(self) -> Option<Vec<u8>> {
        match self.target {
            Target::Memory(bytes) => bytes,
            Target::File(_) => None,
        }
    }

    fn render_sheets(&self, sheets: &[Worksheet]) -> Result<Vec<Vec<u8>>, XlsxError> {
        let render = |sheet: &Worksheet| match sheet.kind() {
            SheetKind::Worksheet => xml::generate_worksheet_xml(sheet),
            SheetKind::Chartsheet => xml::generate_chartsheet_xml(sheet).into_bytes(),
        };

        if self.num_threads > 1 && sheets.len() > 1 {
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(self.num_threads)
                .build()
                .map_err(|e| XlsxError::Package(format!("Thread pool error: {}", e)))?;
            Ok(pool.install(|| sheets.par_iter().map(render).collect()))
        } else {
            Ok(sheets.iter().map(render).collect())
        }
    }
}

impl Packager for ZipPackager {
    fn package(&mut self, workbook: &Assembled<'_>) -> Result<(), XlsxError> {
        let part_names = xml::sheet_part_names(workbook.sheets());
        let sheet_parts = self.render_sheets(workbook.sheets())?;

        let mut zipper = ZipArchive::new();
        add_workbook_parts(&mut zipper, workbook, &part_names);

        for (part_name, data) in part_names.into_iter().zip(sheet_parts) {
            add_part(&mut zipper, data, part_name);
        }
        for entry in workbook.media() {
            add_part(&mut zipper, entry.data.clone(), entry.part_name());
        }
        if let Some(vba_project) = workbook.vba_project() {
            add_part(&mut zipper, vba_project.to_vec(), "xl/vbaProject.bin".to_string());
        }

        match &mut self.target {
            Target::File(path) => {
                write_file_atomic(path, |file| write_zip(&mut zipper, file))?;
                tracing::debug!(path = %path.display(), "wrote workbook");
            }
            Target::Memory(bytes) => {
                let mut cursor = Cursor::new(Vec::new());
                write_zip(&mut zipper, &mut cursor)?;
                *bytes = Some(cursor.into_inner());
            }
        }
        Ok(())
    }
}

fn add_part(zipper: &mut ZipArchive, data: Vec<u8>, name: String) {
    zipper
        .add_file_from_memory(data, name)
        .compression_level(CompressionLevel::fast())
        .done();
}

fn add_workbook_parts(zipper: &mut ZipArchive, workbook: &Assembled<'_>, part_names: &[String]) {
    let has_custom = !workbook.custom_properties().is_empty();

    add_part(
        zipper,
        xml::generate_content_types(workbook, part_names).into_bytes(),
        "[Content_Types].xml".to_string(),
    );
    add_part(zipper, xml::generate_rels(has_custom).into_bytes(), "_rels/.rels".to_string());

    let now = chrono::Utc::now().naive_utc();
    add_part(
        zipper,
        xml::generate_core_xml(workbook.properties(), now).into_bytes(),
        "docProps/core.xml".to_string(),
    );
    add_part(zipper, xml::generate_app_xml(workbook).into_bytes(), "docProps/app.xml".to_string());
    if has_custom {
        add_part(
            zipper,
            xml::generate_custom_xml(workbook.custom_properties()).into_bytes(),
            "docProps/custom.xml".to_string(),
        );
    }

    add_part(zipper, xml::generate_workbook(workbook).into_bytes(), "xl/workbook.xml".to_string());
    add_part(
        zipper,
        xml::generate_workbook_rels(workbook, part_names).into_bytes(),
        "xl/_rels/workbook.xml.rels".to_string(),
    );
    add_part(
        zipper,
        generate_styles_xml(workbook.styles(), workbook.palette()).into_bytes(),
        "xl/styles.xml".to_string(),
    );
    if !workbook.strings().is_empty() {
        add_part(
            zipper,
            xml::generate_shared_strings(workbook.strings()).into_bytes(),
            "xl/sharedStrings.xml".to_string(),
        );
    }
    if workbook.has_metadata() {
        add_part(zipper, xml::generate_metadata_xml().as_bytes().to_vec(), "xl/metadata.xml".to_string());
    }
}

fn write_zip<W: Write + std::io::Seek>(zipper: &mut ZipArchive, out: &mut W) -> Result<(), XlsxError> {
    zipper.write(out).map_err(|e| XlsxError::Package(e.to_string()))?;
    out.flush()?;
    Ok(())
}

/// Write through a sibling temp file, then rename over `path`.
fn write_file_atomic<F>(path: &Path, write: F) -> Result<(), XlsxError>
where
    F: FnOnce(&mut File) -> Result<(), XlsxError>,
{
    let file_name = path
        .file_name()
        .ok_or_else(|| XlsxError::Package(format!("Invalid output path '{}'", path.display())))?;
    let mut temp_name = std::ffi::OsString::from(".");
    temp_name.push(file_name);
    temp_name.push(".tmp");
    let temp_path = path.with_file_name(temp_name);

    let result = File::create(&temp_path).map_err(XlsxError::from).and_then(|mut file| {
        write(&mut file)?;
        file.sync_all()?;
        Ok(())
    });

    match result.and_then(|()| std::fs::rename(&temp_path, path).map_err(XlsxError::from)) {
        Ok(()) => Ok(()),
        Err(e) => {
            let _ = std::fs::remove_file(&temp_path);
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Workbook;

    fn zip_names(bytes: &[u8]) -> Vec<String> {
        // Central directory file headers carry the part names.
        let mut names = Vec::new();
        let mut pos = 0;
        while let Some(offset) = bytes[pos..].windows(4).position(|w| w == b"PK\x01\x02") {
            let start = pos + offset;
            let name_len = u16::from_le_bytes([bytes[start + 28], bytes[start + 29]]) as usize;
            let name = &bytes[start + 46..start + 46 + name_len];
            names.push(String::from_utf8_lossy(name).into_owned());
            pos = start + 46 + name_len;
        }
        names
    }

    #[test]
    fn test_in_memory_package_parts() {
        let mut workbook = Workbook::new();
        let sheet = workbook.add_worksheet().unwrap();
        workbook.worksheet(sheet).unwrap().write_string(0, 0, "hello", None).unwrap();
        workbook.add_chartsheet().unwrap();
        workbook.set_custom_property("Owner", "ops").unwrap();

        let mut packager = ZipPackager::in_memory().with_threads(2);
        workbook.finalize(&mut packager).unwrap();
        let bytes = packager.into_bytes().unwrap();

        assert!(bytes.starts_with(b"PK"));
        let mut names = zip_names(&bytes);
        names.sort();
        assert_eq!(
            names,
            vec![
                "[Content_Types].xml",
                "_rels/.rels",
                "docProps/app.xml",
                "docProps/core.xml",
                "docProps/custom.xml",
                "xl/_rels/workbook.xml.rels",
                "xl/chartsheets/sheet1.xml",
                "xl/sharedStrings.xml",
                "xl/styles.xml",
                "xl/workbook.xml",
                "xl/worksheets/sheet1.xml",
            ]
        );
    }

    #[test]
    fn test_atomic_write_replaces_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        std::fs::write(&path, b"old").unwrap();

        write_file_atomic(&path, |file| {
            file.write_all(b"new")?;
            Ok(())
        })
        .unwrap();

        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert!(!dir.path().join(".book.xlsx.tmp").exists());
    }

    #[test]
    fn test_failed_write_leaves_target() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("book.xlsx");
        std::fs::write(&path, b"old").unwrap();

        let result = write_file_atomic(&path, |_| Err(XlsxError::Package("boom".to_string())));
        assert!(result.is_err());
        assert_eq!(std::fs::read(&path).unwrap(), b"old");
        assert!(!dir.path().join(".book.xlsx.tmp").exists());
    }
}
