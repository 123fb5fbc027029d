use crate::pipeline::Assembled;
use crate::properties::{CustomProperty, CustomValue, DocProperties, PROPERTY_DATE_FORMAT};
use crate::shared_strings::SharedStringTable;
use crate::types::{Cell, CellValue};
use crate::utility::write_col_letter;
use crate::worksheet::{SheetKind, Worksheet};
use chrono::NaiveDateTime;

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n";
const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PACKAGE_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const VT_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/docPropsVTypes";
const CUSTOM_FMTID: &str = "{D5CDD505-2E9C-101B-9397-08002B2CF9AE}";
const DEFAULT_TAB_RATIO_XML: u32 = 600;

/// SIMD-accelerated XML escaping
#[inline(always)]
pub fn xml_escape_simd(input: &[u8], output: &mut Vec<u8>) {
    let needs_escape = memchr::memchr3(b'&', b'<', b'>', input).is_some()
        || memchr::memchr2(b'"', b'\'', input).is_some();

    if !needs_escape {
        output.extend_from_slice(input);
        return;
    }

    let mut last = 0;
    for (pos, &byte) in input.iter().enumerate() {
        let escape: &[u8] = match byte {
            b'&' => b"&amp;",
            b'<' => b"&lt;",
            b'>' => b"&gt;",
            b'"' => b"&quot;",
            b'\'' => b"&apos;",
            _ => continue,
        };
        output.extend_from_slice(&input[last..pos]);
        output.extend_from_slice(escape);
        last = pos + 1;
    }
    output.extend_from_slice(&input[last..]);
}

/// Escaped copy of `input` for text content and attribute values.
pub fn escape_str(input: &str) -> String {
    let mut output = Vec::with_capacity(input.len() + 8);
    xml_escape_simd(input.as_bytes(), &mut output);
    // Only ASCII bytes are replaced, so UTF-8 boundaries are preserved.
    String::from_utf8(output).unwrap_or_else(|e| String::from_utf8_lossy(e.as_bytes()).into_owned())
}

/// Package path of every sheet part, in workbook order. Worksheets and
/// chartsheets are numbered separately.
pub fn sheet_part_names(sheets: &[Worksheet]) -> Vec<String> {
    let mut worksheets = 0;
    let mut chartsheets = 0;
    sheets
        .iter()
        .map(|sheet| match sheet.kind() {
            SheetKind::Worksheet => {
                worksheets += 1;
                format!("xl/worksheets/sheet{}.xml", worksheets)
            }
            SheetKind::Chartsheet => {
                chartsheets += 1;
                format!("xl/chartsheets/sheet{}.xml", chartsheets)
            }
        })
        .collect()
}

pub fn generate_content_types(workbook: &Assembled<'_>, part_names: &[String]) -> String {
    let mut xml = String::with_capacity(1200 + part_names.len() * 150);
    xml.push_str(XML_DECLARATION);
    xml.push_str(
        "<Types xmlns=\"http://schemas.openxmlformats.org/package/2006/content-types\">\
<Default Extension=\"rels\" ContentType=\"application/vnd.openxmlformats-package.relationships+xml\"/>\
<Default Extension=\"xml\" ContentType=\"application/xml\"/>",
    );

    let mut extensions: Vec<(&str, &str)> = Vec::new();
    for entry in workbook.media() {
        let extension = entry.image_type.extension();
        if !extensions.iter().any(|(ext, _)| *ext == extension) {
            extensions.push((extension, entry.image_type.content_type()));
        }
    }
    for (extension, content_type) in extensions {
        xml.push_str(&format!(
            "<Default Extension=\"{}\" ContentType=\"{}\"/>",
            extension, content_type
        ));
    }
    if workbook.vba_project().is_some() {
        xml.push_str("<Default Extension=\"bin\" ContentType=\"application/vnd.ms-office.vbaProject\"/>");
    }

    xml.push_str(
        "<Override PartName=\"/docProps/app.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.extended-properties+xml\"/>\
<Override PartName=\"/docProps/core.xml\" ContentType=\"application/vnd.openxmlformats-package.core-properties+xml\"/>",
    );
    if !workbook.custom_properties().is_empty() {
        xml.push_str("<Override PartName=\"/docProps/custom.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.custom-properties+xml\"/>");
    }

    if workbook.vba_project().is_some() {
        xml.push_str("<Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.ms-excel.sheet.macroEnabled.main+xml\"/>");
    } else {
        xml.push_str("<Override PartName=\"/xl/workbook.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml\"/>");
    }

    for (sheet, part_name) in workbook.sheets().iter().zip(part_names) {
        let content_type = match sheet.kind() {
            SheetKind::Worksheet => "worksheet",
            SheetKind::Chartsheet => "chartsheet",
        };
        xml.push_str(&format!(
            "<Override PartName=\"/{}\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.{}+xml\"/>",
            part_name, content_type
        ));
    }

    xml.push_str("<Override PartName=\"/xl/styles.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.styles+xml\"/>");
    if !workbook.strings().is_empty() {
        xml.push_str("<Override PartName=\"/xl/sharedStrings.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sharedStrings+xml\"/>");
    }
    if workbook.has_metadata() {
        xml.push_str("<Override PartName=\"/xl/metadata.xml\" ContentType=\"application/vnd.openxmlformats-officedocument.spreadsheetml.sheetMetadata+xml\"/>");
    }

    xml.push_str("</Types>");
    xml
}

pub fn generate_rels(has_custom_properties: bool) -> String {
    let mut xml = String::with_capacity(700);
    xml.push_str(XML_DECLARATION);
    xml.push_str(&format!("<Relationships xmlns=\"{}\">", PACKAGE_REL_NS));
    xml.push_str(
        "<Relationship Id=\"rId1\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument\" Target=\"xl/workbook.xml\"/>\
<Relationship Id=\"rId2\" Type=\"http://schemas.openxmlformats.org/package/2006/relationships/metadata/core-properties\" Target=\"docProps/core.xml\"/>\
<Relationship Id=\"rId3\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/extended-properties\" Target=\"docProps/app.xml\"/>",
    );
    if has_custom_properties {
        xml.push_str("<Relationship Id=\"rId4\" Type=\"http://schemas.openxmlformats.org/officeDocument/2006/relationships/custom-properties\" Target=\"docProps/custom.xml\"/>");
    }
    xml.push_str("</Relationships>");
    xml
}

pub fn generate_app_xml(workbook: &Assembled<'_>) -> String {
    let worksheets: Vec<&str> = workbook.worksheets().map(Worksheet::name).collect();
    let chartsheets: Vec<&str> = workbook.chartsheets().map(Worksheet::name).collect();
    let named_ranges = workbook.named_ranges();

    let mut heading_pairs = Vec::new();
    if !worksheets.is_empty() {
        heading_pairs.push(("Worksheets", worksheets.len()));
    }
    if !chartsheets.is_empty() {
        heading_pairs.push(("Charts", chartsheets.len()));
    }
    if !named_ranges.is_empty() {
        heading_pairs.push(("Named Ranges", named_ranges.len()));
    }

    let mut xml = String::with_capacity(1000 + (worksheets.len() + named_ranges.len()) * 40);
    xml.push_str(XML_DECLARATION);
    xml.push_str(&format!(
        "<Properties xmlns=\"http://schemas.openxmlformats.org/officeDocument/2006/extended-properties\" xmlns:vt=\"{}\">",
        VT_NS
    ));
    xml.push_str("<Application>Microsoft Excel</Application><DocSecurity>0</DocSecurity><ScaleCrop>false</ScaleCrop>");

    xml.push_str(&format!(
        "<HeadingPairs><vt:vector size=\"{}\" baseType=\"variant\">",
        heading_pairs.len() * 2
    ));
    for (heading, count) in &heading_pairs {
        xml.push_str(&format!(
            "<vt:variant><vt:lpstr>{}</vt:lpstr></vt:variant><vt:variant><vt:i4>{}</vt:i4></vt:variant>",
            heading, count
        ));
    }
    xml.push_str("</vt:vector></HeadingPairs>");

    let titles = worksheets
        .iter()
        .chain(&chartsheets)
        .copied()
        .chain(named_ranges.iter().map(String::as_str));
    let title_count = worksheets.len() + chartsheets.len() + named_ranges.len();
    xml.push_str(&format!(
        "<TitlesOfParts><vt:vector size=\"{}\" baseType=\"lpstr\">",
        title_count
    ));
    for title in titles {
        xml.push_str("<vt:lpstr>");
        xml.push_str(&escape_str(title));
        xml.push_str("</vt:lpstr>");
    }
    xml.push_str("</vt:vector></TitlesOfParts>");

    let properties = workbook.properties();
    push_optional_element(&mut xml, "Manager", properties.manager.as_deref());
    xml.push_str("<Company>");
    xml.push_str(&escape_str(properties.company.as_deref().unwrap_or("")));
    xml.push_str("</Company>");
    xml.push_str("<LinksUpToDate>false</LinksUpToDate><SharedDoc>false</SharedDoc>");
    push_optional_element(&mut xml, "HyperlinkBase", properties.hyperlink_base.as_deref());
    xml.push_str("<HyperlinksChanged>false</HyperlinksChanged><AppVersion>16.0300</AppVersion></Properties>");
    xml
}

/// `now` is used for any timestamp the properties leave unset.
pub fn generate_core_xml(properties: &DocProperties, now: NaiveDateTime) -> String {
    let created = properties.created.unwrap_or(now).format(PROPERTY_DATE_FORMAT).to_string();
    let author = properties.author.as_deref().unwrap_or("");

    let mut xml = String::with_capacity(900);
    xml.push_str(XML_DECLARATION);
    xml.push_str(
        "<cp:coreProperties xmlns:cp=\"http://schemas.openxmlformats.org/package/2006/metadata/core-properties\" \
xmlns:dc=\"http://purl.org/dc/elements/1.1/\" \
xmlns:dcterms=\"http://purl.org/dc/terms/\" \
xmlns:dcmitype=\"http://purl.org/dc/dcmitype/\" \
xmlns:xsi=\"http://www.w3.org/2001/XMLSchema-instance\">",
    );
    push_optional_element(&mut xml, "dc:title", properties.title.as_deref());
    push_optional_element(&mut xml, "dc:subject", properties.subject.as_deref());
    xml.push_str(&format!("<dc:creator>{}</dc:creator>", escape_str(author)));
    push_optional_element(&mut xml, "cp:keywords", properties.keywords.as_deref());
    push_optional_element(&mut xml, "dc:description", properties.comments.as_deref());
    xml.push_str(&format!("<cp:lastModifiedBy>{}</cp:lastModifiedBy>", escape_str(author)));
    xml.push_str(&format!(
        "<dcterms:created xsi:type=\"dcterms:W3CDTF\">{}</dcterms:created>\
<dcterms:modified xsi:type=\"dcterms:W3CDTF\">{}</dcterms:modified>",
        created, created
    ));
    push_optional_element(&mut xml, "cp:category", properties.category.as_deref());
    push_optional_element(&mut xml, "cp:contentStatus", properties.status.as_deref());
    xml.push_str("</cp:coreProperties>");
    xml
}

pub fn generate_custom_xml(properties: &[CustomProperty]) -> String {
    let mut xml = String::with_capacity(300 + properties.len() * 160);
    xml.push_str(XML_DECLARATION);
    xml.push_str(&format!(
        "<Properties xmlns=\"http://schemas.openxmlformats.org/officeDocument/2006/custom-properties\" xmlns:vt=\"{}\">",
        VT_NS
    ));

    // Property ids 0 and 1 are reserved.
    for (pid, property) in (2..).zip(properties) {
        xml.push_str(&format!(
            "<property fmtid=\"{}\" pid=\"{}\" name=\"{}\">",
            CUSTOM_FMTID,
            pid,
            escape_str(&property.name)
        ));
        match &property.value {
            CustomValue::Text(text) => {
                xml.push_str(&format!("<vt:lpwstr>{}</vt:lpwstr>", escape_str(text)));
            }
            CustomValue::Number(number) => {
                xml.push_str(&format!("<vt:r8>{}</vt:r8>", ryu::Buffer::new().format(*number)));
            }
            CustomValue::NumberInt(number) => {
                xml.push_str(&format!("<vt:i4>{}</vt:i4>", itoa::Buffer::new().format(*number)));
            }
            CustomValue::Bool(value) => {
                xml.push_str(&format!("<vt:bool>{}</vt:bool>", value));
            }
            CustomValue::Date(date) => {
                xml.push_str(&format!(
                    "<vt:filetime>{}</vt:filetime>",
                    date.format(PROPERTY_DATE_FORMAT)
                ));
            }
        }
        xml.push_str("</property>");
    }

    xml.push_str("</Properties>");
    xml
}

pub fn generate_workbook(workbook: &Assembled<'_>) -> String {
    let sheets = workbook.sheets();
    let options = workbook.options();
    let mut xml = String::with_capacity(800 + sheets.len() * 80);
    xml.push_str(XML_DECLARATION);
    xml.push_str(&format!("<workbook xmlns=\"{}\" xmlns:r=\"{}\">", MAIN_NS, REL_NS));
    xml.push_str("<fileVersion appName=\"xl\" lastEdited=\"7\" lowestEdited=\"7\" rupBuild=\"22621\"/>");

    match workbook.vba_codename() {
        Some(codename) => xml.push_str(&format!(
            "<workbookPr codeName=\"{}\" defaultThemeVersion=\"166925\"/>",
            escape_str(codename)
        )),
        None => xml.push_str("<workbookPr defaultThemeVersion=\"166925\"/>"),
    }

    xml.push_str(&format!(
        "<bookViews><workbookView xWindow=\"240\" yWindow=\"15\" windowWidth=\"{}\" windowHeight=\"{}\"",
        options.window_width, options.window_height
    ));
    let tab_ratio = (options.tab_ratio * 10.0) as u32;
    if tab_ratio != DEFAULT_TAB_RATIO_XML {
        xml.push_str(&format!(" tabRatio=\"{}\"", tab_ratio));
    }
    if workbook.active_sheet() > 0 {
        xml.push_str(&format!(" activeTab=\"{}\"", workbook.active_sheet()));
    }
    xml.push_str("/></bookViews><sheets>");

    for (i, sheet) in sheets.iter().enumerate() {
        let id = i + 1;
        xml.push_str("<sheet name=\"");
        xml.push_str(&escape_str(sheet.name()));
        xml.push_str("\" sheetId=\"");
        xml.push_str(itoa::Buffer::new().format(id));
        if sheet.is_hidden() {
            xml.push_str("\" state=\"hidden");
        }
        xml.push_str("\" r:id=\"rId");
        xml.push_str(itoa::Buffer::new().format(id));
        xml.push_str("\"/>");
    }
    xml.push_str("</sheets>");

    let defined_names = workbook.defined_names();
    if !defined_names.is_empty() {
        xml.push_str("<definedNames>");
        for defined in defined_names {
            xml.push_str("<definedName name=\"");
            xml.push_str(&escape_str(&defined.name));
            xml.push('"');
            if !defined.is_global() {
                xml.push_str(&format!(" localSheetId=\"{}\"", defined.scope));
            }
            if defined.hidden {
                xml.push_str(" hidden=\"1\"");
            }
            xml.push('>');
            xml.push_str(&escape_str(&defined.range));
            xml.push_str("</definedName>");
        }
        xml.push_str("</definedNames>");
    }

    xml.push_str("<calcPr calcId=\"191029\"/></workbook>");
    xml
}

pub fn generate_workbook_rels(workbook: &Assembled<'_>, part_names: &[String]) -> String {
    let mut xml = String::with_capacity(600 + part_names.len() * 150);
    xml.push_str(XML_DECLARATION);
    xml.push_str(&format!("<Relationships xmlns=\"{}\">", PACKAGE_REL_NS));

    let mut next_id = 1;
    for (sheet, part_name) in workbook.sheets().iter().zip(part_names) {
        let kind = match sheet.kind() {
            SheetKind::Worksheet => "worksheet",
            SheetKind::Chartsheet => "chartsheet",
        };
        push_relationship(&mut xml, next_id, &format!("{}/{}", REL_NS, kind), part_name.trim_start_matches("xl/"));
        next_id += 1;
    }

    push_relationship(&mut xml, next_id, &format!("{}/styles", REL_NS), "styles.xml");
    next_id += 1;
    if !workbook.strings().is_empty() {
        push_relationship(&mut xml, next_id, &format!("{}/sharedStrings", REL_NS), "sharedStrings.xml");
        next_id += 1;
    }
    if workbook.vba_project().is_some() {
        push_relationship(
            &mut xml,
            next_id,
            "http://schemas.microsoft.com/office/2006/relationships/vbaProject",
            "vbaProject.bin",
        );
        next_id += 1;
    }
    if workbook.has_metadata() {
        push_relationship(&mut xml, next_id, &format!("{}/sheetMetadata", REL_NS), "metadata.xml");
    }

    xml.push_str("</Relationships>");
    xml
}

fn push_relationship(xml: &mut String, id: usize, rel_type: &str, target: &str) {
    xml.push_str(&format!(
        "<Relationship Id=\"rId{}\" Type=\"{}\" Target=\"{}\"/>",
        id, rel_type, target
    ));
}

fn push_optional_element(xml: &mut String, tag: &str, value: Option<&str>) {
    if let Some(value) = value {
        xml.push_str(&format!("<{}>{}</{}>", tag, escape_str(value), tag));
    }
}

pub fn generate_shared_strings(strings: &SharedStringTable) -> String {
    let mut xml = String::with_capacity(200 + strings.unique_count() as usize * 32);
    xml.push_str(XML_DECLARATION);
    xml.push_str(&format!(
        "<sst xmlns=\"{}\" count=\"{}\" uniqueCount=\"{}\">",
        MAIN_NS,
        strings.total_count(),
        strings.unique_count()
    ));

    for (text, rich) in strings.iter() {
        if rich {
            xml.push_str("<si>");
            xml.push_str(text);
            xml.push_str("</si>");
        } else if text.starts_with(char::is_whitespace) || text.ends_with(char::is_whitespace) {
            xml.push_str("<si><t xml:space=\"preserve\">");
            xml.push_str(&escape_str(text));
            xml.push_str("</t></si>");
        } else {
            xml.push_str("<si><t>");
            xml.push_str(&escape_str(text));
            xml.push_str("</t></si>");
        }
    }

    xml.push_str("</sst>");
    xml
}

pub fn generate_metadata_xml() -> &'static str {
    "<?xml version=\"1.0\" encoding=\"UTF-8\" standalone=\"yes\"?>\n\
<metadata xmlns=\"http://schemas.openxmlformats.org/spreadsheetml/2006/main\" \
xmlns:xda=\"http://schemas.microsoft.com/office/spreadsheetml/2017/dynamicarray\">\
<metadataTypes count=\"1\"><metadataType name=\"XLDAPR\" minSupportedVersion=\"120000\" copy=\"1\" \
pasteAll=\"1\" pasteValues=\"1\" merge=\"1\" splitFirst=\"1\" rowColShift=\"1\" clearFormats=\"1\" \
clearComments=\"1\" assign=\"1\" coerce=\"1\" cellMeta=\"1\"/></metadataTypes>\
<futureMetadata name=\"XLDAPR\" count=\"1\"><bk><extLst>\
<ext uri=\"{bdbb8cdc-fa1e-496e-a857-3c3f30c029c3}\"><xda:dynamicArrayProperties fDynamic=\"1\" fCollapsed=\"0\"/></ext>\
</extLst></bk></futureMetadata>\
<cellMetadata count=\"1\"><bk><rc t=\"1\" v=\"0\"/></bk></cellMetadata></metadata>"
}

/// Write cell reference (e.g. "A1", "B2") to buffer
#[inline(always)]
fn write_cell_ref(row: u32, col: u16, buf: &mut Vec<u8>) {
    let mut col_buf = [0u8; 4];
    let col_len = write_col_letter(col, &mut col_buf);
    buf.extend_from_slice(&col_buf[..col_len]);
    buf.extend_from_slice(itoa::Buffer::new().format(row + 1).as_bytes());
}

#[inline(always)]
fn write_number(n: f64, buf: &mut Vec<u8>) {
    if n.fract() == 0.0 && n.abs() < 9007199254740992.0 {
        buf.extend_from_slice(itoa::Buffer::new().format(n as i64).as_bytes());
    } else {
        buf.extend_from_slice(ryu::Buffer::new().format(n).as_bytes());
    }
}

fn write_cell(row: u32, col: u16, cell: &Cell, buf: &mut Vec<u8>) {
    buf.extend_from_slice(b"<c r=\"");
    write_cell_ref(row, col, buf);
    buf.push(b'"');
    if let Some(xf) = cell.xf_index.filter(|&xf| xf != 0) {
        buf.extend_from_slice(b" s=\"");
        buf.extend_from_slice(itoa::Buffer::new().format(xf).as_bytes());
        buf.push(b'"');
    }

    match &cell.value {
        CellValue::Blank => buf.extend_from_slice(b"/>"),
        CellValue::SharedString(index) => {
            buf.extend_from_slice(b" t=\"s\"><v>");
            buf.extend_from_slice(itoa::Buffer::new().format(*index).as_bytes());
            buf.extend_from_slice(b"</v></c>");
        }
        CellValue::Number(n) => {
            buf.extend_from_slice(b"><v>");
            write_number(*n, buf);
            buf.extend_from_slice(b"</v></c>");
        }
        CellValue::Bool(value) => {
            buf.extend_from_slice(b" t=\"b\"><v>");
            buf.push(if *value { b'1' } else { b'0' });
            buf.extend_from_slice(b"</v></c>");
        }
        CellValue::Formula { formula, cached_value } => {
            let cached = cached_value.as_deref().unwrap_or("0");
            let numeric = cached.parse::<f64>().is_ok();
            if !numeric {
                buf.extend_from_slice(b" t=\"str\"");
            }
            buf.extend_from_slice(b"><f>");
            xml_escape_simd(formula.as_bytes(), buf);
            buf.extend_from_slice(b"</f><v>");
            xml_escape_simd(cached.as_bytes(), buf);
            buf.extend_from_slice(b"</v></c>");
        }
    }
}

/// `A1:D5` bounding box of the populated cells.
fn dimension(sheet: &Worksheet) -> Vec<u8> {
    let mut cells = sheet.cells().map(|(&key, _)| key);
    let Some((first_row, first_col)) = cells.next() else {
        return b"A1".to_vec();
    };

    let (mut min_col, mut max_col, mut last_row) = (first_col, first_col, first_row);
    for (row, col) in cells {
        min_col = min_col.min(col);
        max_col = max_col.max(col);
        last_row = row;
    }

    let mut buf = Vec::with_capacity(16);
    write_cell_ref(first_row, min_col, &mut buf);
    if (first_row, min_col) != (last_row, max_col) {
        buf.push(b':');
        write_cell_ref(last_row, max_col, &mut buf);
    }
    buf
}

pub fn generate_worksheet_xml(sheet: &Worksheet) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1000 + sheet.cells().count() * 32);
    buf.extend_from_slice(XML_DECLARATION.as_bytes());
    buf.extend_from_slice(format!("<worksheet xmlns=\"{}\" xmlns:r=\"{}\">", MAIN_NS, REL_NS).as_bytes());

    if let Some(codename) = sheet.vba_codename() {
        buf.extend_from_slice(b"<sheetPr codeName=\"");
        xml_escape_simd(codename.as_bytes(), &mut buf);
        buf.extend_from_slice(b"\"/>");
    }

    buf.extend_from_slice(b"<dimension ref=\"");
    buf.extend_from_slice(&dimension(sheet));
    buf.extend_from_slice(b"\"/>");

    if sheet.is_selected() {
        buf.extend_from_slice(b"<sheetViews><sheetView tabSelected=\"1\" workbookViewId=\"0\"/></sheetViews>");
    } else {
        buf.extend_from_slice(b"<sheetViews><sheetView workbookViewId=\"0\"/></sheetViews>");
    }
    buf.extend_from_slice(b"<sheetFormatPr defaultRowHeight=\"15\"/>");

    let mut cells = sheet.cells().peekable();
    if cells.peek().is_none() {
        buf.extend_from_slice(b"<sheetData/>");
    } else {
        buf.extend_from_slice(b"<sheetData>");
        let mut current_row = None;
        for (&(row, col), cell) in cells {
            if current_row != Some(row) {
                if current_row.is_some() {
                    buf.extend_from_slice(b"</row>");
                }
                buf.extend_from_slice(b"<row r=\"");
                buf.extend_from_slice(itoa::Buffer::new().format(row + 1).as_bytes());
                buf.extend_from_slice(b"\">");
                current_row = Some(row);
            }
            write_cell(row, col, cell, &mut buf);
        }
        buf.extend_from_slice(b"</row></sheetData>");
    }

    if let Some(filter) = sheet.autofilter() {
        buf.extend_from_slice(b"<autoFilter ref=\"");
        write_cell_ref(filter.first_row, filter.first_col, &mut buf);
        buf.push(b':');
        write_cell_ref(filter.last_row, filter.last_col, &mut buf);
        buf.extend_from_slice(b"\"/>");
    }

    buf.extend_from_slice(
        b"<pageMargins left=\"0.7\" right=\"0.7\" top=\"0.75\" bottom=\"0.75\" header=\"0.3\" footer=\"0.3\"/></worksheet>",
    );
    buf
}

/// Chartsheet body without its drawing; the chart drawing part and its
/// relationship are written by the chart serializer.
pub fn generate_chartsheet_xml(sheet: &Worksheet) -> String {
    let mut xml = String::with_capacity(600);
    xml.push_str(XML_DECLARATION);
    xml.push_str(&format!("<chartsheet xmlns=\"{}\" xmlns:r=\"{}\">", MAIN_NS, REL_NS));
    match sheet.vba_codename() {
        Some(codename) => xml.push_str(&format!("<sheetPr codeName=\"{}\"/>", escape_str(codename))),
        None => xml.push_str("<sheetPr/>"),
    }
    if sheet.is_selected() {
        xml.push_str("<sheetViews><sheetView tabSelected=\"1\" zoomScale=\"100\" workbookViewId=\"0\"/></sheetViews>");
    } else {
        xml.push_str("<sheetViews><sheetView zoomScale=\"100\" workbookViewId=\"0\"/></sheetViews>");
    }
    xml.push_str("<pageMargins left=\"0.7\" right=\"0.7\" top=\"0.75\" bottom=\"0.75\" header=\"0.3\" footer=\"0.3\"/></chartsheet>");
    xml
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::properties::CustomPropertyType;
    use crate::worksheet::SheetWriter;
    use crate::{FormatTable, Format};
    use chrono::NaiveDate;

    #[test]
    fn test_escape() {
        assert_eq!(escape_str("plain"), "plain");
        assert_eq!(escape_str("a<b & \"c\" 'd'>"), "a&lt;b &amp; &quot;c&quot; &apos;d&apos;&gt;");
        assert_eq!(escape_str("naïve & co"), "naïve &amp; co");
    }

    #[test]
    fn test_shared_strings_xml() {
        let mut sst = SharedStringTable::new();
        sst.intern("a & b");
        sst.intern(" padded");
        sst.intern("a & b");
        sst.intern_rich("<r><t>rich</t></r>");

        let xml = generate_shared_strings(&sst);
        assert!(xml.contains("count=\"4\" uniqueCount=\"3\""));
        assert!(xml.contains("<si><t>a &amp; b</t></si>"));
        assert!(xml.contains("<si><t xml:space=\"preserve\"> padded</t></si>"));
        assert!(xml.contains("<si><r><t>rich</t></r></si>"));
    }

    #[test]
    fn test_run_shaped_plain_text_is_escaped() {
        let mut sheet = Worksheet::new("Data".to_string(), SheetKind::Worksheet);
        let mut strings = SharedStringTable::new();
        let mut formats = FormatTable::new();
        SheetWriter { sheet: &mut sheet, strings: &mut strings, formats: &mut formats }
            .write_string(0, 0, "<r>a & b</r>", None)
            .unwrap();

        let xml = generate_shared_strings(&strings);
        assert!(xml.contains("<si><t>&lt;r&gt;a &amp; b&lt;/r&gt;</t></si>"));
        assert!(!xml.contains("<si><r>"));
    }

    #[test]
    fn test_worksheet_xml_cells() {
        let mut sheet = Worksheet::new("Data".to_string(), SheetKind::Worksheet);
        let mut strings = SharedStringTable::new();
        let mut formats = FormatTable::new();
        let bold = formats.register(Format::new().set_bold());
        {
            let mut writer = SheetWriter { sheet: &mut sheet, strings: &mut strings, formats: &mut formats };
            writer.write_string(0, 0, "Name", Some(bold)).unwrap();
            writer.write_number(0, 1, 42.0, None).unwrap();
            writer.write_number(1, 1, 2.5, None).unwrap();
            writer.write_boolean(1, 2, true, None).unwrap();
            writer.write_formula(2, 1, "=SUM(B1:B2)", None).unwrap();
            writer.write_formula_with_result(2, 2, "=A1", Some("Name"), None).unwrap();
            writer.select();
        }

        let xml = String::from_utf8(generate_worksheet_xml(&sheet)).unwrap();
        assert!(xml.contains("<dimension ref=\"A1:C3\"/>"));
        assert!(xml.contains("<sheetView tabSelected=\"1\" workbookViewId=\"0\"/>"));
        assert!(xml.contains("<row r=\"1\"><c r=\"A1\" s=\"1\" t=\"s\"><v>0</v></c><c r=\"B1\"><v>42</v></c></row>"));
        assert!(xml.contains("<c r=\"B2\"><v>2.5</v></c><c r=\"C2\" t=\"b\"><v>1</v></c>"));
        assert!(xml.contains("<c r=\"B3\"><f>SUM(B1:B2)</f><v>0</v></c>"));
        assert!(xml.contains("<c r=\"C3\" t=\"str\"><f>A1</f><v>Name</v></c>"));
    }

    #[test]
    fn test_empty_worksheet_xml() {
        let sheet = Worksheet::new("Empty".to_string(), SheetKind::Worksheet);
        let xml = String::from_utf8(generate_worksheet_xml(&sheet)).unwrap();
        assert!(xml.contains("<dimension ref=\"A1\"/>"));
        assert!(xml.contains("<sheetData/>"));
        assert!(!xml.contains("tabSelected"));
    }

    #[test]
    fn test_core_xml_uses_created_date() {
        let mut properties = DocProperties::default();
        properties.set("title", "Budget & Plan").unwrap();
        properties.set("author", "Sam").unwrap();
        properties.set("created", "2023-05-06T07:08:09Z").unwrap();
        let now = NaiveDate::from_ymd_opt(2030, 1, 1).and_then(|d| d.and_hms_opt(0, 0, 0)).unwrap();

        let xml = generate_core_xml(&properties, now);
        assert!(xml.contains("<dc:title>Budget &amp; Plan</dc:title>"));
        assert!(xml.contains("<dc:creator>Sam</dc:creator>"));
        assert!(xml.contains(">2023-05-06T07:08:09Z</dcterms:created>"));
        assert!(!xml.contains("cp:category"));
    }

    #[test]
    fn test_custom_xml_types() {
        let properties = vec![
            CustomProperty::new("Checked by", "Eve", None).unwrap(),
            CustomProperty::new("Document number", "12345", None).unwrap(),
            CustomProperty::new("Reference", "1.005", None).unwrap(),
            CustomProperty::new("Has review", "true", None).unwrap(),
            CustomProperty::new("Signed", "2016-12-12T23:00:00Z", Some(CustomPropertyType::Date)).unwrap(),
        ];
        let xml = generate_custom_xml(&properties);
        assert!(xml.contains("pid=\"2\" name=\"Checked by\"><vt:lpwstr>Eve</vt:lpwstr>"));
        assert!(xml.contains("pid=\"3\" name=\"Document number\"><vt:i4>12345</vt:i4>"));
        assert!(xml.contains("<vt:r8>1.005</vt:r8>"));
        assert!(xml.contains("<vt:bool>true</vt:bool>"));
        assert!(xml.contains("<vt:filetime>2016-12-12T23:00:00Z</vt:filetime>"));
    }

    #[test]
    fn test_sheet_part_names() {
        let sheets = vec![
            Worksheet::new("A".to_string(), SheetKind::Worksheet),
            Worksheet::new("C".to_string(), SheetKind::Chartsheet),
            Worksheet::new("B".to_string(), SheetKind::Worksheet),
        ];
        assert_eq!(
            sheet_part_names(&sheets),
            vec!["xl/worksheets/sheet1.xml", "xl/chartsheets/sheet1.xml", "xl/worksheets/sheet2.xml"]
        );
    }
}
