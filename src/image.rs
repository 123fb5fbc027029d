use crate::types::XlsxError;
use sha2::{Digest, Sha256};
use std::borrow::Cow;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

const DEFAULT_DPI: f64 = 96.0;

// PNG layout
const PNG_CHUNK_START: usize = 8;
const PNG_CHUNK_OVERHEAD: usize = 12;
const PNG_METERS_UNIT: u8 = 1;
const INCHES_PER_METER: f64 = 0.0254;

// JPEG markers
const JPEG_INITIAL_OFFSET: usize = 2;
const JPEG_SOF_MASK: u16 = 0xFFF0;
const JPEG_SOF_BASE: u16 = 0xFFC0;
const JPEG_MARKER_DHT: u16 = 0xFFC4;
const JPEG_MARKER_JPG: u16 = 0xFFC8;
const JPEG_MARKER_DAC: u16 = 0xFFCC;
const JPEG_MARKER_APP0: u16 = 0xFFE0;
const JPEG_MARKER_SOS: u16 = 0xFFDA;
const JPEG_UNIT_DPI: u8 = 1;
const JPEG_UNIT_DPCM: u8 = 2;
const CM_PER_INCH: f64 = 2.54;

// BMP header
const BMP_MIN_LEN: usize = 0x36;
const BMP_MAX_DIMENSION: u32 = 0xFFFF;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Png,
    Jpeg,
    Gif,
    Bmp,
}

impl ImageType {
    pub fn extension(&self) -> &'static str {
        match self {
            ImageType::Png => "png",
            ImageType::Jpeg => "jpeg",
            ImageType::Gif => "gif",
            ImageType::Bmp => "bmp",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            ImageType::Png => "image/png",
            ImageType::Jpeg => "image/jpeg",
            ImageType::Gif => "image/gif",
            ImageType::Bmp => "image/bmp",
        }
    }
}

/// Layout metadata read from an image header. A DPI of zero means the
/// header did not carry one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Geometry {
    pub image_type: ImageType,
    pub width: u32,
    pub height: u32,
    pub dpi_x: f64,
    pub dpi_y: f64,
}

fn truncated(kind: &str) -> XlsxError {
    XlsxError::Format(format!("{} image data is truncated", kind))
}

fn be_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

fn be_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

fn le_u16(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

fn le_u32(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

/// Identify an image by its magic bytes.
pub fn detect(data: &[u8]) -> Result<ImageType, XlsxError> {
    if data.get(1..4) == Some(b"PNG".as_slice()) {
        Ok(ImageType::Png)
    } else if be_u16(data, 0) == Some(0xFFD8) {
        Ok(ImageType::Jpeg)
    } else if data.starts_with(b"GIF8") {
        Ok(ImageType::Gif)
    } else if data.starts_with(b"BM") {
        Ok(ImageType::Bmp)
    } else {
        Err(XlsxError::Format(
            "Unsupported image format: expected PNG, JPEG, GIF or BMP".to_string(),
        ))
    }
}

pub fn parse_png(data: &[u8]) -> Result<Geometry, XlsxError> {
    let mut width = 0;
    let mut height = 0;
    let mut dpi_x = 0.0;
    let mut dpi_y = 0.0;

    let mut offset = PNG_CHUNK_START;
    while let (Some(length), Some(tag)) = (be_u32(data, offset), data.get(offset + 4..offset + 8)) {
        let payload = offset + 8;

        match tag {
            b"IHDR" => {
                width = be_u32(data, payload).ok_or_else(|| truncated("PNG"))?;
                height = be_u32(data, payload + 4).ok_or_else(|| truncated("PNG"))?;
            }
            b"pHYs" => {
                let x_ppu = be_u32(data, payload).ok_or_else(|| truncated("PNG"))?;
                let y_ppu = be_u32(data, payload + 4).ok_or_else(|| truncated("PNG"))?;
                let unit = *data.get(payload + 8).ok_or_else(|| truncated("PNG"))?;
                if unit == PNG_METERS_UNIT {
                    dpi_x = x_ppu as f64 * INCHES_PER_METER;
                    dpi_y = y_ppu as f64 * INCHES_PER_METER;
                }
            }
            b"IEND" => break,
            _ => {}
        }

        match offset.checked_add(length as usize + PNG_CHUNK_OVERHEAD) {
            Some(next) => offset = next,
            None => break,
        }
    }

    if height == 0 {
        return Err(XlsxError::Format("PNG image has no IHDR height".to_string()));
    }

    Ok(Geometry { image_type: ImageType::Png, width, height, dpi_x, dpi_y })
}

pub fn parse_jpeg(data: &[u8]) -> Result<Geometry, XlsxError> {
    let mut width = 0;
    let mut height = 0;
    let mut dpi_x = 0.0;
    let mut dpi_y = 0.0;

    let mut offset = JPEG_INITIAL_OFFSET;
    while let (Some(marker), Some(length)) = (be_u16(data, offset), be_u16(data, offset + 2)) {
        let is_sof = marker & JPEG_SOF_MASK == JPEG_SOF_BASE
            && marker != JPEG_MARKER_DHT
            && marker != JPEG_MARKER_JPG
            && marker != JPEG_MARKER_DAC;

        if is_sof {
            height = be_u16(data, offset + 5).ok_or_else(|| truncated("JPEG"))? as u32;
            width = be_u16(data, offset + 7).ok_or_else(|| truncated("JPEG"))? as u32;
        }

        if marker == JPEG_MARKER_APP0 {
            let units = *data.get(offset + 11).ok_or_else(|| truncated("JPEG"))?;
            let x_density = be_u16(data, offset + 12).ok_or_else(|| truncated("JPEG"))? as f64;
            let y_density = be_u16(data, offset + 14).ok_or_else(|| truncated("JPEG"))? as f64;

            match units {
                JPEG_UNIT_DPI => {
                    dpi_x = x_density;
                    dpi_y = y_density;
                }
                JPEG_UNIT_DPCM => {
                    dpi_x = x_density * CM_PER_INCH;
                    dpi_y = y_density * CM_PER_INCH;
                }
                _ => {}
            }
        }

        if marker == JPEG_MARKER_SOS {
            break;
        }

        offset += length as usize + 2;
    }

    if height == 0 {
        return Err(XlsxError::Format("JPEG image has no SOF height".to_string()));
    }

    Ok(Geometry { image_type: ImageType::Jpeg, width, height, dpi_x, dpi_y })
}

pub fn parse_gif(data: &[u8]) -> Result<Geometry, XlsxError> {
    let width = le_u16(data, 6).ok_or_else(|| truncated("GIF"))? as u32;
    let height = le_u16(data, 8).ok_or_else(|| truncated("GIF"))? as u32;

    Ok(Geometry { image_type: ImageType::Gif, width, height, dpi_x: 0.0, dpi_y: 0.0 })
}

pub fn parse_bmp(data: &[u8]) -> Result<Geometry, XlsxError> {
    if data.len() <= BMP_MIN_LEN {
        return Err(XlsxError::Format("BMP image doesn't contain enough data".to_string()));
    }

    let width = le_u32(data, 18).ok_or_else(|| truncated("BMP"))?;
    let height = le_u32(data, 22).ok_or_else(|| truncated("BMP"))?;
    if width > BMP_MAX_DIMENSION || height > BMP_MAX_DIMENSION {
        return Err(XlsxError::Format(format!(
            "BMP image dimensions {}x{} are larger than {}",
            width, height, BMP_MAX_DIMENSION
        )));
    }

    let planes = le_u16(data, 26).ok_or_else(|| truncated("BMP"))?;
    let bit_count = le_u16(data, 28).ok_or_else(|| truncated("BMP"))?;
    if bit_count != 24 {
        return Err(XlsxError::Format(format!(
            "BMP image isn't a 24bit true color bitmap (has {} bits)",
            bit_count
        )));
    }
    if planes != 1 {
        return Err(XlsxError::Format("BMP image doesn't contain 1 plane".to_string()));
    }

    let compression = le_u32(data, 30).ok_or_else(|| truncated("BMP"))?;
    if compression != 0 {
        return Err(XlsxError::Format("BMP image compression is not supported".to_string()));
    }

    Ok(Geometry { image_type: ImageType::Bmp, width, height, dpi_x: 0.0, dpi_y: 0.0 })
}

/// Sniff the type and read geometry, defaulting missing DPI to 96.
pub fn probe_bytes(data: &[u8]) -> Result<Geometry, XlsxError> {
    let mut geometry = match detect(data)? {
        ImageType::Png => parse_png(data)?,
        ImageType::Jpeg => parse_jpeg(data)?,
        ImageType::Gif => parse_gif(data)?,
        ImageType::Bmp => parse_bmp(data)?,
    };

    if geometry.dpi_x == 0.0 {
        geometry.dpi_x = DEFAULT_DPI;
    }
    if geometry.dpi_y == 0.0 {
        geometry.dpi_y = DEFAULT_DPI;
    }

    Ok(geometry)
}

/// Read an image file and describe it.
pub fn probe(path: impl AsRef<Path>) -> Result<ImageRecord, XlsxError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    ImageRecord::from_bytes(path.display().to_string(), &data)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ImageRecord {
    pub path: String,
    pub image_type: ImageType,
    pub width: u32,
    pub height: u32,
    pub dpi_x: f64,
    pub dpi_y: f64,
    pub content_hash: [u8; 32],
}

impl ImageRecord {
    pub fn from_bytes(path: impl Into<String>, data: &[u8]) -> Result<Self, XlsxError> {
        let geometry = probe_bytes(data)?;
        Ok(Self {
            path: path.into(),
            image_type: geometry.image_type,
            width: geometry.width,
            height: geometry.height,
            dpi_x: geometry.dpi_x,
            dpi_y: geometry.dpi_y,
            content_hash: Sha256::digest(data).into(),
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ImageSource {
    Path(PathBuf),
    Buffer { name: String, data: Vec<u8> },
}

/// An image as inserted by the user. The file is only read during assembly.
#[derive(Debug, Clone, PartialEq)]
pub struct Image {
    source: ImageSource,
    description: Option<String>,
    x_scale: f64,
    y_scale: f64,
}

impl Image {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_source(ImageSource::Path(path.into()))
    }

    pub fn new_from_buffer(name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        Self::with_source(ImageSource::Buffer { name: name.into(), data: data.into() })
    }

    fn with_source(source: ImageSource) -> Self {
        Self { source, description: None, x_scale: 1.0, y_scale: 1.0 }
    }

    pub fn set_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn set_scale(mut self, x_scale: f64, y_scale: f64) -> Self {
        self.x_scale = x_scale;
        self.y_scale = y_scale;
        self
    }

    pub fn source(&self) -> &ImageSource {
        &self.source
    }

    pub fn description(&self) -> Option<&str> {
        self.description.as_deref()
    }

    pub fn scale(&self) -> (f64, f64) {
        (self.x_scale, self.y_scale)
    }

    pub fn name(&self) -> String {
        match &self.source {
            ImageSource::Path(path) => path.display().to_string(),
            ImageSource::Buffer { name, .. } => name.clone(),
        }
    }

    fn data(&self) -> Result<Cow<'_, [u8]>, XlsxError> {
        match &self.source {
            ImageSource::Path(path) => Ok(Cow::Owned(std::fs::read(path)?)),
            ImageSource::Buffer { data, .. } => Ok(Cow::Borrowed(data)),
        }
    }
}

/// One unique image in the package (`xl/media/imageN.ext`).
#[derive(Debug, Clone, PartialEq)]
pub struct MediaEntry {
    pub id: u32,
    pub name: String,
    pub image_type: ImageType,
    pub data: Vec<u8>,
}

impl MediaEntry {
    pub fn part_name(&self) -> String {
        format!("xl/media/image{}.{}", self.id, self.image_type.extension())
    }
}

/// Workbook-wide image deduplication. Sheet images, header/footer images
/// and backgrounds share one id space keyed by content hash.
#[derive(Debug, Clone, Default)]
pub struct ImageCatalog {
    ids: HashMap<[u8; 32], u32>,
    media: Vec<MediaEntry>,
}

impl ImageCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reference id for `record`; the first sighting of a hash records the
    /// bytes for the media list.
    pub fn dedup(&mut self, record: &ImageRecord, data: &[u8]) -> u32 {
        if let Some(&id) = self.ids.get(&record.content_hash) {
            return id;
        }

        let id = self.media.len() as u32 + 1;
        self.ids.insert(record.content_hash, id);
        self.media.push(MediaEntry {
            id,
            name: record.path.clone(),
            image_type: record.image_type,
            data: data.to_vec(),
        });
        id
    }

    /// Probe an inserted image and return its reference id with its record.
    pub fn add(&mut self, image: &Image) -> Result<(u32, ImageRecord), XlsxError> {
        let data = image.data()?;
        let record = ImageRecord::from_bytes(image.name(), &data)?;
        let id = self.dedup(&record, &data);
        Ok((id, record))
    }

    pub fn media(&self) -> &[MediaEntry] {
        &self.media
    }

    pub fn len(&self) -> usize {
        self.media.len()
    }

    pub fn is_empty(&self) -> bool {
        self.media.is_empty()
    }

    pub fn clear(&mut self) {
        self.ids.clear();
        self.media.clear();
    }
}
