//! Minimal PDF writer for session exports.
//!
//! One A4 portrait page per image. Each image is scaled to fit inside a
//! 20pt margin, never enlarged, centred, and embedded as a `DCTDecode`
//! XObject. PNG input is re-encoded to JPEG first.
//!
//! Object numbers: 1 catalog, 2 page tree, then for image `i` the page at
//! `3 + 3i`, its content stream at `4 + 3i` and its image at `5 + 3i`.

use std::io::{Cursor, Write};

use image::codecs::jpeg::JpegEncoder;
use image::io::Reader as ImageReader;
use image::{ColorType, ImageEncoder, ImageFormat};

use pageshot_core::Error;

const PAGE_WIDTH: f64 = 595.0;
const PAGE_HEIGHT: f64 = 842.0;
const MARGIN: f64 = 20.0;
const REENCODE_QUALITY: u8 = 85;

/// A JPEG ready to be embedded.
#[derive(Debug, Clone)]
pub struct PdfImage {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl PdfImage {
    /// Prepare a stored JPEG or PNG for embedding.
    pub fn from_encoded(bytes: &[u8]) -> Result<Self, Error> {
        let reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| Error::EncodeFailed(format!("image format: {e}")))?;

        if reader.format() == Some(ImageFormat::Jpeg) {
            let (width, height) = reader.into_dimensions().map_err(|e| Error::EncodeFailed(format!("jpeg header: {e}")))?;
            return Ok(Self { jpeg: bytes.to_vec(), width, height });
        }

        let rgb = reader.decode().map_err(|e| Error::EncodeFailed(format!("image decode: {e}")))?.to_rgb8();
        let (width, height) = rgb.dimensions();
        let mut jpeg = Vec::new();
        JpegEncoder::new_with_quality(&mut jpeg, REENCODE_QUALITY)
            .write_image(rgb.as_raw(), width, height, ColorType::Rgb8)
            .map_err(|e| Error::EncodeFailed(format!("jpeg encode: {e}")))?;
        Ok(Self { jpeg, width, height })
    }
}

/// Placement `(x, y, w, h)` of an image on the page, in points.
fn placement(width: u32, height: u32) -> (f64, f64, f64, f64) {
    let (w, h) = (f64::from(width.max(1)), f64::from(height.max(1)));
    let scale = ((PAGE_WIDTH - 2.0 * MARGIN) / w).min((PAGE_HEIGHT - 2.0 * MARGIN) / h).min(1.0);
    let (w, h) = (w * scale, h * scale);
    ((PAGE_WIDTH - w) / 2.0, (PAGE_HEIGHT - h) / 2.0, w, h)
}

struct Writer {
    buf: Vec<u8>,
    offsets: Vec<usize>,
}

impl Writer {
    fn object(&mut self, id: usize, body: &[u8]) {
        self.offsets[id] = self.buf.len();
        let _ = writeln!(self.buf, "{id} 0 obj");
        self.buf.extend_from_slice(body);
        self.buf.extend_from_slice(b"\nendobj\n");
    }

    fn stream(&mut self, id: usize, dict: &str, data: &[u8]) {
        let mut body = format!("<< {dict} /Length {} >>\nstream\n", data.len()).into_bytes();
        body.extend_from_slice(data);
        body.extend_from_slice(b"\nendstream");
        self.object(id, &body);
    }
}

/// Assemble a PDF with one page per image, in order.
pub fn build_pdf(images: &[PdfImage]) -> Result<Vec<u8>, Error> {
    if images.is_empty() {
        return Err(Error::InvalidInput("no images to export".into()));
    }

    let count = 2 + 3 * images.len();
    let mut w = Writer { buf: b"%PDF-1.4\n%\xE2\xE3\xCF\xD3\n".to_vec(), offsets: vec![0; count + 1] };

    w.object(1, b"<< /Type /Catalog /Pages 2 0 R >>");

    let kids: Vec<String> = (0..images.len()).map(|i| format!("{} 0 R", 3 + 3 * i)).collect();
    w.object(2, format!("<< /Type /Pages /Kids [{}] /Count {} >>", kids.join(" "), images.len()).as_bytes());

    for (i, image) in images.iter().enumerate() {
        let (page, content, xobject) = (3 + 3 * i, 4 + 3 * i, 5 + 3 * i);
        let name = format!("Im{}", i + 1);

        w.object(
            page,
            format!(
                "<< /Type /Page /Parent 2 0 R /MediaBox [0 0 {PAGE_WIDTH} {PAGE_HEIGHT}] \
                 /Resources << /XObject << /{name} {xobject} 0 R >> >> /Contents {content} 0 R >>"
            )
            .as_bytes(),
        );

        let (x, y, width, height) = placement(image.width, image.height);
        let ops = format!("q {width:.2} 0 0 {height:.2} {x:.2} {y:.2} cm /{name} Do Q");
        w.stream(content, "", ops.as_bytes());

        let dict = format!(
            "/Type /XObject /Subtype /Image /Width {} /Height {} /ColorSpace /DeviceRGB \
             /BitsPerComponent 8 /Filter /DCTDecode",
            image.width, image.height
        );
        w.stream(xobject, &dict, &image.jpeg);
    }

    let xref = w.buf.len();
    let _ = write!(w.buf, "xref\n0 {}\n0000000000 65535 f \n", count + 1);
    for offset in &w.offsets[1..] {
        let _ = writeln!(w.buf, "{offset:010} 00000 n ");
    }
    let _ = write!(w.buf, "trailer\n<< /Size {} /Root 1 0 R >>\nstartxref\n{xref}\n%%EOF\n", count + 1);

    Ok(w.buf)
}
