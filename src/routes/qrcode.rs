// routes/qrcode.rs
// Renders a provisioning URI as a PNG QR code for the setup response.

use anyhow::Result;
use base64::{Engine as _, engine::general_purpose::STANDARD};
use image::{DynamicImage, ImageFormat, Luma};
use qrcode::QrCode;
use std::io::Cursor;

/// PNG bytes of the QR code for `uri`, at least 200x200 pixels.
pub fn render_qr_png(uri: &str) -> Result<Vec<u8>> {
    let code = QrCode::new(uri.as_bytes())?;
    let img = code.render::<Luma<u8>>().min_dimensions(200, 200).build();

    // image 0.25: write_to requires Write + Seek -> Cursor<Vec<u8>>
    let mut cursor = Cursor::new(Vec::<u8>::new());
    DynamicImage::ImageLuma8(img).write_to(&mut cursor, ImageFormat::Png)?;
    Ok(cursor.into_inner())
}

/// Same image, base64-encoded for an `<img src="data:image/png;base64,...">`.
pub fn render_qr_png_base64(uri: &str) -> Result<String> {
    Ok(STANDARD.encode(render_qr_png(uri)?))
}
