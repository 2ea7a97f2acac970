//! Image encoding: `RgbaImage` → single-page TIFF bytes.
//!
//! Pages are written as 8-bit RGBA with Deflate compression, so transparency
//! survives and the file stays lossless. The resolution tags carry the render
//! DPI; downstream viewers use them to print pages at their physical size.

use image::RgbaImage;
use std::io::Cursor;
use tiff::encoder::{colortype, compression::Deflate, Rational, TiffEncoder};
use tiff::tags::ResolutionUnit;
use tiff::TiffError;
use tracing::debug;

/// Encode a rendered page as a TIFF tagged with `dpi` on both axes.
pub fn encode_tiff(img: &RgbaImage, dpi: u32) -> Result<Vec<u8>, TiffError> {
    let mut buf = Cursor::new(Vec::new());
    {
        let mut encoder = TiffEncoder::new(&mut buf)?;
        let mut image = encoder.new_image_with_compression::<colortype::RGBA8, _>(
            img.width(),
            img.height(),
            Deflate::default(),
        )?;
        image.resolution(ResolutionUnit::Inch, Rational { n: dpi, d: 1 });
        image.write_data(img.as_raw())?;
    }

    let data = buf.into_inner();
    debug!(
        width = img.width(),
        height = img.height(),
        bytes = data.len(),
        "Encoded TIFF"
    );
    Ok(data)
}
