use image::{DynamicImage, RgbImage};

use crate::pipeline::{Frame, SessionToken};

/// Symbologies a recognizer can report. `rqrr` only ever yields `Qr`; the
/// others stand in for foreign objects a screen must ignore.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Symbology {
    Qr,
    #[cfg(test)]
    Ean13,
    #[cfg(test)]
    Code128,
    #[cfg(test)]
    Aztec,
}

/// One recognized object in a frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetadataObject {
    pub symbology: Symbology,
    /// Decoded payload, `None` when the symbol carries no text (e.g. binary data)
    pub string_value: Option<String>,
}

impl MetadataObject {
    #[cfg(test)]
    pub fn qr(text: impl Into<String>) -> Self {
        MetadataObject {
            symbology: Symbology::Qr,
            string_value: Some(text.into()),
        }
    }
}

/// Objects recognized in one frame, tagged with the run that produced them.
#[derive(Debug, Clone)]
pub struct MetadataBatch {
    pub session: SessionToken,
    pub objects: Vec<MetadataObject>,
}

pub struct MetadataOutput {
    symbologies: Vec<Symbology>,
}

impl MetadataOutput {
    pub fn qr_only() -> Self {
        MetadataOutput {
            symbologies: vec![Symbology::Qr],
        }
    }

    pub fn accepts(&self, symbology: Symbology) -> bool {
        self.symbologies.contains(&symbology)
    }

    /// Scan an RGB24 frame. Grids that fail to decode are skipped, and only
    /// objects of the requested symbologies are returned.
    pub fn recognize(&self, frame: &Frame) -> Vec<MetadataObject> {
        self.keep_requested(detect_qr(frame))
    }

    fn keep_requested(&self, mut objects: Vec<MetadataObject>) -> Vec<MetadataObject> {
        objects.retain(|object| self.accepts(object.symbology));
        objects
    }
}

fn detect_qr(frame: &Frame) -> Vec<MetadataObject> {
    let Some(luma) = to_luma(frame) else {
        tracing::warn!(
            width = frame.width,
            height = frame.height,
            len = frame.rgb.len(),
            "Frame size does not match its dimensions, skipping"
        );
        return Vec::new();
    };

    let (w, h) = (luma.width() as usize, luma.height() as usize);
    let mut prepared = rqrr::PreparedImage::prepare_from_greyscale(w, h, |x, y| {
        luma.get_pixel(x as u32, y as u32).0[0]
    });

    let mut objects = Vec::new();
    for grid in prepared.detect_grids() {
        let mut payload = Vec::new();
        match grid.decode_to(&mut payload) {
            Ok(meta) => {
                tracing::debug!(version = meta.version.0, bytes = payload.len(), "QR decoded");
                objects.push(MetadataObject {
                    symbology: Symbology::Qr,
                    string_value: String::from_utf8(payload).ok(),
                });
            }
            Err(e) => tracing::trace!(error = %e, "QR grid did not decode"),
        }
    }
    objects
}

fn to_luma(frame: &Frame) -> Option<image::GrayImage> {
    let rgb = RgbImage::from_raw(frame.width, frame.height, frame.rgb.clone())?;
    Some(DynamicImage::ImageRgb8(rgb).to_luma8())
}
