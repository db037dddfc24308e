//! Minimal GIF animation builder
//!
//! An ordered list of frames with a fixed per-frame delay, looping forever.
//! Transparent pixels are flattened onto white before quantization.

use super::types::ConvertError;
use image::codecs::gif::{GifEncoder, Repeat};
use image::imageops::{self, FilterType};
use image::{Delay, Frame, RgbaImage};

/// Lower is better quality, slower; 10 is the encoder's recommended middle ground
const QUANTIZER_SPEED: i32 = 10;

pub struct GifAnimation {
    width: u32,
    height: u32,
    delay_ms: u32,
    frames: Vec<RgbaImage>,
}

impl GifAnimation {
    pub fn new(width: u32, height: u32, delay_ms: u32) -> Self {
        Self {
            width,
            height,
            delay_ms,
            frames: Vec::new(),
        }
    }

    /// Append an RGBA snapshot, resizing it to the animation size if needed
    pub fn push_rgba(&mut self, data: Vec<u8>, width: u32, height: u32) -> Result<(), ConvertError> {
        let image = RgbaImage::from_raw(width, height, data).ok_or_else(|| {
            ConvertError::Encoding(format!("Frame buffer does not match {}x{}", width, height))
        })?;

        let image = if image.dimensions() != (self.width, self.height) {
            imageops::resize(&image, self.width, self.height, FilterType::Triangle)
        } else {
            image
        };

        self.frames.push(flatten_on_white(image));
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Encode every frame; `on_frame(done, total)` is called after each one
    pub fn encode<F>(self, mut on_frame: F) -> Result<Vec<u8>, ConvertError>
    where
        F: FnMut(u32, u32),
    {
        if self.frames.is_empty() {
            return Err(ConvertError::EmptyRecording);
        }

        let total = self.frames.len() as u32;
        let delay = Delay::from_numer_denom_ms(self.delay_ms, 1);
        let mut out = Vec::new();
        {
            let mut encoder = GifEncoder::new_with_speed(&mut out, QUANTIZER_SPEED);
            encoder
                .set_repeat(Repeat::Infinite)
                .map_err(|e| ConvertError::Encoding(e.to_string()))?;

            for (index, image) in self.frames.into_iter().enumerate() {
                encoder
                    .encode_frame(Frame::from_parts(image, 0, 0, delay))
                    .map_err(|e| ConvertError::Encoding(format!("GIF frame {}: {}", index, e)))?;
                on_frame(index as u32 + 1, total);
            }
        }

        tracing::debug!("Encoded GIF: {} frames, {} bytes", total, out.len());
        Ok(out)
    }
}

fn flatten_on_white(mut image: RgbaImage) -> RgbaImage {
    for pixel in image.pixels_mut() {
        let alpha = pixel[3] as u32;
        if alpha == 255 {
            continue;
        }
        for channel in 0..3 {
            pixel[channel] = ((pixel[channel] as u32 * alpha + 255 * (255 - alpha)) / 255) as u8;
        }
        pixel[3] = 255;
    }
    image
}
