use anyhow::{bail, Context, Result};
use fast_image_resize as fir;
use fast_image_resize::pixels::U8x3;
use image::RgbImage;
use std::num::NonZeroU32;

fn non_zero(v: u32, what: &str) -> Result<NonZeroU32> {
    NonZeroU32::new(v).with_context(|| format!("{what} is zero"))
}

/// RGB8 resizer backed by `fast_image_resize`. Keeps the resizer's internal
/// scratch between calls; the destination is always caller-owned.
pub struct ResizeWorkspace {
    resizer: fir::Resizer,
}

impl ResizeWorkspace {
    pub fn new(algorithm: fir::ResizeAlg) -> Self {
        Self {
            resizer: fir::Resizer::new(algorithm),
        }
    }

    /// Resizes `src` into `dst`, which must hold exactly `dst_w * dst_h * 3`
    /// packed RGB bytes.
    pub fn resize_into(&mut self, src: &RgbImage, dst_w: u32, dst_h: u32, dst: &mut [u8]) -> Result<()> {
        let expected = dst_w as usize * dst_h as usize * 3;
        if dst.len() != expected {
            bail!("resize target holds {} bytes, {dst_w}x{dst_h} RGB needs {expected}", dst.len());
        }
        let src_view = fir::ImageView::<U8x3>::from_buffer(
            non_zero(src.width(), "source width")?,
            non_zero(src.height(), "source height")?,
            src.as_raw(),
        )?;
        let dst_view = fir::ImageViewMut::<U8x3>::from_buffer(
            non_zero(dst_w, "target width")?,
            non_zero(dst_h, "target height")?,
            dst,
        )?;
        self.resizer.resize(
            &fir::DynamicImageView::from(src_view),
            &mut fir::DynamicImageViewMut::from(dst_view),
        )?;
        Ok(())
    }
}
