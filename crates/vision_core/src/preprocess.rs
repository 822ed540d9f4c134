use crate::config::ResizeMode;
use crate::resize::ResizeWorkspace;
use crate::resources::{Pooled, ResourcePool};
use anyhow::{anyhow, Result};
use image::RgbImage;
use ndarray::Array4;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TensorLayout {
    Nchw,
    Nhwc,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChannelOrder {
    Rgb,
    Bgr,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Normalization {
    /// Raw 0..255 values.
    None,
    /// x / 255.0
    UnitRange,
    /// (x - 127.5) / 128.0
    Symmetric,
}

impl Normalization {
    #[inline]
    fn apply(self, v: u8) -> f32 {
        let v = v as f32;
        match self {
            Normalization::None => v,
            Normalization::UnitRange => v / 255.0,
            Normalization::Symmetric => (v - 127.5) / 128.0,
        }
    }
}

/// What a model wants as input: a fixed-size batch of one.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct InputSpec {
    pub width: u32,
    pub height: u32,
    pub layout: TensorLayout,
    pub channels: ChannelOrder,
    pub normalization: Normalization,
}

impl InputSpec {
    pub fn shape(&self) -> (usize, usize, usize, usize) {
        let (w, h) = (self.width as usize, self.height as usize);
        match self.layout {
            TensorLayout::Nchw => (1, 3, h, w),
            TensorLayout::Nhwc => (1, h, w, 3),
        }
    }
}

/// Turns frames into model tensors. Every buffer it touches is leased from
/// the caller's pool.
pub struct Preprocessor {
    resize: ResizeWorkspace,
}

impl Preprocessor {
    pub fn new(mode: ResizeMode) -> Self {
        Self {
            resize: ResizeWorkspace::new(mode.algorithm()),
        }
    }

    pub fn to_tensor(
        &mut self,
        rgb: &RgbImage,
        spec: &InputSpec,
        pool: &ResourcePool,
    ) -> Result<Pooled<Array4<f32>>> {
        if rgb.width() == 0 || rgb.height() == 0 {
            return Err(anyhow!(
                "frame {}x{} cannot be resized to {}x{}",
                rgb.width(),
                rgb.height(),
                spec.width,
                spec.height
            ));
        }
        let needs_resize = rgb.width() != spec.width || rgb.height() != spec.height;
        let mut resized = pool.bytes(if needs_resize {
            spec.width as usize * spec.height as usize * 3
        } else {
            0
        });
        let raw = if needs_resize {
            self.resize
                .resize_into(rgb, spec.width, spec.height, resized.as_mut_slice())?;
            resized.as_slice()
        } else {
            rgb.as_raw().as_slice()
        };

        let mut input = pool.zeros4(spec.shape());
        let (w, h) = (spec.width as usize, spec.height as usize);
        let (c0, c2) = match spec.channels {
            ChannelOrder::Rgb => (0usize, 2usize),
            ChannelOrder::Bgr => (2usize, 0usize),
        };
        let norm = spec.normalization;
        for y in 0..h {
            let row = y * w * 3;
            for x in 0..w {
                let idx = row + x * 3;
                let r = norm.apply(raw[idx]);
                let g = norm.apply(raw[idx + 1]);
                let b = norm.apply(raw[idx + 2]);
                match spec.layout {
                    TensorLayout::Nchw => {
                        input[[0, c0, y, x]] = r;
                        input[[0, 1, y, x]] = g;
                        input[[0, c2, y, x]] = b;
                    }
                    TensorLayout::Nhwc => {
                        input[[0, y, x, c0]] = r;
                        input[[0, y, x, 1]] = g;
                        input[[0, y, x, c2]] = b;
                    }
                }
            }
        }
        Ok(input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::BufferLedger;

    fn spec(layout: TensorLayout, channels: ChannelOrder, normalization: Normalization) -> InputSpec {
        InputSpec {
            width: 4,
            height: 2,
            layout,
            channels,
            normalization,
        }
    }

    #[test]
    fn nhwc_unit_range() {
        let ledger = BufferLedger::new();
        let pool = ResourcePool::new(&ledger, "t");
        let img = RgbImage::from_pixel(8, 4, image::Rgb([255, 0, 51]));
        let mut pre = Preprocessor::new(ResizeMode::Fast);
        let t = pre
            .to_tensor(&img, &spec(TensorLayout::Nhwc, ChannelOrder::Rgb, Normalization::UnitRange), &pool)
            .unwrap();
        assert_eq!(t.shape(), &[1, 2, 4, 3]);
        assert!((t[[0, 1, 3, 0]] - 1.0).abs() < 1e-6);
        assert!((t[[0, 1, 3, 2]] - 0.2).abs() < 1e-6);
        // resize scratch is released, only the tensor is alive
        assert_eq!(ledger.live(), 1);
        drop(t);
        assert_eq!(ledger.live(), 0);
    }

    #[test]
    fn nchw_bgr_swaps_channels() {
        let ledger = BufferLedger::new();
        let pool = ResourcePool::new(&ledger, "t");
        let img = RgbImage::from_pixel(4, 2, image::Rgb([1, 2, 3]));
        let mut pre = Preprocessor::new(ResizeMode::Balanced);
        let t = pre
            .to_tensor(&img, &spec(TensorLayout::Nchw, ChannelOrder::Bgr, Normalization::None), &pool)
            .unwrap();
        assert_eq!(t.shape(), &[1, 3, 2, 4]);
        assert_eq!(t[[0, 0, 0, 0]], 3.0);
        assert_eq!(t[[0, 1, 0, 0]], 2.0);
        assert_eq!(t[[0, 2, 0, 0]], 1.0);
    }

    #[test]
    fn empty_frame_fails_without_leaking() {
        let ledger = BufferLedger::new();
        let pool = ResourcePool::new(&ledger, "t");
        let img = RgbImage::new(0, 0);
        let mut pre = Preprocessor::new(ResizeMode::Fast);
        let res = pre.to_tensor(
            &img,
            &spec(TensorLayout::Nhwc, ChannelOrder::Rgb, Normalization::Symmetric),
            &pool,
        );
        assert!(res.is_err());
        assert_eq!(ledger.live(), 0);
    }
}
