//! Deterministic per-point transform stage.
//!
//! The application order is part of the output contract:
//! offset, scale, Y/Z swap, Z inversion, X inversion, then the color
//! channel rules. Decimation happens before any of this, on raw source
//! indices.

use pcc_core::pointcloud::point::{Color, Point};
use pcc_core::settings::ImportSettings;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ColorMode {
    /// Use the RGB channels as read.
    Rgb,
    /// Replicate intensity into R = G = B.
    IntensityAsColor,
    /// RGB as read, intensity carried as its own channel.
    RgbAndIntensity,
    /// Neither channel requested: color is zeroed.
    None,
}

#[derive(Debug, Clone)]
pub struct PointTransform {
    offset: [f64; 3],
    scale: Option<f64>,
    swap_yz: bool,
    invert_z: bool,
    invert_x: bool,
    color_mode: ColorMode,
}

impl PointTransform {
    /// `offset` is the resolved global offset: the bounds-pass minimum, the
    /// manual offset, or zero.
    pub fn new(settings: &ImportSettings, offset: [f64; 3]) -> Self {
        let color_mode = match (settings.import_rgb, settings.import_intensity) {
            (true, true) => ColorMode::RgbAndIntensity,
            (true, false) => ColorMode::Rgb,
            (false, true) => ColorMode::IntensityAsColor,
            (false, false) => ColorMode::None,
        };
        Self {
            offset,
            scale: settings.scale,
            swap_yz: settings.swap_yz,
            invert_z: settings.invert_z,
            invert_x: settings.invert_x,
            color_mode,
        }
    }

    pub fn apply(&self, point: &mut Point) {
        point.x -= self.offset[0];
        point.y -= self.offset[1];
        point.z -= self.offset[2];

        if let Some(scale) = self.scale {
            point.x *= scale;
            point.y *= scale;
            point.z *= scale;
        }

        if self.swap_yz {
            std::mem::swap(&mut point.y, &mut point.z);
        }
        if self.invert_z {
            point.z = -point.z;
        }
        if self.invert_x {
            point.x = -point.x;
        }

        match self.color_mode {
            ColorMode::Rgb | ColorMode::RgbAndIntensity => {}
            ColorMode::IntensityAsColor => point.color = Color::grey(point.intensity),
            ColorMode::None => point.color = Color::default(),
        }
    }
}
