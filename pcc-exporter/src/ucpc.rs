//! Single-file container (V2).
//!
//! Layout, little-endian:
//!   00  [u8;4]  magic = b"UCPC"
//!   04  u32     version = 2
//!   08  u64     point count (zero at init, patched on finish)
//!   10  f32[6]  bounds min x/y/z, max x/y/z (patched on finish)
//!   28  u32     flags: bit 0 = intensity channel, bit 1 = time channel
//!   2C  records {x f32, y f32, z f32, r u8, g u8, b u8,
//!                [intensity u16], [time f64]}

use std::fs::File;
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::PathBuf;

use byteorder::{LittleEndian, WriteBytesExt};

use pcc_core::error::Error;
use pcc_core::pointcloud::point::{BoundingBox, Point};
use pcc_core::settings::ImportSettings;
use pcc_core::Result;

use crate::sink::PointSink;

pub const UCPC_MAGIC: [u8; 4] = *b"UCPC";
pub const UCPC_VERSION: u32 = 2;

const COUNT_OFFSET: u64 = 8;

pub struct UcpcWriter {
    path: PathBuf,
    file: Option<BufWriter<File>>,
    include_intensity: bool,
    include_time: bool,
    count: u64,
    bounds: BoundingBox,
    clamped: u64,
}

impl UcpcWriter {
    pub fn new(settings: &ImportSettings) -> Self {
        Self {
            path: settings.output.clone(),
            file: None,
            include_intensity: settings.import_intensity,
            include_time: settings.average_timestamp,
            count: 0,
            bounds: BoundingBox::empty(),
            clamped: 0,
        }
    }

    fn flags(&self) -> u32 {
        let mut flags = 0;
        if self.include_intensity {
            flags |= 1;
        }
        if self.include_time {
            flags |= 1 << 1;
        }
        flags
    }

    fn write_header(file: &mut BufWriter<File>, count: u64, bounds: &BoundingBox, flags: u32) -> std::io::Result<()> {
        file.write_all(&UCPC_MAGIC)?;
        file.write_u32::<LittleEndian>(UCPC_VERSION)?;
        file.write_u64::<LittleEndian>(count)?;
        for axis in 0..3 {
            file.write_f32::<LittleEndian>(bounds.min[axis] as f32)?;
        }
        for axis in 0..3 {
            file.write_f32::<LittleEndian>(bounds.max[axis] as f32)?;
        }
        file.write_u32::<LittleEndian>(flags)?;
        Ok(())
    }
}

impl PointSink for UcpcWriter {
    fn init(&mut self, _estimated_points: u64) -> Result<()> {
        self.clamped = 0;
        if self.file.is_some() {
            // The container is one stream; later files append to it.
            return Ok(());
        }
        let file = File::create(&self.path)
            .map_err(|e| Error::write(&self.path, e.to_string()))?;
        let mut file = BufWriter::new(file);
        Self::write_header(&mut file, 0, &BoundingBox::empty(), self.flags())
            .map_err(|e| Error::write(&self.path, e.to_string()))?;
        self.file = Some(file);
        Ok(())
    }

    fn add_point(&mut self, point: &Point) -> Result<()> {
        if !(point.x.is_finite() && point.y.is_finite() && point.z.is_finite()) {
            self.clamped += 1;
            return Ok(());
        }
        let file = self
            .file
            .as_mut()
            .ok_or_else(|| Error::write(&self.path, "writer not initialized"))?;

        file.write_f32::<LittleEndian>(point.x as f32)
            .and_then(|_| file.write_f32::<LittleEndian>(point.y as f32))
            .and_then(|_| file.write_f32::<LittleEndian>(point.z as f32))
            .and_then(|_| file.write_u8((point.color.r >> 8) as u8))
            .and_then(|_| file.write_u8((point.color.g >> 8) as u8))
            .and_then(|_| file.write_u8((point.color.b >> 8) as u8))
            .map_err(|e| Error::write(&self.path, e.to_string()))?;
        if self.include_intensity {
            file.write_u16::<LittleEndian>(point.intensity)
                .map_err(|e| Error::write(&self.path, e.to_string()))?;
        }
        if self.include_time {
            file.write_f64::<LittleEndian>(point.gps_time)
                .map_err(|e| Error::write(&self.path, e.to_string()))?;
        }

        self.bounds.grow(point.x, point.y, point.z);
        self.count += 1;
        Ok(())
    }

    fn save(&mut self, _file_index: usize) -> Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()
                .map_err(|e| Error::write(&self.path, e.to_string()))?;
        }
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        let Some(mut file) = self.file.take() else {
            return Ok(());
        };
        file.flush()
            .map_err(|e| Error::write(&self.path, e.to_string()))?;
        file.seek(SeekFrom::Start(COUNT_OFFSET))
            .map_err(|e| Error::write(&self.path, e.to_string()))?;
        file.write_u64::<LittleEndian>(self.count)
            .map_err(|e| Error::write(&self.path, e.to_string()))?;
        for axis in 0..3 {
            file.write_f32::<LittleEndian>(self.bounds.min[axis] as f32)
                .map_err(|e| Error::write(&self.path, e.to_string()))?;
        }
        for axis in 0..3 {
            file.write_f32::<LittleEndian>(self.bounds.max[axis] as f32)
                .map_err(|e| Error::write(&self.path, e.to_string()))?;
        }
        file.flush()
            .map_err(|e| Error::write(&self.path, e.to_string()))?;
        Ok(())
    }

    fn clamp_count(&self) -> u64 {
        self.clamped
    }

    fn points_written(&self) -> u64 {
        self.count
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::ReadBytesExt;
    use pcc_core::pointcloud::point::Color;
    use std::io::Read;

    fn settings(path: PathBuf, intensity: bool, time: bool) -> ImportSettings {
        ImportSettings {
            output: path,
            import_intensity: intensity,
            average_timestamp: time,
            ..Default::default()
        }
    }

    #[test]
    fn header_is_patched_on_finish() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ucpc");
        let mut writer = UcpcWriter::new(&settings(path.clone(), false, false));

        writer.init(2).unwrap();
        for i in 0..2 {
            writer
                .add_point(&Point {
                    x: i as f64,
                    y: 2.0 * i as f64,
                    z: -(i as f64),
                    color: Color::grey(0xFF00),
                    ..Default::default()
                })
                .unwrap();
        }
        writer.save(0).unwrap();
        writer.finish().unwrap();

        let mut file = File::open(&path).unwrap();
        let mut magic = [0u8; 4];
        file.read_exact(&mut magic).unwrap();
        assert_eq!(magic, UCPC_MAGIC);
        assert_eq!(file.read_u32::<LittleEndian>().unwrap(), UCPC_VERSION);
        assert_eq!(file.read_u64::<LittleEndian>().unwrap(), 2);

        let mut bounds = [0f32; 6];
        for b in bounds.iter_mut() {
            *b = file.read_f32::<LittleEndian>().unwrap();
        }
        assert_eq!(bounds, [0.0, 0.0, -1.0, 1.0, 2.0, 0.0]);
        assert_eq!(file.read_u32::<LittleEndian>().unwrap(), 0);

        // Two bare records: 3 * f32 + 3 * u8 each.
        let mut body = Vec::new();
        file.read_to_end(&mut body).unwrap();
        assert_eq!(body.len(), 2 * (12 + 3));
        assert_eq!(body[12], 0xFF); // red high byte of the first record
    }

    #[test]
    fn optional_channels_change_record_size() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ucpc");
        let mut writer = UcpcWriter::new(&settings(path.clone(), true, true));

        writer.init(1).unwrap();
        writer
            .add_point(&Point {
                intensity: 42,
                gps_time: 123.5,
                ..Default::default()
            })
            .unwrap();
        writer.finish().unwrap();

        let len = std::fs::metadata(&path).unwrap().len();
        assert_eq!(len, 44 + 12 + 3 + 2 + 8);
    }

    #[test]
    fn non_finite_points_are_counted_not_written() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.ucpc");
        let mut writer = UcpcWriter::new(&settings(path, false, false));

        writer.init(1).unwrap();
        writer
            .add_point(&Point {
                x: f64::NAN,
                ..Default::default()
            })
            .unwrap();
        assert_eq!(writer.clamp_count(), 1);
        assert_eq!(writer.points_written(), 0);
    }
}
