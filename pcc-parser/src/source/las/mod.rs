use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use las::Reader;

use pcc_core::error::Error;
use pcc_core::metadata::FileMetadata;
use pcc_core::pointcloud::point::{BoundingBox, Color, Point};
use pcc_core::settings::{ImportSettings, IntensityRange};
use pcc_core::Result;

const WKT_USER_ID: &str = "LASF_Projection";
const WKT_RECORD_ID: u16 = 2112;

/// LAS/LAZ point source over `las::Reader`. LAZ decoding is handled
/// transparently by the `laz` feature.
pub struct LasPointSource {
    reader: Option<Reader>,
    metadata: FileMetadata,
    point_count: u64,
    cursor: u64,
    finished: bool,
    intensity_range: Option<IntensityRange>,
    capture_summaries: bool,
    track_time: bool,
}

impl LasPointSource {
    pub fn new() -> Self {
        Self {
            reader: None,
            metadata: FileMetadata::default(),
            point_count: 0,
            cursor: 0,
            finished: false,
            intensity_range: None,
            capture_summaries: false,
            track_time: false,
        }
    }

    fn capture_header(&mut self, path: &Path, header: &las::Header) {
        let mut metadata = FileMetadata {
            source: path.to_path_buf(),
            point_count: header.number_of_points(),
            version: header.version().to_string(),
            system_identifier: header.system_identifier().to_string(),
            generating_software: header.generating_software().to_string(),
            file_creation: header.date().map(|d| d.to_string()),
            point_format: header.point_format().to_u8().unwrap_or(0),
            ..Default::default()
        };
        let bounds = header.bounds();
        metadata.min = [bounds.min.x, bounds.min.y, bounds.min.z];
        metadata.max = [bounds.max.x, bounds.max.y, bounds.max.z];
        metadata.wkt = header
            .vlrs()
            .iter()
            .chain(header.evlrs().iter())
            .find(|vlr| vlr.user_id == WKT_USER_ID && vlr.record_id == WKT_RECORD_ID)
            .map(|vlr| {
                String::from_utf8_lossy(&vlr.data)
                    .trim_end_matches('\0')
                    .to_string()
            });
        self.metadata = metadata;
    }

    fn normalize_intensity(&self, raw: u16) -> u16 {
        match self.intensity_range {
            Some(IntensityRange { min, max }) => {
                let clamped = raw.clamp(min, max);
                let span = (max - min) as f64;
                (((clamped - min) as f64 / span) * f64::from(u16::MAX)).round() as u16
            }
            None => raw,
        }
    }

    fn convert(&mut self, las_point: las::Point) -> Point {
        let color = las_point
            .color
            .map(|c| Color {
                r: c.red,
                g: c.green,
                b: c.blue,
            })
            .unwrap_or_default();
        let gps_time = las_point.gps_time.unwrap_or(0.0);

        if self.track_time {
            if let Some(t) = las_point.gps_time {
                self.metadata.observe_gps_time(t);
            }
        }
        if self.capture_summaries {
            self.metadata
                .observe_classification(u8::from(las_point.classification));
        }

        Point {
            x: las_point.x,
            y: las_point.y,
            z: las_point.z,
            color,
            intensity: self.normalize_intensity(las_point.intensity),
            gps_time,
        }
    }
}

impl Default for LasPointSource {
    fn default() -> Self {
        Self::new()
    }
}

// `las::Reader` boxes its inner point reader as `dyn ReadPoints`, which the
// `las` crate does not mark `+ Send` even though every concrete reader it
// constructs (file/buffer backed) is itself `Send`. `LasPointSource` is used
// single-threaded per the `PointSource` contract, so only cross-thread
// transfer (not concurrent access) is required, which this satisfies.
unsafe impl Send for LasPointSource {}

impl super::PointSource for LasPointSource {
    fn open(&mut self, path: &Path, settings: &ImportSettings) -> Result<BoundingBox> {
        self.close();

        let extension = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        match extension.as_deref() {
            Some("las") | Some("laz") => {}
            _ => {
                return Err(Error::UnsupportedFormat {
                    path: path.to_path_buf(),
                })
            }
        }

        let file = File::open(path)?;
        let reader = Reader::new(BufReader::new(file))
            .map_err(|e| Error::corrupt_header(path, e.to_string()))?;

        let header = reader.header();
        if header.number_of_points() == 0 {
            return Err(Error::corrupt_header(path, "file contains no points"));
        }
        let bounds = header.bounds();
        let bounds = BoundingBox::new(
            [bounds.min.x, bounds.min.y, bounds.min.z],
            [bounds.max.x, bounds.max.y, bounds.max.z],
        );
        if !bounds.is_valid() {
            return Err(Error::corrupt_header(
                path,
                format!("inverted header bounds: {bounds:?}"),
            ));
        }

        self.capture_header(path, header);
        self.point_count = header.number_of_points();
        self.cursor = 0;
        self.finished = false;
        self.intensity_range = settings.custom_intensity_range;
        self.capture_summaries = settings.captures_metadata();
        self.track_time = settings.average_timestamp || settings.captures_metadata();
        self.reader = Some(reader);
        Ok(bounds)
    }

    fn point_count(&self) -> u64 {
        self.point_count
    }

    fn read_point(&mut self) -> Result<Option<Point>> {
        if self.finished {
            return Ok(None);
        }
        let reader = match self.reader.as_mut() {
            Some(reader) => reader,
            None => return Ok(None),
        };
        match reader.points().next() {
            Some(Ok(las_point)) => {
                let point = self.convert(las_point);
                self.cursor += 1;
                Ok(Some(point))
            }
            Some(Err(e)) => {
                // Truncate the stream here; the caller decides whether the
                // points read so far count as partial success.
                self.finished = true;
                Err(Error::Point {
                    index: self.cursor,
                    message: e.to_string(),
                })
            }
            None => {
                self.finished = true;
                Ok(None)
            }
        }
    }

    fn metadata(&self) -> FileMetadata {
        self.metadata.clone()
    }

    fn close(&mut self) {
        self.reader = None;
        self.finished = true;
        self.cursor = 0;
        self.point_count = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::PointSource as _;
    use las::{Builder, Writer};

    fn write_sample_las(path: &Path, count: usize) {
        let mut builder = Builder::from((1, 2));
        builder.point_format = las::point::Format::new(3).unwrap();
        let header = builder.into_header().unwrap();
        let mut writer = Writer::from_path(path, header).unwrap();
        for i in 0..count {
            let point = las::Point {
                x: i as f64,
                y: i as f64 * 2.0,
                z: 10.0 - i as f64,
                intensity: (i * 100) as u16,
                gps_time: Some(1000.0 + i as f64),
                color: Some(las::Color::new(i as u16, 0, 255)),
                ..Default::default()
            };
            writer.write_point(point).unwrap();
        }
        writer.close().unwrap();
    }

    #[test]
    fn open_read_close_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sample.las");
        write_sample_las(&path, 5);

        let settings = ImportSettings::default();
        let mut source = LasPointSource::new();
        let bounds = source.open(&path, &settings).unwrap();
        assert!(bounds.is_valid());
        assert_eq!(source.point_count(), 5);

        let mut read = 0;
        while let Some(point) = source.read_point().unwrap() {
            assert_eq!(point.y, point.x * 2.0);
            read += 1;
        }
        assert_eq!(read, 5);
        // End of stream is sticky.
        assert!(source.read_point().unwrap().is_none());

        // Pooled reuse: close then reopen.
        source.close();
        let bounds = source.open(&path, &settings).unwrap();
        assert!(bounds.is_valid());
        assert!(source.read_point().unwrap().is_some());
    }

    #[test]
    fn rejects_unknown_extension() {
        let settings = ImportSettings::default();
        let mut source = LasPointSource::new();
        let err = source
            .open(Path::new("points.xyz"), &settings)
            .unwrap_err();
        assert!(matches!(err, Error::UnsupportedFormat { .. }));
    }

    #[test]
    fn custom_intensity_range_renormalizes() {
        let source = LasPointSource {
            intensity_range: Some(IntensityRange { min: 100, max: 300 }),
            ..LasPointSource::new()
        };
        assert_eq!(source.normalize_intensity(50), 0);
        assert_eq!(source.normalize_intensity(100), 0);
        assert_eq!(source.normalize_intensity(300), u16::MAX);
        assert_eq!(source.normalize_intensity(200), 32768);
    }
}
