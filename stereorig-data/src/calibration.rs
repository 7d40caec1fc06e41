//! Stereo calibration loading.
//!
//! The calibration directory holds five matrix documents: the reprojection
//! matrix `Q` and the x/y pixel maps for each camera. Every document is a JSON
//! object with `rows`, `cols` and row-major `data`, the same layout as an
//! OpenCV matrix node. Maps are quantized into [`RemapTable`]s right here so
//! nothing downstream ever sees the floating-point maps.

use crate::remap::{RemapError, RemapTable};
use glam::{DMat4, DVec4, UVec2, Vec3};
use serde::Deserialize;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

/// Reprojection matrix document.
pub const REPROJECTION_FILE: &str = "Q.json";
/// Left camera x/y map documents.
pub const LEFT_MAP_FILES: [&str; 2] = ["mx1.json", "my1.json"];
/// Right camera x/y map documents.
pub const RIGHT_MAP_FILES: [&str; 2] = ["mx2.json", "my2.json"];

/// Errors loading a calibration directory.
#[derive(Debug, Error)]
pub enum CalibrationError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{path} declares {rows}x{cols} but holds {actual} values")]
    DataLength {
        path: PathBuf,
        rows: usize,
        cols: usize,
        actual: usize,
    },

    #[error("{path} is {rows}x{cols}, expected {expected}")]
    Shape {
        path: PathBuf,
        rows: usize,
        cols: usize,
        expected: String,
    },

    #[error("{path} contains non-finite values")]
    NonFinite { path: PathBuf },

    #[error("Left map is {left:?} but right map is {right:?}")]
    MapMismatch { left: (u32, u32), right: (u32, u32) },

    #[error("Remap error: {0}")]
    Remap(#[from] RemapError),
}

#[derive(Debug, Deserialize)]
struct MatrixDocument {
    rows: usize,
    cols: usize,
    data: Vec<f64>,
}

impl MatrixDocument {
    fn read(path: &Path) -> Result<Self, CalibrationError> {
        let file = File::open(path).map_err(|source| CalibrationError::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let doc: MatrixDocument =
            serde_json::from_reader(BufReader::new(file)).map_err(|source| {
                CalibrationError::Parse {
                    path: path.to_path_buf(),
                    source,
                }
            })?;

        if doc.data.len() != doc.rows * doc.cols {
            return Err(CalibrationError::DataLength {
                path: path.to_path_buf(),
                rows: doc.rows,
                cols: doc.cols,
                actual: doc.data.len(),
            });
        }

        debug!("Read {}x{} matrix from {}", doc.rows, doc.cols, path.display());
        Ok(doc)
    }

    fn shape_error(&self, path: &Path, expected: impl Into<String>) -> CalibrationError {
        CalibrationError::Shape {
            path: path.to_path_buf(),
            rows: self.rows,
            cols: self.cols,
            expected: expected.into(),
        }
    }
}

/// Build the standard rectified-stereo reprojection matrix.
///
/// `baseline` is the positive distance between the optical centres; depth
/// comes out as `focal * baseline / disparity`.
pub fn stereo_reprojection(focal: f64, cx: f64, cy: f64, baseline: f64) -> DMat4 {
    reprojection_from_rows([
        [1.0, 0.0, 0.0, -cx],
        [0.0, 1.0, 0.0, -cy],
        [0.0, 0.0, 0.0, focal],
        [0.0, 0.0, 1.0 / baseline, 0.0],
    ])
}

fn reprojection_from_rows(rows: [[f64; 4]; 4]) -> DMat4 {
    DMat4::from_cols_array_2d(&rows).transpose()
}

/// Immutable rectification maps plus reprojection matrix.
#[derive(Debug, Clone)]
pub struct CalibrationSet {
    reprojection: DMat4,
    left: RemapTable,
    right: RemapTable,
}

impl CalibrationSet {
    /// Load and validate a calibration directory.
    #[tracing::instrument(skip_all, fields(dir = %dir.as_ref().display()))]
    pub fn load(dir: impl AsRef<Path>) -> Result<Self, CalibrationError> {
        let dir = dir.as_ref();

        let q_path = dir.join(REPROJECTION_FILE);
        let q = MatrixDocument::read(&q_path)?;
        if q.rows != 4 || q.cols != 4 {
            return Err(q.shape_error(&q_path, "4x4"));
        }
        if q.data.iter().any(|v| !v.is_finite()) {
            return Err(CalibrationError::NonFinite { path: q_path });
        }

        let mut rows = [[0.0; 4]; 4];
        for (row, chunk) in rows.iter_mut().zip(q.data.chunks_exact(4)) {
            row.copy_from_slice(chunk);
        }

        let left = load_map_pair(dir, LEFT_MAP_FILES)?;
        let right = load_map_pair(dir, RIGHT_MAP_FILES)?;
        let set = Self::from_parts(reprojection_from_rows(rows), left, right)?;

        let (width, height) = set.resolution();
        info!("Calibration loaded: {}x{} remap tables", width, height);
        Ok(set)
    }

    /// Assemble a calibration from already-quantized tables.
    pub fn from_parts(
        reprojection: DMat4,
        left: RemapTable,
        right: RemapTable,
    ) -> Result<Self, CalibrationError> {
        if left.dimensions() != right.dimensions() {
            return Err(CalibrationError::MapMismatch {
                left: left.dimensions(),
                right: right.dimensions(),
            });
        }
        Ok(Self {
            reprojection,
            left,
            right,
        })
    }

    /// Undistorted calibration: identity remap for both cameras.
    pub fn identity(width: u32, height: u32, reprojection: DMat4) -> Self {
        Self {
            reprojection,
            left: RemapTable::identity(width, height),
            right: RemapTable::identity(width, height),
        }
    }

    pub fn reprojection(&self) -> &DMat4 {
        &self.reprojection
    }

    pub fn left_map(&self) -> &RemapTable {
        &self.left
    }

    pub fn right_map(&self) -> &RemapTable {
        &self.right
    }

    /// Working image resolution (width, height).
    pub fn resolution(&self) -> (u32, u32) {
        self.left.dimensions()
    }

    /// Reproject a rectified pixel and its disparity into 3-D.
    ///
    /// Returns `None` when the homogeneous weight is zero or the point is not
    /// finite.
    pub fn reproject(&self, pixel: UVec2, disparity: f32) -> Option<Vec3> {
        let h = self.reprojection
            * DVec4::new(pixel.x as f64, pixel.y as f64, disparity as f64, 1.0);
        if h.w == 0.0 {
            return None;
        }

        let point = (h.truncate() / h.w).as_vec3();
        point.is_finite().then_some(point)
    }
}

fn load_map_pair(dir: &Path, files: [&str; 2]) -> Result<RemapTable, CalibrationError> {
    let x_path = dir.join(files[0]);
    let y_path = dir.join(files[1]);
    let map_x = MatrixDocument::read(&x_path)?;
    let map_y = MatrixDocument::read(&y_path)?;

    if map_x.rows == 0 || map_x.cols == 0 {
        return Err(map_x.shape_error(&x_path, "a non-empty map"));
    }
    if (map_y.rows, map_y.cols) != (map_x.rows, map_x.cols) {
        return Err(map_y.shape_error(&y_path, format!("{}x{}", map_x.rows, map_x.cols)));
    }

    Ok(RemapTable::from_float_maps(
        &map_x.data,
        &map_y.data,
        map_x.cols as u32,
        map_x.rows as u32,
    )?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn write_matrix(dir: &Path, name: &str, rows: usize, cols: usize, data: &[f64]) {
        let doc = serde_json::json!({ "rows": rows, "cols": cols, "data": data });
        fs::write(dir.join(name), doc.to_string()).unwrap();
    }

    fn write_identity_calibration(dir: &Path, width: usize, height: usize) {
        let q = [
            1.0, 0.0, 0.0, -2.0, //
            0.0, 1.0, 0.0, -1.0, //
            0.0, 0.0, 0.0, 100.0, //
            0.0, 0.0, 10.0, 0.0,
        ];
        write_matrix(dir, REPROJECTION_FILE, 4, 4, &q);

        let map_x: Vec<f64> = (0..height).flat_map(|_| (0..width).map(|x| x as f64)).collect();
        let map_y: Vec<f64> = (0..height).flat_map(|y| (0..width).map(move |_| y as f64)).collect();
        for [mx, my] in [LEFT_MAP_FILES, RIGHT_MAP_FILES] {
            write_matrix(dir, mx, height, width, &map_x);
            write_matrix(dir, my, height, width, &map_y);
        }
    }

    #[test]
    fn test_load_identity_calibration() {
        let dir = tempfile::tempdir().unwrap();
        write_identity_calibration(dir.path(), 6, 4);

        let calib = CalibrationSet::load(dir.path()).unwrap();
        assert_eq!(calib.resolution(), (6, 4));
        assert_eq!(calib.left_map(), &RemapTable::identity(6, 4));
        assert_eq!(calib.right_map(), &RemapTable::identity(6, 4));
        // Row-major document: translation lands in the last column
        assert_eq!(calib.reprojection().w_axis.x, -2.0);
        assert_eq!(calib.reprojection().z_axis.w, 10.0);
    }

    #[test]
    fn test_load_missing_file_names_path() {
        let dir = tempfile::tempdir().unwrap();
        write_identity_calibration(dir.path(), 6, 4);
        fs::remove_file(dir.path().join("my2.json")).unwrap();

        let err = CalibrationSet::load(dir.path()).unwrap_err();
        match err {
            CalibrationError::Io { path, .. } => assert!(path.ends_with("my2.json")),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_load_rejects_malformed_json() {
        let dir = tempfile::tempdir().unwrap();
        write_identity_calibration(dir.path(), 6, 4);
        fs::write(dir.path().join(REPROJECTION_FILE), "{ not json").unwrap();

        assert!(matches!(
            CalibrationSet::load(dir.path()),
            Err(CalibrationError::Parse { .. })
        ));
    }

    #[test]
    fn test_load_rejects_wrong_q_shape() {
        let dir = tempfile::tempdir().unwrap();
        write_identity_calibration(dir.path(), 6, 4);
        write_matrix(dir.path(), REPROJECTION_FILE, 3, 3, &[0.0; 9]);

        assert!(matches!(
            CalibrationSet::load(dir.path()),
            Err(CalibrationError::Shape { rows: 3, cols: 3, .. })
        ));
    }

    #[test]
    fn test_load_rejects_short_data() {
        let dir = tempfile::tempdir().unwrap();
        write_identity_calibration(dir.path(), 6, 4);
        write_matrix(dir.path(), "mx1.json", 4, 6, &[0.0; 5]);

        assert!(matches!(
            CalibrationSet::load(dir.path()),
            Err(CalibrationError::DataLength { actual: 5, .. })
        ));
    }

    #[test]
    fn test_load_rejects_mismatched_camera_maps() {
        let dir = tempfile::tempdir().unwrap();
        write_identity_calibration(dir.path(), 6, 4);
        write_matrix(dir.path(), "mx2.json", 2, 3, &[0.0; 6]);
        write_matrix(dir.path(), "my2.json", 2, 3, &[0.0; 6]);

        assert!(matches!(
            CalibrationSet::load(dir.path()),
            Err(CalibrationError::MapMismatch { .. })
        ));
    }

    #[test]
    fn test_reproject_depth_follows_disparity() {
        let q = stereo_reprojection(100.0, 32.0, 32.0, 0.1);
        let calib = CalibrationSet::identity(64, 64, q);

        let near = calib.reproject(UVec2::new(32, 32), 8.0).unwrap();
        let far = calib.reproject(UVec2::new(32, 32), 4.0).unwrap();
        assert!((near.z - 1.25).abs() < 1e-5);
        assert!((far.z - 2.5).abs() < 1e-5);
        assert!(near.x.abs() < 1e-6 && near.y.abs() < 1e-6);
    }

    #[test]
    fn test_reproject_zero_disparity_is_rejected() {
        let calib = CalibrationSet::identity(8, 8, stereo_reprojection(100.0, 4.0, 4.0, 0.1));
        assert_eq!(calib.reproject(UVec2::new(1, 1), 0.0), None);
    }
}
