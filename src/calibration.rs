//! Typed view of the factory calibration JSON.
//!
//! The blob stores intrinsics in the Rational6KT lens model with unitized,
//! 0-cornered parameters: principal point and focal length are divided by
//! the sensor dimensions and (0, 0) is the corner of the top-left pixel.
//! Parsing converts them to pixel units centered on the top-left pixel, the
//! convention computer-vision consumers expect.

use serde::Deserialize;

use crate::{Result, WmrError};

const LENS_MODEL_RATIONAL_6KT: &str = "CALIBRATION_LensDistortionModelRational6KT";
const MODEL_PARAMETER_COUNT: usize = 15;

/// Calibration of a single tracking camera.
#[derive(Debug, Clone, PartialEq)]
pub struct CameraCalibration {
    pub width: u32,
    pub height: u32,
    /// Row-major 3x3 camera matrix `[fx 0 cx; 0 fy cy; 0 0 1]`, in pixels.
    pub camera_matrix: [f64; 9],
    /// Distortion coefficients `[k1 k2 p1 p2 k3 k4 k5 k6]`.
    pub dist_coeffs: [f64; 8],
    /// Row-major rotation of the camera relative to the headset.
    pub rotation: [f64; 9],
    /// Translation in meters.
    pub translation: [f64; 3],
}

/// All per-camera calibrations carried by the device.
#[derive(Debug, Clone)]
pub struct Calibration {
    cameras: Vec<CameraCalibration>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CalibrationFile {
    calibration_information: CalibrationInformation,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CalibrationInformation {
    cameras: Vec<CameraEntry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct CameraEntry {
    sensor_width: u32,
    sensor_height: u32,
    intrinsics: Intrinsics,
    rt: Rt,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Intrinsics {
    model_type: String,
    model_parameter_count: usize,
    model_parameters: Vec<f64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "PascalCase")]
struct Rt {
    rotation: Vec<f64>,
    translation: Vec<f64>,
}

impl Calibration {
    /// Parse calibration JSON as returned by
    /// [`crate::firmware::OasisHid::read_calibration`].
    pub fn parse_json(json: &str) -> Result<Calibration> {
        let file: CalibrationFile = serde_json::from_str(json)?;

        let cameras = file
            .calibration_information
            .cameras
            .into_iter()
            .map(convert_camera)
            .collect::<Result<Vec<_>>>()?;

        Ok(Calibration { cameras })
    }

    pub fn cameras(&self) -> &[CameraCalibration] {
        &self.cameras
    }
}

fn convert_camera(entry: CameraEntry) -> Result<CameraCalibration> {
    let intrinsics = &entry.intrinsics;
    if intrinsics.model_type != LENS_MODEL_RATIONAL_6KT {
        return Err(WmrError::Unsupported(format!(
            "camera calibration model {:?}",
            intrinsics.model_type
        )));
    }
    if intrinsics.model_parameter_count != MODEL_PARAMETER_COUNT
        || intrinsics.model_parameters.len() != MODEL_PARAMETER_COUNT
    {
        return Err(WmrError::Unsupported(format!(
            "unexpected ModelParameterCount ({})",
            intrinsics.model_parameter_count
        )));
    }

    let p = &intrinsics.model_parameters;
    let width = f64::from(entry.sensor_width);
    let height = f64::from(entry.sensor_height);

    // Pixelize and move the origin to the center of the top-left pixel.
    let cx = p[0] * width - 0.5;
    let cy = p[1] * height - 0.5;
    let fx = p[2] * width;
    let fy = p[3] * height;

    #[rustfmt::skip]
    let camera_matrix = [
        fx,  0.0, cx,
        0.0, fy,  cy,
        0.0, 0.0, 1.0,
    ];

    // [4..9] are k1..k6; [12] is p2 and [13] is p1.
    let dist_coeffs = [p[4], p[5], p[13], p[12], p[6], p[7], p[8], p[9]];

    if entry.rt.rotation.len() != 9 {
        return Err(WmrError::Unsupported(format!(
            "Rt.Rotation has {} elements",
            entry.rt.rotation.len()
        )));
    }
    if entry.rt.translation.len() != 3 {
        return Err(WmrError::Unsupported(format!(
            "Rt.Translation has {} elements",
            entry.rt.translation.len()
        )));
    }
    let mut rotation = [0.0; 9];
    rotation.copy_from_slice(&entry.rt.rotation);
    let mut translation = [0.0; 3];
    translation.copy_from_slice(&entry.rt.translation);

    Ok(CameraCalibration {
        width: entry.sensor_width,
        height: entry.sensor_height,
        camera_matrix,
        dist_coeffs,
        rotation,
        translation,
    })
}
