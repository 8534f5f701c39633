//! Read/write curve band JSON files.
//!
//! A band file is the portable output for plotting a bootstrap fit:
//! - model kind, point estimate and run metadata
//! - evaluation points with the point-estimate curve
//! - lower / median / upper percentile curves

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{ConfidenceInterval, ResamplingPolicy};
use crate::error::AppError;
use crate::models::{ModelKind, predict_all};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BandFile {
    pub tool: String,
    pub generated_at: DateTime<Utc>,
    pub model: ModelKind,
    pub params: Vec<f64>,
    pub param_names: Vec<String>,
    pub policy: ResamplingPolicy,
    pub n_straps: usize,
    /// Confidence level in percent.
    pub confidence: f64,
    pub xpts: Vec<f64>,
    pub fit: Vec<f64>,
    pub lower: Vec<f64>,
    pub median: Vec<f64>,
    pub upper: Vec<f64>,
}

impl BandFile {
    /// Assemble a band from per-point percentile intervals.
    pub fn new(
        model: ModelKind,
        params: &[f64],
        param_names: Vec<String>,
        policy: ResamplingPolicy,
        n_straps: usize,
        xpts: &[f64],
        band: &[ConfidenceInterval],
    ) -> Result<Self, AppError> {
        if band.len() != xpts.len() {
            return Err(AppError::input(format!(
                "Band has {} points but there are {} evaluation points.",
                band.len(),
                xpts.len()
            )));
        }
        Ok(Self {
            tool: "bfit".to_string(),
            generated_at: Utc::now(),
            model,
            params: params.to_vec(),
            param_names,
            policy,
            n_straps,
            confidence: band.first().map(|ci| ci.level).unwrap_or(f64::NAN),
            xpts: xpts.to_vec(),
            fit: predict_all(&model, xpts, params),
            lower: band.iter().map(|ci| ci.lower).collect(),
            median: band.iter().map(|ci| ci.central).collect(),
            upper: band.iter().map(|ci| ci.upper).collect(),
        })
    }
}

pub fn write_band_json(path: &Path, band: &BandFile) -> Result<(), AppError> {
    let file = File::create(path)
        .map_err(|e| AppError::input(format!("Failed to create band JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, band)
        .map_err(|e| AppError::input(format!("Failed to write band JSON: {e}")))?;
    Ok(())
}

pub fn read_band_json(path: &Path) -> Result<BandFile, AppError> {
    let file = File::open(path)
        .map_err(|e| AppError::input(format!("Failed to open band JSON '{}': {e}", path.display())))?;
    let band: BandFile =
        serde_json::from_reader(file).map_err(|e| AppError::input(format!("Invalid band JSON: {e}")))?;
    Ok(band)
}
