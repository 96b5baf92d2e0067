// This file contains the code for writing the YAML files of metrics and warnings.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::log::warning;
use crate::matrix::DistanceMatrix;


#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct SimilarityMetrics {
    pub batch: String,
    pub sequence_count: usize,
    pub alignment_record_count: usize,
    pub skipped_record_count: usize,
    pub self_hit_count: usize,
    pub missing_pair_count: usize,
    pub cluster_count: usize,
    pub singleton_count: usize,
    pub largest_cluster_size: usize,
    pub root_height: f64,
}

impl SimilarityMetrics {
    pub fn new(batch: &str) -> Self {
        SimilarityMetrics { batch: batch.to_string(), ..Default::default() }
    }

    pub fn set_cluster_sizes(&mut self, clusters: &[Vec<String>]) {
        self.cluster_count = clusters.len();
        self.singleton_count = clusters.iter().filter(|c| c.len() == 1).count();
        self.largest_cluster_size = clusters.iter().map(|c| c.len()).max().unwrap_or(0);
    }

    pub fn save_to_yaml(&self, filename: &Path) -> Result<()> { save_yaml(filename, self) }
}


#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct TreeDistanceMetrics {
    pub tree_count: usize,
    pub rejected_tree_count: usize,
    pub comparable_pair_count: usize,
    pub undefined_pair_count: usize,
    pub mean_rf: Option<f64>,
    pub mean_bsd: Option<f64>,
}

impl TreeDistanceMetrics {
    pub fn new(rf: &DistanceMatrix, bsd: &DistanceMatrix, rejected_tree_count: usize) -> Self {
        let n = rf.len();
        let undefined_pair_count = rf.undefined_pair_count();
        TreeDistanceMetrics {
            tree_count: n,
            rejected_tree_count,
            comparable_pair_count: n * n.saturating_sub(1) / 2 - undefined_pair_count,
            undefined_pair_count,
            mean_rf: rf.mean_defined(),
            mean_bsd: bsd.mean_defined(),
        }
    }

    pub fn save_to_yaml(&self, filename: &Path) -> Result<()> { save_yaml(filename, self) }
}


/// Everything a run recovered from (skipped records, rejected trees, clusterings that could not
/// be built), so nothing is dropped silently.
#[derive(Serialize, Deserialize, Debug, Default, PartialEq)]
pub struct RunReport {
    pub warnings: Vec<String>,
}

impl RunReport {
    pub fn new() -> Self { Self::default() }

    /// Records a warning and prints it.
    pub fn add(&mut self, message: String) {
        warning(&message);
        self.warnings.push(message);
    }

    pub fn is_empty(&self) -> bool {
        self.warnings.is_empty()
    }

    pub fn save_to_yaml(&self, filename: &Path) -> Result<()> { save_yaml(filename, self) }
}


fn save_yaml<T: Serialize>(yaml_filename: &Path, data: &T) -> Result<()> {
    let yaml_string = serde_yaml::to_string(data).map_err(|e| PipelineError::Output {
        path: yaml_filename.to_path_buf(), message: e.to_string() })?;
    let mut file = File::create(yaml_filename).map_err(|e| PipelineError::io(yaml_filename, e))?;
    file.write_all(yaml_string.as_bytes()).map_err(|e| PipelineError::io(yaml_filename, e))?;
    Ok(())
}
