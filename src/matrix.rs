// This file contains the square symmetric distance matrix shared by the similarity clustering,
// tree distance and tree clustering stages, along with its CSV/PHYLIP input and output.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use csv::{ReaderBuilder, WriterBuilder};
use std::fs::File;
use std::io::Write;
use std::path::Path;

use crate::error::{PipelineError, Result};


/// How an undefined entry (e.g. two trees with too few shared leaves) is written to file.
pub const UNDEFINED_TEXT: &str = "NA";


/// A square, symmetric matrix with a zero diagonal. Entries are `None` where the distance is
/// undefined. Labels give the row/column order and never change after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct DistanceMatrix {
    labels: Vec<String>,
    values: Vec<Option<f64>>,
}

impl DistanceMatrix {
    /// Creates a matrix with every off-diagonal entry undefined.
    pub fn new(labels: Vec<String>) -> Self {
        let n = labels.len();
        let mut values = vec![None; n * n];
        for i in 0..n {
            values[i * n + i] = Some(0.0);
        }
        DistanceMatrix { labels, values }
    }

    /// Builds a matrix from labels and a function giving the distance for each pair i < j.
    pub fn from_fn<F>(labels: Vec<String>, mut distance: F) -> Self
            where F: FnMut(usize, usize) -> Option<f64> {
        let mut matrix = DistanceMatrix::new(labels);
        let n = matrix.len();
        for i in 0..n {
            for j in i + 1..n {
                matrix.set(i, j, distance(i, j));
            }
        }
        matrix
    }

    pub fn len(&self) -> usize {
        self.labels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn labels(&self) -> &[String] {
        &self.labels
    }

    pub fn get(&self, i: usize, j: usize) -> Option<f64> {
        self.values[i * self.len() + j]
    }

    /// Sets both (i, j) and (j, i), so the matrix can't become asymmetric. The diagonal is fixed
    /// at zero.
    pub fn set(&mut self, i: usize, j: usize, value: Option<f64>) {
        if i == j { return; }
        let n = self.len();
        self.values[i * n + j] = value;
        self.values[j * n + i] = value;
    }

    /// The first pair (in row order) with an undefined distance, if any.
    pub fn first_undefined_pair(&self) -> Option<(usize, usize)> {
        let n = self.len();
        for i in 0..n {
            for j in i + 1..n {
                if self.get(i, j).is_none() {
                    return Some((i, j));
                }
            }
        }
        None
    }

    pub fn undefined_pair_count(&self) -> usize {
        let n = self.len();
        (0..n).map(|i| (i + 1..n).filter(|&j| self.get(i, j).is_none()).count()).sum()
    }

    /// Mean of the defined off-diagonal entries.
    pub fn mean_defined(&self) -> Option<f64> {
        let n = self.len();
        let defined: Vec<f64> = (0..n).flat_map(|i| (i + 1..n).map(move |j| (i, j)))
            .filter_map(|(i, j)| self.get(i, j)).collect();
        if defined.is_empty() { return None; }
        Some(defined.iter().sum::<f64>() / defined.len() as f64)
    }

    pub fn save_csv(&self, filename: &Path) -> Result<()> {
        let mut writer = WriterBuilder::new().from_path(filename)
            .map_err(|e| PipelineError::csv(filename, e))?;
        let mut header = vec![String::new()];
        header.extend(self.labels.iter().cloned());
        writer.write_record(&header).map_err(|e| PipelineError::csv(filename, e))?;
        for (i, label) in self.labels.iter().enumerate() {
            let mut row = vec![label.clone()];
            row.extend((0..self.len()).map(|j| format_entry(self.get(i, j))));
            writer.write_record(&row).map_err(|e| PipelineError::csv(filename, e))?;
        }
        writer.flush().map_err(|e| PipelineError::io(filename, e))?;
        Ok(())
    }

    pub fn load_csv(filename: &Path) -> Result<Self> {
        let file = File::open(filename).map_err(|e| PipelineError::io(filename, e))?;
        let name = filename.display().to_string();
        let corrupt = |message: String| PipelineError::CorruptInput { file: name.clone(), message };
        let mut reader = ReaderBuilder::new().has_headers(false).flexible(true).from_reader(file);
        let mut rows = Vec::new();
        for result in reader.records() {
            rows.push(result.map_err(|e| PipelineError::csv(filename, e))?);
        }
        if rows.is_empty() {
            return Err(corrupt("matrix file is empty".to_string()));
        }
        let labels: Vec<String> = rows[0].iter().skip(1).map(|s| s.to_string()).collect();
        let n = labels.len();
        if rows.len() != n + 1 {
            return Err(corrupt(format!("header has {} labels but there are {} rows",
                                       n, rows.len() - 1)));
        }
        let mut values = vec![None; n * n];
        for (i, row) in rows.iter().skip(1).enumerate() {
            if row.len() != n + 1 {
                return Err(corrupt(format!("row {} has {} cells, expected {}", i + 1, row.len(),
                                           n + 1)));
            }
            if row[0] != labels[i] {
                return Err(corrupt(format!("row label {} does not match column label {}",
                                           &row[0], labels[i])));
            }
            for j in 0..n {
                values[i * n + j] = parse_entry(&row[j + 1])
                    .map_err(|_| corrupt(format!("'{}' is not a distance", &row[j + 1])))?;
            }
        }
        let matrix = DistanceMatrix { labels, values };
        matrix.validate().map_err(corrupt)?;
        Ok(matrix)
    }

    /// Saves the matrix as tab-delimited PHYLIP-style text: a count line, then one row per label.
    pub fn save_phylip(&self, filename: &Path) -> Result<()> {
        let mut f = File::create(filename).map_err(|e| PipelineError::io(filename, e))?;
        let mut text = format!("{}\n", self.len());
        for (i, label) in self.labels.iter().enumerate() {
            text.push_str(label);
            for j in 0..self.len() {
                match self.get(i, j) {
                    Some(d) => text.push_str(&format!("\t{:.8}", d)),
                    None => text.push_str(&format!("\t{}", UNDEFINED_TEXT)),
                }
            }
            text.push('\n');
        }
        f.write_all(text.as_bytes()).map_err(|e| PipelineError::io(filename, e))
    }

    /// Checks the matrix invariants: zero diagonal, symmetry, non-negative finite entries and
    /// unique labels.
    pub fn validate(&self) -> std::result::Result<(), String> {
        let n = self.len();
        for i in 0..n {
            if self.get(i, i) != Some(0.0) {
                return Err(format!("diagonal entry for {} is not zero", self.labels[i]));
            }
            for j in 0..n {
                if self.get(i, j) != self.get(j, i) {
                    return Err(format!("{} vs {} is not symmetrical", self.labels[i],
                                       self.labels[j]));
                }
                if let Some(d) = self.get(i, j) {
                    if !d.is_finite() || d < 0.0 {
                        return Err(format!("{} vs {} is not a non-negative number",
                                           self.labels[i], self.labels[j]));
                    }
                }
            }
            if self.labels[..i].contains(&self.labels[i]) {
                return Err(format!("duplicate label {}", self.labels[i]));
            }
        }
        Ok(())
    }
}


fn format_entry(value: Option<f64>) -> String {
    match value {
        Some(d) => format!("{}", d),
        None => UNDEFINED_TEXT.to_string(),
    }
}


fn parse_entry(text: &str) -> std::result::Result<Option<f64>, std::num::ParseFloatError> {
    let text = text.trim();
    if text == UNDEFINED_TEXT || text.is_empty() {
        return Ok(None);
    }
    text.parse::<f64>().map(Some)
}
