// This file contains the code for the neighborhoods treecluster and trees subcommands, which
// cluster trees by their RF/BSD distances with UPGMA and neighbor joining.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use ab_glyph::FontArc;
use colored::Colorize;
use rayon::prelude::*;
use std::path::{Path, PathBuf};

use crate::dendrogram::upgma;
use crate::distance::distance_stage;
use crate::error::Result;
use crate::log::{section_header, explanation};
use crate::matrix::DistanceMatrix;
use crate::metrics::RunReport;
use crate::misc::{check_if_dir_is_not_dir, check_if_file_exists, create_dir, file_label,
                  quit_with_error, spinner, stop_if_interrupted};
use crate::nj::neighbor_joining;
use crate::render::{load_font, render_tree, save_tree_files};
use crate::tree::PhyloTree;
use crate::tree_distance::{DistanceSettings, RfWeighting};


#[derive(Clone)]
pub struct ClusterSettings {
    /// Add a root halfway along the last neighbor-joining edge instead of leaving the tree
    /// unrooted.
    pub root_nj: bool,
    pub res: u32,
    pub font: Option<FontArc>,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        ClusterSettings { root_nj: false, res: 2000, font: None }
    }
}


/// The files written for one clustering tree.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterTreeFiles {
    pub newick: PathBuf,
    pub json: PathBuf,
    pub png: PathBuf,
}


pub fn treecluster(matrices: Vec<PathBuf>, out_dir: PathBuf, root_nj: bool, res: u32,
                   font: Option<PathBuf>) {
    check_settings(&matrices, &out_dir, res, &font);
    starting_message();
    print_settings(Some(&matrices), &out_dir, root_nj, res, &font);
    create_dir(&out_dir);
    let settings = build_settings(root_nj, res, &font);
    let mut loaded = Vec::new();
    for m in &matrices {
        let matrix = DistanceMatrix::load_csv(m).unwrap_or_else(|e| quit_with_error(&e.to_string()));
        loaded.push((metric_name(m), matrix));
    }
    let mut report = RunReport::new();
    let written = clustering_stage(&loaded, &out_dir, &settings, &mut report);
    let report_yaml = out_dir.join("warnings.yaml");
    report.save_to_yaml(&report_yaml).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    if written.is_empty() {
        quit_with_error("no cluster tree could be built");
    }
    finished_message(&written, &report, &report_yaml);
}


#[allow(clippy::too_many_arguments)]
pub fn trees(tree_dir: PathBuf, out_dir: PathBuf, rf_weighting: RfWeighting,
             missing_support: f64, root_nj: bool, res: u32, font: Option<PathBuf>,
             threads: usize) {
    crate::distance::check_settings(&tree_dir, &out_dir, missing_support, threads);
    check_render_settings(res, &font);
    section_header("Starting neighborhoods trees");
    explanation("This command computes RF and BSD distances between a directory of trees and \
                 then clusters the trees using both matrices, with both UPGMA and neighbor \
                 joining.");
    crate::distance::print_settings(&tree_dir, &out_dir, rf_weighting, missing_support, threads);
    print_settings(None, &out_dir, root_nj, res, &font);
    create_dir(&out_dir);
    let cluster_settings = build_settings(root_nj, res, &font);
    let distance_settings = DistanceSettings { rf_weighting, missing_support };
    let mut report = RunReport::new();
    let (rf_csv, bsd_csv) = distance_stage(&tree_dir, &out_dir, &distance_settings, &mut report)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    stop_if_interrupted("tree clustering");

    // The matrices are read back from file so both subcommands cluster exactly what was saved.
    let load = |p: &Path| DistanceMatrix::load_csv(p).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    let (rf, bsd) = (load(&rf_csv), load(&bsd_csv));
    let written = cluster_rf_and_bsd(rf, bsd, &out_dir, &cluster_settings, &mut report);
    let report_yaml = out_dir.join("warnings.yaml");
    report.save_to_yaml(&report_yaml).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    finished_message(&written, &report, &report_yaml);
}


fn check_settings(matrices: &[PathBuf], out_dir: &Path, res: u32, font: &Option<PathBuf>) {
    if matrices.is_empty() { quit_with_error("at least one distance matrix is required"); }
    for m in matrices {
        check_if_file_exists(m);
    }
    check_if_dir_is_not_dir(out_dir);
    check_render_settings(res, font);
}


fn check_render_settings(res: u32, font: &Option<PathBuf>) {
    if let Some(f) = font { check_if_file_exists(f); }
    if res < 100   { quit_with_error("--res cannot be less than 100"); }
    if res > 10000 { quit_with_error("--res cannot be greater than 10000"); }
}


fn starting_message() {
    section_header("Starting neighborhoods treecluster");
    explanation("This command takes one or more tree distance matrices (made by neighborhoods \
                 distance) and clusters the trees with both UPGMA and neighbor joining.");
}


fn print_settings(matrices: Option<&[PathBuf]>, out_dir: &Path, root_nj: bool, res: u32,
                  font: &Option<PathBuf>) {
    eprintln!("Settings:");
    if let Some(matrices) = matrices {
        eprintln!("  --matrices {}", matrices.iter().map(|m| m.display().to_string())
                                             .collect::<Vec<_>>().join(" "));
        eprintln!("  --out_dir {}", out_dir.display());
    }
    if root_nj { eprintln!("  --root_nj"); }
    eprintln!("  --res {}", res);
    match font {
        Some(f) => eprintln!("  --font {}", f.display()),
        None    => eprintln!("  --font none (images will have no text)"),
    }
    eprintln!();
}


fn finished_message(written: &[ClusterTreeFiles], report: &RunReport, report_yaml: &Path) {
    section_header("Finished!");
    if !report.is_empty() {
        explanation("Some inputs were skipped or some cluster trees could not be built. The \
                     reasons are listed in the warnings file.");
    }
    for files in written {
        eprintln!("{}", files.png.display());
    }
    eprintln!("Warnings: {}", report_yaml.display());
    eprintln!();
}


fn build_settings(root_nj: bool, res: u32, font: &Option<PathBuf>) -> ClusterSettings {
    let font = font.as_ref().map(|f| load_font(f).unwrap_or_else(|e| quit_with_error(&e.to_string())));
    ClusterSettings { root_nj, res, font }
}


/// The metric a matrix file holds, from its name: "rf_matrix.csv" -> "rf".
pub fn metric_name(matrix_file: &Path) -> String {
    let label = file_label(matrix_file);
    label.strip_suffix("_matrix").unwrap_or(&label).to_string()
}


/// Clusters each matrix on the rayon pool. A matrix that can't be clustered is reported and the
/// others carry on.
pub fn clustering_stage(matrices: &[(String, DistanceMatrix)], out_dir: &Path,
                        settings: &ClusterSettings, report: &mut RunReport) -> Vec<ClusterTreeFiles> {
    section_header("Clustering trees");
    explanation("Each distance matrix is clustered with UPGMA and with neighbor joining. A matrix \
                 with undefined distances (tree pairs sharing too few leaves) can't be clustered.");
    let pb = spinner("building cluster trees...");
    let results: Vec<_> = matrices.par_iter()
        .map(|(metric, matrix)| cluster_matrix(matrix, metric, out_dir, settings)).collect();
    pb.finish_and_clear();
    collect_results(results.into_iter().flatten().collect(), report)
}


/// The RF and BSD clusterings are independent tasks, so one failing doesn't stop the other.
pub fn cluster_rf_and_bsd(rf: DistanceMatrix, bsd: DistanceMatrix, out_dir: &Path,
                          settings: &ClusterSettings, report: &mut RunReport)
        -> Vec<ClusterTreeFiles> {
    section_header("Clustering trees");
    explanation("The RF and BSD matrices are each clustered with UPGMA and with neighbor \
                 joining.");
    let pb = spinner("building cluster trees...");
    let (rf_results, bsd_results) = rayon::join(
        || cluster_matrix(&rf, "rf", out_dir, settings),
        || cluster_matrix(&bsd, "bsd", out_dir, settings));
    pb.finish_and_clear();
    collect_results(rf_results.into_iter().chain(bsd_results).collect(), report)
}


fn collect_results(results: Vec<(String, Result<ClusterTreeFiles>)>, report: &mut RunReport)
        -> Vec<ClusterTreeFiles> {
    let mut written = Vec::new();
    for (name, result) in results {
        match result {
            Ok(files) => {
                eprintln!("{}: {}", name, "done".green());
                written.push(files);
            }
            Err(e) => {
                eprintln!("{}: {}", name, "failed".red());
                report.add(format!("{}: {}", name, e));
            }
        }
    }
    eprintln!();
    written
}


/// Builds the UPGMA and NJ trees for one matrix and saves them. Each method succeeds or fails
/// on its own, and each result is named "<method>_<metric>".
pub fn cluster_matrix(matrix: &DistanceMatrix, metric: &str, out_dir: &Path,
                      settings: &ClusterSettings) -> Vec<(String, Result<ClusterTreeFiles>)> {
    let upgma_name = format!("upgma_{}", metric);
    let nj_name = format!("nj_{}", metric);
    let upgma_tree = upgma(matrix).map(|d| d.to_phylo_tree(&upgma_name));
    let nj_tree = neighbor_joining(matrix, settings.root_nj, &nj_name);
    vec![
        (upgma_name.clone(), upgma_tree.and_then(|t| save_cluster_tree(&t, &upgma_name, out_dir, settings))),
        (nj_name.clone(), nj_tree.and_then(|t| save_cluster_tree(&t, &nj_name, out_dir, settings))),
    ]
}


fn save_cluster_tree(tree: &PhyloTree, name: &str, out_dir: &Path, settings: &ClusterSettings)
        -> Result<ClusterTreeFiles> {
    let files = ClusterTreeFiles { newick: out_dir.join(format!("{}.newick", name)),
                                   json: out_dir.join(format!("{}.json", name)),
                                   png: out_dir.join(format!("{}.png", name)) };
    save_tree_files(tree, &files.newick, &files.json)?;
    render_tree(tree, name, &files.png, settings.res, settings.font.as_ref())?;
    Ok(files)
}


#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn settings() -> ClusterSettings {
        ClusterSettings { res: 200, ..Default::default() }
    }

    fn labels(n: usize) -> Vec<String> {
        (1..=n).map(|i| format!("tree_{}", i)).collect()
    }

    #[test]
    fn test_metric_name() {
        assert_eq!(metric_name(Path::new("out/rf_matrix.csv")), "rf");
        assert_eq!(metric_name(Path::new("bsd_matrix.csv")), "bsd");
        assert_eq!(metric_name(Path::new("custom.csv")), "custom");
    }

    #[test]
    fn test_cluster_rf_and_bsd() {
        let dir = tempdir().unwrap();
        let rf = DistanceMatrix::from_fn(labels(4), |i, j| Some((j - i) as f64 / 4.0));
        let bsd = DistanceMatrix::from_fn(labels(4), |i, j| Some((i + j) as f64 / 10.0));
        let mut report = RunReport::new();
        let written = cluster_rf_and_bsd(rf, bsd, dir.path(), &settings(), &mut report);
        assert!(report.is_empty());
        assert_eq!(written.len(), 4);
        for name in ["upgma_rf", "nj_rf", "upgma_bsd", "nj_bsd"] {
            let png = dir.path().join(format!("{}.png", name));
            assert!(png.is_file());
            let newick = std::fs::read_to_string(dir.path().join(format!("{}.newick", name))).unwrap();
            let tree = PhyloTree::from_newick(&newick, name).unwrap();
            assert_eq!(tree.leaf_count(), 4);
        }
    }

    #[test]
    fn test_singular_matrix_does_not_stop_the_other() {
        let dir = tempdir().unwrap();
        let rf = DistanceMatrix::from_fn(labels(4), |i, j| if i == 0 && j == 3 { None } else { Some(0.5) });
        let bsd = DistanceMatrix::from_fn(labels(4), |_, _| Some(0.25));
        let mut report = RunReport::new();
        let written = cluster_rf_and_bsd(rf, bsd, dir.path(), &settings(), &mut report);
        assert_eq!(written.len(), 2);
        assert_eq!(report.warnings.len(), 2);
        assert!(report.warnings.iter().all(|w| w.contains("tree_1") && w.contains("tree_4")));
        assert!(dir.path().join("upgma_bsd.png").is_file());
        assert!(!dir.path().join("upgma_rf.png").exists());
    }

    #[test]
    fn test_clustering_stage_rooted_nj() {
        let dir = tempdir().unwrap();
        let m = DistanceMatrix::from_fn(labels(3), |i, j| Some((i + j) as f64));
        let rooted = ClusterSettings { root_nj: true, ..settings() };
        let mut report = RunReport::new();
        let written = clustering_stage(&[("rf".to_string(), m)], dir.path(), &rooted, &mut report);
        assert_eq!(written.len(), 2);
        let nj = std::fs::read_to_string(&written[1].newick).unwrap();
        let tree = PhyloTree::from_newick(&nj, "nj").unwrap();
        assert_eq!(tree.nodes[tree.root].children.len(), 2);
    }
}
