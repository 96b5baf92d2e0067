// This file contains the code for the neighborhoods distance subcommand, which builds the RF and
// BSD distance matrices for a directory of trees.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::log::{section_header, explanation};
use crate::matrix::DistanceMatrix;
use crate::metrics::{RunReport, TreeDistanceMetrics};
use crate::misc::{check_if_dir_exists, check_if_dir_is_not_dir, create_dir, format_float,
                  quit_with_error, set_thread_count};
use crate::tree::{LoadedTrees, load_tree_dir};
use crate::tree_distance::{DistanceSettings, RfWeighting, distance_matrices};


pub fn distance(tree_dir: PathBuf, out_dir: PathBuf, rf_weighting: RfWeighting,
                missing_support: f64, threads: usize) {
    check_settings(&tree_dir, &out_dir, missing_support, threads);
    starting_message();
    print_settings(&tree_dir, &out_dir, rf_weighting, missing_support, threads);
    create_dir(&out_dir);
    let settings = DistanceSettings { rf_weighting, missing_support };
    let mut report = RunReport::new();
    let (rf_csv, bsd_csv) = distance_stage(&tree_dir, &out_dir, &settings, &mut report)
        .unwrap_or_else(|e| quit_with_error(&e.to_string()));
    let report_yaml = out_dir.join("warnings.yaml");
    report.save_to_yaml(&report_yaml).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    finished_message(&rf_csv, &bsd_csv, &report_yaml);
}


pub fn check_settings(tree_dir: &Path, out_dir: &Path, missing_support: f64, threads: usize) {
    check_if_dir_exists(tree_dir);
    check_if_dir_is_not_dir(out_dir);
    if !(0.0..=1.0).contains(&missing_support) {
        quit_with_error("--missing_support must be between 0 and 1 (inclusive)");
    }
    if threads < 1   { quit_with_error("--threads cannot be less than 1"); }
    if threads > 100 { quit_with_error("--threads cannot be greater than 100"); }
    set_thread_count(threads);
}


fn starting_message() {
    section_header("Starting neighborhoods distance");
    explanation("This command loads a directory of Newick trees (*.treefile) and computes the \
                 pairwise weighted Robinson-Foulds distance and bootstrap support distance (BSD) \
                 between them.");
}


pub fn print_settings(tree_dir: &Path, out_dir: &Path, rf_weighting: RfWeighting,
                      missing_support: f64, threads: usize) {
    eprintln!("Settings:");
    eprintln!("  --tree_dir {}", tree_dir.display());
    eprintln!("  --out_dir {}", out_dir.display());
    eprintln!("  --rf_weighting {}", match rf_weighting {
        RfWeighting::Length => "length", RfWeighting::Topology => "topology" });
    eprintln!("  --missing_support {}", format_float(missing_support));
    eprintln!("  --threads {}", threads);
    eprintln!();
}


fn finished_message(rf_csv: &Path, bsd_csv: &Path, report_yaml: &Path) {
    section_header("Finished!");
    explanation("You can now run neighborhoods treecluster on the distance matrices.");
    eprintln!("RF distances:  {}", rf_csv.display());
    eprintln!("BSD distances: {}", bsd_csv.display());
    eprintln!("Warnings:      {}", report_yaml.display());
    eprintln!();
}


/// Loads the trees, builds both matrices and saves them (with metrics) to the output directory.
/// Returns the paths of the two matrix files.
pub fn distance_stage(tree_dir: &Path, out_dir: &Path, settings: &DistanceSettings,
                      report: &mut RunReport) -> Result<(PathBuf, PathBuf)> {
    let loaded = load_trees(tree_dir, report)?;
    let (rf, bsd) = build_matrices(&loaded, settings, report);
    let rf_csv = out_dir.join("rf_matrix.csv");
    let bsd_csv = out_dir.join("bsd_matrix.csv");
    rf.save_csv(&rf_csv)?;
    bsd.save_csv(&bsd_csv)?;
    TreeDistanceMetrics::new(&rf, &bsd, loaded.rejected.len())
        .save_to_yaml(&out_dir.join("tree_distance_metrics.yaml"))?;
    Ok((rf_csv, bsd_csv))
}


fn load_trees(tree_dir: &Path, report: &mut RunReport) -> Result<LoadedTrees> {
    section_header("Loading trees");
    explanation("Each tree is labelled by its file name (up to the first dot). Trees which can't \
                 be parsed or which have fewer than four leaves are skipped.");
    let loaded = load_tree_dir(tree_dir)?;
    for tree in &loaded.trees {
        eprintln!("{}: {} leaves", tree.label, tree.leaf_count());
    }
    eprintln!();
    for e in &loaded.rejected {
        report.add(format!("tree rejected: {}", e));
    }
    Ok(loaded)
}


fn build_matrices(loaded: &LoadedTrees, settings: &DistanceSettings, report: &mut RunReport)
        -> (DistanceMatrix, DistanceMatrix) {
    section_header("Comparing trees");
    explanation("Each pair of trees is compared on the leaves they share. Pairs sharing fewer \
                 than four leaves have no defined distance and are written as NA.");
    let (rf, bsd) = distance_matrices(&loaded.trees, settings);
    let undefined = rf.undefined_pair_count();
    let total = rf.len() * (rf.len() - 1) / 2;
    eprintln!("{} tree pairs compared", total);
    if undefined > 0 {
        report.add(format!("{} of {} tree pairs share too few leaves for a distance",
                           undefined, total));
    }
    eprintln!();
    (rf, bsd)
}
