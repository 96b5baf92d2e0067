// This file contains the code for the neighborhoods cluster subcommand.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use colored::Colorize;
use fxhash::FxHashMap;
use rayon::prelude::*;
use std::fs::create_dir_all;
use std::path::{Path, PathBuf};

use crate::alignment::{ParseSettings, load_alignments};
use crate::error::{PipelineError, Result};
use crate::log::{section_header, explanation};
use crate::metrics::{RunReport, SimilarityMetrics};
use crate::misc::{check_if_dir_is_not_dir, check_if_file_exists, create_dir, file_label,
                  format_float, load_fasta, quit_with_error, set_thread_count, spinner,
                  stop_if_interrupted};
use crate::similarity::{SimilaritySettings, aligned_sequences, cluster_name, cluster_records,
                        save_cluster_fasta, save_cluster_tsv};


/// What one alignment batch produced, kept so it can be reported after the parallel work.
pub struct BatchOutcome {
    pub name: String,
    pub dir: PathBuf,
    pub clusters: Vec<Vec<String>>,
    pub metrics: SimilarityMetrics,
    pub warnings: Vec<String>,
}


pub fn cluster(alignments: Vec<PathBuf>, out_dir: PathBuf, fasta: Vec<PathBuf>,
               min_identity: f64, no_hit_distance: f64, max_error_rate: f64, threads: usize) {
    check_settings(&alignments, &out_dir, &fasta, min_identity, no_hit_distance, max_error_rate,
                   threads);
    starting_message();
    print_settings(&alignments, &out_dir, &fasta, min_identity, no_hit_distance, max_error_rate,
                   threads);
    create_dir(&out_dir);
    let parse_settings = ParseSettings { max_error_rate };
    let similarity_settings = SimilaritySettings { min_identity, no_hit_distance };
    let mut report = RunReport::new();
    let sequences = load_sequences(&fasta, &mut report);
    stop_if_interrupted("clustering");
    let results = cluster_batches(&alignments, &out_dir, &parse_settings, &similarity_settings,
                                  sequences.as_ref());
    let succeeded = print_batches(&alignments, results, &mut report);
    let report_yaml = out_dir.join("warnings.yaml");
    if let Err(e) = report.save_to_yaml(&report_yaml) {
        quit_with_error(&e.to_string());
    }
    if succeeded == 0 {
        quit_with_error("no alignment batch could be clustered");
    }
    finished_message(&out_dir, &report_yaml);
}


fn check_settings(alignments: &[PathBuf], out_dir: &Path, fasta: &[PathBuf], min_identity: f64,
                  no_hit_distance: f64, max_error_rate: f64, threads: usize) {
    if alignments.is_empty() { quit_with_error("at least one alignment file is required"); }
    for f in alignments.iter().chain(fasta) {
        check_if_file_exists(f);
    }
    check_if_dir_is_not_dir(out_dir);
    if !(0.0..=100.0).contains(&min_identity) {
        quit_with_error("--min_identity must be between 0 and 100 (inclusive)");
    }
    if no_hit_distance < 100.0 { quit_with_error("--no_hit_distance cannot be less than 100"); }
    if !(0.0..=1.0).contains(&max_error_rate) {
        quit_with_error("--max_error_rate must be between 0 and 1 (inclusive)");
    }
    if threads < 1   { quit_with_error("--threads cannot be less than 1"); }
    if threads > 100 { quit_with_error("--threads cannot be greater than 100"); }
    set_thread_count(threads);
}


fn starting_message() {
    section_header("Starting neighborhoods cluster");
    explanation("This command takes tabular all-vs-all alignments of neighborhood sequences (one \
                 file per batch) and clusters the sequences in each batch by their identity using \
                 UPGMA. Each resulting cluster is saved as a FASTA file, ready for tree \
                 inference.");
}


fn print_settings(alignments: &[PathBuf], out_dir: &Path, fasta: &[PathBuf], min_identity: f64,
                  no_hit_distance: f64, max_error_rate: f64, threads: usize) {
    eprintln!("Settings:");
    eprintln!("  --alignments {}", alignments.iter().map(|f| f.display().to_string())
                                                 .collect::<Vec<_>>().join(" "));
    eprintln!("  --out_dir {}", out_dir.display());
    if !fasta.is_empty() {
        eprintln!("  --fasta {}", fasta.iter().map(|f| f.display().to_string())
                                        .collect::<Vec<_>>().join(" "));
    }
    eprintln!("  --min_identity {}", format_float(min_identity));
    eprintln!("  --no_hit_distance {}", format_float(no_hit_distance));
    eprintln!("  --max_error_rate {}", format_float(max_error_rate));
    eprintln!("  --threads {}", threads);
    eprintln!();
}


fn finished_message(out_dir: &Path, report_yaml: &Path) {
    section_header("Finished!");
    explanation("Each batch now has a directory containing its pairwise distances, clustering \
                 tree and one FASTA file per cluster.");
    eprintln!("Output directory: {}", out_dir.display());
    eprintln!("Warnings:         {}", report_yaml.display());
    eprintln!();
}


fn load_sequences(fasta: &[PathBuf], report: &mut RunReport)
        -> Option<FxHashMap<String, String>> {
    if fasta.is_empty() { return None; }
    section_header("Loading sequences");
    explanation("Full-length sequences are loaded from the given FASTA files. When a sequence \
                 name occurs in more than one file, the first is used.");
    let mut sequences = FxHashMap::default();
    for f in fasta {
        let records = load_fasta(f).unwrap_or_else(|e| quit_with_error(&e.to_string()));
        eprintln!("{}: {} sequences", f.display(), records.len());
        for (name, _, seq) in records {
            if sequences.contains_key(&name) {
                report.add(format!("{} occurs in more than one FASTA file", name));
            } else {
                sequences.insert(name, seq);
            }
        }
    }
    eprintln!();
    Some(sequences)
}


/// Runs every batch on the rayon pool. Batches are independent, so one that fails doesn't stop
/// the others.
pub fn cluster_batches(alignments: &[PathBuf], out_dir: &Path, parse_settings: &ParseSettings,
                       similarity_settings: &SimilaritySettings,
                       sequences: Option<&FxHashMap<String, String>>) -> Vec<Result<BatchOutcome>> {
    section_header("Clustering sequences");
    explanation("Pairwise distances are 100 minus the percent identity of each pair's best \
                 alignment. Sequences are then organised into a tree using UPGMA and clusters \
                 are defined from the tree using the identity cutoff.");
    let pb = spinner("clustering batches...");
    let results = alignments.par_iter().map(|f| {
        cluster_batch(f, out_dir, parse_settings, similarity_settings, sequences)
    }).collect();
    pb.finish_and_clear();
    results
}


pub fn cluster_batch(alignment_file: &Path, out_dir: &Path, parse_settings: &ParseSettings,
                     similarity_settings: &SimilaritySettings,
                     sequences: Option<&FxHashMap<String, String>>) -> Result<BatchOutcome> {
    let name = file_label(alignment_file);
    let parsed = load_alignments(alignment_file, parse_settings)?;
    let mut warnings: Vec<String> = parsed.errors.iter()
        .map(|e| format!("skipped {}", PipelineError::from(e.clone()))).collect();
    let result = cluster_records(&parsed.records, &alignment_file.display().to_string(),
                                 similarity_settings)?;

    let dir = out_dir.join(&name);
    let clusters_dir = dir.join("clusters");
    create_dir_all(&clusters_dir).map_err(|e| PipelineError::io(&clusters_dir, e))?;
    result.matrix.save_phylip(&dir.join("pairwise_distances.phylip"))?;
    let newick = dir.join("clustering.newick");
    std::fs::write(&newick, format!("{}\n", result.dendrogram.to_newick()))
        .map_err(|e| PipelineError::io(&newick, e))?;
    save_cluster_tsv(&result.clusters, &dir.join("clusters.tsv"))?;

    let aligned;
    let sequences = match sequences {
        Some(s) => s,
        None => { aligned = aligned_sequences(&parsed.records); &aligned }
    };
    for (i, cluster) in result.clusters.iter().enumerate() {
        let fasta = clusters_dir.join(format!("{}.fasta", cluster_name(i + 1)));
        for id in save_cluster_fasta(cluster, sequences, &fasta)? {
            warnings.push(format!("{}: no sequence for {}", name, id));
        }
    }

    let mut metrics = SimilarityMetrics::new(&name);
    metrics.sequence_count = result.matrix.len();
    metrics.alignment_record_count = parsed.records.len();
    metrics.skipped_record_count = parsed.errors.len();
    metrics.self_hit_count = parsed.records.iter().filter(|r| r.is_self_hit()).count();
    metrics.missing_pair_count = result.missing_pair_count;
    metrics.root_height = result.dendrogram.root.height;
    metrics.set_cluster_sizes(&result.clusters);
    metrics.save_to_yaml(&dir.join("similarity_metrics.yaml"))?;

    Ok(BatchOutcome { name, dir, clusters: result.clusters, metrics, warnings })
}


fn print_batches(alignments: &[PathBuf], results: Vec<Result<BatchOutcome>>,
                 report: &mut RunReport) -> usize {
    let mut succeeded = 0;
    for (file, result) in alignments.iter().zip(results) {
        match result {
            Ok(outcome) => {
                eprintln!("{}:", outcome.name.bold());
                eprintln!("  {} sequences, {} records ({} skipped)", outcome.metrics.sequence_count,
                          outcome.metrics.alignment_record_count,
                          outcome.metrics.skipped_record_count);
                for (i, cluster) in outcome.clusters.iter().enumerate() {
                    let line = format!("  {}: {}", cluster_name(i + 1), cluster.join(", "));
                    if cluster.len() == 1 { eprintln!("{}", line.dimmed()); }
                    else                  { eprintln!("{}", line); }
                }
                eprintln!("  {}", outcome.dir.display());
                eprintln!();
                for w in outcome.warnings {
                    report.add(w);
                }
                succeeded += 1;
            }
            Err(e) => {
                eprintln!("{}", format!("{}: failed: {}", file.display(), e).red());
                eprintln!();
                report.add(format!("{}: {}", file.display(), e));
            }
        }
    }
    succeeded
}
