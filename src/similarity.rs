// This file contains the code for turning pairwise alignment identities into a distance matrix
// and clustering neighborhood sequences with it.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use csv::WriterBuilder;
use fxhash::FxHashMap;
use std::collections::BTreeSet;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

use crate::alignment::AlignmentRecord;
use crate::dendrogram::{Dendrogram, upgma};
use crate::error::{PipelineError, Result};
use crate::matrix::DistanceMatrix;


#[derive(Debug, Clone)]
pub struct SimilaritySettings {
    /// Sequences are only grouped if they merge at or above this percent identity.
    pub min_identity: f64,
    /// Distance given to a pair with no alignment, so it is never mistaken for a close pair.
    pub no_hit_distance: f64,
}

impl SimilaritySettings {
    /// The dendrogram height above which merges are split apart.
    pub fn cutoff(&self) -> f64 {
        100.0 - self.min_identity
    }
}

impl Default for SimilaritySettings {
    fn default() -> Self {
        SimilaritySettings { min_identity: 0.0, no_hit_distance: 200.0 }
    }
}


/// The clustering of one batch: the matrix it came from, the full dendrogram and the flat
/// clusters cut from it (largest first).
pub struct SimilarityClusters {
    pub matrix: DistanceMatrix,
    pub dendrogram: Dendrogram,
    pub clusters: Vec<Vec<String>>,
    pub missing_pair_count: usize,
}


/// Every sequence ID that appears as a query or subject, sorted. IDs that only have self-hits
/// are included so they still come out as singletons.
pub fn sequence_ids(records: &[AlignmentRecord]) -> Vec<String> {
    let ids: BTreeSet<&str> = records.iter()
        .flat_map(|r| [r.query_id.as_str(), r.subject_id.as_str()]).collect();
    ids.into_iter().map(|s| s.to_string()).collect()
}


fn pair_key<'a>(a: &'a str, b: &'a str) -> (&'a str, &'a str) {
    if a <= b { (a, b) } else { (b, a) }
}


fn is_better_alignment(a: &AlignmentRecord, b: &AlignmentRecord) -> bool {
    a.bit_score > b.bit_score ||
        (a.bit_score == b.bit_score && a.percent_identity > b.percent_identity)
}


/// The best alignment (highest bitscore, then highest identity) for each unordered pair of
/// distinct IDs. A-vs-B and B-vs-A hits count as the same pair.
pub fn best_alignments(records: &[AlignmentRecord]) -> FxHashMap<(&str, &str), &AlignmentRecord> {
    let mut best: FxHashMap<(&str, &str), &AlignmentRecord> = FxHashMap::default();
    for r in records.iter().filter(|r| !r.is_self_hit()) {
        let key = pair_key(&r.query_id, &r.subject_id);
        if best.get(&key).map_or(true, |existing| is_better_alignment(r, existing)) {
            best.insert(key, r);
        }
    }
    best
}


/// Builds the distance matrix (100 - percent identity) over all sequence IDs. Pairs without an
/// alignment get the no-hit distance. Also returns how many pairs that was.
pub fn similarity_matrix(records: &[AlignmentRecord], settings: &SimilaritySettings)
        -> (DistanceMatrix, usize) {
    let ids = sequence_ids(records);
    let best = best_alignments(records);
    let mut missing = 0;
    let matrix = DistanceMatrix::from_fn(ids.clone(), |i, j| {
        match best.get(&pair_key(&ids[i], &ids[j])) {
            Some(r) => Some((100.0 - r.percent_identity).max(0.0)),
            None => { missing += 1; Some(settings.no_hit_distance) }
        }
    });
    (matrix, missing)
}


/// Clusters one batch of alignment records: distance matrix, UPGMA, then a cut at the identity
/// threshold.
pub fn cluster_records(records: &[AlignmentRecord], source_name: &str,
                       settings: &SimilaritySettings) -> Result<SimilarityClusters> {
    if records.is_empty() {
        return Err(PipelineError::CorruptInput { file: source_name.to_string(),
                                                 message: "no usable alignment records".to_string() });
    }
    let (matrix, missing_pair_count) = similarity_matrix(records, settings);
    let dendrogram = upgma(&matrix)?;
    let clusters = order_clusters(dendrogram.clusters_at(settings.cutoff()));
    Ok(SimilarityClusters { matrix, dendrogram, clusters, missing_pair_count })
}


/// Largest clusters first, ties broken by the first (smallest) member ID.
pub fn order_clusters(mut clusters: Vec<Vec<String>>) -> Vec<Vec<String>> {
    clusters.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
    clusters
}


/// Sequences recovered from the alignments themselves (gaps removed), used when no FASTA files
/// are given. When an ID occurs in several alignments the longest recovered sequence is kept.
pub fn aligned_sequences(records: &[AlignmentRecord]) -> FxHashMap<String, String> {
    let mut sequences: FxHashMap<String, String> = FxHashMap::default();
    let mut keep_longest = |id: &str, seq: String| {
        if seq.is_empty() { return; }
        let entry = sequences.entry(id.to_string()).or_default();
        if seq.len() > entry.len() {
            *entry = seq;
        }
    };
    for r in records {
        keep_longest(&r.query_id, r.ungapped_query());
        keep_longest(&r.subject_id, r.ungapped_subject());
    }
    sequences
}


pub fn cluster_name(number: usize) -> String {
    format!("cluster_{:03}", number)
}


/// Writes one line per sequence: its ID and the name of its cluster.
pub fn save_cluster_tsv(clusters: &[Vec<String>], filename: &Path) -> Result<()> {
    let mut writer = WriterBuilder::new().delimiter(b'\t').from_path(filename)
        .map_err(|e| PipelineError::csv(filename, e))?;
    writer.write_record(["sequence_id", "cluster"]).map_err(|e| PipelineError::csv(filename, e))?;
    for (i, cluster) in clusters.iter().enumerate() {
        let name = cluster_name(i + 1);
        for id in cluster {
            writer.write_record([id.as_str(), name.as_str()])
                  .map_err(|e| PipelineError::csv(filename, e))?;
        }
    }
    writer.flush().map_err(|e| PipelineError::io(filename, e))
}


/// Writes a cluster's sequences to a FASTA file and returns the IDs that had no sequence.
pub fn save_cluster_fasta(cluster: &[String], sequences: &FxHashMap<String, String>,
                          filename: &Path) -> Result<Vec<String>> {
    let file = File::create(filename).map_err(|e| PipelineError::io(filename, e))?;
    let mut writer = BufWriter::new(file);
    let mut missing = Vec::new();
    for id in cluster {
        match sequences.get(id) {
            Some(seq) => writeln!(writer, ">{}\n{}", id, seq)
                .map_err(|e| PipelineError::io(filename, e))?,
            None => missing.push(id.clone()),
        }
    }
    writer.flush().map_err(|e| PipelineError::io(filename, e))?;
    Ok(missing)
}


#[cfg(test)]
mod tests {
    use super::*;
    use std::fs::read_to_string;
    use tempfile::tempdir;

    fn record(q: &str, s: &str, pident: f64, bitscore: f64) -> AlignmentRecord {
        AlignmentRecord { query_id: q.to_string(), subject_id: s.to_string(),
                          percent_identity: pident, alignment_length: 100, e_value: 1e-20,
                          bit_score: bitscore, query_seq: "AC-GT".to_string(),
                          subject_seq: "ACCGT".to_string() }
    }

    #[test]
    fn test_three_sequences() {
        let records = vec![record("A", "B", 95.0, 200.0), record("A", "C", 60.0, 100.0),
                           record("B", "C", 58.0, 90.0)];
        let (matrix, missing) = similarity_matrix(&records, &SimilaritySettings::default());
        assert_eq!(missing, 0);
        assert_eq!(matrix.labels(), &["A", "B", "C"]);
        assert_eq!(matrix.get(0, 1), Some(5.0));
        assert_eq!(matrix.get(0, 2), Some(40.0));
        assert_eq!(matrix.get(1, 2), Some(42.0));

        let result = cluster_records(&records, "batch", &SimilaritySettings::default()).unwrap();
        assert_eq!(result.dendrogram.merge_heights, vec![5.0, 41.0]);
        assert_eq!(result.clusters, vec![vec!["A", "B", "C"]]);
    }

    #[test]
    fn test_best_alignment_is_used() {
        let records = vec![record("A", "B", 80.0, 100.0), record("B", "A", 90.0, 150.0),
                           record("A", "B", 99.0, 120.0), record("A", "B", 97.0, 150.0)];
        let best = best_alignments(&records);
        assert_eq!(best.len(), 1);
        assert_eq!(best[&("A", "B")].percent_identity, 97.0);
        let (matrix, _) = similarity_matrix(&records, &SimilaritySettings::default());
        assert_eq!(matrix.get(0, 1), Some(3.0));
    }

    #[test]
    fn test_missing_pairs_and_self_hits() {
        let records = vec![record("A", "B", 90.0, 100.0), record("C", "C", 100.0, 300.0),
                           record("A", "A", 100.0, 300.0)];
        let settings = SimilaritySettings { min_identity: 0.0, no_hit_distance: 250.0 };
        let (matrix, missing) = similarity_matrix(&records, &settings);
        assert_eq!(matrix.labels(), &["A", "B", "C"]);
        assert_eq!(missing, 2);
        assert_eq!(matrix.get(0, 2), Some(250.0));
        assert_eq!(matrix.get(1, 2), Some(250.0));

        // C only has a self-hit, so it ends up alone.
        let result = cluster_records(&records, "batch", &settings).unwrap();
        assert_eq!(result.clusters, vec![vec!["A".to_string(), "B".to_string()],
                                         vec!["C".to_string()]]);
        assert_eq!(result.missing_pair_count, 2);
    }

    #[test]
    fn test_min_identity_cut() {
        let records = vec![record("A", "B", 99.0, 500.0), record("C", "D", 97.0, 480.0),
                           record("A", "C", 70.0, 100.0), record("A", "D", 70.0, 100.0),
                           record("B", "C", 70.0, 100.0), record("B", "D", 70.0, 100.0),
                           record("E", "A", 40.0, 20.0)];
        let strict = SimilaritySettings { min_identity: 98.0, no_hit_distance: 200.0 };
        let result = cluster_records(&records, "batch", &strict).unwrap();
        assert_eq!(result.clusters, vec![vec!["A", "B"], vec!["C"], vec!["D"], vec!["E"]]);

        let loose = SimilaritySettings { min_identity: 90.0, no_hit_distance: 200.0 };
        let result = cluster_records(&records, "batch", &loose).unwrap();
        assert_eq!(result.clusters, vec![vec!["A", "B"], vec!["C", "D"], vec!["E"]]);

        // The default cut (100) joins A-D, but E's no-hit pairs push its merge above the cut.
        let result = cluster_records(&records, "batch", &SimilaritySettings::default()).unwrap();
        assert_eq!(result.clusters, vec![vec!["A", "B", "C", "D"], vec!["E"]]);
    }

    #[test]
    fn test_empty_records() {
        assert!(matches!(cluster_records(&[], "empty.tsv", &SimilaritySettings::default()),
                         Err(PipelineError::CorruptInput { .. })));
    }

    #[test]
    fn test_aligned_sequences() {
        let mut long = record("A", "C", 90.0, 100.0);
        long.query_seq = "AC-GTTT".to_string();
        let records = vec![record("A", "B", 90.0, 100.0), long];
        let sequences = aligned_sequences(&records);
        assert_eq!(sequences["A"], "ACGTTT");
        assert_eq!(sequences["B"], "ACCGT");
        assert_eq!(sequences["C"], "ACCGT");
    }

    #[test]
    fn test_save_clusters() {
        let dir = tempdir().unwrap();
        let clusters = order_clusters(vec![vec!["D".to_string()],
                                           vec!["A".to_string(), "C".to_string()],
                                           vec!["B".to_string()]]);
        assert_eq!(clusters[0], vec!["A", "C"]);
        assert_eq!(clusters[1], vec!["B"]);

        let tsv = dir.path().join("clusters.tsv");
        save_cluster_tsv(&clusters, &tsv).unwrap();
        assert_eq!(read_to_string(&tsv).unwrap(),
                   "sequence_id\tcluster\nA\tcluster_001\nC\tcluster_001\n\
                    B\tcluster_002\nD\tcluster_003\n");

        let mut sequences = FxHashMap::default();
        sequences.insert("A".to_string(), "ACGT".to_string());
        let fasta = dir.path().join("cluster_001.fasta");
        let missing = save_cluster_fasta(&clusters[0], &sequences, &fasta).unwrap();
        assert_eq!(missing, vec!["C"]);
        assert_eq!(read_to_string(&fasta).unwrap(), ">A\nACGT\n");
    }
}
