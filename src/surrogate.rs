// This file contains the code for the neighborhoods surrogate subcommand, which collapses
// identical sequences in a cluster's FASTA file before tree inference.

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
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::log::{section_header, explanation};
use crate::misc::{check_if_file_exists, load_fasta, quit_with_error};


/// A record in the collapsed FASTA output: either an original record or a surrogate standing in
/// for several records with the same sequence.
#[derive(Debug, Clone, PartialEq)]
pub struct CollapsedRecord {
    pub header: String,
    pub sequence: String,
    pub members: Vec<String>,
}

impl CollapsedRecord {
    pub fn is_surrogate(&self) -> bool {
        self.members.len() > 1
    }
}


pub fn surrogate(in_fasta: PathBuf, out_fasta: PathBuf) {
    let out_tsv = mapping_filename(&out_fasta);
    check_settings(&in_fasta, &out_fasta);
    starting_message();
    print_settings(&in_fasta, &out_fasta);
    let records = load_fasta(&in_fasta).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    let collapsed = collapse_identical(&records);
    let surrogate_count = collapsed.iter().filter(|r| r.is_surrogate()).count();
    eprintln!("{} input sequences", records.len());
    eprintln!("{} output sequences ({} surrogates)", collapsed.len(), surrogate_count);
    eprintln!();
    if let Err(e) = save_collapsed(&collapsed, &out_fasta, &out_tsv) {
        quit_with_error(&e.to_string());
    }
    finished_message(&out_fasta, &out_tsv);
}


fn check_settings(in_fasta: &Path, out_fasta: &Path) {
    check_if_file_exists(in_fasta);
    if in_fasta == out_fasta {
        quit_with_error("--out_fasta must be different from --in_fasta");
    }
}


fn starting_message() {
    section_header("Starting neighborhoods surrogate");
    explanation("This command collapses identical sequences into a single surrogate record, so \
                 the tree built from the file does not contain clades of zero-length branches.");
}


fn print_settings(in_fasta: &Path, out_fasta: &Path) {
    eprintln!("Settings:");
    eprintln!("  --in_fasta {}", in_fasta.display());
    eprintln!("  --out_fasta {}", out_fasta.display());
    eprintln!();
}


fn finished_message(out_fasta: &Path, out_tsv: &Path) {
    section_header("Finished!");
    eprintln!("Collapsed sequences: {}", out_fasta.display());
    eprintln!("Surrogate members:   {}", out_tsv.display());
    eprintln!();
}


/// The surrogate membership table sits next to the output FASTA.
pub fn mapping_filename(out_fasta: &Path) -> PathBuf {
    out_fasta.with_extension("surrogates.tsv")
}


/// Groups records by sequence, in order of first appearance. Groups of two or more become
/// "sequence_surrogate_<n>" (n being the group size) and later groups of the same size get a
/// "_2", "_3", etc. suffix. Unique sequences keep their original header.
pub fn collapse_identical(records: &[(String, String, String)]) -> Vec<CollapsedRecord> {
    let mut group_index: FxHashMap<&str, usize> = FxHashMap::default();
    let mut groups: Vec<Vec<usize>> = Vec::new();
    for (i, (_, _, seq)) in records.iter().enumerate() {
        let g = *group_index.entry(seq.as_str()).or_insert_with(|| {
            groups.push(Vec::new());
            groups.len() - 1
        });
        groups[g].push(i);
    }

    let mut size_counts: FxHashMap<usize, usize> = FxHashMap::default();
    groups.into_iter().map(|group| {
        let first = &records[group[0]];
        let members: Vec<String> = group.iter().map(|&i| records[i].0.clone()).collect();
        let header = if group.len() > 1 {
            let count = size_counts.entry(group.len()).or_insert(0);
            *count += 1;
            if *count == 1 {
                format!("sequence_surrogate_{}", group.len())
            } else {
                format!("sequence_surrogate_{}_{}", group.len(), count)
            }
        } else {
            first.1.clone()
        };
        CollapsedRecord { header, sequence: first.2.clone(), members }
    }).collect()
}


pub fn save_collapsed(collapsed: &[CollapsedRecord], out_fasta: &Path, out_tsv: &Path)
        -> Result<()> {
    let file = File::create(out_fasta).map_err(|e| PipelineError::io(out_fasta, e))?;
    let mut writer = BufWriter::new(file);
    for record in collapsed {
        writeln!(writer, ">{}\n{}", record.header, record.sequence)
            .map_err(|e| PipelineError::io(out_fasta, e))?;
    }
    writer.flush().map_err(|e| PipelineError::io(out_fasta, e))?;

    let mut tsv = WriterBuilder::new().delimiter(b'\t').from_path(out_tsv)
        .map_err(|e| PipelineError::csv(out_tsv, e))?;
    tsv.write_record(["surrogate", "member_count", "members"])
       .map_err(|e| PipelineError::csv(out_tsv, e))?;
    for record in collapsed.iter().filter(|r| r.is_surrogate()) {
        tsv.write_record([record.header.as_str(), &record.members.len().to_string(),
                          &record.members.join(",")])
           .map_err(|e| PipelineError::csv(out_tsv, e))?;
    }
    tsv.flush().map_err(|e| PipelineError::io(out_tsv, e))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::make_test_file;
    use std::fs::read_to_string;
    use tempfile::tempdir;

    fn rec(name: &str, seq: &str) -> (String, String, String) {
        (name.to_string(), format!("{} some description", name), seq.to_string())
    }

    #[test]
    fn test_collapse_identical() {
        let records = vec![rec("a", "ACGT"), rec("b", "TTTT"), rec("c", "ACGT"),
                           rec("d", "GGGG"), rec("e", "TTTT"), rec("f", "ACGT"),
                           rec("g", "CCCC"), rec("h", "CCCC")];
        let collapsed = collapse_identical(&records);
        let headers: Vec<&str> = collapsed.iter().map(|r| r.header.as_str()).collect();
        assert_eq!(headers, vec!["sequence_surrogate_3", "sequence_surrogate_2",
                                 "d some description", "sequence_surrogate_2_2"]);
        assert_eq!(collapsed[0].members, vec!["a", "c", "f"]);
        assert_eq!(collapsed[0].sequence, "ACGT");
        assert_eq!(collapsed[3].members, vec!["g", "h"]);
        assert!(!collapsed[2].is_surrogate());
    }

    #[test]
    fn test_no_duplicates() {
        let records = vec![rec("a", "ACGT"), rec("b", "TTTT")];
        let collapsed = collapse_identical(&records);
        assert_eq!(collapsed.len(), 2);
        assert!(collapsed.iter().all(|r| !r.is_surrogate()));
    }

    #[test]
    fn test_save_collapsed() {
        let dir = tempdir().unwrap();
        let in_fasta = dir.path().join("cluster_001.fasta");
        make_test_file(&in_fasta, ">x\nACGT\n>y\nACGT\n>z info\nAAAA\n");
        let records = load_fasta(&in_fasta).unwrap();
        let collapsed = collapse_identical(&records);
        let out_fasta = dir.path().join("cluster_001.collapsed.fasta");
        let out_tsv = mapping_filename(&out_fasta);
        assert_eq!(out_tsv, dir.path().join("cluster_001.collapsed.surrogates.tsv"));
        save_collapsed(&collapsed, &out_fasta, &out_tsv).unwrap();
        assert_eq!(read_to_string(&out_fasta).unwrap(),
                   ">sequence_surrogate_2\nACGT\n>z info\nAAAA\n");
        assert_eq!(read_to_string(&out_tsv).unwrap(),
                   "surrogate\tmember_count\tmembers\nsequence_surrogate_2\t2\tx,y\n");
    }
}
