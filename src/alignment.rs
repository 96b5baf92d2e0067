// This file contains the code for loading tabular pairwise-alignment results (BLAST outfmt 6 with
// the columns qseqid sseqid pident length evalue bitscore qseq sseq).

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use csv::{ReaderBuilder, StringRecord};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::error::{ParseError, PipelineError, Result};


pub const COLUMN_COUNT: usize = 8;


#[derive(Debug, Clone, PartialEq)]
pub struct AlignmentRecord {
    pub query_id: String,
    pub subject_id: String,
    pub percent_identity: f64,
    pub alignment_length: u64,
    pub e_value: f64,
    pub bit_score: f64,
    pub query_seq: String,
    pub subject_seq: String,
}

impl AlignmentRecord {
    pub fn is_self_hit(&self) -> bool {
        self.query_id == self.subject_id
    }

    pub fn ungapped_query(&self) -> String {
        self.query_seq.chars().filter(|&c| c != '-').collect()
    }

    pub fn ungapped_subject(&self) -> String {
        self.subject_seq.chars().filter(|&c| c != '-').collect()
    }
}


#[derive(Debug, Clone)]
pub struct ParseSettings {
    /// Fraction of records (0-1) that may be malformed before the whole file is rejected.
    pub max_error_rate: f64,
}

impl Default for ParseSettings {
    fn default() -> Self {
        ParseSettings { max_error_rate: 0.5 }
    }
}


/// The records that parsed plus a report of the ones that didn't.
#[derive(Debug, Default)]
pub struct ParsedAlignments {
    pub records: Vec<AlignmentRecord>,
    pub errors: Vec<ParseError>,
}

impl ParsedAlignments {
    pub fn total_lines(&self) -> usize {
        self.records.len() + self.errors.len()
    }

    pub fn error_rate(&self) -> f64 {
        if self.total_lines() == 0 { return 0.0; }
        self.errors.len() as f64 / self.total_lines() as f64
    }
}


pub fn load_alignments(filename: &Path, settings: &ParseSettings) -> Result<ParsedAlignments> {
    let file = File::open(filename).map_err(|e| PipelineError::io(filename, e))?;
    parse_alignments(file, &filename.display().to_string(), settings)
}


pub fn parse_alignments<R: Read>(reader: R, source_name: &str, settings: &ParseSettings)
        -> Result<ParsedAlignments> {
    let mut reader = ReaderBuilder::new().delimiter(b'\t').has_headers(false).flexible(true)
                                         .quoting(false).comment(Some(b'#')).from_reader(reader);
    let mut parsed = ParsedAlignments::default();
    for result in reader.records() {
        match result {
            Ok(row) => {
                let line = row.position().map(|p| p.line()).unwrap_or(0);
                match parse_record(&row) {
                    Ok(record) => parsed.records.push(record),
                    Err(message) => parsed.errors.push(ParseError {
                        file: source_name.to_string(), line, message }),
                }
            }
            Err(e) => {
                if let csv::ErrorKind::Io(_) = e.kind() {
                    return Err(PipelineError::CorruptInput { file: source_name.to_string(),
                                                             message: e.to_string() });
                }
                let line = e.position().map(|p| p.line()).unwrap_or(0);
                parsed.errors.push(ParseError { file: source_name.to_string(), line,
                                                message: e.to_string() });
            }
        }
    }
    if parsed.error_rate() > settings.max_error_rate {
        let first = parsed.errors.first().map(|e| e.to_string()).unwrap_or_default();
        return Err(PipelineError::CorruptInput {
            file: source_name.to_string(),
            message: format!("{} of {} records are malformed (first: {})",
                             parsed.errors.len(), parsed.total_lines(), first),
        });
    }
    Ok(parsed)
}


fn parse_record(row: &StringRecord) -> std::result::Result<AlignmentRecord, String> {
    if row.len() != COLUMN_COUNT {
        return Err(format!("expected {} columns, found {}", COLUMN_COUNT, row.len()));
    }
    let query_id = parse_id(&row[0], "qseqid")?;
    let subject_id = parse_id(&row[1], "sseqid")?;
    let percent_identity = parse_number(&row[2], "pident")?;
    if !(0.0..=100.0).contains(&percent_identity) {
        return Err(format!("pident {} is outside of 0-100", percent_identity));
    }
    let alignment_length = row[3].trim().parse::<u64>()
        .map_err(|_| format!("length '{}' is not a whole number", &row[3]))?;
    let e_value = parse_number(&row[4], "evalue")?;
    let bit_score = parse_number(&row[5], "bitscore")?;
    Ok(AlignmentRecord {
        query_id, subject_id, percent_identity, alignment_length, e_value, bit_score,
        query_seq: row[6].trim().to_string(),
        subject_seq: row[7].trim().to_string(),
    })
}


fn parse_id(field: &str, column: &str) -> std::result::Result<String, String> {
    let id = field.trim();
    if id.is_empty() {
        return Err(format!("{} is empty", column));
    }
    Ok(id.to_string())
}


fn parse_number(field: &str, column: &str) -> std::result::Result<f64, String> {
    let value = field.trim().parse::<f64>()
        .map_err(|_| format!("{} '{}' is not numeric", column, field))?;
    if !value.is_finite() || value < 0.0 {
        return Err(format!("{} '{}' is not a non-negative number", column, field));
    }
    Ok(value)
}


#[cfg(test)]
mod tests {
    use super::*;

    fn parse_str(text: &str) -> Result<ParsedAlignments> {
        parse_alignments(text.as_bytes(), "test.tsv", &ParseSettings::default())
    }

    #[test]
    fn test_parse_good_records() {
        let parsed = parse_str("A\tB\t95.5\t300\t1e-50\t250.3\tAC-GT\tACCGT\n\
                                A\tA\t100\t300\t0.0\t500\tACGT\tACGT\n").unwrap();
        assert_eq!(parsed.records.len(), 2);
        assert!(parsed.errors.is_empty());
        let r = &parsed.records[0];
        assert_eq!(r.query_id, "A");
        assert_eq!(r.subject_id, "B");
        assert_eq!(r.percent_identity, 95.5);
        assert_eq!(r.alignment_length, 300);
        assert_eq!(r.e_value, 1e-50);
        assert_eq!(r.bit_score, 250.3);
        assert_eq!(r.ungapped_query(), "ACGT");
        assert!(!r.is_self_hit());
        assert!(parsed.records[1].is_self_hit());
    }

    #[test]
    fn test_missing_column_is_skipped() {
        let text = "A\tB\t95\t300\t1e-50\t250\tACGT\tACGT\n\
                    A\tC\t60\t300\t1e-20\tACGT\tACGT\n\
                    B\tC\t58\t300\t1e-20\t120\tACGT\tACGT\n\
                    C\tD\t70\t300\t1e-20\t130\tACGT\tACGT\n";
        let parsed = parse_str(text).unwrap();
        assert_eq!(parsed.records.len(), 3);
        assert_eq!(parsed.errors.len(), 1);
        assert_eq!(parsed.errors[0].line, 2);
        assert!(parsed.errors[0].message.contains("found 7"));
    }

    #[test]
    fn test_non_numeric_fields() {
        let text = "A\tB\tabc\t300\t1e-50\t250\tACGT\tACGT\n\
                    A\tB\t95\tlong\t1e-50\t250\tACGT\tACGT\n\
                    A\tB\t195\t300\t1e-50\t250\tACGT\tACGT\n\
                    A\tB\t95\t300\t1e-50\t250\tACGT\tACGT\n\
                    A\tC\t95\t300\t1e-50\t250\tACGT\tACGT\n\
                    A\tD\t95\t300\t1e-50\t250\tACGT\tACGT\n";
        let parsed = parse_str(text).unwrap();
        assert_eq!(parsed.records.len(), 3);
        assert_eq!(parsed.errors.len(), 3);
        assert_eq!(parsed.errors.iter().map(|e| e.line).collect::<Vec<_>>(), vec![1, 2, 3]);
    }

    #[test]
    fn test_too_many_errors_is_corrupt() {
        let text = "garbage\nmore garbage\nA\tB\t95\t300\t1e-50\t250\tACGT\tACGT\n";
        match parse_str(text) {
            Err(PipelineError::CorruptInput { file, message }) => {
                assert_eq!(file, "test.tsv");
                assert!(message.contains("2 of 3"));
            }
            other => panic!("expected CorruptInput, got {:?}", other),
        }
        let lenient = ParseSettings { max_error_rate: 0.9 };
        let parsed = parse_alignments(text.as_bytes(), "test.tsv", &lenient).unwrap();
        assert_eq!(parsed.records.len(), 1);
    }

    #[test]
    fn test_blank_and_comment_lines() {
        let parsed = parse_str("# BLASTN 2.14\n\nA\tB\t95\t300\t1e-50\t250\tACGT\tACGT\n").unwrap();
        assert_eq!(parsed.records.len(), 1);
        assert!(parsed.errors.is_empty());
        assert_eq!(parse_str("").unwrap().total_lines(), 0);
    }
}
