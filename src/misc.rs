// This file contains miscellaneous functions used by various parts of Neighborhoods.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use flate2::read::GzDecoder;
use indicatif::{ProgressBar, ProgressStyle};
use std::collections::HashSet;
use std::fs::{File, create_dir_all, read_dir};
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use crate::error::{PipelineError, Result};


static INTERRUPTED: AtomicBool = AtomicBool::new(false);


pub fn create_dir(dir_path: &Path) {
    if let Err(e) = create_dir_all(dir_path) {
        quit_with_error(&format!("failed to create directory {}\n{}", dir_path.display(), e));
    }
}


pub fn check_if_file_exists(filename: &Path) {
    // Quits with an error if the given path is not an existing file.
    if !filename.exists() {
        quit_with_error(&format!("file does not exist: {}", filename.display()));
    }
    if !filename.is_file() {
        quit_with_error(&format!("{} is not a file", filename.display()));
    }
}


pub fn check_if_dir_exists(dir: &Path) {
    // Quits with an error if the given path is not an existing directory.
    if !dir.exists() {
        quit_with_error(&format!("directory does not exist: {}", dir.display()));
    }
    if !dir.is_dir() {
        quit_with_error(&format!("{} is not a directory", dir.display()));
    }
}


pub fn check_if_dir_is_not_dir(dir: &Path) {
    // Quits with an error if the given path exists but is not a directory (not existing is okay).
    if dir.exists() && !dir.is_dir() {
        quit_with_error(&format!("{} exists but is not a directory", dir.display()));
    }
}


#[cfg(not(test))]
pub fn quit_with_error(text: &str) -> ! {
    eprintln!();
    eprintln!("Error: {}", text);
    std::process::exit(1);
}
#[cfg(test)]
pub fn quit_with_error(text: &str) -> ! {
    // Unit tests need a panic they can catch instead of a process exit.
    panic!("{}", text);
}


pub fn find_files_with_extension(in_dir: &Path, extension: &str) -> Result<Vec<PathBuf>> {
    // Returns all files in the directory with the given extension, sorted for a stable order.
    let entries = read_dir(in_dir).map_err(|e| PipelineError::io(in_dir, e))?;
    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PipelineError::io(in_dir, e))?.path();
        if path.is_file() && path.extension().unwrap_or_default() == extension {
            files.push(path);
        }
    }
    files.sort_unstable();
    Ok(files)
}


pub fn file_label(path: &Path) -> String {
    // The part of a file's name before its first dot, e.g. "12.fasta.treefile" -> "12".
    let name = path.file_name().unwrap_or_default().to_string_lossy();
    name.split('.').next().unwrap_or_default().to_string()
}


pub fn load_fasta(filename: &Path) -> Result<Vec<(String, String, String)>> {
    // Loads a FASTA file (gzipped or not) and returns name+header+sequence tuples. Empty files,
    // unnamed records and duplicate names are errors.
    let reader: Box<dyn Read> = if is_file_gzipped(filename)? {
        Box::new(GzDecoder::new(File::open(filename).map_err(|e| PipelineError::io(filename, e))?))
    } else {
        Box::new(File::open(filename).map_err(|e| PipelineError::io(filename, e))?)
    };
    let fasta_seqs = parse_fasta(BufReader::new(reader), filename)?;
    check_load_fasta(&fasta_seqs, filename)?;
    Ok(fasta_seqs)
}


fn parse_fasta<R: BufRead>(reader: R, filename: &Path) -> Result<Vec<(String, String, String)>> {
    let corrupt = || PipelineError::CorruptInput { file: filename.display().to_string(),
                                                   message: "not correctly formatted".to_string() };
    let mut fasta_seqs = Vec::new();
    let mut name = String::new();
    let mut header = String::new();
    let mut sequence = String::new();
    for line in reader.lines() {
        let text = line.map_err(|e| PipelineError::io(filename, e))?;
        let text = text.trim_end();
        if text.is_empty() { continue; }
        if let Some(h) = text.strip_prefix('>') {
            if !name.is_empty() {
                fasta_seqs.push((name, header, std::mem::take(&mut sequence)));
            }
            header = h.to_string();
            name = header.split_whitespace().next().ok_or_else(corrupt)?.to_string();
        } else {
            if name.is_empty() { return Err(corrupt()); }
            sequence.push_str(&text.to_ascii_uppercase());
        }
    }
    if !name.is_empty() {
        fasta_seqs.push((name, header, sequence));
    }
    Ok(fasta_seqs)
}


fn check_load_fasta(fasta_seqs: &[(String, String, String)], filename: &Path) -> Result<()> {
    let fail = |message: String| Err(PipelineError::CorruptInput {
        file: filename.display().to_string(), message });
    if fasta_seqs.is_empty() {
        return fail("contains no sequences".to_string());
    }
    let mut set = HashSet::new();
    for (name, _, sequence) in fasta_seqs {
        if sequence.is_empty() {
            return fail(format!("{} has an empty sequence", name));
        }
        if !set.insert(name) {
            return fail(format!("duplicate name: {}", name));
        }
    }
    Ok(())
}


fn is_file_gzipped(filename: &Path) -> Result<bool> {
    // Returns true if the file starts with the two gzip magic bytes.
    let file = File::open(filename).map_err(|e| PipelineError::io(filename, e))?;
    let mut buf = Vec::with_capacity(2);
    file.take(2).read_to_end(&mut buf).map_err(|e| PipelineError::io(filename, e))?;
    Ok(buf.len() == 2 && buf[0] == 31 && buf[1] == 139)
}


pub fn format_float(num: f64) -> String {
    // Formats a float with up to six decimal places but then drops trailing zeros.
    let mut formatted = format!("{:.6}", num);
    if !formatted.contains('.') { return formatted }
    while formatted.ends_with('0') { formatted.pop(); }
    if formatted.ends_with('.') { formatted.pop(); }
    formatted
}


pub fn spinner(message: &str) -> ProgressBar {
    if cfg!(test) {
        ProgressBar::hidden()  // don't show a spinner during unit tests
    } else {
        let pb = ProgressBar::new_spinner();
        pb.enable_steady_tick(Duration::from_millis(100));
        pb.set_style(
            ProgressStyle::default_spinner()
                .tick_strings(&["⠋", "⠙", "⠚", "⠞", "⠖", "⠦", "⠴", "⠲", "⠳", "⠓"])
                .template("{spinner} {msg}").unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        pb.set_message(message.to_string());
        pb
    }
}


pub fn progress_bar(total: u64) -> ProgressBar {
    if cfg!(test) {
        ProgressBar::hidden()
    } else {
        let pb = ProgressBar::new(total);
        pb.set_style(ProgressStyle::default_bar()
            .template("{bar:40} {pos}/{len} ({eta})").unwrap_or_else(|_| ProgressStyle::default_bar()));
        pb
    }
}


pub fn install_interrupt_handler() {
    // Ctrl-C only raises a flag. Stages check it between themselves, never in the middle of
    // building a matrix, so a run either stops at a stage boundary or not at all.
    if let Err(e) = ctrlc::set_handler(|| { INTERRUPTED.store(true, Ordering::SeqCst); }) {
        crate::log::warning(&format!("could not install Ctrl-C handler: {}", e));
    }
}


pub fn stop_if_interrupted(next_stage: &str) {
    if INTERRUPTED.load(Ordering::SeqCst) {
        quit_with_error(&format!("interrupted before {}", next_stage));
    }
}


pub fn set_thread_count(threads: usize) {
    // The global pool can only be built once per process. Later calls (e.g. from several tests)
    // keep the existing pool.
    if let Err(e) = rayon::ThreadPoolBuilder::new().num_threads(threads).build_global() {
        if !cfg!(test) {
            crate::log::warning(&format!("could not set thread count: {}", e));
        }
    }
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::{make_gzipped_test_file, make_test_file};
    use tempfile::tempdir;

    #[test]
    fn test_format_float() {
        assert_eq!(format_float(0.0), "0");
        assert_eq!(format_float(0.1), "0.1");
        assert_eq!(format_float(0.1111111), "0.111111");
        assert_eq!(format_float(10.0), "10");
        assert_eq!(format_float(95.5), "95.5");
    }

    #[test]
    fn test_file_label() {
        assert_eq!(file_label(Path::new("dir/12.treefile")), "12");
        assert_eq!(file_label(Path::new("/a/b/blaTEM.fasta_align.fasta.treefile")), "blaTEM");
        assert_eq!(file_label(Path::new("plain")), "plain");
    }

    #[test]
    fn test_load_fasta() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("seqs.fasta");
        make_test_file(&path, ">a first\nACGT\nacgt\n\n>b\nTTTT\n");
        let seqs = load_fasta(&path).unwrap();
        assert_eq!(seqs.len(), 2);
        assert_eq!(seqs[0], ("a".to_string(), "a first".to_string(), "ACGTACGT".to_string()));
        assert_eq!(seqs[1].2, "TTTT");

        let gz_path = dir.path().join("seqs.fasta.gz");
        make_gzipped_test_file(&gz_path, ">x\nMKV\n");
        assert_eq!(load_fasta(&gz_path).unwrap()[0].2, "MKV");
    }

    #[test]
    fn test_load_fasta_errors() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("dup.fasta");
        make_test_file(&path, ">a\nACGT\n>a\nACGT\n");
        assert!(matches!(load_fasta(&path), Err(PipelineError::CorruptInput { .. })));
        make_test_file(&path, "ACGT\n>a\nACGT\n");
        assert!(matches!(load_fasta(&path), Err(PipelineError::CorruptInput { .. })));
        make_test_file(&path, "");
        assert!(matches!(load_fasta(&path), Err(PipelineError::CorruptInput { .. })));
        assert!(matches!(load_fasta(&dir.path().join("missing.fasta")),
                         Err(PipelineError::Io { .. })));
    }

    #[test]
    fn test_find_files_with_extension() {
        let dir = tempdir().unwrap();
        make_test_file(&dir.path().join("b.treefile"), "x");
        make_test_file(&dir.path().join("a.treefile"), "x");
        make_test_file(&dir.path().join("a.log"), "x");
        let files = find_files_with_extension(dir.path(), "treefile").unwrap();
        let names: Vec<_> = files.iter().map(|f| file_label(f)).collect();
        assert_eq!(names, vec!["a", "b"]);
    }
}
