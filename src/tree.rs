// This file contains the phylogenetic tree type, a Newick parser/writer for it and the loader for
// a directory of .treefile files.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use serde::Serialize;
use std::collections::HashSet;
use std::fs::read;
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::misc::{file_label, format_float};


pub const MIN_LEAVES: usize = 4;


#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Node {
    pub name: Option<String>,
    /// Bootstrap support normalised to 0-1.
    pub support: Option<f64>,
    pub length: Option<f64>,
    pub children: Vec<usize>,
}

impl Node {
    pub fn leaf(name: &str, length: Option<f64>) -> Self {
        Node { name: Some(name.to_string()), support: None, length, children: Vec::new() }
    }

    pub fn internal(children: Vec<usize>, length: Option<f64>, support: Option<f64>) -> Self {
        Node { name: None, support, length, children }
    }

    pub fn is_leaf(&self) -> bool {
        self.children.is_empty()
    }
}


/// A tree stored as an arena of nodes. It is never modified after it has been built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PhyloTree {
    pub label: String,
    pub nodes: Vec<Node>,
    pub root: usize,
    /// 100 if the support values were given as percentages, otherwise 1.
    pub support_scale: f64,
}

impl PhyloTree {
    pub fn from_nodes(label: &str, nodes: Vec<Node>, root: usize) -> Self {
        PhyloTree { label: label.to_string(), nodes, root, support_scale: 1.0 }
    }

    pub fn from_newick(text: &str, label: &str) -> Result<Self> {
        let mut parser = NewickParser::new(text, label);
        let (nodes, root) = parser.parse()?;
        let mut tree = PhyloTree::from_nodes(label, nodes, root);
        tree.normalise_support();
        tree.check_leaf_names()?;
        Ok(tree)
    }

    /// Loads one tree from a Newick file. The tree's label is "tree_" followed by the file name
    /// up to its first dot.
    pub fn load(filename: &Path) -> Result<Self> {
        let bytes = read(filename).map_err(|e| PipelineError::io(filename, e))?;
        let text = String::from_utf8(bytes).map_err(|_| PipelineError::malformed_tree(
            &filename.display().to_string(), "file is not valid UTF-8 text"))?;
        let label = format!("tree_{}", file_label(filename));
        let tree = PhyloTree::from_newick(&text, &label).map_err(|e| match e {
            PipelineError::MalformedTree { reason, .. } =>
                PipelineError::malformed_tree(&filename.display().to_string(), reason),
            other => other,
        })?;
        let leaf_count = tree.leaf_count();
        if leaf_count < MIN_LEAVES {
            return Err(PipelineError::TrivialTree { file: filename.display().to_string(),
                                                    leaves: leaf_count });
        }
        Ok(tree)
    }

    pub fn leaf_count(&self) -> usize {
        self.nodes.iter().filter(|n| n.is_leaf()).count()
    }

    pub fn leaf_names(&self) -> Vec<&str> {
        self.nodes.iter().filter(|n| n.is_leaf()).filter_map(|n| n.name.as_deref()).collect()
    }

    pub fn leaf_name_set(&self) -> HashSet<&str> {
        self.leaf_names().into_iter().collect()
    }

    /// Node indices in preorder (parents before children).
    pub fn preorder(&self) -> Vec<usize> {
        let mut order = Vec::with_capacity(self.nodes.len());
        let mut stack = vec![self.root];
        while let Some(i) = stack.pop() {
            order.push(i);
            stack.extend(self.nodes[i].children.iter().rev());
        }
        order
    }

    /// Node indices in postorder (children before parents).
    pub fn postorder(&self) -> Vec<usize> {
        let mut order = self.preorder();
        order.reverse();
        order
    }

    pub fn to_newick(&self) -> String {
        format!("{};", self.node_to_newick(self.root))
    }

    fn node_to_newick(&self, i: usize) -> String {
        let node = &self.nodes[i];
        let mut text = if node.is_leaf() {
            quote_label(node.name.as_deref().unwrap_or_default())
        } else {
            let children: Vec<String> = node.children.iter()
                .map(|&c| self.node_to_newick(c)).collect();
            let mut s = format!("({})", children.join(","));
            if let Some(support) = node.support {
                s.push_str(&format_float(support * self.support_scale));
            } else if let Some(name) = &node.name {
                s.push_str(&quote_label(name));
            }
            s
        };
        if let Some(length) = node.length {
            text.push(':');
            text.push_str(&format_float(length));
        }
        text
    }

    fn normalise_support(&mut self) {
        // Supports may be on a 0-100 scale (IQ-TREE, RAxML) or a 0-1 scale (FastTree, MrBayes).
        // Any value above 1 means the whole tree uses percentages.
        let is_percent = self.nodes.iter().filter_map(|n| n.support).any(|s| s > 1.0);
        if is_percent {
            self.support_scale = 100.0;
            for node in self.nodes.iter_mut() {
                if let Some(s) = node.support.as_mut() {
                    *s /= 100.0;
                }
            }
        }
    }

    fn check_leaf_names(&self) -> Result<()> {
        let mut seen = HashSet::new();
        for node in self.nodes.iter().filter(|n| n.is_leaf()) {
            let name = node.name.as_deref().unwrap_or_default();
            if name.is_empty() {
                return Err(PipelineError::malformed_tree(&self.label, "a leaf has no name"));
            }
            if !seen.insert(name) {
                return Err(PipelineError::malformed_tree(&self.label,
                                                         format!("duplicate leaf name {}", name)));
            }
        }
        Ok(())
    }
}


fn quote_label(label: &str) -> String {
    if label.chars().any(|c| "()[]':;, \t".contains(c)) {
        format!("'{}'", label.replace('\'', "''"))
    } else {
        label.to_string()
    }
}


struct NewickParser<'a> {
    chars: Vec<char>,
    pos: usize,
    label: &'a str,
    nodes: Vec<Node>,
}

impl<'a> NewickParser<'a> {
    fn new(text: &str, label: &'a str) -> Self {
        NewickParser { chars: text.chars().collect(), pos: 0, label, nodes: Vec::new() }
    }

    fn parse(&mut self) -> Result<(Vec<Node>, usize)> {
        self.skip_whitespace_and_comments()?;
        if self.peek().is_none() {
            return Err(self.error("file contains no tree"));
        }
        let root = self.parse_subtree()?;
        self.skip_whitespace_and_comments()?;
        match self.peek() {
            Some(';') => { self.pos += 1; }
            None => {}
            Some(')') => return Err(self.error("unbalanced parentheses (extra ')')")),
            Some(c) => return Err(self.error(&format!("unexpected '{}' after tree", c))),
        }
        self.skip_whitespace_and_comments()?;
        if self.peek().is_some() {
            return Err(self.error("unexpected text after ';'"));
        }
        Ok((std::mem::take(&mut self.nodes), root))
    }

    fn parse_subtree(&mut self) -> Result<usize> {
        self.skip_whitespace_and_comments()?;
        let mut children = Vec::new();
        if self.peek() == Some('(') {
            self.pos += 1;
            loop {
                children.push(self.parse_subtree()?);
                self.skip_whitespace_and_comments()?;
                match self.peek() {
                    Some(',') => { self.pos += 1; }
                    Some(')') => { self.pos += 1; break; }
                    None | Some(';') => return Err(self.error("unbalanced parentheses (missing ')')")),
                    Some(c) => return Err(self.error(&format!("unexpected '{}'", c))),
                }
            }
        }
        let label = self.parse_label()?;
        let length = self.parse_length()?;
        let node = if children.is_empty() {
            Node { name: label, support: None, length, children }
        } else {
            let support = match label {
                Some(text) => Some(self.parse_support(&text)?),
                None => None,
            };
            Node { name: None, support, length, children }
        };
        self.nodes.push(node);
        Ok(self.nodes.len() - 1)
    }

    fn parse_label(&mut self) -> Result<Option<String>> {
        self.skip_whitespace_and_comments()?;
        if self.peek() == Some('\'') {
            self.pos += 1;
            let mut label = String::new();
            loop {
                match self.peek() {
                    None => return Err(self.error("unterminated quoted label")),
                    Some('\'') if self.peek_at(1) == Some('\'') => { label.push('\''); self.pos += 2; }
                    Some('\'') => { self.pos += 1; break; }
                    Some(c) => { label.push(c); self.pos += 1; }
                }
            }
            return Ok(Some(label));
        }
        let token = self.read_token();
        Ok(if token.is_empty() { None } else { Some(token) })
    }

    fn parse_length(&mut self) -> Result<Option<f64>> {
        self.skip_whitespace_and_comments()?;
        if self.peek() != Some(':') {
            return Ok(None);
        }
        self.pos += 1;
        self.skip_whitespace_and_comments()?;
        let token = self.read_token();
        match token.parse::<f64>() {
            Ok(length) if length.is_finite() => Ok(Some(length)),
            _ => Err(self.error(&format!("branch length '{}' is not numeric", token))),
        }
    }

    fn parse_support(&self, text: &str) -> Result<f64> {
        // IQ-TREE writes "SH-aLRT/UFBoot" pairs when both are requested, in which case the last
        // value is the bootstrap.
        let value = text.rsplit('/').next().unwrap_or(text);
        match value.trim().parse::<f64>() {
            Ok(s) if s.is_finite() && s >= 0.0 && s <= 100.0 => Ok(s),
            _ => Err(self.error(&format!("support value '{}' is not numeric", text))),
        }
    }

    fn read_token(&mut self) -> String {
        let mut token = String::new();
        while let Some(c) = self.peek() {
            if "(),:;[".contains(c) || c.is_whitespace() { break; }
            token.push(c);
            self.pos += 1;
        }
        token
    }

    fn skip_whitespace_and_comments(&mut self) -> Result<()> {
        while let Some(c) = self.peek() {
            if c.is_whitespace() {
                self.pos += 1;
            } else if c == '[' {
                while self.peek() != Some(']') {
                    if self.peek().is_none() {
                        return Err(self.error("unterminated comment"));
                    }
                    self.pos += 1;
                }
                self.pos += 1;
            } else {
                break;
            }
        }
        Ok(())
    }

    fn peek(&self) -> Option<char> {
        self.chars.get(self.pos).copied()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.chars.get(self.pos + offset).copied()
    }

    fn error(&self, reason: &str) -> PipelineError {
        PipelineError::malformed_tree(self.label, format!("{} (at character {})", reason, self.pos + 1))
    }
}


/// The outcome of loading every tree in a directory: the trees that loaded plus the per-file
/// errors for the ones that didn't.
pub struct LoadedTrees {
    pub trees: Vec<PhyloTree>,
    pub rejected: Vec<PipelineError>,
}


pub fn load_tree_dir(tree_dir: &Path) -> Result<LoadedTrees> {
    let files = crate::misc::find_files_with_extension(tree_dir, "treefile")?;
    load_tree_files(&files)
}


pub fn load_tree_files(files: &[std::path::PathBuf]) -> Result<LoadedTrees> {
    // A bad tree file only costs that one tree. Structural failures (e.g. I/O) abort the load.
    let mut trees: Vec<PhyloTree> = Vec::new();
    let mut rejected = Vec::new();
    for file in files {
        match PhyloTree::load(file) {
            Ok(tree) => {
                if trees.iter().any(|t| t.label == tree.label) {
                    rejected.push(PipelineError::malformed_tree(
                        &file.display().to_string(), format!("duplicate tree label {}", tree.label)));
                } else {
                    trees.push(tree);
                }
            }
            Err(e) if e.is_per_unit() => rejected.push(e),
            Err(e) => return Err(e),
        }
    }
    trees.sort_by(|a, b| a.label.cmp(&b.label));
    if trees.len() < 2 {
        return Err(PipelineError::InsufficientTrees { found: trees.len() });
    }
    Ok(LoadedTrees { trees, rejected })
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::make_test_file;
    use tempfile::tempdir;

    #[test]
    fn test_parse_simple() {
        let tree = PhyloTree::from_newick("((A:0.1,B:0.2)95:0.05,(C:0.3,D:0.4)80:0.06);", "t").unwrap();
        assert_eq!(tree.leaf_count(), 4);
        let mut names = tree.leaf_names();
        names.sort();
        assert_eq!(names, vec!["A", "B", "C", "D"]);
        assert_eq!(tree.support_scale, 100.0);
        let supports: Vec<f64> = tree.nodes.iter().filter_map(|n| n.support).collect();
        assert_eq!(supports, vec![0.95, 0.8]);
        let root = &tree.nodes[tree.root];
        assert_eq!(root.children.len(), 2);
        assert_eq!(root.length, None);
    }

    #[test]
    fn test_parse_unit_scale_support() {
        let tree = PhyloTree::from_newick("(A,B,(C,D)0.75);", "t").unwrap();
        assert_eq!(tree.support_scale, 1.0);
        assert_eq!(tree.nodes.iter().filter_map(|n| n.support).collect::<Vec<_>>(), vec![0.75]);
    }

    #[test]
    fn test_parse_iqtree_style() {
        let text = "(seq_1:0.0000010000,seq_2:0.0123,(seq_3:0.01,seq_4:0.02)87.5/100:0.003);\n";
        let tree = PhyloTree::from_newick(text, "t").unwrap();
        assert_eq!(tree.nodes.iter().filter_map(|n| n.support).collect::<Vec<_>>(), vec![1.0]);
    }

    #[test]
    fn test_parse_quotes_and_comments() {
        let tree = PhyloTree::from_newick("('a b':1,'it''s':2,[comment](c,d)[x]);", "t").unwrap();
        let mut names = tree.leaf_names();
        names.sort();
        assert_eq!(names, vec!["a b", "c", "d", "it's"]);
    }

    #[test]
    fn test_malformed_trees() {
        let bad = ["((A,B),(C,D);", "((A,B),(C,D)));", "((A,B),(C,A));", "((A,B)x,(C,D));",
                   "((A:abc,B),(C,D));", "((A,B),(C,D)); (E,F);", "", "((A,B),(,D));",
                   "('A,B),(C,D));"];
        for text in bad {
            match PhyloTree::from_newick(text, "bad") {
                Err(PipelineError::MalformedTree { file, .. }) => assert_eq!(file, "bad"),
                other => panic!("{} should be malformed, got {:?}", text, other),
            }
        }
    }

    #[test]
    fn test_newick_round_trip() {
        let text = "((A:0.1,B:0.2)95:0.05,(C:0.3,'D E':0.4)80:0.06,F:1);";
        let tree = PhyloTree::from_newick(text, "t").unwrap();
        assert_eq!(tree.to_newick(), text);
        let again = PhyloTree::from_newick(&tree.to_newick(), "t").unwrap();
        assert_eq!(again, tree);
    }

    #[test]
    fn test_traversal_orders() {
        let tree = PhyloTree::from_newick("((A,B),C);", "t").unwrap();
        let pre = tree.preorder();
        assert_eq!(pre[0], tree.root);
        let post = tree.postorder();
        assert_eq!(*post.last().unwrap(), tree.root);
        assert_eq!(pre.len(), 5);
    }

    #[test]
    fn test_load_rejects_small_trees() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("7.treefile");
        make_test_file(&path, "(A,B,C);");
        match PhyloTree::load(&path) {
            Err(PipelineError::TrivialTree { leaves, .. }) => assert_eq!(leaves, 3),
            other => panic!("expected TrivialTree, got {:?}", other),
        }
        make_test_file(&path, "(A,B,(C,D);");
        match PhyloTree::load(&path) {
            Err(PipelineError::MalformedTree { file, .. }) => assert!(file.ends_with("7.treefile")),
            other => panic!("expected MalformedTree, got {:?}", other),
        }
        make_test_file(&path, "(A,B,(C,D));");
        assert_eq!(PhyloTree::load(&path).unwrap().label, "tree_7");
    }

    #[test]
    fn test_load_tree_dir() {
        let dir = tempdir().unwrap();
        make_test_file(&dir.path().join("2.treefile"), "(A,B,(C,D)90);");
        make_test_file(&dir.path().join("1.treefile"), "(A,C,(B,D)90);");
        make_test_file(&dir.path().join("3.treefile"), "(A,B,C);");
        make_test_file(&dir.path().join("4.treefile"), "(A,B,(C,D);");
        make_test_file(&dir.path().join("notes.txt"), "not a tree");
        let loaded = load_tree_dir(dir.path()).unwrap();
        assert_eq!(loaded.trees.iter().map(|t| t.label.as_str()).collect::<Vec<_>>(),
                   vec!["tree_1", "tree_2"]);
        assert_eq!(loaded.rejected.len(), 2);

        std::fs::remove_file(dir.path().join("1.treefile")).unwrap();
        assert!(matches!(load_tree_dir(dir.path()),
                         Err(PipelineError::InsufficientTrees { found: 1 })));
    }

    #[test]
    fn test_load_tree_dir_skips_binary_file() {
        let dir = tempdir().unwrap();
        make_test_file(&dir.path().join("1.treefile"), "(A,C,(B,D)90);");
        make_test_file(&dir.path().join("2.treefile"), "(A,B,(C,D)90);");
        std::fs::write(dir.path().join("3.treefile"), b"\xff\xfe(A,B,(C,D));").unwrap();
        let loaded = load_tree_dir(dir.path()).unwrap();
        assert_eq!(loaded.trees.len(), 2);
        assert_eq!(loaded.rejected.len(), 1);
        match &loaded.rejected[0] {
            PipelineError::MalformedTree { file, reason } => {
                assert!(file.ends_with("3.treefile"));
                assert!(reason.contains("UTF-8"));
            }
            other => panic!("expected MalformedTree, got {:?}", other),
        }
    }
}
