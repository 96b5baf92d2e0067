// This file contains the code for drawing trees as PNG phylograms (the neighborhoods render
// subcommand and the cluster-tree images) and for saving trees as Newick and JSON.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use ab_glyph::{Font, FontArc, PxScale, ScaleFont};
use image::{ImageBuffer, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_circle_mut, draw_line_segment_mut, draw_text_mut};
use std::fs::{File, read_to_string};
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{PipelineError, Result};
use crate::log::{section_header, explanation};
use crate::misc::{check_if_file_exists, file_label, format_float, quit_with_error, spinner};
use crate::tree::PhyloTree;


// Some hard-coded settings. Values between 0 and 1 are relative to the image width.
static BORDER_GAP: f64 = 0.03;
static LABEL_SPACE: f64 = 0.25;
static TITLE_SPACE: f64 = 0.06;
static MIN_ROW_HEIGHT: u32 = 12;
static BACKGROUND_COLOUR: image::Rgb<u8> = Rgb([255, 255, 255]);  // white
static LINE_COLOUR: image::Rgb<u8> = Rgb([204, 204, 204]);        // #CCCCCC
static LEAF_COLOUR: image::Rgb<u8> = Rgb([107, 194, 69]);         // #6BC245
static INTERNAL_COLOUR: image::Rgb<u8> = Rgb([82, 113, 255]);     // #5271FF
static TEXT_COLOUR: image::Rgb<u8> = Rgb([0, 0, 0]);              // black
static TITLE_COLOUR: image::Rgb<u8> = Rgb([0, 128, 0]);           // green


pub fn render(in_tree: PathBuf, out_png: PathBuf, title: Option<String>, res: u32,
              font: Option<PathBuf>) {
    check_settings(&in_tree, res, &font);
    starting_message();
    print_settings(&in_tree, &out_png, &title, res, &font);
    let title = title.unwrap_or_else(|| file_label(&in_tree));
    let tree = load_any_tree(&in_tree).unwrap_or_else(|e| quit_with_error(&e.to_string()));
    let font = font.map(|f| load_font(&f).unwrap_or_else(|e| quit_with_error(&e.to_string())));
    let pb = spinner("drawing tree...");
    let result = render_tree(&tree, &title, &out_png, res, font.as_ref());
    pb.finish_and_clear();
    if let Err(e) = result {
        quit_with_error(&e.to_string());
    }
    finished_message(&out_png);
}


fn check_settings(in_tree: &Path, res: u32, font: &Option<PathBuf>) {
    check_if_file_exists(in_tree);
    if let Some(f) = font { check_if_file_exists(f); }
    if res < 100   { quit_with_error("--res cannot be less than 100"); }
    if res > 10000 { quit_with_error("--res cannot be greater than 10000"); }
}


fn starting_message() {
    section_header("Starting neighborhoods render");
    explanation("This command draws a Newick tree as a rectangular phylogram, with leaves in \
                 green and internal nodes in blue.");
}


fn print_settings(in_tree: &Path, out_png: &Path, title: &Option<String>, res: u32,
                  font: &Option<PathBuf>) {
    eprintln!("Settings:");
    eprintln!("  --in_tree {}", in_tree.display());
    eprintln!("  --out_png {}", out_png.display());
    if let Some(t) = title { eprintln!("  --title {}", t); }
    eprintln!("  --res {}", res);
    match font {
        Some(f) => eprintln!("  --font {}", f.display()),
        None    => eprintln!("  --font none (no text will be drawn)"),
    }
    eprintln!();
}


fn finished_message(out_png: &Path) {
    section_header("Finished!");
    eprintln!("Tree image: {}", out_png.display());
    eprintln!();
}


/// Loads a tree for drawing. Unlike tree loading for distances, small trees are fine here.
fn load_any_tree(filename: &Path) -> Result<PhyloTree> {
    let text = read_to_string(filename).map_err(|e| PipelineError::io(filename, e))?;
    PhyloTree::from_newick(&text, &file_label(filename))
}


pub fn load_font(filename: &Path) -> Result<FontArc> {
    let bytes = std::fs::read(filename).map_err(|e| PipelineError::io(filename, e))?;
    FontArc::try_from_vec(bytes).map_err(|e| PipelineError::CorruptInput {
        file: filename.display().to_string(), message: e.to_string() })
}


/// Node positions for a rectangular phylogram: x is the distance from the root scaled to 0-1,
/// y is in rows, with leaves on consecutive rows (in preorder) and each internal node halfway
/// between its first and last child. Trees without branch lengths are drawn by node depth.
pub fn layout(tree: &PhyloTree) -> Vec<(f64, f64)> {
    let has_lengths = tree.nodes.iter().any(|n| n.length.unwrap_or(0.0) > 0.0);
    let mut x = vec![0.0; tree.nodes.len()];
    for i in tree.preorder() {
        for &c in &tree.nodes[i].children {
            let step = if has_lengths { tree.nodes[c].length.unwrap_or(0.0).max(0.0) } else { 1.0 };
            x[c] = x[i] + step;
        }
    }
    let max_x = x.iter().cloned().fold(0.0, f64::max);
    if max_x > 0.0 {
        for v in x.iter_mut() { *v /= max_x; }
    }

    let mut y = vec![0.0; tree.nodes.len()];
    let mut next_row = 0.0;
    for i in tree.preorder() {
        if tree.nodes[i].is_leaf() {
            y[i] = next_row;
            next_row += 1.0;
        }
    }
    for i in tree.postorder() {
        let children = &tree.nodes[i].children;
        if let (Some(&first), Some(&last)) = (children.first(), children.last()) {
            y[i] = (y[first] + y[last]) / 2.0;
        }
    }
    x.into_iter().zip(y).collect()
}


/// Draws the tree to a PNG `res` pixels wide. Labels, support values and the title are only
/// drawn when a font is given.
pub fn render_tree(tree: &PhyloTree, title: &str, png_filename: &Path, res: u32,
                   font: Option<&FontArc>) -> Result<()> {
    let positions = layout(tree);
    let rows = tree.leaf_count().max(1) as u32;
    let row_height = (res / 40).max(MIN_ROW_HEIGHT);
    let border = (res as f64 * BORDER_GAP) as u32;
    let top = border + if font.is_some() { (res as f64 * TITLE_SPACE) as u32 } else { 0 };
    let height = top + rows * row_height + border;
    let label_space = if font.is_some() { (res as f64 * LABEL_SPACE) as u32 } else { 0 };
    let plot_width = res.saturating_sub(2 * border + label_space).max(1) as f64;
    let dot_radius = (row_height / 4).max(2) as i32;
    let line_width = (res / 500).max(1) as i32;

    let to_pixel = |(x, y): (f64, f64)| -> (f32, f32) {
        ((border as f64 + x * plot_width) as f32,
         (top as f64 + (y + 0.5) * row_height as f64) as f32)
    };
    let mut img: RgbImage = ImageBuffer::from_pixel(res, height, BACKGROUND_COLOUR);

    // Branches first, so the dots sit on top of them.
    for (i, node) in tree.nodes.iter().enumerate() {
        let (px, py) = to_pixel(positions[i]);
        for &c in &node.children {
            let (cx, cy) = to_pixel(positions[c]);
            draw_thick_line(&mut img, (px, py), (px, cy), line_width);
            draw_thick_line(&mut img, (px, cy), (cx, cy), line_width);
        }
    }
    for (i, node) in tree.nodes.iter().enumerate() {
        let (px, py) = to_pixel(positions[i]);
        let colour = if node.is_leaf() { LEAF_COLOUR } else { INTERNAL_COLOUR };
        draw_filled_circle_mut(&mut img, (px as i32, py as i32), dot_radius, colour);
    }

    if let Some(font) = font {
        let scale = PxScale::from(row_height as f32 * 0.8);
        let small_scale = PxScale::from(row_height as f32 * 0.6);
        for (i, node) in tree.nodes.iter().enumerate() {
            let (px, py) = to_pixel(positions[i]);
            let text_y = (py - row_height as f32 * 0.4) as i32;
            if let Some(name) = &node.name {
                if node.is_leaf() {
                    let text_x = px as i32 + 2 * dot_radius;
                    draw_text_mut(&mut img, TEXT_COLOUR, text_x, text_y, scale, font, name);
                }
            }
            if let Some(support) = node.support {
                let text = format_float(support * tree.support_scale);
                let text_width = calculate_text_width(&text, small_scale, font);
                let text_x = (px - text_width - dot_radius as f32).max(0.0) as i32;
                let text_y = (py - row_height as f32 * 0.7) as i32;
                draw_text_mut(&mut img, TEXT_COLOUR, text_x, text_y, small_scale, font, &text);
            }
        }
        let title_scale = PxScale::from((res as f64 * TITLE_SPACE * 0.6) as f32);
        draw_text_mut(&mut img, TITLE_COLOUR, border as i32, border as i32, title_scale, font,
                      title);
    }

    img.save(png_filename).map_err(|e| PipelineError::Output {
        path: png_filename.to_path_buf(), message: e.to_string() })
}


fn draw_thick_line(img: &mut RgbImage, start: (f32, f32), end: (f32, f32), width: i32) {
    let vertical = (start.0 - end.0).abs() < (start.1 - end.1).abs();
    for offset in 0..width {
        let o = (offset - width / 2) as f32;
        let (s, e) = if vertical { ((start.0 + o, start.1), (end.0 + o, end.1)) }
                     else        { ((start.0, start.1 + o), (end.0, end.1 + o)) };
        draw_line_segment_mut(img, s, e, LINE_COLOUR);
    }
}


fn calculate_text_width(text: &str, scale: PxScale, font: &FontArc) -> f32 {
    let scaled_font = font.as_scaled(scale);
    text.chars().map(|c| scaled_font.h_advance(scaled_font.glyph_id(c))).sum()
}


/// Saves a tree as Newick and as JSON (the node arena with names, lengths and supports).
pub fn save_tree_files(tree: &PhyloTree, newick_filename: &Path, json_filename: &Path)
        -> Result<()> {
    let mut f = File::create(newick_filename).map_err(|e| PipelineError::io(newick_filename, e))?;
    writeln!(f, "{}", tree.to_newick()).map_err(|e| PipelineError::io(newick_filename, e))?;
    let json = serde_json::to_string_pretty(tree).map_err(|e| PipelineError::Output {
        path: json_filename.to_path_buf(), message: e.to_string() })?;
    let mut f = File::create(json_filename).map_err(|e| PipelineError::io(json_filename, e))?;
    f.write_all(json.as_bytes()).map_err(|e| PipelineError::io(json_filename, e))
}


#[cfg(test)]
mod tests {
    use super::*;
    use crate::tests::assert_almost_eq;
    use tempfile::tempdir;

    #[test]
    fn test_layout() {
        let tree = PhyloTree::from_newick("((A:1,B:3)90:1,C:2);", "t").unwrap();
        let positions = layout(&tree);
        let find = |name: &str| tree.nodes.iter().position(|n| n.name.as_deref() == Some(name))
                                                 .unwrap();
        let (a, b, c) = (find("A"), find("B"), find("C"));
        assert_eq!(positions[tree.root].0, 0.0);
        assert_almost_eq(positions[b].0, 1.0, 1e-12);
        assert_almost_eq(positions[a].0, 0.5, 1e-12);
        assert_almost_eq(positions[c].0, 0.5, 1e-12);
        assert_eq!((positions[a].1, positions[b].1, positions[c].1), (0.0, 1.0, 2.0));
        let ab = tree.nodes[tree.root].children[0];
        assert_eq!(positions[ab].1, 0.5);
        assert_eq!(positions[tree.root].1, 1.25);
    }

    #[test]
    fn test_layout_without_lengths() {
        let tree = PhyloTree::from_newick("((A,B),C);", "t").unwrap();
        let positions = layout(&tree);
        let xs: Vec<f64> = tree.nodes.iter().enumerate().filter(|(_, n)| n.is_leaf())
                                     .map(|(i, _)| positions[i].0).collect();
        assert!(xs.contains(&1.0));
        assert!(xs.contains(&0.5));
    }

    #[test]
    fn test_render_without_font() {
        let dir = tempdir().unwrap();
        let png = dir.path().join("tree.png");
        let tree = PhyloTree::from_newick("((A:1,B:1)95:1,(C:1,D:1)80:1);", "t").unwrap();
        render_tree(&tree, "blaTEM", &png, 400, None).unwrap();
        let img = image::open(&png).unwrap().to_rgb8();
        assert_eq!(img.width(), 400);
        assert!(img.pixels().any(|p| *p == LEAF_COLOUR));
        assert!(img.pixels().any(|p| *p == INTERNAL_COLOUR));
        assert!(img.pixels().any(|p| *p == LINE_COLOUR));
    }

    #[test]
    fn test_save_tree_files() {
        let dir = tempdir().unwrap();
        let newick = dir.path().join("t.newick");
        let json = dir.path().join("t.json");
        let tree = PhyloTree::from_newick("((A:1,B:1)95:1,C:2);", "upgma_rf").unwrap();
        save_tree_files(&tree, &newick, &json).unwrap();
        assert_eq!(read_to_string(&newick).unwrap(), "((A:1,B:1)95:1,C:2);\n");
        let value: serde_json::Value = serde_json::from_str(&read_to_string(&json).unwrap()).unwrap();
        assert_eq!(value["label"], "upgma_rf");
        assert_eq!(value["nodes"].as_array().unwrap().len(), 5);
    }

    #[test]
    fn test_load_font_rejects_garbage() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("font.ttf");
        crate::tests::make_test_file(&path, "not a font");
        assert!(matches!(load_font(&path), Err(PipelineError::CorruptInput { .. })));
    }
}
