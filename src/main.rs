// This is the main file of Neighborhoods and where execution starts. It mainly handles the CLI and
// then calls into other files to run whichever subcommand the user chose.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use std::path::PathBuf;
use clap::{Parser, Subcommand, crate_version};

use crate::tree_distance::RfWeighting;

mod alignment;
mod bipartition;
mod cluster;
mod dendrogram;
mod distance;
mod error;
mod log;
mod matrix;
mod metrics;
mod misc;
mod nj;
mod render;
mod similarity;
mod surrogate;
mod tree;
mod tree_distance;
mod treecluster;


#[derive(Parser)]
#[clap(name = "Neighborhoods",
       version = concat!("v", crate_version!()),
       about = "comparative genomics of resistance-gene neighbourhoods: similarity clustering \
                of alignment hits and clustering of gene trees by RF/BSD distance")]
#[command(author, version, long_about = None, disable_help_subcommand = true,
          propagate_version = true)]
#[clap(subcommand_required = true)]
#[clap(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {

    /// cluster sequences from all-vs-all alignment tables by percent identity
    Cluster {
        /// Alignment TSV files, one per batch (one or more required)
        #[clap(short = 'i', long = "alignments", required = true, num_args = 1..)]
        alignments: Vec<PathBuf>,

        /// Output directory (required)
        #[clap(short = 'o', long = "out_dir", required = true)]
        out_dir: PathBuf,

        /// FASTA files with full-length sequences for the cluster files
        #[clap(short = 'f', long = "fasta", num_args = 1.., hide_default_value = true,
               help = "FASTA files with full-length sequences [default: aligned sequences]")]
        fasta: Vec<PathBuf>,

        /// minimum percent identity for sequences to share a cluster
        #[clap(long = "min_identity", default_value = "0")]
        min_identity: f64,

        /// distance used for sequence pairs with no alignment
        #[clap(long = "no_hit_distance", default_value = "200")]
        no_hit_distance: f64,

        /// skip a batch when more than this fraction of its records are malformed
        #[clap(long = "max_error_rate", default_value = "0.5")]
        max_error_rate: f64,

        /// Number of CPU threads
        #[clap(short = 't', long = "threads", default_value = "8")]
        threads: usize,
    },

    /// collapse identical sequences into surrogate records
    Surrogate {
        /// Input FASTA file (required)
        #[clap(short = 'i', long = "in_fasta", required = true)]
        in_fasta: PathBuf,

        /// Output FASTA file (required)
        #[clap(short = 'o', long = "out_fasta", required = true)]
        out_fasta: PathBuf,
    },

    /// compute RF and BSD distance matrices for a directory of trees
    Distance {
        /// Directory of Newick trees with a .treefile extension (required)
        #[clap(short = 'i', long = "tree_dir", required = true)]
        tree_dir: PathBuf,

        /// Output directory (required)
        #[clap(short = 'o', long = "out_dir", required = true)]
        out_dir: PathBuf,

        /// Weighting for the Robinson-Foulds distance
        #[clap(long = "rf_weighting", value_enum, default_value = "length")]
        rf_weighting: RfWeighting,

        /// support (0-1) assumed for branches without a support value
        #[clap(long = "missing_support", default_value = "0.1")]
        missing_support: f64,

        /// Number of CPU threads
        #[clap(short = 't', long = "threads", default_value = "8")]
        threads: usize,
    },

    /// cluster trees from distance matrices with UPGMA and neighbor joining
    Treecluster {
        /// Distance matrix CSV files (one or more required)
        #[clap(short = 'i', long = "matrices", required = true, num_args = 1..)]
        matrices: Vec<PathBuf>,

        /// Output directory (required)
        #[clap(short = 'o', long = "out_dir", required = true)]
        out_dir: PathBuf,

        /// Root neighbor-joining trees at their last join
        #[clap(long = "root_nj")]
        root_nj: bool,

        /// Width (in pixels) of tree images
        #[clap(long = "res", default_value = "2000")]
        res: u32,

        /// TrueType font for image text
        #[clap(long = "font")]
        font: Option<PathBuf>,
    },

    /// compute tree distances and then cluster the trees (distance + treecluster)
    Trees {
        /// Directory of Newick trees with a .treefile extension (required)
        #[clap(short = 'i', long = "tree_dir", required = true)]
        tree_dir: PathBuf,

        /// Output directory (required)
        #[clap(short = 'o', long = "out_dir", required = true)]
        out_dir: PathBuf,

        /// Weighting for the Robinson-Foulds distance
        #[clap(long = "rf_weighting", value_enum, default_value = "length")]
        rf_weighting: RfWeighting,

        /// support (0-1) assumed for branches without a support value
        #[clap(long = "missing_support", default_value = "0.1")]
        missing_support: f64,

        /// Root neighbor-joining trees at their last join
        #[clap(long = "root_nj")]
        root_nj: bool,

        /// Width (in pixels) of tree images
        #[clap(long = "res", default_value = "2000")]
        res: u32,

        /// TrueType font for image text
        #[clap(long = "font")]
        font: Option<PathBuf>,

        /// Number of CPU threads
        #[clap(short = 't', long = "threads", default_value = "8")]
        threads: usize,
    },

    /// draw a Newick tree as a PNG image
    Render {
        /// Input Newick file (required)
        #[clap(short = 'i', long = "in_tree", required = true)]
        in_tree: PathBuf,

        /// File path where the PNG will be saved (required)
        #[clap(short = 'o', long = "out_png", required = true)]
        out_png: PathBuf,

        /// Title drawn above the tree
        #[clap(long = "title")]
        title: Option<String>,

        /// Width (in pixels) of the image
        #[clap(long = "res", default_value = "2000")]
        res: u32,

        /// TrueType font for image text
        #[clap(long = "font")]
        font: Option<PathBuf>,
    },
}


fn main() {
    misc::install_interrupt_handler();
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Cluster { alignments, out_dir, fasta, min_identity, no_hit_distance,
                                 max_error_rate, threads }) => {
            cluster::cluster(alignments, out_dir, fasta, min_identity, no_hit_distance,
                             max_error_rate, threads);
        },
        Some(Commands::Surrogate { in_fasta, out_fasta }) => {
            surrogate::surrogate(in_fasta, out_fasta);
        },
        Some(Commands::Distance { tree_dir, out_dir, rf_weighting, missing_support, threads }) => {
            distance::distance(tree_dir, out_dir, rf_weighting, missing_support, threads);
        },
        Some(Commands::Treecluster { matrices, out_dir, root_nj, res, font }) => {
            treecluster::treecluster(matrices, out_dir, root_nj, res, font);
        },
        Some(Commands::Trees { tree_dir, out_dir, rf_weighting, missing_support, root_nj, res,
                               font, threads }) => {
            treecluster::trees(tree_dir, out_dir, rf_weighting, missing_support, root_nj, res,
                               font, threads);
        },
        Some(Commands::Render { in_tree, out_png, title, res, font }) => {
            render::render(in_tree, out_png, title, res, font);
        },
        None => {}
    }
}
