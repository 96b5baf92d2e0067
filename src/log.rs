// This file contains functions for the stderr output that Neighborhoods shows the user.

// Copyright 2025 the Neighborhoods authors

// This file is part of Neighborhoods. Neighborhoods is free software: you can redistribute it
// and/or modify it under the terms of the GNU General Public License as published by the Free
// Software Foundation, either version 3 of the License, or (at your option) any later version.
// Neighborhoods is distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY;
// without even the implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See
// the GNU General Public License for more details. You should have received a copy of the GNU
// General Public License along with Neighborhoods. If not, see <http://www.gnu.org/licenses/>.

use chrono::Local;
use colored::Colorize;


pub fn section_header(text: &str) {
    let now = Local::now().format("%Y-%m-%d %H:%M:%S").to_string();
    let date = format!("({})", now);
    eprintln!();
    eprintln!("{} {}", text.bold().bright_yellow().underline(), date.dimmed());
}


pub fn explanation(text: &str) {
    let term_width = match term_size::dimensions() {
        Some((w, _)) => w.clamp(40, 100),
        None => 80,
    };
    let wrapped = textwrap::fill(&squash_spaces(text), term_width);
    eprintln!("{}", wrapped.dimmed());
    eprintln!();
}


pub fn warning(text: &str) {
    eprintln!("{}", format!("Warning: {}", text).yellow());
}


fn squash_spaces(text: &str) -> String {
    // Explanations are written as multi-line string literals, which leave runs of spaces where
    // the source was indented.
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}
