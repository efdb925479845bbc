//! Boxed error report printed when the board file is rejected
//!
//! Compiled into the build script and into the crate's tests.

/// Text columns inside the box
pub const LINE_WIDTH: usize = 62;

/// Clip `line` to the box width on a character boundary
pub fn fit_line(line: &str) -> String {
    if line.chars().count() > LINE_WIDTH {
        let head: String = line.chars().take(LINE_WIDTH - 3).collect();
        format!("{}...", head)
    } else {
        line.to_string()
    }
}

pub fn render(title: &str, lines: &[String]) -> String {
    format!(
        "\n\
        ╔══════════════════════════════════════════════════════════════════╗\n\
        ║  ERROR: {:<56} ║\n\
        ╠══════════════════════════════════════════════════════════════════╣\n\
        {}\n\
        ╚══════════════════════════════════════════════════════════════════╝\n",
        title,
        lines
            .iter()
            .map(|line| format!("║  • {:<width$} ║", fit_line(line), width = LINE_WIDTH))
            .collect::<Vec<_>>()
            .join("\n")
    )
}
