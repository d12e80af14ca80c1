//! Terminal styling helpers.

use console::Style;

/// Green checkmark followed by `msg`.
pub fn success(msg: &str) -> String {
    let style = Style::new().green();
    format!("{} {}", style.apply_to("✓"), msg)
}

/// Red cross followed by `msg`.
pub fn error(msg: &str) -> String {
    let style = Style::new().red();
    format!("{} {}", style.apply_to("✗"), msg)
}

pub fn warn(msg: &str) -> String {
    let style = Style::new().yellow();
    format!("{} {}", style.apply_to("⚠"), msg)
}

pub fn header(msg: &str) -> String {
    Style::new().bold().apply_to(msg).to_string()
}

pub fn dim(msg: &str) -> String {
    Style::new().dim().apply_to(msg).to_string()
}

/// A count, red when non-zero.
pub fn failures(count: usize) -> String {
    let style = if count > 0 {
        Style::new().red().bold()
    } else {
        Style::new().dim()
    };
    style.apply_to(count).to_string()
}
