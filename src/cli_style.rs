use clap::builder::styling::{AnsiColor, Color, Style};
use clap::builder::Styles;
use crossterm::style::{Attribute, Color as CtColor, Stylize};
use indicatif::{ProgressBar, ProgressStyle};
use unicode_width::UnicodeWidthStr;

use transfer_engine::transfer::TransferStatus;

// ═══════════════════════════════════════════════════════════════════════════════
// Clap Styles
// ═══════════════════════════════════════════════════════════════════════════════

pub fn get_styles() -> Styles {
    Styles::styled()
        .usage(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .header(
            Style::new()
                .bold()
                .underline()
                .fg_color(Some(Color::Ansi(AnsiColor::Cyan))),
        )
        .literal(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Green))),
        )
        .error(
            Style::new()
                .bold()
                .fg_color(Some(Color::Ansi(AnsiColor::Red))),
        )
        .placeholder(Style::new().fg_color(Some(Color::Ansi(AnsiColor::BrightBlack))))
}

// ═══════════════════════════════════════════════════════════════════════════════
// Palette
// ═══════════════════════════════════════════════════════════════════════════════

pub mod colors {
    use crossterm::style::Color;

    pub const CYAN: Color = Color::Rgb {
        r: 0,
        g: 255,
        b: 255,
    };
    pub const GREEN: Color = Color::Rgb {
        r: 0,
        g: 255,
        b: 136,
    };
    pub const ORANGE: Color = Color::Rgb {
        r: 255,
        g: 165,
        b: 0,
    };
    pub const YELLOW: Color = Color::Rgb {
        r: 255,
        g: 255,
        b: 0,
    };
    pub const RED: Color = Color::Rgb {
        r: 255,
        g: 85,
        b: 85,
    };
    pub const DIM: Color = Color::Rgb {
        r: 128,
        g: 128,
        b: 128,
    };
    pub const WHITE: Color = Color::Rgb {
        r: 255,
        g: 255,
        b: 255,
    };
}

mod box_chars {
    pub const ROUND_TOP_LEFT: &str = "╭";
    pub const ROUND_TOP_RIGHT: &str = "╮";
    pub const ROUND_BOTTOM_LEFT: &str = "╰";
    pub const ROUND_BOTTOM_RIGHT: &str = "╯";
    pub const SINGLE_HORIZONTAL: &str = "─";
    pub const SINGLE_VERTICAL: &str = "│";
    pub const T_LEFT: &str = "├";
    pub const T_RIGHT: &str = "┤";
    pub const T_TOP: &str = "┬";
    pub const T_BOTTOM: &str = "┴";
    pub const CROSS: &str = "┼";
    pub const BULLET_EMPTY: &str = "○";
    pub const CHECK: &str = "✓";
    pub const CROSS_MARK: &str = "✗";
}

/// Color used for a transfer status everywhere in the console.
pub fn status_color(status: TransferStatus) -> CtColor {
    match status {
        TransferStatus::Queued => colors::DIM,
        TransferStatus::InProgress => colors::CYAN,
        TransferStatus::Paused => colors::YELLOW,
        TransferStatus::Completed => colors::GREEN,
        TransferStatus::Failed => colors::RED,
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Status Lines
// ═══════════════════════════════════════════════════════════════════════════════

pub fn print_success(message: &str) {
    println!(
        " {} {}",
        box_chars::CHECK.with(colors::GREEN).bold(),
        message.with(colors::GREEN)
    );
}

pub fn print_error(message: &str) {
    eprintln!(
        " {} {}",
        box_chars::CROSS_MARK.with(colors::RED).bold(),
        message.with(colors::RED)
    );
}

pub fn print_warning(message: &str) {
    println!(
        " {} {}",
        "⚠".with(colors::ORANGE).bold(),
        message.with(colors::ORANGE)
    );
}

pub fn print_empty_list(message: &str) {
    println!(
        "  {} {}",
        box_chars::BULLET_EMPTY.with(colors::DIM),
        message.with(colors::DIM).attribute(Attribute::Italic)
    );
}

// ═══════════════════════════════════════════════════════════════════════════════
// Progress Bar
// ═══════════════════════════════════════════════════════════════════════════════

const BAR_TEMPLATE: &str =
    "{spinner:.cyan} {prefix:>14.cyan.bold} [{elapsed_precise}] {wide_bar:.cyan/blue} {pos:>3}% {msg}";

const BAR_TICKS: &str = "⠁⠂⠄⡀⢀⠠⠐⠈ ";

const BAR_CHARS: &str = "█▓▒░  ";

/// Percentage bar for one transfer. Falls back to the default style if the
/// template is rejected.
pub fn transfer_bar(prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new(100);
    let bar = match ProgressStyle::with_template(BAR_TEMPLATE) {
        Ok(style) => bar.with_style(style.tick_chars(BAR_TICKS).progress_chars(BAR_CHARS)),
        Err(_) => bar,
    };
    bar.set_prefix(prefix.to_string());
    bar
}

// ═══════════════════════════════════════════════════════════════════════════════
// Table Display
// ═══════════════════════════════════════════════════════════════════════════════

pub struct TableBuilder {
    headers: Vec<String>,
    rows: Vec<Vec<(String, CtColor)>>,
    col_widths: Vec<usize>,
}

impl TableBuilder {
    pub fn new(headers: Vec<&str>) -> Self {
        let col_widths: Vec<usize> = headers.iter().map(|h| h.width()).collect();
        TableBuilder {
            headers: headers.into_iter().map(String::from).collect(),
            rows: Vec::new(),
            col_widths,
        }
    }

    /// Add a row whose cells are each printed in their own color.
    pub fn add_row(&mut self, row: Vec<(String, CtColor)>) {
        for (i, (cell, _)) in row.iter().enumerate() {
            if i < self.col_widths.len() {
                self.col_widths[i] = self.col_widths[i].max(cell.width());
            }
        }
        self.rows.push(row);
    }

    fn print_border(&self, left: &str, join: &str, right: &str) {
        let segments: Vec<String> = self
            .col_widths
            .iter()
            .map(|w| box_chars::SINGLE_HORIZONTAL.repeat(w + 2))
            .collect();
        println!(
            "{}",
            format!("{}{}{}", left, segments.join(join), right).with(colors::CYAN)
        );
    }

    pub fn print(&self) {
        self.print_border(
            box_chars::ROUND_TOP_LEFT,
            box_chars::T_TOP,
            box_chars::ROUND_TOP_RIGHT,
        );

        print!("{}", box_chars::SINGLE_VERTICAL.with(colors::CYAN));
        for (i, header) in self.headers.iter().enumerate() {
            let padding = self.col_widths[i].saturating_sub(header.width());
            print!(
                " {}{} {}",
                header.as_str().with(colors::CYAN).bold(),
                " ".repeat(padding),
                box_chars::SINGLE_VERTICAL.with(colors::CYAN)
            );
        }
        println!();

        self.print_border(box_chars::T_LEFT, box_chars::CROSS, box_chars::T_RIGHT);

        for row in &self.rows {
            print!("{}", box_chars::SINGLE_VERTICAL.with(colors::CYAN));
            for (i, (cell, color)) in row.iter().enumerate() {
                let width = self.col_widths.get(i).copied().unwrap_or(0);
                let padding = width.saturating_sub(cell.width());
                print!(
                    " {}{} {}",
                    cell.as_str().with(*color),
                    " ".repeat(padding),
                    box_chars::SINGLE_VERTICAL.with(colors::CYAN)
                );
            }
            println!();
        }

        self.print_border(
            box_chars::ROUND_BOTTOM_LEFT,
            box_chars::T_BOTTOM,
            box_chars::ROUND_BOTTOM_RIGHT,
        );
    }
}
