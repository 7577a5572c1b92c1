use std::fmt::Display;
use std::io::IsTerminal;
use std::time::{Duration, Instant};

use indicatif::{ProgressBar, ProgressDrawTarget, ProgressStyle};
use nu_ansi_term::{Color, Style};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Theme {
    Auto,
    Light,
    Dark,
    Plain,
}

impl Theme {
    /// Colors to use, or `None` for uncolored output.
    fn palette(self, tty: bool) -> Option<Palette> {
        match self {
            Theme::Plain => None,
            _ if !tty => None,
            Theme::Light => Some(Palette::light()),
            Theme::Dark | Theme::Auto => Some(Palette::dark()),
        }
    }
}

#[derive(Clone, Copy)]
pub enum Status {
    Ok,
    Note,
    Problem,
}

impl Status {
    fn icon(self) -> &'static str {
        match self {
            Status::Ok => "✔",
            Status::Note => "ℹ",
            Status::Problem => "⚠",
        }
    }
}

/// Text-mode printer for the admin commands.
pub struct Ui {
    palette: Option<Palette>,
    quiet: bool,
}

impl Ui {
    pub fn new(theme: Theme, quiet: bool) -> Self {
        let palette = if quiet {
            None
        } else {
            theme.palette(std::io::stdout().is_terminal())
        };

        #[cfg(windows)]
        if palette.is_some() {
            let _ = nu_ansi_term::enable_ansi_support();
        }

        Self { palette, quiet }
    }

    fn paint(&self, pick: impl Fn(&Palette) -> Style, text: impl Into<String>) -> String {
        let text = text.into();
        match &self.palette {
            Some(palette) => pick(palette).paint(text).to_string(),
            None => text,
        }
    }

    fn heading(&self, title: &str) {
        if self.quiet {
            println!("{title}");
        } else {
            println!("{}", self.paint(|p| p.heading, format!("▸ {title}")));
        }
    }

    pub fn gap(&self) {
        if !self.quiet {
            println!();
        }
    }

    /// Right-aligned `key: value` rows under a heading.
    pub fn pairs<'a, V: Display>(&self, title: &str, rows: impl IntoIterator<Item = (&'a str, V)>) {
        let rows: Vec<(&str, String)> = rows
            .into_iter()
            .map(|(key, value)| (key, value.to_string()))
            .collect();
        if rows.is_empty() {
            return;
        }
        self.heading(title);
        let width = rows.iter().map(|(key, _)| key.len()).max().unwrap_or(0);
        for (key, value) in rows {
            let key = self.paint(|p| p.key, format!("{key:>width$}:"));
            let value = self.paint(|p| p.value, value);
            println!("  {key} {value}");
        }
    }

    pub fn bullets(&self, title: &str, entries: impl IntoIterator<Item = String>) {
        let mut entries = entries.into_iter().peekable();
        if entries.peek().is_none() {
            return;
        }
        self.heading(title);
        let bullet = if self.palette.is_some() {
            self.paint(|p| p.bullet, "•")
        } else {
            "-".to_owned()
        };
        for entry in entries {
            println!("  {bullet} {entry}");
        }
    }

    /// One status line; problems go to stderr.
    pub fn status(&self, status: Status, message: &str) {
        let line = if self.quiet {
            message.to_owned()
        } else {
            let icon = match status {
                Status::Ok => self.paint(|p| p.ok, status.icon()),
                Status::Note => self.paint(|p| p.note, status.icon()),
                Status::Problem => self.paint(|p| p.problem, status.icon()),
            };
            format!("{icon} {message}")
        };
        match status {
            Status::Problem => eprintln!("{line}"),
            Status::Ok | Status::Note => println!("{line}"),
        }
    }

    /// Spinner on stderr while `label` runs; hidden unless stderr is a terminal.
    pub fn task(&self, label: impl Into<String>) -> Task<'_> {
        let label = label.into();
        let bar = (!self.quiet && std::io::stderr().is_terminal()).then(|| {
            let bar = ProgressBar::with_draw_target(None, ProgressDrawTarget::stderr());
            if let Ok(style) = ProgressStyle::with_template("{spinner} {msg} {elapsed}") {
                bar.set_style(style.tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏"));
            }
            bar.set_message(label.clone());
            bar.enable_steady_tick(Duration::from_millis(120));
            bar
        });
        Task {
            ui: self,
            label,
            started: Instant::now(),
            bar,
            done: false,
        }
    }
}

pub struct Task<'a> {
    ui: &'a Ui,
    label: String,
    started: Instant,
    bar: Option<ProgressBar>,
    done: bool,
}

impl Task<'_> {
    pub fn finish(mut self) -> Duration {
        self.done = true;
        if let Some(bar) = self.bar.take() {
            bar.finish_and_clear();
        }
        self.started.elapsed()
    }
}

impl Drop for Task<'_> {
    fn drop(&mut self) {
        if self.done {
            return;
        }
        let message = format!(
            "{} stopped after {}",
            self.label,
            format_duration(self.started.elapsed())
        );
        match self.bar.take() {
            Some(bar) => bar.abandon_with_message(message),
            None => self.ui.status(Status::Problem, &message),
        }
    }
}

pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs_f64();
    if secs >= 1.0 {
        format!("{secs:.2}s")
    } else {
        format!("{:.0}ms", secs * 1_000.0)
    }
}

pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit + 1 < UNITS.len() {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[derive(Clone, Copy)]
struct Palette {
    heading: Style,
    key: Style,
    value: Style,
    bullet: Style,
    ok: Style,
    note: Style,
    problem: Style,
}

impl Palette {
    fn dark() -> Self {
        Self {
            heading: Color::Purple.bold(),
            key: Color::LightBlue.bold(),
            value: Color::White.normal(),
            bullet: Color::LightBlue.normal(),
            ok: Color::LightGreen.bold(),
            note: Color::LightCyan.normal(),
            problem: Color::Yellow.bold(),
        }
    }

    fn light() -> Self {
        Self {
            heading: Color::Blue.bold(),
            key: Color::Black.bold(),
            value: Color::Black.normal(),
            bullet: Color::Blue.normal(),
            ok: Color::Green.bold(),
            note: Color::Purple.normal(),
            problem: Color::Red.bold(),
        }
    }
}
