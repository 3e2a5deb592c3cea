//! Colored terminal output.
//!
//! Respects `NO_COLOR` and the `--color` flag.

use std::io::Write;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

/// Resolve `ColorChoice` from CLI flag and environment.
///
/// Priority: `NO_COLOR` env > `--color` flag > auto-detect TTY.
pub fn resolve_color_choice(flag: &str) -> ColorChoice {
    if std::env::var_os("NO_COLOR").is_some() {
        return ColorChoice::Never;
    }
    match flag {
        "always" => ColorChoice::Always,
        "never" => ColorChoice::Never,
        _ => ColorChoice::Auto,
    }
}

/// Styled stdout writer.
pub struct StyledOutput {
    stdout: StandardStream,
}

impl StyledOutput {
    pub fn new(choice: ColorChoice) -> Self {
        Self {
            stdout: StandardStream::stdout(choice),
        }
    }

    fn writeln_styled(&mut self, text: &str, color: Option<Color>, bold: bool) {
        let mut spec = ColorSpec::new();
        spec.set_fg(color).set_bold(bold);
        let _ = self.stdout.set_color(&spec);
        let _ = writeln!(self.stdout, "{}", text);
        let _ = self.stdout.reset();
    }

    /// Green bold line.
    pub fn success(&mut self, text: &str) {
        self.writeln_styled(text, Some(Color::Green), true);
    }

    /// Red bold line.
    pub fn error(&mut self, text: &str) {
        self.writeln_styled(text, Some(Color::Red), true);
    }

    /// Cyan bold line.
    pub fn heading(&mut self, text: &str) {
        self.writeln_styled(text, Some(Color::Cyan), true);
    }

    /// Unstyled text, printed as is.
    pub fn plain(&mut self, text: &str) {
        let _ = write!(self.stdout, "{}", text);
    }

    pub fn flush(&mut self) {
        let _ = self.stdout.flush();
    }
}
