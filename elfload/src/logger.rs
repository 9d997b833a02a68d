#[cfg(feature = "tui")]
use core::time::Duration;
use std::{
    borrow::Cow,
    fmt::Display,
};

use colored::Colorize;
use indicatif::{
    ProgressBar,
    ProgressStyle,
};

/// Terminal logger used by the loader to report progress and recoverable anomalies
pub struct Logger {
    bar: ProgressBar,
    running: bool,
    prefix: Option<String>,
}

#[cfg(feature = "tui")]
const ANIMATION: &[&str; 9] = &[".  ", ".. ", "...", " ..", "  .", " ..", "...", "..", ""];

#[cfg(not(feature = "tui"))]
const ANIMATION: &[&str; 2] = &["...", ""];

impl Logger {
    /// A logger that draws a spinner next to the current title
    pub fn spinner() -> Self {
        let bar = ProgressBar::new_spinner();
        let style = ProgressStyle::with_template("{prefix:.magenta/red} {msg} {spinner}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(ANIMATION);
        bar.set_style(style);
        bar.set_prefix("[elf]");

        Self {
            bar,
            running: false,
            prefix: None,
        }
    }

    /// A logger that swallows everything
    pub fn quiet() -> Self {
        Self {
            bar: ProgressBar::hidden(),
            running: false,
            prefix: None,
        }
    }

    pub fn set_prefix<S: Into<String>>(&mut self, prefix: S) {
        self.prefix = Some(prefix.into());
    }

    pub fn clear_prefix(&mut self) {
        self.prefix = None;
    }

    pub fn set_title(&mut self, title: impl Into<Cow<'static, str>>) {
        #[cfg(feature = "tui")]
        if !self.running && !self.bar.is_hidden() {
            self.bar.enable_steady_tick(Duration::from_millis(100));
            self.running = true;
        }
        self.bar.set_message(title.into());
    }

    pub fn stop(&mut self) {
        if self.running {
            self.running = false;
            self.bar.finish_and_clear();
        }
    }

    fn emit<L: Display, S: AsRef<str>>(&self, level: L, msg: S) {
        if let Some(prefix) = &self.prefix {
            self.bar.println(format!("{} {}{}{} {}", level, "(".bold(), prefix.bold(), ")".bold(), msg.as_ref()))
        } else {
            self.bar.println(format!("{} {}", level, msg.as_ref()));
        }
    }

    pub fn info<S: AsRef<str>>(&self, msg: S) {
        self.emit("[elf::INFO]".blue().bold(), msg);
    }

    pub fn warning<S: AsRef<str>>(&self, msg: S) {
        self.emit("[elf::WARN]".yellow().bold(), msg);
    }

    pub fn debug<S: AsRef<str>>(&self, _msg: S) {
        #[cfg(debug_assertions)]
        {
            self.emit("[elf::DEBUG]".black().on_white(), _msg);
        }
    }

    pub fn error<S: AsRef<str>>(&self, msg: S) {
        self.emit("[elf::ERROR]".red().bold(), msg);
    }
}

impl Default for Logger {
    fn default() -> Self {
        Self::quiet()
    }
}

impl Drop for Logger {
    fn drop(&mut self) {
        self.stop();
    }
}
