use std::fmt::Display;

use crate::env::Env;

mod color {
    pub const BLUE: u8 = 34;
    pub const YELLOW: u8 = 33;
    pub const RED: u8 = 31;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogLevel {
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn color(self) -> u8 {
        match self {
            Self::Info => color::BLUE,
            Self::Warning => color::YELLOW,
            Self::Error => color::RED,
        }
    }

    fn text(self) -> &'static str {
        match self {
            LogLevel::Info => "INFO",
            LogLevel::Warning => "WARNING",
            LogLevel::Error => "ERROR",
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.text())
    }
}

pub fn log(env: impl Env, level: LogLevel, text: impl Display) {
    let mut err = env.stderr();
    let prog = std::env::args().next().unwrap_or_else(|| "keyroll".into());

    if err.is_terminal() {
        let color = level.color();
        writeln!(err, "[{prog}] \x1B[{color}m{level}\x1B[0m: {text}");
    } else {
        writeln!(err, "[{prog}] {level}: {text}");
    }
}

//------------ RunContext ----------------------------------------------------

/// Per-run state shared by all engine calls.
///
/// One batch run owns exactly one of these. It replaces what would otherwise
/// be process-wide counters: the number of errors seen is part of the
/// observable contract of a run and feeds the exit status.
#[derive(Default)]
pub struct RunContext {
    errors: u32,
    warnings: u32,
    pub verbose: bool,
}

impl RunContext {
    pub fn new(verbose: bool) -> Self {
        RunContext {
            verbose,
            ..Default::default()
        }
    }

    /// The number of error-level events logged so far.
    pub fn error_count(&self) -> u32 {
        self.errors
    }

    pub fn warning_count(&self) -> u32 {
        self.warnings
    }

    pub fn error(&mut self, env: impl Env, text: impl Display) {
        self.errors += 1;
        tracing::error!("{text}");
        log(env, LogLevel::Error, text);
    }

    pub fn warning(&mut self, env: impl Env, text: impl Display) {
        self.warnings += 1;
        tracing::warn!("{text}");
        log(env, LogLevel::Warning, text);
    }

    pub fn info(&mut self, env: impl Env, text: impl Display) {
        tracing::info!("{text}");
        if self.verbose {
            log(env, LogLevel::Info, text);
        }
    }
}
