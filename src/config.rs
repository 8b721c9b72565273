use std::env;
use std::sync::Arc;

use crate::core::namespace::InternMode;

pub const DEFAULT_MAX_CALL_DEPTH: usize = 10_000;

/// Evaluator settings.
#[derive(Debug, Clone)]
pub struct Config {
    /// Downgrade duplicate definitions and var collisions to warnings.
    pub lint_mode: bool,
    /// Calls nested deeper than this fail with "Stack overflow".
    pub max_call_depth: usize,
    /// File name reported for nodes whose position has none.
    pub file: Option<Arc<str>>,
}

impl Default for Config {
    fn default() -> Self {
        Self { lint_mode: false, max_call_depth: DEFAULT_MAX_CALL_DEPTH, file: None }
    }
}

impl Config {
    /// Defaults overridden by `EMBER_LINT` and `EMBER_MAX_CALL_DEPTH`.
    /// Unparseable values are ignored with a warning.
    pub fn from_env() -> Self {
        let mut config = Config::default();
        if let Ok(lint) = env::var("EMBER_LINT") {
            config.lint_mode = matches!(lint.as_str(), "1" | "true" | "yes");
        }
        if let Ok(depth) = env::var("EMBER_MAX_CALL_DEPTH") {
            match depth.parse() {
                Ok(depth) => config.max_call_depth = depth,
                Err(_) => log::warn!("ignoring invalid EMBER_MAX_CALL_DEPTH={}", depth),
            }
        }
        config
    }

    pub fn with_lint_mode(mut self, lint_mode: bool) -> Self {
        self.lint_mode = lint_mode;
        self
    }

    pub fn with_max_call_depth(mut self, depth: usize) -> Self {
        self.max_call_depth = depth;
        self
    }

    pub fn with_file(mut self, file: &str) -> Self {
        self.file = Some(Arc::from(file));
        self
    }

    pub fn intern_mode(&self) -> InternMode {
        if self.lint_mode { InternMode::Lint } else { InternMode::Strict }
    }
}
