//! Fatal-level logging.
//!
//! `tracing` has no fatal level. [`fatal`] logs at error level with
//! `fatal = true` and hands the exit decision back to the caller, so library
//! code never terminates the process itself.

use std::fmt;

const DEFAULT_EXIT_CODE: i32 = 1;

/// A fatal condition that has been logged and should end the process.
#[must_use = "call std::process::exit(abort.code()) to terminate"]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Abort {
    message: String,
    code: i32,
}

impl Abort {
    pub fn with_code(mut self, code: i32) -> Self {
        self.code = code;
        self
    }

    pub fn code(&self) -> i32 {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for Abort {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

pub fn fatal(message: impl Into<String>) -> Abort {
    let message = message.into();
    tracing::error!(fatal = true, "{message}");
    Abort {
        message,
        code: DEFAULT_EXIT_CODE,
    }
}
