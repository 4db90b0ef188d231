//! Single reporting path for fatal errors.

use std::error::Error;
use std::io::Write;
use std::path::Path;
use std::process::ExitCode;

use garrison_telemetry::log_fatal;

/// `error: cause: cause...` rendering of an error and its sources.
pub fn error_chain(error: &dyn Error) -> String {
    let mut chain = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        chain.push_str(": ");
        chain.push_str(&cause.to_string());
        source = cause.source();
    }
    chain
}

/// Log the full error chain, print a short message and return exit code 1.
pub fn report(error: &dyn Error, log_file: Option<&Path>) -> ExitCode {
    log_fatal!(error = %error, chain = %error_chain(error), "bootstrap failed");

    let mut stderr = std::io::stderr();
    let _ = writeln!(stderr, "error: {error}");
    if let Some(path) = log_file {
        let _ = writeln!(stderr, "details were written to {}", path.display());
    }

    ExitCode::from(1)
}
