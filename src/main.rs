//! Binary entrypoint that launches the console server.

use std::process::ExitCode;

use jarvis_console::start_jarvis;

/// Start the console server.
fn main() -> ExitCode {
    start_jarvis::run()
}
