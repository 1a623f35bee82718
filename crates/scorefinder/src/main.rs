//! Score Finder.
//!
//! Score Finder is a small web service answering search queries over ballroom dance competition
//! results: competitor, style and judge suggestions, filtered score searches and the
//! competition history of a competitor. All queries go through one shared in-memory cache that
//! coalesces concurrent identical requests.

#![warn(missing_debug_implementations, clippy::all)]

mod cli;
mod endpoints;
mod healthcheck;
mod logging;
mod server;


fn main() {
    match cli::execute() {
        Ok(()) => std::process::exit(0),
        Err(error) => {
            logging::ensure_log_error(&error);
            std::process::exit(1);
        }
    }
}
