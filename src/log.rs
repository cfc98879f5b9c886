//! The implementation of the `JITRA_LOG_*` environment variables.
//!
//! `JITRA_LOG_RA` selects a sink for register-allocation logging: `-` logs
//! to stderr, any other value is treated as a path to append to. When the
//! variable is unset, logging is disabled and the annotate phase is skipped
//! entirely.

use std::{env, fs::File, io::Write, sync::LazyLock};

static LOG_RA: LazyLock<Option<String>> = LazyLock::new(|| env::var("JITRA_LOG_RA").ok());

/// Is register-allocation logging enabled? The driver uses this to decide
/// whether the annotate phase is worth running at all.
pub(crate) fn should_log_ra() -> bool {
    LOG_RA.is_some()
}

pub(crate) fn log_ra(s: &str) {
    match LOG_RA.as_deref() {
        Some("-") => eprintln!("{s}"),
        Some(p) => {
            File::options()
                .append(true)
                .open(p)
                .map(|mut f| f.write_all(s.as_bytes()))
                .ok();
        }
        None => (),
    }
}
