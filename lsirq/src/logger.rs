// SPDX-License-Identifier: MPL-2.0

//! Logging support.
//!
//! The logger prints the logs to the registered console sink.
//!
//! This module guarantees _atomicity_ under concurrency: messages are always
//! printed in their entirety without being mixed with messages generated
//! concurrently on other cores.
//!
//! IRQs are disabled while printing. So do not print long log messages.

use log::{LevelFilter, Metadata, Record};

use crate::{boot::kcmdline::KCmdlineArg, early_println};

static LOGGER: Logger = Logger {};

struct Logger {}

impl log::Log for Logger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.level() <= log::max_level()
    }

    fn log(&self, record: &Record) {
        if !self.enabled(record.metadata()) {
            return;
        }

        // Use a global lock to prevent interleaving of log messages.
        use crate::sync::SpinLock;
        static RECORD_LOCK: SpinLock<()> = SpinLock::new(());
        let _lock = RECORD_LOCK.lock_irq_disabled();

        early_println!(
            "{:<5} [{}]: {}",
            record.level(),
            record.target(),
            record.args()
        );
    }

    fn flush(&self) {}
}

/// Initializes the logger. Users should avoid using the log macros before this function is called.
///
/// The level comes from the `lsirq.log_level` argument and defaults to off.
/// Only the first call installs the logger; later calls just change the level.
pub fn init(cmdline: &KCmdlineArg) {
    let level = get_log_level(cmdline).unwrap_or(LevelFilter::Off);

    // A logger installed by an earlier call stays in place.
    let _ = log::set_logger(&LOGGER);
    log::set_max_level(level);
}

fn get_log_level(cmdline: &KCmdlineArg) -> Option<LevelFilter> {
    let value = cmdline.get_module_value("lsirq", "log_level")?;
    Some(match value {
        "error" => LevelFilter::Error,
        "warn" => LevelFilter::Warn,
        "info" => LevelFilter::Info,
        "debug" => LevelFilter::Debug,
        "trace" => LevelFilter::Trace,
        // Otherwise, OFF
        _ => LevelFilter::Off,
    })
}
