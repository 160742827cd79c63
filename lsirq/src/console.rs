// SPDX-License-Identifier: MPL-2.0

//! Console output.
//!
//! The crate never owns a UART. The kernel registers a sink with
//! [`register_sink`] and every early print or log record goes through it.
//! Output is silently dropped until a sink is registered.

use core::fmt::Arguments;

use spin::Once;

/// A function that writes formatted output to the console.
pub type ConsoleSink = fn(Arguments);

static SINK: Once<ConsoleSink> = Once::new();

/// Registers the console sink. Only the first registration takes effect.
pub fn register_sink(sink: ConsoleSink) {
    SINK.call_once(|| sink);
}

/// Prints formatted arguments to the console.
pub fn early_print(args: Arguments) {
    if let Some(sink) = SINK.get() {
        sink(args);
    }
}

/// Prints to the console.
#[macro_export]
macro_rules! early_print {
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::early_print(format_args!($fmt $(, $($arg)+)?))
    }
}

/// Prints to the console with a newline.
#[macro_export]
macro_rules! early_println {
    () => { $crate::early_print!("\n") };
    ($fmt: literal $(, $($arg: tt)+)?) => {
        $crate::console::early_print(format_args!(concat!($fmt, "\n") $(, $($arg)+)?))
    }
}
