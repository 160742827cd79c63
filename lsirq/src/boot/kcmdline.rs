// SPDX-License-Identifier: MPL-2.0

//! The module to parse kernel command-line arguments.
//!
//! The format of the command line string conforms to the Linux kernel
//! command line rules:
//!
//! <https://www.kernel.org/doc/html/v6.4/admin-guide/kernel-parameters.html>
//!
//! Only the options this crate consumes get typed accessors; everything else
//! is kept as raw strings.

use alloc::{
    collections::BTreeMap,
    string::{String, ToString},
    vec::Vec,
};

use crate::early_println;

/// Kernel module arguments
#[derive(PartialEq, Debug, Clone)]
pub enum ModuleArg {
    /// A string argument
    Arg(String),
    /// A key-value argument
    KeyVal(String, String),
}

/// The struct to store the parsed kernel command-line arguments.
#[derive(Debug, Default)]
pub struct KCmdlineArg {
    options: BTreeMap<String, Option<String>>,
    module_args: BTreeMap<String, Vec<ModuleArg>>,
    init_args: Vec<String>,
}

// Define get APIs.
impl KCmdlineArg {
    /// Gets the argument vector of a kernel module.
    pub fn get_module_args(&self, module: &str) -> Option<&Vec<ModuleArg>> {
        self.module_args.get(module)
    }

    /// Gets the value of a module's `key=value` argument.
    pub fn get_module_value(&self, module: &str, key: &str) -> Option<&str> {
        self.get_module_args(module)?
            .iter()
            .find_map(|arg| match arg {
                ModuleArg::KeyVal(name, value) if name == key => Some(value.as_str()),
                _ => None,
            })
    }

    /// Gets a kernel option. The outer `Option` tells whether the option is
    /// present, the inner one whether it has a value.
    pub fn get_option(&self, name: &str) -> Option<Option<&str>> {
        self.options.get(name).map(|value| value.as_deref())
    }

    /// Gets the arguments after the `--` mark.
    pub fn get_init_args(&self) -> &[String] {
        &self.init_args
    }

    /// Returns whether MSI-X is allowed (`msix=0` disables it).
    pub fn msix_enabled(&self) -> bool {
        match self.get_option("msix") {
            Some(Some(value)) => parse_bool(value).unwrap_or(true),
            _ => true,
        }
    }

    /// Returns whether ACPI is turned off (`acpi=off`).
    pub fn acpi_disabled(&self) -> bool {
        matches!(self.get_option("acpi"), Some(Some("off")))
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "y" | "Y" | "on" | "true" => Some(true),
        "0" | "n" | "N" | "off" | "false" => Some(false),
        _ => None,
    }
}

// Splits the command line string by spaces but preserve
// ones that are protected by double quotes(`"`).
fn split_arg(input: &str) -> impl Iterator<Item = &str> {
    let mut inside_quotes = false;

    input
        .split(move |c: char| {
            if c == '"' {
                inside_quotes = !inside_quotes;
            }

            !inside_quotes && c.is_whitespace()
        })
        .filter(|arg| !arg.is_empty())
}

// Define the way to parse a string to `KCmdlineArg`.
impl From<&str> for KCmdlineArg {
    fn from(cmdline: &str) -> Self {
        let mut result = KCmdlineArg::default();

        // Every thing after the "--" mark is passed on untouched.
        let mut kcmdline_end = false;

        for arg in split_arg(cmdline) {
            // Cmdline => KernelArg "--" InitArg
            // KernelArg => Arg "\s+" KernelArg | %empty
            if kcmdline_end {
                result.init_args.push(arg.to_string());
                continue;
            }
            if arg == "--" {
                kcmdline_end = true;
                continue;
            }
            // Arg => Entry | Entry "=" Value
            let (entry, value) = match arg.split_once('=') {
                Some((entry, value)) if !value.contains('=') => (entry, Some(value)),
                Some(_) => {
                    early_println!(
                        "[KCmdline] Unable to parse kernel argument {}, skip for now",
                        arg
                    );
                    continue;
                }
                None => (arg, None),
            };
            // Entry => Module "." ModuleOptionName | KernelOptionName
            let entry_pattern: Vec<_> = entry.split('.').collect();
            let (node, option) = match entry_pattern.len() {
                1 => (None, entry_pattern[0]),
                2 => (Some(entry_pattern[0]), entry_pattern[1]),
                _ => {
                    early_println!(
                        "[KCmdline] Unable to parse entry {} in argument {}, skip for now",
                        entry,
                        arg
                    );
                    continue;
                }
            };
            if let Some(modname) = node {
                let modarg = match value {
                    Some(v) => ModuleArg::KeyVal(option.to_string(), v.to_string()),
                    None => ModuleArg::Arg(option.to_string()),
                };
                result
                    .module_args
                    .entry(modname.to_string())
                    .or_default()
                    .push(modarg);
                continue;
            }
            // A later occurrence of the same option wins.
            result
                .options
                .insert(option.to_string(), value.map(ToString::to_string));
        }

        result
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn module_and_kernel_options() {
        let cmdline = KCmdlineArg::from("lsirq.log_level=debug msix=0 acpi=off quiet");
        assert_eq!(cmdline.get_module_value("lsirq", "log_level"), Some("debug"));
        assert!(!cmdline.msix_enabled());
        assert!(cmdline.acpi_disabled());
        assert_eq!(cmdline.get_option("quiet"), Some(None));
        assert_eq!(cmdline.get_option("missing"), None);
    }

    #[test]
    fn defaults_and_init_args() {
        let cmdline = KCmdlineArg::from("  console=ttyS0,115200 -- init=/bin/sh  a.b.c=1");
        assert!(cmdline.msix_enabled());
        assert!(!cmdline.acpi_disabled());
        assert_eq!(cmdline.get_option("console"), Some(Some("ttyS0,115200")));
        assert_eq!(cmdline.get_init_args(), ["init=/bin/sh", "a.b.c=1"]);
    }

    #[test]
    fn malformed_arguments_are_skipped() {
        let cmdline = KCmdlineArg::from("a=b=c x.y.z=1 msix=1");
        assert_eq!(cmdline.get_option("a"), None);
        assert!(cmdline.get_module_args("x").is_none());
        assert!(cmdline.msix_enabled());
    }

    #[test]
    fn quoted_values_keep_spaces() {
        let cmdline = KCmdlineArg::from("lsirq.tag=\"a b\" msix=off");
        assert_eq!(
            cmdline.get_module_args("lsirq"),
            Some(&vec![ModuleArg::KeyVal("tag".into(), "\"a b\"".into())])
        );
        assert!(!cmdline.msix_enabled());
    }
}
