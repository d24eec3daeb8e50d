//! System property lookup
//!
//! Recovery images expose properties through `getprop`. Some stripped-down
//! recoveries lack it, so the prop files are parsed as a fallback.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::process::{Command, Stdio};

/// Key-value system properties
pub trait PropertySource {
    /// Value of `key`, or `None` when unset or empty
    fn get(&self, key: &str) -> Option<String>;
}

impl PropertySource for HashMap<String, String> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).filter(|v| !v.is_empty()).cloned()
    }
}

/// Properties of the running system
#[derive(Debug, Clone)]
pub struct SystemProperties {
    prop_files: Vec<PathBuf>,
}

impl SystemProperties {
    pub fn new(prop_files: Vec<PathBuf>) -> Self {
        Self { prop_files }
    }

    fn from_getprop(key: &str) -> Option<String> {
        let output = Command::new("getprop")
            .arg(key)
            .stdin(Stdio::null())
            .stderr(Stdio::null())
            .output()
            .ok()?;
        if !output.status.success() {
            return None;
        }
        let value = String::from_utf8_lossy(&output.stdout).trim().to_string();
        (!value.is_empty()).then_some(value)
    }

    fn from_files(&self, key: &str) -> Option<String> {
        self.prop_files.iter().find_map(|path| {
            let content = fs::read_to_string(path).ok()?;
            parse_prop(&content, key)
        })
    }
}

impl PropertySource for SystemProperties {
    fn get(&self, key: &str) -> Option<String> {
        let value = Self::from_getprop(key).or_else(|| self.from_files(key));
        log::debug!("Property {key} = {value:?}");
        value
    }
}

/// Find `key` in build.prop-style `key=value` content
pub fn parse_prop(content: &str, key: &str) -> Option<String> {
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .find(|(k, _)| k.trim() == key)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
