//! INI-like key/value store holding barrier definitions and associations.
//!
//! The store keeps sections and entries in file order so that a load/save
//! cycle only touches the lines that were edited. Keys are case sensitive and
//! may contain spaces (`BarriersBeforeOnlySignalForProcess MyProc`); the
//! first `=` on a line separates key from value. Lines starting with `;` or
//! `#` are comments and are dropped on load.

use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::{BarrierError, Result};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Section {
    name: String,
    entries: Vec<(String, String)>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IniStore {
    sections: Vec<Section>,
}

impl IniStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn parse(text: &str) -> Result<Self> {
        let mut store = IniStore::new();
        let mut current: Option<usize> = None;
        for (lineno, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with(';') || line.starts_with('#') {
                continue;
            }
            if let Some(rest) = line.strip_prefix('[') {
                let name = rest.strip_suffix(']').ok_or_else(|| {
                    BarrierError::InvalidConfig(format!(
                        "line {}: unterminated section header '{}'",
                        lineno + 1,
                        line
                    ))
                })?;
                current = Some(store.section_index_or_insert(name.trim()));
                continue;
            }
            let Some((key, value)) = line.split_once('=') else {
                return Err(BarrierError::InvalidConfig(format!(
                    "line {}: expected key=value, got '{}'",
                    lineno + 1,
                    line
                )));
            };
            let Some(idx) = current else {
                return Err(BarrierError::InvalidConfig(format!(
                    "line {}: entry outside of any section",
                    lineno + 1
                )));
            };
            store.sections[idx]
                .entries
                .push((key.trim().to_owned(), value.trim().to_owned()));
        }
        Ok(store)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        Self::parse(&text)
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        fs::write(path, self.render())?;
        Ok(())
    }

    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, section) in self.sections.iter().enumerate() {
            if i > 0 {
                out.push('\n');
            }
            let _ = writeln!(out, "[{}]", section.name);
            for (k, v) in &section.entries {
                let _ = writeln!(out, "{}={}", k, v);
            }
        }
        out
    }

    pub fn get(&self, section: &str, key: &str) -> Option<&str> {
        self.section(section)?
            .entries
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }

    /// Replaces the value of `key` in place, or appends it to the section.
    pub fn set(&mut self, section: &str, key: &str, value: &str) {
        let idx = self.section_index_or_insert(section);
        let entries = &mut self.sections[idx].entries;
        match entries.iter_mut().find(|(k, _)| k == key) {
            Some(entry) => entry.1 = value.to_owned(),
            None => entries.push((key.to_owned(), value.to_owned())),
        }
    }

    /// Removes `key` and returns its old value.
    pub fn remove(&mut self, section: &str, key: &str) -> Option<String> {
        let idx = self.sections.iter().position(|s| s.name == section)?;
        let entries = &mut self.sections[idx].entries;
        let pos = entries.iter().position(|(k, _)| k == key)?;
        Some(entries.remove(pos).1)
    }

    /// Keys of `section` in file order.
    pub fn keys<'a>(&'a self, section: &str) -> impl Iterator<Item = &'a str> + 'a {
        self.section(section)
            .into_iter()
            .flat_map(|s| s.entries.iter().map(|(k, _)| k.as_str()))
    }

    pub fn has_section(&self, section: &str) -> bool {
        self.section(section).is_some()
    }

    fn section(&self, name: &str) -> Option<&Section> {
        self.sections.iter().find(|s| s.name == name)
    }

    fn section_index_or_insert(&mut self, name: &str) -> usize {
        if let Some(idx) = self.sections.iter().position(|s| s.name == name) {
            return idx;
        }
        self.sections.push(Section {
            name: name.to_owned(),
            entries: Vec::new(),
        });
        self.sections.len() - 1
    }
}
