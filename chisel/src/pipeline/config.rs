//! Sectioned key/value configuration
//!
//! The pipeline is configured by a flat text format:
//!
//! ```text
//! [Pipeline]
//! Optimizer=GA
//! Tree=tree.json
//!
//! [GA]
//! PopulationSize=100
//! ```
//!
//! Lookups are `(section, key)` pairs with a default; values that are
//! present but unparseable are an error rather than silently defaulted.
use crate::Error;
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;

#[derive(Clone, Debug, Default)]
pub struct ParameterSet {
    sections: HashMap<String, HashMap<String, String>>,
}

impl ParameterSet {
    pub fn from_str(text: &str) -> Self {
        let mut sections: HashMap<String, HashMap<String, String>> =
            HashMap::new();
        let mut current = String::new();
        for line in text.lines() {
            let line = line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';')
            {
                continue;
            }
            if let Some(name) =
                line.strip_prefix('[').and_then(|l| l.strip_suffix(']'))
            {
                current = name.trim().to_owned();
                sections.entry(current.clone()).or_default();
            } else if let Some((key, value)) = line.split_once('=') {
                sections
                    .entry(current.clone())
                    .or_default()
                    .insert(key.trim().to_owned(), value.trim().to_owned());
            }
        }
        Self { sections }
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        Ok(Self::from_str(&std::fs::read_to_string(path)?))
    }

    fn raw(&self, section: &str, key: &str) -> Option<&str> {
        self.sections
            .get(section)
            .and_then(|s| s.get(key))
            .map(String::as_str)
    }

    pub fn get_str(&self, section: &str, key: &str, default: &str) -> String {
        self.raw(section, key).unwrap_or(default).to_owned()
    }

    fn get_parsed<T: FromStr>(
        &self,
        section: &str,
        key: &str,
        default: T,
    ) -> Result<T, Error> {
        match self.raw(section, key) {
            None => Ok(default),
            Some(v) => v.parse().map_err(|_| {
                Error::BadConfigValue(key.to_owned(), section.to_owned())
            }),
        }
    }

    pub fn get_f64(
        &self,
        section: &str,
        key: &str,
        default: f64,
    ) -> Result<f64, Error> {
        self.get_parsed(section, key, default)
    }

    pub fn get_usize(
        &self,
        section: &str,
        key: &str,
        default: usize,
    ) -> Result<usize, Error> {
        self.get_parsed(section, key, default)
    }

    pub fn get_bool(
        &self,
        section: &str,
        key: &str,
        default: bool,
    ) -> Result<bool, Error> {
        match self.raw(section, key) {
            None => Ok(default),
            Some("true") | Some("True") | Some("1") => Ok(true),
            Some("false") | Some("False") | Some("0") => Ok(false),
            Some(_) => Err(Error::BadConfigValue(
                key.to_owned(),
                section.to_owned(),
            )),
        }
    }
}
