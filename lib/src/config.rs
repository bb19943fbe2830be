// Copyright 2024 The Ugit Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Repository configuration in Git's INI dialect.
//!
//! Section names and keys are case-insensitive; subsection names (the
//! quoted part of `[remote "origin"]`) are not.

use std::fmt;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Config line {line} is not a section header or key-value pair")]
    Malformed { line: usize },
    #[error("Config value for {key} is not a {expected}: {value:?}")]
    BadValue {
        key: String,
        expected: &'static str,
        value: String,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct Section {
    name: String,
    subsection: Option<String>,
    entries: Vec<(String, Option<String>)>,
}

/// A parsed config file. Lookup keys are dotted paths: `core.bare`,
/// `remote.origin.url`, `branch.topic.merge`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Config {
    sections: Vec<Section>,
}

/// Splits `remote.origin.url` into `(remote, Some(origin), url)`.
fn split_key(key: &str) -> (String, Option<String>, String) {
    match key.split_once('.') {
        None => (key.to_ascii_lowercase(), None, String::new()),
        Some((section, rest)) => match rest.rsplit_once('.') {
            None => (
                section.to_ascii_lowercase(),
                None,
                rest.to_ascii_lowercase(),
            ),
            Some((subsection, name)) => (
                section.to_ascii_lowercase(),
                Some(subsection.to_owned()),
                name.to_ascii_lowercase(),
            ),
        },
    }
}

impl Config {
    pub fn parse(data: &[u8]) -> Result<Self, ConfigError> {
        let text = String::from_utf8_lossy(data);
        let mut sections: Vec<Section> = vec![];
        for (lineno, raw_line) in text.lines().enumerate() {
            let line = raw_line.trim();
            if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
                continue;
            }
            if let Some(header) = line.strip_prefix('[') {
                let header = header
                    .strip_suffix(']')
                    .ok_or(ConfigError::Malformed { line: lineno + 1 })?
                    .trim();
                let (name, subsection) = match header.split_once(' ') {
                    None => (header.to_ascii_lowercase(), None),
                    Some((name, quoted)) => {
                        let quoted = quoted.trim();
                        let subsection = quoted
                            .strip_prefix('"')
                            .and_then(|s| s.strip_suffix('"'))
                            .ok_or(ConfigError::Malformed { line: lineno + 1 })?;
                        (
                            name.to_ascii_lowercase(),
                            Some(subsection.replace("\\\"", "\"").replace("\\\\", "\\")),
                        )
                    }
                };
                sections.push(Section {
                    name,
                    subsection,
                    entries: vec![],
                });
                continue;
            }
            let section = sections
                .last_mut()
                .ok_or(ConfigError::Malformed { line: lineno + 1 })?;
            match line.split_once('=') {
                // A bare key is boolean true.
                None => section
                    .entries
                    .push((line.to_ascii_lowercase(), Some("true".to_owned()))),
                Some((key, value)) => {
                    section.entries.push((
                        key.trim().to_ascii_lowercase(),
                        Some(parse_value(value.trim())),
                    ));
                }
            }
        }
        Ok(Self { sections })
    }

    pub fn serialize(&self) -> Vec<u8> {
        let mut out = String::new();
        for section in &self.sections {
            if section.entries.is_empty() {
                continue;
            }
            match &section.subsection {
                None => out.push_str(&format!("[{}]\n", section.name)),
                Some(subsection) => {
                    let escaped = subsection.replace('\\', "\\\\").replace('"', "\\\"");
                    out.push_str(&format!("[{} \"{escaped}\"]\n", section.name));
                }
            }
            for (key, value) in &section.entries {
                match value {
                    Some(value) => out.push_str(&format!("\t{key} = {}\n", quote_value(value))),
                    None => {}
                }
            }
        }
        out.into_bytes()
    }

    /// The last value wins, matching `git config --get`.
    pub fn get(&self, key: &str) -> Option<&str> {
        let (name, subsection, entry_key) = split_key(key);
        self.sections
            .iter()
            .filter(|s| s.name == name && s.subsection == subsection)
            .flat_map(|s| &s.entries)
            .filter(|(k, _)| *k == entry_key)
            .filter_map(|(_, v)| v.as_deref())
            .next_back()
    }

    pub fn get_all(&self, key: &str) -> Vec<&str> {
        let (name, subsection, entry_key) = split_key(key);
        self.sections
            .iter()
            .filter(|s| s.name == name && s.subsection == subsection)
            .flat_map(|s| &s.entries)
            .filter(|(k, _)| *k == entry_key)
            .filter_map(|(_, v)| v.as_deref())
            .collect()
    }

    pub fn get_bool(&self, key: &str) -> Result<Option<bool>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(Some(true)),
                "false" | "no" | "off" | "0" | "" => Ok(Some(false)),
                _ => Err(ConfigError::BadValue {
                    key: key.to_owned(),
                    expected: "boolean",
                    value: value.to_owned(),
                }),
            },
        }
    }

    pub fn get_int(&self, key: &str) -> Result<Option<i64>, ConfigError> {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|_| ConfigError::BadValue {
                    key: key.to_owned(),
                    expected: "integer",
                    value: value.to_owned(),
                }),
        }
    }

    /// Sets or replaces the value for a key; `None` removes every matching
    /// entry. Empty sections left behind by removal are dropped on
    /// serialization.
    pub fn set(&mut self, key: &str, value: Option<&str>) {
        let (name, subsection, entry_key) = split_key(key);
        let section = self
            .sections
            .iter_mut()
            .find(|s| s.name == name && s.subsection == subsection);
        match (section, value) {
            (None, None) => {}
            (None, Some(value)) => self.sections.push(Section {
                name,
                subsection,
                entries: vec![(entry_key, Some(value.to_owned()))],
            }),
            (Some(section), None) => section.entries.retain(|(k, _)| *k != entry_key),
            (Some(section), Some(value)) => {
                section.entries.retain(|(k, _)| *k != entry_key);
                section.entries.push((entry_key, Some(value.to_owned())));
            }
        }
    }

    /// Appends an additional value for a multi-valued key.
    pub fn add(&mut self, key: &str, value: &str) {
        let (name, subsection, entry_key) = split_key(key);
        let section = self
            .sections
            .iter_mut()
            .find(|s| s.name == name && s.subsection == subsection);
        match section {
            Some(section) => section.entries.push((entry_key, Some(value.to_owned()))),
            None => self.sections.push(Section {
                name,
                subsection,
                entries: vec![(entry_key, Some(value.to_owned()))],
            }),
        }
    }

    /// Removes a whole `[section "subsection"]` block.
    pub fn remove_section(&mut self, name: &str, subsection: Option<&str>) {
        let name = name.to_ascii_lowercase();
        self.sections
            .retain(|s| !(s.name == name && s.subsection.as_deref() == subsection));
    }

    /// Subsection names under `section`, e.g. the remote names.
    pub fn subsections(&self, section: &str) -> Vec<&str> {
        let name = section.to_ascii_lowercase();
        self.sections
            .iter()
            .filter(|s| s.name == name)
            .filter_map(|s| s.subsection.as_deref())
            .collect()
    }
}

fn parse_value(raw: &str) -> String {
    let mut out = String::new();
    let mut chars = raw.chars();
    let mut in_quotes = false;
    while let Some(c) = chars.next() {
        match c {
            '"' => in_quotes = !in_quotes,
            '\\' => match chars.next() {
                Some('n') => out.push('\n'),
                Some('t') => out.push('\t'),
                Some(other) => out.push(other),
                None => {}
            },
            '#' | ';' if !in_quotes => break,
            _ => out.push(c),
        }
    }
    if !in_quotes {
        out.trim_end().to_owned()
    } else {
        out
    }
}

fn quote_value(value: &str) -> String {
    if value.is_empty()
        || value.starts_with(' ')
        || value.ends_with(' ')
        || value.contains(['#', ';', '"'])
    {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_owned()
    }
}

impl fmt::Display for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&String::from_utf8_lossy(&self.serialize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
[core]
\trepositoryformatversion = 0
\tfilemode = true
\tbare = false
[remote \"origin\"]
\turl = https://example.com/repo.git
\tfetch = +refs/heads/*:refs/remotes/origin/*
[branch \"main\"]
\tremote = origin
\tmerge = refs/heads/main
";

    #[test]
    fn test_parse_and_get() {
        let config = Config::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(config.get("core.repositoryformatversion"), Some("0"));
        assert_eq!(config.get_bool("core.filemode").unwrap(), Some(true));
        assert_eq!(config.get_bool("core.bare").unwrap(), Some(false));
        assert_eq!(
            config.get("remote.origin.url"),
            Some("https://example.com/repo.git")
        );
        assert_eq!(config.get("branch.main.merge"), Some("refs/heads/main"));
        assert_eq!(config.get("branch.other.merge"), None);
    }

    #[test]
    fn test_case_sensitivity() {
        let config = Config::parse(SAMPLE.as_bytes()).unwrap();
        assert_eq!(config.get("CORE.BARE"), Some("false"));
        // Subsection names are case-sensitive.
        assert_eq!(config.get("remote.ORIGIN.url"), None);
    }

    #[test]
    fn test_round_trip() {
        let config = Config::parse(SAMPLE.as_bytes()).unwrap();
        let reparsed = Config::parse(&config.serialize()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_set_and_remove() {
        let mut config = Config::parse(SAMPLE.as_bytes()).unwrap();
        config.set("core.bare", Some("true"));
        assert_eq!(config.get_bool("core.bare").unwrap(), Some(true));
        config.set("user.name", Some("Mr. Test"));
        assert_eq!(config.get("user.name"), Some("Mr. Test"));
        config.set("remote.origin.url", None);
        assert_eq!(config.get("remote.origin.url"), None);
        config.remove_section("branch", Some("main"));
        assert_eq!(config.get("branch.main.remote"), None);
    }

    #[test]
    fn test_subsections() {
        let mut config = Config::parse(SAMPLE.as_bytes()).unwrap();
        config.add("remote.upstream.url", "https://example.com/up.git");
        assert_eq!(config.subsections("remote"), ["origin", "upstream"]);
    }

    #[test]
    fn test_value_edge_cases() {
        let text = "[alias]\n\tl = \"log --graph #fancy\"\n\tempty =\n\tflag\n";
        let config = Config::parse(text.as_bytes()).unwrap();
        assert_eq!(config.get("alias.l"), Some("log --graph #fancy"));
        assert_eq!(config.get("alias.empty"), Some(""));
        assert_eq!(config.get_bool("alias.flag").unwrap(), Some(true));
        let reparsed = Config::parse(&config.serialize()).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_comment_only_value_is_empty() {
        let config = Config::parse(b"[a]\n\tb = ; nothing\n").unwrap();
        assert_eq!(config.get("a.b"), Some(""));
    }
}
