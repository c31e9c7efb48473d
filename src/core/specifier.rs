//! Package list parsing.
//!
//! A package list is plain text with one specifier per line:
//!
//! ```text
//! # comments and blank lines are ignored
//! numpy
//! pandas>=2.0,<3   # trailing comments too
//! python3-scipy    # distro-style names lose their prefix
//! git+https://github.com/org/tool.git@v1.2#egg=tool
//! ```

use crate::domain::model::{normalize_name, PackageSource, PackageSpec};
use crate::utils::error::{ImagenieError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::OnceLock;

fn name_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9]([A-Za-z0-9._-]*[A-Za-z0-9])?$").expect("static regex")
    })
}

fn index_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^([A-Za-z0-9][A-Za-z0-9._-]*)\s*(?:\[([^\]]*)\])?\s*(.*)$")
            .expect("static regex")
    })
}

/// Literal affixes removed from package names, plus import-name overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StripRules {
    pub prefixes: Vec<String>,
    pub suffixes: Vec<String>,
    /// Normalised package name -> module imported by smoke tests.
    pub import_names: HashMap<String, String>,
}

impl Default for StripRules {
    fn default() -> Self {
        Self {
            prefixes: vec![
                "python3-".to_string(),
                "python-".to_string(),
                "py3-".to_string(),
            ],
            suffixes: vec!["-python3".to_string(), "-python".to_string()],
            import_names: HashMap::new(),
        }
    }
}

impl StripRules {
    pub fn none() -> Self {
        Self {
            prefixes: Vec::new(),
            suffixes: Vec::new(),
            import_names: HashMap::new(),
        }
    }

    pub fn with_import_name(mut self, package: &str, module: &str) -> Self {
        self.import_names
            .insert(normalize_name(package), module.to_string());
        self
    }

    fn import_name_for(&self, name: &str) -> String {
        let wanted = normalize_name(name);
        self.import_names
            .iter()
            .find(|(package, _)| normalize_name(package) == wanted)
            .map(|(_, module)| module.clone())
            .unwrap_or_else(|| default_import_name(name))
    }
}

/// Removes the first matching literal prefix and the first matching literal
/// suffix. Never strips a name down to nothing.
pub fn strip_affixes(name: &str, prefixes: &[String], suffixes: &[String]) -> String {
    let mut current = name;

    for prefix in prefixes {
        if let Some(rest) = strip_prefix_ci(current, prefix) {
            if !rest.is_empty() {
                current = rest;
                break;
            }
        }
    }

    for suffix in suffixes {
        if let Some(rest) = strip_suffix_ci(current, suffix) {
            if !rest.is_empty() {
                current = rest;
                break;
            }
        }
    }

    current.to_string()
}

fn strip_prefix_ci<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    if prefix.is_empty() || s.len() < prefix.len() || !s.is_char_boundary(prefix.len()) {
        return None;
    }
    let (head, tail) = s.split_at(prefix.len());
    head.eq_ignore_ascii_case(prefix).then_some(tail)
}

fn strip_suffix_ci<'a>(s: &'a str, suffix: &str) -> Option<&'a str> {
    if suffix.is_empty() || s.len() < suffix.len() {
        return None;
    }
    let cut = s.len() - suffix.len();
    if !s.is_char_boundary(cut) {
        return None;
    }
    let (head, tail) = s.split_at(cut);
    tail.eq_ignore_ascii_case(suffix).then_some(head)
}

pub fn default_import_name(name: &str) -> String {
    name.to_ascii_lowercase().replace(['-', '.'], "_")
}

/// Drops a trailing `# comment`. A `#` glued to the previous character (as in
/// `#egg=`) is part of the specifier.
fn strip_comment(line: &str) -> &str {
    let trimmed = line.trim_start();
    if trimmed.starts_with('#') {
        return "";
    }
    let bytes = line.as_bytes();
    for (i, b) in bytes.iter().enumerate() {
        if *b == b'#' && i > 0 && bytes[i - 1].is_ascii_whitespace() {
            return &line[..i];
        }
    }
    line
}

fn invalid(line: &str, reason: impl Into<String>) -> ImagenieError {
    ImagenieError::InvalidSpecifier {
        line: line.to_string(),
        reason: reason.into(),
    }
}

impl PackageSpec {
    /// Parses one line. Returns `Ok(None)` for blank and comment lines.
    pub fn parse(line: &str, rules: &StripRules) -> Result<Option<Self>> {
        let spec = strip_comment(line).trim();
        if spec.is_empty() {
            return Ok(None);
        }

        if let Some((name, rhs)) = spec.split_once(" @ ") {
            let rhs = rhs.trim();
            return match rhs.strip_prefix("git+") {
                Some(git) => Self::parse_git(spec, git, Some(name.trim()), rules).map(Some),
                None => Err(invalid(spec, "only git+ direct references are supported")),
            };
        }

        if let Some(git) = spec.strip_prefix("git+") {
            return Self::parse_git(spec, git, None, rules).map(Some);
        }

        Self::parse_index(spec, rules).map(Some)
    }

    fn parse_git(raw: &str, rest: &str, explicit_name: Option<&str>, rules: &StripRules) -> Result<Self> {
        let (location, fragment) = match rest.split_once('#') {
            Some((l, f)) => (l, Some(f)),
            None => (rest, None),
        };

        let fragment_value = |key: &str| {
            fragment.and_then(|f| {
                f.split('&')
                    .filter_map(|kv| kv.split_once('='))
                    .find(|(k, v)| *k == key && !v.is_empty())
                    .map(|(_, v)| v.to_string())
            })
        };
        let egg = fragment_value("egg");
        let subdirectory = fragment_value("subdirectory");

        // `@ref` lives in the path; the authority may hold `user@` itself.
        let mut parsed = url::Url::parse(location)
            .map_err(|e| invalid(raw, format!("invalid git URL: {}", e)))?;
        let path = parsed.path().to_string();
        let (repo_path, reference) = match path.rsplit_once('@') {
            Some((p, r)) if !r.is_empty() => (p.to_string(), Some(r.to_string())),
            Some(_) => return Err(invalid(raw, "empty git reference after '@'")),
            None => (path, None),
        };
        parsed.set_path(&repo_path);
        let url = parsed.to_string();

        let segment = repo_path
            .trim_end_matches('/')
            .rsplit('/')
            .next()
            .unwrap_or_default();
        let name = match (explicit_name, egg) {
            (Some(n), _) => n.to_string(),
            (None, Some(e)) => e,
            (None, None) => segment.trim_end_matches(".git").to_string(),
        };
        if !name_re().is_match(&name) {
            return Err(invalid(raw, format!("cannot derive a package name from '{}'", name)));
        }

        Ok(Self {
            raw: raw.to_string(),
            import_name: rules.import_name_for(&name),
            name,
            extras: Vec::new(),
            constraint: None,
            source: PackageSource::Git {
                url,
                reference,
                subdirectory,
            },
        })
    }

    fn parse_index(raw: &str, rules: &StripRules) -> Result<Self> {
        let caps = index_re()
            .captures(raw)
            .ok_or_else(|| invalid(raw, "expected 'name', 'name[extras]' or 'name<op>version'"))?;

        let written = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        let name = strip_affixes(written, &rules.prefixes, &rules.suffixes);
        if !name_re().is_match(&name) {
            return Err(invalid(raw, format!("'{}' is not a valid package name", name)));
        }

        let extras: Vec<String> = caps
            .get(2)
            .map(|m| {
                m.as_str()
                    .split(',')
                    .map(|e| e.trim().to_string())
                    .filter(|e| !e.is_empty())
                    .collect()
            })
            .unwrap_or_default();

        let constraint_text: String = caps
            .get(3)
            .map(|m| m.as_str().chars().filter(|c| !c.is_whitespace()).collect())
            .unwrap_or_default();
        let constraint = if constraint_text.is_empty() {
            None
        } else if constraint_text.starts_with(['=', '<', '>', '!', '~']) {
            Some(constraint_text)
        } else {
            return Err(invalid(
                raw,
                format!("unexpected text after name: '{}'", constraint_text),
            ));
        };

        Ok(Self {
            raw: raw.to_string(),
            import_name: rules.import_name_for(&name),
            name,
            extras,
            constraint,
            source: PackageSource::Index,
        })
    }
}

/// Ordered, de-duplicated package list.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageList {
    pub specs: Vec<PackageSpec>,
}

impl PackageList {
    pub fn parse(text: &str, rules: &StripRules) -> Result<Self> {
        let mut specs = Vec::new();
        let mut seen = HashSet::new();

        for (index, line) in text.lines().enumerate() {
            let Some(spec) = PackageSpec::parse(line, rules)? else {
                continue;
            };
            if !seen.insert(spec.normalized_name()) {
                tracing::warn!(
                    "⚠️ Line {}: duplicate package '{}' ignored",
                    index + 1,
                    spec.name
                );
                continue;
            }
            tracing::debug!("Line {}: {} -> {}", index + 1, spec.raw, spec.requirement());
            specs.push(spec);
        }

        Ok(Self { specs })
    }

    pub fn from_file<P: AsRef<Path>>(path: P, rules: &StripRules) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content, rules)
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn has_git_sources(&self) -> bool {
        self.specs.iter().any(PackageSpec::is_git)
    }

    pub fn requirements_txt(&self) -> String {
        let mut out = String::new();
        for spec in &self.specs {
            out.push_str(&spec.requirement());
            out.push('\n');
        }
        out
    }

    /// Modules imported by the smoke test, in list order, without repeats.
    pub fn import_names(&self) -> Vec<String> {
        let mut seen = HashSet::new();
        self.specs
            .iter()
            .filter(|s| seen.insert(s.import_name.clone()))
            .map(|s| s.import_name.clone())
            .collect()
    }
}
