//! Expansion of command-line file arguments into the list of captures to process.
//!
//! Supports `@listfile` arguments, shell-style wildcards (`*`, `?`, `[...]`) and recursive
//! directory walks. An empty argument list means standard input, represented by `""`.
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use regex::Regex;

use crate::error::{Error, Result};

#[derive(Clone, Copy, Debug, Default)]
pub struct ExpandOptions {
    /// Take every argument as a plain filename.
    pub literal: bool,
    /// Walk directories recursively.
    pub recurse: bool,
    /// Drop arguments that are not existing regular files.
    pub check: bool,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Expansion {
    pub filenames: Vec<String>,
    pub warnings: Vec<String>,
}

pub fn expand(args: &[String], options: &ExpandOptions) -> Result<Expansion> {
    let mut expansion = Expansion::default();

    if args.is_empty() {
        expansion.filenames.push(String::new());
    } else if options.literal {
        expansion.filenames = args.to_vec();
    } else if options.recurse {
        for arg in args {
            if arg.starts_with('@') {
                expansion.filenames.extend(read_file_list(arg)?);
            } else if Path::new(arg).is_file() {
                expansion.filenames.push(arg.clone());
            } else {
                let (dir, pattern) = if Path::new(arg).is_dir() {
                    (PathBuf::from(arg), "*".to_string())
                } else {
                    split_pattern(arg)
                };
                let matcher = wildcard_regex(&pattern)?;
                walk(&dir, &matcher, &mut expansion.filenames);
            }
        }
    } else {
        let mut seen = HashSet::new();
        let mut has_wildcards = false;

        for arg in args {
            let listed = if arg.starts_with('@') { read_file_list(arg)? } else { vec![arg.clone()] };
            for name in listed {
                let matches = if is_wildcard(&name) {
                    has_wildcards = true;
                    glob(&name)?
                } else {
                    vec![name]
                };
                for filename in matches {
                    if seen.insert(filename.clone()) {
                        expansion.filenames.push(filename);
                    }
                }
            }
        }

        if has_wildcards && expansion.filenames.is_empty() {
            expansion.warnings.push(
                "Your filename argument(s) contain Unix shell-style wildcards, but no files were matched. \
                 Check your wildcard patterns or use option --literalfilenames if you don't want wildcard \
                 pattern matching."
                    .to_string(),
            );
            return Ok(expansion);
        }
    }

    if options.check {
        check_files(&mut expansion);
    }

    Ok(expansion)
}

/// Explains why a capture could not be opened, when the filesystem can tell.
pub fn describe_open_failure(filename: &str) -> Option<&'static str> {
    let path = Path::new(filename);
    if !path.exists() {
        Some("The file does not exist")
    } else if path.is_dir() {
        Some("The file is a directory")
    } else if !path.is_file() {
        Some("The file is not a regular file")
    } else {
        None
    }
}

fn read_file_list(arg: &str) -> Result<Vec<String>> {
    let path = &arg[1..];
    let content = fs::read_to_string(path).map_err(|_| Error::FileList { path: path.to_string() })?;
    Ok(content
        .lines()
        .map(|line| line.trim_end_matches('\r').to_string())
        .filter(|line| !line.is_empty())
        .collect())
}

fn is_wildcard(name: &str) -> bool {
    name.contains('*') || name.contains('?') || (name.contains('[') && name.contains(']'))
}

/// Translates a shell wildcard into an anchored regex.
pub fn wildcard_regex(pattern: &str) -> Result<Regex> {
    let mut re = String::from("^");
    let mut chars = pattern.chars();

    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                let class: String = chars.by_ref().take_while(|c| *c != ']').collect();
                re.push('[');
                match class.strip_prefix('!') {
                    Some(negated) => {
                        re.push('^');
                        re.push_str(&negated.replace('\\', "\\\\"));
                    }
                    None => re.push_str(&class.replace('\\', "\\\\")),
                }
                re.push(']');
            }
            c => re.push_str(&regex::escape(&c.to_string())),
        }
    }
    re.push('$');

    Ok(Regex::new(&re)?)
}

fn split_pattern(arg: &str) -> (PathBuf, String) {
    let path = Path::new(arg);
    let pattern = path
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_default();
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    (dir, pattern)
}

/// Non-recursive match of the last path component, hidden files only on an explicit dot.
fn glob(arg: &str) -> Result<Vec<String>> {
    let (dir, pattern) = split_pattern(arg);
    let matcher = wildcard_regex(&pattern)?;
    let explicit_dir = Path::new(arg).parent().is_some_and(|p| !p.as_os_str().is_empty());

    let mut matches: Vec<String> = match fs::read_dir(&dir) {
        Ok(entries) => entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().to_string();
                if name.starts_with('.') && !pattern.starts_with('.') {
                    return None;
                }
                if !matcher.is_match(&name) {
                    return None;
                }
                Some(if explicit_dir {
                    dir.join(&name).to_string_lossy().to_string()
                } else {
                    name
                })
            })
            .collect(),
        Err(_) => Vec::new(),
    };

    matches.sort();
    Ok(matches)
}

fn walk(dir: &Path, matcher: &Regex, out: &mut Vec<String>) {
    let mut entries: Vec<PathBuf> = match fs::read_dir(dir) {
        Ok(entries) => entries.filter_map(|e| e.ok()).map(|e| e.path()).collect(),
        Err(err) => {
            log::warn!("Cannot read directory {}: {err}", dir.display());
            return;
        }
    };
    entries.sort();

    let (dirs, files): (Vec<PathBuf>, Vec<PathBuf>) = entries.into_iter().partition(|p| p.is_dir());

    for file in files {
        let matched = file
            .file_name()
            .is_some_and(|name| matcher.is_match(&name.to_string_lossy()));
        if matched {
            out.push(file.to_string_lossy().to_string());
        }
    }

    for sub in dirs {
        walk(&sub, matcher, out);
    }
}

fn check_files(expansion: &mut Expansion) {
    let mut missing = Vec::new();
    let mut not_regular = Vec::new();

    expansion.filenames.retain(|filename| {
        let path = Path::new(filename);
        if filename.is_empty() || path.is_file() {
            true
        } else {
            if !path.exists() {
                missing.push(filename.clone());
            } else {
                not_regular.push(filename.clone());
            }
            false
        }
    });

    if !missing.is_empty() {
        expansion
            .warnings
            .push(format!("The following files do not exist and will be skipped: {}", missing.join(" ")));
    }
    if !not_regular.is_empty() {
        expansion.warnings.push(format!(
            "The following files are not regular files and will be skipped: {}",
            not_regular.join(" ")
        ));
    }
}
