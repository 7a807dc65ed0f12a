//! Shell-style word expansion for builtin arguments: tilde, `$NAME` and
//! glob patterns, applied in that order.

use lazy_static::lazy_static;
use log::debug;
use regex::{Captures, Regex};
use std::env;

lazy_static! {
    static ref VAR_RE: Regex =
        Regex::new(r"\$(?:\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))").unwrap();
}

/// Expands `word` into one or more words. Never returns an empty vector:
/// a pattern that matches nothing expands to itself.
pub fn expand_word(word: &str) -> Vec<String> {
    let word = expand_vars(&expand_tilde(word));

    if !is_pattern(&word) {
        return vec![word];
    }

    let matches: Vec<String> = match glob::glob(&word) {
        Ok(paths) => paths
            .filter_map(|entry| entry.ok())
            .map(|path| path.to_string_lossy().into_owned())
            .collect(),
        Err(e) => {
            debug!("not a valid glob pattern {:?}: {}", word, e);
            Vec::new()
        }
    };

    if matches.is_empty() {
        vec![word]
    } else {
        matches
    }
}

fn expand_tilde(word: &str) -> String {
    let rest = match word.strip_prefix('~') {
        Some(rest) if rest.is_empty() || rest.starts_with('/') => rest,
        _ => return word.to_string(),
    };
    match dirs::home_dir() {
        Some(home) => format!("{}{}", home.to_string_lossy(), rest),
        None => word.to_string(),
    }
}

fn expand_vars(word: &str) -> String {
    VAR_RE
        .replace_all(word, |caps: &Captures| {
            let name = caps.get(1).or_else(|| caps.get(2)).map_or("", |m| m.as_str());
            env::var(name).unwrap_or_default()
        })
        .into_owned()
}

fn is_pattern(word: &str) -> bool {
    word.contains(|c: char| matches!(c, '*' | '?' | '['))
}
