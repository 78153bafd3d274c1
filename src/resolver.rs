//! Stateless, deterministic reduction of a virtual path into a [`ParseResult`].
//!
//! Never consults the catalog --- it operates on the closed facet set alone.
//! The terminal-file rule (a trailing `accession/<slug>/<filename>`) takes
//! precedence over any facet reduction, per the spec's explicit resolution
//! of that ambiguity.

use std::collections::HashMap;

use crate::catalog::Facet;

/// What a directory listing at this path should enumerate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirName {
    /// List the remaining, unconstrained facet names.
    Default,
    /// List the slug values of this facet under the accumulated query.
    Facet(Facet),
}

/// The outcome of [`parse`]: either a concrete file target, or a listing
/// intent plus the facet constraints accumulated along the way.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseResult {
    pub file_path: Option<String>,
    pub dir_name: Option<DirName>,
    pub path_list: Vec<String>,
    pub query: HashMap<Facet, String>,
}

impl ParseResult {
    fn terminal_dir(dir_name: DirName, query: HashMap<Facet, String>) -> Self {
        ParseResult { file_path: None, dir_name: Some(dir_name), path_list: Vec::new(), query }
    }
}

fn strip_drive_prefix(path: &str) -> &str {
    let bytes = path.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_alphabetic() && bytes[1] == b':' {
        &path[2..]
    } else {
        path
    }
}

fn split_segments(path: &str) -> Vec<String> {
    strip_drive_prefix(path).split('/').filter(|s| !s.is_empty()).map(String::from).collect()
}

/// If the last three segments are `accession, <slug>, <filename>`, this
/// always resolves to a file, discarding any facets accumulated before it.
fn match_accession_terminal(segments: &[String]) -> Option<ParseResult> {
    if segments.len() < 3 {
        return None;
    }
    let n = segments.len();
    if segments[n - 3] != "accession" {
        return None;
    }
    let accession = segments[n - 2].clone();
    let filename = &segments[n - 1];
    let mut query = HashMap::new();
    query.insert(Facet::Accession, accession.clone());
    Some(ParseResult {
        file_path: Some(format!("{accession}/{filename}")),
        dir_name: None,
        path_list: Vec::new(),
        query,
    })
}

/// Parses a slash-separated virtual path into a [`ParseResult`].
pub fn parse(path: &str) -> ParseResult {
    let segments = split_segments(path);
    if let Some(result) = match_accession_terminal(&segments) {
        return result;
    }
    reduce(segments, HashMap::new())
}

/// Iterative left-to-right reduction over the residual segment list.
fn reduce(mut segments: Vec<String>, mut query: HashMap<Facet, String>) -> ParseResult {
    loop {
        if segments.is_empty() {
            return ParseResult::terminal_dir(DirName::Default, query);
        }

        let head = segments[0].clone();
        let Ok(facet) = head.parse::<Facet>() else {
            return ParseResult::terminal_dir(DirName::Default, query);
        };

        if facet == Facet::Accession {
            return match segments.len() {
                1 => ParseResult::terminal_dir(DirName::Facet(Facet::Accession), query),
                2 => {
                    query.insert(Facet::Accession, segments[1].clone());
                    ParseResult::terminal_dir(DirName::Default, query)
                }
                3 => match_accession_terminal(&segments)
                    .unwrap_or_else(|| ParseResult::terminal_dir(DirName::Default, query)),
                _ => ParseResult::terminal_dir(DirName::Default, query),
            };
        }

        if segments.len() == 1 {
            return ParseResult::terminal_dir(DirName::Facet(facet), query);
        }

        query.insert(facet, segments[1].clone());
        segments = segments.split_off(2);
    }
}
