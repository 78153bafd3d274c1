//! Maps `(accession, filename)` relative paths to remote origin URLs.

use std::collections::HashMap;
use std::fmt;

use crate::catalog::Index;

/// Errors raised while resolving a relative cache path to an origin URL.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum LookupError {
    /// The path did not split into exactly two `/`-separated segments.
    MalformedRelativePath,
    /// The accession segment has no entry in the catalog.
    UnknownAccession,
}

impl fmt::Display for LookupError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LookupError::MalformedRelativePath => write!(f, "malformed relative path"),
            LookupError::UnknownAccession => write!(f, "unknown accession"),
        }
    }
}

impl std::error::Error for LookupError {}

/// Immutable `accession slug -> ftp_path` map built once from a [`Index`].
pub struct UrlLookup(HashMap<String, String>);

impl UrlLookup {
    pub fn from_index(index: &Index) -> Self {
        let mut map = HashMap::with_capacity(index.row_count());
        for row in index.rows() {
            map.insert(row.slug(crate::catalog::Facet::Accession).to_string(), row.ftp_path.clone());
        }
        UrlLookup(map)
    }

    /// Resolves `"<accession>/<filename>"` to `"<ftp_path>/<filename>"`.
    pub fn lookup(&self, relative_path: &str) -> Result<String, LookupError> {
        let mut segments = relative_path.split('/');
        let accession = segments.next().ok_or(LookupError::MalformedRelativePath)?;
        let filename = segments.next().ok_or(LookupError::MalformedRelativePath)?;
        if segments.next().is_some() || accession.is_empty() || filename.is_empty() {
            return Err(LookupError::MalformedRelativePath);
        }
        let ftp_path = self.0.get(accession).ok_or(LookupError::UnknownAccession)?;
        Ok(format!("{ftp_path}/{filename}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Index;
    use std::io::Cursor;

    fn lookup() -> UrlLookup {
        let tsv = "# assembly_accession\tspecies_taxid\ttaxid\torganism_name\tftp_path\nGCA_1\t1\t1\tHomo sapiens\thttps://example.org/all/GCA_1\n";
        let index = Index::build(Cursor::new(tsv.as_bytes())).unwrap();
        UrlLookup::from_index(&index)
    }

    #[test]
    fn resolves_known_accession() {
        let lookup = lookup();
        let url = lookup.lookup("GCA_1/README.txt").unwrap();
        assert_eq!(url, "https://example.org/all/GCA_1/README.txt");
    }

    #[test]
    fn rejects_unknown_accession() {
        let lookup = lookup();
        assert_eq!(lookup.lookup("nope/README.txt"), Err(LookupError::UnknownAccession));
    }

    #[test]
    fn rejects_malformed_path() {
        let lookup = lookup();
        assert_eq!(lookup.lookup("just_one_segment"), Err(LookupError::MalformedRelativePath));
        assert_eq!(lookup.lookup("a/b/c"), Err(LookupError::MalformedRelativePath));
    }
}
