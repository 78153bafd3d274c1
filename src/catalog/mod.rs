//! Faceted catalog index over a tab-separated assembly summary.
//!
//! Loads once from a TSV stream, derives the six slug columns defined by
//! the facet set, and answers set-valued queries against precomputed
//! `facet -> slug -> row ids` indices. Immutable after [`Index::build`],
//! so concurrent readers need no locking.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::io::{self, BufRead, BufReader, Read};
use std::str::FromStr;

/// The closed set of facet names the catalog and resolver understand.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Facet {
    Accession,
    SpeciesTaxid,
    Taxid,
    OrganismName,
    Genus,
    Species,
}

impl Facet {
    /// All facets, in the order they are offered under `/`.
    pub const ALL: [Facet; 6] = [
        Facet::SpeciesTaxid,
        Facet::Taxid,
        Facet::OrganismName,
        Facet::Genus,
        Facet::Species,
        Facet::Accession,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Facet::Accession => "accession",
            Facet::SpeciesTaxid => "species_taxid",
            Facet::Taxid => "taxid",
            Facet::OrganismName => "organism_name",
            Facet::Genus => "genus",
            Facet::Species => "species",
        }
    }
}

impl fmt::Display for Facet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a path segment does not name one of the closed facets.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct UnknownFacet;

impl FromStr for Facet {
    type Err = UnknownFacet;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "accession" => Ok(Facet::Accession),
            "species_taxid" => Ok(Facet::SpeciesTaxid),
            "taxid" => Ok(Facet::Taxid),
            "organism_name" => Ok(Facet::OrganismName),
            "genus" => Ok(Facet::Genus),
            "species" => Ok(Facet::Species),
            _ => Err(UnknownFacet),
        }
    }
}

/// Errors raised while loading a catalog.
#[derive(Debug)]
pub enum CatalogError {
    /// A required column was absent from the header row.
    MissingColumn(&'static str),
    /// The underlying reader failed.
    Io(io::Error),
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::MissingColumn(name) => write!(f, "missing required column: {name}"),
            CatalogError::Io(err) => write!(f, "catalog read error: {err}"),
        }
    }
}

impl std::error::Error for CatalogError {}

impl From<io::Error> for CatalogError {
    fn from(err: io::Error) -> Self {
        CatalogError::Io(err)
    }
}

const REQUIRED_COLUMNS: [&str; 5] =
    ["# assembly_accession", "species_taxid", "taxid", "organism_name", "ftp_path"];

/// One parsed catalog entry, with a slug precomputed for every facet.
#[derive(Debug, Clone)]
pub struct Row {
    pub assembly_accession: String,
    pub species_taxid: String,
    pub taxid: String,
    pub organism_name: String,
    pub ftp_path: String,
    slugs: HashMap<Facet, String>,
}

impl Row {
    pub fn slug(&self, facet: Facet) -> &str {
        self.slugs.get(&facet).map(String::as_str).unwrap_or("")
    }
}

/// Normalizes a raw catalog value into its path-safe slug form: lowercase,
/// runs of non-alphanumeric characters collapsed to a single underscore,
/// leading/trailing underscores stripped. Idempotent: `slug(slug(x)) == slug(x)`.
pub fn slug(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    let mut pending_sep = false;
    for ch in value.chars() {
        if ch.is_alphanumeric() {
            if pending_sep && !out.is_empty() {
                out.push('_');
            }
            pending_sep = false;
            for lower in ch.to_lowercase() {
                out.push(lower);
            }
        } else {
            pending_sep = true;
        }
    }
    out
}

fn genus_species(organism_name: &str) -> Option<(&str, &str)> {
    let mut tokens = organism_name.split_whitespace();
    let genus = tokens.next()?;
    let species = tokens.next()?;
    Some((genus, species))
}

/// Faceted, read-only view over a loaded catalog.
pub struct Index {
    rows: Vec<Row>,
    facet_index: HashMap<Facet, HashMap<String, Vec<u32>>>,
}

impl Index {
    /// Parses a tab-separated stream with a header row, deriving the six
    /// slug columns. Rows with the wrong column count or an `organism_name`
    /// with fewer than two tokens are skipped with a warning rather than
    /// failing the whole load.
    pub fn build<R: Read>(reader: R) -> Result<Index, CatalogError> {
        let mut lines = BufReader::new(reader).lines();

        let header_line = match lines.next() {
            Some(line) => line?,
            None => return Err(CatalogError::MissingColumn(REQUIRED_COLUMNS[0])),
        };
        let header: Vec<&str> = header_line.split('\t').collect();
        let mut column_of = HashMap::new();
        for (idx, name) in header.iter().enumerate() {
            column_of.insert(*name, idx);
        }
        for required in REQUIRED_COLUMNS {
            if !column_of.contains_key(required) {
                return Err(CatalogError::MissingColumn(required));
            }
        }
        let accession_col = column_of["# assembly_accession"];
        let species_taxid_col = column_of["species_taxid"];
        let taxid_col = column_of["taxid"];
        let organism_name_col = column_of["organism_name"];
        let ftp_path_col = column_of["ftp_path"];
        let min_columns = header.len();

        let mut rows = Vec::new();
        let mut facet_index: HashMap<Facet, HashMap<String, Vec<u32>>> = HashMap::new();

        for (line_no, line) in lines.enumerate() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            let fields: Vec<&str> = line.split('\t').collect();
            if fields.len() < min_columns {
                tracing::warn!(line = line_no + 2, "skipping ragged catalog row");
                continue;
            }

            let organism_name = fields[organism_name_col].to_string();
            let Some((genus, species)) = genus_species(&organism_name) else {
                tracing::warn!(
                    line = line_no + 2,
                    organism_name = %organism_name,
                    "skipping row with unparseable organism_name"
                );
                continue;
            };

            let ftp_path = fields[ftp_path_col].to_string();
            let accession_slug = ftp_path.rsplit('/').next().unwrap_or("").to_string();
            if accession_slug.is_empty() {
                tracing::warn!(line = line_no + 2, "skipping row with empty ftp_path");
                continue;
            }

            let mut slugs = HashMap::with_capacity(6);
            slugs.insert(Facet::Accession, accession_slug);
            slugs.insert(Facet::SpeciesTaxid, slug(fields[species_taxid_col]));
            slugs.insert(Facet::Taxid, slug(fields[taxid_col]));
            slugs.insert(Facet::OrganismName, slug(&organism_name));
            slugs.insert(Facet::Genus, slug(genus));
            slugs.insert(Facet::Species, slug(&format!("{genus}_{species}")));

            let row = Row {
                assembly_accession: fields[accession_col].to_string(),
                species_taxid: fields[species_taxid_col].to_string(),
                taxid: fields[taxid_col].to_string(),
                organism_name,
                ftp_path,
                slugs,
            };

            let row_id = rows.len() as u32;
            for facet in Facet::ALL {
                let value = row.slug(facet).to_string();
                facet_index.entry(facet).or_default().entry(value).or_default().push(row_id);
            }
            rows.push(row);
        }

        tracing::info!(rows = rows.len(), "catalog loaded");
        Ok(Index { rows, facet_index })
    }

    /// All rows matching every constraint. An empty constraint map matches
    /// the entire catalog.
    pub fn query(&self, constraints: &HashMap<Facet, String>) -> Vec<&Row> {
        if constraints.is_empty() {
            return self.rows.iter().collect();
        }

        let mut matching: Option<HashSet<u32>> = None;
        for (facet, value) in constraints {
            let ids: HashSet<u32> = self
                .facet_index
                .get(facet)
                .and_then(|by_slug| by_slug.get(value))
                .map(|ids| ids.iter().copied().collect())
                .unwrap_or_default();
            matching = Some(match matching {
                None => ids,
                Some(existing) => existing.intersection(&ids).copied().collect(),
            });
        }

        let mut ids: Vec<u32> = matching.unwrap_or_default().into_iter().collect();
        ids.sort_unstable();
        ids.into_iter().filter_map(|id| self.rows.get(id as usize)).collect()
    }

    /// Distinct slug values of `facet` across rows matching `constraints`.
    pub fn list(&self, facet: Facet, constraints: &HashMap<Facet, String>) -> HashSet<String> {
        self.query(constraints).into_iter().map(|row| row.slug(facet).to_string()).collect()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const TSV: &str = "# assembly_accession\tspecies_taxid\ttaxid\torganism_name\tftp_path\nGCA_000001405.15\t9606\t9606\tHomo sapiens\thttps://example.org/genomes/all/GCA/000/001/405/GCA_000001405.15\nGCA_000002035.4\t7955\t7955\tDanio rerio\thttps://example.org/genomes/all/GCA/000/002/035/GCA_000002035.4\n";

    fn build() -> Index {
        Index::build(Cursor::new(TSV.as_bytes())).unwrap()
    }

    #[test]
    fn slug_is_idempotent() {
        for raw in ["Homo sapiens", "GCA_000001405.15", "--weird--_-_value__", ""] {
            let once = slug(raw);
            let twice = slug(&once);
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn slug_collapses_and_trims() {
        assert_eq!(slug("Homo sapiens"), "homo_sapiens");
        assert_eq!(slug("__Weird--Value__"), "weird_value");
    }

    #[test]
    fn build_derives_all_facets() {
        let index = build();
        assert_eq!(index.row_count(), 2);
        let row = &index.rows()[0];
        assert_eq!(row.slug(Facet::Accession), "GCA_000001405.15");
        assert_eq!(row.slug(Facet::Genus), "homo");
        assert_eq!(row.slug(Facet::Species), "homo_sapiens");
        assert_eq!(row.slug(Facet::Taxid), "9606");
    }

    #[test]
    fn query_empty_returns_everything() {
        let index = build();
        assert_eq!(index.query(&HashMap::new()).len(), 2);
    }

    #[test]
    fn query_filters_by_constraint() {
        let index = build();
        let mut constraints = HashMap::new();
        constraints.insert(Facet::Genus, "danio".to_string());
        let rows = index.query(&constraints);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].slug(Facet::Accession), "gca_000002035.4");
    }

    #[test]
    fn list_matches_query_identity() {
        let index = build();
        let all_genus: HashSet<String> = index.list(Facet::Genus, &HashMap::new());
        assert!(all_genus.contains("homo"));
        assert!(all_genus.contains("danio"));
    }

    #[test]
    fn missing_column_fails_construction() {
        let bad = "species_taxid\ttaxid\torganism_name\tftp_path\n9606\t9606\tHomo sapiens\thttps://x/y\n";
        let err = Index::build(Cursor::new(bad.as_bytes())).unwrap_err();
        assert!(matches!(err, CatalogError::MissingColumn(_)));
    }

    #[test]
    fn ragged_and_unparseable_rows_are_skipped_not_fatal() {
        let mut tsv = TSV.to_string();
        tsv.push_str("GCA_bad\t1\t1\tSingleToken\thttps://example.org/x/GCA_bad\n");
        tsv.push_str("short\trow\n");
        let index = Index::build(Cursor::new(tsv.as_bytes())).unwrap();
        assert_eq!(index.row_count(), 2);
    }

    #[test]
    fn facet_from_str_rejects_unknown_names() {
        assert!("accession".parse::<Facet>().is_ok());
        assert!("bogus".parse::<Facet>().is_err());
    }
}
