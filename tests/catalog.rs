//! Black-box catalog invariants from spec §8.

use std::collections::{HashMap, HashSet};
use std::io::Cursor;

use assemblyfs::catalog::{slug, Facet, Index};

const TSV: &str = "# assembly_accession\tspecies_taxid\ttaxid\torganism_name\tftp_path\n\
GCA_000001405.15\t9606\t9606\tHomo sapiens\thttps://example.org/genomes/all/GCA/000/001/405/GCA_000001405.15\n\
GCA_000002035.4\t7955\t7955\tDanio rerio\thttps://example.org/genomes/all/GCA/000/002/035/GCA_000002035.4\n\
GCA_000003025.6\t9823\t9823\tSus scrofa\thttps://example.org/genomes/all/GCA/000/003/025/GCA_000003025.6\n";

fn build() -> Index {
    Index::build(Cursor::new(TSV.as_bytes())).unwrap()
}

#[test]
fn query_with_empty_constraints_is_the_entire_catalog() {
    let index = build();
    assert_eq!(index.query(&HashMap::new()).len(), index.row_count());
}

#[test]
fn list_with_empty_constraints_is_every_slug_of_that_facet() {
    let index = build();
    let via_list = index.list(Facet::Genus, &HashMap::new());
    let via_scan: HashSet<String> =
        index.query(&HashMap::new()).into_iter().map(|row| row.slug(Facet::Genus).to_string()).collect();
    assert_eq!(via_list, via_scan);
}

#[test]
fn slugging_is_idempotent_across_varied_inputs() {
    for raw in ["Homo sapiens", "GCA_000001405.15", "--Weird--_-_Value__", "", "already_slugged"] {
        let once = slug(raw);
        assert_eq!(slug(&once), once);
    }
}

#[test]
fn every_row_has_a_non_empty_slug_for_every_facet() {
    let index = build();
    for row in index.query(&HashMap::new()) {
        for facet in Facet::ALL {
            assert!(!row.slug(facet).is_empty(), "empty slug for {facet} on {}", row.assembly_accession);
        }
    }
}
