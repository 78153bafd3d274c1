//! Black-box path-parsing scenarios from spec §8.

use assemblyfs::catalog::Facet;
use assemblyfs::resolver::{self, DirName};

#[test]
fn terminal_file_rule_with_prior_facets() {
    let result = resolver::parse("/genus/foo/taxid/1000/accession/ABC/README.txt");
    assert_eq!(result.file_path.as_deref(), Some("ABC/README.txt"));
    assert!(result.dir_name.is_none());
    assert!(result.path_list.is_empty());
    assert_eq!(result.query.get(&Facet::Accession).map(String::as_str), Some("ABC"));
    assert_eq!(result.query.len(), 1);
}

#[test]
fn facet_pair_reduction_without_a_trailing_file() {
    let result = resolver::parse("/genus/foo/taxid/1000");
    assert!(result.file_path.is_none());
    assert_eq!(result.dir_name, Some(DirName::Default));
    assert_eq!(result.query.get(&Facet::Genus).map(String::as_str), Some("foo"));
    assert_eq!(result.query.get(&Facet::Taxid).map(String::as_str), Some("1000"));
}

#[test]
fn unknown_leading_segment_yields_empty_query() {
    let result = resolver::parse("/foo");
    assert_eq!(result.dir_name, Some(DirName::Default));
    assert!(result.query.is_empty());
}

#[test]
fn mutual_exclusion_holds_across_a_representative_path_set() {
    let paths = [
        "/",
        "/genus",
        "/genus/foo",
        "/accession",
        "/accession/ABC",
        "/accession/ABC/README.txt",
        "/taxid/1/species/x/accession/ABC/md5checksums.txt",
        "/weird//slashes/",
        "/bogus/segment/name",
    ];
    for path in paths {
        let result = resolver::parse(path);
        assert_ne!(result.file_path.is_some(), result.dir_name.is_some(), "path: {path}");
        assert!(result.path_list.is_empty(), "path_list not empty for {path}");
    }
}
