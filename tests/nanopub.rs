mod common;

use std::collections::BTreeSet;

use assert_matches::assert_matches;

use nanopub_replica::error::ReplicaError;
use nanopub_replica::nanopub::{Nanopub, RecordDocument};
use nanopub_replica::rdf::{Quad, Term};
use nanopub_replica::vocab;

const KEY: &str = "key-alpha";

fn parse(document: RecordDocument) -> Nanopub {
    Nanopub::from_document(document).unwrap()
}

#[test]
fn explicit_types_win() {
    let types = [common::TYPE_IRI, "http://example.org/types/Other"];
    let np = parse(common::record_with(1, Some(KEY), &types));
    let expected: BTreeSet<Term> = types
        .into_iter()
        .map(Term::iri)
        .collect();
    assert_eq!(np.types(), expected);
}

#[test]
fn single_assertion_predicate_becomes_the_type() {
    let np = parse(common::record_with(1, Some(KEY), &[]));
    assert_eq!(np.types(), BTreeSet::from([Term::iri(common::ASSERTED)]));
}

#[test]
fn several_assertion_predicates_give_no_type() {
    let mut document = common::record_with(1, Some(KEY), &[]);
    let assertion = Term::iri(format!("{}/assertion", document.uri));
    document.quads.push(Quad::new(
        Term::iri("http://example.org/thing/x"),
        Term::iri("http://example.org/p/other"),
        Term::literal("x"),
        assertion,
    ));
    assert!(parse(document).types().is_empty());
}

#[test]
fn signature_key_is_found() {
    let np = parse(common::record(2, KEY));
    assert_eq!(np.public_key().as_deref(), Some(KEY));
    assert_eq!(np.rejection_reason(), None);
    assert_eq!(np.artifact_code(), Some(&common::code_for(2)));
}

#[test]
fn rejection_reasons() {
    let unsigned = parse(common::record_with(3, None, &[]));
    assert!(unsigned.rejection_reason().unwrap().contains("public key"));

    let mut document = common::record(4, KEY);
    let plain = "http://example.org/np/4".to_string();
    for quad in &mut document.quads {
        for term in [&mut quad.subject, &mut quad.object] {
            if term.value() == document.uri {
                *term = Term::iri(plain.clone());
            }
        }
    }
    document.uri = plain;
    let uncoded = parse(document);
    assert_eq!(uncoded.artifact_code(), None);
    assert!(uncoded.rejection_reason().is_some());
}

#[test]
fn record_without_head_is_malformed() {
    let mut document = common::record(5, KEY);
    document
        .quads
        .retain(|quad| quad.object != Term::iri(vocab::NANOPUBLICATION));
    assert_matches!(
        Nanopub::from_document(document),
        Err(ReplicaError::MalformedRecord(_))
    );
}

#[test]
fn admin_statements_describe_the_record() {
    let np = parse(common::record(6, KEY));
    let admin = np.admin_statements();
    let has = |predicate: Term, object: Term| {
        admin.iter().any(|quad| {
            quad.subject == *np.uri()
                && quad.predicate == predicate
                && quad.object == object
                && quad.graph == Some(vocab::admin_graph())
        })
    };
    assert!(has(
        vocab::artifact_code(),
        Term::literal(common::code_for(6).as_str())
    ));
    assert!(has(
        vocab::has_valid_signature_for_public_key(),
        Term::literal(KEY)
    ));
    assert!(has(
        vocab::has_sub_iri(),
        Term::iri(format!("{}/sig", common::uri_for(6)))
    ));
    assert!(!admin.iter().any(|quad| quad.predicate == Term::iri(common::ASSERTED)));
}
