use crate::rdf::Term;

pub const NPA: &str = "http://purl.org/nanopub/admin/";
pub const NP: &str = "http://www.nanopub.org/nschema#";
pub const NPX: &str = "http://purl.org/nanopub/x/";

pub const RDF_TYPE: &str = "http://www.w3.org/1999/02/22-rdf-syntax-ns#type";
pub const DCT_CREATED: &str = "http://purl.org/dc/terms/created";
pub const XSD_LONG: &str = "http://www.w3.org/2001/XMLSchema#long";
pub const XSD_STRING: &str = "http://www.w3.org/2001/XMLSchema#string";
pub const XSD_DATE_TIME: &str = "http://www.w3.org/2001/XMLSchema#dateTime";

pub const NANOPUBLICATION: &str = "http://www.nanopub.org/nschema#Nanopublication";
pub const HAS_ASSERTION: &str = "http://www.nanopub.org/nschema#hasAssertion";
pub const HAS_PROVENANCE: &str = "http://www.nanopub.org/nschema#hasProvenance";
pub const HAS_PUBINFO: &str = "http://www.nanopub.org/nschema#hasPublicationInfo";

pub const HAS_NANOPUB_TYPE: &str = "http://purl.org/nanopub/x/hasNanopubType";
pub const HAS_SIGNATURE_TARGET: &str = "http://purl.org/nanopub/x/hasSignatureTarget";
pub const HAS_PUBLIC_KEY: &str = "http://purl.org/nanopub/x/hasPublicKey";
pub const DECLARED_BY: &str = "http://purl.org/nanopub/x/declaredBy";

pub fn npa(local: &str) -> Term {
    Term::iri(format!("{NPA}{local}"))
}

pub fn admin_graph() -> Term {
    npa("graph")
}

pub fn admin_network_graph() -> Term {
    npa("networkGraph")
}

pub fn this_repo() -> Term {
    npa("thisRepo")
}

pub fn has_status() -> Term {
    npa("hasStatus")
}

pub fn has_registry_load_counter() -> Term {
    npa("hasRegistryLoadCounter")
}

pub fn has_repo_init_id() -> Term {
    npa("hasRepoInitId")
}

pub fn has_nanopub_count() -> Term {
    npa("hasNanopubCount")
}

pub fn has_nanopub_checksum() -> Term {
    npa("hasNanopubChecksum")
}

pub fn has_load_number() -> Term {
    npa("hasLoadNumber")
}

pub fn has_load_checksum() -> Term {
    npa("hasLoadChecksum")
}

pub fn has_load_timestamp() -> Term {
    npa("hasLoadTimestamp")
}

pub fn has_coverage_item() -> Term {
    npa("hasCoverageItem")
}

pub fn has_coverage_hash() -> Term {
    npa("hasCoverageHash")
}

pub fn has_coverage_filter() -> Term {
    npa("hasCoverageFilter")
}

pub fn is_hash_of() -> Term {
    npa("isHashOf")
}

pub fn hash_iri(hash: &str) -> Term {
    Term::iri(format!("{NPA}hash/{hash}"))
}

pub fn note() -> Term {
    npa("note")
}

pub fn has_head_graph() -> Term {
    npa("hasHeadGraph")
}

pub fn has_sub_iri() -> Term {
    npa("hasSubIri")
}

pub fn refers_to_nanopub() -> Term {
    npa("refersToNanopub")
}

pub fn has_valid_signature_for_public_key() -> Term {
    npa("hasValidSignatureForPublicKey")
}

pub fn artifact_code() -> Term {
    npa("artifactCode")
}

pub fn is_introduction_of() -> Term {
    npa("isIntroductionOf")
}

pub fn declares_pubkey() -> Term {
    npa("declaresPubkey")
}
