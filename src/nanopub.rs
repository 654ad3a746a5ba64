use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ReplicaError;
use crate::rdf::{Quad, Term};
use crate::vocab;

static ARTIFACT_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^RA[A-Za-z0-9\-_]{43}$").unwrap());
static TRAILING_CODE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:^|[^A-Za-z0-9\-_])(RA[A-Za-z0-9\-_]{43})$").unwrap());
static TRUSTY_PREFIX_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(.*[^A-Za-z0-9\-_]RA[A-Za-z0-9\-_]{43})(?:[^A-Za-z0-9\-_].{0,43})?$").unwrap()
});
static TRUSTY_REF_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[^A-Za-z0-9\-_]RA[A-Za-z0-9\-_]{43}$").unwrap());

/// Content-derived identifier of a nanopublication: `RA` plus the base64url
/// SHA-256 hash of its normalized content.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ArtifactCode(String);

impl ArtifactCode {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn from_hash(hash: &[u8; 32]) -> Self {
        Self(format!("RA{}", URL_SAFE_NO_PAD.encode(hash)))
    }

    /// The code at the end of a trusty URI, if there is one.
    pub fn from_uri(uri: &str) -> Option<Self> {
        TRAILING_CODE_RE
            .captures(uri)
            .and_then(|caps| caps.get(1))
            .map(|code| Self(code.as_str().to_string()))
    }

    pub fn hash_bytes(&self) -> Result<[u8; 32], ReplicaError> {
        let bytes = URL_SAFE_NO_PAD
            .decode(&self.0[2..])
            .map_err(|err| ReplicaError::InvalidArtifactCode(format!("{}: {err}", self.0)))?;
        bytes
            .try_into()
            .map_err(|_| ReplicaError::InvalidArtifactCode(self.0.clone()))
    }
}

impl fmt::Display for ArtifactCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ArtifactCode {
    type Err = ReplicaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if !ARTIFACT_CODE_RE.is_match(trimmed) {
            return Err(ReplicaError::InvalidArtifactCode(value.to_string()));
        }
        Ok(Self(trimmed.to_string()))
    }
}

/// XOR of the artifact-code hashes of every record loaded into a repository.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum([u8; 32]);

impl Checksum {
    pub fn initial() -> Self {
        Self([0u8; 32])
    }

    pub fn update(self, code: &ArtifactCode) -> Result<Self, ReplicaError> {
        let hash = code.hash_bytes()?;
        let mut next = self.0;
        for (byte, other) in next.iter_mut().zip(hash.iter()) {
            *byte ^= other;
        }
        Ok(Self(next))
    }
}

impl fmt::Display for Checksum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", URL_SAFE_NO_PAD.encode(self.0))
    }
}

impl FromStr for Checksum {
    type Err = ReplicaError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let bytes = URL_SAFE_NO_PAD
            .decode(value.trim())
            .map_err(|err| ReplicaError::CorruptState(format!("checksum {value}: {err}")))?;
        let bytes: [u8; 32] = bytes
            .try_into()
            .map_err(|_| ReplicaError::CorruptState(format!("checksum {value}")))?;
        Ok(Self(bytes))
    }
}

/// Wire form of a record, as delivered by the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDocument {
    pub uri: String,
    pub quads: Vec<Quad>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Nanopub {
    uri: Term,
    artifact_code: Option<ArtifactCode>,
    head: Term,
    assertion: Term,
    provenance: Term,
    pubinfo: Term,
    quads: Vec<Quad>,
}

impl Nanopub {
    pub fn from_document(document: RecordDocument) -> Result<Self, ReplicaError> {
        let RecordDocument { uri, quads } = document;
        if uri.trim().is_empty() {
            return Err(ReplicaError::MalformedRecord("empty record URI".to_string()));
        }
        let uri_term = Term::iri(uri.trim());
        let rdf_type = Term::iri(vocab::RDF_TYPE);
        let np_class = Term::iri(vocab::NANOPUBLICATION);

        let head = quads
            .iter()
            .find(|q| q.subject == uri_term && q.predicate == rdf_type && q.object == np_class)
            .and_then(|q| q.graph.clone())
            .ok_or_else(|| ReplicaError::MalformedRecord(format!("{uri}: no head graph")))?;

        let link = |predicate: &str| -> Result<Term, ReplicaError> {
            let predicate = Term::iri(predicate);
            quads
                .iter()
                .find(|q| {
                    q.graph.as_ref() == Some(&head)
                        && q.subject == uri_term
                        && q.predicate == predicate
                        && q.object.is_iri()
                })
                .map(|q| q.object.clone())
                .ok_or_else(|| {
                    ReplicaError::MalformedRecord(format!(
                        "{uri}: head graph has no {} link",
                        predicate.value()
                    ))
                })
        };
        let assertion = link(vocab::HAS_ASSERTION)?;
        let provenance = link(vocab::HAS_PROVENANCE)?;
        let pubinfo = link(vocab::HAS_PUBINFO)?;

        Ok(Self {
            artifact_code: ArtifactCode::from_uri(uri_term.value()),
            uri: uri_term,
            head,
            assertion,
            provenance,
            pubinfo,
            quads,
        })
    }

    pub fn uri(&self) -> &Term {
        &self.uri
    }

    pub fn artifact_code(&self) -> Option<&ArtifactCode> {
        self.artifact_code.as_ref()
    }

    pub fn head_graph(&self) -> &Term {
        &self.head
    }

    pub fn assertion_graph(&self) -> &Term {
        &self.assertion
    }

    pub fn provenance_graph(&self) -> &Term {
        &self.provenance
    }

    pub fn pubinfo_graph(&self) -> &Term {
        &self.pubinfo
    }

    pub fn quads(&self) -> &[Quad] {
        &self.quads
    }

    fn in_graph<'a>(&'a self, graph: &'a Term) -> impl Iterator<Item = &'a Quad> + 'a {
        self.quads
            .iter()
            .filter(move |q| q.graph.as_ref() == Some(graph))
    }

    /// Reason why the record must not be routed, if any.
    pub fn rejection_reason(&self) -> Option<String> {
        let Some(code) = &self.artifact_code else {
            return Some("record URI carries no artifact code".to_string());
        };
        if let Err(err) = code.hash_bytes() {
            return Some(err.to_string());
        }
        let graphs = [&self.head, &self.assertion, &self.provenance, &self.pubinfo];
        if graphs.iter().any(|g| !g.value().contains(code.as_str())) {
            return Some(
                "could not load nanopub as not all graphs contained the artifact code".to_string(),
            );
        }
        if self.public_key().is_none() {
            return Some("no public key found in the signature element".to_string());
        }
        None
    }

    pub fn public_key(&self) -> Option<String> {
        let target = Term::iri(vocab::HAS_SIGNATURE_TARGET);
        let key = Term::iri(vocab::HAS_PUBLIC_KEY);
        let signature = self
            .in_graph(&self.pubinfo)
            .find(|q| q.predicate == target && q.object == self.uri)
            .map(|q| q.subject.clone());
        self.in_graph(&self.pubinfo)
            .filter(|q| q.predicate == key && q.object.is_literal())
            .find(|q| signature.as_ref().is_none_or(|sig| &q.subject == sig))
            .map(|q| q.object.value().to_string())
    }

    pub fn types(&self) -> BTreeSet<Term> {
        let rdf_type = Term::iri(vocab::RDF_TYPE);
        let np_type = Term::iri(vocab::HAS_NANOPUB_TYPE);
        let np_class = Term::iri(vocab::NANOPUBLICATION);

        let explicit: BTreeSet<Term> = self
            .in_graph(&self.pubinfo)
            .filter(|q| q.subject == self.uri)
            .filter(|q| q.predicate == np_type || q.predicate == rdf_type)
            .filter(|q| q.object.is_iri() && q.object != np_class)
            .map(|q| q.object.clone())
            .collect();
        if !explicit.is_empty() {
            return explicit;
        }

        let assertion: Vec<&Quad> = self.in_graph(&self.assertion).collect();
        let mut types: BTreeSet<Term> = assertion
            .iter()
            .filter(|q| q.predicate == rdf_type && q.object.is_iri())
            .map(|q| q.object.clone())
            .collect();
        let predicates: BTreeSet<&Term> = assertion
            .iter()
            .map(|q| &q.predicate)
            .filter(|p| **p != rdf_type)
            .collect();
        if predicates.len() == 1 {
            types.extend(predicates.into_iter().cloned());
        }
        types
    }

    pub fn creation_time(&self) -> Option<DateTime<Utc>> {
        let created = Term::iri(vocab::DCT_CREATED);
        self.in_graph(&self.pubinfo)
            .find(|q| q.subject == self.uri && q.predicate == created)
            .and_then(|q| DateTime::parse_from_rfc3339(q.object.value()).ok())
            .map(|dt| dt.with_timezone(&Utc))
    }

    pub fn is_introduction(&self) -> bool {
        let declared_by = Term::iri(vocab::DECLARED_BY);
        self.in_graph(&self.assertion)
            .any(|q| q.predicate == declared_by)
    }

    /// Agent introduced by an introduction record and the keys it declares.
    pub fn introduction(&self) -> Option<(Term, Vec<String>)> {
        if !self.is_introduction() {
            return None;
        }
        let declared_by = Term::iri(vocab::DECLARED_BY);
        let key = Term::iri(vocab::HAS_PUBLIC_KEY);
        let declarations: Vec<&Quad> = self
            .in_graph(&self.assertion)
            .filter(|q| q.predicate == declared_by)
            .collect();
        let agent = declarations.first()?.object.clone();
        let keys = self
            .in_graph(&self.assertion)
            .filter(|q| q.predicate == key && declarations.iter().any(|d| d.subject == q.subject))
            .map(|q| q.object.value().to_string())
            .collect();
        Some((agent, keys))
    }

    /// Statements about the record that go into the admin graphs of the
    /// `full` and `meta` repositories, next to the record itself.
    pub fn admin_statements(&self) -> Vec<Quad> {
        let admin = vocab::admin_graph();
        let network = vocab::admin_network_graph();
        let code = self
            .artifact_code
            .as_ref()
            .map(|c| c.as_str().to_string())
            .unwrap_or_default();

        let mut statements = Vec::new();
        let mut sub_iris = BTreeSet::new();
        let mut other_nanopubs = BTreeSet::new();
        let mut classify = |term: &Term, sub_iris: &mut BTreeSet<Term>| {
            let Some(iri) = term.as_iri() else { return };
            if !code.is_empty() && iri.contains(&code) {
                sub_iris.insert(term.clone());
            } else if let Some(base) = base_trusty_uri(iri) {
                other_nanopubs.insert(Term::iri(base));
            }
        };

        for quad in &self.quads {
            classify(&quad.predicate, &mut sub_iris);
            if quad.subject == self.uri {
                if let Some(object) = quad.object.as_iri() {
                    if TRUSTY_REF_RE.is_match(object) {
                        statements.push(Quad::new(
                            self.uri.clone(),
                            quad.predicate.clone(),
                            quad.object.clone(),
                            network.clone(),
                        ));
                        continue;
                    }
                }
            }
            classify(&quad.subject, &mut sub_iris);
            classify(&quad.object, &mut sub_iris);
        }
        for own in [
            &self.uri,
            &self.head,
            &self.assertion,
            &self.provenance,
            &self.pubinfo,
        ] {
            sub_iris.remove(own);
        }
        for iri in sub_iris {
            statements.push(Quad::new(
                self.uri.clone(),
                vocab::has_sub_iri(),
                iri,
                admin.clone(),
            ));
        }
        for other in other_nanopubs {
            statements.push(Quad::new(
                self.uri.clone(),
                vocab::refers_to_nanopub(),
                other,
                network.clone(),
            ));
        }

        let link = |predicate: Term, object: &Term| {
            Quad::new(self.uri.clone(), predicate, object.clone(), admin.clone())
        };
        statements.push(link(vocab::has_head_graph(), &self.head));
        statements.push(link(Term::iri(vocab::HAS_ASSERTION), &self.assertion));
        statements.push(link(Term::iri(vocab::HAS_PROVENANCE), &self.provenance));
        statements.push(link(Term::iri(vocab::HAS_PUBINFO), &self.pubinfo));
        statements.push(link(vocab::artifact_code(), &Term::literal(code.clone())));

        if let Some(key) = self.public_key() {
            statements.push(link(
                vocab::has_valid_signature_for_public_key(),
                &Term::literal(key),
            ));
            if let Some((agent, keys)) = self.introduction() {
                statements.push(link(vocab::is_introduction_of(), &agent));
                for declared in keys {
                    statements.push(link(vocab::declares_pubkey(), &Term::literal(declared)));
                }
            }
        }

        let created = match self.creation_time() {
            Some(timestamp) => Term::date_time(&timestamp),
            None => Term::literal(""),
        };
        statements.push(link(Term::iri(vocab::DCT_CREATED), &created));
        statements
    }
}

/// Strips a trusty URI down to the part ending in its artifact code.
pub fn base_trusty_uri(iri: &str) -> Option<String> {
    TRUSTY_PREFIX_RE
        .captures(iri)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().to_string())
}

/// Short display name for a public key: first character and five characters
/// from position 40.
pub fn short_pubkey_name(pubkey: &str) -> String {
    let chars: Vec<char> = pubkey.chars().collect();
    if chars.len() < 45 {
        return pubkey.to_string();
    }
    let head: String = chars[..1].iter().collect();
    let tail: String = chars[40..45].iter().collect();
    format!("{head}..{tail}..")
}
