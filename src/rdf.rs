//! RDF terms, quads and quad patterns.
//!
//! Terms use the same JSON shape as SPARQL JSON results (`uri`, `literal`,
//! `bnode`), so registry frames and query results decode into one type.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::vocab;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Term {
    #[serde(rename = "uri")]
    Iri { value: String },
    #[serde(rename = "literal", alias = "typed-literal")]
    Literal {
        value: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        datatype: Option<String>,
        #[serde(rename = "xml:lang", default, skip_serializing_if = "Option::is_none")]
        lang: Option<String>,
    },
    #[serde(rename = "bnode")]
    Blank { value: String },
}

impl Term {
    pub fn iri(value: impl Into<String>) -> Self {
        Term::Iri {
            value: value.into(),
        }
    }

    pub fn literal(value: impl Into<String>) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: None,
            lang: None,
        }
    }

    pub fn typed(value: impl Into<String>, datatype: &str) -> Self {
        Term::Literal {
            value: value.into(),
            datatype: Some(datatype.to_string()),
            lang: None,
        }
    }

    pub fn long(value: i64) -> Self {
        Self::typed(value.to_string(), vocab::XSD_LONG)
    }

    pub fn date_time(value: &chrono::DateTime<chrono::Utc>) -> Self {
        Self::typed(value.to_rfc3339(), vocab::XSD_DATE_TIME)
    }

    /// Lexical value: the IRI, the literal text or the blank node label.
    pub fn value(&self) -> &str {
        match self {
            Term::Iri { value } | Term::Literal { value, .. } | Term::Blank { value } => value,
        }
    }

    pub fn as_iri(&self) -> Option<&str> {
        match self {
            Term::Iri { value } => Some(value),
            _ => None,
        }
    }

    pub fn is_iri(&self) -> bool {
        matches!(self, Term::Iri { .. })
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Term::Literal { .. })
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Term::Literal { value, .. } => value.trim().parse().ok(),
            _ => None,
        }
    }

    /// N-Triples form, which is also valid SPARQL term syntax.
    pub fn to_ntriples(&self) -> String {
        match self {
            Term::Iri { value } => format!("<{value}>"),
            Term::Blank { value } => format!("_:{value}"),
            Term::Literal {
                value,
                datatype,
                lang,
            } => {
                let escaped = escape_literal(value);
                match (lang, datatype) {
                    (Some(lang), _) => format!("\"{escaped}\"@{lang}"),
                    (None, Some(dt)) if dt != vocab::XSD_STRING => {
                        format!("\"{escaped}\"^^<{dt}>")
                    }
                    _ => format!("\"{escaped}\""),
                }
            }
        }
    }
}

impl fmt::Display for Term {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_ntriples())
    }
}

fn escape_literal(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for ch in value.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Quad {
    pub subject: Term,
    pub predicate: Term,
    pub object: Term,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub graph: Option<Term>,
}

impl Quad {
    pub fn new(subject: Term, predicate: Term, object: Term, graph: Term) -> Self {
        Self {
            subject,
            predicate,
            object,
            graph: Some(graph),
        }
    }

    pub fn to_nquads(&self) -> String {
        match &self.graph {
            Some(graph) => format!(
                "{} {} {} {} .",
                self.subject, self.predicate, self.object, graph
            ),
            None => format!("{} {} {} .", self.subject, self.predicate, self.object),
        }
    }
}

pub fn to_nquads(quads: &[Quad]) -> String {
    let mut out = String::new();
    for quad in quads {
        out.push_str(&quad.to_nquads());
        out.push('\n');
    }
    out
}

/// A statement pattern; `None` positions match anything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Pattern {
    pub subject: Option<Term>,
    pub predicate: Option<Term>,
    pub object: Option<Term>,
    pub graph: Option<Term>,
}

impl Pattern {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subject(mut self, term: Term) -> Self {
        self.subject = Some(term);
        self
    }

    pub fn predicate(mut self, term: Term) -> Self {
        self.predicate = Some(term);
        self
    }

    pub fn object(mut self, term: Term) -> Self {
        self.object = Some(term);
        self
    }

    pub fn graph(mut self, term: Term) -> Self {
        self.graph = Some(term);
        self
    }

    pub fn matches(&self, quad: &Quad) -> bool {
        fn slot(expected: &Option<Term>, actual: &Term) -> bool {
            expected.as_ref().is_none_or(|term| term == actual)
        }
        slot(&self.subject, &quad.subject)
            && slot(&self.predicate, &quad.predicate)
            && slot(&self.object, &quad.object)
            && match (&self.graph, &quad.graph) {
                (None, _) => true,
                (Some(expected), Some(actual)) => expected == actual,
                (Some(_), None) => false,
            }
    }

    fn position(term: &Option<Term>, var: &str) -> String {
        match term {
            Some(term) => term.to_ntriples(),
            None => format!("?{var}"),
        }
    }

    fn block(&self) -> String {
        format!(
            "GRAPH {} {{ {} {} {} }}",
            Self::position(&self.graph, "g"),
            Self::position(&self.subject, "s"),
            Self::position(&self.predicate, "p"),
            Self::position(&self.object, "o"),
        )
    }

    pub fn to_sparql_select(&self) -> String {
        format!("SELECT * WHERE {{ {} }}", self.block())
    }

    pub fn to_sparql_ask(&self) -> String {
        format!("ASK {{ {} }}", self.block())
    }

    pub fn to_sparql_delete(&self) -> String {
        format!("DELETE WHERE {{ {} }}", self.block())
    }

    /// Fills the unbound positions from a SPARQL solution keyed by `s`, `p`, `o`, `g`.
    pub fn complete<F>(&self, mut lookup: F) -> Option<Quad>
    where
        F: FnMut(&str) -> Option<Term>,
    {
        let mut pick = |term: &Option<Term>, var: &str| match term {
            Some(term) => Some(term.clone()),
            None => lookup(var),
        };
        Some(Quad {
            subject: pick(&self.subject, "s")?,
            predicate: pick(&self.predicate, "p")?,
            object: pick(&self.object, "o")?,
            graph: Some(pick(&self.graph, "g")?),
        })
    }
}
