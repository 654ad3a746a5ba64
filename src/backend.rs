//! Triple-store seam. `rdf4j` talks to a server over HTTP, `memory` keeps
//! everything in process.

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::error::ReplicaError;
use crate::rdf::{Pattern, Quad};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    Snapshot,
    Serializable,
}

impl IsolationLevel {
    pub fn as_iri(&self) -> &'static str {
        match self {
            IsolationLevel::Snapshot => "http://www.openrdf.org/schema/sesame#SNAPSHOT",
            IsolationLevel::Serializable => "http://www.openrdf.org/schema/sesame#SERIALIZABLE",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepositoryKind {
    Regular,
    Text,
}

/// How a repository is laid out when it is created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepositoryTemplate {
    pub name: String,
    pub kind: RepositoryKind,
    pub triple_indexes: &'static str,
}

impl RepositoryTemplate {
    pub fn for_name(name: &str) -> Self {
        let reduced = name.starts_with("meta") || name.starts_with("text");
        Self {
            name: name.to_string(),
            kind: if name.starts_with("text") {
                RepositoryKind::Text
            } else {
                RepositoryKind::Regular
            },
            triple_indexes: if reduced {
                "spoc,posc,ospc"
            } else {
                "spoc,posc,ospc,cspo,cpos,cosp"
            },
        }
    }

    /// RDF4J repository configuration in Turtle.
    pub fn to_turtle(&self) -> String {
        let prefixes = "@prefix rdfs: <http://www.w3.org/2000/01/rdf-schema#>.\n\
             @prefix rep: <http://www.openrdf.org/config/repository#>.\n\
             @prefix sr: <http://www.openrdf.org/config/repository/sail#>.\n\
             @prefix sail: <http://www.openrdf.org/config/sail#>.\n\
             @prefix sail-luc: <http://www.openrdf.org/config/sail/lucene#>.\n\
             @prefix lmdb: <http://rdf4j.org/config/sail/lmdb#>.\n\
             @prefix sb: <http://www.openrdf.org/config/sail/base#>.\n\n";
        let lmdb = format!(
            "sail:sailType \"rdf4j:LmdbStore\" ;\n\
             sail:iterationCacheSyncThreshold \"10000\";\n\
             lmdb:tripleIndexes \"{}\" ;\n\
             sb:defaultQueryEvaluationMode \"STANDARD\"",
            self.triple_indexes
        );
        let sail = match self.kind {
            RepositoryKind::Regular => lmdb,
            RepositoryKind::Text => format!(
                "sail:sailType \"openrdf:LuceneSail\" ;\n\
                 sail-luc:indexDir \"index/\" ;\n\
                 sail:delegate [\n{lmdb}\n]"
            ),
        };
        let label = match self.kind {
            RepositoryKind::Regular => "LMDB store",
            RepositoryKind::Text => "store",
        };
        format!(
            "{prefixes}[] a rep:Repository ;\n\
             rep:repositoryID \"{name}\" ;\n\
             rdfs:label \"{name} {label}\" ;\n\
             rep:repositoryImpl [\n\
             rep:repositoryType \"openrdf:SailRepository\" ;\n\
             sr:sailImpl [\n{sail}\n]\n].\n",
            name = self.name
        )
    }
}

pub trait TripleStore: Send + Sync {
    /// Creates the repository; an existing repository is not an error.
    fn create_repository(
        &self,
        template: &RepositoryTemplate,
    ) -> Result<CreateOutcome, ReplicaError>;

    /// Every repository the server knows about, cached or not.
    fn repository_names(&self) -> Result<BTreeSet<String>, ReplicaError>;

    fn open(&self, name: &str) -> Result<Arc<dyn Repository>, ReplicaError>;
}

pub trait Repository: Send + Sync {
    fn name(&self) -> &str;

    fn statements(&self, pattern: &Pattern) -> Result<Vec<Quad>, ReplicaError>;

    fn has_statement(&self, pattern: &Pattern) -> Result<bool, ReplicaError> {
        Ok(!self.statements(pattern)?.is_empty())
    }

    /// Adds the quads in one local transaction.
    fn add(&self, quads: &[Quad]) -> Result<(), ReplicaError>;

    fn begin(&self, isolation: IsolationLevel)
    -> Result<Box<dyn Transaction + '_>, ReplicaError>;

    /// Releases backend resources. Later calls fail with `RepositoryClosed`.
    fn shut_down(&self);

    fn is_open(&self) -> bool;
}

/// Dropping a transaction without committing rolls it back.
pub trait Transaction {
    fn statements(&mut self, pattern: &Pattern) -> Result<Vec<Quad>, ReplicaError>;

    fn remove(&mut self, pattern: &Pattern) -> Result<(), ReplicaError>;

    fn add(&mut self, quads: &[Quad]) -> Result<(), ReplicaError>;

    fn commit(self: Box<Self>) -> Result<(), ReplicaError>;

    fn rollback(self: Box<Self>) -> Result<(), ReplicaError>;
}

pub type RepositoryHandle = Arc<dyn Repository>;

/// Runs `body` inside a transaction, committing on success and rolling back
/// on failure.
pub fn in_transaction<T, F>(
    repository: &dyn Repository,
    isolation: IsolationLevel,
    body: F,
) -> Result<T, ReplicaError>
where
    F: FnOnce(&mut dyn Transaction) -> Result<T, ReplicaError>,
{
    let mut tx = repository.begin(isolation)?;
    match body(tx.as_mut()) {
        Ok(value) => {
            tx.commit()?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = tx.rollback() {
                tracing::warn!(
                    repository = repository.name(),
                    error = %rollback,
                    "rollback failed"
                );
            }
            Err(err)
        }
    }
}
