use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder, Response};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue, LOCATION, USER_AGENT};
use serde::Deserialize;

use crate::backend::{
    CreateOutcome, IsolationLevel, Repository, RepositoryTemplate, Transaction, TripleStore,
};
use crate::error::ReplicaError;
use crate::http;
use crate::rdf::{self, Pattern, Quad, Term};

const SPARQL_JSON: &str = "application/sparql-results+json";
const NQUADS: &str = "application/n-quads";

#[derive(Debug, Deserialize)]
struct SelectResults {
    results: SelectBindings,
}

#[derive(Debug, Deserialize)]
struct SelectBindings {
    bindings: Vec<HashMap<String, Term>>,
}

#[derive(Clone)]
pub struct Rdf4jTripleStore {
    client: Client,
    endpoint_base: String,
}

impl Rdf4jTripleStore {
    pub fn new(endpoint_base: &str) -> Result<Self, ReplicaError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            USER_AGENT,
            HeaderValue::from_str(&format!("np-replica/{}", env!("CARGO_PKG_VERSION")))
                .map_err(|err| ReplicaError::TripleStoreHttp(err.to_string()))?,
        );
        let client = Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(120))
            .build()
            .map_err(|err| ReplicaError::TripleStoreHttp(err.to_string()))?;
        let mut endpoint_base = endpoint_base.trim().to_string();
        if !endpoint_base.ends_with('/') {
            endpoint_base.push('/');
        }
        Ok(Self {
            client,
            endpoint_base,
        })
    }

    pub fn repository_url(&self, name: &str) -> String {
        format!("{}repositories/{}", self.endpoint_base, name)
    }

    fn send_with_retries<F>(&self, make_req: F) -> Result<Response, ReplicaError>
    where
        F: FnMut() -> RequestBuilder,
    {
        http::send_with_retries(make_req, ReplicaError::TripleStoreHttp)
    }
}

impl TripleStore for Rdf4jTripleStore {
    fn create_repository(
        &self,
        template: &RepositoryTemplate,
    ) -> Result<CreateOutcome, ReplicaError> {
        let url = self.repository_url(&template.name);
        let body = template.to_turtle();
        let response = self.send_with_retries(|| {
            self.client
                .put(&url)
                .header(CONTENT_TYPE, "text/turtle")
                .body(body.clone())
        })?;
        let status = response.status().as_u16();
        if status == 409 {
            return Ok(CreateOutcome::AlreadyExists);
        }
        handle_status(response)?;
        Ok(CreateOutcome::Created)
    }

    fn repository_names(&self) -> Result<BTreeSet<String>, ReplicaError> {
        let url = format!("{}repositories", self.endpoint_base);
        let response = self.send_with_retries(|| self.client.get(&url).header(ACCEPT, "text/csv"))?;
        let text = handle_status(response)?
            .text()
            .map_err(|err| ReplicaError::TripleStoreHttp(err.to_string()))?;
        Ok(parse_repository_csv(&text))
    }

    fn open(&self, name: &str) -> Result<Arc<dyn Repository>, ReplicaError> {
        Ok(Arc::new(Rdf4jRepository {
            client: self.client.clone(),
            name: name.to_string(),
            url: self.repository_url(name),
            open: AtomicBool::new(true),
            transactions: Mutex::new(HashSet::new()),
        }))
    }
}

pub struct Rdf4jRepository {
    client: Client,
    name: String,
    url: String,
    open: AtomicBool,
    transactions: Mutex<HashSet<String>>,
}

impl Rdf4jRepository {
    fn check(&self) -> Result<(), ReplicaError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(ReplicaError::RepositoryClosed(self.name.clone()));
        }
        Ok(())
    }

    fn send(&self, request: RequestBuilder) -> Result<Response, ReplicaError> {
        let response = request
            .send()
            .map_err(|err| ReplicaError::TripleStoreHttp(err.to_string()))?;
        handle_status(response)
    }

    fn forget(&self, location: &str) {
        self.transactions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .remove(location);
    }
}

impl Repository for Rdf4jRepository {
    fn name(&self) -> &str {
        &self.name
    }

    fn statements(&self, pattern: &Pattern) -> Result<Vec<Quad>, ReplicaError> {
        self.check()?;
        let response = self.send(
            self.client
                .post(&self.url)
                .header(ACCEPT, SPARQL_JSON)
                .form(&[("query", pattern.to_sparql_select())]),
        )?;
        read_select(response, pattern)
    }

    fn has_statement(&self, pattern: &Pattern) -> Result<bool, ReplicaError> {
        self.check()?;
        let response = self.send(
            self.client
                .post(&self.url)
                .header(ACCEPT, SPARQL_JSON)
                .form(&[("query", pattern.to_sparql_ask())]),
        )?;
        let value: serde_json::Value = response
            .json()
            .map_err(|err| ReplicaError::TripleStoreHttp(err.to_string()))?;
        Ok(value
            .get("boolean")
            .and_then(|value| value.as_bool())
            .unwrap_or(false))
    }

    fn add(&self, quads: &[Quad]) -> Result<(), ReplicaError> {
        self.check()?;
        self.send(
            self.client
                .post(format!("{}/statements", self.url))
                .header(CONTENT_TYPE, NQUADS)
                .body(rdf::to_nquads(quads)),
        )?;
        Ok(())
    }

    fn begin(
        &self,
        isolation: IsolationLevel,
    ) -> Result<Box<dyn Transaction + '_>, ReplicaError> {
        self.check()?;
        let response = self.send(
            self.client
                .post(format!("{}/transactions", self.url))
                .query(&[("isolation-level", isolation.as_iri())]),
        )?;
        let location = response
            .headers()
            .get(LOCATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| {
                ReplicaError::TripleStoreHttp("transaction without Location header".to_string())
            })?;
        let location = Url::parse(&self.url)
            .and_then(|base| base.join(location))
            .map_err(|err| ReplicaError::TripleStoreHttp(err.to_string()))?
            .to_string();
        self.transactions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .insert(location.clone());
        Ok(Box::new(Rdf4jTransaction {
            repository: self,
            location,
            finished: false,
        }))
    }

    fn shut_down(&self) {
        if !self.open.swap(false, Ordering::SeqCst) {
            return;
        }
        let dangling: Vec<String> = self
            .transactions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .drain()
            .collect();
        for location in dangling {
            if let Err(err) = self.client.delete(&location).send() {
                tracing::warn!(repository = %self.name, error = %err, "failed to abort transaction");
            }
        }
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

/// One server-side transaction, addressed by the Location the server returned.
pub struct Rdf4jTransaction<'a> {
    repository: &'a Rdf4jRepository,
    location: String,
    finished: bool,
}

impl Rdf4jTransaction<'_> {
    fn action(&self, action: &str) -> RequestBuilder {
        self.repository
            .client
            .put(&self.location)
            .query(&[("action", action)])
    }

    fn abort(&mut self) -> Result<(), ReplicaError> {
        self.finished = true;
        self.repository.forget(&self.location);
        self.repository
            .send(self.repository.client.delete(&self.location))?;
        Ok(())
    }
}

impl Transaction for Rdf4jTransaction<'_> {
    fn statements(&mut self, pattern: &Pattern) -> Result<Vec<Quad>, ReplicaError> {
        self.repository.check()?;
        let response = self.repository.send(
            self.action("QUERY")
                .header(ACCEPT, SPARQL_JSON)
                .query(&[("query", pattern.to_sparql_select())]),
        )?;
        read_select(response, pattern)
    }

    fn remove(&mut self, pattern: &Pattern) -> Result<(), ReplicaError> {
        self.repository.check()?;
        self.repository.send(
            self.action("UPDATE")
                .query(&[("update", pattern.to_sparql_delete())]),
        )?;
        Ok(())
    }

    fn add(&mut self, quads: &[Quad]) -> Result<(), ReplicaError> {
        self.repository.check()?;
        self.repository.send(
            self.action("ADD")
                .header(CONTENT_TYPE, NQUADS)
                .body(rdf::to_nquads(quads)),
        )?;
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<(), ReplicaError> {
        self.repository.check()?;
        let result = self.repository.send(self.action("COMMIT"));
        match result {
            Ok(_) => {
                self.finished = true;
                self.repository.forget(&self.location);
                Ok(())
            }
            Err(err) => {
                let _ = self.abort();
                Err(err)
            }
        }
    }

    fn rollback(mut self: Box<Self>) -> Result<(), ReplicaError> {
        self.abort()
    }
}

impl Drop for Rdf4jTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            let _ = self.abort();
        }
    }
}

fn read_select(response: Response, pattern: &Pattern) -> Result<Vec<Quad>, ReplicaError> {
    let results: SelectResults = response
        .json()
        .map_err(|err| ReplicaError::TripleStoreHttp(err.to_string()))?;
    Ok(results
        .results
        .bindings
        .into_iter()
        .filter_map(|mut solution| pattern.complete(|var| solution.remove(var)))
        .collect())
}

fn handle_status(response: Response) -> Result<Response, ReplicaError> {
    if response.status().is_success() {
        return Ok(response);
    }
    let status = response.status().as_u16();
    let message = response
        .text()
        .unwrap_or_else(|_| "triple store request failed".to_string());
    Err(ReplicaError::TripleStoreStatus { status, message })
}

/// Second column of the `/repositories` CSV listing, header skipped.
pub fn parse_repository_csv(text: &str) -> BTreeSet<String> {
    text.lines()
        .skip(1)
        .filter_map(|line| line.split(',').nth(1))
        .map(|name| name.trim().to_string())
        .filter(|name| !name.is_empty())
        .collect()
}
