//! Couchbase HTTP store client
//!
//! Implements the `DocumentStore` seam over the Couchbase HTTP APIs:
//! document endpoints for keyed mutations and the query service for
//! conditional writes.

use async_trait::async_trait;
use bytes::Bytes;
use cb_sink_core::prelude::*;
use cb_sink_core::{CouchbaseConfig, StoreMetrics};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

/// Couchbase store configuration
#[derive(Debug, Clone)]
pub struct CouchbaseStoreConfig {
    pub hosts: Vec<String>,
    pub bucket: String,
    pub scope: String,
    pub collection: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub connect_timeout: Duration,
    pub request_timeout: Duration,
}

impl Default for CouchbaseStoreConfig {
    fn default() -> Self {
        Self {
            hosts: vec!["http://localhost:8091".to_string()],
            bucket: "default".to_string(),
            scope: "_default".to_string(),
            collection: "_default".to_string(),
            username: None,
            password: None,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&CouchbaseConfig> for CouchbaseStoreConfig {
    fn from(config: &CouchbaseConfig) -> Self {
        Self {
            hosts: config.hosts.clone(),
            bucket: config.bucket.clone(),
            scope: config.scope.clone(),
            collection: config.collection.clone(),
            username: config.username.clone(),
            password: config.password.clone(),
            connect_timeout: config.connect_timeout,
            request_timeout: config.request_timeout,
        }
    }
}

/// Couchbase document store over HTTP
pub struct CouchbaseHttpStore {
    client: Client,
    config: CouchbaseStoreConfig,
    host_index: AtomicUsize,
    running: AtomicBool,
    metrics: StoreMetrics,
}

impl CouchbaseHttpStore {
    pub fn new(config: CouchbaseStoreConfig) -> Result<Self> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| SinkError::store_with_source("Failed to create client", e))?;

        Ok(Self {
            client,
            config,
            host_index: AtomicUsize::new(0),
            running: AtomicBool::new(false),
            metrics: StoreMetrics::new("couchbase_store"),
        })
    }

    fn get_host(&self) -> &str {
        let idx = self.host_index.fetch_add(1, Ordering::Relaxed) % self.config.hosts.len();
        &self.config.hosts[idx]
    }

    fn url_with_segments<'a>(&self, segments: impl IntoIterator<Item = &'a str>) -> Result<Url> {
        let mut url = Url::parse(self.get_host())
            .map_err(|e| SinkError::config(format!("Invalid Couchbase host: {}", e)))?;
        url.path_segments_mut()
            .map_err(|_| SinkError::config("Couchbase host cannot be a base URL"))?
            .extend(segments);
        Ok(url)
    }

    /// Document endpoint URL; the id lands in a path segment so slashes in
    /// coordinate-derived ids are percent-encoded, not path separators.
    fn document_url(&self, id: &str, action: Option<&str>) -> Result<Url> {
        let base = [
            "v1",
            "buckets",
            self.config.bucket.as_str(),
            "scopes",
            self.config.scope.as_str(),
            "collections",
            self.config.collection.as_str(),
            "documents",
            id,
        ];
        self.url_with_segments(base.into_iter().chain(action))
    }

    fn query_url(&self) -> Result<Url> {
        self.url_with_segments(["_p", "query", "query", "service"])
    }

    fn build_request(&self, method: reqwest::Method, url: Url) -> reqwest::RequestBuilder {
        let mut req = self.client.request(method, url);
        if let (Some(user), Some(pass)) = (&self.config.username, &self.config.password) {
            req = req.basic_auth(user, Some(pass));
        }
        req
    }

    fn durability_params(&self, url: &mut Url, durability: Durability) {
        if durability.persist_to.nodes() == 0 && durability.replicate_to.nodes() == 0 {
            return;
        }
        let mut pairs = url.query_pairs_mut();
        if durability.persist_to.nodes() > 0 {
            pairs.append_pair("persist_to", &durability.persist_to.nodes().to_string());
        }
        if durability.replicate_to.nodes() > 0 {
            pairs.append_pair("replicate_to", &durability.replicate_to.nodes().to_string());
        }
    }

    fn keyspace(&self) -> String {
        format!(
            "`{}`.`{}`.`{}`",
            self.config.bucket, self.config.scope, self.config.collection
        )
    }

    /// Map a transport-level failure; timeouts are surfaced distinctly so
    /// the error taxonomy stays honest.
    fn transport_error(&self, operation: &'static str, e: reqwest::Error) -> SinkError {
        self.metrics.record_request(operation, "transport_error");
        if e.is_timeout() {
            SinkError::timeout(operation, self.config.request_timeout.as_millis() as u64)
        } else {
            SinkError::store_with_source(format!("{} request failed", operation), e)
        }
    }

    /// Map a response status. Error bodies are discarded; they may echo
    /// document content, which must not reach logs or error messages.
    fn check_status(
        &self,
        operation: &'static str,
        id: &str,
        status: StatusCode,
    ) -> Result<()> {
        if status.is_success() {
            self.metrics.record_request(operation, "ok");
            return Ok(());
        }
        if status == StatusCode::NOT_FOUND {
            self.metrics.record_request(operation, "not_found");
            return Err(SinkError::not_found(id));
        }
        self.metrics.record_request(operation, "error");
        Err(SinkError::store(format!(
            "{} for document '{}' failed with status {}",
            operation, id, status
        )))
    }

    async fn run_query(
        &self,
        operation: &'static str,
        id: &str,
        body: Map<String, Value>,
    ) -> Result<QueryResponse> {
        let resp = self
            .build_request(reqwest::Method::POST, self.query_url()?)
            .json(&Value::Object(body))
            .send()
            .await
            .map_err(|e| self.transport_error(operation, e))?;

        let status = resp.status();
        if !status.is_success() {
            self.metrics.record_request(operation, "error");
            return Err(SinkError::store(format!(
                "{} for document '{}' failed with status {}",
                operation, id, status
            )));
        }

        let parsed: QueryResponse = resp
            .json()
            .await
            .map_err(|e| SinkError::store_with_source("Failed to parse query response", e))?;

        if parsed.status != "success" {
            self.metrics.record_request(operation, "error");
            let reason = parsed
                .errors
                .first()
                .map(|e| e.msg.as_str())
                .unwrap_or("unknown");
            return Err(SinkError::store(format!(
                "{} for document '{}' failed: {}",
                operation, id, reason
            )));
        }

        self.metrics.record_request(operation, "ok");
        Ok(parsed)
    }
}

#[async_trait]
impl Lifecycle for CouchbaseHttpStore {
    async fn start(&self) -> Result<()> {
        info!(bucket = %self.config.bucket, "Connecting to Couchbase");

        let url = self.url_with_segments(["v1", "buckets", self.config.bucket.as_str()])?;
        let resp = self
            .build_request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| SinkError::store_with_source("Connection failed", e))?;

        if !resp.status().is_success() {
            return Err(SinkError::store(format!(
                "Bucket '{}' is not reachable: {}",
                self.config.bucket,
                resp.status()
            )));
        }

        self.running.store(true, Ordering::SeqCst);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HealthCheck for CouchbaseHttpStore {
    async fn health_check(&self) -> Result<()> {
        let url = self.url_with_segments(["v1", "buckets", self.config.bucket.as_str()])?;
        let resp = self
            .build_request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| SinkError::store_with_source("Health check failed", e))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(SinkError::store("Bucket unhealthy"))
        }
    }

    fn component_name(&self) -> &'static str {
        "couchbase_store"
    }
}

#[async_trait]
impl DocumentStore for CouchbaseHttpStore {
    async fn replace(
        &self,
        id: &str,
        content: Bytes,
        durability: Durability,
        expiry: Option<Duration>,
    ) -> Result<()> {
        let mut url = self.document_url(id, None)?;
        self.durability_params(&mut url, durability);
        if let Some(expiry) = expiry {
            url.query_pairs_mut()
                .append_pair("expiry", &expiry.as_secs().to_string());
        }

        // Content is already canonical JSON bytes; send it raw so the
        // store performs no transcoding.
        let resp = self
            .build_request(reqwest::Method::PUT, url)
            .header("Content-Type", "application/json")
            .body(content)
            .send()
            .await
            .map_err(|e| self.transport_error("replace", e))?;

        self.check_status("replace", id, resp.status())
    }

    async fn mutate_in(
        &self,
        id: &str,
        patch: &PatchSpec,
        content: Bytes,
        durability: Durability,
    ) -> Result<()> {
        let mut url = self.document_url(id, Some("mutate"))?;
        self.durability_params(&mut url, durability);

        let mut operation = Map::new();
        operation.insert(
            "op".to_string(),
            Value::String(patch.operation.as_str().to_string()),
        );
        operation.insert("path".to_string(), Value::String(patch.path.clone()));
        if patch.operation != SubDocOperation::Remove {
            let value: Value = serde_json::from_slice(&content).map_err(|e| {
                SinkError::serialization_with_source("Patch content is not valid JSON", e)
            })?;
            operation.insert("value".to_string(), value);
        }

        let body = serde_json::json!({
            "operations": [Value::Object(operation)],
            "create_parents": patch.create_parents,
            "upsert_document": patch.create_document,
        });

        let resp = self
            .build_request(reqwest::Method::POST, url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.transport_error("mutate_in", e))?;

        self.check_status("mutate_in", id, resp.status())
    }

    async fn conditional_write(
        &self,
        id: &str,
        where_fields: &[String],
        content: Bytes,
        create_document: bool,
        durability: Durability,
    ) -> Result<()> {
        let fields = parse_object(&content)?;
        for field in where_fields {
            if !fields.contains_key(field) {
                return Err(SinkError::config(format!(
                    "Conditional write predicate field '{}' missing from record content",
                    field
                )));
            }
        }

        let statement = update_statement(&self.keyspace(), &fields, where_fields);
        let body = query_body(statement, &fields, durability);
        let result = self.run_query("conditional_write", id, body).await?;

        let mutations = result.metrics.map(|m| m.mutation_count).unwrap_or(0);
        if mutations > 0 {
            debug!(doc_id = %id, mutations, "Conditional update applied");
            return Ok(());
        }

        if !create_document {
            return Err(SinkError::not_found(id));
        }

        // Nothing matched; create the document under the resolved id. The
        // keyed insert keeps redelivery idempotent.
        let mut args = Map::new();
        args.insert("sink_key".to_string(), Value::String(id.to_string()));
        args.insert("sink_doc".to_string(), Value::Object(fields));
        let body = query_body(insert_statement(&self.keyspace()), &args, durability);
        self.run_query("conditional_insert", id, body).await.map(|_| ())
    }

    async fn remove(&self, id: &str, durability: Durability) -> Result<()> {
        let mut url = self.document_url(id, None)?;
        self.durability_params(&mut url, durability);

        let resp = self
            .build_request(reqwest::Method::DELETE, url)
            .send()
            .await
            .map_err(|e| self.transport_error("remove", e))?;

        self.check_status("remove", id, resp.status())
    }
}

/// Assemble a query request body: statement, named arguments, and the
/// durability thresholds shared by every mutating operation
fn query_body(
    statement: String,
    args: &Map<String, Value>,
    durability: Durability,
) -> Map<String, Value> {
    let mut body = Map::new();
    body.insert("statement".to_string(), Value::String(statement));
    for (name, value) in args {
        body.insert(format!("${}", name), value.clone());
    }
    if durability.persist_to.nodes() > 0 {
        body.insert(
            "persist_to".to_string(),
            Value::from(durability.persist_to.nodes()),
        );
    }
    if durability.replicate_to.nodes() > 0 {
        body.insert(
            "replicate_to".to_string(),
            Value::from(durability.replicate_to.nodes()),
        );
    }
    body
}

/// Parse content bytes into a top-level JSON object
fn parse_object(content: &[u8]) -> Result<Map<String, Value>> {
    match serde_json::from_slice(content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err(SinkError::serialization(
            "Conditional write requires a top-level JSON object",
        )),
        Err(e) => Err(SinkError::serialization_with_source(
            "Record content is not valid JSON",
            e,
        )),
    }
}

/// Build the conditional UPDATE statement
///
/// All fields are SET (setting a predicate field to its own value is a
/// no-op) and the configured predicate fields form the WHERE clause as
/// named parameters.
fn update_statement(
    keyspace: &str,
    fields: &Map<String, Value>,
    where_fields: &[String],
) -> String {
    let set_clause = fields
        .keys()
        .map(|name| format!("`{}` = ${}", name, name))
        .collect::<Vec<_>>()
        .join(", ");
    let where_clause = where_fields
        .iter()
        .map(|name| format!("`{}` = ${}", name, name))
        .collect::<Vec<_>>()
        .join(" AND ");
    format!(
        "UPDATE {} SET {} WHERE {}",
        keyspace, set_clause, where_clause
    )
}

/// Build the keyed INSERT used when no document matched the predicate
fn insert_statement(keyspace: &str) -> String {
    format!(
        "INSERT INTO {} (KEY, VALUE) VALUES ($sink_key, $sink_doc)",
        keyspace
    )
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    status: String,
    #[serde(default)]
    metrics: Option<QueryMetrics>,
    #[serde(default)]
    errors: Vec<QueryError>,
}

#[derive(Debug, Deserialize)]
struct QueryMetrics {
    #[serde(rename = "mutationCount", default)]
    mutation_count: u64,
}

#[derive(Debug, Deserialize)]
struct QueryError {
    msg: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn object(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_update_statement_shape() {
        let fields = object(json!({"city": "Oslo", "user_id": 7}));
        let statement = update_statement(
            "`travel`.`_default`.`_default`",
            &fields,
            &["user_id".to_string()],
        );
        assert_eq!(
            statement,
            "UPDATE `travel`.`_default`.`_default` SET `city` = $city, `user_id` = $user_id WHERE `user_id` = $user_id"
        );
    }

    #[test]
    fn test_insert_statement_shape() {
        assert_eq!(
            insert_statement("`b`.`s`.`c`"),
            "INSERT INTO `b`.`s`.`c` (KEY, VALUE) VALUES ($sink_key, $sink_doc)"
        );
    }

    #[test]
    fn test_parse_object_rejects_non_objects() {
        assert!(parse_object(br#"{"a":1}"#).is_ok());
        assert!(parse_object(br#"[1,2]"#).is_err());
        assert!(parse_object(b"{broken").is_err());
    }

    #[test]
    fn test_document_url_encodes_coordinate_ids() {
        let store = CouchbaseHttpStore::new(CouchbaseStoreConfig::default()).unwrap();
        let url = store.document_url("t/0/1", None).unwrap();
        assert!(url.path().ends_with("/documents/t%2F0%2F1"));
    }
}
