//! Firestore backend over the REST API.
//!
//! A batch becomes one `documents:commit` request, which Firestore applies
//! atomically. Each write is a full `update` without a field mask, so the
//! stored document is replaced rather than merged.
//!
//! # Authentication
//!
//! The service account signs an RS256 JWT. That JWT is exchanged at the
//! Google token endpoint for a short-lived bearer token scoped to Datastore.
//! The token is requested once per commit, and a run commits once.
//!
//! # Value encoding
//!
//! JSON values map onto Firestore's typed values:
//!
//! | JSON | Firestore |
//! |------|-----------|
//! | `null` | `nullValue` |
//! | bool | `booleanValue` |
//! | integer | `integerValue` (decimal string) |
//! | other number | `doubleValue` |
//! | string | `stringValue` |
//! | array | `arrayValue` |
//! | object | `mapValue` |
//!
//! `cachedAt` is sent as a `timestampValue`.

use super::{CACHED_AT_FIELD, Document, DocumentStore, StagedWrite, WriteBatch};
use crate::errors::StoreError;
use crate::http::USER_AGENT;
use crate::utils::truncate_for_log;
use chrono::{SecondsFormat, Utc};
use jsonwebtoken::{Algorithm, EncodingKey, Header};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument};

/// Firestore REST API root.
pub const FIRESTORE_API: &str = "https://firestore.googleapis.com/v1";
/// OAuth token endpoint, also the JWT audience.
pub const TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
const DATASTORE_SCOPE: &str = "https://www.googleapis.com/auth/datastore";
const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
const TOKEN_LIFETIME_SECS: i64 = 3600;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Service-account identity read from the environment.
#[derive(Clone)]
pub struct ServiceAccount {
    /// Firebase project the documents belong to.
    pub project_id: String,
    /// Account email, used as the JWT issuer.
    pub client_email: String,
    /// PKCS#8 RSA key in PEM form, with real newlines.
    pub private_key: String,
}

impl ServiceAccount {
    /// Build an account, turning literal `\n` sequences in the key into newlines.
    pub fn new(
        project_id: impl Into<String>,
        client_email: impl Into<String>,
        private_key: &str,
    ) -> Self {
        Self {
            project_id: project_id.into(),
            client_email: client_email.into(),
            private_key: private_key.replace("\\n", "\n"),
        }
    }
}

impl fmt::Debug for ServiceAccount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceAccount")
            .field("project_id", &self.project_id)
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

#[derive(Debug, Serialize)]
struct Claims<'a> {
    iss: &'a str,
    scope: &'a str,
    aud: &'a str,
    iat: i64,
    exp: i64,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
}

/// Client handle for one Firestore database, built once per process.
pub struct FirestoreStore {
    client: Client,
    account: ServiceAccount,
    key: EncodingKey,
}

impl fmt::Debug for FirestoreStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FirestoreStore")
            .field("account", &self.account)
            .finish()
    }
}

impl FirestoreStore {
    /// Build the client, failing early if the private key is not a usable RSA PEM.
    ///
    /// # Errors
    ///
    /// `StoreError::Credentials` for an unparseable key, `StoreError::Http`
    /// if the HTTP client cannot be built.
    pub fn new(account: ServiceAccount) -> Result<Self, StoreError> {
        let key = EncodingKey::from_rsa_pem(account.private_key.as_bytes())
            .map_err(|e| StoreError::Credentials(format!("private key: {e}")))?;
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .timeout(REQUEST_TIMEOUT)
            .build()?;
        Ok(Self {
            client,
            account,
            key,
        })
    }

    fn database(&self) -> String {
        database_name(&self.account.project_id)
    }

    #[instrument(level = "debug", skip(self), fields(client_email = %self.account.client_email))]
    async fn access_token(&self) -> Result<String, StoreError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            iss: &self.account.client_email,
            scope: DATASTORE_SCOPE,
            aud: TOKEN_URI,
            iat: now,
            exp: now + TOKEN_LIFETIME_SECS,
        };
        let assertion = jsonwebtoken::encode(&Header::new(Algorithm::RS256), &claims, &self.key)
            .map_err(|e| StoreError::Token(e.to_string()))?;

        let response = self
            .client
            .post(TOKEN_URI)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion.as_str())])
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::Token(format!(
                "{status}: {}",
                truncate_for_log(&body, 300)
            )));
        }
        let token: TokenResponse = response.json().await?;
        debug!("Obtained access token");
        Ok(token.access_token)
    }
}

impl DocumentStore for FirestoreStore {
    fn backend_tag(&self) -> &'static str {
        "firestore"
    }

    #[instrument(level = "info", skip_all, fields(project = %self.account.project_id, staged = batch.len()))]
    async fn commit(&self, batch: WriteBatch) -> Result<(), StoreError> {
        let t0 = Instant::now();
        let writes = batch.into_latest_writes();
        let body = commit_body(&self.database(), &writes);
        let token = self.access_token().await?;

        let response = self
            .client
            .post(commit_url(&self.database()))
            .bearer_auth(token)
            .json(&body)
            .send()
            .await?;
        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(%status, body_preview = %truncate_for_log(&text, 300), "Firestore commit failed");
            return Err(StoreError::Commit(format!("{status}: {}", truncate_for_log(&text, 300))));
        }

        info!(
            documents = writes.len(),
            elapsed_ms = t0.elapsed().as_millis() as u128,
            "Committed batch to Firestore"
        );
        Ok(())
    }
}

/// Resource name of the default database of `project_id`.
pub fn database_name(project_id: &str) -> String {
    format!("projects/{project_id}/databases/(default)")
}

/// Endpoint that commits a batch of writes to `database`.
///
/// # Arguments
///
/// * `database` - Database resource name from [`database_name`]
pub fn commit_url(database: &str) -> String {
    format!("{FIRESTORE_API}/{database}/documents:commit")
}

/// Request body for `documents:commit`.
pub fn commit_body(database: &str, writes: &[StagedWrite]) -> Value {
    let writes: Vec<Value> = writes
        .iter()
        .map(|w| {
            json!({
                "update": {
                    "name": format!("{database}/documents/{}", w.path),
                    "fields": encode_document(&w.document),
                }
            })
        })
        .collect();
    json!({ "writes": writes })
}

/// Firestore `fields` map for a document, `cachedAt` included.
pub fn encode_document(document: &Document) -> Map<String, Value> {
    let mut fields = encode_fields(&document.fields);
    fields.insert(
        CACHED_AT_FIELD.to_string(),
        json!({ "timestampValue": document.cached_at.to_rfc3339_opts(SecondsFormat::Micros, true) }),
    );
    fields
}

fn encode_fields(fields: &Map<String, Value>) -> Map<String, Value> {
    fields
        .iter()
        .map(|(k, v)| (k.clone(), encode_value(v)))
        .collect()
}

/// Typed Firestore value for a JSON value.
pub fn encode_value(value: &Value) -> Value {
    match value {
        Value::Null => json!({ "nullValue": null }),
        Value::Bool(b) => json!({ "booleanValue": b }),
        Value::Number(n) => match n.as_i64() {
            Some(i) => json!({ "integerValue": i.to_string() }),
            None => json!({ "doubleValue": n.as_f64() }),
        },
        Value::String(s) => json!({ "stringValue": s }),
        Value::Array(items) => {
            let values: Vec<Value> = items.iter().map(encode_value).collect();
            json!({ "arrayValue": { "values": values } })
        }
        Value::Object(map) => json!({ "mapValue": { "fields": encode_fields(map) } }),
    }
}
