use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, info};

use super::{Record, Sink};
use crate::config::{Credentials, WarehouseSettings};

const BIGQUERY_SCOPE: &str = "https://www.googleapis.com/auth/bigquery";

/// One warehouse column. Every column is NULLABLE.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSchema {
    pub name: &'static str,
    pub field_type: &'static str,
}

const fn field(name: &'static str, field_type: &'static str) -> FieldSchema {
    FieldSchema { name, field_type }
}

/// Daily per-region counts
pub const COUNT_SUMMARY_SCHEMA: &[FieldSchema] = &[
    field("ObservationDate", "DATETIME"),
    field("Arrondissement", "STRING"),
    field("PropertiesCount", "INTEGER"),
];

/// Per-region counts for a given stay
pub const DATED_COUNT_SCHEMA: &[FieldSchema] = &[
    field("ObservationDate", "DATETIME"),
    field("Arrondissement", "STRING"),
    field("CheckinDate", "DATETIME"),
    field("PropertiesCount", "INTEGER"),
    field("CheckoutDate", "DATETIME"),
];

pub const LEGAL_SCHEMA: &[FieldSchema] = &[
    field("Url", "STRING"),
    field("BusinessName", "STRING"),
    field("Address", "STRING"),
    field("Email", "STRING"),
    field("Phone", "STRING"),
    field("RegistrationNumber", "STRING"),
    field("ScrapedAt", "DATETIME"),
    field("Error", "STRING"),
];

pub const ROOM_SCHEMA: &[FieldSchema] = &[
    field("HotelUrl", "STRING"),
    field("RoomName", "STRING"),
    field("Price", "STRING"),
    field("Cancellation", "STRING"),
    field("Status", "STRING"),
    field("CheckinDate", "DATETIME"),
    field("CheckoutDate", "DATETIME"),
    field("ScrapedAt", "DATETIME"),
    field("Error", "STRING"),
];

/// Destination table of a warehouse sink
#[derive(Debug, Clone)]
pub struct TableSpec {
    pub project_id: String,
    pub dataset_id: String,
    pub table_id: String,
    pub schema: &'static [FieldSchema],
}

impl TableSpec {
    fn schema_json(&self) -> Value {
        let fields: Vec<Value> = self
            .schema
            .iter()
            .map(|f| json!({ "name": f.name, "type": f.field_type, "mode": "NULLABLE" }))
            .collect();
        json!({ "fields": fields })
    }

    fn qualified_name(&self) -> String {
        format!("{}.{}.{}", self.project_id, self.dataset_id, self.table_id)
    }
}

/// Supplies OAuth bearer tokens for the warehouse API
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn token(&self) -> Result<String>;
}

/// A fixed token, used against local emulators and in tests
pub struct StaticToken(pub String);

#[async_trait]
impl TokenSource for StaticToken {
    async fn token(&self) -> Result<String> {
        Ok(self.0.clone())
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
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

/// Exchanges a signed service-account JWT for an access token and caches it
/// until shortly before it expires.
pub struct ServiceAccountTokens {
    client: Client,
    credentials: Credentials,
    token_url: String,
    cached: Mutex<Option<(String, Instant)>>,
}

impl ServiceAccountTokens {
    pub fn new(client: Client, credentials: Credentials, token_url: Option<String>) -> Self {
        let token_url = token_url.unwrap_or_else(|| credentials.token_uri.clone());
        Self {
            client,
            credentials,
            token_url,
            cached: Mutex::new(None),
        }
    }

    fn assertion(&self) -> Result<String> {
        let now = chrono::Utc::now().timestamp();
        let claims = Claims {
            iss: &self.credentials.client_email,
            scope: BIGQUERY_SCOPE,
            aud: &self.token_url,
            iat: now,
            exp: now + 3600,
        };
        let key = EncodingKey::from_rsa_pem(self.credentials.private_key.as_bytes())
            .context("private_key is not a PEM encoded RSA key")?;
        encode(&Header::new(Algorithm::RS256), &claims, &key).context("Failed to sign token request")
    }
}

#[async_trait]
impl TokenSource for ServiceAccountTokens {
    async fn token(&self) -> Result<String> {
        let mut cached = self.cached.lock().await;
        if let Some((token, valid_until)) = cached.as_ref() {
            if Instant::now() < *valid_until {
                return Ok(token.clone());
            }
        }

        let assertion = self.assertion()?;
        let response = self
            .client
            .post(&self.token_url)
            .form(&[
                ("grant_type", "urn:ietf:params:oauth:grant-type:jwt-bearer"),
                ("assertion", assertion.as_str()),
            ])
            .send()
            .await
            .context("Failed to reach token endpoint")?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            bail!("token endpoint answered {}: {}", status, body);
        }
        let token: TokenResponse = response.json().await.context("Invalid token response")?;

        let lifetime = Duration::from_secs(token.expires_in.saturating_sub(60));
        *cached = Some((token.access_token.clone(), Instant::now() + lifetime));
        debug!("🔑 Refreshed warehouse access token");
        Ok(token.access_token)
    }
}

/// Streams records into a BigQuery table over the REST API
pub struct WarehouseSink {
    client: Client,
    api_base_url: String,
    table: TableSpec,
    tokens: Arc<dyn TokenSource>,
}

impl WarehouseSink {
    pub fn new(
        client: Client,
        api_base_url: impl Into<String>,
        table: TableSpec,
        tokens: Arc<dyn TokenSource>,
    ) -> Self {
        Self {
            client,
            api_base_url: api_base_url.into().trim_end_matches('/').to_string(),
            table,
            tokens,
        }
    }

    /// Build a sink for `table_id` from settings and a service-account key.
    pub fn from_settings(
        settings: &WarehouseSettings,
        credentials: Credentials,
        table_id: &str,
        schema: &'static [FieldSchema],
    ) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build warehouse HTTP client")?;
        let table = TableSpec {
            project_id: settings
                .project_id
                .clone()
                .unwrap_or_else(|| credentials.project_id.clone()),
            dataset_id: settings.dataset_id.clone(),
            table_id: table_id.to_string(),
            schema,
        };
        let tokens = ServiceAccountTokens::new(client.clone(), credentials, settings.token_url.clone());
        Ok(Self::new(client, &settings.api_base_url, table, Arc::new(tokens)))
    }

    pub fn table(&self) -> &TableSpec {
        &self.table
    }

    fn dataset_url(&self) -> String {
        format!(
            "{}/projects/{}/datasets/{}",
            self.api_base_url, self.table.project_id, self.table.dataset_id
        )
    }

    fn tables_url(&self) -> String {
        format!("{}/tables", self.dataset_url())
    }

    fn table_url(&self) -> String {
        format!("{}/{}", self.tables_url(), self.table.table_id)
    }

    /// GET `url`; on 404 POST `body` to `create_url`. A 409 on create means
    /// someone else created it first.
    async fn ensure(&self, url: &str, create_url: &str, body: Value, what: &str) -> Result<()> {
        let token = self.tokens.token().await?;
        let response = self
            .client
            .get(url)
            .bearer_auth(&token)
            .send()
            .await
            .with_context(|| format!("Failed to look up {}", what))?;

        match response.status() {
            status if status.is_success() => return Ok(()),
            StatusCode::NOT_FOUND => {}
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!("looking up {} failed with {}: {}", what, status, body);
            }
        }

        info!("📊 Creating {}", what);
        let response = self
            .client
            .post(create_url)
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to create {}", what))?;
        match response.status() {
            status if status.is_success() => {
                info!("✅ Created {}", what);
                Ok(())
            }
            StatusCode::CONFLICT => Ok(()),
            status => {
                let body = response.text().await.unwrap_or_default();
                bail!("creating {} failed with {}: {}", what, status, body)
            }
        }
    }
}

#[async_trait]
impl<T: Record> Sink<T> for WarehouseSink {
    fn name(&self) -> &'static str {
        "warehouse"
    }

    async fn prepare(&self) -> Result<()> {
        let datasets_url = format!(
            "{}/projects/{}/datasets",
            self.api_base_url, self.table.project_id
        );
        let dataset = json!({
            "datasetReference": {
                "projectId": self.table.project_id,
                "datasetId": self.table.dataset_id,
            }
        });
        self.ensure(
            &self.dataset_url(),
            &datasets_url,
            dataset,
            &format!("dataset {}", self.table.dataset_id),
        )
        .await?;

        let table = json!({
            "tableReference": {
                "projectId": self.table.project_id,
                "datasetId": self.table.dataset_id,
                "tableId": self.table.table_id,
            },
            "schema": self.table.schema_json(),
        });
        self.ensure(
            &self.table_url(),
            &self.tables_url(),
            table,
            &format!("table {}", self.table.qualified_name()),
        )
        .await
    }

    async fn persist(&self, record: &T) -> Result<()> {
        let token = self.tokens.token().await?;
        let body = json!({
            "kind": "bigquery#tableDataInsertAllRequest",
            "rows": [{ "json": record.warehouse_row() }],
        });
        let response = self
            .client
            .post(format!("{}/insertAll", self.table_url()))
            .bearer_auth(&token)
            .json(&body)
            .send()
            .await
            .context("Failed to reach warehouse")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("insertAll answered {}: {}", status, body);
        }
        let reply: Value = response.json().await.context("Invalid insertAll response")?;
        if let Some(errors) = reply.get("insertErrors").filter(|e| !e.is_null()) {
            bail!("warehouse rejected row: {}", errors);
        }
        debug!("💾 Inserted {} into {}", record.describe(), self.table.qualified_name());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{CountObservation, ExtractionStatus};
    use chrono::{TimeZone, Utc};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn failed_room_rows_say_why() {
        use crate::models::{CancellationPolicy, RoomPolicy, RoomStatus};
        use chrono::NaiveDate;

        let policy = RoomPolicy {
            hotel_url: "https://www.booking.com/hotel/fr/b.html".to_string(),
            full_url: "https://www.booking.com/hotel/fr/b.html?checkin=2025-01-01".to_string(),
            room_types: vec!["Twin".to_string()],
            checkin: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            checkout: NaiveDate::from_ymd_opt(2025, 1, 2).unwrap(),
            room_name: None,
            price: None,
            cancellation: CancellationPolicy::NotAvailable,
            status: RoomStatus::StructureMismatch,
            scraped_at: Utc.with_ymd_and_hms(2025, 1, 1, 9, 0, 0).unwrap(),
            error: Some("page load timed out: room table".to_string()),
        };
        let row = policy.warehouse_row();
        assert_eq!(row["Error"], "page load timed out: room table");

        let columns: Vec<&str> = row.as_object().unwrap().keys().map(String::as_str).collect();
        for field in ROOM_SCHEMA {
            assert!(columns.contains(&field.name), "{} missing from row", field.name);
        }
        assert_eq!(columns.len(), ROOM_SCHEMA.len());
    }

    fn sink(server: &MockServer, schema: &'static [FieldSchema]) -> WarehouseSink {
        WarehouseSink::new(
            Client::new(),
            server.uri(),
            TableSpec {
                project_id: "scout".to_string(),
                dataset_id: "MarketData".to_string(),
                table_id: "ArrondissementSummary".to_string(),
                schema,
            },
            Arc::new(StaticToken("test-token".to_string())),
        )
    }

    fn observation() -> CountObservation {
        CountObservation {
            region_id: 3,
            checkin: None,
            checkout: None,
            observed_at: Utc.with_ymd_and_hms(2025, 5, 6, 7, 8, 9).unwrap(),
            properties_count: Some(57),
            extraction: ExtractionStatus::Matched {
                pattern: "properties-found".to_string(),
            },
            url: "https://www.booking.com/searchresults.html".to_string(),
            error: None,
        }
    }

    const TABLE_PATH: &str = "/projects/scout/datasets/MarketData/tables/ArrondissementSummary";

    #[tokio::test]
    async fn prepare_creates_missing_table() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/projects/scout/datasets/MarketData"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path(TABLE_PATH))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/projects/scout/datasets/MarketData/tables"))
            .and(header("authorization", "Bearer test-token"))
            .and(body_json(json!({
                "tableReference": {
                    "projectId": "scout",
                    "datasetId": "MarketData",
                    "tableId": "ArrondissementSummary",
                },
                "schema": { "fields": [
                    { "name": "ObservationDate", "type": "DATETIME", "mode": "NULLABLE" },
                    { "name": "Arrondissement", "type": "STRING", "mode": "NULLABLE" },
                    { "name": "PropertiesCount", "type": "INTEGER", "mode": "NULLABLE" },
                ]},
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .expect(1)
            .mount(&server)
            .await;

        Sink::<CountObservation>::prepare(&sink(&server, COUNT_SUMMARY_SCHEMA))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn persist_streams_one_row() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(format!("{}/insertAll", TABLE_PATH)))
            .and(body_json(json!({
                "kind": "bigquery#tableDataInsertAllRequest",
                "rows": [{ "json": {
                    "ObservationDate": "2025-05-06 07:08:09",
                    "Arrondissement": "3",
                    "PropertiesCount": 57,
                }}],
            })))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"kind": "bigquery#tableDataInsertAllResponse"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        sink(&server, COUNT_SUMMARY_SCHEMA)
            .persist(&observation())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn insert_errors_are_failures() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "insertErrors": [{ "index": 0, "errors": [{ "reason": "invalid" }] }]
            })))
            .mount(&server)
            .await;

        let err = sink(&server, COUNT_SUMMARY_SCHEMA)
            .persist(&observation())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("rejected row"));
    }

    #[test]
    fn dated_schema_keeps_column_order() {
        let names: Vec<_> = DATED_COUNT_SCHEMA.iter().map(|f| f.name).collect();
        assert_eq!(
            names,
            ["ObservationDate", "Arrondissement", "CheckinDate", "PropertiesCount", "CheckoutDate"]
        );
    }
}
