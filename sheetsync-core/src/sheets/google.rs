//! Google Sheets REST v4 backend.

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

use super::{SheetBackend, SheetProperties, SheetProvider, SpreadsheetMetadata};
use crate::error::SheetError;

const DEFAULT_BASE_URL: &str = "https://sheets.googleapis.com/v4/spreadsheets";

/// Fragment of the quota error message returned by the Sheets API.
const QUOTA_MESSAGE: &str = "limit of 10000000 cells";

#[derive(Deserialize)]
struct MetadataResponse {
    #[serde(default)]
    sheets: Vec<SheetEntry>,
}

#[derive(Deserialize)]
struct SheetEntry {
    properties: SheetPropertiesResponse,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SheetPropertiesResponse {
    sheet_id: i64,
    title: String,
    #[serde(default)]
    grid_properties: GridProperties,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct GridProperties {
    #[serde(default)]
    row_count: u32,
    #[serde(default)]
    column_count: u32,
}

#[derive(Deserialize)]
struct ValueRangeResponse {
    #[serde(default)]
    values: Vec<Vec<serde_json::Value>>,
}

/// A1 reference including the sheet name, e.g. `'wb_price'!A1:C10`.
fn qualified_range(sheet: &str, range: &str) -> String {
    let quoted = format!("'{}'", sheet.replace('\'', "''"));
    if range.is_empty() {
        quoted
    } else {
        format!("{}!{}", quoted, range)
    }
}

/// Maps an HTTP failure onto the backend error taxonomy.
fn classify_failure(status: StatusCode, body: &str) -> SheetError {
    if body.contains(QUOTA_MESSAGE) {
        return SheetError::QuotaExceeded(body.to_string());
    }
    match status {
        StatusCode::NOT_FOUND => SheetError::NotFound(body.to_string()),
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
            SheetError::Unavailable(format!("{}: {}", status, body))
        }
        s if s.is_server_error() => SheetError::Unavailable(format!("{}: {}", status, body)),
        s => SheetError::Rejected(format!("{}: {}", s, body)),
    }
}

fn cell_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

pub struct GoogleSheetsBackend {
    client: reqwest::Client,
    base_url: String,
    spreadsheet_id: String,
    access_token: String,
}

impl GoogleSheetsBackend {
    pub fn new(spreadsheet_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self::with_client(
            reqwest::Client::new(),
            DEFAULT_BASE_URL,
            spreadsheet_id,
            access_token,
        )
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        spreadsheet_id: impl Into<String>,
        access_token: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            spreadsheet_id: spreadsheet_id.into(),
            access_token: access_token.into(),
        }
    }

    fn document_url(&self) -> String {
        format!("{}/{}", self.base_url, self.spreadsheet_id)
    }

    fn values_url(&self, sheet: &str, range: &str) -> String {
        format!(
            "{}/values/{}",
            self.document_url(),
            urlencoding::encode(&qualified_range(sheet, range))
        )
    }

    async fn send(
        &self,
        method: Method,
        url: &str,
        body: Option<serde_json::Value>,
    ) -> Result<reqwest::Response, SheetError> {
        debug!(%method, url, "sheets request");
        let mut request = self
            .client
            .request(method, url)
            .header("Authorization", format!("Bearer {}", self.access_token));
        if let Some(body) = body {
            request = request.json(&body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SheetError::Unavailable(e.to_string()))?;

        if response.status().is_success() {
            return Ok(response);
        }

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        Err(classify_failure(status, &text))
    }

    async fn batch_update(&self, request: serde_json::Value) -> Result<(), SheetError> {
        let url = format!("{}:batchUpdate", self.document_url());
        self.send(Method::POST, &url, Some(json!({ "requests": [request] })))
            .await?;
        Ok(())
    }

    async fn fetch_sheets(&self) -> Result<Vec<SheetPropertiesResponse>, SheetError> {
        let url = format!("{}?fields=sheets.properties", self.document_url());
        let response = self.send(Method::GET, &url, None).await?;
        let metadata: MetadataResponse = response
            .json()
            .await
            .map_err(|e| SheetError::InvalidResponse(e.to_string()))?;
        Ok(metadata.sheets.into_iter().map(|s| s.properties).collect())
    }

    async fn sheet_id(&self, sheet: &str) -> Result<i64, SheetError> {
        self.fetch_sheets()
            .await?
            .into_iter()
            .find(|p| p.title == sheet)
            .map(|p| p.sheet_id)
            .ok_or_else(|| SheetError::NotFound(sheet.to_string()))
    }
}

#[async_trait]
impl SheetBackend for GoogleSheetsBackend {
    fn spreadsheet_id(&self) -> &str {
        &self.spreadsheet_id
    }

    async fn sheet_exists(&self, sheet: &str) -> Result<bool, SheetError> {
        Ok(self.fetch_sheets().await?.iter().any(|p| p.title == sheet))
    }

    async fn create_sheet(&self, sheet: &str) -> Result<(), SheetError> {
        self.batch_update(json!({ "addSheet": { "properties": { "title": sheet } } }))
            .await
    }

    async fn delete_sheet(&self, sheet: &str) -> Result<(), SheetError> {
        let sheet_id = self.sheet_id(sheet).await?;
        self.batch_update(json!({ "deleteSheet": { "sheetId": sheet_id } }))
            .await
    }

    async fn resize_sheet(&self, sheet: &str, rows: u32, cols: u32) -> Result<(), SheetError> {
        let sheet_id = self.sheet_id(sheet).await?;
        self.batch_update(json!({
            "updateSheetProperties": {
                "properties": {
                    "sheetId": sheet_id,
                    "gridProperties": { "rowCount": rows, "columnCount": cols }
                },
                "fields": "gridProperties(rowCount,columnCount)"
            }
        }))
        .await
    }

    async fn get_range(&self, sheet: &str, range: &str) -> Result<Vec<Vec<String>>, SheetError> {
        let url = self.values_url(sheet, range);
        let response = self.send(Method::GET, &url, None).await?;
        let body: ValueRangeResponse = response
            .json()
            .await
            .map_err(|e| SheetError::InvalidResponse(e.to_string()))?;
        Ok(body
            .values
            .iter()
            .map(|row| row.iter().map(cell_text).collect())
            .collect())
    }

    async fn update_range(
        &self,
        sheet: &str,
        range: &str,
        values: &[Vec<String>],
    ) -> Result<(), SheetError> {
        let url = format!("{}?valueInputOption=RAW", self.values_url(sheet, range));
        let body = json!({
            "range": qualified_range(sheet, range),
            "majorDimension": "ROWS",
            "values": values,
        });
        self.send(Method::PUT, &url, Some(body)).await?;
        Ok(())
    }

    async fn clear_range(&self, sheet: &str, range: &str) -> Result<(), SheetError> {
        let url = format!("{}:clear", self.values_url(sheet, range));
        self.send(Method::POST, &url, Some(json!({}))).await?;
        Ok(())
    }

    async fn get_sheet_metadata(&self) -> Result<SpreadsheetMetadata, SheetError> {
        let sheets = self
            .fetch_sheets()
            .await?
            .into_iter()
            .map(|p| SheetProperties {
                name: p.title,
                row_count: p.grid_properties.row_count,
                col_count: p.grid_properties.column_count,
            })
            .collect();
        Ok(SpreadsheetMetadata {
            spreadsheet_id: self.spreadsheet_id.clone(),
            sheets,
        })
    }
}

/// Opens [`GoogleSheetsBackend`]s sharing one HTTP client and token.
#[derive(Clone)]
pub struct GoogleSheetsProvider {
    client: reqwest::Client,
    base_url: String,
    access_token: String,
}

impl GoogleSheetsProvider {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: DEFAULT_BASE_URL.to_string(),
            access_token: access_token.into(),
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

#[async_trait]
impl SheetProvider for GoogleSheetsProvider {
    async fn open(&self, spreadsheet_id: &str) -> Result<Arc<dyn SheetBackend>, SheetError> {
        Ok(Arc::new(GoogleSheetsBackend::with_client(
            self.client.clone(),
            self.base_url.clone(),
            spreadsheet_id,
            self.access_token.clone(),
        )))
    }
}
