use reqwest::Response;
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::libs::backend::backend_traits::BackendError;

/// A PostgREST read/delete query: `/rest/v1/<table>?<filters>`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestQuery {
    table: String,
    params: Vec<(String, String)>,
}

impl RestQuery {
    pub fn from(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            params: Vec::new(),
        }
    }

    pub fn select(self, columns: &str) -> Self {
        self.param("select", columns)
    }

    pub fn eq(self, column: &str, value: impl AsRef<str>) -> Self {
        self.param(column, format!("eq.{}", value.as_ref()))
    }

    pub fn neq(self, column: &str, value: impl AsRef<str>) -> Self {
        self.param(column, format!("neq.{}", value.as_ref()))
    }

    pub fn gt(self, column: &str, value: impl AsRef<str>) -> Self {
        self.param(column, format!("gt.{}", value.as_ref()))
    }

    /// `or=(and(a.eq.1,b.eq.2),and(...))`: any group matches when all of its
    /// equalities hold.
    pub fn or_all_eq(self, groups: &[&[(&str, &str)]]) -> Self {
        let groups = groups
            .iter()
            .map(|group| {
                let conditions = group
                    .iter()
                    .map(|(column, value)| format!("{}.eq.{}", column, value))
                    .collect::<Vec<_>>()
                    .join(",");
                format!("and({})", conditions)
            })
            .collect::<Vec<_>>()
            .join(",");
        self.param("or", format!("({})", groups))
    }

    /// Order terms such as `created_at.desc`.
    pub fn order(self, terms: &[&str]) -> Self {
        self.param("order", terms.join(","))
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    pub fn query_string(&self) -> String {
        self.params
            .iter()
            .map(|(key, value)| format!("{}={}", key, urlencoding::encode(value)))
            .collect::<Vec<_>>()
            .join("&")
    }

    fn param(mut self, key: &str, value: impl Into<String>) -> Self {
        self.params.push((key.to_string(), value.into()));
        self
    }
}

/// Error bodies from PostgREST (`message`) and GoTrue (`msg`, `error_code`, or
/// the older `error` / `error_description` pair).
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ApiErrorBody {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub msg: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_code: Option<String>,
    #[serde(default)]
    pub error_description: Option<String>,
}

impl ApiErrorBody {
    pub fn parse(body: &str) -> Self {
        serde_json::from_str(body).unwrap_or_default()
    }

    pub fn code(&self) -> Option<&str> {
        self.error_code.as_deref().or(self.error.as_deref())
    }

    pub fn text(&self) -> Option<&str> {
        self.message
            .as_deref()
            .or(self.msg.as_deref())
            .or(self.error_description.as_deref())
            .or(self.error.as_deref())
    }
}

pub(crate) fn api_error(status: u16, body: &str) -> BackendError {
    let parsed = ApiErrorBody::parse(body);
    let message = parsed
        .text()
        .map(str::to_string)
        .unwrap_or_else(|| body.trim().to_string());
    match status {
        401 => BackendError::NotAuthenticated,
        403 => BackendError::Forbidden(message),
        _ => BackendError::Api { status, message },
    }
}

/// Parse a JSON body or turn a non-success status into a [`BackendError`].
pub(crate) async fn handle_response<T: DeserializeOwned>(
    response: Response,
) -> Result<T, BackendError> {
    let status = response.status();
    if status.is_success() {
        Ok(response.json().await?)
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(api_error(status.as_u16(), &body))
    }
}

pub(crate) async fn expect_success(response: Response) -> Result<(), BackendError> {
    let status = response.status();
    if status.is_success() {
        Ok(())
    } else {
        let body = response.text().await.unwrap_or_default();
        Err(api_error(status.as_u16(), &body))
    }
}
