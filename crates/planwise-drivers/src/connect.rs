//! Opening a connection from a database URL

use crate::mysql::MySqlConnection;
use crate::postgres::PostgresConnection;
use planwise_core::{Connection, EngineKind, PlanwiseError, Result};
use std::sync::Arc;

/// Works out the engine from a URL scheme
pub fn engine_for_url(url: &str) -> Result<EngineKind> {
    let scheme = url
        .split_once("://")
        .map(|(scheme, _)| scheme.to_ascii_lowercase())
        .ok_or_else(|| {
            PlanwiseError::Configuration(format!("'{}' is not a database URL", redact(url)))
        })?;
    match scheme.as_str() {
        "postgres" | "postgresql" => Ok(EngineKind::Postgresql),
        "mysql" => Ok(EngineKind::Mysql),
        other => Err(PlanwiseError::Configuration(format!(
            "unsupported URL scheme '{other}' (expected postgres:// or mysql://)"
        ))),
    }
}

/// Connects to the database a URL points at
pub async fn connect(url: &str) -> Result<Arc<dyn Connection>> {
    match engine_for_url(url)? {
        EngineKind::Postgresql => Ok(Arc::new(PostgresConnection::connect(url).await?)),
        EngineKind::Mysql => Ok(Arc::new(MySqlConnection::connect(url).await?)),
    }
}

/// Hides the password of a URL so it can be logged
pub fn redact(url: &str) -> String {
    let Some((scheme, rest)) = url.split_once("://") else {
        return url.to_string();
    };
    let Some((credentials, host)) = rest.rsplit_once('@') else {
        return url.to_string();
    };
    match credentials.split_once(':') {
        Some((user, _)) => format!("{scheme}://{user}:***@{host}"),
        None => url.to_string(),
    }
}
