//! Helper `with_timeout`
//!
//! Acota la latencia de una operación asíncrona y convierte el vencimiento en
//! `AppError::Timeout`.

use std::future::Future;
use std::time::Duration;

use super::errors::{AppError, AppResult};

pub async fn with_timeout<T, F>(limit: Duration, future: F) -> AppResult<T>
where
    F: Future<Output = AppResult<T>>,
{
    match tokio::time::timeout(limit, future).await {
        Ok(result) => result,
        Err(_) => Err(AppError::Timeout(limit)),
    }
}
