//! HTTP routes under `/api/currencies`.

use std::str::FromStr;
use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError, web};
use log::error;
use rust_decimal::Decimal;
use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};

use crate::cache::Snapshot;
use crate::error::CurrencyError;
use crate::exchange_rate::UserId;
use crate::service::CurrencyService;

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl ResponseError for CurrencyError {
    fn status_code(&self) -> StatusCode {
        match self {
            CurrencyError::NotFound(_) => StatusCode::NOT_FOUND,
            CurrencyError::AlreadyExists(_) => StatusCode::CONFLICT,
            CurrencyError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
            CurrencyError::SystemIdentityMissing(_) | CurrencyError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    fn error_response(&self) -> HttpResponse {
        let status = self.status_code();
        if status.is_server_error() {
            error!("Request failed: {}", self);
        }
        HttpResponse::build(status).json(ErrorBody {
            error: self.to_string(),
        })
    }
}

/// A rate written as a JSON number with its exact decimal digits.
#[derive(Debug, Serialize)]
#[serde(transparent)]
struct JsonRate(
    #[serde(serialize_with = "rust_decimal::serde::arbitrary_precision::serialize")] Decimal,
);

/// Code-to-rate mapping with every rate written as a [`JsonRate`].
struct JsonRates(Snapshot);

impl Serialize for JsonRates {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.0.len()))?;
        for (code, rate) in &self.0 {
            map.serialize_entry(code, &JsonRate(*rate))?;
        }
        map.end()
    }
}

#[derive(Debug, Deserialize)]
pub struct AddCurrencyParams {
    code: String,
    rate: String,
    #[serde(rename = "userId")]
    user_id: UserId,
}

async fn get_all_currencies(
    service: web::Data<CurrencyService>,
) -> Result<HttpResponse, CurrencyError> {
    let rates = service.get_exchange_rates().await?;
    Ok(HttpResponse::Ok().json(JsonRates(rates)))
}

async fn get_exchange_rate(
    service: web::Data<CurrencyService>,
    code: web::Path<String>,
) -> Result<HttpResponse, CurrencyError> {
    let rate = service.get_exchange_rate(&code).await?;
    Ok(HttpResponse::Ok().json(JsonRate(rate)))
}

async fn add_currency(
    service: web::Data<CurrencyService>,
    params: web::Query<AddCurrencyParams>,
) -> Result<HttpResponse, CurrencyError> {
    let rate = match Decimal::from_str(params.rate.trim()) {
        Ok(rate) => rate,
        Err(err) => {
            return Ok(HttpResponse::BadRequest().json(ErrorBody {
                error: format!("Invalid rate {}: {}", params.rate, err),
            }));
        }
    };

    // Caller-supplied identity is trusted as-is.
    service
        .add_currency(&params.code, rate, params.user_id)
        .await?;
    Ok(HttpResponse::Ok().finish())
}

/// Registers the currency routes; expects `web::Data<CurrencyService>` in app data.
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/currencies")
            .route("", web::get().to(get_all_currencies))
            .route("", web::post().to(add_currency))
            .route("/{code}", web::get().to(get_exchange_rate)),
    );
}

pub fn app_data(service: Arc<CurrencyService>) -> web::Data<CurrencyService> {
    web::Data::from(service)
}
