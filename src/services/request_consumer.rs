use std::sync::Arc;
use std::time::Duration;

use log::{error, info, warn};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tokio::task::JoinHandle;

use crate::config::ServiceConfig;
use crate::error::{ExchangeError, Result};
use crate::services::redis_manager::{RedisManager, StreamMessage};
use crate::store::Exchange;
use crate::types::forecast_types::{ForecastMarket, ForecastPosition, ForecastSide};
use crate::types::request_types::*;
use crate::types::stream_types::{StreamRequest, StreamResponse};

const READ_BATCH: u64 = 10;

#[derive(Debug, Serialize)]
struct ForecastView {
    market: ForecastMarket,
    positions: Vec<ForecastPosition>,
    implied_odds_over: Option<f64>,
    implied_odds_under: Option<f64>,
}

pub fn start_request_consumer(exchange: Arc<Exchange>, config: ServiceConfig) -> Option<JoinHandle<()>> {
    let redis_manager = match RedisManager::global() {
        Some(rm) => rm,
        None => {
            error!("Redis manager not initialized, cannot start request consumer");
            return None;
        }
    };

    Some(tokio::spawn(async move {
        info!("Starting request consumer for stream: {}", config.request_stream);
        let mut last_id = "0".to_string();

        loop {
            match redis_manager
                .read_stream(&config.request_stream, &mut last_id, READ_BATCH)
                .await
            {
                Ok(messages) => {
                    for message in messages {
                        if let Err(e) = process_message(&exchange, &config, message).await {
                            error!("Error processing message: {}", e);
                        }
                    }
                }
                Err(e) => {
                    error!("Error reading from stream {}: {}", config.request_stream, e);
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
            tokio::time::sleep(config.poll_interval).await;
        }
    }))
}

async fn process_message(
    exchange: &Exchange,
    config: &ServiceConfig,
    message: StreamMessage,
) -> std::result::Result<(), String> {
    let request_id = message
        .fields
        .get("request_id")
        .cloned()
        .ok_or_else(|| format!("Missing request_id in message {}", message.id))?;
    let data = message
        .fields
        .get("data")
        .ok_or_else(|| format!("Missing data in message {}", message.id))?;

    let response = match serde_json::from_str::<StreamRequest<Value>>(data) {
        Ok(request) => {
            info!(
                "Processing request: action={}, request_id={}",
                request.action, request_id
            );
            dispatch(exchange, &request.action, request.data).await
        }
        Err(e) => {
            warn!("Malformed request {}: {}", request_id, e);
            StreamResponse::from_error(
                &ExchangeError::InvalidRequest(format!("Failed to parse request: {}", e)),
                Value::Null,
            )
        }
    };

    send_response(&config.response_stream, &request_id, &response).await
}

fn parse<T: DeserializeOwned>(data: Value) -> Result<T> {
    serde_json::from_value(data)
        .map_err(|e| ExchangeError::InvalidRequest(format!("Invalid request data: {}", e)))
}

fn respond<T: Serialize>(result: Result<T>, message: &str) -> StreamResponse<Value> {
    let result = result.and_then(|value| {
        serde_json::to_value(value)
            .map_err(|e| ExchangeError::InvalidRequest(format!("Failed to serialize result: {}", e)))
    });
    match result {
        Ok(data) => StreamResponse::new(200, true, message, data),
        Err(e) => {
            if matches!(e, ExchangeError::IntegrityViolation { .. }) {
                error!("{}", e);
            }
            StreamResponse::from_error(&e, Value::Null)
        }
    }
}

/// Routes one action to the exchange and shapes the result as a stream response.
pub async fn dispatch(exchange: &Exchange, action: &str, data: Value) -> StreamResponse<Value> {
    match action {
        "open-book" => respond(
            parse::<OpenBookRequest>(data).and_then(|req| exchange.open_book(&req)),
            "Book opened successfully",
        ),
        "deposit" => respond(
            async { exchange.deposit(&parse::<DepositRequest>(data)?).await }.await,
            "Deposit recorded successfully",
        ),
        "withdraw" => respond(
            async { exchange.withdraw(&parse::<WithdrawRequest>(data)?).await }.await,
            "Withdrawal recorded successfully",
        ),
        "get-wallet" => respond(
            parse::<GetWalletRequest>(data).map(|req| exchange.wallet(req.owner_id)),
            "Wallet retrieved successfully",
        ),
        "get-book" => respond(
            parse::<GetBookRequest>(data).and_then(|req| exchange.snapshot(req.content_id)),
            "Book retrieved successfully",
        ),
        "get-holding" => respond(
            parse::<GetHoldingRequest>(data)
                .and_then(|req| exchange.holding(req.owner_id, req.content_id)),
            "Holding retrieved successfully",
        ),
        "buy-shares" => respond(
            async { exchange.buy_shares(&parse::<BuySharesRequest>(data)?).await }.await,
            "Shares purchased successfully",
        ),
        "sell-to-book" => respond(
            async { exchange.sell_to_book(&parse::<SellToBookRequest>(data)?).await }.await,
            "Shares sold successfully",
        ),
        "create-listing" => respond(
            async { exchange.create_listing(&parse::<CreateListingRequest>(data)?).await }.await,
            "Listing created successfully",
        ),
        "fulfill-listing" => respond(
            async { exchange.fulfill_listing(&parse::<FulfillListingRequest>(data)?).await }.await,
            "Listing filled successfully",
        ),
        "cancel-listing" => respond(
            async { exchange.cancel_listing(&parse::<CancelListingRequest>(data)?).await }.await,
            "Listing cancelled successfully",
        ),
        "get-listing" => respond(
            async { exchange.listing(parse::<GetListingRequest>(data)?.listing_id).await }.await,
            "Listing retrieved successfully",
        ),
        "create-offer" => respond(
            async { exchange.create_offer(&parse::<CreateOfferRequest>(data)?).await }.await,
            "Offer created successfully",
        ),
        "accept-offer" => respond(
            async { exchange.accept_offer(&parse::<AcceptOfferRequest>(data)?).await }.await,
            "Offer accepted successfully",
        ),
        "reject-offer" => respond(
            async { exchange.reject_offer(&parse::<RejectOfferRequest>(data)?).await }.await,
            "Offer rejected successfully",
        ),
        "withdraw-offer" => respond(
            async { exchange.withdraw_offer(&parse::<WithdrawOfferRequest>(data)?).await }.await,
            "Offer withdrawn successfully",
        ),
        "get-offer" => respond(
            async { exchange.offer(parse::<GetOfferRequest>(data)?.offer_id).await }.await,
            "Offer retrieved successfully",
        ),
        "accrue-dividend" => respond(
            async { exchange.accrue_dividend(&parse::<AccrueDividendRequest>(data)?).await }.await,
            "Dividend accrued successfully",
        ),
        "distribute-dividend" => respond(
            async {
                exchange
                    .distribute_dividend(&parse::<DistributeDividendRequest>(data)?)
                    .await
            }
            .await,
            "Dividend distributed successfully",
        ),
        "create-forecast" => respond(
            parse::<CreateForecastRequest>(data).and_then(|req| exchange.create_forecast(&req)),
            "Forecast market created successfully",
        ),
        "place-forecast" => respond(
            async { exchange.place_forecast(&parse::<PlacePositionRequest>(data)?).await }.await,
            "Forecast position placed successfully",
        ),
        "resolve-forecast" => respond(
            async { exchange.resolve_forecast(&parse::<ResolveForecastRequest>(data)?).await }.await,
            "Forecast market resolved successfully",
        ),
        "cancel-forecast" => respond(
            async { exchange.cancel_forecast(&parse::<CancelForecastRequest>(data)?).await }.await,
            "Forecast market cancelled successfully",
        ),
        "get-forecast" => respond(
            async {
                let market_id = parse::<GetForecastRequest>(data)?.market_id;
                let market = exchange.forecast(market_id).await?;
                Ok::<_, ExchangeError>(ForecastView {
                    implied_odds_over: market.implied_odds(ForecastSide::Over),
                    implied_odds_under: market.implied_odds(ForecastSide::Under),
                    positions: exchange.forecast_positions(market_id)?,
                    market,
                })
            }
            .await,
            "Forecast market retrieved successfully",
        ),
        "list-forecasts" => respond(Ok(exchange.forecasts()), "Forecast markets retrieved successfully"),
        "sweep-expired" => respond(Ok(exchange.sweep_expired().await), "Sweep completed"),
        "audit" => respond(Ok(exchange.audit()), "Audit completed"),
        "resume-content" => respond(
            async { exchange.resume_content(parse::<ResumeContentRequest>(data)?.content_id).await }
                .await,
            "Content resumed successfully",
        ),
        _ => {
            warn!("Unknown action: {}", action);
            StreamResponse::new(400, false, format!("Unknown action: {}", action), Value::Null)
        }
    }
}

async fn send_response(
    stream: &str,
    request_id: &str,
    response: &StreamResponse<Value>,
) -> std::result::Result<(), String> {
    let redis_manager =
        RedisManager::global().ok_or_else(|| "Redis manager not initialized".to_string())?;

    let response_json = serde_json::to_string(response)
        .map_err(|e| format!("Failed to serialize response: {}", e))?;

    redis_manager
        .stream_add(stream, &[("request_id", request_id), ("data", &response_json)])
        .await
        .map_err(|e| format!("Failed to send response to stream: {}", e))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ExchangeConfig;
    use serde_json::json;

    #[tokio::test]
    async fn purchase_round_trip_through_dispatch() {
        let exchange = Exchange::new(ExchangeConfig::default());
        let opened = dispatch(
            &exchange,
            "open-book",
            json!({"content_id": 1, "issuer_id": 9, "total_shares": 100, "reference_price": 3}),
        )
        .await;
        assert!(opened.success, "{}", opened.message);

        dispatch(
            &exchange,
            "deposit",
            json!({"owner_id": 2, "currency": "keys", "amount": 30, "reference_id": "d-1"}),
        )
        .await;
        let bought = dispatch(
            &exchange,
            "buy-shares",
            json!({"content_id": 1, "buyer_id": 2, "quantity": 4, "reference_id": "b-1"}),
        )
        .await;

        assert_eq!(bought.status_code, 200);
        assert_eq!(bought.data["total_price"], 12);
        assert_eq!(bought.data["available_shares"], 96);
    }

    #[tokio::test]
    async fn errors_carry_kind_and_status() {
        let exchange = Exchange::new(ExchangeConfig::default());

        let missing = dispatch(&exchange, "get-book", json!({"content_id": 77})).await;
        assert_eq!(missing.status_code, 404);
        assert_eq!(missing.error_kind.as_deref(), Some("not_found"));

        let malformed = dispatch(&exchange, "deposit", json!({"owner_id": "x"})).await;
        assert_eq!(malformed.status_code, 400);
        assert!(!malformed.retryable);

        let unknown = dispatch(&exchange, "mint-money", Value::Null).await;
        assert!(!unknown.success);
    }

    #[test]
    fn envelope_parses_without_message() {
        let request: StreamRequest<Value> =
            serde_json::from_str(r#"{"service":"api","action":"audit","data":null}"#).unwrap();
        assert_eq!(request.action, "audit");

        let built = StreamRequest::new("api", "audit", "", Value::Null);
        assert_eq!(built.service, "api");
    }
}
