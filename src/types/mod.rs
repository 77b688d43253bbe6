pub mod audit_types;
pub mod event_types;
pub mod forecast_types;
pub mod ledger_types;
pub mod listing_types;
pub mod request_types;
pub mod share_types;
pub mod stream_types;
pub mod wallet_types;
