pub mod clock;
pub mod dividend;
pub mod exchange;
pub mod forecast;
pub mod ledger;
pub mod listing;
pub mod locks;
pub mod registry;
pub mod wallet;

pub use exchange::Exchange;
