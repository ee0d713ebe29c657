pub mod bets;
pub mod kelly;
pub mod ledger;
pub mod simulation;
pub mod views;

pub use bets::{BetBook, BetSlip, Settlement};
