//! Panel Economy - coin economy in front of a Pterodactyl panel
//!
//! Users earn and spend coins; coins and card payments turn into server
//! resources. Every change that can shrink a user's envelope is followed
//! by suspension reconciliation against the panel.
//!
//! ## Engines
//!
//! - **Ledger**: per-user integer coin balances
//! - **Entitlement**: package + purchased extras + boosts vs. actual usage
//! - **Boosts**: time-limited resource multipliers on one server
//! - **Staking**: lock coins for daily rewards
//! - **Daily rewards**: streaks, multipliers, milestones, protection
//! - **Billing**: USD credit via checkout, spent on coins and bundles
//! - **Referrals**: one-shot codes paying both sides

pub mod auth;
pub mod catalog;
pub mod clock;
pub mod config;
pub mod models;
pub mod panel;
pub mod payments;
pub mod routes;
pub mod server;
pub mod services;
pub mod store;
pub mod types;

pub use config::Args;
pub use server::{run, AppState};
pub use services::{Economy, EconomyDeps};
pub use types::{EconomyError, Result};
