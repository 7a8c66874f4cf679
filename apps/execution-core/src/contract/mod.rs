//! Derivative contract identifiers and expiry calendars.

mod calendar;
mod resolver;

pub use calendar::ExpiryCalendar;
pub use resolver::{
    ContractError, ContractResolver, ContractSpec, ExpiryKind, InstrumentKind,
    matches_weekly_expiry, monthly_expiry, resolve_contract,
};
