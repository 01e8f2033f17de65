//! Shared record model, wire format and snapshot codec for `MoneyBook`.

pub mod codec;
pub mod flat;
pub mod ledger;
pub mod record;
pub mod task;
