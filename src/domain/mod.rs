//! Domain layer: entities, value objects and the ports the application depends on.

pub mod commission;
pub mod connected_account;
pub mod event;
pub mod gateway;
pub mod integration;
pub mod ledger;
pub mod money;
pub mod payment;
pub mod ports;
pub mod signature;
