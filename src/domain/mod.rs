pub mod audit;
pub mod error;
pub mod hooks;
pub mod id;
pub mod money;
pub mod notification;
pub mod order;
pub mod payment;
pub mod repository;
