//! Brigade Server
//!
//! Scoped, multi-source permission resolution and delegation engine for a
//! multi-tenant operational platform: shops, kitchens, drivers, suppliers and
//! supervisors share one authorization model.

pub mod api;
pub mod audit;
pub mod catalog;
pub mod checker;
pub mod conditions;
pub mod config;
pub mod db;
pub mod delegation;
pub mod directory;
pub mod hierarchy;
pub mod notify;
pub mod scope;
pub mod template;
pub mod wildcard;
