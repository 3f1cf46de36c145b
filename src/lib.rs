//! Conditional Access impact matrix for Microsoft Entra ID
//!
//! Fetches a tenant's Conditional Access policies and users from Microsoft
//! Graph, works out which policies target which users, and writes the result
//! as CSV and JSON.

pub mod cmd;
pub mod config;
pub mod error;
pub mod graph;
pub mod matrix;
pub mod report;
