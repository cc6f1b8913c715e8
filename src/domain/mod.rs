//! Core data model (spec §3). Row structs derive `serde::{Serialize,
//! Deserialize}` for the HTTP surface and are hand-mapped to/from
//! `rusqlite::Row` in each repository module, following the teacher's
//! `row_to_signal` convention (`signals/db_storage.rs`).

mod gtt;
mod ledger;
mod order;
mod position;
mod subscription;
mod tier;
mod trade;

pub use gtt::*;
pub use ledger::*;
pub use order::*;
pub use position::*;
pub use subscription::*;
pub use tier::*;
pub use trade::*;
