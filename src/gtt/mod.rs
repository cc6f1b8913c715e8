//! Good-Till-Triggered order engine (spec §3 `GttOrder`, §6 `/gtt` routes).

mod engine;
mod repo;

pub use engine::{GttEngine, PlaceGttRequest};
pub use repo::GttRepo;
