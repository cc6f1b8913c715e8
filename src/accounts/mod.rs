pub mod events;

pub use events::{AccountEvent, AccountEventHandler};
