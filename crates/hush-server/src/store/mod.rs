pub mod db;
pub mod model;

pub use db::{InsertResult, RevealResult, Store};
pub use model::{ExpiryUnit, NewShare, RevealedSecret, SecretShare, ShareDuration, ShareRecord};
