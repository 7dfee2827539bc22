//! Present box engine: campaign fan-out, paginated listing and transactional
//! batch claims over SQLite.

pub mod claimer;
pub mod clock;
pub mod config;
pub mod db;
pub mod distributor;
pub mod error;
pub mod grant;
pub mod lister;
pub mod model;
pub mod viewer;

pub use claimer::claim;
pub use distributor::{distribute, distribute_tx};
pub use error::{PresentError, Result};
pub use lister::list;
