//! hn-core: shared foundation for heatnet.
//!
//! Contains:
//! - units (fixed-point temperature and percent types, displayed through uom)
//! - numeric (finite checks and the position deadband)
//! - ids (arena slots and generation-checked handles)
//! - clock (scheduler cycle ticks)
//! - error (shared error types)

pub mod clock;
pub mod error;
pub mod ids;
pub mod numeric;
pub mod units;

pub use clock::{CycleTick, SchedulerClock};
pub use error::{HnError, HnResult};
pub use ids::*;
pub use numeric::*;
pub use units::*;
