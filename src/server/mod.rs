pub mod router;

pub use router::{TapState, tap_router};
