/// Open a profiling span that lasts until the returned guard is dropped.
/// Does nothing unless the `tracy` feature is enabled and a Tracy client is running.
macro_rules! tracy_span {
    ($name:expr, $fn_name:expr) => {
        tracy_client::Client::running()
            .map(|client| client.span_alloc(Some($name), $fn_name, file!(), line!(), 0))
    };
}

pub mod math;
pub use math::{uv, Vec2};

pub mod collision;
pub use collision::{Segment, AABB};

pub mod broad_phase;
pub use broad_phase::{
    BroadPhase, BroadPhaseError, BroadPhaseParams, PairCallback, PairKey, PairSet, ProxyId,
    ValidationError,
};
