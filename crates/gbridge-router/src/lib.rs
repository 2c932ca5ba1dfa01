mod proxy;

pub use proxy::{BridgeState, RequestTraceId, bridge_router};
