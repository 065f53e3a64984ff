pub mod conn_id;
pub mod half;
pub mod session_state;

pub use conn_id::ConnId;
pub use half::{CONTROL_ID, Half, VirtualId};
pub use session_state::SessionState;
