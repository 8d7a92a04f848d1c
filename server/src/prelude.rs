pub use crate::{App, AppState};
pub use yrelay_types::error::{Error, ErrorHandler, YrResult};

pub use tracing::{debug, debug_span, error, error_span, info, info_span, warn, warn_span};

// vim: ts=4
