//! External tracer slot
//!
//! A process may install one external tracer before the plugin context is
//! created. The context picks it up at creation time; installing later has
//! no effect on an existing context.

use std::sync::{Arc, OnceLock};

use tracing::info;

use super::sink::TraceSink;
use crate::error::{Result, TraceError};

static EXTERN_TRACE: OnceLock<Arc<dyn TraceSink>> = OnceLock::new();

/// Install the process-wide external tracer
///
/// Fails with `InvalidState` if one is already installed.
pub fn install_extern_trace(sink: Arc<dyn TraceSink>) -> Result<()> {
    let name = sink.name();
    EXTERN_TRACE
        .set(sink)
        .map_err(|_| TraceError::invalid_state("an external tracer is already installed"))?;
    info!(sink = name, "External tracer installed");
    Ok(())
}

/// The installed external tracer, if any
pub fn extern_trace() -> Option<Arc<dyn TraceSink>> {
    EXTERN_TRACE.get().cloned()
}
