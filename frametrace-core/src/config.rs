//! Plugin configuration
//!
//! All fields have working defaults; a host only needs to override what it
//! cares about, either with the builder methods or from JSON.
//!
//! ```rust
//! use frametrace_core::config::TraceConfig;
//!
//! let config = TraceConfig::from_json(r#"{ "section_group_capacity": 128 }"#).unwrap();
//! assert_eq!(config.section_group_capacity, 128);
//! assert_eq!(config.default_marker_name, "Profiler.Default");
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, TraceError};
use crate::trace::DEFAULT_GROUP_COLOR;

/// Default number of section groups the registry can hold
pub const DEFAULT_SECTION_GROUP_CAPACITY: usize = 64;

/// Name of the host marker whose payload carries a UTF-16 section name
pub const DEFAULT_MARKER_NAME: &str = "Profiler.Default";

/// Shared library exporting the native OS tracer symbols
pub const DEFAULT_NATIVE_LIBRARY: &str = "libandroid.so";

/// Default number of completed frames a `FrameChannel` buffers
pub const DEFAULT_FRAME_QUEUE_DEPTH: usize = 8;

/// Configuration for a plugin context
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TraceConfig {
    /// Maximum number of categories kept in the section group registry
    pub section_group_capacity: usize,

    /// Marker name matched exactly to enable UTF-16 name decoding
    pub default_marker_name: String,

    /// Color used for sections whose category is unknown
    pub default_group_color: u32,

    /// Library probed for the native OS tracer
    pub native_library: String,

    /// Whether to probe for the native OS tracer at all
    pub probe_native_tracer: bool,

    /// Completed frames buffered by `FrameChannel` before dropping
    pub frame_queue_depth: usize,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            section_group_capacity: DEFAULT_SECTION_GROUP_CAPACITY,
            default_marker_name: DEFAULT_MARKER_NAME.to_string(),
            default_group_color: DEFAULT_GROUP_COLOR,
            native_library: DEFAULT_NATIVE_LIBRARY.to_string(),
            probe_native_tracer: true,
            frame_queue_depth: DEFAULT_FRAME_QUEUE_DEPTH,
        }
    }
}

impl TraceConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse and validate a JSON configuration
    pub fn from_json(json: &str) -> Result<Self> {
        let config: TraceConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Set registry capacity
    pub fn section_group_capacity(mut self, capacity: usize) -> Self {
        self.section_group_capacity = capacity;
        self
    }

    /// Set the default marker name
    pub fn default_marker_name(mut self, name: impl Into<String>) -> Self {
        self.default_marker_name = name.into();
        self
    }

    /// Set the fallback group color
    pub fn default_group_color(mut self, color: u32) -> Self {
        self.default_group_color = color;
        self
    }

    /// Set the native tracer library
    pub fn native_library(mut self, library: impl Into<String>) -> Self {
        self.native_library = library.into();
        self
    }

    /// Enable or disable native tracer probing
    pub fn probe_native_tracer(mut self, probe: bool) -> Self {
        self.probe_native_tracer = probe;
        self
    }

    /// Set frame channel depth
    pub fn frame_queue_depth(mut self, depth: usize) -> Self {
        self.frame_queue_depth = depth;
        self
    }

    /// Check the configuration for values the plugin cannot work with
    pub fn validate(&self) -> Result<()> {
        if self.section_group_capacity == 0 {
            return Err(TraceError::invalid_argument(
                "section_group_capacity must be at least 1",
            ));
        }
        if self.default_marker_name.is_empty() {
            return Err(TraceError::invalid_argument(
                "default_marker_name must not be empty",
            ));
        }
        if self.frame_queue_depth == 0 {
            return Err(TraceError::invalid_argument(
                "frame_queue_depth must be at least 1",
            ));
        }
        Ok(())
    }
}
