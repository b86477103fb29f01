//! Driver configuration.

use serde::{Deserialize, Serialize};

/// Static configuration for one camera connection.
///
/// Deserializable from TOML; every field has a default so a config file
/// only names what it overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Camera IP address or resolvable host name.
    pub address: String,
    /// Master access may reconfigure the camera; a monitor connection only
    /// observes it.
    pub master: bool,
    /// Force monochrome output from a color sensor.
    pub mono_forced: bool,
    /// Streaming packet size in bytes.
    pub packet_size: u32,
    /// Size of the soft buffer ring for the buffered pipeline.
    pub nb_buffers: usize,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            address: String::new(),
            master: true,
            mono_forced: false,
            // Jumbo-frame payload; cameras negotiate down when the link
            // cannot carry it.
            packet_size: 8228,
            nb_buffers: 8,
        }
    }
}
