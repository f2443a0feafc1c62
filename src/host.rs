//! Capabilities of the Telegram WebApp host shell.
//!
//! Outside the host (plain browser, tests, the CLI runner) `NoopHost` stands in.

use tracing::info;

/// Theme key for the header and background colors.
pub const DEFAULT_THEME: &str = "secondary_bg_color";

/// The host shell the app is embedded in.
pub trait HostShell: Send + Sync {
    /// Whether the app is running inside the host.
    fn is_available(&self) -> bool;

    /// Opaque init payload issued at launch.
    fn init_data(&self) -> Option<String>;

    /// Host platform name, "web" when unknown.
    fn platform(&self) -> String {
        "web".to_string()
    }

    /// Signal that the app finished loading.
    fn ready(&self);

    /// Apply a theme color key to the header and background.
    fn set_theme(&self, color_key: &str);

    /// Expand the viewport to full height.
    fn expand(&self);

    /// Show the host's back control.
    fn show_back_control(&self);
}

/// Host used outside the host shell. Every capability is a no-op.
#[derive(Debug, Default)]
pub struct NoopHost;

impl HostShell for NoopHost {
    fn is_available(&self) -> bool {
        false
    }

    fn init_data(&self) -> Option<String> {
        None
    }

    fn ready(&self) {}

    fn set_theme(&self, _color_key: &str) {}

    fn expand(&self) {}

    fn show_back_control(&self) {}
}

/// Host simulated from launch values, logging every capability call.
#[derive(Debug, Clone)]
pub struct TracingHost {
    init_data: Option<String>,
    platform: String,
}

impl TracingHost {
    pub fn new(init_data: Option<String>, platform: impl Into<String>) -> Self {
        Self {
            init_data,
            platform: platform.into(),
        }
    }
}

impl HostShell for TracingHost {
    fn is_available(&self) -> bool {
        true
    }

    fn init_data(&self) -> Option<String> {
        self.init_data.clone()
    }

    fn platform(&self) -> String {
        self.platform.clone()
    }

    fn ready(&self) {
        info!("Host: ready");
    }

    fn set_theme(&self, color_key: &str) {
        info!("Host: header and background color set to {}", color_key);
    }

    fn expand(&self) {
        info!("Host: viewport expanded");
    }

    fn show_back_control(&self) {
        info!("Host: back control shown");
    }
}
