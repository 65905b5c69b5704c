//! Idle detection via the X11 MIT-SCREEN-SAVER extension.

use tracing::{debug, info};
use x11rb::connection::{Connection as _, RequestConnection as _};
use x11rb::protocol::screensaver::{self, ConnectionExt as _};
use x11rb::protocol::xproto::Window;
use x11rb::rust_connection::RustConnection;

use super::{IdleError, IdleProbe};

/// Idle probe backed by a single X connection, opened once at startup.
pub struct X11IdleProbe {
    conn: RustConnection,
    root: Window,
}

impl X11IdleProbe {
    /// Connect to `display` (or `$DISPLAY`) and verify the extension is present.
    pub fn connect(display: Option<&str>) -> Result<Self, IdleError> {
        let (conn, screen_num) = x11rb::connect(display)?;
        let root = conn.setup().roots[screen_num].root;

        if conn
            .extension_information(screensaver::X11_EXTENSION_NAME)?
            .is_none()
        {
            return Err(IdleError::ExtensionMissing);
        }

        let name = display_name(display);
        info!("Connected to X display {} (screen {})", name, screen_num);

        let mut probe = Self { conn, root };
        // Fail at startup rather than on the first tick
        let idle_ms = probe.query()?;
        debug!("Initial idle time: {} ms", idle_ms);

        Ok(probe)
    }
}

/// Display name for logs; `None` means whatever `$DISPLAY` holds.
fn display_name(display: Option<&str>) -> &str {
    display.unwrap_or("$DISPLAY")
}

impl IdleProbe for X11IdleProbe {
    fn query(&mut self) -> Result<u64, IdleError> {
        let reply = self.conn.screensaver_query_info(self.root)?.reply()?;
        Ok(u64::from(reply.ms_since_user_input))
    }
}

impl Drop for X11IdleProbe {
    fn drop(&mut self) {
        debug!("Releasing X display connection");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_name() {
        assert_eq!(display_name(Some(":1")), ":1");
        assert_eq!(display_name(None), "$DISPLAY");
    }
}
