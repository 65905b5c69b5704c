//! Built-in overlay: a black window covering the whole screen.
//!
//! Runs as its own process (`screenlockd overlay`) so the supervisor can own
//! it like any other child and remove it with a signal.
//!
//! The window is mapped once and never restacked. The screensaver and the
//! locker map their windows later and must stay above it.

use anyhow::{Context, Result};
use tracing::{debug, info};
use x11rb::COPY_DEPTH_FROM_PARENT;
use x11rb::COPY_FROM_PARENT;
use x11rb::connection::Connection;
use x11rb::protocol::xproto::{ConnectionExt as _, CreateWindowAux, EventMask, WindowClass};

/// Attributes of the overlay window: black, unmanaged, exposure events only.
fn window_aux(black_pixel: u32) -> CreateWindowAux {
    CreateWindowAux::new()
        .background_pixel(black_pixel)
        .override_redirect(1)
        .event_mask(EventMask::EXPOSURE)
}

/// Map the overlay and block until the X connection closes.
pub fn run(display: Option<&str>) -> Result<()> {
    let (conn, screen_num) = x11rb::connect(display).context("Failed to connect to X display")?;
    let screen = &conn.setup().roots[screen_num];
    let window = conn.generate_id().context("Failed to allocate window id")?;

    conn.create_window(
        COPY_DEPTH_FROM_PARENT,
        window,
        screen.root,
        0,
        0,
        screen.width_in_pixels,
        screen.height_in_pixels,
        0,
        WindowClass::INPUT_OUTPUT,
        COPY_FROM_PARENT,
        &window_aux(screen.black_pixel),
    )
    .context("Failed to create overlay window")?;
    conn.map_window(window)?;
    conn.flush()?;

    info!(
        "Overlay mapped ({}x{})",
        screen.width_in_pixels, screen.height_in_pixels
    );

    // Only blocks until the connection drops; the process is killed by its owner
    loop {
        let event = conn.wait_for_event().context("X connection closed")?;
        debug!("Ignoring X event: {:?}", event);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_is_unmanaged_and_black() {
        let aux = window_aux(7);
        assert_eq!(aux.background_pixel, Some(7));
        assert_eq!(aux.override_redirect, Some(1));
    }

    #[test]
    fn test_window_does_not_track_visibility() {
        let mask = window_aux(0).event_mask.map_or(0, u32::from);
        assert_eq!(mask & u32::from(EventMask::VISIBILITY_CHANGE), 0);
    }
}
