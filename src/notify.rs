//! Desktop notification on fatal errors via `org.freedesktop.Notifications`.

use std::collections::HashMap;

use anyhow::{Context, Result};
use tracing::debug;
use zbus::Connection;
use zbus::zvariant::Value;

const NOTIFICATIONS_SERVICE: &str = "org.freedesktop.Notifications";
const NOTIFICATIONS_PATH: &str = "/org/freedesktop/Notifications";
const NOTIFICATIONS_INTERFACE: &str = "org.freedesktop.Notifications";

/// Icon name from the freedesktop icon naming spec.
const ERROR_ICON: &str = "dialog-error";

/// Show a critical notification. Returns the server-assigned id.
pub async fn notify_failure(summary: &str, body: &str) -> Result<u32> {
    let conn = Connection::session()
        .await
        .context("Failed to connect to session DBus")?;

    let proxy = zbus::Proxy::new(
        &conn,
        NOTIFICATIONS_SERVICE,
        NOTIFICATIONS_PATH,
        NOTIFICATIONS_INTERFACE,
    )
    .await
    .context("Failed to create Notifications proxy")?;

    let mut hints: HashMap<&str, Value<'_>> = HashMap::new();
    // Critical urgency: stays until dismissed
    hints.insert("urgency", Value::U8(2));

    let id: u32 = proxy
        .call(
            "Notify",
            &(
                env!("CARGO_PKG_NAME"),
                0u32,
                ERROR_ICON,
                summary,
                body,
                Vec::<&str>::new(),
                hints,
                -1i32,
            ),
        )
        .await
        .context("Notify call failed")?;

    debug!("Raised failure notification {}", id);
    Ok(id)
}
