//! Settings synchronization with a connected reader

use tracing::{debug, info};

use super::model::{ReaderCapabilities, Settings};
use super::validate;
use crate::error::{ApplyError, StateError};
use crate::reader::ReaderSession;
use crate::transport::SettingsSource;

/// Read the settings the reader is running with
pub async fn query_current(session: &ReaderSession) -> Result<Settings, StateError> {
    let settings = query(session, SettingsSource::Current).await?;
    session.record_settings(settings.clone());
    Ok(settings)
}

/// Read the reader's factory default settings
pub async fn query_default(session: &ReaderSession) -> Result<Settings, StateError> {
    query(session, SettingsSource::Default).await
}

async fn query(session: &ReaderSession, source: SettingsSource) -> Result<Settings, StateError> {
    let settings = session
        .guarded(async {
            session
                .transport()
                .query_settings(source)
                .await
                .map_err(StateError::from)
        })
        .await?;

    let caps = ReaderCapabilities::from_settings(&settings);
    debug!(
        "{} {:?} settings: {} antennas, {} GPOs, {} GPIs",
        session.address(),
        source,
        caps.antenna_count,
        caps.gpo_count,
        caps.gpi_count
    );
    session.record_capabilities(caps);
    Ok(settings)
}

/// Port counts for the session, querying defaults if none are known yet
async fn capabilities(session: &ReaderSession) -> Result<ReaderCapabilities, StateError> {
    match session.capabilities() {
        Some(caps) => Ok(caps),
        None => query_default(session)
            .await
            .map(|defaults| ReaderCapabilities::from_settings(&defaults)),
    }
}

/// Replace the reader configuration
///
/// Values are checked against their bounds before anything is sent. On
/// success `settings` becomes the session's active snapshot.
pub async fn apply(session: &ReaderSession, settings: &Settings) -> Result<(), ApplyError> {
    validate::check_bounds(settings)?;
    session.ensure_connected()?;

    let caps = capabilities(session).await?;
    validate::check_ports(settings, &caps)?;

    session
        .guarded(async {
            let _serial = session.serialize().await;
            session
                .transport()
                .apply_settings(settings)
                .await
                .map_err(ApplyError::from)
        })
        .await?;

    session.record_settings(settings.clone());
    info!("⚙️  Settings applied to {}", session.address());
    Ok(())
}

/// Apply the reader's factory defaults and return them
pub async fn apply_default(session: &ReaderSession) -> Result<Settings, ApplyError> {
    let defaults = query_default(session).await?;
    apply(session, &defaults).await?;
    Ok(defaults)
}

/// Drive one general-purpose output
pub async fn set_gpo(session: &ReaderSession, port: u16, state: bool) -> Result<(), ApplyError> {
    session.ensure_connected()?;
    let caps = capabilities(session).await?;
    validate::check_port("gpo", port, caps.gpo_count)?;

    session
        .guarded(async {
            session
                .transport()
                .set_gpo(port, state)
                .await
                .map_err(ApplyError::from)
        })
        .await?;

    debug!("GPO {} on {} set {}", port, session.address(), if state { "high" } else { "low" });
    Ok(())
}
