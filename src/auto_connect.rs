//! Auto-Connect Orchestrator: find a working interface, then the first
//! connection profile whose communication check gets a positive answer.

use crate::j2534::registry::DeviceInfo;
use crate::profiles::ConnectionProfile;
use crate::protocol::to_hex;
use crate::session::{ChannelSession, SessionError, SessionState};
use crate::uds::error::TransactionError;
use crate::uds::transaction::TransactionEngine;

/// Upper bound on registry indices probed for a working device
pub const MAX_PROBED_DEVICES: usize = 20;

/// Device and profile an auto-connect settled on. The session is left
/// connected with the profile's filter installed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AutoConnectMatch {
    pub device_index: usize,
    pub device: DeviceInfo,
    pub profile_key: String,
    pub profile_name: String,
    /// Communication-check answer, uppercase hex
    pub response: String,
}

/// A profile that answered during [`scan_profiles`]
#[derive(Debug, Clone, serde::Serialize)]
pub struct ProfileHit {
    pub profile_key: String,
    pub profile_name: String,
    pub protocol: String,
    pub response: String,
}

/// Index of the first device that opens and passes the voltage check.
///
/// Each probe is closed again before the next index is tried, so the
/// session is `Closed` afterwards.
pub fn find_device(session: &mut ChannelSession) -> Option<usize> {
    release(session);
    let index = open_first_device(session)?;
    release(session);
    log::info!("Found working PassThru device at index {}", index);
    Some(index)
}

/// Open the first usable device and connect with the first candidate whose
/// communication check gets a positive response, trying candidates in order.
///
/// On success the session stays connected to the matched profile. When no
/// device opens, or no candidate answers, the session ends up `Closed`.
pub fn auto_connect(
    session: &mut ChannelSession,
    candidates: &[(&str, &ConnectionProfile)],
) -> Option<AutoConnectMatch> {
    release(session);

    let device_index = open_first_device(session)?;
    let device = session.devices()[device_index].clone();

    for (key, profile) in candidates {
        match probe_profile(session, profile) {
            Ok(response) => {
                log::info!(
                    "Communication established with '{}' via '{}' ({})",
                    device.name,
                    key,
                    profile.name
                );
                return Some(AutoConnectMatch {
                    device_index,
                    device,
                    profile_key: key.to_string(),
                    profile_name: profile.name.clone(),
                    response: to_hex(&response),
                });
            }
            Err(e) => {
                log::debug!("Profile '{}' did not answer: {}", key, e);
                if !reset_channel(session, device_index) {
                    return None;
                }
            }
        }
    }

    log::warn!(
        "No candidate profile answered on '{}', closing",
        device.name
    );
    release(session);
    None
}

/// Try every profile on `device_index` and report all that answer.
///
/// The device is closed when the scan finishes.
pub fn scan_profiles(
    session: &mut ChannelSession,
    device_index: usize,
    profiles: &[(&str, &ConnectionProfile)],
) -> Result<Vec<ProfileHit>, SessionError> {
    release(session);
    session.open(device_index)?;

    let mut hits = Vec::new();
    for (key, profile) in profiles {
        match probe_profile(session, profile) {
            Ok(response) => {
                log::info!("'{}' answered: {}", key, to_hex(&response));
                hits.push(ProfileHit {
                    profile_key: key.to_string(),
                    profile_name: profile.name.clone(),
                    protocol: profile.protocol.to_string(),
                    response: to_hex(&response),
                });
            }
            Err(e) => log::debug!("'{}' did not answer: {}", key, e),
        }
        if !reset_channel(session, device_index) {
            break;
        }
    }

    release(session);
    Ok(hits)
}

fn open_first_device(session: &mut ChannelSession) -> Option<usize> {
    let count = session.devices().len().min(MAX_PROBED_DEVICES);
    for index in 0..count {
        match session.open(index) {
            Ok(()) => return Some(index),
            Err(e) => log::debug!("Device {} not usable: {}", index, e),
        }
    }
    log::warn!("No usable PassThru device among {} probed", count);
    None
}

/// Connect, filter and run the profile's communication check
fn probe_profile(
    session: &mut ChannelSession,
    profile: &ConnectionProfile,
) -> Result<Vec<u8>, TransactionError> {
    session.connect(profile)?;
    session.install_filter()?;
    TransactionEngine::new(session).execute(&profile.comm_check, 0)
}

/// Bring the session back to `DeviceOpen` on `device_index`.
///
/// A channel that refuses to disconnect is dropped by closing and reopening
/// the device. Returns `false` when the device cannot be reopened.
fn reset_channel(session: &mut ChannelSession, device_index: usize) -> bool {
    match session.disconnect() {
        Ok(()) => true,
        Err(e) => {
            log::warn!("{}; reopening device {}", e, device_index);
            release(session);
            match session.open(device_index) {
                Ok(()) => true,
                Err(e) => {
                    log::warn!("Reopening device {} failed: {}", device_index, e);
                    false
                }
            }
        }
    }
}

fn release(session: &mut ChannelSession) {
    if session.state() == SessionState::Closed {
        return;
    }
    if let Err(e) = session.close() {
        log::warn!("Close failed: {}", e);
    }
}
