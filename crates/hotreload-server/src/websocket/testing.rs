//! Shared fixtures for unit tests.

use std::sync::Arc;

use async_trait::async_trait;
use hotreload_core::SessionId;
use hotreload_core::protocol::{
    Capability, ClientRegisterPayload, DeviceInfo, Platform,
};
use tokio::sync::mpsc;

use super::session::Session;
use super::transport::{ChannelTransport, Transport, TransportError};

/// Transport whose sends always fail.
pub(crate) struct FailingTransport;

#[async_trait]
impl Transport for FailingTransport {
    async fn send(&self, _frame: Arc<str>) -> Result<(), TransportError> {
        Err(TransportError::Other("simulated write error".into()))
    }

    async fn close(&self, _reason: &str) {}

    fn is_closed(&self) -> bool {
        false
    }
}

/// Registration with a `fileWatching` capability and an iPhone/Pixel model.
pub(crate) fn registration(platform: Platform) -> ClientRegisterPayload {
    let model = match platform {
        Platform::Ios => "iPhone15,2",
        Platform::Android => "Pixel 8",
    };
    ClientRegisterPayload {
        platform,
        client_name: String::new(),
        capabilities: vec![Capability::enabled("fileWatching")],
        device_info: Some(DeviceInfo {
            model: model.into(),
            os_version: "17.0".into(),
            screen: None,
        }),
    }
}

/// Session over a [`ChannelTransport`]; keep the receiver alive.
pub(crate) fn channel_session(
    id: &str,
    platform: Platform,
) -> (Arc<Session>, mpsc::Receiver<Arc<str>>) {
    let (transport, rx) = ChannelTransport::new(64);
    let mut reg = registration(platform);
    reg.client_name = format!("client-{id}");
    let session = Session::new(SessionId::from(id), reg, Arc::new(transport));
    (Arc::new(session), rx)
}

/// Session whose every send fails.
pub(crate) fn failing_session(id: &str, platform: Platform) -> Arc<Session> {
    Arc::new(Session::new(
        SessionId::from(id),
        registration(platform),
        Arc::new(FailingTransport),
    ))
}
