//! Account event relay: broker events formatted into chat announcements.

pub mod config;
pub mod controller;
pub mod error;

pub use config::ReconnectPolicy;
pub use controller::{RelayController, RelayState, RelayStats};
pub use error::RelayError;

use ocfbot_broker::{BrokerEventSource, CertVerification, ConnectOptions};
use ocfbot_core::config::CeleryConfig;

use crate::commands::accounts::open_link;

/// The broker event source described by `config`, validating the broker's
/// certificate against the configured CA bundle.
pub fn broker_source(config: &CeleryConfig) -> ocfbot_core::Result<BrokerEventSource> {
    let options = ConnectOptions::new(
        CertVerification::Verified {
            ca_certs: config.ca_certs.clone(),
        },
        config.connect_timeout(),
    );
    let link = open_link("celery.broker", config.broker()?, options)?;
    Ok(BrokerEventSource::new(link, config.poll_interval()))
}
