use std::sync::Arc;
use log::info;

use crate::classifier::PoseClassifier;
use crate::classifier::training::TrainingSet;
use crate::config::io::ConfigIO;
use crate::config::types::DriverConfig;
use crate::device::bgapi::Command;
use crate::device::connection::ConnectionManager;
use crate::device::router::EventRouter;
use crate::device::transport::Transport;
use crate::device::write::AttributeWriteCoordinator;
use crate::error::{DriverError, TransportError};

/// The assembled driver for one dongle.
///
/// Whoever owns the transport feeds every incoming packet to `router().dispatch_packet` in arrival
/// order; callers drive the device through `connection()`.
pub struct Driver {
    config: DriverConfig,
    transport: Arc<dyn Transport>,
    manager: Arc<ConnectionManager>,
    router: Arc<EventRouter>,
}

impl Driver {
    /// Load the training data (the bundled samples unless the config names a file) and wire up
    /// the components around `transport`.
    pub async fn new(transport: Arc<dyn Transport>, config: DriverConfig) -> Result<Driver, DriverError> {
        let training = match &config.training_data {
            Some(path) => TrainingSet::load(path).await?,
            None => TrainingSet::bundled()?,
        };
        info!("Loaded {} training samples", training.len());

        let classifier = Arc::new(PoseClassifier::new(training, config.classifier_k));
        let writes = Arc::new(AttributeWriteCoordinator::new(transport.clone()));
        let manager = Arc::new(ConnectionManager::new(transport.clone(), writes.clone(), config.clone()));
        let router = Arc::new(EventRouter::new(manager.clone(), writes, classifier));

        Ok(Driver { config, transport, manager, router })
    }

    /// Like `new`, reading the config file first. A missing file means the defaults.
    pub async fn from_config_file(transport: Arc<dyn Transport>, config_io: &ConfigIO) -> Result<Driver, DriverError> {
        let config = config_io.read_or_default().await?;
        Driver::new(transport, config).await
    }

    pub fn config(&self) -> &DriverConfig {
        &self.config
    }

    pub fn router(&self) -> Arc<EventRouter> {
        self.router.clone()
    }

    pub fn connection(&self) -> Arc<ConnectionManager> {
        self.manager.clone()
    }

    /// Greet the dongle and ask for its firmware details. Both replies arrive as responses, which
    /// the router only logs.
    pub fn start(&self) -> Result<(), TransportError> {
        info!("Starting dongle session");
        self.transport.send_command(&Command::SystemHello.encode())?;
        self.transport.send_command(&Command::SystemGetInfo.encode())?;
        Ok(())
    }

    /// Reboot the dongle into normal mode. Any link it held is gone afterwards.
    pub fn reset(&self) -> Result<(), TransportError> {
        info!("Resetting dongle");
        self.transport.send_command(&Command::SystemReset { boot_in_dfu: false }.encode())?;
        self.manager.on_dongle_reset();
        Ok(())
    }
}
