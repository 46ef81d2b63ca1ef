//! Collaborators shared by every session of one process.

use std::sync::Arc;

use crate::config::ConfigSource;
use crate::connector::ConnectorFactory;
use crate::naming::NamingService;
use crate::objects::ObjectTable;

/// Where sessions get their configuration, naming registry, connectors
/// and the object table they bind into.
#[derive(Clone)]
pub struct AgentEnvironment {
    pub config: ConfigSource,
    pub naming: Arc<dyn NamingService>,
    pub connectors: Arc<dyn ConnectorFactory>,
    pub objects: ObjectTable,
}

impl AgentEnvironment {
    pub fn new(
        config: ConfigSource,
        naming: Arc<dyn NamingService>,
        connectors: Arc<dyn ConnectorFactory>,
    ) -> Self {
        Self {
            config,
            naming,
            connectors,
            objects: ObjectTable::new(),
        }
    }
}
