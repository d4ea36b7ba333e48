//! Identity service

use super::Driver;
use crate::config::VENDOR_VERSION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginInfo {
    pub name: String,
    pub vendor_version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginCapability {
    ControllerService,
}

impl Driver {
    pub fn get_plugin_info(&self) -> PluginInfo {
        PluginInfo {
            name: self.config.driver_name.clone(),
            vendor_version: VENDOR_VERSION.to_string(),
        }
    }

    /// Readiness check; the driver holds no state that can go unhealthy
    pub fn probe(&self) -> bool {
        true
    }

    pub fn get_plugin_capabilities(&self) -> Vec<PluginCapability> {
        vec![PluginCapability::ControllerService]
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::test_driver;
    use super::*;

    #[test]
    fn test_plugin_info() {
        let t = test_driver();
        let info = t.driver.get_plugin_info();
        assert_eq!(info.name, "ca.gmem.s3.csi");
        assert_eq!(info.vendor_version, VENDOR_VERSION);
        assert!(t.driver.probe());
        assert_eq!(
            t.driver.get_plugin_capabilities(),
            vec![PluginCapability::ControllerService]
        );
    }
}
