//! Config document reconciliation.
//!
//! Links installed plugins to the platform blocks that configure them, and
//! strips every trace of a plugin from the document once it is removed.

use std::sync::Arc;

use super::document::{ConfigDocument, LinkedEntry, PlatformEntry, PluginMap};
use super::resolver::CapabilityResolver;
use super::types::CapabilityType;

/// Mutates a [`ConfigDocument`] to reflect installed plugins.
#[derive(Debug, Clone)]
pub struct ConfigReconciler {
    resolver: Arc<CapabilityResolver>,
}

impl ConfigReconciler {
    /// Create a reconciler classifying plugins with `resolver`.
    pub fn new(resolver: Arc<CapabilityResolver>) -> Self {
        Self { resolver }
    }

    /// Ensure the plugin `id` (short name `name`) has a linked platform block.
    ///
    /// Returns `None` when a block is already linked to `name`. Otherwise an
    /// unlinked block whose `platform` matches one of the plugin's platform
    /// aliases is adopted; failing that, a new block for the first alias is
    /// appended. A plugin with no platform capability leaves the document
    /// untouched but still returns it.
    pub async fn get_platform<'a>(
        &self,
        id: &str,
        name: &str,
        doc: &'a mut ConfigDocument,
    ) -> Option<&'a mut ConfigDocument> {
        if doc.platforms.iter().any(|p| p.is_linked_to(name)) {
            tracing::debug!(plugin = id, "Platform already linked");
            return None;
        }

        let details = self.resolver.get_plugin_type(id).await;

        let mut found = false;
        let mut first_alias: Option<&str> = None;

        for record in details.iter().filter(|r| r.capability_type == CapabilityType::Platform) {
            let existing = doc
                .platforms
                .iter_mut()
                .find(|p| p.plugin_map.is_none() && p.platform == record.alias);

            match existing {
                Some(entry) => {
                    tracing::debug!(plugin = id, alias = %record.alias, "Adopting existing platform block");
                    entry.plugin_map = Some(PluginMap::new(name));
                    found = true;
                }
                None if first_alias.is_none() => first_alias = Some(record.alias.as_str()),
                None => {}
            }
        }

        if !found {
            if let Some(alias) = first_alias {
                tracing::debug!(plugin = id, alias, "Adding platform block");
                doc.platforms.push(PlatformEntry {
                    platform: alias.to_string(),
                    plugin_map: Some(PluginMap::new(name)),
                    ..Default::default()
                });
            }
        }

        Some(doc)
    }

    /// Add `name` to the enabled plugin list unless it is already there.
    pub fn register_plugin(&self, name: &str, doc: &mut ConfigDocument) -> bool {
        if doc.plugins.iter().any(|p| p == name) {
            return false;
        }

        doc.plugins.push(name.to_string());
        true
    }

    /// Remove `name` from the plugin list and unlink its blocks, keeping their settings.
    ///
    /// Used when a package is replaced by another serving the same aliases,
    /// so the replacement can adopt the blocks.
    pub fn detach_plugin(&self, name: &str, doc: &mut ConfigDocument) {
        doc.plugins.retain(|p| p != name);

        for entry in doc.platforms.iter_mut().filter(|p| p.is_linked_to(name)) {
            entry.plugin_map = None;
        }

        for entry in doc.accessories.iter_mut().filter(|a| a.is_linked_to(name)) {
            entry.plugin_map = None;
        }
    }

    /// Remove `name` from the plugin list along with every block linked to it.
    ///
    /// Unlinked blocks are user configuration and are always kept.
    pub fn unlink_plugin(&self, name: &str, doc: &mut ConfigDocument) {
        doc.plugins.retain(|p| p != name);
        doc.platforms.retain(|p| !p.is_linked_to(name));
        doc.accessories.retain(|a| !a.is_linked_to(name));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::document::AccessoryEntry;
    use crate::plugin::probe::CapabilityProbe;
    use crate::plugin::types::CapabilityRecord;
    use crate::plugin::PluginResult;
    use async_trait::async_trait;
    use std::path::Path;
    use tempfile::TempDir;

    struct FixedProbe(Vec<(CapabilityType, &'static str)>);

    #[async_trait]
    impl CapabilityProbe for FixedProbe {
        async fn probe(&self, name: &str, _entry: &Path) -> PluginResult<Vec<CapabilityRecord>> {
            Ok(self.0.iter().map(|(t, a)| CapabilityRecord::new(*a, *t, name)).collect())
        }
    }

    fn reconciler(root: &TempDir, records: Vec<(CapabilityType, &'static str)>) -> ConfigReconciler {
        let resolver = CapabilityResolver::new(root.path(), Arc::new(FixedProbe(records)));
        ConfigReconciler::new(Arc::new(resolver))
    }

    fn platform(alias: &str, linked: Option<&str>) -> PlatformEntry {
        PlatformEntry {
            platform: alias.to_string(),
            plugin_map: linked.map(PluginMap::new),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_appends_block_for_first_alias() {
        let root = TempDir::new().unwrap();
        let reconciler = reconciler(
            &root,
            vec![
                (CapabilityType::Accessory, "RingCam"),
                (CapabilityType::Platform, "Ring"),
                (CapabilityType::Platform, "RingAlarm"),
            ],
        );

        let mut doc = ConfigDocument::default();
        assert!(reconciler.get_platform("@hoobs/ring", "ring", &mut doc).await.is_some());

        assert_eq!(doc.platforms, vec![platform("Ring", Some("ring"))]);
    }

    #[tokio::test]
    async fn test_adopts_unlinked_block() {
        let root = TempDir::new().unwrap();
        let reconciler = reconciler(&root, vec![(CapabilityType::Platform, "Nest")]);

        let mut doc = ConfigDocument::default();
        doc.platforms.push(platform("Other", None));
        doc.platforms.push(platform("Nest", None));
        doc.platforms[1].settings.insert("token".into(), "abc".into());

        reconciler.get_platform("nest", "nest", &mut doc).await;

        assert_eq!(doc.platforms.len(), 2);
        assert_eq!(doc.platforms[1].linked_plugin(), Some("nest"));
        assert_eq!(doc.platforms[1].settings["token"], "abc");
        assert_eq!(doc.platforms[0].linked_plugin(), None);
    }

    #[tokio::test]
    async fn test_blocks_linked_elsewhere_are_not_adopted() {
        let root = TempDir::new().unwrap();
        let reconciler = reconciler(&root, vec![(CapabilityType::Platform, "Nest")]);

        let mut doc = ConfigDocument::default();
        doc.platforms.push(platform("Nest", Some("nest-legacy")));

        reconciler.get_platform("nest", "nest", &mut doc).await;

        assert_eq!(doc.platforms.len(), 2);
        assert_eq!(doc.platforms[0].linked_plugin(), Some("nest-legacy"));
        assert_eq!(doc.platforms[1].linked_plugin(), Some("nest"));
    }

    #[tokio::test]
    async fn test_get_platform_is_idempotent() {
        let root = TempDir::new().unwrap();
        let reconciler = reconciler(&root, vec![(CapabilityType::Platform, "Ring")]);

        let mut doc = ConfigDocument::default();
        assert!(reconciler.get_platform("ring", "ring", &mut doc).await.is_some());
        let snapshot = doc.clone();

        assert!(reconciler.get_platform("ring", "ring", &mut doc).await.is_none());
        assert_eq!(doc, snapshot);
    }

    #[tokio::test]
    async fn test_accessory_only_plugin_adds_nothing() {
        let root = TempDir::new().unwrap();
        let reconciler = reconciler(&root, vec![(CapabilityType::Accessory, "Fan")]);

        let mut doc = ConfigDocument::default();
        assert!(reconciler.get_platform("fan", "fan", &mut doc).await.is_some());
        assert!(doc.platforms.is_empty());
    }

    #[test]
    fn test_register_and_unlink() {
        let root = TempDir::new().unwrap();
        let reconciler = reconciler(&root, vec![]);

        let mut doc = ConfigDocument::default();
        assert!(reconciler.register_plugin("acme-lights", &mut doc));
        assert!(!reconciler.register_plugin("acme-lights", &mut doc));
        doc.plugins.push("ring".into());

        doc.platforms.push(platform("Acme", Some("acme-lights")));
        doc.platforms.push(platform("Standalone", None));
        doc.platforms.push(platform("Acme2", Some("acme-lights")));
        for linked in [Some("acme-lights"), None, Some("acme-lights")] {
            doc.accessories.push(AccessoryEntry {
                accessory: "AcmeLight".into(),
                plugin_map: linked.map(PluginMap::new),
                ..Default::default()
            });
        }

        reconciler.unlink_plugin("acme-lights", &mut doc);

        assert_eq!(doc.plugins, vec!["ring".to_string()]);
        assert_eq!(doc.platforms, vec![platform("Standalone", None)]);
        assert_eq!(doc.accessories.len(), 1);
        assert_eq!(doc.accessories[0].linked_plugin(), None);
    }

    #[tokio::test]
    async fn test_detached_blocks_are_adopted_by_replacement() {
        let root = TempDir::new().unwrap();
        let reconciler = reconciler(&root, vec![(CapabilityType::Platform, "Ring")]);

        let mut doc = ConfigDocument::default();
        doc.plugins.push("homebridge-ring".into());
        doc.platforms.push(platform("Ring", Some("homebridge-ring")));

        reconciler.detach_plugin("homebridge-ring", &mut doc);
        assert!(doc.plugins.is_empty());
        assert_eq!(doc.platforms[0].linked_plugin(), None);

        reconciler.get_platform("@hoobs/ring", "ring", &mut doc).await;
        assert_eq!(doc.platforms, vec![platform("Ring", Some("ring"))]);
    }
}
