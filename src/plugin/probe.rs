//! Dynamic capability probing.
//!
//! Plugins without any schema file only reveal their capabilities by running:
//! their entry module's initializer calls `registerPlatform` /
//! `registerAccessory` on the API object it is handed. A probe runs that
//! initializer against stub callbacks and collects what it registers.
//!
//! This is best-effort introspection, not isolation. The production
//! [`NodeProbe`] runs each plugin in a fresh `node` child process, so nothing
//! it loads is cached between probes and a later probe (after an update, say)
//! always executes the code currently on disk.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::types::{CapabilityRecord, CapabilityType};
use super::{PluginError, PluginResult};

/// How a loaded entry module exposes its initializer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryExport {
    /// The module itself is callable.
    Callable,
    /// A callable under the conventional `default` key.
    Default,
    /// Nothing callable was exported.
    Missing,
}

impl EntryExport {
    /// Whether there is an initializer to call.
    pub fn is_callable(self) -> bool {
        !matches!(self, Self::Missing)
    }
}

/// Collects capability registrations, suppressing duplicate `(alias, type)` pairs.
#[derive(Debug, Clone)]
pub struct CapabilityCollector {
    plugin_name: String,
    records: Vec<CapabilityRecord>,
}

impl CapabilityCollector {
    /// Create a collector attributing everything to `plugin_name`.
    pub fn new(plugin_name: impl Into<String>) -> Self {
        Self { plugin_name: plugin_name.into(), records: Vec::new() }
    }

    /// Record a capability unless the same alias and type were already seen.
    pub fn register(&mut self, capability_type: CapabilityType, alias: &str) {
        let seen = self
            .records
            .iter()
            .any(|r| r.alias == alias && r.capability_type == capability_type);

        if !seen {
            self.records.push(CapabilityRecord::new(alias, capability_type, &self.plugin_name));
        }
    }

    /// Stub for a plugin's `registerPlatform(pluginName, alias)` call.
    pub fn register_platform(&mut self, _plugin_name: &str, alias: &str) {
        self.register(CapabilityType::Platform, alias);
    }

    /// Stub for a plugin's `registerAccessory(pluginName, alias)` call.
    pub fn register_accessory(&mut self, _plugin_name: &str, alias: &str) {
        self.register(CapabilityType::Accessory, alias);
    }

    /// Registered capabilities in registration order.
    pub fn into_records(self) -> Vec<CapabilityRecord> {
        self.records
    }
}

/// Discovers the capabilities a plugin registers when its entry module runs.
#[async_trait]
pub trait CapabilityProbe: Send + Sync {
    /// Load `entry` and run its initializer against stub registration callbacks.
    ///
    /// Errors are reported as [`PluginError::ProbeFailure`]; callers treat them as
    /// "no capabilities discovered".
    async fn probe(&self, plugin_name: &str, entry: &Path) -> PluginResult<Vec<CapabilityRecord>>;
}

/// Marks the harness's report line on stdout.
const PROBE_MARKER: &str = "__HBPM_PROBE__";

/// Script run by `node -e`. Arguments: entry, plugin name, storage path, config path.
const HARNESS: &str = r#"
const path = require("path");
const [entry, name, storage, configPath] = process.argv.slice(1);
const registrations = [];
const report = { export: "missing", registrations, error: null };

const register = (kind) => (identifier, alias) => {
    const value = typeof alias === "string" ? alias : identifier;
    registrations.push({ kind, plugin: String(identifier), alias: String(value) });
};

let hap = {};

try {
    hap = require(require.resolve("hap-nodejs", { paths: [entry] }));
} catch (_error) {
    hap = {};
}

const api = {
    hap,
    platformAccessory: function PlatformAccessory() {},
    version: 2.4,
    serverVersion: "probe",
    registerPlatform: register("platform"),
    registerAccessory: register("accessory"),
    registerPlatformAccessories() {},
    unregisterPlatformAccessories() {},
    updatePlatformAccessories() {},
    publishExternalAccessories() {},
    on() {},
    user: {
        configPath() { return configPath; },
        storagePath() { return storage; },
        persistPath() { return path.join(storage, "persist"); },
        cachedAccessoryPath() { return path.join(storage, "accessories"); },
    },
};

try {
    const plugin = require(entry);

    if (typeof plugin === "function") {
        report.export = "callable";
        plugin(api);
    } else if (plugin && typeof plugin.default === "function") {
        report.export = "default";
        plugin.default(api);
    }
} catch (error) {
    report.error = String((error && error.stack) || error);
}

process.stdout.write("\n__HBPM_PROBE__" + JSON.stringify(report) + "\n", () => process.exit(0));
"#;

/// A registration call captured by the harness.
#[derive(Debug, Deserialize)]
struct Registration {
    kind: CapabilityType,
    #[serde(default)]
    plugin: String,
    alias: String,
}

/// What the harness saw while loading a plugin.
#[derive(Debug, Deserialize)]
struct ProbeReport {
    export: EntryExport,
    #[serde(default)]
    registrations: Vec<Registration>,
    #[serde(default)]
    error: Option<String>,
}

/// Find and decode the harness report in the child's stdout.
fn parse_report(stdout: &str) -> Option<ProbeReport> {
    stdout
        .lines()
        .rev()
        .find_map(|line| line.strip_prefix(PROBE_MARKER))
        .and_then(|json| serde_json::from_str(json).ok())
}

/// Turn a harness report into capability records.
fn collect(plugin_name: &str, report: ProbeReport) -> PluginResult<Vec<CapabilityRecord>> {
    if let Some(error) = report.error {
        return Err(PluginError::probe(plugin_name, error));
    }

    if !report.export.is_callable() {
        tracing::info!(plugin = plugin_name, "Plugin does not export an initializer function");
        return Ok(Vec::new());
    }

    let mut collector = CapabilityCollector::new(plugin_name);

    for registration in &report.registrations {
        match registration.kind {
            CapabilityType::Platform => {
                collector.register_platform(&registration.plugin, &registration.alias);
            }
            CapabilityType::Accessory => {
                collector.register_accessory(&registration.plugin, &registration.alias);
            }
        }
    }

    Ok(collector.into_records())
}

/// Probe that executes plugin entry modules with Node.js.
#[derive(Debug, Clone)]
pub struct NodeProbe {
    node: String,
    timeout: Duration,
    storage_path: PathBuf,
    config_path: PathBuf,
}

impl NodeProbe {
    /// Create a probe using the given interpreter.
    pub fn new(node: impl Into<String>, storage_path: PathBuf, config_path: PathBuf) -> Self {
        Self { node: node.into(), timeout: Duration::from_secs(30), storage_path, config_path }
    }

    /// Limit how long a single probe may run.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CapabilityProbe for NodeProbe {
    async fn probe(&self, plugin_name: &str, entry: &Path) -> PluginResult<Vec<CapabilityRecord>> {
        let working_dir = if entry.is_dir() { entry } else { entry.parent().unwrap_or(entry) };

        let mut command = tokio::process::Command::new(&self.node);
        command
            .arg("-e")
            .arg(HARNESS)
            .arg(entry)
            .arg(plugin_name)
            .arg(&self.storage_path)
            .arg(&self.config_path)
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        tracing::debug!(plugin = plugin_name, entry = %entry.display(), "Probing plugin entry");

        let output = tokio::time::timeout(self.timeout, command.output())
            .await
            .map_err(|_| {
                PluginError::probe(plugin_name, format!("timed out after {:?}", self.timeout))
            })?
            .map_err(|e| PluginError::probe(plugin_name, e))?;

        let stdout = String::from_utf8_lossy(&output.stdout);
        let report = parse_report(&stdout).ok_or_else(|| {
            let stderr = String::from_utf8_lossy(&output.stderr);
            PluginError::probe(plugin_name, format!("no probe report ({})", stderr.trim()))
        })?;

        collect(plugin_name, report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_collector_suppresses_duplicates() {
        let mut collector = CapabilityCollector::new("acme-lights");
        collector.register_platform("acme-lights", "AcmeHub");
        collector.register_platform("acme-lights", "AcmeHub");
        collector.register_accessory("acme-lights", "AcmeHub");
        collector.register_accessory("acme-lights", "AcmeLight");

        let records = collector.into_records();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0], CapabilityRecord::new("AcmeHub", CapabilityType::Platform, "acme-lights"));
        assert_eq!(records[1].capability_type, CapabilityType::Accessory);
        assert!(records.iter().all(|r| r.source_plugin_name == "acme-lights"));
    }

    #[test]
    fn test_report_is_found_after_plugin_output() {
        let stdout = format!(
            "plugin says hi\n{{\"not\": \"a report\"}}\n\n{}{}\n",
            PROBE_MARKER,
            r#"{"export":"default","registrations":[{"kind":"accessory","plugin":"acme","alias":"AcmeLight"}],"error":null}"#
        );

        let report = parse_report(&stdout).unwrap();
        assert_eq!(report.export, EntryExport::Default);

        let records = collect("acme-lights", report).unwrap();
        assert_eq!(
            records,
            vec![CapabilityRecord::new("AcmeLight", CapabilityType::Accessory, "acme-lights")]
        );
    }

    #[test]
    fn test_initializer_error_is_a_probe_failure() {
        let report: ProbeReport = serde_json::from_str(
            r#"{"export":"callable","registrations":[{"kind":"platform","plugin":"x","alias":"X"}],"error":"TypeError: boom"}"#,
        )
        .unwrap();

        let result = collect("broken", report);
        assert!(matches!(result, Err(PluginError::ProbeFailure { .. })));
    }

    #[test]
    fn test_missing_export_yields_nothing() {
        let report: ProbeReport =
            serde_json::from_str(r#"{"export":"missing","registrations":[]}"#).unwrap();

        assert!(collect("inert", report).unwrap().is_empty());
    }

    #[test]
    fn test_absent_report() {
        assert!(parse_report("Error: Cannot find module\n").is_none());
    }

    fn node_available() -> bool {
        std::process::Command::new("node")
            .arg("--version")
            .output()
            .is_ok_and(|output| output.status.success())
    }

    async fn run_harness(source: &str) -> PluginResult<Vec<CapabilityRecord>> {
        let dir = tempfile::TempDir::new().unwrap();
        let entry = dir.path().join("index.js");
        std::fs::write(&entry, source).unwrap();

        NodeProbe::new("node", dir.path().join("storage"), dir.path().join("config.json"))
            .with_timeout(Duration::from_secs(20))
            .probe("acme-hub", &entry)
            .await
    }

    #[tokio::test]
    async fn test_harness_collects_registrations() {
        if !node_available() {
            eprintln!("node not installed, skipping");
            return;
        }

        let bare = run_harness(
            r#"module.exports = (api) => {
                console.log("starting up");
                api.registerPlatform("acme-hub", "AcmeHub");
                api.registerPlatform("acme-hub", "AcmeHub");
                api.registerAccessory("acme-hub", "AcmeLight");
                api.user.storagePath();
            };"#,
        )
        .await
        .unwrap();

        assert_eq!(
            bare,
            vec![
                CapabilityRecord::new("AcmeHub", CapabilityType::Platform, "acme-hub"),
                CapabilityRecord::new("AcmeLight", CapabilityType::Accessory, "acme-hub"),
            ]
        );

        let default = run_harness(
            r#"exports.default = function (api) { api.registerAccessory("acme-hub", "AcmeFan"); };"#,
        )
        .await
        .unwrap();

        assert_eq!(default, vec![CapabilityRecord::new("AcmeFan", CapabilityType::Accessory, "acme-hub")]);
    }

    #[tokio::test]
    async fn test_harness_reports_initializer_errors() {
        if !node_available() {
            eprintln!("node not installed, skipping");
            return;
        }

        let thrown = run_harness(r#"module.exports = () => { throw new Error("boom"); };"#).await;
        assert!(matches!(thrown, Err(PluginError::ProbeFailure { .. })));

        let inert = run_harness(r#"module.exports = { name: "not a function" };"#).await.unwrap();
        assert!(inert.is_empty());
    }

    #[tokio::test]
    async fn test_missing_interpreter_is_a_probe_failure() {
        let probe = NodeProbe::new(
            "hbpm-test-no-such-node-binary",
            PathBuf::from("/tmp"),
            PathBuf::from("/tmp/config.json"),
        );

        let result = probe.probe("acme", Path::new("/tmp")).await;
        assert!(matches!(result, Err(PluginError::ProbeFailure { .. })));
    }
}
