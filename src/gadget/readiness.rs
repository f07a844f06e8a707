//! Gadget readiness probe
//!
//! The gadget is usable once a USB device controller exists, a configfs
//! gadget is bound to it, and both HID function nodes are present.

use log::debug;
use std::fs;
use std::path::{Path, PathBuf};

use crate::constants::{CONFIGFS_GADGET_DIR, UDC_CLASS_DIR};

/// Result of one probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Readiness {
    /// First controller under /sys/class/udc
    pub udc: Option<String>,
    /// Gadget name and the UDC it is bound to
    pub bound_gadget: Option<(String, String)>,
    /// HID nodes that do not exist yet
    pub missing_nodes: Vec<PathBuf>,
    /// Whether a bound gadget is part of the verdict
    pub binding_required: bool,
}

impl Readiness {
    pub fn is_ready(&self) -> bool {
        self.udc.is_some()
            && (!self.binding_required || self.bound_gadget.is_some())
            && self.missing_nodes.is_empty()
    }

    /// Short description of what is still missing
    pub fn describe(&self) -> String {
        if self.is_ready() {
            return "ready".into();
        }
        let mut parts = Vec::new();
        if self.udc.is_none() {
            parts.push("no USB device controller".to_string());
        }
        if self.binding_required && self.bound_gadget.is_none() {
            parts.push("gadget not bound to a UDC".to_string());
        }
        for node in &self.missing_nodes {
            parts.push(format!("{} missing", node.display()));
        }
        parts.join(", ")
    }
}

/// Probe over sysfs, configfs and /dev
#[derive(Debug, Clone)]
pub struct ReadinessProbe {
    udc_dir: PathBuf,
    configfs_dir: PathBuf,
    /// Restrict the binding check to one gadget; any gadget when `None`
    gadget_name: Option<String>,
    require_binding: bool,
    nodes: Vec<PathBuf>,
}

impl ReadinessProbe {
    pub fn new(gadget_name: Option<String>, nodes: Vec<PathBuf>) -> Self {
        Self::with_roots(UDC_CLASS_DIR, CONFIGFS_GADGET_DIR, gadget_name, nodes)
    }

    pub fn with_roots(
        udc_dir: impl Into<PathBuf>,
        configfs_dir: impl Into<PathBuf>,
        gadget_name: Option<String>,
        nodes: Vec<PathBuf>,
    ) -> Self {
        Self {
            udc_dir: udc_dir.into(),
            configfs_dir: configfs_dir.into(),
            gadget_name,
            require_binding: true,
            nodes,
        }
    }

    /// Skip the configfs UDC binding check (controller and nodes still count)
    pub fn require_binding(mut self, require: bool) -> Self {
        self.require_binding = require;
        self
    }

    pub fn probe(&self) -> Readiness {
        let readiness = Readiness {
            udc: first_entry(&self.udc_dir),
            bound_gadget: self.bound_gadget(),
            missing_nodes: self.nodes.iter().filter(|n| !n.exists()).cloned().collect(),
            binding_required: self.require_binding,
        };
        debug!("gadget readiness: {:?}", readiness);
        readiness
    }

    fn bound_gadget(&self) -> Option<(String, String)> {
        match &self.gadget_name {
            Some(name) => bound_udc(&self.configfs_dir.join(name)).map(|udc| (name.clone(), udc)),
            None => {
                let mut gadgets: Vec<PathBuf> = fs::read_dir(&self.configfs_dir)
                    .ok()?
                    .filter_map(|e| e.ok().map(|e| e.path()))
                    .collect();
                gadgets.sort();
                gadgets.into_iter().find_map(|dir| {
                    let name = dir.file_name()?.to_string_lossy().into_owned();
                    bound_udc(&dir).map(|udc| (name, udc))
                })
            }
        }
    }
}

/// Sorted-first directory entry name
fn first_entry(dir: &Path) -> Option<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .ok()?
        .filter_map(|e| e.ok())
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names.into_iter().next()
}

/// Contents of `<gadget>/UDC` when non-empty
fn bound_udc(gadget_dir: &Path) -> Option<String> {
    let udc = fs::read_to_string(gadget_dir.join("UDC")).ok()?;
    let udc = udc.trim();
    (!udc.is_empty()).then(|| udc.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixture {
        root: PathBuf,
    }

    impl Fixture {
        fn new(name: &str) -> Self {
            let root = std::env::temp_dir().join(format!(
                "hidg-bridge-ready-{}-{}",
                std::process::id(),
                name
            ));
            let _ = fs::remove_dir_all(&root);
            fs::create_dir_all(root.join("udc")).unwrap();
            fs::create_dir_all(root.join("gadgets")).unwrap();
            Self { root }
        }

        fn add_udc(&self, name: &str) {
            fs::create_dir_all(self.root.join("udc").join(name)).unwrap();
        }

        fn add_gadget(&self, name: &str, udc: &str) {
            let dir = self.root.join("gadgets").join(name);
            fs::create_dir_all(&dir).unwrap();
            fs::write(dir.join("UDC"), format!("{}\n", udc)).unwrap();
        }

        fn node(&self, name: &str, create: bool) -> PathBuf {
            let path = self.root.join(name);
            if create {
                fs::write(&path, b"").unwrap();
            }
            path
        }

        fn probe(&self, gadget: Option<&str>, nodes: Vec<PathBuf>) -> Readiness {
            ReadinessProbe::with_roots(
                self.root.join("udc"),
                self.root.join("gadgets"),
                gadget.map(String::from),
                nodes,
            )
            .probe()
        }
    }

    impl Drop for Fixture {
        fn drop(&mut self) {
            let _ = fs::remove_dir_all(&self.root);
        }
    }

    #[test]
    fn test_ready_when_everything_present() {
        let fx = Fixture::new("all");
        fx.add_udc("fe980000.usb");
        fx.add_gadget("hidg", "fe980000.usb");
        let nodes = vec![fx.node("hidg0", true), fx.node("hidg1", true)];

        let r = fx.probe(None, nodes);
        assert!(r.is_ready(), "{}", r.describe());
        assert_eq!(r.udc.as_deref(), Some("fe980000.usb"));
        assert_eq!(
            r.bound_gadget,
            Some(("hidg".to_string(), "fe980000.usb".to_string()))
        );
    }

    #[test]
    fn test_unbound_gadget_not_ready() {
        let fx = Fixture::new("unbound");
        fx.add_udc("fe980000.usb");
        fx.add_gadget("hidg", "");
        let r = fx.probe(None, vec![fx.node("hidg0", true)]);
        assert!(!r.is_ready());
        assert!(r.describe().contains("not bound"));
    }

    #[test]
    fn test_named_gadget_must_be_the_bound_one() {
        let fx = Fixture::new("named");
        fx.add_udc("musb-hdrc.0");
        fx.add_gadget("other", "musb-hdrc.0");
        fx.add_gadget("keyboard", "");
        assert!(!fx.probe(Some("keyboard"), vec![]).is_ready());
        assert!(fx.probe(Some("other"), vec![]).is_ready());
    }

    #[test]
    fn test_binding_check_can_be_skipped() {
        let fx = Fixture::new("nobind");
        fx.add_udc("fe980000.usb");
        let node = fx.node("hidg0", true);
        let probe = ReadinessProbe::with_roots(
            fx.root.join("udc"),
            fx.root.join("gadgets"),
            None,
            vec![node],
        );
        assert!(!probe.probe().is_ready());
        let r = probe.require_binding(false).probe();
        assert!(r.is_ready(), "{}", r.describe());
        assert!(r.bound_gadget.is_none());
    }

    #[test]
    fn test_missing_controller_and_nodes_reported() {
        let fx = Fixture::new("missing");
        fx.add_gadget("hidg", "x");
        let node = fx.node("hidg1", false);
        let r = fx.probe(None, vec![node.clone()]);
        assert!(r.udc.is_none());
        assert_eq!(r.missing_nodes, vec![node]);
        let text = r.describe();
        assert!(text.contains("no USB device controller"));
        assert!(text.contains("hidg1 missing"));
    }

    #[test]
    fn test_absent_configfs_is_not_ready() {
        let probe = ReadinessProbe::with_roots(
            "/nonexistent/udc",
            "/nonexistent/usb_gadget",
            None,
            vec![],
        );
        assert!(!probe.probe().is_ready());
    }
}
