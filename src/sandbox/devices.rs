//! Device nodes created inside the sandbox
//!
//! Only these nodes exist under the sandbox's `/dev`. Host block devices are
//! deliberately absent so an installer script cannot reach them.

use std::path::Path;

use crate::error::{Result, resource};
use crate::host::{DeviceNode, Host, NodeKind};

const fn node(name: &'static str, kind: NodeKind, major: u64, minor: u64) -> DeviceNode {
    DeviceNode {
        name,
        kind,
        major,
        minor,
        mode: 0o644,
    }
}

pub const DEVICE_NODES: [DeviceNode; 10] = [
    node("console", NodeKind::Char, 5, 1),
    node("null", NodeKind::Char, 1, 3),
    node("ptmx", NodeKind::Char, 5, 2),
    node("random", NodeKind::Char, 1, 8),
    node("tty", NodeKind::Char, 5, 0),
    node("urandom", NodeKind::Char, 1, 9),
    node("zero", NodeKind::Char, 1, 5),
    // Loop devices for installers that mount images themselves
    node("loop0", NodeKind::Block, 7, 0),
    node("loop1", NodeKind::Block, 7, 1),
    node("loop2", NodeKind::Block, 7, 2),
];

/// Create every node of [`DEVICE_NODES`] in `dev`
pub fn create_device_nodes(host: &dyn Host, dev: &Path) -> Result<()> {
    for node in &DEVICE_NODES {
        let path = dev.join(node.name);
        host.make_node(&path, node)
            .map_err(resource::with("create device node", &path))?;
    }
    Ok(())
}
