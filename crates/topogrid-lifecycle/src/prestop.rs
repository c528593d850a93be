//! Best-effort cleanup inside a container right before it is stopped.
//!
//! Nothing here can fail a stop: every step is time-bounded and only
//! logged when it does not work out.

use std::time::Duration;

use regex::Regex;
use tracing::{debug, warn};

use topo_core::{ExecCmd, Node};

/// Container label carried by vrnetlab-packaged VM images.
pub const VRNETLAB_VERSION_LABEL: &str = "vrnetlab-version";

const CLEANUP_TIMEOUT: Duration = Duration::from_secs(10);

const IMAGE_TAG_PATTERN: &str = r"^[A-Za-z0-9][A-Za-z0-9._-]*$";

/// Tag part of an image reference, ignoring any digest. `None` when the
/// reference carries no usable tag.
pub fn image_tag(image: &str) -> Option<&str> {
    let image = image.rsplit_once('@').map_or(image, |(name, _)| name);
    let colon = image.rfind(':')?;
    if image.rfind('/').is_some_and(|slash| colon < slash) {
        return None;
    }
    let tag = &image[colon + 1..];
    let re = Regex::new(IMAGE_TAG_PATTERN).ok()?;
    re.is_match(tag).then_some(tag)
}

/// File name of the qcow alias a vrnetlab node expects after a restart.
pub fn qcow_alias_name(image: &str) -> Option<String> {
    image_tag(image).map(|tag| format!("clab-{tag}.qcow2"))
}

async fn is_vrnetlab(node: &dyn Node) -> bool {
    match node.containers().await {
        Ok(containers) => containers
            .iter()
            .any(|c| c.labels.contains_key(VRNETLAB_VERSION_LABEL)),
        Err(e) => {
            debug!(node = %node.short_name(), error = %e, "vrnetlab detection skipped");
            false
        }
    }
}

/// Run `script` through `sh -lc` in the node, bounded by the cleanup timeout.
/// Returns a description of what went wrong, if anything did.
async fn run_script(node: &dyn Node, script: String) -> Option<String> {
    let cmd = ExecCmd::from_args(["sh".to_string(), "-lc".to_string(), script]);
    match tokio::time::timeout(CLEANUP_TIMEOUT, node.run_exec(&cmd)).await {
        Err(_) => Some(format!("timed out after {}s", CLEANUP_TIMEOUT.as_secs())),
        Ok(Err(e)) => Some(e.to_string()),
        Ok(Ok(res)) if res.return_code != 0 => Some(format!(
            "exit code {} (stderr: {})",
            res.return_code,
            res.stderr.trim()
        )),
        Ok(Ok(_)) => None,
    }
}

/// Hardlink the single non-overlay qcow image in `/` to the tag-based
/// alias, unless the alias already exists. vrnetlab nodes rename their
/// image on first boot and look for a versioned name on the next one.
async fn prepare_qcow_alias(node: &dyn Node) {
    let image = &node.config().image;
    let Some(alias) = qcow_alias_name(image) else {
        debug!(node = %node.short_name(), image = %image, "no usable image tag, qcow alias skipped");
        return;
    };

    let script = format!(
        r#"dst="/{alias}"
[ -e "$dst" ] && exit 0
if [ -f /sros.qcow2 ] && [ "$dst" != /sros.qcow2 ]; then
  ln /sros.qcow2 "$dst"; exit $?
fi
found=""
for img in /*.qcow2; do
  [ -f "$img" ] || continue
  [ "$img" = "$dst" ] && continue
  case "${{img##*/}}" in *overlay*) continue ;; esac
  [ -n "$found" ] && exit 0
  found="$img"
done
[ -n "$found" ] && ln "$found" "$dst"
exit 0"#
    );

    if let Some(problem) = run_script(node, script).await {
        warn!(node = %node.short_name(), alias = %alias, problem = %problem, "qcow alias preparation failed");
    }
}

/// Lazily unmount and remove named namespaces the container created under
/// its own `/run/netns`; stale nsfs mounts there break the next start.
async fn cleanup_named_netns(node: &dyn Node) {
    let script = r#"[ -d /run/netns ] || exit 0
awk '$5 ~ "^/run/netns/" { print $5 }' /proc/self/mountinfo 2>/dev/null |
while IFS= read -r mnt; do
  umount -l "$mnt" 2>/dev/null
  rm -f "$mnt" 2>/dev/null
done
rm -f /run/netns/* 2>/dev/null
exit 0"#;

    if let Some(problem) = run_script(node, script.to_string()).await {
        debug!(node = %node.short_name(), problem = %problem, "named netns cleanup skipped");
    }
}

pub async fn pre_stop_cleanup(node: &dyn Node) {
    if is_vrnetlab(node).await {
        prepare_qcow_alias(node).await;
    }
    cleanup_named_netns(node).await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use topo_core::testing::{FakeNode, FakeRuntime};

    use super::*;

    #[test]
    fn tags_are_extracted_from_references() {
        assert_eq!(image_tag("vrnetlab/nokia_sros:23.10.R1"), Some("23.10.R1"));
        assert_eq!(
            image_tag("registry:5000/vr/sros:24.3@sha256:abcdef"),
            Some("24.3")
        );
        assert_eq!(image_tag("registry:5000/vr/sros"), None);
        assert_eq!(image_tag("alpine"), None);
        assert_eq!(image_tag("alpine:"), None);
        assert_eq!(image_tag("alpine:-bad"), None);
        assert_eq!(image_tag("alpine:we/ird"), None);
    }

    #[test]
    fn alias_name_embeds_tag() {
        assert_eq!(
            qcow_alias_name("vrnetlab/cisco_xrv9k:7.11.1").as_deref(),
            Some("clab-7.11.1.qcow2")
        );
        assert_eq!(qcow_alias_name("vrnetlab/cisco_xrv9k"), None);
    }

    #[tokio::test]
    async fn vrnetlab_nodes_get_qcow_alias() {
        let rt = Arc::new(FakeRuntime::new("docker"));
        let node = FakeNode::new("sr1", "t", rt)
            .with_image("vrnetlab/nokia_sros:23.10.R1")
            .with_label(VRNETLAB_VERSION_LABEL, "0.16");

        pre_stop_cleanup(&node).await;
        let execs: Vec<String> = node
            .events()
            .events()
            .into_iter()
            .filter(|e| e.starts_with("sr1:exec sh -lc"))
            .collect();
        assert_eq!(execs.len(), 2);
        assert!(execs[0].contains("clab-23.10.R1.qcow2"));
        assert!(execs[1].contains("/proc/self/mountinfo"));
    }

    #[tokio::test]
    async fn plain_nodes_only_get_netns_cleanup() {
        let rt = Arc::new(FakeRuntime::new("docker"));
        let node = FakeNode::new("l1", "t", rt);

        pre_stop_cleanup(&node).await;
        let execs: Vec<String> = node
            .events()
            .events()
            .into_iter()
            .filter(|e| e.contains(":exec "))
            .collect();
        assert_eq!(execs.len(), 1);
        assert!(!execs[0].contains("qcow2"));
    }
}
