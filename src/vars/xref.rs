//! Cross-references to values published by other nodes and instances
//!
//! `instances:<node>` reads a node's instance count, `ip:<node>-<index>` and
//! `mac:<node>-<index>` read an instance's network identity. When the target
//! has not published the value yet, the lookup waits until it does or until
//! the target stops, whichever comes first. An instance also counts as stopped
//! once its node has. Malformed references never wait.

use super::{LocalScope, VarContext, VarProvider};
use crate::orchestrator::{InstanceState, NodeState};
use async_trait::async_trait;

/// Provider keys served by [`CrossReference`]
pub const PREFIXES: [&str; 3] = ["instances", "ip", "mac"];

/// Resolves node and instance cross-references
pub struct CrossReference;

#[async_trait]
impl VarProvider for CrossReference {
    async fn query(&self, prefix: &str, reference: &str, ctx: &VarContext<'_>) -> Option<String> {
        match prefix {
            "instances" => query_node(ctx, reference, prefix).await,
            "ip" | "mac" => query_instance(ctx, reference, prefix).await,
            _ => None,
        }
    }
}

/// Split `<node>-<index>` on the last `-`
pub fn parse_instance_ref(reference: &str) -> Option<(&str, usize)> {
    let (node, index) = reference.rsplit_once('-')?;
    if node.is_empty() {
        return None;
    }
    Some((node, index.parse().ok()?))
}

async fn query_node(ctx: &VarContext<'_>, reference: &str, key: &str) -> Option<String> {
    let target = ctx.run.node_by_name(reference)?;
    let own = ctx.node.is_some_and(|n| std::ptr::eq(n, target));
    wait_published(ctx, target.vars(), key, own, || target.is_stopped()).await
}

async fn query_instance(ctx: &VarContext<'_>, reference: &str, key: &str) -> Option<String> {
    let (node_name, index) = parse_instance_ref(reference)?;
    let node: &NodeState = ctx.run.node_by_name(node_name)?;
    let target: &InstanceState = node.instances().get(index)?;
    let own = ctx.instance.is_some_and(|i| std::ptr::eq(i, target));
    // A node that failed before launching never starts its instances
    wait_published(ctx, target.vars(), key, own, || {
        target.is_stopped() || node.is_stopped()
    })
    .await
}

async fn wait_published(
    ctx: &VarContext<'_>,
    scope: &LocalScope,
    key: &str,
    own: bool,
    stopped: impl Fn() -> bool,
) -> Option<String> {
    if let Some(value) = scope.get(key) {
        return Some(value);
    }
    if own {
        return None;
    }
    ctx.run
        .coordinator()
        .wait_for(|| scope.get(key), stopped)
        .await
}
