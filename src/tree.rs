//! Agent hierarchy / router (C9).
//!
//! Generalizes `agents::spawner`'s `lane_id`/session-key pattern and
//! spawn-depth cap into a persistent named tree: nodes live in a
//! `HashMap<String, AgentNode>` owned by the tree and reference each other by
//! name, never by back-pointer, per SPEC_FULL.md §9's redesign flag against
//! cyclic parent/child references.

use std::collections::HashMap;
use std::time::Duration;

use tracing::warn;

use crate::config::manifest::BundleManifest;
use crate::llm::Message;

#[derive(Debug, thiserror::Error)]
pub enum TreeError {
    #[error("agent node '{0}' not found")]
    NoSuchNode(String),
    #[error("'{child}' is not a declared child of '{parent}'")]
    NotAChild { parent: String, child: String },
    #[error("distributed delegate call to '{0}' failed: {1}")]
    Delegate(String, String),
    #[error("distributed delegate call to '{0}' timed out")]
    DelegateTimeout(String),
}

/// Per-node LLM configuration; inherits the parent's transport when a field
/// is absent (the config-loader contract in §4.10).
#[derive(Debug, Clone, Default)]
pub struct NodeLlmConfig {
    pub base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
}

/// A node's distributed identity: when present, the node is a separate
/// process reached over HTTP instead of served in-process.
#[derive(Debug, Clone)]
pub struct RemoteAgent {
    pub url: String,
    pub auth_token: Option<String>,
}

pub struct AgentNode {
    pub name: String,
    pub children: Vec<String>,
    pub llm: NodeLlmConfig,
    pub mcp_servers: Vec<String>,
    pub remote: Option<RemoteAgent>,
    /// Own conversation memory; never copied or cleared by navigation.
    memory: Vec<Message>,
}

impl AgentNode {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            children: Vec::new(),
            llm: NodeLlmConfig::default(),
            mcp_servers: Vec::new(),
            remote: None,
            memory: Vec::new(),
        }
    }

    pub fn memory(&self) -> &[Message] {
        &self.memory
    }

    pub fn push_memory(&mut self, message: Message) {
        self.memory.push(message);
    }
}

/// In-process navigation stack holding the path from root to the currently
/// addressed node.
pub struct NavigationStack {
    path: Vec<String>,
}

impl NavigationStack {
    fn new(root: String) -> Self {
        Self { path: vec![root] }
    }

    pub fn current(&self) -> &str {
        self.path.last().expect("navigation stack always has a root")
    }

    pub fn depth(&self) -> usize {
        self.path.len()
    }
}

pub struct AgentTree {
    nodes: HashMap<String, AgentNode>,
    root: String,
}

impl AgentTree {
    pub fn new(root: AgentNode) -> Self {
        let root_name = root.name.clone();
        let mut nodes = HashMap::new();
        nodes.insert(root_name.clone(), root);
        Self { nodes, root: root_name }
    }

    pub fn root_name(&self) -> &str {
        &self.root
    }

    /// Build a tree rooted at `root_name` from a deployed bundle's declared
    /// `sub_agents`. Each sub-agent is a remote node (SubAgentSection has no
    /// local runtime config, only a URL) with no further nesting — the
    /// manifest format does not support declaring grandchildren.
    pub fn from_manifest(root_name: &str, manifest: &BundleManifest) -> Self {
        let mut root = AgentNode::new(root_name);
        root.llm.base_url = manifest.llm.base_url.clone();
        root.llm.model = manifest.llm.model.clone();
        root.llm.temperature = Some(manifest.llm.temperature);
        root.mcp_servers = manifest.mcp_servers.keys().cloned().collect();

        let mut tree = Self::new(root);
        for (name, section) in &manifest.sub_agents {
            let mut child = AgentNode::new(name.clone());
            child.remote = Some(RemoteAgent {
                url: section.url.clone(),
                auth_token: section.auth_token.clone(),
            });
            let _ = tree.add_child(root_name, child);
        }
        tree
    }

    /// Register `child` under `parent`'s declared children. Both must already
    /// exist as nodes; `child` is inserted if not already present.
    pub fn add_child(&mut self, parent: &str, child: AgentNode) -> Result<(), TreeError> {
        let child_name = child.name.clone();
        if !self.nodes.contains_key(parent) {
            return Err(TreeError::NoSuchNode(parent.to_string()));
        }
        self.nodes.insert(child_name.clone(), child);
        self.nodes
            .get_mut(parent)
            .expect("checked above")
            .children
            .push(child_name);
        Ok(())
    }

    pub fn node(&self, name: &str) -> Option<&AgentNode> {
        self.nodes.get(name)
    }

    pub fn node_mut(&mut self, name: &str) -> Option<&mut AgentNode> {
        self.nodes.get_mut(name)
    }

    pub fn navigation_from_root(&self) -> NavigationStack {
        NavigationStack::new(self.root.clone())
    }

    /// Push `child` onto the navigation stack; fails if `child` is not a
    /// declared child of the node currently addressed.
    pub fn switch_to(&self, nav: &mut NavigationStack, child: &str) -> Result<(), TreeError> {
        let current = nav.current().to_string();
        let current_node = self.nodes.get(&current).ok_or_else(|| TreeError::NoSuchNode(current.clone()))?;
        if !current_node.children.iter().any(|c| c == child) {
            return Err(TreeError::NotAChild { parent: current, child: child.to_string() });
        }
        nav.path.push(child.to_string());
        Ok(())
    }

    /// Pop the navigation stack. A no-op (with a warning, not an error) when
    /// already at the root — matching §4.9's "back at the root is a no-op
    /// with a warning" behavior.
    pub fn back(&self, nav: &mut NavigationStack) {
        if nav.path.len() <= 1 {
            warn!("navigation back requested at root '{}'; ignoring", self.root);
            return;
        }
        nav.path.pop();
    }

    /// Tools/children/capabilities visible to the operator at the currently
    /// addressed node only — never ancestors' or siblings'.
    pub fn visible_children(&self, nav: &NavigationStack) -> &[String] {
        self.nodes
            .get(nav.current())
            .map(|n| n.children.as_slice())
            .unwrap_or(&[])
    }

    /// Deliver a distributed delegation call to a remote child over HTTP,
    /// enforcing a per-call timeout and surfacing the child's error intact.
    pub async fn delegate_remote(
        &self,
        client: &reqwest::Client,
        child: &str,
        messages: &[Message],
        timeout: Duration,
    ) -> Result<Message, TreeError> {
        let node = self.nodes.get(child).ok_or_else(|| TreeError::NoSuchNode(child.to_string()))?;
        let remote = node
            .remote
            .as_ref()
            .ok_or_else(|| TreeError::Delegate(child.to_string(), "node has no remote URL configured".to_string()))?;

        let mut request = client
            .post(format!("{}/api/chat", remote.url.trim_end_matches('/')))
            .json(&serde_json::json!({ "model": child, "messages": messages, "stream": false }));
        if let Some(token) = &remote.auth_token {
            request = request.bearer_auth(token);
        }

        let response = tokio::time::timeout(timeout, request.send())
            .await
            .map_err(|_| TreeError::DelegateTimeout(child.to_string()))?
            .map_err(|e| TreeError::Delegate(child.to_string(), e.to_string()))?;

        if !response.status().is_success() {
            return Err(TreeError::Delegate(child.to_string(), format!("status {}", response.status())));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| TreeError::Delegate(child.to_string(), e.to_string()))?;
        let content = body
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(|c| c.as_str())
            .unwrap_or_default();
        Ok(Message::assistant(content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn build_tree() -> AgentTree {
        let mut tree = AgentTree::new(AgentNode::new("root"));
        tree.add_child("root", AgentNode::new("helper")).unwrap();
        tree.add_child("root", AgentNode::new("researcher")).unwrap();
        tree.add_child("helper", AgentNode::new("helper-sub")).unwrap();
        tree
    }

    #[test]
    fn switch_to_declared_child_succeeds() {
        let tree = build_tree();
        let mut nav = tree.navigation_from_root();
        tree.switch_to(&mut nav, "helper").unwrap();
        assert_eq!(nav.current(), "helper");
    }

    #[test]
    fn switch_to_undeclared_child_fails() {
        let tree = build_tree();
        let mut nav = tree.navigation_from_root();
        let err = tree.switch_to(&mut nav, "researcher-sub").unwrap_err();
        assert!(matches!(err, TreeError::NotAChild { .. }));
    }

    #[test]
    fn switch_to_is_scoped_to_current_node_not_ancestors() {
        let tree = build_tree();
        let mut nav = tree.navigation_from_root();
        tree.switch_to(&mut nav, "helper").unwrap();
        // "researcher" is root's child, not helper's — must fail from here.
        let err = tree.switch_to(&mut nav, "researcher").unwrap_err();
        assert!(matches!(err, TreeError::NotAChild { .. }));
    }

    #[test]
    fn back_at_root_is_a_no_op() {
        let tree = build_tree();
        let mut nav = tree.navigation_from_root();
        tree.back(&mut nav);
        assert_eq!(nav.current(), "root");
        assert_eq!(nav.depth(), 1);
    }

    #[test]
    fn back_pops_one_level() {
        let tree = build_tree();
        let mut nav = tree.navigation_from_root();
        tree.switch_to(&mut nav, "helper").unwrap();
        tree.switch_to(&mut nav, "helper-sub").unwrap();
        tree.back(&mut nav);
        assert_eq!(nav.current(), "helper");
    }

    #[test]
    fn memory_is_isolated_per_node_and_restored_on_return() {
        let mut tree = build_tree();
        tree.node_mut("helper").unwrap().push_memory(Message::user("hi helper"));
        tree.node_mut("researcher").unwrap().push_memory(Message::user("hi researcher"));

        assert_eq!(tree.node("helper").unwrap().memory().len(), 1);
        assert_eq!(tree.node("researcher").unwrap().memory().len(), 1);
        assert_eq!(tree.node("helper").unwrap().memory()[0].content, "hi helper");
    }

    #[test]
    fn from_manifest_builds_remote_children_from_sub_agents() {
        use crate::config::manifest::SubAgentSection;

        let mut manifest = BundleManifest::default();
        manifest.sub_agents.insert(
            "billing".to_string(),
            SubAgentSection {
                name: "billing".to_string(),
                url: "http://127.0.0.1:9100".to_string(),
                auth_token: Some("tok".to_string()),
            },
        );
        let tree = AgentTree::from_manifest("support", &manifest);
        assert_eq!(tree.root_name(), "support");
        let child = tree.node("billing").unwrap();
        assert_eq!(child.remote.as_ref().unwrap().url, "http://127.0.0.1:9100");
    }

    #[test]
    fn visible_children_reflect_only_current_node() {
        let tree = build_tree();
        let mut nav = tree.navigation_from_root();
        tree.switch_to(&mut nav, "helper").unwrap();
        let visible = tree.visible_children(&nav);
        assert_eq!(visible, ["helper-sub"]);
    }
}
