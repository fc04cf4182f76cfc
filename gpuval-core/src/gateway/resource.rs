//! Resource addressing for gateway calls

use std::fmt;

/// Kubernetes resource type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ResourceKind {
    /// API group (empty for the core group)
    pub group: &'static str,
    pub version: &'static str,
    pub kind: &'static str,
    /// Lowercase plural resource name
    pub plural: &'static str,
    /// Whether instances live in a namespace
    pub namespaced: bool,
}

impl ResourceKind {
    pub const POD: ResourceKind = ResourceKind {
        group: "",
        version: "v1",
        kind: "Pod",
        plural: "pods",
        namespaced: true,
    };

    pub const NODE: ResourceKind = ResourceKind {
        group: "",
        version: "v1",
        kind: "Node",
        plural: "nodes",
        namespaced: false,
    };

    pub const DAEMON_SET: ResourceKind = ResourceKind {
        group: "apps",
        version: "v1",
        kind: "DaemonSet",
        plural: "daemonsets",
        namespaced: true,
    };

    /// OLM operator install record
    pub const CLUSTER_SERVICE_VERSION: ResourceKind = ResourceKind {
        group: "operators.coreos.com",
        version: "v1alpha1",
        kind: "ClusterServiceVersion",
        plural: "clusterserviceversions",
        namespaced: true,
    };

    pub const NODE_FEATURE_DISCOVERY: ResourceKind = ResourceKind {
        group: "nfd.openshift.io",
        version: "v1",
        kind: "NodeFeatureDiscovery",
        plural: "nodefeaturediscoveries",
        namespaced: true,
    };

    /// GPU operator cluster-wide configuration
    pub const CLUSTER_POLICY: ResourceKind = ResourceKind {
        group: "nvidia.com",
        version: "v1",
        kind: "ClusterPolicy",
        plural: "clusterpolicies",
        namespaced: false,
    };

    /// Name accepted by `oc get` / `kubectl get`
    pub fn cli_name(&self) -> String {
        if self.group.is_empty() {
            self.plural.to_string()
        } else {
            format!("{}.{}", self.plural, self.group)
        }
    }

    /// `group/version`, or just `version` for the core group
    pub fn api_version(&self) -> String {
        if self.group.is_empty() {
            self.version.to_string()
        } else {
            format!("{}/{}", self.group, self.version)
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.kind)
    }
}

/// Read query against a resource type
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceQuery {
    pub kind: ResourceKind,
    pub namespace: Option<String>,
    /// Fetch a single object instead of a collection
    pub name: Option<String>,
    pub label_selector: Option<String>,
}

impl ResourceQuery {
    /// Query a whole collection
    pub fn list(kind: ResourceKind) -> Self {
        Self {
            kind,
            namespace: None,
            name: None,
            label_selector: None,
        }
    }

    /// Query a single named object
    pub fn named(kind: ResourceKind, name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::list(kind)
        }
    }

    pub fn in_namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn with_selector(mut self, selector: impl Into<String>) -> Self {
        self.label_selector = Some(selector.into());
        self
    }
}

impl fmt::Display for ResourceQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.kind.cli_name())?;
        if let Some(name) = &self.name {
            write!(f, "/{}", name)?;
        }
        if let Some(namespace) = &self.namespace {
            write!(f, " -n {}", namespace)?;
        }
        if let Some(selector) = &self.label_selector {
            write!(f, " -l {}", selector)?;
        }
        Ok(())
    }
}

/// Reference to a single object
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceRef {
    pub kind: ResourceKind,
    pub name: String,
    pub namespace: Option<String>,
}

impl ResourceRef {
    pub fn pod(name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind: ResourceKind::POD,
            name: name.into(),
            namespace: Some(namespace.into()),
        }
    }

    /// Read query for this object
    pub fn query(&self) -> ResourceQuery {
        ResourceQuery {
            kind: self.kind,
            namespace: self.namespace.clone(),
            name: Some(self.name.clone()),
            label_selector: None,
        }
    }
}

impl fmt::Display for ResourceRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(namespace) => write!(f, "{}/{}/{}", self.kind.plural, namespace, self.name),
            None => write!(f, "{}/{}", self.kind.plural, self.name),
        }
    }
}
