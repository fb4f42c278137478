//! Pod descriptors returned by a node listing, and the matchers that select the
//! cohort of pods the inhibitor waits for.
use std::collections::BTreeMap;
use std::fmt;

use k8s_openapi::api::core::v1::Pod as KubePod;

/// Label that marks pods whose presence postpones the node shutdown.
pub const INHIBIT_NODE_SHUTDOWN_LABEL: &str = "pod.deckhouse.io/inhibit-node-shutdown";

/// The lifecycle phase of a pod.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Accepted but not all containers are running yet.
    Pending,
    /// Bound to a node with at least one container running.
    Running,
    /// All containers terminated successfully.
    Succeeded,
    /// All containers terminated, at least one in failure.
    Failed,
    /// The phase could not be determined.
    Unknown,
}

impl Phase {
    fn from_status(phase: Option<&str>) -> Self {
        match phase {
            Some("Pending") => Phase::Pending,
            Some("Running") => Phase::Running,
            Some("Succeeded") => Phase::Succeeded,
            Some("Failed") => Phase::Failed,
            _ => Phase::Unknown,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// A pod scheduled on the node, as returned by the listing.
///
/// Only the fields needed to pick the cohort are exposed: identity, labels
/// and phase.
#[derive(Clone, Debug, Default)]
pub struct Pod(KubePod);

impl Pod {
    /// Wrap a pod returned by the API.
    pub fn new(inner: KubePod) -> Pod {
        Pod(inner)
    }

    /// The pod name, empty if the API omitted it.
    pub fn name(&self) -> &str {
        self.0.metadata.name.as_deref().unwrap_or_default()
    }

    /// The pod namespace, `default` when the object does not carry one.
    pub fn namespace(&self) -> &str {
        self.0.metadata.namespace.as_deref().unwrap_or("default")
    }

    /// The pod labels. Matchers only look at the keys.
    pub fn labels(&self) -> &BTreeMap<String, String> {
        self.0.metadata.labels.as_ref().unwrap_or(&EMPTY_MAP)
    }

    /// The phase reported in the pod status, [`Phase::Unknown`] without one.
    pub fn phase(&self) -> Phase {
        Phase::from_status(
            self.0
                .status
                .as_ref()
                .and_then(|status| status.phase.as_deref()),
        )
    }

    /// The underlying API object.
    pub fn as_kube_pod(&self) -> &KubePod {
        &self.0
    }
}

impl From<KubePod> for Pod {
    fn from(api_pod: KubePod) -> Self {
        Self(api_pod)
    }
}

impl fmt::Display for Pod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace(), self.name())
    }
}

static EMPTY_MAP: BTreeMap<String, String> = BTreeMap::new();

/// A predicate over a pod. Matchers are combined with a logical AND.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PodMatcher {
    /// The pod carries the label, whatever its value.
    LabelPresent(String),
    /// The pod is in the `Running` phase.
    PhaseRunning,
}

impl PodMatcher {
    /// Whether the pod satisfies this matcher.
    pub fn matches(&self, pod: &Pod) -> bool {
        match self {
            PodMatcher::LabelPresent(key) => pod.labels().contains_key(key),
            PodMatcher::PhaseRunning => pod.phase() == Phase::Running,
        }
    }
}

/// The pods of `pods` that satisfy every matcher.
///
/// An empty matcher list selects nothing: without a predicate there is no
/// cohort to wait for.
pub fn select<'a>(pods: &'a [Pod], matchers: &'a [PodMatcher]) -> impl Iterator<Item = &'a Pod> {
    pods.iter()
        .filter(move |pod| !matchers.is_empty() && matchers.iter().all(|m| m.matches(pod)))
}
