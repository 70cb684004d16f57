//! Lifecycle states and operations for node and relationship instances.
//!
//! The forward path for a node instance is
//! `Initial -> Creating -> Created -> Configuring -> Configured -> Starting -> Started`,
//! mirrored on teardown as
//! `Started -> Stopping -> Configured -> Deleting -> Deleted`.
//!
//! Each operation knows the states it may start from, the in-progress state
//! it sets before the provider call, and the settled state it sets after the
//! call returns successfully.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a node instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeState {
    /// Not yet created
    Initial,
    /// Create operation in progress
    Creating,
    /// Created, not yet configured
    Created,
    /// Configure operation in progress
    Configuring,
    /// Configured, not yet started
    Configured,
    /// Start operation in progress
    Starting,
    /// Up and running
    Started,
    /// Stop operation in progress
    Stopping,
    /// Delete operation in progress
    Deleting,
    /// Deleted; the instance is about to leave the model
    Deleted,
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Initial => "initial",
            NodeState::Creating => "creating",
            NodeState::Created => "created",
            NodeState::Configuring => "configuring",
            NodeState::Configured => "configured",
            NodeState::Starting => "starting",
            NodeState::Started => "started",
            NodeState::Stopping => "stopping",
            NodeState::Deleting => "deleting",
            NodeState::Deleted => "deleted",
        };
        write!(f, "{name}")
    }
}

/// Built-in lifecycle operations on a node instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeOperation {
    /// Provision the underlying resource
    Create,
    /// Configure the created resource
    Configure,
    /// Bring the resource up
    Start,
    /// Bring the resource down
    Stop,
    /// Release the underlying resource
    Delete,
}

impl NodeOperation {
    /// Operation name as dispatched through the operation registry
    pub fn name(&self) -> &'static str {
        match self {
            NodeOperation::Create => "create",
            NodeOperation::Configure => "configure",
            NodeOperation::Start => "start",
            NodeOperation::Stop => "stop",
            NodeOperation::Delete => "delete",
        }
    }

    /// States this operation may legally start from
    pub fn required_states(&self) -> &'static [NodeState] {
        match self {
            NodeOperation::Create => &[NodeState::Initial],
            NodeOperation::Configure => &[NodeState::Created],
            NodeOperation::Start => &[NodeState::Configured],
            NodeOperation::Stop => &[NodeState::Started],
            NodeOperation::Delete => &[NodeState::Configured],
        }
    }

    /// State set before the provider operation is invoked
    pub fn in_progress_state(&self) -> NodeState {
        match self {
            NodeOperation::Create => NodeState::Creating,
            NodeOperation::Configure => NodeState::Configuring,
            NodeOperation::Start => NodeState::Starting,
            NodeOperation::Stop => NodeState::Stopping,
            NodeOperation::Delete => NodeState::Deleting,
        }
    }

    /// State set after the provider operation returns successfully
    pub fn settled_state(&self) -> NodeState {
        match self {
            NodeOperation::Create => NodeState::Created,
            NodeOperation::Configure => NodeState::Configured,
            NodeOperation::Start => NodeState::Started,
            NodeOperation::Stop => NodeState::Configured,
            NodeOperation::Delete => NodeState::Deleted,
        }
    }

    /// Teardown operations make best-effort progress and swallow failures
    pub fn is_teardown(&self) -> bool {
        matches!(self, NodeOperation::Stop | NodeOperation::Delete)
    }
}

impl fmt::Display for NodeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Lifecycle state of a relationship instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipState {
    /// Not yet established; also the terminal state after unlink
    Initial,
    /// Establishment has begun
    Establishing,
    /// Pre-configure hooks in progress
    PreConfiguring,
    /// Pre-configure hooks done
    PreConfigured,
    /// Post-configure hooks in progress
    PostConfiguring,
    /// Post-configure hooks done
    PostConfigured,
    /// Fully established
    Established,
    /// Unlink hooks in progress
    Unlinking,
}

impl fmt::Display for RelationshipState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RelationshipState::Initial => "initial",
            RelationshipState::Establishing => "establishing",
            RelationshipState::PreConfiguring => "preConfiguring",
            RelationshipState::PreConfigured => "preConfigured",
            RelationshipState::PostConfiguring => "postConfiguring",
            RelationshipState::PostConfigured => "postConfigured",
            RelationshipState::Established => "established",
            RelationshipState::Unlinking => "unlinking",
        };
        write!(f, "{name}")
    }
}

/// Phased operations on a relationship instance.
///
/// Each phase drives the source-side hook and then the target-side hook of
/// the relationship type (e.g. `PreConfigure` covers `pre_configure_source`
/// and `pre_configure_target`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RelationshipOperation {
    /// Pre-configure hooks, run once both endpoints are created
    PreConfigure,
    /// Post-configure hooks, run after the source has started
    PostConfigure,
    /// The `add_source`/`add_target` hooks that settle the relationship
    Link,
    /// The `remove_source`/`remove_target` hooks before endpoint teardown
    Unlink,
}

impl RelationshipOperation {
    /// Operation name used for logging and events
    pub fn name(&self) -> &'static str {
        match self {
            RelationshipOperation::PreConfigure => "pre_configure",
            RelationshipOperation::PostConfigure => "post_configure",
            RelationshipOperation::Link => "link",
            RelationshipOperation::Unlink => "unlink",
        }
    }

    /// States this operation may legally start from
    pub fn required_states(&self) -> &'static [RelationshipState] {
        match self {
            RelationshipOperation::PreConfigure => &[RelationshipState::Initial],
            RelationshipOperation::PostConfigure => &[RelationshipState::PreConfigured],
            RelationshipOperation::Link => &[RelationshipState::PostConfigured],
            RelationshipOperation::Unlink => &[RelationshipState::Established],
        }
    }

    /// In-progress state hops recorded, in order, before the hooks run.
    ///
    /// `PreConfigure` records the `Establishing` hop on entry so the full
    /// establishment bracket is observable.
    pub fn in_progress_states(&self) -> &'static [RelationshipState] {
        match self {
            RelationshipOperation::PreConfigure => {
                &[RelationshipState::Establishing, RelationshipState::PreConfiguring]
            }
            RelationshipOperation::PostConfigure => &[RelationshipState::PostConfiguring],
            RelationshipOperation::Link => &[],
            RelationshipOperation::Unlink => &[RelationshipState::Unlinking],
        }
    }

    /// State set after all hooks of the phase returned successfully
    pub fn settled_state(&self) -> RelationshipState {
        match self {
            RelationshipOperation::PreConfigure => RelationshipState::PreConfigured,
            RelationshipOperation::PostConfigure => RelationshipState::PostConfigured,
            RelationshipOperation::Link => RelationshipState::Established,
            RelationshipOperation::Unlink => RelationshipState::Initial,
        }
    }

    /// Provider hook operations dispatched by this phase, source side first
    pub fn hook_operations(&self) -> [&'static str; 2] {
        match self {
            RelationshipOperation::PreConfigure => {
                ["pre_configure_source", "pre_configure_target"]
            }
            RelationshipOperation::PostConfigure => {
                ["post_configure_source", "post_configure_target"]
            }
            RelationshipOperation::Link => ["add_source", "add_target"],
            RelationshipOperation::Unlink => ["remove_source", "remove_target"],
        }
    }

    /// Whether this phase is part of teardown (failures are swallowed)
    pub fn is_teardown(&self) -> bool {
        matches!(self, RelationshipOperation::Unlink)
    }
}

impl fmt::Display for RelationshipOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}
