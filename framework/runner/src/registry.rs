use std::fmt;

/// The kinds of cloud object a run can create or discover.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Network,
    Subnet,
    Gateway,
    RouteTable,
    SecurityGroup,
    NetworkInterface,
    IamRole,
    RegistryRepo,
    Cluster,
    NodePool,
    ComputeInstance,
    LoadBalancer,
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceKind::Network => "network",
            ResourceKind::Subnet => "subnet",
            ResourceKind::Gateway => "gateway",
            ResourceKind::RouteTable => "route-table",
            ResourceKind::SecurityGroup => "security-group",
            ResourceKind::NetworkInterface => "network-interface",
            ResourceKind::IamRole => "iam-role",
            ResourceKind::RegistryRepo => "registry-repo",
            ResourceKind::Cluster => "cluster",
            ResourceKind::NodePool => "node-pool",
            ResourceKind::ComputeInstance => "compute-instance",
            ResourceKind::LoadBalancer => "load-balancer",
        };
        f.write_str(name)
    }
}

/// Lifecycle of a handle. Declaration order is the forward direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum HandleState {
    Requested,
    Creating,
    Active,
    Deleting,
    Absent,
}

impl HandleState {
    /// Forward moves only, plus `Deleting -> Active` when a delete fails and will be retried.
    pub fn can_transition_to(self, next: HandleState) -> bool {
        next > self || (self == HandleState::Deleting && next == HandleState::Active)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct HandleId(usize);

/// One cloud object the run knows about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Handle {
    id: HandleId,
    kind: ResourceKind,
    identifier: String,
    owned: bool,
    state: HandleState,
}

impl Handle {
    pub fn id(&self) -> HandleId {
        self.id
    }

    pub fn kind(&self) -> ResourceKind {
        self.kind
    }

    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// True only if this run created the object and is responsible for deleting it.
    pub fn owned(&self) -> bool {
        self.owned
    }

    pub fn state(&self) -> HandleState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.state != HandleState::Absent
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.identifier)
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("unknown handle {0:?}")]
    UnknownHandle(HandleId),
    #[error("{handle} cannot move from {from:?} to {to:?}")]
    InvalidTransition {
        handle: String,
        from: HandleState,
        to: HandleState,
    },
}

/// Append-only record of every cloud object created or discovered during a run.
///
/// Handles are never removed, only moved to [HandleState::Absent], so teardown can always
/// enumerate everything that ever existed. Register a handle as soon as the create call returns,
/// before any other fallible step.
#[derive(Debug, Default)]
pub struct Registry {
    handles: Vec<Handle>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: ResourceKind, identifier: &str, owned: bool) -> Handle {
        let handle = Handle {
            id: HandleId(self.handles.len()),
            kind,
            identifier: identifier.to_string(),
            owned,
            state: HandleState::Active,
        };
        log::info!(
            "Registered {handle} ({})",
            if owned { "owned" } else { "reused" }
        );
        self.handles.push(handle.clone());
        handle
    }

    /// Record an object this run created.
    pub fn register(&mut self, kind: ResourceKind, identifier: &str) -> Handle {
        self.push(kind, identifier, true)
    }

    /// Record an object that already existed and is only used by this run. Never deleted.
    pub fn register_reused(&mut self, kind: ResourceKind, identifier: &str) -> Handle {
        self.push(kind, identifier, false)
    }

    /// Record an object found by query that this run is responsible for, unless it is already
    /// known.
    pub fn register_discovered(&mut self, kind: ResourceKind, identifier: &str) -> Handle {
        match self.find(kind, identifier) {
            Some(existing) => existing.clone(),
            None => self.register(kind, identifier),
        }
    }

    /// Mark a handle absent without deleting anything, for objects found to be gone already.
    pub fn forget(&mut self, id: HandleId) -> Result<(), RegistryError> {
        let handle = self.get_mut(id)?;
        handle.state = HandleState::Absent;
        Ok(())
    }

    pub(crate) fn transition(&mut self, id: HandleId, to: HandleState) -> Result<(), RegistryError> {
        let handle = self.get_mut(id)?;
        if !handle.state.can_transition_to(to) {
            return Err(RegistryError::InvalidTransition {
                handle: handle.to_string(),
                from: handle.state,
                to,
            });
        }
        handle.state = to;
        Ok(())
    }

    /// Every handle in creation order.
    pub fn all(&self) -> &[Handle] {
        &self.handles
    }

    pub fn get(&self, id: HandleId) -> Option<&Handle> {
        self.handles.get(id.0)
    }

    fn get_mut(&mut self, id: HandleId) -> Result<&mut Handle, RegistryError> {
        self.handles
            .get_mut(id.0)
            .ok_or(RegistryError::UnknownHandle(id))
    }

    pub fn find(&self, kind: ResourceKind, identifier: &str) -> Option<&Handle> {
        self.handles
            .iter()
            .find(|h| h.kind == kind && h.identifier == identifier)
    }

    /// Handles of `kind` that are not absent, in creation order.
    pub fn live(&self, kind: ResourceKind) -> impl Iterator<Item = &Handle> {
        self.handles
            .iter()
            .filter(move |h| h.kind == kind && h.is_live())
    }

    /// Live handles of `kind` this run must delete, in creation order.
    pub fn live_owned(&self, kind: ResourceKind) -> Vec<Handle> {
        self.live(kind).filter(|h| h.owned).cloned().collect()
    }

    pub fn first_live(&self, kind: ResourceKind) -> Option<&Handle> {
        self.live(kind).next()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_is_owned_and_active() {
        let mut registry = Registry::new();
        let handle = registry.register(ResourceKind::Network, "vpc-1");

        assert!(handle.owned());
        assert_eq!(HandleState::Active, handle.state());
        assert_eq!(1, registry.all().len());
    }

    #[test]
    fn reused_handles_are_not_owned() {
        let mut registry = Registry::new();
        registry.register_reused(ResourceKind::RegistryRepo, "webapp");

        assert!(registry.live_owned(ResourceKind::RegistryRepo).is_empty());
        assert_eq!(1, registry.live(ResourceKind::RegistryRepo).count());
    }

    #[test]
    fn all_keeps_creation_order_and_absent_handles() {
        let mut registry = Registry::new();
        let vpc = registry.register(ResourceKind::Network, "vpc-1");
        registry.register(ResourceKind::Gateway, "igw-1");
        registry.register(ResourceKind::Subnet, "subnet-a");

        registry.forget(vpc.id()).unwrap();

        let kinds = registry.all().iter().map(|h| h.kind()).collect::<Vec<_>>();
        assert_eq!(
            vec![
                ResourceKind::Network,
                ResourceKind::Gateway,
                ResourceKind::Subnet
            ],
            kinds
        );
        assert_eq!(HandleState::Absent, registry.all()[0].state());
        assert!(registry.first_live(ResourceKind::Network).is_none());
    }

    #[test]
    fn delete_can_fail_back_to_active() {
        let mut registry = Registry::new();
        let sg = registry.register(ResourceKind::SecurityGroup, "sg-1");

        registry.transition(sg.id(), HandleState::Deleting).unwrap();
        registry.transition(sg.id(), HandleState::Active).unwrap();
        registry.transition(sg.id(), HandleState::Deleting).unwrap();
        registry.transition(sg.id(), HandleState::Absent).unwrap();

        assert_eq!(
            Err(RegistryError::InvalidTransition {
                handle: "security-group sg-1".to_string(),
                from: HandleState::Absent,
                to: HandleState::Active,
            }),
            registry.transition(sg.id(), HandleState::Active)
        );
    }

    #[test]
    fn active_cannot_move_backwards() {
        assert!(!HandleState::Active.can_transition_to(HandleState::Creating));
        assert!(!HandleState::Absent.can_transition_to(HandleState::Deleting));
        assert!(HandleState::Requested.can_transition_to(HandleState::Creating));
        assert!(HandleState::Deleting.can_transition_to(HandleState::Active));
    }

    #[test]
    fn discovered_handles_are_not_duplicated() {
        let mut registry = Registry::new();
        let first = registry.register(ResourceKind::SecurityGroup, "sg-1");
        let again = registry.register_discovered(ResourceKind::SecurityGroup, "sg-1");
        let other = registry.register_discovered(ResourceKind::SecurityGroup, "sg-2");

        assert_eq!(first.id(), again.id());
        assert_ne!(first.id(), other.id());
        assert_eq!(2, registry.all().len());
    }
}
