// ── Requestor priority classification ──
//
// Every interface request is attributed to a WorkSource: one or more tags
// naming the callers that jointly asked for it. A `RequestorContext`
// collaborator maps each tag to a tier from its knowledge of the caller
// (privileged service, system app, foreground state, ...); the composite
// classifies as the highest tier among its tags. An empty or otherwise
// malformed WorkSource classifies as `Background`.

use serde::{Deserialize, Serialize};

/// Priority tier of a requestor, lowest to highest. The derived `Ord`
/// follows declaration order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum PriorityTier {
    /// Everything not covered below.
    Background,
    /// Requests from apps the user is looking at.
    ForegroundApp,
    /// Requests from foreground services.
    ForegroundService,
    /// Requests from system apps.
    System,
    /// Requests from privileged callers the user is directly interacting
    /// with (settings, setup wizard, the connectivity stack).
    Privileged,
    /// Requests originating inside the stack itself.
    Internal,
}

/// One attribution entry: which caller asked.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkTag {
    pub uid: u32,
    pub package: Option<String>,
}

impl WorkTag {
    pub fn new(uid: u32) -> Self {
        Self { uid, package: None }
    }

    pub fn with_package(uid: u32, package: impl Into<String>) -> Self {
        Self {
            uid,
            package: Some(package.into()),
        }
    }
}

/// Attribution of an interface request: the set of callers that asked for
/// it. Used solely to compute a priority tier.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkSource {
    tags: Vec<WorkTag>,
}

impl WorkSource {
    pub fn new(tags: Vec<WorkTag>) -> Self {
        Self { tags }
    }

    /// Single-caller convenience constructor.
    pub fn from_uid(uid: u32) -> Self {
        Self {
            tags: vec![WorkTag::new(uid)],
        }
    }

    pub fn tags(&self) -> &[WorkTag] {
        &self.tags
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

/// Collaborator resolving attribution to priority and answering the role
/// questions the victim policy needs. Implemented by the embedding stack,
/// which knows which uids are privileged, what is in the foreground, and
/// which station interface carries the primary connection.
pub trait RequestorContext: Send + Sync {
    /// Tier of a single attribution tag.
    fn tier_of(&self, tag: &WorkTag) -> PriorityTier;

    /// Whether the named STA interface carries the primary connection.
    /// A privileged P2P request may not displace it.
    fn is_primary_station(&self, iface_name: &str) -> bool {
        let _ = iface_name;
        false
    }

    /// Whether the named STA interface is expendable (e.g. a secondary
    /// internet connection) and may be reclaimed by any non-background
    /// request.
    fn is_removable_station(&self, iface_name: &str) -> bool {
        let _ = iface_name;
        false
    }
}

/// Collaborator that may gate an eviction on user confirmation. Answering
/// `true` approves the deletion here; presenting the actual dialog is the
/// collaborator's business.
pub trait ConflictPolicy: Send + Sync {
    fn needs_user_approval(
        &self,
        requested: airmux_hal::InterfaceKind,
        new_requestor: &WorkSource,
        existing: airmux_hal::InterfaceKind,
        existing_requestor: &WorkSource,
    ) -> bool {
        let _ = (requested, new_requestor, existing, existing_requestor);
        false
    }
}

/// Default policy: never asks the user, every decision stays with the
/// priority rules.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoConflictPolicy;

impl ConflictPolicy for NoConflictPolicy {}

/// Reduce a composite WorkSource to its single highest tier.
pub fn classify(requestor: &WorkSource, context: &dyn RequestorContext) -> PriorityTier {
    requestor
        .tags()
        .iter()
        .map(|tag| context.tier_of(tag))
        .max()
        .unwrap_or(PriorityTier::Background)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    struct UidBands;

    impl RequestorContext for UidBands {
        fn tier_of(&self, tag: &WorkTag) -> PriorityTier {
            match tag.uid {
                0..=999 => PriorityTier::Privileged,
                1000..=1999 => PriorityTier::System,
                2000..=2999 => PriorityTier::ForegroundService,
                3000..=3999 => PriorityTier::ForegroundApp,
                _ => PriorityTier::Background,
            }
        }
    }

    #[test]
    fn tier_order_matches_the_policy() {
        assert!(PriorityTier::Background < PriorityTier::ForegroundApp);
        assert!(PriorityTier::ForegroundApp < PriorityTier::ForegroundService);
        assert!(PriorityTier::ForegroundService < PriorityTier::System);
        assert!(PriorityTier::System < PriorityTier::Privileged);
        assert!(PriorityTier::Privileged < PriorityTier::Internal);
    }

    #[test]
    fn composite_reduces_to_highest_tier() {
        let ws = WorkSource::new(vec![
            WorkTag::new(5000),
            WorkTag::new(1500),
            WorkTag::new(3500),
        ]);
        assert_eq!(classify(&ws, &UidBands), PriorityTier::System);
    }

    #[test]
    fn empty_worksource_is_background() {
        assert_eq!(
            classify(&WorkSource::default(), &UidBands),
            PriorityTier::Background
        );
    }
}
