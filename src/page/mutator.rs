//! Page mutator
//!
//! Applies and reverts the temporary CSS mutations that make a page
//! capturable as a sequence of fixed-height bands.
//!
//! ```text
//!   Idle ──prepare──▶ Prepared ──hide_fixed──▶ FixedHidden
//!    ▲                  │  ▲                      │
//!    │                  │  └──────show_fixed──────┤
//!    └────restore───────┴─────────restore─────────┘
//! ```
//!
//! Every property is recorded in the [`StyleSnapshot`] before it is written,
//! so a mutation that fails halfway can still be restored. The snapshot
//! belongs to one mutator, which belongs to one capture session.

use crate::error::{Error, MutationError, Result};
use crate::page::{
    ElementQuery, Position, SavedProperty, StyleOp, StyleTarget, Surface,
};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::time::Duration;
use tracing::{debug, instrument, warn};

// Snapshots hold longhands only. A shorthand reads as empty when just some
// of its longhands are inline, and removing it would drop those too.
const ROOT_PROPERTIES: &[&str] = &["scroll-behavior", "overflow-x", "overflow-y"];
const BODY_PROPERTIES: &[&str] = &[
    "position", "min-width", "min-height", "overflow-x", "overflow-y",
];
const STICKY_PROPERTIES: &[&str] = &["position", "top", "right", "bottom", "left"];
const FIXED_PROPERTIES: &[&str] = &[
    "position", "top", "right", "bottom", "left", "width", "height", "margin-top",
    "margin-right", "margin-bottom", "margin-left", "transform", "z-index",
];
const HIDDEN_PROPERTIES: &[&str] = &["visibility", "overflow-x", "overflow-y"];
const NAVIGATION_PROPERTIES: &[&str] = &["display"];
const NAVIGATION_SELECTOR: &str = "nav, header";

/// Mutator state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutatorState {
    /// No layout mutation applied
    Idle,
    /// Fixed/sticky elements neutralized, body pinned, smooth scroll off
    Prepared,
    /// Prepared, and fixed elements hidden
    FixedHidden,
}

impl fmt::Display for MutatorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MutatorState::Idle => f.write_str("idle"),
            MutatorState::Prepared => f.write_str("prepared"),
            MutatorState::FixedHidden => f.write_str("fixed-hidden"),
        }
    }
}

/// Pre-mutation values of one target, in recording order
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SnapshotEntry {
    saved: Vec<SavedProperty>,
}

impl SnapshotEntry {
    /// Saved properties in recording order
    pub fn properties(&self) -> &[SavedProperty] {
        &self.saved
    }

    /// Saved value of one property
    pub fn get(&self, property: &str) -> Option<&SavedProperty> {
        self.saved.iter().find(|p| p.property == property)
    }
}

/// Pre-mutation style values, keyed by target.
///
/// The first recording of a property wins: later phases never overwrite a
/// value saved by an earlier one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StyleSnapshot {
    entries: BTreeMap<StyleTarget, SnapshotEntry>,
}

impl StyleSnapshot {
    /// Create an empty snapshot
    pub fn new() -> Self {
        Self::default()
    }

    /// Record properties for `target`, keeping any earlier recording
    pub fn record(&mut self, target: StyleTarget, properties: Vec<SavedProperty>) {
        let entry = self.entries.entry(target).or_default();
        for property in properties {
            if entry.get(&property.property).is_none() {
                entry.saved.push(property);
            }
        }
    }

    /// Entry for one target
    pub fn get(&self, target: &StyleTarget) -> Option<&SnapshotEntry> {
        self.entries.get(target)
    }

    /// Number of snapshotted targets
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing is snapshotted
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Ops that restore every snapshotted property
    pub fn restore_ops(&self) -> Vec<StyleOp> {
        self.entries
            .iter()
            .flat_map(|(target, entry)| {
                entry
                    .saved
                    .iter()
                    .map(move |saved| StyleOp::restore(*target, saved))
            })
            .collect()
    }

    /// Ops that restore the snapshotted properties of `targets`
    pub fn restore_ops_for<'t>(
        &self,
        targets: impl IntoIterator<Item = &'t StyleTarget>,
    ) -> Vec<StyleOp> {
        targets
            .into_iter()
            .filter_map(|target| self.entries.get(target).map(|entry| (target, entry)))
            .flat_map(|(target, entry)| {
                entry
                    .saved
                    .iter()
                    .map(move |saved| StyleOp::restore(*target, saved))
            })
            .collect()
    }

    /// Remove `properties` of `targets` from the snapshot, returning their restore ops
    pub fn take<'t>(
        &mut self,
        targets: impl IntoIterator<Item = &'t StyleTarget>,
        properties: &[&str],
    ) -> Vec<StyleOp> {
        let mut ops = Vec::new();
        for target in targets {
            if let Some(entry) = self.entries.get_mut(target) {
                entry.saved.retain(|saved| {
                    if properties.contains(&saved.property.as_str()) {
                        ops.push(StyleOp::restore(*target, saved));
                        false
                    } else {
                        true
                    }
                });
                if entry.saved.is_empty() {
                    self.entries.remove(target);
                }
            }
        }
        ops
    }

    /// Drop everything
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

/// Session-scoped page mutator
pub struct PageMutator<'a, S: Surface + ?Sized> {
    surface: &'a S,
    key: String,
    auto_revert: Duration,
    state: MutatorState,
    snapshot: StyleSnapshot,
    fixed: BTreeSet<StyleTarget>,
    hidden: BTreeSet<StyleTarget>,
    navigation: BTreeSet<StyleTarget>,
    revert_armed: bool,
}

impl<'a, S: Surface + ?Sized> PageMutator<'a, S> {
    /// Create a mutator for `surface`.
    ///
    /// `key` names the in-page auto-revert timer and must be unique per
    /// session. A zero `auto_revert` disables the timer.
    pub fn new(surface: &'a S, key: impl Into<String>, auto_revert: Duration) -> Self {
        Self {
            surface,
            key: key.into(),
            auto_revert,
            state: MutatorState::Idle,
            snapshot: StyleSnapshot::new(),
            fixed: BTreeSet::new(),
            hidden: BTreeSet::new(),
            navigation: BTreeSet::new(),
            revert_armed: false,
        }
    }

    /// Current state
    pub fn state(&self) -> MutatorState {
        self.state
    }

    /// Current snapshot
    pub fn snapshot(&self) -> &StyleSnapshot {
        &self.snapshot
    }

    /// `Idle -> Prepared`
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn prepare(&mut self) -> Result<()> {
        self.expect_state(&[MutatorState::Idle], "prepareCapture")?;

        let scroll_top = self.surface.scroll_offset().await.map_err(script_error)? as f64;
        let elements = self
            .surface
            .query(&ElementQuery::Positioned {
                positions: vec![Position::Fixed, Position::Sticky],
            })
            .await
            .map_err(script_error)?;

        let mut ops = Vec::new();
        self.save(StyleTarget::Root, ROOT_PROPERTIES).await?;
        ops.push(StyleOp::force(StyleTarget::Root, "scroll-behavior", "auto"));
        ops.push(StyleOp::force(StyleTarget::Root, "overflow", "visible"));

        self.save(StyleTarget::Body, BODY_PROPERTIES).await?;
        ops.push(StyleOp::force(StyleTarget::Body, "position", "relative"));
        ops.push(StyleOp::force(StyleTarget::Body, "min-width", "100vw"));
        ops.push(StyleOp::force(StyleTarget::Body, "min-height", "100vh"));
        ops.push(StyleOp::force(StyleTarget::Body, "overflow", "visible"));

        let mut neutralized = Vec::new();
        for element in &elements {
            let target = StyleTarget::Element(element.id);
            if element.position == "fixed" {
                self.save(target, FIXED_PROPERTIES).await?;
                let rect = element.rect;
                let (top, left) = match element.container {
                    Some(origin) => (rect.top - origin.top, rect.left - origin.left),
                    None => (rect.top + scroll_top, rect.left),
                };
                ops.push(StyleOp::force(target, "position", "absolute"));
                ops.push(StyleOp::force(target, "top", px(top)));
                ops.push(StyleOp::force(target, "left", px(left)));
                ops.push(StyleOp::force(target, "right", "auto"));
                ops.push(StyleOp::force(target, "bottom", "auto"));
                ops.push(StyleOp::force(target, "width", px(rect.width)));
                ops.push(StyleOp::force(target, "height", px(rect.height)));
                ops.push(StyleOp::force(target, "margin", "0"));
                ops.push(StyleOp::force(target, "transform", "none"));
                self.fixed.insert(target);
            } else {
                self.save(target, STICKY_PROPERTIES).await?;
                ops.push(StyleOp::force(target, "position", "relative"));
                ops.push(StyleOp::force(target, "inset", "auto"));
            }
            neutralized.push(target);
        }

        // Snapshot is complete; from here on restore can undo a partial apply.
        self.state = MutatorState::Prepared;
        debug!(
            "Neutralizing {} positioned elements ({} fixed)",
            neutralized.len(),
            self.fixed.len()
        );

        self.surface.apply_styles(&ops).await.map_err(script_error)?;

        if !self.auto_revert.is_zero() && !neutralized.is_empty() {
            let revert = self.snapshot.restore_ops_for(&neutralized);
            self.surface
                .schedule_revert(&self.key, &revert, self.auto_revert)
                .await
                .map_err(script_error)?;
            self.revert_armed = true;
        }

        Ok(())
    }

    /// `Prepared -> FixedHidden`
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn hide_fixed(&mut self) -> Result<()> {
        self.expect_state(&[MutatorState::Prepared], "hideFixedElements")?;

        let mut targets = self.fixed.clone();
        let still_fixed = self
            .surface
            .query(&ElementQuery::Positioned {
                positions: vec![Position::Fixed],
            })
            .await
            .map_err(script_error)?;
        targets.extend(still_fixed.iter().map(|e| StyleTarget::Element(e.id)));

        let mut ops = Vec::with_capacity(targets.len() * 2);
        for target in &targets {
            self.save(*target, HIDDEN_PROPERTIES).await?;
            ops.push(StyleOp::force(*target, "visibility", "hidden"));
            ops.push(StyleOp::force(*target, "overflow", "hidden"));
        }

        self.state = MutatorState::FixedHidden;
        self.hidden = targets;
        debug!("Hiding {} fixed elements", self.hidden.len());

        self.surface.apply_styles(&ops).await.map_err(script_error)
    }

    /// `FixedHidden -> Prepared`
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn show_fixed(&mut self) -> Result<()> {
        self.expect_state(&[MutatorState::FixedHidden], "showFixedElements")?;

        let ops = self.snapshot.take(&self.hidden, HIDDEN_PROPERTIES);
        self.surface.apply_styles(&ops).await.map_err(script_error)?;

        self.hidden.clear();
        self.state = MutatorState::Prepared;
        Ok(())
    }

    /// Hide `nav` and `header` elements. Allowed in any state.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn hide_navigation(&mut self) -> Result<()> {
        let elements = self
            .surface
            .query(&ElementQuery::Selector {
                selector: NAVIGATION_SELECTOR.to_string(),
            })
            .await
            .map_err(script_error)?;

        let mut ops = Vec::with_capacity(elements.len());
        for element in &elements {
            let target = StyleTarget::Element(element.id);
            self.save(target, NAVIGATION_PROPERTIES).await?;
            ops.push(StyleOp::force(target, "display", "none"));
            self.navigation.insert(target);
        }

        self.surface.apply_styles(&ops).await.map_err(script_error)
    }

    /// Undo [`hide_navigation`](Self::hide_navigation)
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn show_navigation(&mut self) -> Result<()> {
        if self.navigation.is_empty() {
            return Ok(());
        }
        let ops = self.snapshot.take(&self.navigation, NAVIGATION_PROPERTIES);
        self.surface.apply_styles(&ops).await.map_err(script_error)?;
        self.navigation.clear();
        Ok(())
    }

    /// Any state -> `Idle`.
    ///
    /// On failure the snapshot is kept so the restore can be retried.
    #[instrument(skip(self), fields(key = %self.key))]
    pub async fn restore(&mut self) -> Result<()> {
        if self.revert_armed {
            if let Err(e) = self.surface.cancel_revert(&self.key).await {
                warn!("Failed to cancel auto-revert timer: {}", e);
            }
            self.revert_armed = false;
        }

        if self.snapshot.is_empty() {
            self.state = MutatorState::Idle;
            return Ok(());
        }

        let ops = self.snapshot.restore_ops();
        debug!(
            "Restoring {} properties on {} targets",
            ops.len(),
            self.snapshot.len()
        );
        self.surface.apply_styles(&ops).await.map_err(script_error)?;

        self.snapshot.clear();
        self.fixed.clear();
        self.hidden.clear();
        self.navigation.clear();
        self.state = MutatorState::Idle;

        if let Err(e) = self.surface.release_elements().await {
            warn!("Failed to release element handles: {}", e);
        }
        Ok(())
    }

    async fn save(&mut self, target: StyleTarget, properties: &[&str]) -> Result<()> {
        let saved = self
            .surface
            .read_styles(target, properties)
            .await
            .map_err(script_error)?;
        self.snapshot.record(target, saved);
        Ok(())
    }

    fn expect_state(&self, allowed: &[MutatorState], action: &str) -> Result<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(MutationError::InvalidTransition {
                state: self.state.to_string(),
                action: action.to_string(),
            }
            .into())
        }
    }
}

fn px(value: f64) -> String {
    format!("{}px", value.round() as i64)
}

fn script_error(err: Error) -> Error {
    match err {
        Error::Mutation(_) => err,
        other => MutationError::Script(other.to_string()).into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::page::{ElementId, InlineValue, StyleAction};

    fn saved(property: &str, inline: Option<&str>) -> SavedProperty {
        SavedProperty {
            property: property.to_string(),
            computed: inline.unwrap_or("auto").to_string(),
            inline: inline.map(|v| InlineValue {
                value: v.to_string(),
                important: false,
            }),
        }
    }

    #[test]
    fn test_snapshot_first_recording_wins() {
        let mut snapshot = StyleSnapshot::new();
        let target = StyleTarget::Element(ElementId(1));
        snapshot.record(target, vec![saved("overflow-y", Some("scroll"))]);
        snapshot.record(
            target,
            vec![saved("overflow-y", Some("hidden")), saved("visibility", None)],
        );

        let entry = snapshot.get(&target).unwrap();
        assert_eq!(entry.properties().len(), 2);
        assert_eq!(
            entry.get("overflow-y").unwrap().inline.as_ref().unwrap().value,
            "scroll"
        );
    }

    #[test]
    fn test_snapshot_restore_ops_keep_recording_order() {
        let mut snapshot = StyleSnapshot::new();
        let target = StyleTarget::Element(ElementId(4));
        snapshot.record(
            target,
            vec![saved("left", None), saved("top", Some("8px"))],
        );

        let ops = snapshot.restore_ops();
        assert_eq!(ops.len(), 2);
        assert_eq!(ops[0].property, "left");
        assert_eq!(ops[0].action, StyleAction::Remove);
        assert_eq!(ops[1].property, "top");
        assert_eq!(
            ops[1].action,
            StyleAction::Set {
                value: "8px".to_string(),
                important: false
            }
        );
    }

    #[test]
    fn test_snapshot_take_removes_properties() {
        let mut snapshot = StyleSnapshot::new();
        let target = StyleTarget::Element(ElementId(2));
        snapshot.record(
            target,
            vec![saved("position", Some("fixed")), saved("visibility", None)],
        );

        let ops = snapshot.take([&target], &["visibility"]);
        assert_eq!(ops.len(), 1);
        assert_eq!(snapshot.get(&target).unwrap().properties().len(), 1);

        let ops = snapshot.take([&target], &["position"]);
        assert_eq!(ops.len(), 1);
        assert!(snapshot.is_empty());
    }

    #[test]
    fn test_state_display() {
        assert_eq!(MutatorState::Idle.to_string(), "idle");
        assert_eq!(MutatorState::FixedHidden.to_string(), "fixed-hidden");
    }

    #[test]
    fn test_px_rounds() {
        assert_eq!(px(10.4), "10px");
        assert_eq!(px(-3.6), "-4px");
    }
}
