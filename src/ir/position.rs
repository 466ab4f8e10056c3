//! Source positions and the pattern/switch mechanism for outlined code.
//!
//! A [`DexPosition`] maps the instructions that follow it to a file and line. Inlined
//! code carries a `parent` chain describing the caller positions.
//!
//! # Outlined code
//!
//! When identical code from several call sites is moved into one helper method, each
//! instruction inside the helper stands for a different source line per call site. The
//! [`PositionPatternSwitchManager`] keeps the information needed to rebuild correct
//! stack traces:
//!
//! - a **pattern** is the list of positions one call site had at each position point of
//!   the outlined range (index `j` of the pattern is the position that applied at the
//!   `j`-th point);
//! - a **switch** lists, for one helper, the patterns of all its call sites;
//! - the helper's body holds [`PositionKind::Switch`] positions `(switch, j)`, and every
//!   call site holds a [`PositionKind::Pattern`] position naming its own pattern.
//!
//! [`PositionPatternSwitchManager::resolve`] combines the two: given the switch position
//! the helper was executing and the pattern position of the calling frame, it returns the
//! original position. [`PositionPatternSwitchManager::expand_switch`] produces the full
//! per-call-site table a serializer writes out.
//!
//! The manager is owned by the pass manager and handed to passes explicitly.

use std::sync::Arc;

use dashmap::DashMap;

use crate::ir::{MethodRef, StringRef};

define_handle!(
    /// A deduplicated list of positions for one call site.
    PatternId, "pat"
);
define_handle!(
    /// The per-call-site selection table of one helper.
    SwitchId, "sw"
);

/// What a position stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PositionKind {
    /// An ordinary file/line position.
    Normal,
    /// Marks a call site of outlined code; selects the caller's pattern.
    Pattern(PatternId),
    /// A position inside outlined code, resolved through the caller's pattern.
    Switch {
        /// The helper's switch.
        switch: SwitchId,
        /// Index into the selected pattern.
        index: u32,
    },
}

/// A source position.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DexPosition {
    /// Method the position belongs to (differs from the body's method when inlined).
    pub method: Option<MethodRef>,
    /// Source file.
    pub file: Option<StringRef>,
    /// Line number.
    pub line: u32,
    /// Caller position for inlined code.
    pub parent: Option<Arc<DexPosition>>,
    /// Ordinary, pattern or switch position.
    pub kind: PositionKind,
}

impl DexPosition {
    /// An ordinary position.
    #[must_use]
    pub fn new(method: Option<MethodRef>, file: Option<StringRef>, line: u32) -> Self {
        DexPosition {
            method,
            file,
            line,
            parent: None,
            kind: PositionKind::Normal,
        }
    }

    /// Returns this position with `parent` as its caller.
    #[must_use]
    pub fn with_parent(mut self, parent: Arc<DexPosition>) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Depth of the inlining chain (1 for a position without parent).
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self.parent.as_ref().map_or(0, |p| p.depth())
    }
}

/// Registry of position patterns and switches. See the [module documentation](self).
#[derive(Default)]
pub struct PositionPatternSwitchManager {
    patterns: boxcar::Vec<Vec<Arc<DexPosition>>>,
    pattern_ids: DashMap<Vec<Arc<DexPosition>>, PatternId>,
    switches: boxcar::Vec<Vec<PatternId>>,
    switch_ids: DashMap<Vec<PatternId>, SwitchId>,
}

impl PositionPatternSwitchManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a pattern; equal lists share one id.
    pub fn make_pattern(&self, positions: Vec<Arc<DexPosition>>) -> PatternId {
        intern_into!(
            self.pattern_ids,
            self.patterns,
            positions.clone(),
            PatternId,
            positions
        )
    }

    /// Registers a switch over the patterns of a helper's call sites; equal lists share
    /// one id.
    pub fn make_switch(&self, cases: Vec<PatternId>) -> SwitchId {
        intern_into!(self.switch_ids, self.switches, cases.clone(), SwitchId, cases)
    }

    /// The positions of a pattern.
    #[must_use]
    pub fn pattern(&self, id: PatternId) -> Option<&[Arc<DexPosition>]> {
        self.patterns.get(id.index()).map(Vec::as_slice)
    }

    /// The patterns of a switch.
    #[must_use]
    pub fn switch_cases(&self, id: SwitchId) -> Option<&[PatternId]> {
        self.switches.get(id.index()).map(Vec::as_slice)
    }

    /// Number of registered patterns.
    #[must_use]
    pub fn pattern_count(&self) -> usize {
        self.patterns.count()
    }

    /// Number of registered switches.
    #[must_use]
    pub fn switch_count(&self) -> usize {
        self.switches.count()
    }

    /// The position a call site carries to select `pattern`. It reuses the file and
    /// line of the pattern's first entry so that tools unaware of patterns still show
    /// the call site's own line.
    #[must_use]
    pub fn pattern_position(&self, pattern: PatternId) -> Arc<DexPosition> {
        let first = self.pattern(pattern).and_then(|p| p.first()).cloned();
        Arc::new(DexPosition {
            method: first.as_ref().and_then(|p| p.method),
            file: first.as_ref().and_then(|p| p.file),
            line: first.as_ref().map_or(0, |p| p.line),
            parent: None,
            kind: PositionKind::Pattern(pattern),
        })
    }

    /// The position placed at point `index` inside a helper that uses `switch`.
    #[must_use]
    pub fn switch_position(
        &self,
        method: MethodRef,
        switch: SwitchId,
        index: u32,
    ) -> Arc<DexPosition> {
        Arc::new(DexPosition {
            method: Some(method),
            file: None,
            line: index,
            parent: None,
            kind: PositionKind::Switch { switch, index },
        })
    }

    /// Resolves a helper-internal position against the calling frame's position.
    ///
    /// Returns `None` if `switch_position` is not a switch position, `caller` is not a
    /// pattern position, the caller's pattern is not one of the switch's cases, or the
    /// index is out of range.
    #[must_use]
    pub fn resolve(
        &self,
        switch_position: &DexPosition,
        caller: &DexPosition,
    ) -> Option<Arc<DexPosition>> {
        let PositionKind::Switch { switch, index } = switch_position.kind else {
            return None;
        };
        let PositionKind::Pattern(pattern) = caller.kind else {
            return None;
        };
        if !self.switch_cases(switch)?.contains(&pattern) {
            return None;
        }
        self.pattern(pattern)?.get(index as usize).cloned()
    }

    /// The per-call-site position tables of a switch, in case order.
    #[must_use]
    pub fn expand_switch(&self, switch: SwitchId) -> Vec<(PatternId, Vec<Arc<DexPosition>>)> {
        self.switch_cases(switch)
            .unwrap_or_default()
            .iter()
            .map(|&pattern| {
                let positions = self.pattern(pattern).map(<[_]>::to_vec).unwrap_or_default();
                (pattern, positions)
            })
            .collect()
    }
}

impl std::fmt::Debug for PositionPatternSwitchManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PositionPatternSwitchManager")
            .field("patterns", &self.patterns.count())
            .field("switches", &self.switches.count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ir::Pool;

    #[test]
    fn patterns_resolve_per_call_site() {
        let pool = Pool::new();
        let file = pool.intern_string("A.java");
        let k = *pool.known();
        let proto = pool.intern_proto(k.void, &[]);
        let helper = pool.intern_method(k.object, "$outlined$0", proto);

        let at = |line| Arc::new(DexPosition::new(None, Some(file), line));
        let manager = PositionPatternSwitchManager::new();
        let p1 = manager.make_pattern(vec![at(10), at(11)]);
        let p2 = manager.make_pattern(vec![at(20), at(21)]);
        assert_eq!(manager.make_pattern(vec![at(10), at(11)]), p1);

        let sw = manager.make_switch(vec![p1, p2]);
        let inside = manager.switch_position(helper, sw, 1);
        let caller2 = manager.pattern_position(p2);
        assert_eq!(caller2.line, 20);

        let resolved = manager.resolve(&inside, &caller2);
        assert_eq!(resolved.map(|p| p.line), Some(21));

        let table = manager.expand_switch(sw);
        assert_eq!(table.len(), 2);
        assert_eq!(table[0].1[0].line, 10);

        let unrelated = manager.make_pattern(vec![at(30)]);
        assert!(manager
            .resolve(&inside, &manager.pattern_position(unrelated))
            .is_none());
    }
}
