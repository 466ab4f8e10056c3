//! Properties: named invariants of the whole program that passes rely on, keep,
//! establish or break.

use std::collections::BTreeMap;

use strum::{Display, EnumIter, EnumString, IntoEnumIterator, IntoStaticStr};

/// A program-wide invariant.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    Hash,
    Display,
    EnumString,
    EnumIter,
    IntoStaticStr,
)]
pub enum Property {
    /// No method contains an `init-class` pseudo instruction.
    NoInitClassInstructions,
    /// No method contains unreachable instructions.
    NoUnreachableInstructions,
    /// Every method body carries source blocks.
    HasSourceBlocks,
    /// Every dex stays within the method, field and type reference limits.
    DexLimitsObeyed,
    /// All classes and members are treated as public.
    NeedsEverythingPublic,
    /// `getClass()` calls used only for null checks have been interned.
    SpuriousGetClassCallsInterned,
    /// Class names are still the ones of the input.
    InitialRenameClass,
    /// Classes have been renamed.
    RenameClass,
    /// No switch payload exceeds the container's payload size limit.
    NoSwitchPayloadsOverLimit,
}

/// A pass' declaration for one property.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum Interaction {
    /// Must hold before the pass; the pass may break it.
    Requires,
    /// Must hold before the pass, and still holds after it.
    RequiresAndPreserves,
    /// Kept if it held.
    Preserves,
    /// Holds after the pass.
    Establishes,
    /// Does not hold after the pass.
    Destroys,
}

impl Interaction {
    /// `true` if the property must hold before the pass.
    #[must_use]
    pub fn requires(self) -> bool {
        matches!(self, Interaction::Requires | Interaction::RequiresAndPreserves)
    }

    /// `true` if the property still holds after the pass when it held before.
    #[must_use]
    pub fn preserves(self) -> bool {
        matches!(
            self,
            Interaction::RequiresAndPreserves | Interaction::Preserves | Interaction::Establishes
        )
    }
}

/// Whether a property currently holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display)]
pub enum PropertyStatus {
    /// Never established.
    Unknown,
    /// Holds.
    Established,
    /// Held once, broken since.
    Destroyed,
}

/// The property declarations of one pass.
///
/// Properties the pass does not mention are destroyed by running it unless
/// [`PropertyInteractions::preserve_all`] was called.
///
/// ```rust
/// use dexopt::pass::{Interaction, Property, PropertyInteractions};
///
/// let interactions = PropertyInteractions::new()
///     .requires(Property::HasSourceBlocks)
///     .establishes(Property::DexLimitsObeyed)
///     .preserve_all();
/// assert_eq!(interactions.get(Property::DexLimitsObeyed), Some(Interaction::Establishes));
/// assert!(interactions.keeps(Property::RenameClass));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyInteractions {
    entries: BTreeMap<Property, Interaction>,
    preserve_all: bool,
}

impl PropertyInteractions {
    /// No declarations.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares `interaction` for `property`, replacing an earlier declaration.
    #[must_use]
    pub fn with(mut self, property: Property, interaction: Interaction) -> Self {
        self.entries.insert(property, interaction);
        self
    }

    /// Declares [`Interaction::Requires`].
    #[must_use]
    pub fn requires(self, property: Property) -> Self {
        self.with(property, Interaction::Requires)
    }

    /// Declares [`Interaction::RequiresAndPreserves`].
    #[must_use]
    pub fn requires_and_preserves(self, property: Property) -> Self {
        self.with(property, Interaction::RequiresAndPreserves)
    }

    /// Declares [`Interaction::Preserves`].
    #[must_use]
    pub fn preserves(self, property: Property) -> Self {
        self.with(property, Interaction::Preserves)
    }

    /// Declares [`Interaction::Establishes`].
    #[must_use]
    pub fn establishes(self, property: Property) -> Self {
        self.with(property, Interaction::Establishes)
    }

    /// Declares [`Interaction::Destroys`].
    #[must_use]
    pub fn destroys(self, property: Property) -> Self {
        self.with(property, Interaction::Destroys)
    }

    /// Keeps every property the pass does not mention, and every property it only
    /// requires.
    #[must_use]
    pub fn preserve_all(mut self) -> Self {
        self.preserve_all = true;
        self
    }

    /// The declaration for `property`.
    #[must_use]
    pub fn get(&self, property: Property) -> Option<Interaction> {
        self.entries.get(&property).copied()
    }

    /// `true` if [`PropertyInteractions::preserve_all`] was requested.
    #[must_use]
    pub fn is_preserve_all(&self) -> bool {
        self.preserve_all
    }

    /// `true` if a property that held before the pass still holds after it.
    #[must_use]
    pub fn keeps(&self, property: Property) -> bool {
        match self.get(property) {
            Some(Interaction::Destroys) => false,
            Some(i) if i.preserves() => true,
            _ => self.preserve_all,
        }
    }

    /// Properties the pass requires.
    pub fn required(&self) -> impl Iterator<Item = Property> + '_ {
        self.entries
            .iter()
            .filter(|(_, i)| i.requires())
            .map(|(p, _)| *p)
    }

    /// Iterates the explicit declarations in property order.
    pub fn iter(&self) -> impl Iterator<Item = (Property, Interaction)> + '_ {
        self.entries.iter().map(|(p, i)| (*p, *i))
    }
}

/// The status of every property at one point of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyState {
    status: BTreeMap<Property, PropertyStatus>,
}

impl PropertyState {
    /// `initial` established, everything else unknown.
    #[must_use]
    pub fn new(initial: &[Property]) -> Self {
        let mut status: BTreeMap<Property, PropertyStatus> = Property::iter()
            .map(|p| (p, PropertyStatus::Unknown))
            .collect();
        for p in initial {
            status.insert(*p, PropertyStatus::Established);
        }
        Self { status }
    }

    /// The status of `property`.
    #[must_use]
    pub fn status(&self, property: Property) -> PropertyStatus {
        self.status
            .get(&property)
            .copied()
            .unwrap_or(PropertyStatus::Unknown)
    }

    /// `true` if `property` holds.
    #[must_use]
    pub fn is_established(&self, property: Property) -> bool {
        self.status(property) == PropertyStatus::Established
    }

    /// The first required property of `interactions` that does not hold.
    #[must_use]
    pub fn first_unsatisfied(&self, interactions: &PropertyInteractions) -> Option<Property> {
        interactions.required().find(|p| !self.is_established(*p))
    }

    /// Applies the effect of running a pass with `interactions`.
    pub fn apply(&mut self, interactions: &PropertyInteractions) {
        for (property, status) in &mut self.status {
            match interactions.get(*property) {
                Some(Interaction::Establishes) => *status = PropertyStatus::Established,
                Some(Interaction::Destroys) => *status = PropertyStatus::Destroyed,
                _ if *status == PropertyStatus::Established && !interactions.keeps(*property) => {
                    *status = PropertyStatus::Destroyed;
                }
                _ => {}
            }
        }
    }

    /// Iterates every property with its status.
    pub fn iter(&self) -> impl Iterator<Item = (Property, PropertyStatus)> + '_ {
        self.status.iter().map(|(p, s)| (*p, *s))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_destroy_and_preserve_all() {
        let mut state = PropertyState::new(&[Property::HasSourceBlocks, Property::DexLimitsObeyed]);

        let keeps_some = PropertyInteractions::new()
            .requires(Property::HasSourceBlocks)
            .preserves(Property::DexLimitsObeyed);
        assert_eq!(state.first_unsatisfied(&keeps_some), None);
        state.apply(&keeps_some);
        assert_eq!(state.status(Property::HasSourceBlocks), PropertyStatus::Destroyed);
        assert!(state.is_established(Property::DexLimitsObeyed));

        let establishes = PropertyInteractions::new()
            .establishes(Property::HasSourceBlocks)
            .preserve_all();
        state.apply(&establishes);
        assert!(state.is_established(Property::HasSourceBlocks));
        assert!(state.is_established(Property::DexLimitsObeyed));
        assert_eq!(state.status(Property::RenameClass), PropertyStatus::Unknown);

        let destroys = PropertyInteractions::new()
            .destroys(Property::DexLimitsObeyed)
            .preserve_all();
        state.apply(&destroys);
        assert_eq!(state.status(Property::DexLimitsObeyed), PropertyStatus::Destroyed);
        let requires = PropertyInteractions::new().requires(Property::DexLimitsObeyed);
        assert_eq!(state.first_unsatisfied(&requires), Some(Property::DexLimitsObeyed));
    }

    #[test]
    fn property_names_round_trip() {
        for p in Property::iter() {
            let name: &'static str = p.into();
            assert_eq!(name.parse::<Property>().ok(), Some(p));
        }
    }
}
