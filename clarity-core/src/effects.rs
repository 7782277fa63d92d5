//! Effect tags and effect sets.

use core::fmt;

/// One capability a function may exercise. The universe is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Effect {
    FileSystem,
    Log,
    Network,
    DB,
    Random,
    Time,
    Test,
    Model,
    MCP,
    A2A,
    Secret,
}

impl Effect {
    pub const ALL: [Effect; 11] = [
        Effect::FileSystem,
        Effect::Log,
        Effect::Network,
        Effect::DB,
        Effect::Random,
        Effect::Time,
        Effect::Test,
        Effect::Model,
        Effect::MCP,
        Effect::A2A,
        Effect::Secret,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Effect::FileSystem => "FileSystem",
            Effect::Log => "Log",
            Effect::Network => "Network",
            Effect::DB => "DB",
            Effect::Random => "Random",
            Effect::Time => "Time",
            Effect::Test => "Test",
            Effect::Model => "Model",
            Effect::MCP => "MCP",
            Effect::A2A => "A2A",
            Effect::Secret => "Secret",
        }
    }

    pub fn from_name(name: &str) -> Option<Effect> {
        Effect::ALL.into_iter().find(|e| e.name() == name)
    }

    fn bit(self) -> u16 {
        1 << (self as u16)
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A set of [`Effect`]s stored as a bitset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct EffectSet(u16);

impl EffectSet {
    pub const fn empty() -> EffectSet {
        EffectSet(0)
    }

    pub fn single(effect: Effect) -> EffectSet {
        EffectSet(effect.bit())
    }

    pub fn insert(&mut self, effect: Effect) {
        self.0 |= effect.bit();
    }

    pub fn contains(self, effect: Effect) -> bool {
        self.0 & effect.bit() != 0
    }

    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    pub fn is_subset(self, other: EffectSet) -> bool {
        self.0 & !other.0 == 0
    }

    pub fn union(self, other: EffectSet) -> EffectSet {
        EffectSet(self.0 | other.0)
    }

    /// Effects in `self` that are not in `other`.
    pub fn difference(self, other: EffectSet) -> EffectSet {
        EffectSet(self.0 & !other.0)
    }

    /// Members in declaration order of [`Effect`].
    pub fn iter(self) -> impl Iterator<Item = Effect> {
        Effect::ALL.into_iter().filter(move |e| self.contains(*e))
    }
}

impl FromIterator<Effect> for EffectSet {
    fn from_iter<I: IntoIterator<Item = Effect>>(iter: I) -> Self {
        let mut set = EffectSet::empty();
        for e in iter {
            set.insert(e);
        }
        set
    }
}

impl fmt::Display for EffectSet {
    /// Renders as the source annotation, e.g. `effect[FileSystem, Log]`.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("effect[")?;
        for (i, e) in self.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            f.write_str(e.name())?;
        }
        f.write_str("]")
    }
}
